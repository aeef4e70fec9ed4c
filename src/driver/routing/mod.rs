//! 라우팅 모듈
//!
//! 클러스터 환경에서 자동 라우팅을 지원합니다.
//!
//! # 개요
//!
//! 라우팅 드라이버는 `neo4j://` 스킴을 사용하여 클러스터에 연결합니다.
//! 데이터베이스별 라우팅 테이블을 라우터에서 받아 캐시하고, 읽기 작업은
//! 리더(READ) 서버로, 쓰기 작업은 라이터(WRITE) 서버로 보냅니다.
//!
//! - [`RoutingTable`]: 역할별 주소 목록과 TTL
//! - [`RoutingTableManager`]: 데이터베이스별 캐시, 단일 갱신(single-flight)
//! - [`ClusterDiscovery`]: 라우터에 ROUTE 요청
//! - [`LoadBalancer`]: 정책에 따른 서버 선택과 에러 피드백

mod discovery;
mod load_balancer;
mod manager;
mod policy;
mod table;

pub use discovery::{parse_routing_table, ClusterDiscovery, Discovery};
pub use load_balancer::{LoadBalancer, RoutedConnection};
pub use manager::{AddressResolver, RoutingTableManager};
pub use policy::{RoutingPolicy, ServerSelector};
pub use table::{RoutingTable, ServerRole};
