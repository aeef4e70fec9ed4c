//! 라우팅 테이블 조회
//!
//! 라우터 연결에 ROUTE 요청을 보내고 응답을 [`RoutingTable`]로 변환합니다.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::super::driver::ServerAddress;
use super::super::error::{DriverError, DriverResult};
use super::super::pool::PooledConnection;
use super::super::session::Bookmark;
use super::table::{RoutingTable, ServerRole};
use crate::bolt::{Metadata, Request};

/// 라우팅 테이블 조회기
#[async_trait]
pub trait Discovery: Send + Sync {
    /// 라우터 연결로 `database`의 라우팅 테이블 조회
    async fn discover(
        &self,
        conn: &mut PooledConnection,
        database: &str,
        bookmarks: &[Bookmark],
        impersonated_user: Option<&str>,
    ) -> DriverResult<RoutingTable>;
}

/// ROUTE 메시지 기반 조회기
#[derive(Debug, Clone)]
pub struct ClusterDiscovery {
    /// URI 쿼리에서 온 라우팅 컨텍스트
    routing_context: HashMap<String, String>,
    /// 응답 대기 타임아웃
    timeout: Duration,
}

impl ClusterDiscovery {
    /// 새 조회기 생성
    pub fn new(routing_context: HashMap<String, String>, timeout: Duration) -> Self {
        Self {
            routing_context,
            timeout,
        }
    }
}

#[async_trait]
impl Discovery for ClusterDiscovery {
    async fn discover(
        &self,
        conn: &mut PooledConnection,
        database: &str,
        bookmarks: &[Bookmark],
        impersonated_user: Option<&str>,
    ) -> DriverResult<RoutingTable> {
        let request = Request::route(
            self.routing_context.clone(),
            Bookmark::values(bookmarks),
            (!database.is_empty()).then(|| database.to_string()),
            impersonated_user.map(str::to_string),
        );

        let exchange = async {
            let pending = conn.send_and_receive(request).await?;
            pending.wait().await
        };
        let outcome = tokio::time::timeout(self.timeout, exchange).await;
        let summary = match outcome {
            Ok(result) => result?,
            Err(_) => {
                conn.mark_broken();
                return Err(DriverError::timeout(format!(
                    "Routing table discovery from {} timed out after {:?}",
                    conn.address(),
                    self.timeout
                )));
            }
        };

        let table = parse_routing_table(database, &summary.metadata)?;
        tracing::debug!(
            router = %conn.address(),
            database,
            routers = table.routers.len(),
            readers = table.readers.len(),
            writers = table.writers.len(),
            ttl = ?table.ttl,
            "received routing table"
        );
        Ok(table)
    }
}

// ============================================================================
// 응답 파싱
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawRoutingTable {
    ttl: i64,
    servers: Vec<RawServer>,
    #[serde(default, alias = "database")]
    db: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    addresses: Vec<String>,
    role: String,
}

/// SUCCESS 메타데이터를 라우팅 테이블로 변환
///
/// 메타데이터는 `rt` 키 아래 또는 최상위에 `{ttl, servers, db}`를 가집니다.
/// 라우터나 리더가 없는 응답은 프로토콜 위반입니다. 라이터는 없을 수 있습니다.
pub fn parse_routing_table(database: &str, metadata: &Metadata) -> DriverResult<RoutingTable> {
    let raw = match metadata.get("rt") {
        Some(rt) => rt.clone(),
        None => Value::Object(metadata.clone()),
    };
    let raw: RawRoutingTable = serde_json::from_value(raw)
        .map_err(|e| DriverError::protocol(format!("Invalid routing table response: {}", e)))?;

    let mut routers = Vec::new();
    let mut readers = Vec::new();
    let mut writers = Vec::new();
    for server in raw.servers {
        let Some(role) = ServerRole::parse(&server.role) else {
            tracing::debug!(role = %server.role, "ignoring unknown server role");
            continue;
        };
        let target = match role {
            ServerRole::Route => &mut routers,
            ServerRole::Read => &mut readers,
            ServerRole::Write => &mut writers,
        };
        for address in &server.addresses {
            target.push(ServerAddress::parse(address)?);
        }
    }

    if routers.is_empty() {
        return Err(DriverError::protocol("Routing table response contains no routers"));
    }
    if readers.is_empty() {
        return Err(DriverError::protocol("Routing table response contains no readers"));
    }

    let ttl = Duration::from_secs(raw.ttl.max(0) as u64);
    let database = raw.db.unwrap_or_else(|| database.to_string());
    Ok(RoutingTable::new(database, routers, readers, writers, ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::Response;
    use crate::driver::auth::{AuthToken, StaticAuthTokenManager};
    use crate::driver::pool::{ConnectionPool, PoolConfig};
    use crate::driver::test_support::{addr, routing_reply, MockConnector};
    use serde_json::json;
    use std::sync::Arc;

    fn metadata(value: Value) -> Metadata {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_parse_nested_rt() {
        let meta = metadata(json!({
            "rt": {
                "ttl": 300,
                "db": "movies",
                "servers": [
                    {"addresses": ["r1:7687", "r2:7687"], "role": "ROUTE"},
                    {"addresses": ["w1:7687"], "role": "WRITE"},
                    {"addresses": ["r1:7687", "r2:7687"], "role": "READ"}
                ]
            }
        }));
        let table = parse_routing_table("", &meta).unwrap();
        assert_eq!(table.database, "movies");
        assert_eq!(table.routers, vec![addr("r1:7687"), addr("r2:7687")]);
        assert_eq!(table.writers, vec![addr("w1:7687")]);
        assert_eq!(table.readers.len(), 2);
        assert_eq!(table.ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_parse_flat_without_writers() {
        let meta = metadata(json!({
            "ttl": 0,
            "database": null,
            "servers": [
                {"addresses": ["r1:7687"], "role": "ROUTE"},
                {"addresses": ["r1:7687"], "role": "READ"},
                {"addresses": ["x:1"], "role": "ARBITER"}
            ]
        }));
        let table = parse_routing_table("neo4j", &meta).unwrap();
        assert_eq!(table.database, "neo4j");
        assert!(table.writers.is_empty());
        assert_eq!(table.ttl, Duration::ZERO);
    }

    #[test]
    fn test_parse_rejects_missing_routers_or_readers() {
        let no_routers = metadata(json!({
            "ttl": 10,
            "servers": [{"addresses": ["r1:7687"], "role": "READ"}]
        }));
        assert!(matches!(parse_routing_table("", &no_routers), Err(DriverError::Protocol(_))));

        let no_readers = metadata(json!({
            "ttl": 10,
            "servers": [{"addresses": ["r1:7687"], "role": "ROUTE"}]
        }));
        assert!(matches!(parse_routing_table("", &no_readers), Err(DriverError::Protocol(_))));

        let garbage = metadata(json!({"ttl": "soon"}));
        assert!(matches!(parse_routing_table("", &garbage), Err(DriverError::Protocol(_))));
    }

    #[test]
    fn test_negative_ttl_clamped() {
        let meta = metadata(json!({
            "ttl": -5,
            "servers": [
                {"addresses": ["r1:7687"], "role": "ROUTE"},
                {"addresses": ["r1:7687"], "role": "READ"}
            ]
        }));
        assert_eq!(parse_routing_table("", &meta).unwrap().ttl, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_discover_over_connection() {
        let connector = MockConnector::new();
        let router = addr("r1:7687");
        connector.route(
            &router,
            routing_reply(60, &["r1:7687"], &["r1:7687", "r2:7687"], &["w1:7687"]),
        );
        let pool = ConnectionPool::new(
            PoolConfig::default(),
            connector.clone(),
            Arc::new(StaticAuthTokenManager::new(AuthToken::none())),
        );
        let discovery = ClusterDiscovery::new(HashMap::new(), Duration::from_secs(5));

        let mut conn = pool.acquire(&router, Duration::from_secs(1)).await.unwrap();
        let table = discovery
            .discover(&mut conn, "movies", &[Bookmark::new("b1")], None)
            .await
            .unwrap();
        pool.release(conn).await;

        assert_eq!(table.writers, vec![addr("w1:7687")]);
        assert_eq!(connector.route_requests(), 1);
        assert_eq!(connector.last_route_database(), Some("movies".to_string()));
    }

    #[tokio::test]
    async fn test_discover_server_failure() {
        let connector = MockConnector::new();
        let router = addr("r1:7687");
        connector.route(
            &router,
            Response::failure("Neo.ClientError.Database.DatabaseNotFound", "no such db"),
        );
        let pool = ConnectionPool::new(
            PoolConfig::default(),
            connector.clone(),
            Arc::new(StaticAuthTokenManager::new(AuthToken::none())),
        );
        let discovery = ClusterDiscovery::new(HashMap::new(), Duration::from_secs(5));

        let mut conn = pool.acquire(&router, Duration::from_secs(1)).await.unwrap();
        let err = discovery.discover(&mut conn, "nope", &[], None).await.unwrap_err();
        assert!(matches!(err, DriverError::Client(_)));
        pool.release(conn).await;
    }
}
