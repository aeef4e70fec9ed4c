//! Pool Metrics
//!
//! 연결 풀 카운터와 히스토그램

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

// ============================================================================
// Histogram - 히스토그램
// ============================================================================

/// 지연 분포 히스토그램 (밀리초 단위, 2의 거듭제곱 버킷)
pub struct Histogram {
    inner: Mutex<HistogramInner>,
}

struct HistogramInner {
    count: u64,
    sum: u64,
    min: u64,
    max: u64,
    /// [0ms, 1ms, 2-3ms, 4-7ms, ..., 2^30ms+]
    buckets: [u64; 32],
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    /// 빈 히스토그램 생성
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HistogramInner {
                count: 0,
                sum: 0,
                min: u64::MAX,
                max: 0,
                buckets: [0; 32],
            }),
        }
    }

    /// 소요 시간 기록
    pub fn record(&self, elapsed: Duration) {
        let value = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut inner = self.inner.lock();
        inner.count += 1;
        inner.sum = inner.sum.saturating_add(value);
        inner.min = inner.min.min(value);
        inner.max = inner.max.max(value);
        inner.buckets[bucket_of(value)] += 1;
    }

    /// 스냅샷
    pub fn snapshot(&self) -> HistogramSnapshot {
        let inner = self.inner.lock();
        let mean = if inner.count > 0 {
            inner.sum / inner.count
        } else {
            0
        };

        HistogramSnapshot {
            count: inner.count,
            sum_ms: inner.sum,
            min_ms: if inner.min == u64::MAX { 0 } else { inner.min },
            max_ms: inner.max,
            mean_ms: mean,
            p50_ms: percentile(&inner.buckets, inner.count, inner.max, 0.50),
            p95_ms: percentile(&inner.buckets, inner.count, inner.max, 0.95),
            p99_ms: percentile(&inner.buckets, inner.count, inner.max, 0.99),
        }
    }
}

fn bucket_of(value: u64) -> usize {
    if value == 0 {
        0
    } else {
        (64 - value.leading_zeros()).min(31) as usize
    }
}

/// 버킷 상한으로 근사한 백분위수 (최댓값을 넘지 않음)
fn percentile(buckets: &[u64; 32], total: u64, max: u64, p: f64) -> u64 {
    if total == 0 {
        return 0;
    }
    let target = ((total as f64 * p).ceil() as u64).max(1);
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            let upper = if i == 0 { 0 } else { (1u64 << i) - 1 };
            return upper.min(max);
        }
    }
    max
}

/// 히스토그램 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistogramSnapshot {
    /// 기록 횟수
    pub count: u64,
    /// 합계 (ms)
    pub sum_ms: u64,
    /// 최소값 (ms)
    pub min_ms: u64,
    /// 최대값 (ms)
    pub max_ms: u64,
    /// 평균 (ms)
    pub mean_ms: u64,
    /// 50번째 백분위수 (버킷 상한, ms)
    pub p50_ms: u64,
    /// 95번째 백분위수 (버킷 상한, ms)
    pub p95_ms: u64,
    /// 99번째 백분위수 (버킷 상한, ms)
    pub p99_ms: u64,
}

// ============================================================================
// PoolCounters - 풀 카운터
// ============================================================================

/// 주소별 풀 이벤트 카운터
///
/// `creating`, `closing`, `acquiring`은 진행 중인 작업 수(게이지)이고,
/// 나머지는 누적 횟수입니다.
#[derive(Default)]
pub struct PoolCounters {
    pub(crate) creating: AtomicU64,
    pub(crate) created: AtomicU64,
    pub(crate) failed_to_create: AtomicU64,
    pub(crate) closing: AtomicU64,
    pub(crate) closed: AtomicU64,
    pub(crate) acquiring: AtomicU64,
    pub(crate) acquired: AtomicU64,
    pub(crate) timed_out_to_acquire: AtomicU64,
    pub(crate) acquisition_time: Histogram,
    pub(crate) connection_lifetime: Histogram,
}

impl PoolCounters {
    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec(counter: &AtomicU64) {
        // 0 아래로 내려가지 않음
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// 스냅샷 생성
    pub(crate) fn snapshot(&self, address: String, in_use: usize, idle: usize) -> AddressPoolMetrics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        AddressPoolMetrics {
            address,
            in_use,
            idle,
            creating: load(&self.creating),
            created: load(&self.created),
            failed_to_create: load(&self.failed_to_create),
            closing: load(&self.closing),
            closed: load(&self.closed),
            acquiring: load(&self.acquiring),
            acquired: load(&self.acquired),
            timed_out_to_acquire: load(&self.timed_out_to_acquire),
            acquisition_time: self.acquisition_time.snapshot(),
            connection_lifetime: self.connection_lifetime.snapshot(),
        }
    }
}

/// 주소별 풀 메트릭 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddressPoolMetrics {
    /// 서버 주소 (`host:port`)
    pub address: String,
    /// 사용 중인 연결 수
    pub in_use: usize,
    /// 유휴 연결 수
    pub idle: usize,
    /// 생성 중
    pub creating: u64,
    /// 생성 완료
    pub created: u64,
    /// 생성 실패
    pub failed_to_create: u64,
    /// 닫는 중
    pub closing: u64,
    /// 닫힘
    pub closed: u64,
    /// 획득 대기 중
    pub acquiring: u64,
    /// 획득 완료
    pub acquired: u64,
    /// 획득 타임아웃
    pub timed_out_to_acquire: u64,
    /// 획득 소요 시간
    pub acquisition_time: HistogramSnapshot,
    /// 연결 수명
    pub connection_lifetime: HistogramSnapshot,
}

/// 드라이버 전체 메트릭
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverMetrics {
    /// 주소별 풀 메트릭 (주소순 정렬)
    pub pools: Vec<AddressPoolMetrics>,
}

impl DriverMetrics {
    /// 특정 주소의 메트릭
    pub fn pool(&self, address: &str) -> Option<&AddressPoolMetrics> {
        self.pools.iter().find(|p| p.address == address)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_empty() {
        let h = Histogram::new();
        assert_eq!(h.snapshot(), HistogramSnapshot::default());
    }

    #[test]
    fn test_histogram_stats() {
        let h = Histogram::new();
        for ms in [1u64, 2, 3, 4, 100] {
            h.record(Duration::from_millis(ms));
        }
        let s = h.snapshot();
        assert_eq!(s.count, 5);
        assert_eq!(s.sum_ms, 110);
        assert_eq!(s.min_ms, 1);
        assert_eq!(s.max_ms, 100);
        assert_eq!(s.mean_ms, 22);
        // 3번째 값(3ms)은 [2, 3] 버킷
        assert_eq!(s.p50_ms, 3);
        assert_eq!(s.p99_ms, 100);
    }

    #[test]
    fn test_counter_dec_saturates() {
        let counters = PoolCounters::default();
        PoolCounters::dec(&counters.acquiring);
        PoolCounters::inc(&counters.acquiring);
        PoolCounters::inc(&counters.created);
        let m = counters.snapshot("a:7687".into(), 1, 0);
        assert_eq!(m.acquiring, 1);
        assert_eq!(m.created, 1);
        assert_eq!(m.in_use, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = DriverMetrics {
            pools: vec![PoolCounters::default().snapshot("a:7687".into(), 0, 2)],
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["pools"][0]["address"], "a:7687");
        assert_eq!(json["pools"][0]["idle"], 2);
        assert_eq!(json["pools"][0]["acquisition_time"]["count"], 0);
        assert!(metrics.pool("a:7687").is_some());
        assert!(metrics.pool("b:7687").is_none());
    }
}
