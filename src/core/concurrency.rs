//! 并发闸门：每个编排器一个，容量 N
//!
//! 叶子调用（模型 / 工具 / 远程）执行前 acquire，许可随 GatePermit 析构归还。
//! 等待受调用方超时（Saturated）与取消令牌（Cancelled）约束。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::OxyError;

#[derive(Debug, Default)]
struct GateStats {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// 准入闸门
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<GateStats>,
}

/// 闸门许可；drop 即 release
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<GateStats>,
}

impl GatePermit {
    pub fn release(self) {}
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            stats: Arc::new(GateStats::default()),
        }
    }

    /// 等待一个空位；timeout 为 None 时无限等待
    pub async fn acquire(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<GatePermit, OxyError> {
        let start = Instant::now();
        let waited = || start.elapsed().as_millis() as u64;
        let acquire = self.semaphore.clone().acquire_owned();

        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(OxyError::Cancelled),
            res = async {
                match timeout {
                    Some(t) => tokio::time::timeout(t, acquire).await.ok(),
                    None => Some(acquire.await),
                }
            } => match res {
                Some(Ok(p)) => p,
                // 超时或信号量已关闭
                _ => return Err(OxyError::Saturated { waited_ms: waited() }),
            },
        };

        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);
        if waited() > 0 {
            tracing::debug!(waited_ms = waited(), in_flight = now, "gate acquired after wait");
        }
        Ok(GatePermit {
            _permit: permit,
            stats: self.stats.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::SeqCst)
    }

    /// 自创建以来同时持有许可的最大数量
    pub fn peak(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(10)
    }
}
