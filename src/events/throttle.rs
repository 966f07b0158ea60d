//! 进度事件节流器
//!
//! 控制单个任务进度事件的发布频率；最后一次进度（阶段切换、结束前）使用 `force_emit`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 进度事件节流器
///
/// 时间戳相对于节流器创建时刻，`0` 表示尚未发布过
#[derive(Debug)]
pub struct ProgressThrottler {
    origin: Instant,
    /// 上次发布时间（相对 origin 的纳秒数 + 1）
    last_emit: AtomicU64,
    interval_nanos: u64,
}

impl ProgressThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_emit: AtomicU64::new(0),
            interval_nanos: interval.as_nanos() as u64,
        }
    }

    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos)
    }

    /// 距离上次发布已超过间隔时返回 true 并记录本次时间
    pub fn should_emit(&self) -> bool {
        let now = self.now();
        let last = self.last_emit.load(Ordering::Relaxed);

        if last != 0 && now.saturating_sub(last) < self.interval_nanos {
            return false;
        }
        // 并发调用时只有一个成功
        self.last_emit
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// 不检查间隔，直接记录本次发布
    pub fn force_emit(&self) -> bool {
        self.last_emit.store(self.now(), Ordering::Relaxed);
        true
    }

    pub fn reset(&self) {
        self.last_emit.store(0, Ordering::Relaxed);
    }

    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64 + 1
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::with_millis(DEFAULT_THROTTLE_INTERVAL_MS)
    }
}
