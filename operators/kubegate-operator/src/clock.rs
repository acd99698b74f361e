//! 时钟模块
//!
//! 为状态机提供当前时间（整数 Unix 秒），并计算下一次唤醒的延迟。
//! 状态机本身从不休眠，等待完全交给驱动方按返回的延迟重新调度。

use std::time::Duration;

/// 时钟
pub trait Clock: Send + Sync {
    /// 当前 Unix 秒
    fn now(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// 从 now 到 target 的等待时长，不会为负
pub fn requeue_delay(now: i64, target: i64) -> Duration {
    Duration::from_secs(target.saturating_sub(now).max(0) as u64)
}

/// 可手动拨动的测试时钟
#[cfg(test)]
pub(crate) struct FixedClock(std::sync::atomic::AtomicI64);

#[cfg(test)]
impl FixedClock {
    pub(crate) fn new(now: i64) -> Self {
        Self(std::sync::atomic::AtomicI64::new(now))
    }

    pub(crate) fn set(&self, now: i64) {
        self.0.store(now, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
