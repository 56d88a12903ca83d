//! 指数退避
//! 轮询判题结果与进度写入冲突重试共用的退避策略

use std::time::Duration;

use rand::Rng;

/// 两次请求之间的最小间隔
pub const MIN_DELAY: Duration = Duration::from_millis(10);

/// 带抖动和截止时间的指数退避策略
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,  // 默认 250ms
    pub max_delay: Duration,      // 默认 2s
    pub backoff_factor: f64,      // 默认 2.0
    pub jitter_percent: f64,      // 0.1 表示 ±10%
    pub deadline: Duration,       // 总预算，超过后不再重试
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            deadline: Duration::from_secs(20),
        }
    }
}

impl BackoffPolicy {
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter_percent: f64,
        deadline: Duration,
    ) -> Self {
        let initial_delay = initial_delay.max(MIN_DELAY);
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            backoff_factor: backoff_factor.max(1.0),
            jitter_percent: jitter_percent.clamp(0.0, 1.0),
            deadline,
        }
    }

    /// 写入冲突重试：短间隔，快速放弃
    pub fn conflict_retry() -> Self {
        Self {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
            jitter_percent: 0.2,
            deadline: Duration::from_secs(5),
        }
    }

    pub fn with_deadline(&self, deadline: Duration) -> Self {
        Self {
            deadline,
            ..self.clone()
        }
    }

    /// 第 attempt 次（从 0 开始）的基础延迟，不含抖动
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        // 指数上限，避免 powi 溢出
        let exp = attempt.min(31) as i32;
        let base_ms = (initial_ms * self.backoff_factor.powi(exp)).min(max_ms);

        Duration::from_millis(base_ms as u64)
    }

    /// 按给定抖动样本（-1.0..=1.0）计算下一次延迟
    ///
    /// 已超过截止时间返回 `None`；否则延迟不会超过剩余预算。
    pub fn next_delay_with(&self, attempt: u32, elapsed: Duration, jitter_sample: f64) -> Option<Duration> {
        let remaining = self.deadline.checked_sub(elapsed)?;
        if remaining.is_zero() {
            return None;
        }

        let base_ms = self.base_delay(attempt).as_millis() as f64;
        let jitter_ms = base_ms * self.jitter_percent * jitter_sample.clamp(-1.0, 1.0);
        let delay = Duration::from_millis((base_ms + jitter_ms).max(0.0) as u64);

        Some(delay.max(MIN_DELAY).min(remaining))
    }

    /// 下一次延迟，抖动随机取样
    pub fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        let sample = if self.jitter_percent > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.next_delay_with(attempt, elapsed, sample)
    }

    /// 不受截止时间约束的重试延迟
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Self {
            deadline: Duration::MAX,
            ..self.clone()
        }
        .next_delay(attempt, Duration::ZERO)
        .unwrap_or(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            0.25,
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let p = policy();
        assert_eq!(p.base_delay(0), Duration::from_millis(100));
        assert_eq!(p.base_delay(1), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(800));
        assert_eq!(p.base_delay(4), Duration::from_secs(1));
        assert_eq!(p.base_delay(1000), Duration::from_secs(1));
    }

    #[test]
    fn test_next_delay_respects_deadline() {
        let p = policy();
        assert_eq!(p.next_delay_with(0, Duration::from_secs(10), 0.0), None);
        assert_eq!(p.next_delay_with(0, Duration::from_secs(11), 0.0), None);

        // 剩余 50ms 时延迟被截断
        let clamped = p.next_delay_with(5, Duration::from_millis(9_950), 0.0);
        assert_eq!(clamped, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy();
        assert_eq!(
            p.next_delay_with(1, Duration::ZERO, 1.0),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            p.next_delay_with(1, Duration::ZERO, -1.0),
            Some(Duration::from_millis(150))
        );

        for attempt in 0..8 {
            let d = p.next_delay(attempt, Duration::ZERO).unwrap();
            let base = p.base_delay(attempt);
            assert!(d >= base.mul_f64(0.75) - Duration::from_millis(1));
            assert!(d <= base.mul_f64(1.25) + Duration::from_millis(1));
        }
    }

    #[test]
    fn test_new_clamps_parameters() {
        let p = BackoffPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            0.5,
            3.0,
            Duration::from_secs(1),
        );
        assert_eq!(p.backoff_factor, 1.0);
        assert_eq!(p.jitter_percent, 1.0);
    }

    #[test]
    fn test_zero_initial_delay_is_floored() {
        let p = BackoffPolicy::new(
            Duration::ZERO,
            Duration::ZERO,
            2.0,
            1.0,
            Duration::from_secs(1),
        );
        assert_eq!(p.initial_delay, MIN_DELAY);
        assert_eq!(p.max_delay, MIN_DELAY);
        for attempt in 0..5 {
            assert!(p.base_delay(attempt) >= MIN_DELAY);
            // 满抖动向下取样也不会变成 0
            assert_eq!(p.next_delay_with(attempt, Duration::ZERO, -1.0), Some(MIN_DELAY));
        }
        // 剩余预算不足最小间隔时仍以预算为准
        assert_eq!(
            p.next_delay_with(0, Duration::from_millis(996), 0.0),
            Some(Duration::from_millis(4))
        );
    }

    #[test]
    fn test_delay_for_attempt_ignores_deadline() {
        let p = BackoffPolicy::conflict_retry();
        let d = p.delay_for_attempt(10);
        assert!(d <= Duration::from_millis(240));
    }
}
