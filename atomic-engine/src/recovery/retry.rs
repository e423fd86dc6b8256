//! 重试策略
//!
//! 可重试判断顺序：不可重试模式（优先）-> 可重试模式 -> 类别默认值
//! （network / timeout 默认可重试）

use std::collections::HashMap;
use std::time::Duration;

use crate::recovery::classifier::contains_any;
use crate::recovery::types::ErrorCategory;

/// 单个类别的重试策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub exponential: bool,
    pub max_delay: Duration,
    /// 小写子串
    pub non_retryable_patterns: Vec<String>,
    pub retryable_patterns: Vec<String>,
}

impl RetryPolicy {
    fn new(
        max_retries: u32,
        base_ms: u64,
        exponential: bool,
        max_ms: u64,
        non_retryable: &[&str],
        retryable: &[&str],
    ) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
            exponential,
            max_delay: Duration::from_millis(max_ms),
            non_retryable_patterns: non_retryable.iter().map(|s| s.to_string()).collect(),
            retryable_patterns: retryable.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn default_for(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Network => Self::new(
                5,
                2_000,
                true,
                30_000,
                &[],
                &[
                    "timeout",
                    "connection",
                    "network",
                    "econnreset",
                    "rate limit",
                    "502 bad gateway",
                    "503 service unavailable",
                    "status code 502",
                    "status code 503",
                ],
            ),
            ErrorCategory::Gas => Self::new(
                3,
                1_000,
                true,
                10_000,
                &["insufficient funds", "exceeds block gas limit"],
                &["underpriced", "too low", "fee too low", "replacement"],
            ),
            ErrorCategory::Contract => Self::new(
                1,
                1_000,
                false,
                1_000,
                &["execution reverted", "revert", "invalid opcode", "unauthorized", "only owner"],
                &[],
            ),
            ErrorCategory::Timeout => Self::new(
                3,
                5_000,
                true,
                60_000,
                &["deadline exceeded", "expired"],
                &["timeout", "timed out"],
            ),
            ErrorCategory::User => Self::new(
                0,
                0,
                false,
                0,
                &["user rejected", "user denied", "insufficient"],
                &[],
            ),
        }
    }

    /// 第 `attempt` 次重试（从 1 开始）前的等待
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let exponent = attempt.max(1) - 1;
        let factor = 2u128.checked_pow(exponent).unwrap_or(u128::MAX);
        let millis = self.base_delay.as_millis().saturating_mul(factor);
        let capped = millis.min(self.max_delay.as_millis());
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }
}

pub struct RetryPolicyEngine {
    policies: HashMap<ErrorCategory, RetryPolicy>,
}

impl Default for RetryPolicyEngine {
    fn default() -> Self {
        Self {
            policies: ErrorCategory::ALL
                .iter()
                .map(|c| (*c, RetryPolicy::default_for(*c)))
                .collect(),
        }
    }
}

impl RetryPolicyEngine {
    pub fn policy(&self, category: ErrorCategory) -> RetryPolicy {
        self.policies
            .get(&category)
            .cloned()
            .unwrap_or_else(|| RetryPolicy::default_for(category))
    }

    pub fn set_policy(&mut self, category: ErrorCategory, policy: RetryPolicy) {
        self.policies.insert(category, policy);
    }

    pub fn is_retryable(&self, message: &str, category: ErrorCategory) -> bool {
        let policy = self.policy(category);
        let lower = message.to_lowercase();

        let non_retryable: Vec<&str> = policy.non_retryable_patterns.iter().map(String::as_str).collect();
        if contains_any(&lower, &non_retryable) {
            return false;
        }
        let retryable: Vec<&str> = policy.retryable_patterns.iter().map(String::as_str).collect();
        if contains_any(&lower, &retryable) {
            return true;
        }
        matches!(category, ErrorCategory::Network | ErrorCategory::Timeout)
    }

    pub fn retry_delay(&self, category: ErrorCategory, attempt: u32) -> Duration {
        self.policy(category).delay_for(attempt)
    }

    /// 是否应进行第 `attempt` 次重试（从 1 开始）
    pub fn should_retry(&self, message: &str, category: ErrorCategory, attempt: u32) -> bool {
        let policy = self.policy(category);
        policy.max_retries > 0
            && attempt <= policy.max_retries
            && self.is_retryable(message, category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_network_delays() {
        let engine = RetryPolicyEngine::default();
        let delays: Vec<u128> = (1..=5)
            .map(|n| engine.retry_delay(ErrorCategory::Network, n).as_millis())
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000]);
        // 大的 attempt 不溢出
        assert_eq!(
            engine.retry_delay(ErrorCategory::Network, 200).as_millis(),
            30000
        );
    }

    #[test]
    fn test_fixed_delay() {
        let engine = RetryPolicyEngine::default();
        assert_eq!(engine.retry_delay(ErrorCategory::Contract, 1).as_millis(), 1000);
        assert_eq!(engine.retry_delay(ErrorCategory::Contract, 4).as_millis(), 1000);
    }

    #[test]
    fn test_non_retryable_wins() {
        let engine = RetryPolicyEngine::default();
        // "insufficient funds" 出现在 gas 的不可重试列表中，即使也含 "too low"
        assert!(!engine.is_retryable("insufficient funds, fee too low", ErrorCategory::Gas));
        assert!(engine.is_retryable("transaction underpriced", ErrorCategory::Gas));
        assert!(!engine.is_retryable("something about gas", ErrorCategory::Gas));
        assert!(!engine.is_retryable("deadline exceeded, timeout", ErrorCategory::Timeout));
        assert!(engine.is_retryable("weird", ErrorCategory::Timeout));
    }

    #[test]
    fn test_user_never_retryable() {
        let engine = RetryPolicyEngine::default();
        for msg in ["user rejected", "timeout", "network", "x", "rate limit 503"] {
            assert!(!engine.is_retryable(msg, ErrorCategory::User));
            assert!(!engine.should_retry(msg, ErrorCategory::User, 1));
        }
    }

    #[test]
    fn test_should_retry_bounded() {
        let engine = RetryPolicyEngine::default();
        assert!(engine.should_retry("connection reset", ErrorCategory::Network, 5));
        assert!(!engine.should_retry("connection reset", ErrorCategory::Network, 6));
    }
}
