//! 错误分类与恢复
//!
//! 由调用方显式使用：分析错误 -> 执行恢复动作 -> 决定是否重试。
//! 引擎本身从不重试

pub mod actions;
pub mod classifier;
pub mod retry;
pub mod types;

pub use actions::{
    builtin_actions, BuiltinEffect, RecoveryAction, RecoveryActionRegistry, RecoveryEffect,
    RecoveryEnv,
};
pub use classifier::{severity_of, ClassifierRule, ErrorClassifier};
pub use retry::{RetryPolicy, RetryPolicyEngine};
pub use types::{
    ErrorAnalysis, ErrorCategory, ErrorContext, ErrorRecord, ErrorStatistics, RecoveryActionInfo,
    Severity,
};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::metrics;

/// 每次尝试恢复动作前的回调：(动作, 第几个动作，从 1 开始)
pub type AttemptCallback<'a> = &'a (dyn Fn(&RecoveryActionInfo, usize) + Send + Sync);

pub struct ErrorRecovery {
    env: RecoveryEnv,
    classifier: RwLock<ErrorClassifier>,
    policies: RwLock<RetryPolicyEngine>,
    actions: RwLock<RecoveryActionRegistry>,
    history: Mutex<VecDeque<ErrorRecord>>,
    history_limit: usize,
}

impl ErrorRecovery {
    pub fn new(env: RecoveryEnv) -> Self {
        let history_limit = env.config.history_limit;
        Self {
            env,
            classifier: RwLock::new(ErrorClassifier::default()),
            policies: RwLock::new(RetryPolicyEngine::default()),
            actions: RwLock::new(RecoveryActionRegistry::default()),
            history: Mutex::new(VecDeque::with_capacity(history_limit)),
            history_limit,
        }
    }

    pub fn tuning(&self) -> Arc<crate::tuning::GasTuning> {
        Arc::clone(&self.env.tuning)
    }

    // ==================== 扩展点 ====================

    pub fn prepend_classifier_rule(&self, rule: ClassifierRule) {
        self.classifier.write().prepend_rule(rule);
    }

    pub fn set_retry_policy(&self, category: ErrorCategory, policy: RetryPolicy) {
        self.policies.write().set_policy(category, policy);
    }

    pub fn register_action(&self, action: RecoveryAction) {
        self.actions.write().register(action);
    }

    // ==================== 分析 ====================

    pub fn classify(&self, message: &str) -> ErrorCategory {
        self.classifier.read().classify(message)
    }

    /// 分析错误并记录到历史
    pub fn analyze_error<E: fmt::Display + ?Sized>(
        &self,
        error: &E,
        ctx: &ErrorContext,
    ) -> ErrorAnalysis {
        let message = error.to_string();
        let category = self.classify(&message);
        let severity = severity_of(&message);
        let retryable = self.policies.read().is_retryable(&message, category);
        let suggested_delay = retryable.then(|| self.retry_delay(category, 1));

        let recovery_actions = self
            .actions
            .read()
            .applicable(ctx, &message)
            .into_iter()
            .map(|a| a.info.clone())
            .collect();

        metrics::ERRORS_CLASSIFIED
            .with_label_values(&[category.as_str(), severity.as_str()])
            .inc();
        self.record(ErrorRecord {
            timestamp: Utc::now(),
            category,
            severity,
            message: message.clone(),
            operation_id: ctx.operation_id.clone(),
        });

        info!(
            "🩺 错误分析: category={} severity={} retryable={}",
            category, severity, retryable
        );

        ErrorAnalysis {
            category,
            severity,
            retryable,
            root_cause: root_cause(category, ctx),
            user_message: user_message(category).to_string(),
            technical_details: message,
            recovery_actions,
            prevention_tips: prevention_tips(category),
            suggested_delay,
        }
    }

    // ==================== 恢复 ====================

    /// 按优先级执行适用的自动恢复动作，第一个成功即返回 true
    pub async fn execute_recovery<E: fmt::Display + ?Sized>(
        &self,
        error: &E,
        ctx: &ErrorContext,
        on_attempt: Option<AttemptCallback<'_>>,
    ) -> bool {
        let message = error.to_string();
        // 锁在 await 之前释放
        let candidates: Vec<(RecoveryActionInfo, Arc<dyn RecoveryEffect>)> = self
            .actions
            .read()
            .applicable(ctx, &message)
            .into_iter()
            .filter(|a| a.info.auto_execute)
            .map(|a| (a.info.clone(), a.effect()))
            .collect();

        if candidates.is_empty() {
            info!("没有可自动执行的恢复动作");
            return false;
        }

        for (attempt, (info, effect)) in candidates.into_iter().enumerate() {
            if let Some(callback) = on_attempt {
                callback(&info, attempt + 1);
            }
            if self.run_effect(&info, effect.as_ref(), ctx).await {
                return true;
            }
        }
        false
    }

    /// 显式执行单个动作（包括非自动动作）；动作不存在时返回 None
    pub async fn execute_action(&self, action_id: &str, ctx: &ErrorContext) -> Option<bool> {
        let found = self
            .actions
            .read()
            .get(action_id)
            .map(|a| (a.info.clone(), a.effect()));
        let (info, effect) = found?;
        Some(self.run_effect(&info, effect.as_ref(), ctx).await)
    }

    async fn run_effect(
        &self,
        info: &RecoveryActionInfo,
        effect: &dyn RecoveryEffect,
        ctx: &ErrorContext,
    ) -> bool {
        info!("🛠️  执行恢复动作: {} ({})", info.name, info.id);
        let ok = effect.run(&self.env, ctx).await;
        metrics::RECOVERY_ATTEMPTS
            .with_label_values(&[info.id.as_str(), if ok { "success" } else { "failure" }])
            .inc();
        if !ok {
            warn!("恢复动作 {} 未成功", info.id);
        }
        ok
    }

    // ==================== 重试策略 ====================

    pub fn is_retryable(&self, message: &str, category: ErrorCategory) -> bool {
        self.policies.read().is_retryable(message, category)
    }

    /// `attempt` 为即将进行的重试序号（从 1 开始）
    pub fn should_retry(&self, message: &str, category: ErrorCategory, attempt: u32) -> bool {
        self.policies.read().should_retry(message, category, attempt)
    }

    pub fn retry_delay(&self, category: ErrorCategory, attempt: u32) -> Duration {
        self.policies.read().retry_delay(category, attempt)
    }

    pub fn retry_policy(&self, category: ErrorCategory) -> RetryPolicy {
        self.policies.read().policy(category)
    }

    // ==================== 历史与统计 ====================

    fn record(&self, record: ErrorRecord) {
        let mut history = self.history.lock();
        if self.history_limit == 0 {
            return;
        }
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(record);
    }

    pub fn statistics(&self) -> ErrorStatistics {
        let history = self.history.lock();
        let policies = self.policies.read();
        let mut stats = ErrorStatistics {
            total: history.len(),
            ..ErrorStatistics::default()
        };

        for record in history.iter() {
            *stats.by_category.entry(record.category).or_insert(0) += 1;
            *stats.by_severity.entry(record.severity).or_insert(0) += 1;
            if policies.is_retryable(&record.message, record.category) {
                stats.retryable += 1;
            }
        }
        stats.recent = history.iter().rev().take(10).cloned().collect();
        stats
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

fn user_message(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Network => "网络连接异常，请检查 RPC 节点后重试",
        ErrorCategory::Gas => "Gas 设置不足或价格过低，交易未被接受",
        ErrorCategory::Contract => "合约执行失败，交易被回滚",
        ErrorCategory::Timeout => "交易确认超时，网络可能拥堵",
        ErrorCategory::User => "操作被拒绝或账户余额不足",
    }
}

fn root_cause(category: ErrorCategory, ctx: &ErrorContext) -> String {
    let location = match (&ctx.function_name, ctx.step_index) {
        (Some(function), Some(index)) => format!("步骤 {} ({})", index, function),
        (Some(function), None) => function.clone(),
        (None, Some(index)) => format!("步骤 {}", index),
        (None, None) => "操作".to_string(),
    };
    let cause = match category {
        ErrorCategory::Network => "与节点的通信失败",
        ErrorCategory::Gas => "gas 价格或上限不满足节点/区块要求",
        ErrorCategory::Contract => "合约条件不满足或调用被回滚",
        ErrorCategory::Timeout => "未在期限内获得交易回执",
        ErrorCategory::User => "签名方拒绝或资金不足",
    };
    format!("{}: {}", location, cause)
}

fn prevention_tips(category: ErrorCategory) -> Vec<String> {
    let tips: &[&str] = match category {
        ErrorCategory::Network => &["使用稳定的 RPC 节点", "配置备用节点", "降低并发请求量"],
        ErrorCategory::Gas => &["提交前先模拟估算 gas", "在拥堵时提高 gas price"],
        ErrorCategory::Contract => &["执行前检查前置要求", "确认授权额度与余额充足"],
        ErrorCategory::Timeout => &["设置合理的截止时间", "避开网络高峰期"],
        ErrorCategory::User => &["确认账户余额足以支付 gas", "在钱包中确认交易"],
    };
    tips.iter().map(|t| t.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::config::RecoveryConfig;
    use crate::tuning::GasTuning;

    fn recovery() -> ErrorRecovery {
        ErrorRecovery::new(RecoveryEnv {
            chain: Arc::new(MockChainClient::new()),
            tuning: Arc::new(GasTuning::default()),
            config: RecoveryConfig {
                history_limit: 3,
                ..RecoveryConfig::default()
            },
        })
    }

    #[test]
    fn test_connection_timeout_analysis() {
        let recovery = recovery();
        let analysis = recovery.analyze_error("connection timeout", &ErrorContext::new());
        assert_eq!(analysis.category, ErrorCategory::Network);
        assert!(analysis.retryable);
        assert_eq!(analysis.suggested_delay, Some(Duration::from_millis(2000)));
        assert_eq!(analysis.technical_details, "connection timeout");
        assert!(!analysis.user_message.is_empty());
        assert_eq!(analysis.recovery_actions[0].id, "check_connection");
    }

    #[test]
    fn test_history_is_bounded() {
        let recovery = recovery();
        for msg in ["a network", "b gas", "c revert", "d user rejected"] {
            recovery.analyze_error(msg, &ErrorContext::new());
        }
        let stats = recovery.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.recent[0].message, "d user rejected");
        assert_eq!(stats.by_category.get(&ErrorCategory::Network), None);
    }
}
