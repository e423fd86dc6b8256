//! 恢复动作注册表
//!
//! 每个动作包含适用性判断和一个只返回成功/失败的效果。
//! 效果不会重试失败的步骤，只通过 `GasTuning` 等共享状态影响下一次执行

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::config::RecoveryConfig;
use crate::recovery::classifier::contains_any;
use crate::recovery::types::{ErrorContext, RecoveryActionInfo, Severity};
use crate::tuning::GasTuning;

/// 恢复动作运行环境
#[derive(Clone)]
pub struct RecoveryEnv {
    pub chain: Arc<dyn ChainClient>,
    pub tuning: Arc<GasTuning>,
    pub config: RecoveryConfig,
}

#[async_trait]
pub trait RecoveryEffect: Send + Sync {
    async fn run(&self, env: &RecoveryEnv, ctx: &ErrorContext) -> bool;
}

/// 适用性判断，输入为上下文和小写后的错误文本
pub type ApplicabilityPredicate = Box<dyn Fn(&ErrorContext, &str) -> bool + Send + Sync>;

pub struct RecoveryAction {
    pub info: RecoveryActionInfo,
    applies: ApplicabilityPredicate,
    effect: Arc<dyn RecoveryEffect>,
}

impl RecoveryAction {
    pub fn new(
        info: RecoveryActionInfo,
        applies: impl Fn(&ErrorContext, &str) -> bool + Send + Sync + 'static,
        effect: Arc<dyn RecoveryEffect>,
    ) -> Self {
        Self {
            info,
            applies: Box::new(applies),
            effect,
        }
    }

    pub fn applies_to(&self, ctx: &ErrorContext, lower_message: &str) -> bool {
        (self.applies)(ctx, lower_message)
    }

    pub fn effect(&self) -> Arc<dyn RecoveryEffect> {
        Arc::clone(&self.effect)
    }
}

// ==================== 内置效果 ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinEffect {
    CheckConnection,
    IncreaseGasPrice,
    IncreaseGasLimit,
    WaitForCongestion,
    CheckNonce,
    CheckBalance,
}

#[async_trait]
impl RecoveryEffect for BuiltinEffect {
    async fn run(&self, env: &RecoveryEnv, ctx: &ErrorContext) -> bool {
        match self {
            BuiltinEffect::CheckConnection => match env.chain.gas_price().await {
                Ok(_) => {
                    info!("🔌 链连接正常");
                    true
                }
                Err(e) => {
                    warn!("🔌 链连接检查失败: {}", e);
                    false
                }
            },
            BuiltinEffect::IncreaseGasPrice => {
                match env
                    .tuning
                    .bump_gas_price(env.config.gas_price_bump_percent, env.config.max_bump_percent) {
                    Some(percent) => {
                        info!("⛽ gas price 倍率提高到 {}%", percent);
                        true
                    }
                    None => {
                        warn!("⛽ gas price 倍率已达上限");
                        false
                    }
                }
            }
            BuiltinEffect::IncreaseGasLimit => {
                match env
                    .tuning
                    .bump_gas_limit(env.config.gas_limit_bump_percent, env.config.max_bump_percent) {
                    Some(percent) => {
                        info!("⛽ gas limit 倍率提高到 {}%", percent);
                        true
                    }
                    None => {
                        warn!("⛽ gas limit 倍率已达上限");
                        false
                    }
                }
            }
            BuiltinEffect::WaitForCongestion => {
                debug!("⏳ 等待网络拥堵缓解 {:?}", env.config.congestion_wait);
                tokio::time::sleep(env.config.congestion_wait).await;
                true
            }
            BuiltinEffect::CheckNonce => {
                let Some(account) = ctx.account else {
                    warn!("缺少账户，无法重新读取 nonce");
                    return false;
                };
                match env.chain.pending_nonce(account).await {
                    Ok(nonce) => {
                        info!("🔢 {} 的 pending nonce: {}", account, nonce);
                        true
                    }
                    Err(e) => {
                        warn!("🔢 读取 nonce 失败: {}", e);
                        false
                    }
                }
            }
            BuiltinEffect::CheckBalance => {
                let Some(account) = ctx.account else {
                    warn!("缺少账户，无法检查余额");
                    return false;
                };
                match env.chain.native_balance(account).await {
                    Ok(balance) => {
                        info!("💰 {} 余额: {}", account, balance);
                        !balance.is_zero()
                    }
                    Err(e) => {
                        warn!("💰 读取余额失败: {}", e);
                        false
                    }
                }
            }
        }
    }
}

fn action_info(
    id: &str,
    name: &str,
    description: &str,
    severity: Severity,
    auto_execute: bool,
    priority: u32,
) -> RecoveryActionInfo {
    RecoveryActionInfo {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        severity,
        auto_execute,
        priority,
    }
}

fn keyword_action(
    info: RecoveryActionInfo,
    keywords: &'static [&'static str],
    effect: BuiltinEffect,
) -> RecoveryAction {
    RecoveryAction::new(
        info,
        move |_ctx, msg| contains_any(msg, keywords),
        Arc::new(effect),
    )
}

/// 内置恢复动作
pub fn builtin_actions() -> Vec<RecoveryAction> {
    vec![
        keyword_action(
            action_info("check_connection", "检查网络连接", "重新探测 RPC 节点是否可用", Severity::Medium, true, 1),
            &["network", "connection", "disconnected", "econnrefused", "econnreset", "socket hang up", "fetch failed"],
            BuiltinEffect::CheckConnection,
        ),
        keyword_action(
            action_info("increase_gas_price", "提高 Gas 价格", "提高下一次提交的 gas price 倍率", Severity::Medium, true, 1),
            &["underpriced", "gas price too low", "fee too low"],
            BuiltinEffect::IncreaseGasPrice,
        ),
        keyword_action(
            action_info("increase_gas_limit", "提高 Gas 上限", "提高下一次提交的 gas limit 倍率", Severity::High, true, 2),
            &["out of gas", "gas required exceeds", "intrinsic gas too low"],
            BuiltinEffect::IncreaseGasLimit,
        ),
        keyword_action(
            action_info("wait_for_congestion", "等待拥堵缓解", "等待一段时间后再重试", Severity::Low, true, 2),
            &["congestion", "rate limit", "too many requests", "timeout"],
            BuiltinEffect::WaitForCongestion,
        ),
        keyword_action(
            action_info("check_nonce", "检查 Nonce", "读取账户的 pending nonce 并记录日志", Severity::High, false, 3),
            &["nonce"],
            BuiltinEffect::CheckNonce,
        ),
        keyword_action(
            action_info("check_balance", "检查余额", "确认账户原生代币余额大于 0", Severity::Critical, false, 4),
            &["insufficient funds", "insufficient balance"],
            BuiltinEffect::CheckBalance,
        ),
    ]
}

pub struct RecoveryActionRegistry {
    actions: Vec<RecoveryAction>,
}

impl Default for RecoveryActionRegistry {
    fn default() -> Self {
        Self {
            actions: builtin_actions(),
        }
    }
}

impl RecoveryActionRegistry {
    /// 同 id 的动作会被替换
    pub fn register(&mut self, action: RecoveryAction) {
        self.actions.retain(|a| a.info.id != action.info.id);
        self.actions.push(action);
    }

    pub fn get(&self, id: &str) -> Option<&RecoveryAction> {
        self.actions.iter().find(|a| a.info.id == id)
    }

    /// 适用的动作，按优先级升序（同优先级保持注册顺序）
    pub fn applicable(&self, ctx: &ErrorContext, message: &str) -> Vec<&RecoveryAction> {
        let lower = message.to_lowercase();
        let mut matched: Vec<&RecoveryAction> = self
            .actions
            .iter()
            .filter(|a| a.applies_to(ctx, &lower))
            .collect();
        matched.sort_by_key(|a| a.info.priority);
        matched
    }
}
