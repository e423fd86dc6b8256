//! 操作构建器
//!
//! 将高层参数（兑换、批量、条件、定时锁）转换为完整的 `AtomicOperation`。
//! 所有校验都在创建对象之前完成，不会产生半成品

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::abi;
use crate::error::EngineError;
use crate::schema::{
    AtomicOperation, ConditionCheck, OperationKind, OperationMetadata, OperationRequirement,
    OperationStatus, RiskLevel, SafeguardConfig, TransactionStep,
};

/// 默认滑点容忍度（0.5%）
pub const DEFAULT_SLIPPAGE_BPS: u32 = 50;
/// 未指定截止时间时，兑换调用的链上 deadline 参数
pub const DEFAULT_SWAP_WINDOW_SECS: i64 = 20 * 60;

const BPS_DENOMINATOR: u32 = 10_000;

pub const APPROVE_SIGNATURE: &str = "approve(address,uint256)";
pub const SWAP_SIGNATURE: &str =
    "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)";

/// 创建操作的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationParams {
    Swap(SwapParams),
    Batch(BatchParams),
    /// 每个步骤都必须带前置条件
    Conditional(BatchParams),
    Timelocked(TimelockParams),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapParams {
    pub account: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub router: Address,
    pub amount_in: U256,
    pub expected_amount_out: U256,
    #[serde(default)]
    pub slippage_bps: Option<u32>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: Option<String>,
}

/// 调用方提供的步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepParams {
    #[serde(default)]
    pub id: Option<String>,
    pub target: Address,
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub value: Option<U256>,
    #[serde(default)]
    pub gas_limit: Option<u64>,
    #[serde(default)]
    pub precondition: Option<ConditionCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchParams {
    pub account: Address,
    pub steps: Vec<StepParams>,
    #[serde(default)]
    pub requirements: Vec<OperationRequirement>,
    #[serde(default)]
    pub safeguards: SafeguardConfig,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelockParams {
    #[serde(flatten)]
    pub batch: BatchParams,
    pub unlock_at: DateTime<Utc>,
}

/// 生成操作 id：`op_<毫秒时间戳>_<8 位十六进制>`
pub fn generate_operation_id(now: DateTime<Utc>) -> String {
    format!("op_{}_{:08x}", now.timestamp_millis(), rand::random::<u32>())
}

pub struct OperationBuilder;

impl OperationBuilder {
    pub fn build(params: OperationParams, now: DateTime<Utc>) -> Result<AtomicOperation, EngineError> {
        match params {
            OperationParams::Swap(p) => Self::build_swap(p, now),
            OperationParams::Batch(p) => Self::build_batch(OperationKind::Batch, p, None, now),
            OperationParams::Conditional(p) => {
                if let Some(i) = p.steps.iter().position(|s| s.precondition.is_none()) {
                    return Err(EngineError::InvalidParams(format!(
                        "条件操作的步骤 {} 缺少前置条件",
                        i
                    )));
                }
                Self::build_batch(OperationKind::Conditional, p, None, now)
            }
            OperationParams::Timelocked(p) => {
                Self::build_batch(OperationKind::Timelocked, p.batch, Some(p.unlock_at), now)
            }
        }
    }

    // ==================== 兑换 ====================

    fn build_swap(p: SwapParams, now: DateTime<Utc>) -> Result<AtomicOperation, EngineError> {
        require_address("account", p.account)?;
        require_address("token_in", p.token_in)?;
        require_address("token_out", p.token_out)?;
        require_address("router", p.router)?;
        if p.token_in == p.token_out {
            return Err(EngineError::InvalidParams(
                "token_in 与 token_out 不能相同".to_string(),
            ));
        }
        if p.amount_in.is_zero() {
            return Err(EngineError::InvalidParams("amount_in 必须大于 0".to_string()));
        }
        if p.expected_amount_out.is_zero() {
            return Err(EngineError::InvalidParams(
                "expected_amount_out 必须大于 0".to_string(),
            ));
        }
        let slippage_bps = p.slippage_bps.unwrap_or(DEFAULT_SLIPPAGE_BPS);
        if slippage_bps >= BPS_DENOMINATOR {
            return Err(EngineError::InvalidParams(format!(
                "滑点容忍度 {} bps 超出范围",
                slippage_bps
            )));
        }
        if let Some(deadline) = p.deadline {
            if deadline <= now {
                return Err(EngineError::InvalidParams("截止时间已过".to_string()));
            }
        }

        let min_out = min_amount_out(p.expected_amount_out, slippage_bps);
        let swap_deadline = p
            .deadline
            .unwrap_or(now + ChronoDuration::seconds(DEFAULT_SWAP_WINDOW_SECS));
        let router = p.router.to_string();

        let id = generate_operation_id(now);
        let steps = vec![
            TransactionStep::new(
                step_id(&id, 0),
                p.token_in,
                APPROVE_SIGNATURE,
                vec![router.clone(), p.amount_in.to_string()],
            ),
            TransactionStep::new(
                step_id(&id, 1),
                p.token_out,
                APPROVE_SIGNATURE,
                vec![router.clone(), min_out.to_string()],
            ),
            TransactionStep::new(
                step_id(&id, 2),
                p.router,
                SWAP_SIGNATURE,
                vec![
                    p.amount_in.to_string(),
                    min_out.to_string(),
                    format!("[{},{}]", p.token_in, p.token_out),
                    p.account.to_string(),
                    swap_deadline.timestamp().to_string(),
                ],
            ),
        ];
        validate_steps(&steps)?;

        let requirements = vec![
            OperationRequirement::balance(p.token_in, p.account, p.amount_in)
                .with_description(format!("{} 余额", p.token_in)),
            OperationRequirement::balance(p.token_out, p.account, U256::ZERO)
                .with_description(format!("{} 余额", p.token_out)),
            OperationRequirement::allowance(p.token_in, p.account, p.router, U256::ZERO)
                .with_description(format!("{} 授权额度", p.token_in)),
            OperationRequirement::allowance(p.token_out, p.account, p.router, U256::ZERO)
                .with_description(format!("{} 授权额度", p.token_out)),
        ];

        let safeguards = SafeguardConfig {
            deadline: p.deadline,
            slippage_tolerance_bps: Some(slippage_bps),
            ..SafeguardConfig::default()
        };

        Ok(AtomicOperation {
            id,
            kind: OperationKind::Swap,
            account: p.account,
            steps,
            requirements,
            safeguards,
            metadata: OperationMetadata {
                title: p
                    .title
                    .unwrap_or_else(|| format!("Swap {} -> {}", p.token_in, p.token_out)),
                description: Some(format!(
                    "兑换 {} (最少获得 {}, 滑点 {} bps)",
                    p.amount_in, min_out, slippage_bps
                )),
                risk_level: RiskLevel::Medium,
                tags: vec!["swap".to_string()],
                estimated_gas: None,
                estimated_cost: None,
            },
            status: OperationStatus::Pending,
            created_at: now,
            executed_at: None,
            completed_at: None,
            unlock_at: None,
        })
    }

    // ==================== 批量 ====================

    fn build_batch(
        kind: OperationKind,
        p: BatchParams,
        unlock_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<AtomicOperation, EngineError> {
        require_address("account", p.account)?;
        if p.steps.is_empty() {
            return Err(EngineError::InvalidParams("操作至少需要一个步骤".to_string()));
        }
        if let Some(deadline) = p.safeguards.deadline {
            if deadline <= now {
                return Err(EngineError::InvalidParams("截止时间已过".to_string()));
            }
        }

        let id = generate_operation_id(now);
        let steps = p
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                require_address("step target", s.target)?;
                let mut step = TransactionStep::new(
                    s.id.unwrap_or_else(|| step_id(&id, i)),
                    s.target,
                    s.function,
                    s.args,
                );
                step.value = s.value;
                step.gas_limit = s.gas_limit;
                step.precondition = s.precondition;
                Ok(step)
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        validate_steps(&steps)?;

        let title = p
            .title
            .unwrap_or_else(|| format!("{} ({} 步)", kind.as_str(), steps.len()));
        let mut tags = p.tags;
        if !tags.iter().any(|t| t == kind.as_str()) {
            tags.push(kind.as_str().to_string());
        }

        Ok(AtomicOperation {
            id,
            kind,
            account: p.account,
            steps,
            requirements: p.requirements,
            safeguards: p.safeguards,
            metadata: OperationMetadata {
                title,
                description: p.description,
                risk_level: p.risk_level,
                tags,
                estimated_gas: None,
                estimated_cost: None,
            },
            status: OperationStatus::Pending,
            created_at: now,
            executed_at: None,
            completed_at: None,
            unlock_at,
        })
    }
}

/// min_out = expected * (10000 - bps) / 10000
///
/// 乘法溢出时先除后乘，只损失最低几位精度
pub fn min_amount_out(expected: U256, slippage_bps: u32) -> U256 {
    let keep = U256::from(BPS_DENOMINATOR - slippage_bps.min(BPS_DENOMINATOR));
    let denominator = U256::from(BPS_DENOMINATOR);
    match expected.checked_mul(keep) {
        Some(product) => product / denominator,
        None => expected / denominator * keep,
    }
}

fn step_id(operation_id: &str, index: usize) -> String {
    format!("{}_step_{}", operation_id, index)
}

fn require_address(field: &str, address: Address) -> Result<(), EngineError> {
    if address == Address::ZERO {
        return Err(EngineError::InvalidParams(format!("{} 不能是零地址", field)));
    }
    Ok(())
}

/// 编码一次调用数据，确保无法编码的步骤不会进入存储
fn validate_steps(steps: &[TransactionStep]) -> Result<(), EngineError> {
    for (i, step) in steps.iter().enumerate() {
        abi::encode_call(&step.function, &step.args)
            .map_err(|e| EngineError::InvalidParams(format!("步骤 {}: {}", i, e)))?;
        if let Some(check) = &step.precondition {
            abi::encode_call(&check.call.function, &check.call.args)
                .map_err(|e| EngineError::InvalidParams(format!("步骤 {} 前置条件: {}", i, e)))?;
        }
    }
    Ok(())
}
