//! 交易步骤数据结构

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::chain::{abi, TxRequest, ViewCall};

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparator {
    /// 判断 `actual <op> expected`
    pub fn compare(&self, actual: U256, expected: U256) -> bool {
        match self {
            Comparator::Eq => actual == expected,
            Comparator::Ne => actual != expected,
            Comparator::Gt => actual > expected,
            Comparator::Gte => actual >= expected,
            Comparator::Lt => actual < expected,
            Comparator::Lte => actual <= expected,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
        }
    }
}

/// 步骤前置条件
///
/// 读取 `target` 上视图函数的第一个返回值，与 `expected` 比较
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionCheck {
    pub target: Address,
    pub call: ViewCall,
    pub comparator: Comparator,
    pub expected: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ConditionCheck {
    pub fn describe(&self) -> String {
        match &self.description {
            Some(desc) => desc.clone(),
            None => format!(
                "{}.{} {} {}",
                self.target,
                abi::function_name(&self.call.function),
                self.comparator.symbol(),
                self.expected
            ),
        }
    }
}

/// 步骤执行状态
///
/// 一个步骤不可能同时处于"已执行"和"出错"
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    #[default]
    Pending,
    Executed {
        tx_hash: B256,
        gas_used: u64,
    },
    Failed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx_hash: Option<B256>,
    },
}

/// 交易步骤
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStep {
    pub id: String,
    /// 目标合约
    pub target: Address,
    /// 函数签名，例如 `approve(address,uint256)`
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<ConditionCheck>,
    #[serde(default)]
    pub state: StepState,
}

impl TransactionStep {
    pub fn new(
        id: impl Into<String>,
        target: Address,
        function: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            target,
            function: function.into(),
            args,
            value: None,
            gas_limit: None,
            precondition: None,
            state: StepState::Pending,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_precondition(mut self, check: ConditionCheck) -> Self {
        self.precondition = Some(check);
        self
    }

    pub fn function_name(&self) -> &str {
        abi::function_name(&self.function)
    }

    pub fn is_executed(&self) -> bool {
        matches!(self.state, StepState::Executed { .. })
    }

    pub fn tx_hash(&self) -> Option<B256> {
        match &self.state {
            StepState::Executed { tx_hash, .. } => Some(*tx_hash),
            StepState::Failed { tx_hash, .. } => *tx_hash,
            StepState::Pending => None,
        }
    }

    pub fn gas_used(&self) -> Option<u64> {
        match &self.state {
            StepState::Executed { gas_used, .. } => Some(*gas_used),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            StepState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn mark_executed(&mut self, tx_hash: B256, gas_used: u64) {
        self.state = StepState::Executed { tx_hash, gas_used };
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, tx_hash: Option<B256>) {
        self.state = StepState::Failed {
            error: error.into(),
            tx_hash,
        };
    }

    pub fn reset(&mut self) {
        self.state = StepState::Pending;
    }

    /// 构建提交用的交易请求
    pub fn to_tx_request(&self, from: Address) -> TxRequest {
        TxRequest {
            from,
            to: self.target,
            function: self.function.clone(),
            args: self.args.clone(),
            value: self.value,
            gas_limit: self.gas_limit,
            gas_price: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparator() {
        let a = U256::from(40);
        let b = U256::from(100);
        assert!(Comparator::Lt.compare(a, b));
        assert!(!Comparator::Gte.compare(a, b));
        assert!(Comparator::Gte.compare(b, b));
        assert!(Comparator::Ne.compare(a, b));
        assert!(Comparator::Eq.compare(a, a));
    }

    #[test]
    fn test_step_state_transitions() {
        let mut step = TransactionStep::new(
            "s0",
            Address::ZERO,
            "approve(address,uint256)",
            vec![],
        );
        assert_eq!(step.function_name(), "approve");
        assert!(!step.is_executed());

        step.mark_failed("boom", None);
        assert_eq!(step.error(), Some("boom"));
        assert!(!step.is_executed());

        step.mark_executed(B256::repeat_byte(1), 21_000);
        assert!(step.is_executed());
        assert_eq!(step.error(), None);
        assert_eq!(step.gas_used(), Some(21_000));
    }

    #[test]
    fn test_step_serde() {
        let step = TransactionStep::new("s0", Address::ZERO, "approve(address,uint256)", vec![])
            .with_value(U256::from(5));
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"state\":\"pending\""));
        let back: TransactionStep = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
    }
}
