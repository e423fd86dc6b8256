//! 链客户端抽象层
//!
//! 引擎只通过 `ChainClient` 读取链上状态和提交交易，链本身被视为不透明、
//! 可能不可靠的 RPC 协作方

pub mod abi;
pub mod alloy_client;
pub mod mock;

pub use alloy_client::AlloyChainClient;
pub use mock::MockChainClient;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 链客户端错误类型
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// 节点返回的 JSON-RPC 错误
    #[error("{message} (code {code})")]
    Rpc { code: i64, message: String },

    /// 连接或传输层失败
    #[error("{0}")]
    Transport(String),

    /// 交易上链但执行失败
    #[error("execution reverted: {reason}")]
    Reverted { tx_hash: Option<B256>, reason: String },

    /// 等待回执超时
    #[error("transaction confirmation timeout: {0}")]
    Timeout(String),

    /// 签名方拒绝
    #[error("user rejected the request: {0}")]
    Rejected(String),

    /// 调用数据编码/解码失败
    #[error("invalid call data: {0}")]
    Encoding(String),

    #[error("{0}")]
    Other(String),
}

/// 视图函数调用（人类可读签名 + 字符串参数）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewCall {
    /// 函数签名，例如 `balanceOf(address)`
    pub function: String,
    /// 参数，按 ABI 类型解析
    #[serde(default)]
    pub args: Vec<String>,
}

impl ViewCall {
    pub fn new(function: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }
}

/// 待提交的交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    /// 函数签名，例如 `approve(address,uint256)`
    pub function: String,
    pub args: Vec<String>,
    pub value: Option<U256>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
}

impl TxRequest {
    /// 从签名中截取函数名
    pub fn function_name(&self) -> &str {
        abi::function_name(&self.function)
    }
}

/// 交易回执（引擎关心的字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u64,
}

/// 链客户端接口
///
/// 实现方需保证并发安全；引擎不做任何限流
#[async_trait]
pub trait ChainClient: Send + Sync {
    // ==================== 读操作 ====================

    /// ERC20 `balanceOf`
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    /// ERC20 `allowance`
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError>;

    /// 任意视图函数，返回第一个返回字（uint256）
    async fn read_view(&self, target: Address, call: &ViewCall) -> Result<U256, ChainError>;

    /// 原生代币余额
    async fn native_balance(&self, account: Address) -> Result<U256, ChainError>;

    /// 当前 gas 价格（wei）
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// 估算 gas
    async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, ChainError>;

    /// 账户的 pending nonce
    async fn pending_nonce(&self, account: Address) -> Result<u64, ChainError>;

    // ==================== 写操作 ====================

    /// 提交交易，返回交易哈希
    async fn send_transaction(&self, tx: &TxRequest) -> Result<B256, ChainError>;

    /// 等待回执（不设上限，由调用方负责超时）
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, ChainError>;
}
