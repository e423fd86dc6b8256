//! 内存模拟链
//!
//! 可编排的 `ChainClient` 实现：余额、授权、视图返回值均可预置，
//! 估算/提交/回执三个阶段都可以按函数名注入失败

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

use crate::chain::{abi, ChainClient, ChainError, TxReceipt, TxRequest, ViewCall};

/// 注入失败的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockPhase {
    Estimate,
    Send,
    Receipt,
}

/// 注入的失败形式
#[derive(Debug, Clone)]
pub enum MockFailure {
    Error(ChainError),
    /// 回执 status = 0（仅 Receipt 阶段）
    Revert,
    /// 回执永不返回（仅 Receipt 阶段）
    Hang,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    phase: MockPhase,
    function: String,
    failure: MockFailure,
    /// None 表示一直生效
    remaining: Option<usize>,
}

/// 已提交的交易
#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub tx_hash: B256,
    pub request: TxRequest,
}

#[derive(Debug, Clone)]
enum PendingReceipt {
    Ready(TxReceipt),
    Failed(ChainError),
    Hang,
}

#[derive(Debug)]
struct MockState {
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    views: HashMap<(Address, String), U256>,
    native: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    gas_price: u128,
    gas_estimate: u64,
    offline: bool,
    receipt_delay: Duration,
    failures: Vec<ScriptedFailure>,
    receipts: HashMap<B256, PendingReceipt>,
    submitted: Vec<SubmittedTx>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            balances: HashMap::new(),
            allowances: HashMap::new(),
            views: HashMap::new(),
            native: HashMap::new(),
            nonces: HashMap::new(),
            gas_price: 1_000_000_000,
            gas_estimate: 50_000,
            offline: false,
            receipt_delay: Duration::ZERO,
            failures: Vec::new(),
            receipts: HashMap::new(),
            submitted: Vec::new(),
        }
    }
}

impl MockState {
    fn take_failure(&mut self, phase: MockPhase, function: &str) -> Option<MockFailure> {
        let slot = self.failures.iter_mut().find(|f| {
            f.phase == phase && f.function == function && f.remaining != Some(0)
        })?;
        if let Some(remaining) = slot.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(slot.failure.clone())
    }

    fn check_online(&self) -> Result<(), ChainError> {
        if self.offline {
            return Err(ChainError::Transport(
                "connection refused: ECONNREFUSED".to_string(),
            ));
        }
        Ok(())
    }

    /// 成功交易对状态的影响（仅授权类函数）
    fn apply_effect(&mut self, tx: &TxRequest) {
        let (spender, amount) = match tx.args.as_slice() {
            [spender, amount] => match (spender.parse::<Address>(), amount.parse::<U256>()) {
                (Ok(s), Ok(a)) => (s, a),
                _ => return,
            },
            _ => return,
        };
        let key = (tx.to, tx.from, spender);
        let current = self.allowances.get(&key).copied().unwrap_or_default();
        let next = match tx.function_name() {
            "approve" => amount,
            "increaseAllowance" => current.saturating_add(amount),
            "decreaseAllowance" => current.saturating_sub(amount),
            _ => return,
        };
        self.allowances.insert(key, next);
    }
}

/// 可编排的内存链
#[derive(Debug, Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== 预置状态 ====================

    pub fn set_balance(&self, token: Address, owner: Address, amount: U256) {
        self.state.lock().balances.insert((token, owner), amount);
    }

    pub fn set_native_balance(&self, account: Address, amount: U256) {
        self.state.lock().native.insert(account, amount);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.state
            .lock()
            .allowances
            .insert((token, owner, spender), amount);
    }

    /// 视图函数按函数名匹配（忽略参数）
    pub fn set_view(&self, target: Address, function_name: &str, value: U256) {
        self.state
            .lock()
            .views
            .insert((target, function_name.to_string()), value);
    }

    pub fn set_gas_price(&self, price: u128) {
        self.state.lock().gas_price = price;
    }

    pub fn set_gas_estimate(&self, gas: u64) {
        self.state.lock().gas_estimate = gas;
    }

    /// 离线时所有调用都返回连接错误
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn set_receipt_delay(&self, delay: Duration) {
        self.state.lock().receipt_delay = delay;
    }

    // ==================== 注入失败 ====================

    pub fn fail_once(&self, phase: MockPhase, function_name: &str, failure: MockFailure) {
        self.fail_times(phase, function_name, failure, Some(1));
    }

    pub fn fail_always(&self, phase: MockPhase, function_name: &str, failure: MockFailure) {
        self.fail_times(phase, function_name, failure, None);
    }

    pub fn fail_times(
        &self,
        phase: MockPhase,
        function_name: &str,
        failure: MockFailure,
        times: Option<usize>,
    ) {
        self.state.lock().failures.push(ScriptedFailure {
            phase,
            function: function_name.to_string(),
            failure,
            remaining: times,
        });
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    // ==================== 观察 ====================

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.state.lock().submitted.clone()
    }

    /// 已提交交易的函数名（按提交顺序）
    pub fn submitted_functions(&self) -> Vec<String> {
        self.state
            .lock()
            .submitted
            .iter()
            .map(|tx| tx.request.function_name().to_string())
            .collect()
    }

    pub fn allowance_of(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.state
            .lock()
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }
}

fn tx_hash_of(nonce: u64, tx: &TxRequest) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(tx.from.as_slice());
    hasher.update(nonce.to_be_bytes());
    hasher.update(tx.to.as_slice());
    hasher.update(tx.function.as_bytes());
    for arg in &tx.args {
        hasher.update(arg.as_bytes());
    }
    B256::from_slice(&hasher.finalize())
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state
            .balances
            .get(&(token, owner))
            .copied()
            .unwrap_or_default())
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn read_view(&self, target: Address, call: &ViewCall) -> Result<U256, ChainError> {
        let state = self.state.lock();
        state.check_online()?;
        let name = abi::function_name(&call.function).to_string();
        state.views.get(&(target, name)).copied().ok_or_else(|| {
            ChainError::Reverted {
                tx_hash: None,
                reason: format!("call to {} on {} failed", call.function, target),
            }
        })
    }

    async fn native_balance(&self, account: Address) -> Result<U256, ChainError> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state.native.get(&account).copied().unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state.gas_price)
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, ChainError> {
        let mut state = self.state.lock();
        state.check_online()?;
        match state.take_failure(MockPhase::Estimate, tx.function_name()) {
            Some(MockFailure::Error(e)) => Err(e),
            Some(_) => Err(ChainError::Reverted {
                tx_hash: None,
                reason: "gas estimation failed".to_string(),
            }),
            None => Ok(tx.gas_limit.unwrap_or(state.gas_estimate)),
        }
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, ChainError> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state.nonces.get(&account).copied().unwrap_or_default())
    }

    async fn send_transaction(&self, tx: &TxRequest) -> Result<B256, ChainError> {
        abi::encode_call(&tx.function, &tx.args)?;

        let mut state = self.state.lock();
        state.check_online()?;
        let function = tx.function_name().to_string();

        if let Some(MockFailure::Error(e)) = state.take_failure(MockPhase::Send, &function) {
            return Err(e);
        }

        let nonce = state.nonces.get(&tx.from).copied().unwrap_or_default();
        state.nonces.insert(tx.from, nonce + 1);
        let tx_hash = tx_hash_of(nonce, tx);
        let gas_used = tx.gas_limit.unwrap_or(state.gas_estimate);

        let pending = match state.take_failure(MockPhase::Receipt, &function) {
            Some(MockFailure::Error(e)) => PendingReceipt::Failed(e),
            Some(MockFailure::Hang) => PendingReceipt::Hang,
            Some(MockFailure::Revert) => PendingReceipt::Ready(TxReceipt {
                tx_hash,
                success: false,
                gas_used,
            }),
            None => {
                state.apply_effect(tx);
                PendingReceipt::Ready(TxReceipt {
                    tx_hash,
                    success: true,
                    gas_used,
                })
            }
        };

        state.receipts.insert(tx_hash, pending);
        state.submitted.push(SubmittedTx {
            tx_hash,
            request: tx.clone(),
        });
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, ChainError> {
        let (delay, pending) = {
            let state = self.state.lock();
            (state.receipt_delay, state.receipts.get(&tx_hash).cloned())
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match pending {
            Some(PendingReceipt::Ready(receipt)) => Ok(receipt),
            Some(PendingReceipt::Failed(e)) => Err(e),
            Some(PendingReceipt::Hang) => std::future::pending().await,
            None => Err(ChainError::Other(format!("unknown transaction {}", tx_hash))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approve(token: Address, from: Address, spender: Address, amount: u64) -> TxRequest {
        TxRequest {
            from,
            to: token,
            function: "approve(address,uint256)".to_string(),
            args: vec![spender.to_string(), amount.to_string()],
            value: None,
            gas_limit: None,
            gas_price: None,
        }
    }

    #[tokio::test]
    async fn test_approve_updates_allowance() {
        let chain = MockChainClient::new();
        let (token, owner, spender) = (
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
        );

        let hash = chain
            .send_transaction(&approve(token, owner, spender, 500))
            .await
            .unwrap();
        let receipt = chain.wait_for_receipt(hash).await.unwrap();
        assert!(receipt.success);
        assert_eq!(
            chain.allowance(token, owner, spender).await.unwrap(),
            U256::from(500)
        );
        assert_eq!(chain.pending_nonce(owner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let chain = MockChainClient::new();
        let tx = approve(Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(3), 1);

        chain.fail_once(
            MockPhase::Send,
            "approve",
            MockFailure::Error(ChainError::Transport("socket hang up".into())),
        );
        assert!(chain.send_transaction(&tx).await.is_err());
        assert!(chain.send_transaction(&tx).await.is_ok());

        chain.fail_always(MockPhase::Receipt, "approve", MockFailure::Revert);
        let hash = chain.send_transaction(&tx).await.unwrap();
        assert!(!chain.wait_for_receipt(hash).await.unwrap().success);
        assert_eq!(chain.submitted_functions(), vec!["approve", "approve"]);
    }

    #[tokio::test]
    async fn test_offline() {
        let chain = MockChainClient::new();
        chain.set_offline(true);
        let err = chain.gas_price().await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
