//! 基于 alloy 的 JSON-RPC 链客户端

use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::chain::{abi, ChainClient, ChainError, TxReceipt, TxRequest, ViewCall};

/// 默认回执轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct AlloyChainClient {
    provider: DynProvider,
    poll_interval: Duration,
}

impl AlloyChainClient {
    /// 连接 RPC 节点并使用私钥签名
    pub async fn connect(rpc_url: &str, private_key: &str) -> Result<Self, ChainError> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| ChainError::Other(format!("无效的私钥: {}", e)))?;
        info!("🔑 签名账户: {}", signer.address());

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect(rpc_url)
            .await
            .map_err(map_transport_error)?
            .erased();

        Ok(Self::from_provider(provider))
    }

    pub fn from_provider(provider: DynProvider) -> Self {
        Self {
            provider,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn call_raw(&self, target: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let request = TransactionRequest::default()
            .with_to(target)
            .with_input(data);
        self.provider
            .call(request)
            .await
            .map_err(map_transport_error)
    }

    async fn read_uint(&self, target: Address, signature: &str, args: &[String]) -> Result<U256, ChainError> {
        let data = abi::encode_call(signature, args)?;
        let output = self.call_raw(target, data).await?;
        abi::decode_uint_word(&output)
    }

    fn build_request(tx: &TxRequest) -> Result<TransactionRequest, ChainError> {
        let data = abi::encode_call(&tx.function, &tx.args)?;
        let mut request = TransactionRequest::default()
            .with_from(tx.from)
            .with_to(tx.to)
            .with_input(data);
        if let Some(value) = tx.value {
            request = request.with_value(value);
        }
        if let Some(gas_limit) = tx.gas_limit {
            request = request.with_gas_limit(gas_limit);
        }
        if let Some(gas_price) = tx.gas_price {
            request = request.with_gas_price(gas_price);
        }
        Ok(request)
    }
}

/// 节点错误保留 JSON-RPC code，其余按传输层错误处理
fn map_transport_error(err: TransportError) -> ChainError {
    if let Some(payload) = err.as_error_resp() {
        let message = payload.message.to_string();
        let lower = message.to_lowercase();
        if lower.contains("user rejected") || lower.contains("user denied") {
            return ChainError::Rejected(message);
        }
        if lower.contains("revert") {
            return ChainError::Reverted {
                tx_hash: None,
                reason: message,
            };
        }
        return ChainError::Rpc {
            code: payload.code,
            message,
        };
    }
    if err.is_transport_error() {
        return ChainError::Transport(err.to_string());
    }
    ChainError::Other(err.to_string())
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.read_uint(token, "balanceOf(address)", &[owner.to_string()])
            .await
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        self.read_uint(
            token,
            "allowance(address,address)",
            &[owner.to_string(), spender.to_string()],
        )
        .await
    }

    async fn read_view(&self, target: Address, call: &ViewCall) -> Result<U256, ChainError> {
        self.read_uint(target, &call.function, &call.args).await
    }

    async fn native_balance(&self, account: Address) -> Result<U256, ChainError> {
        self.provider
            .get_balance(account)
            .await
            .map_err(map_transport_error)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(map_transport_error)
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, ChainError> {
        let request = Self::build_request(tx)?;
        self.provider
            .estimate_gas(request)
            .await
            .map_err(map_transport_error)
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(account)
            .pending()
            .await
            .map_err(map_transport_error)
    }

    async fn send_transaction(&self, tx: &TxRequest) -> Result<B256, ChainError> {
        let request = Self::build_request(tx)?;
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(map_transport_error)?;
        let tx_hash = *pending.tx_hash();
        debug!("📤 {} -> {}: {}", tx.function_name(), tx.to, tx_hash);
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, ChainError> {
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(map_transport_error)?;

            if let Some(receipt) = receipt {
                return Ok(TxReceipt {
                    tx_hash,
                    success: receipt.status(),
                    gas_used: receipt.gas_used(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
