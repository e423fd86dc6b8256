//! 错误恢复数据结构

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::EngineError;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Gas,
    Contract,
    Timeout,
    User,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::Network,
        ErrorCategory::Gas,
        ErrorCategory::Contract,
        ErrorCategory::Timeout,
        ErrorCategory::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Gas => "gas",
            ErrorCategory::Contract => "contract",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::User => "user",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 错误发生时的上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation_id: Option<String>,
    /// 步骤序号或调用方的重试轮次
    pub step_index: Option<usize>,
    pub account: Option<Address>,
    pub function_name: Option<String>,
    pub tx_hash: Option<B256>,
    pub gas_price: Option<u128>,
    pub gas_limit: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            operation_id: None,
            step_index: None,
            account: None,
            function_name: None,
            tx_hash: None,
            gas_price: None,
            gas_limit: None,
            timestamp: Utc::now(),
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_account(mut self, account: Address) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_step(mut self, index: usize, function_name: impl Into<String>) -> Self {
        self.step_index = Some(index);
        self.function_name = Some(function_name.into());
        self
    }

    /// 从引擎错误中提取上下文（步骤失败时带上步骤信息）
    pub fn from_engine_error(error: &EngineError, account: Option<Address>) -> Self {
        let mut ctx = Self {
            account,
            ..Self::default()
        };
        if let Some(failure) = error.step_failure() {
            ctx.operation_id = Some(failure.operation_id.clone());
            ctx.step_index = Some(failure.step_index);
            ctx.function_name = Some(failure.function.clone());
        }
        ctx
    }
}

/// 恢复动作的描述（不含行为）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryActionInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub auto_execute: bool,
    pub priority: u32,
}

/// 一次错误分析的结果（不持久化）
#[derive(Debug, Clone, Serialize)]
pub struct ErrorAnalysis {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub root_cause: String,
    /// 面向用户的说明
    pub user_message: String,
    /// 原始错误文本
    pub technical_details: String,
    /// 按优先级排序
    pub recovery_actions: Vec<RecoveryActionInfo>,
    pub prevention_tips: Vec<String>,
    /// 可重试时，下一次尝试前的建议等待
    pub suggested_delay: Option<Duration>,
}

/// 错误历史记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub operation_id: Option<String>,
}

/// 错误统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStatistics {
    pub total: usize,
    pub by_category: HashMap<ErrorCategory, usize>,
    pub by_severity: HashMap<Severity, usize>,
    pub retryable: usize,
    /// 最近的记录（新的在前）
    pub recent: Vec<ErrorRecord>,
}
