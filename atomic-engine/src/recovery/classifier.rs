//! 错误分类器
//!
//! 按错误文本（不区分大小写的子串匹配）分类。规则按顺序匹配，第一个命中的生效；
//! 都不命中时归为 network

use crate::recovery::types::{ErrorCategory, Severity};

const NETWORK_KEYWORDS: &[&str] = &[
    "network",
    "connection",
    "econnrefused",
    "econnreset",
    "socket hang up",
    "fetch failed",
    "disconnected",
    "dns",
    "status code 502",
    "status code 503",
    "http 502",
    "http 503",
    "bad gateway",
    "service unavailable",
    "too many requests",
    "rate limit",
];

const GAS_KEYWORDS: &[&str] = &["gas", "underpriced", "fee too low", "max fee", "base fee"];

const CONTRACT_KEYWORDS: &[&str] = &[
    "revert",
    "execution reverted",
    "invalid opcode",
    "contract",
    "call exception",
    "condition",
];

const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out", "deadline", "expired"];

const USER_KEYWORDS: &[&str] = &[
    "user rejected",
    "user denied",
    "rejected",
    "denied",
    "cancelled",
    "insufficient funds",
    "insufficient balance",
];

const CRITICAL_KEYWORDS: &[&str] = &[
    "insufficient funds",
    "insufficient balance",
    "unauthorized",
    "not owner",
    "private key",
    "chain id mismatch",
];

const HIGH_KEYWORDS: &[&str] = &[
    "revert",
    "invalid opcode",
    "out of gas",
    "nonce too low",
    "replacement",
];

const MEDIUM_KEYWORDS: &[&str] = &["underpriced", "timeout", "timed out", "congestion", "rate limit"];

const LOW_KEYWORDS: &[&str] = &["user rejected", "user denied", "cancelled"];

/// 规则谓词，输入为小写后的错误文本
pub type ClassifierPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub struct ClassifierRule {
    pub predicate: ClassifierPredicate,
    pub category: ErrorCategory,
}

impl ClassifierRule {
    pub fn new(
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
        category: ErrorCategory,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            category,
        }
    }

    /// 任一关键词命中
    pub fn keywords(keywords: &'static [&'static str], category: ErrorCategory) -> Self {
        Self::new(move |msg| contains_any(msg, keywords), category)
    }
}

pub struct ErrorClassifier {
    rules: Vec<ClassifierRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            rules: vec![
                ClassifierRule::keywords(NETWORK_KEYWORDS, ErrorCategory::Network),
                ClassifierRule::keywords(GAS_KEYWORDS, ErrorCategory::Gas),
                ClassifierRule::keywords(CONTRACT_KEYWORDS, ErrorCategory::Contract),
                ClassifierRule::keywords(TIMEOUT_KEYWORDS, ErrorCategory::Timeout),
                ClassifierRule::keywords(USER_KEYWORDS, ErrorCategory::User),
            ],
        }
    }
}

impl ErrorClassifier {
    /// 在内置规则之前插入规则
    pub fn prepend_rule(&mut self, rule: ClassifierRule) {
        self.rules.insert(0, rule);
    }

    pub fn classify(&self, message: &str) -> ErrorCategory {
        let lower = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| (rule.predicate)(&lower))
            .map(|rule| rule.category)
            .unwrap_or(ErrorCategory::Network)
    }
}

/// 严重程度与类别独立判断
pub fn severity_of(message: &str) -> Severity {
    let lower = message.to_lowercase();
    if contains_any(&lower, CRITICAL_KEYWORDS) {
        Severity::Critical
    } else if contains_any(&lower, HIGH_KEYWORDS) {
        Severity::High
    } else if contains_any(&lower, MEDIUM_KEYWORDS) {
        Severity::Medium
    } else if contains_any(&lower, LOW_KEYWORDS) {
        Severity::Low
    } else {
        Severity::Medium
    }
}

pub(crate) fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let classifier = ErrorClassifier::default();
        // network 先于 timeout
        assert_eq!(classifier.classify("connection timeout"), ErrorCategory::Network);
        // gas 先于 user
        assert_eq!(
            classifier.classify("insufficient funds for gas * price + value"),
            ErrorCategory::Gas
        );
        assert_eq!(
            classifier.classify("Execution Reverted: STF"),
            ErrorCategory::Contract
        );
        assert_eq!(
            classifier.classify("transaction confirmation timeout after 120s"),
            ErrorCategory::Timeout
        );
        assert_eq!(
            classifier.classify("User rejected the request"),
            ErrorCategory::User
        );
        assert_eq!(classifier.classify("something odd"), ErrorCategory::Network);
    }

    #[test]
    fn test_digits_in_amounts_are_not_http_status() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.classify(
                "insufficient funds for transfer: address 0x1111 have 1503000000 want 2000000000"
            ),
            ErrorCategory::User
        );
        assert_eq!(
            classifier.classify("HTTP error: status code 503"),
            ErrorCategory::Network
        );
        assert_eq!(classifier.classify("502 Bad Gateway"), ErrorCategory::Network);
    }

    #[test]
    fn test_prepend_rule_wins() {
        let mut classifier = ErrorClassifier::default();
        classifier.prepend_rule(ClassifierRule::new(
            |msg| msg.contains("connection") && msg.contains("nonce"),
            ErrorCategory::Gas,
        ));
        assert_eq!(classifier.classify("connection lost, nonce stale"), ErrorCategory::Gas);
        assert_eq!(classifier.classify("connection lost"), ErrorCategory::Network);
    }

    #[test]
    fn test_severity() {
        assert_eq!(severity_of("insufficient funds"), Severity::Critical);
        assert_eq!(severity_of("execution reverted"), Severity::High);
        assert_eq!(severity_of("replacement transaction underpriced"), Severity::High);
        assert_eq!(severity_of("transaction underpriced"), Severity::Medium);
        assert_eq!(severity_of("user rejected"), Severity::Low);
        assert_eq!(severity_of("???"), Severity::Medium);
    }
}
