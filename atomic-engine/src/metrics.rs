/// 性能监控指标模块
///
/// 使用 Prometheus 格式的指标，用于监控原子操作的执行与错误恢复
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static! {
    /// 创建的操作数（按类型统计）
    pub static ref OPERATIONS_CREATED: CounterVec = register_counter_vec!(
        "atomic_engine_operations_created_total",
        "Total number of atomic operations created",
        &["kind"]
    )
    .expect("Failed to register operations_created metric");

    /// 执行结果（completed / failed / reverted / rejected）
    pub static ref EXECUTIONS: CounterVec = register_counter_vec!(
        "atomic_engine_executions_total",
        "Total number of execute calls by outcome",
        &["outcome"]
    )
    .expect("Failed to register executions metric");

    /// 单步执行耗时（秒，提交到回执）
    pub static ref STEP_DURATION: HistogramVec = register_histogram_vec!(
        "atomic_engine_step_duration_seconds",
        "Step submission-to-receipt duration in seconds",
        &["function"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("Failed to register step_duration metric");

    /// 补偿结果
    pub static ref COMPENSATIONS: CounterVec = register_counter_vec!(
        "atomic_engine_compensations_total",
        "Total number of compensation attempts by outcome",
        &["function", "outcome"]
    )
    .expect("Failed to register compensations metric");

    /// 已分析的错误（按类别统计）
    pub static ref ERRORS_CLASSIFIED: CounterVec = register_counter_vec!(
        "atomic_engine_errors_classified_total",
        "Total number of analyzed errors by category",
        &["category", "severity"]
    )
    .expect("Failed to register errors_classified metric");

    /// 恢复动作执行结果
    pub static ref RECOVERY_ATTEMPTS: CounterVec = register_counter_vec!(
        "atomic_engine_recovery_attempts_total",
        "Total number of recovery action runs by outcome",
        &["action", "outcome"]
    )
    .expect("Failed to register recovery_attempts metric");
}

/// 获取所有指标的文本格式输出
pub fn gather_metrics() -> String {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("⚠️  指标编码失败: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_registered_metrics() {
        OPERATIONS_CREATED.with_label_values(&["batch"]).inc();
        let text = gather_metrics();
        assert!(text.contains("atomic_engine_operations_created_total"));
    }
}
