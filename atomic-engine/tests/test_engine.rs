use alloy::primitives::{Address, U256};
use atomic_engine::builder::{BatchParams, OperationParams, StepParams, SwapParams, TimelockParams};
use atomic_engine::chain::mock::{MockFailure, MockPhase};
use atomic_engine::chain::{ChainError, MockChainClient, ViewCall};
use atomic_engine::schema::{
    Comparator, CompensationOutcome, ConditionCheck, OperationStatus, RiskLevel, SafeguardConfig,
    StepState,
};
use atomic_engine::store::{MemoryStore, OperationStore};
use atomic_engine::{AtomicEngine, EngineConfig, EngineError, StepFailureCause};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

const APPROVE: &str = "approve(address,uint256)";
const DEPOSIT: &str = "deposit(uint256)";

fn account() -> Address {
    Address::repeat_byte(0xAA)
}
fn token_a() -> Address {
    Address::repeat_byte(0x0A)
}
fn token_b() -> Address {
    Address::repeat_byte(0x0B)
}
fn vault() -> Address {
    Address::repeat_byte(0x0C)
}
fn router() -> Address {
    Address::repeat_byte(0x0D)
}

struct Harness {
    chain: Arc<MockChainClient>,
    store: Arc<MemoryStore>,
    engine: AtomicEngine,
}

fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

fn harness_with(config: EngineConfig) -> Harness {
    let chain = Arc::new(MockChainClient::new());
    let store = Arc::new(MemoryStore::new());
    let engine = AtomicEngine::new(chain.clone(), store.clone(), config);
    Harness {
        chain,
        store,
        engine,
    }
}

fn step(target: Address, function: &str, args: &[String]) -> StepParams {
    StepParams {
        id: None,
        target,
        function: function.to_string(),
        args: args.to_vec(),
        value: None,
        gas_limit: None,
        precondition: None,
    }
}

/// approve(A) -> deposit -> approve(B)
fn three_step_batch(safeguards: SafeguardConfig) -> BatchParams {
    BatchParams {
        account: account(),
        steps: vec![
            step(token_a(), APPROVE, &[vault().to_string(), "100".to_string()]),
            step(vault(), DEPOSIT, &["100".to_string()]),
            step(token_b(), APPROVE, &[vault().to_string(), "200".to_string()]),
        ],
        requirements: vec![],
        safeguards,
        title: Some("deposit flow".to_string()),
        description: None,
        risk_level: RiskLevel::Low,
        tags: vec![],
    }
}

fn no_rollback() -> SafeguardConfig {
    SafeguardConfig {
        require_all_steps: false,
        ..SafeguardConfig::default()
    }
}

fn view_check(target: Address, function: &str, expected: u64) -> ConditionCheck {
    ConditionCheck {
        target,
        call: ViewCall::new(function, vec![]),
        comparator: Comparator::Eq,
        expected: U256::from(expected),
        description: None,
    }
}

// ==================== 模拟 ====================

#[tokio::test]
async fn test_swap_shortfall_blocks_but_simulates_all_steps() {
    let h = harness();
    h.chain.set_balance(token_a(), account(), U256::from(40));

    let op = h
        .engine
        .create_operation(OperationParams::Swap(SwapParams {
            account: account(),
            token_in: token_a(),
            token_out: token_b(),
            router: router(),
            amount_in: U256::from(100),
            expected_amount_out: U256::from(1000),
            slippage_bps: None,
            deadline: None,
            title: None,
        }))
        .unwrap();

    let sim = h.engine.simulate(&op.id).await.unwrap();
    assert!(!sim.can_execute);
    assert_eq!(sim.steps.len(), 3);
    assert!(sim.steps.iter().all(|s| s.estimated && s.gas_estimate > 0));
    assert_eq!(sim.total_gas, 150_000);
    assert!(sim.errors.iter().any(|e| e.contains("差额 60")));
    assert!(!sim.requirements.all_satisfied());
    assert!(h.chain.submitted().is_empty());

    // 模拟结束后恢复 pending，并回写估算
    let stored = h.engine.get_operation(&op.id).unwrap();
    assert_eq!(stored.status, OperationStatus::Pending);
    assert_eq!(stored.metadata.estimated_gas, Some(150_000));
    assert_eq!(
        stored.metadata.estimated_cost,
        Some(U256::from(150_000u64) * U256::from(1_000_000_000u64))
    );

    // 执行同样被阻止，且不提交任何交易
    let err = h.engine.execute(&op.id).await.unwrap_err();
    assert!(matches!(err, EngineError::SimulationBlocked { .. }));
    assert!(h.chain.submitted().is_empty());
}

#[tokio::test]
async fn test_simulate_is_idempotent() {
    let h = harness();
    h.chain
        .fail_always(MockPhase::Estimate, "deposit", MockFailure::Error(ChainError::Other("estimate failed".into())));
    let mut params = three_step_batch(SafeguardConfig::default());
    params.safeguards.max_gas_limit = Some(10);
    let op = h.engine.create_operation(OperationParams::Batch(params)).unwrap();

    let first = h.engine.simulate(&op.id).await.unwrap();
    let second = h.engine.simulate(&op.id).await.unwrap();
    assert_eq!(first.can_execute, second.can_execute);
    assert_eq!(first.errors, second.errors);
    assert_eq!(first.warnings, second.warnings);
    assert!(first.can_execute);
    // gas 估算失败 + 超过 gas 上限，都只是警告
    assert_eq!(first.warnings.len(), 2);
}

#[tokio::test]
async fn test_estimation_fallback_uses_declared_or_default_limit() {
    let h = harness();
    h.chain
        .fail_always(MockPhase::Estimate, "deposit", MockFailure::Error(ChainError::Other("boom".into())));
    h.chain
        .fail_always(MockPhase::Estimate, "approve", MockFailure::Error(ChainError::Other("boom".into())));

    let mut params = three_step_batch(SafeguardConfig::default());
    params.steps[1].gas_limit = Some(90_000);
    let op = h.engine.create_operation(OperationParams::Batch(params)).unwrap();

    let sim = h.engine.simulate(&op.id).await.unwrap();
    assert!(sim.steps.iter().all(|s| !s.estimated));
    assert_eq!(sim.steps[0].gas_estimate, 200_000);
    assert_eq!(sim.steps[1].gas_estimate, 90_000);
    assert!(sim.can_execute);
}

#[tokio::test]
async fn test_deadline_passed_is_error() {
    let h = harness();
    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(SafeguardConfig::default())))
        .unwrap();

    let mut stored = h.engine.get_operation(&op.id).unwrap();
    stored.safeguards.deadline = Some(Utc::now() - ChronoDuration::seconds(5));
    h.store.put(&stored).unwrap();

    let sim = h.engine.simulate(&op.id).await.unwrap();
    assert!(!sim.can_execute);
    assert!(sim.errors.iter().any(|e| e.contains("截止时间")));
}

#[tokio::test]
async fn test_timelocked_blocks_until_unlock() {
    let h = harness();
    let op = h
        .engine
        .create_operation(OperationParams::Timelocked(TimelockParams {
            batch: three_step_batch(SafeguardConfig::default()),
            unlock_at: Utc::now() + ChronoDuration::hours(1),
        }))
        .unwrap();

    let err = h.engine.execute(&op.id).await.unwrap_err();
    assert!(matches!(err, EngineError::SimulationBlocked { .. }));
    assert!(h.chain.submitted().is_empty());
    assert_eq!(
        h.engine.get_operation(&op.id).unwrap().status,
        OperationStatus::Pending
    );
}

// ==================== 执行 ====================

#[tokio::test]
async fn test_batch_completes() {
    let h = harness();
    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(SafeguardConfig::default())))
        .unwrap();

    let result = h.engine.execute(&op.id).await.unwrap();
    assert_eq!(result.status, OperationStatus::Completed);
    assert_eq!(result.completed_steps, 3);
    assert_eq!(result.tx_hashes.len(), 3);
    assert_eq!(result.total_gas_used, 150_000);
    assert_eq!(
        h.chain.submitted_functions(),
        vec!["approve", "deposit", "approve"]
    );

    let stored = h.engine.get_operation(&op.id).unwrap();
    assert_eq!(stored.status, OperationStatus::Completed);
    assert!(stored.completed_at.is_some());
    assert!(stored.executed_at.is_some());

    // completed 是终态
    let again = h.engine.execute(&op.id).await.unwrap_err();
    assert!(matches!(again, EngineError::InvalidStatus { .. }));
    assert!(h.engine.simulate(&op.id).await.is_err());
}

#[tokio::test]
async fn test_revert_with_rollback_compensates_prefix_only() {
    let h = harness();
    h.chain.fail_once(MockPhase::Receipt, "deposit", MockFailure::Revert);
    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(SafeguardConfig::default())))
        .unwrap();

    let err = h.engine.execute(&op.id).await.unwrap_err();
    let failure = err.step_failure().expect("step failure");
    assert_eq!(failure.step_index, 1);
    assert_eq!(failure.completed_steps, 1);
    assert_eq!(failure.status, OperationStatus::Reverted);
    assert!(err.to_string().contains("execution reverted"));

    let rollback = failure.rollback.as_ref().unwrap();
    assert_eq!(rollback.records.len(), 1);
    assert_eq!(rollback.records[0].step_index, 0);
    assert!(matches!(
        rollback.records[0].outcome,
        CompensationOutcome::Compensated { .. }
    ));

    // 第 3 步从未提交；补偿交易是 approve(spender, 0)
    let submitted = h.chain.submitted();
    assert_eq!(
        h.chain.submitted_functions(),
        vec!["approve", "deposit", "approve"]
    );
    assert_eq!(submitted[2].request.to, token_a());
    assert_eq!(submitted[2].request.args[1], "0");
    assert_eq!(h.chain.allowance_of(token_a(), account(), vault()), U256::ZERO);

    let stored = h.engine.get_operation(&op.id).unwrap();
    assert_eq!(stored.status, OperationStatus::Reverted);
    assert!(stored.steps[0].is_executed());
    assert!(stored.steps[1].error().is_some());
    assert_eq!(stored.steps[2].state, StepState::Pending);
}

#[tokio::test]
async fn test_compensation_in_strict_reverse_order() {
    let h = harness();
    h.chain.fail_once(MockPhase::Receipt, "deposit", MockFailure::Revert);

    let mut params = three_step_batch(SafeguardConfig::default());
    // approve(A) -> approve(B) -> deposit
    params.steps.swap(1, 2);
    let op = h.engine.create_operation(OperationParams::Batch(params)).unwrap();

    let err = h.engine.execute(&op.id).await.unwrap_err();
    let failure = err.step_failure().unwrap();
    let order: Vec<usize> = failure
        .rollback
        .as_ref()
        .unwrap()
        .records
        .iter()
        .map(|r| r.step_index)
        .collect();
    assert_eq!(order, vec![1, 0]);

    let targets: Vec<Address> = h.chain.submitted()[3..]
        .iter()
        .map(|tx| tx.request.to)
        .collect();
    assert_eq!(targets, vec![token_b(), token_a()]);
}

#[tokio::test]
async fn test_failure_without_require_all_steps_is_not_compensated() {
    let h = harness();
    h.chain.fail_once(MockPhase::Receipt, "deposit", MockFailure::Revert);
    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(no_rollback())))
        .unwrap();

    let err = h.engine.execute(&op.id).await.unwrap_err();
    let failure = err.step_failure().unwrap();
    assert_eq!(failure.status, OperationStatus::Failed);
    assert!(failure.rollback.is_none());
    assert_eq!(h.chain.submitted_functions(), vec!["approve", "deposit"]);
    assert_eq!(
        h.chain.allowance_of(token_a(), account(), vault()),
        U256::from(100)
    );
}

#[tokio::test]
async fn test_failed_operation_resumes_from_failed_step() {
    let h = harness();
    h.chain.fail_once(
        MockPhase::Send,
        "deposit",
        MockFailure::Error(ChainError::Transport("socket hang up".into())),
    );
    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(no_rollback())))
        .unwrap();

    assert!(h.engine.execute(&op.id).await.is_err());
    assert_eq!(
        h.engine.get_operation(&op.id).unwrap().status,
        OperationStatus::Failed
    );

    let result = h.engine.execute(&op.id).await.unwrap();
    assert_eq!(result.completed_steps, 3);
    // 第一步没有重复提交
    assert_eq!(
        h.chain.submitted_functions(),
        vec!["approve", "deposit", "approve"]
    );
}

#[tokio::test]
async fn test_reverted_operation_restarts_from_first_step() {
    let h = harness();
    h.chain.fail_once(MockPhase::Receipt, "deposit", MockFailure::Revert);
    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(SafeguardConfig::default())))
        .unwrap();

    assert!(h.engine.execute(&op.id).await.is_err());
    let result = h.engine.execute(&op.id).await.unwrap();
    assert_eq!(result.status, OperationStatus::Completed);
    assert_eq!(
        h.chain.submitted_functions(),
        vec!["approve", "deposit", "approve", "approve", "deposit", "approve"]
    );
    assert_eq!(
        h.chain.allowance_of(token_a(), account(), vault()),
        U256::from(100)
    );
}

#[tokio::test]
async fn test_concurrent_execute_rejected_before_submission() {
    let h = harness();
    h.chain.set_receipt_delay(Duration::from_millis(50));
    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(SafeguardConfig::default())))
        .unwrap();

    let (first, second) = tokio::join!(h.engine.execute(&op.id), h.engine.execute(&op.id));
    let (ok, rejected) = if first.is_ok() { (first, second) } else { (second, first) };
    assert!(ok.is_ok());
    assert!(matches!(rejected, Err(EngineError::AlreadyExecuting(_))));
    assert_eq!(h.chain.submitted().len(), 3);
    assert!(!h.engine.is_executing(&op.id));
}

#[tokio::test]
async fn test_precondition_failure_at_execution_triggers_rollback() {
    let h = harness();
    h.chain.set_view(token_a(), "paused", U256::ZERO);
    // 第二步的前置条件不满足：模拟时只是警告，执行时失败
    h.chain.set_view(vault(), "isOpen", U256::ZERO);

    let mut params = three_step_batch(SafeguardConfig::default());
    params.steps.truncate(2);
    params.steps[0].precondition = Some(view_check(token_a(), "paused()", 0));
    params.steps[1].precondition = Some(view_check(vault(), "isOpen()", 1));
    let op = h
        .engine
        .create_operation(OperationParams::Conditional(params))
        .unwrap();

    let sim = h.engine.simulate(&op.id).await.unwrap();
    assert!(sim.can_execute);
    assert_eq!(sim.steps[1].condition_passed, Some(false));
    assert_eq!(sim.steps[1].gas_estimate, 0);
    assert_eq!(sim.warnings.len(), 1);

    let err = h.engine.execute(&op.id).await.unwrap_err();
    let failure = err.step_failure().unwrap();
    assert!(matches!(failure.cause, StepFailureCause::Precondition(_)));
    assert_eq!(failure.status, OperationStatus::Reverted);
    assert!(err.to_string().contains("precondition not met"));
    // approve + 补偿 approve，deposit 从未提交
    assert_eq!(h.chain.submitted_functions(), vec!["approve", "approve"]);
}

#[tokio::test]
async fn test_first_step_precondition_blocks_simulation() {
    let h = harness();
    let mut params = three_step_batch(SafeguardConfig::default());
    params.steps[0].precondition = Some(view_check(token_a(), "paused()", 0));
    for s in params.steps.iter_mut().skip(1) {
        s.precondition = Some(view_check(vault(), "isOpen()", 1));
    }
    let op = h
        .engine
        .create_operation(OperationParams::Conditional(params))
        .unwrap();

    // token_a 上没有 paused 视图：读取失败
    let sim = h.engine.simulate(&op.id).await.unwrap();
    assert!(!sim.can_execute);
    assert_eq!(sim.steps[0].condition_passed, Some(false));
    assert_eq!(sim.steps.len(), 3);
}

#[tokio::test]
async fn test_receipt_timeout_fails_step() {
    let h = harness_with(EngineConfig {
        receipt_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    });
    h.chain.fail_once(MockPhase::Receipt, "deposit", MockFailure::Hang);
    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(no_rollback())))
        .unwrap();

    let err = h.engine.execute(&op.id).await.unwrap_err();
    let failure = err.step_failure().unwrap();
    assert!(matches!(failure.cause, StepFailureCause::ReceiptTimeout(_)));
    assert!(err.to_string().contains("transaction confirmation timeout"));

    let stored = h.engine.get_operation(&op.id).unwrap();
    // 已提交的交易哈希仍然保留
    assert!(stored.steps[1].tx_hash().is_some());
    assert!(!stored.steps[1].is_executed());
}

#[tokio::test]
async fn test_receipt_wait_bounded_by_deadline() {
    // 回执上限很长，只有截止时间能让等待结束
    let h = harness_with(EngineConfig {
        receipt_timeout: Duration::from_secs(120),
        ..EngineConfig::default()
    });
    h.chain.fail_once(MockPhase::Receipt, "deposit", MockFailure::Hang);
    let safeguards = SafeguardConfig {
        deadline: Some(Utc::now() + ChronoDuration::milliseconds(300)),
        ..no_rollback()
    };
    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(safeguards)))
        .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), h.engine.execute(&op.id))
        .await
        .expect("receipt wait should end at the deadline")
        .unwrap_err();
    let failure = err.step_failure().unwrap();
    assert_eq!(failure.step_index, 1);
    match failure.cause {
        StepFailureCause::ReceiptTimeout(wait) => assert!(wait <= Duration::from_millis(300)),
        ref other => panic!("unexpected cause: {}", other),
    }
    assert_eq!(failure.status, OperationStatus::Failed);
}

#[tokio::test]
async fn test_gas_tuning_applied_on_submit() {
    let h = harness();
    h.chain.set_gas_price(1_000);
    let tuning = h.engine.tuning();
    tuning.bump_gas_price(20, 300);
    tuning.bump_gas_limit(50, 300);

    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(SafeguardConfig::default())))
        .unwrap();
    h.engine.execute(&op.id).await.unwrap();

    let submitted = h.chain.submitted();
    assert_eq!(submitted[0].request.gas_price, Some(1_200));
    assert_eq!(submitted[0].request.gas_limit, Some(75_000));
}

// ==================== 取消与查询 ====================

#[tokio::test]
async fn test_cancel_rules() {
    let h = harness();
    let pending = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(SafeguardConfig::default())))
        .unwrap();
    let done = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(SafeguardConfig::default())))
        .unwrap();
    h.engine.execute(&done.id).await.unwrap();

    assert_eq!(h.engine.list_operations(None).unwrap().len(), 2);
    assert_eq!(
        h.engine
            .list_operations(Some(OperationStatus::Completed))
            .unwrap()
            .len(),
        1
    );

    h.engine.cancel(&pending.id).unwrap();
    assert!(matches!(
        h.engine.get_operation(&pending.id),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.cancel(&done.id),
        Err(EngineError::CancelRejected { .. })
    ));
    assert!(matches!(
        h.engine.cancel("op_missing"),
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_rejected_while_executing() {
    let h = Arc::new(harness());
    h.chain.set_receipt_delay(Duration::from_millis(100));
    let op = h
        .engine
        .create_operation(OperationParams::Batch(three_step_batch(SafeguardConfig::default())))
        .unwrap();

    let runner = Arc::clone(&h);
    let id = op.id.clone();
    let handle = tokio::spawn(async move { runner.engine.execute(&id).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.engine.is_executing(&op.id));
    assert!(matches!(
        h.engine.cancel(&op.id),
        Err(EngineError::CancelRejected { .. })
    ));
    assert!(matches!(
        h.engine.simulate(&op.id).await,
        Err(EngineError::AlreadyExecuting(_))
    ));

    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_check_requirements_reports_read_failures() {
    let h = harness();
    h.chain.set_balance(token_a(), account(), U256::from(500));
    let op = h
        .engine
        .create_operation(OperationParams::Swap(SwapParams {
            account: account(),
            token_in: token_a(),
            token_out: token_b(),
            router: router(),
            amount_in: U256::from(100),
            expected_amount_out: U256::from(1000),
            slippage_bps: Some(0),
            deadline: None,
            title: None,
        }))
        .unwrap();

    let report = h.engine.check_requirements(&op.id).await.unwrap();
    assert!(report.all_satisfied());

    h.chain.set_offline(true);
    let report = h.engine.check_requirements(&op.id).await.unwrap();
    assert!(!report.all_satisfied());
    assert!(report.results.iter().all(|r| r.error.is_some() && r.actual.is_none()));
}
