use alloy::{
    primitives::{Address, U256},
    signers::local::PrivateKeySigner,
};
use anyhow::{Context, Result};
use atomic_engine::{
    chain::{AlloyChainClient, ChainClient, MockChainClient},
    metrics::gather_metrics,
    recovery::{ErrorContext, ErrorRecovery, RecoveryActionInfo, RecoveryEnv},
    schema::ExecutionResult,
    AtomicEngine, BatchParams, EngineConfig, MemoryStore, OperationParams, OperationStore,
    RecoveryConfig, RedbStore, SwapParams,
};
use clap::{Parser, Subcommand};
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// 默认测试私钥（本地开发链的第一个账户）
const DEV_PRIVATE_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcb78fd8f42ef68a74";

/// 原子操作执行器
///
/// 创建、模拟并执行多步原子操作，失败时按错误分类自动恢复并重试
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RPC 节点地址
    #[arg(long, global = true, default_value = "http://localhost:8545")]
    rpc_url: String,

    /// 私钥（64 位十六进制，可选 0x 前缀）
    #[arg(long, global = true, default_value = DEV_PRIVATE_KEY)]
    private_key: String,

    /// 使用内存模拟链，不连接节点
    #[arg(long, global = true)]
    mock: bool,

    /// redb 数据库路径（不指定则使用内存存储）
    #[arg(long, global = true)]
    store: Option<String>,

    /// 最大执行次数（含首次）
    #[arg(long, global = true, default_value = "3")]
    max_attempts: u32,

    /// 网络拥堵时的等待时间（毫秒）
    #[arg(long, global = true, default_value = "5000")]
    congestion_wait_ms: u64,

    /// 等待回执的超时时间（秒）
    #[arg(long, global = true, default_value = "120")]
    receipt_timeout_secs: u64,

    /// swap / batch 结束后输出本次运行的 Prometheus 指标
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 执行一次代币兑换（授权 + 兑换）
    Swap {
        /// 卖出代币地址
        #[arg(long)]
        token_in: String,

        /// 买入代币地址
        #[arg(long)]
        token_out: String,

        /// 路由合约地址
        #[arg(long)]
        router: String,

        /// 卖出数量（最小单位）
        #[arg(long)]
        amount_in: String,

        /// 预期买入数量（最小单位）
        #[arg(long)]
        expected_out: String,

        /// 滑点容忍度（基点）
        #[arg(long, default_value = "50")]
        slippage_bps: u32,

        /// 只模拟，不执行
        #[arg(long)]
        dry_run: bool,
    },

    /// 从 JSON 文件执行批量操作
    Batch {
        /// 批量参数文件
        #[arg(long)]
        file: String,

        /// 只模拟，不执行
        #[arg(long)]
        dry_run: bool,
    },

    /// 分析一条错误信息
    Analyze {
        #[arg(long)]
        message: String,
    },

    /// 列出已保存的操作
    List,
}

/// 执行器：引擎 + 错误恢复
struct Runner {
    engine: AtomicEngine,
    recovery: ErrorRecovery,
    account: Address,
    max_attempts: u32,
}

impl Runner {
    async fn new(args: &Args) -> Result<(Self, Option<Arc<MockChainClient>>)> {
        let signer: PrivateKeySigner = args
            .private_key
            .parse()
            .context("无效的私钥")?;
        let account = signer.address();

        let (chain, mock): (Arc<dyn ChainClient>, Option<Arc<MockChainClient>>) = if args.mock {
            info!("🧪 使用模拟链");
            let mock = Arc::new(MockChainClient::new());
            mock.set_native_balance(account, U256::from(10).pow(U256::from(18)));
            (mock.clone(), Some(mock))
        } else {
            info!("🔗 连接节点: {}", args.rpc_url);
            let client = AlloyChainClient::connect(&args.rpc_url, &args.private_key).await?;
            (Arc::new(client), None)
        };

        let store: Arc<dyn OperationStore> = match &args.store {
            Some(path) => {
                info!("💾 使用 redb 存储: {}", path);
                Arc::new(RedbStore::new(path)?)
            }
            None => Arc::new(MemoryStore::new()),
        };

        let engine = AtomicEngine::new(
            chain.clone(),
            store,
            EngineConfig {
                receipt_timeout: Duration::from_secs(args.receipt_timeout_secs),
                ..EngineConfig::default()
            },
        );
        // 恢复动作调整的 gas 倍率要对下一次执行生效
        let recovery = ErrorRecovery::new(RecoveryEnv {
            chain,
            tuning: engine.tuning(),
            config: RecoveryConfig {
                congestion_wait: Duration::from_millis(args.congestion_wait_ms),
                ..RecoveryConfig::default()
            },
        });

        Ok((
            Self {
                engine,
                recovery,
                account,
                max_attempts: args.max_attempts.max(1),
            },
            mock,
        ))
    }

    /// 创建并执行操作，失败时分析错误、运行恢复动作并按策略重试
    async fn run(&self, params: OperationParams, dry_run: bool) -> Result<()> {
        let op = self.engine.create_operation(params)?;
        info!("📝 已创建操作 {} ({} 步)", op.id, op.steps.len());

        let simulation = self.engine.simulate(&op.id).await?;
        println!("{}", serde_json::to_string_pretty(&simulation)?);
        if dry_run {
            return Ok(());
        }

        let on_attempt: &(dyn Fn(&RecoveryActionInfo, usize) + Send + Sync) =
            &|action, attempt| {
                info!("🔧 恢复动作 #{}: {} ({})", attempt, action.name, action.id);
            };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.engine.execute(&op.id).await {
                Ok(result) => {
                    print_result(&result)?;
                    return Ok(());
                }
                Err(err) if !err.is_recoverable() => {
                    // 参数、状态或模拟未通过：重试不会改变结果
                    error!("❌ 操作 {} 未执行: {}", op.id, err.user_message());
                    return Err(err.into());
                }
                Err(err) => {
                    let ctx = ErrorContext::from_engine_error(&err, Some(self.account));
                    let analysis = self.recovery.analyze_error(&err, &ctx);
                    warn!(
                        "[{}/{}] ❌ 执行失败 [{} / {}]: {}",
                        attempt,
                        self.max_attempts,
                        analysis.category,
                        analysis.severity.as_str(),
                        analysis.user_message
                    );

                    if attempt >= self.max_attempts
                        || !self.recovery.should_retry(
                            &analysis.technical_details,
                            analysis.category,
                            attempt,
                        )
                    {
                        for tip in &analysis.prevention_tips {
                            info!("💡 {}", tip);
                        }
                        return Err(err.into());
                    }

                    let recovered = self
                        .recovery
                        .execute_recovery(&err, &ctx, Some(on_attempt))
                        .await;
                    if !recovered {
                        warn!("⚠️  自动恢复未成功，仍按策略重试");
                    }

                    let delay = self.recovery.retry_delay(analysis.category, attempt);
                    info!("⏳ {:?} 后重试", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn print_result(result: &ExecutionResult) -> Result<()> {
    info!(
        "🎉 操作 {} 完成: {} 步, gas={}",
        result.operation_id, result.completed_steps, result.total_gas_used
    );
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

fn parse_address(label: &str, value: &str) -> Result<Address> {
    Address::from_str(value).with_context(|| format!("无效的 {} 地址: {}", label, value))
}

fn parse_amount(label: &str, value: &str) -> Result<U256> {
    U256::from_str(value).with_context(|| format!("无效的 {} 数量: {}", label, value))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Swap {
            token_in,
            token_out,
            router,
            amount_in,
            expected_out,
            slippage_bps,
            dry_run,
        } => {
            let (runner, mock) = Runner::new(&args).await?;
            let params = SwapParams {
                account: runner.account,
                token_in: parse_address("token_in", token_in)?,
                token_out: parse_address("token_out", token_out)?,
                router: parse_address("router", router)?,
                amount_in: parse_amount("amount_in", amount_in)?,
                expected_amount_out: parse_amount("expected_out", expected_out)?,
                slippage_bps: Some(*slippage_bps),
                deadline: None,
                title: None,
            };
            if let Some(mock) = mock {
                mock.set_balance(params.token_in, params.account, params.amount_in);
            }
            let outcome = runner.run(OperationParams::Swap(params), *dry_run).await;
            if args.print_metrics {
                print!("{}", gather_metrics());
            }
            outcome?;
        }

        Command::Batch { file, dry_run } => {
            let raw = std::fs::read_to_string(file)
                .with_context(|| format!("无法读取批量参数文件 {}", file))?;
            let mut params: BatchParams = serde_json::from_str(&raw)?;
            let (runner, _mock) = Runner::new(&args).await?;
            if params.account != runner.account {
                warn!(
                    "⚠️  参数中的账户 {} 与签名账户不一致，改用 {}",
                    params.account, runner.account
                );
                params.account = runner.account;
            }
            let outcome = runner.run(OperationParams::Batch(params), *dry_run).await;
            if args.print_metrics {
                print!("{}", gather_metrics());
            }
            outcome?;
        }

        Command::Analyze { message } => {
            let recovery = ErrorRecovery::new(RecoveryEnv {
                chain: Arc::new(MockChainClient::new()),
                tuning: Arc::default(),
                config: RecoveryConfig::default(),
            });
            let analysis = recovery.analyze_error(message.as_str(), &ErrorContext::new());
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }

        Command::List => {
            let Some(path) = &args.store else {
                error!("❌ list 需要指定 --store");
                anyhow::bail!("no store configured");
            };
            let store = RedbStore::new(path)?;
            for op in store.list(None)? {
                println!(
                    "{}  {:<10}  {:<12}  {}/{}  {}",
                    op.id,
                    op.kind.as_str(),
                    op.status.as_str(),
                    op.completed_steps(),
                    op.steps.len(),
                    op.metadata.title
                );
            }
        }

    }

    Ok(())
}
