//! 原子操作执行器
//!
//! 前置要求检查、步骤模拟、顺序执行与回滚补偿

pub mod coordinator;
pub mod inflight;
pub mod requirements;
pub mod rollback;
pub mod simulator;

pub use coordinator::ExecutionCoordinator;
pub use inflight::{InFlightGuard, InFlightRegistry};
pub use requirements::RequirementChecker;
pub use rollback::{
    CompensatingCall, Compensation, CompensationRegistry, DecreaseAllowance, ResetApproval,
    RollbackCompensator,
};
pub use simulator::StepSimulator;
