//! 核心编排层：错误、重试、状态、路由、取消与主控循环

pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod retry;
pub mod router;
pub mod shutdown;
pub mod state;

pub use error::ControllerError;
pub use fingerprint::fingerprint;
pub use orchestrator::{Controller, ControllerBuilder};
pub use retry::{call_with_retry, RetryPolicy};
pub use router::{Decision, Router, RouterSignals, RouterThresholds};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{
    Attempt, ControllerState, StrategySwitch, TerminalReason, TerminationReport, Transition,
};
