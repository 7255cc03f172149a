//! 信号层：分类、证明校验、信心、失败历史、重复检测
//!
//! 每个组件都是纯状态 + 方法，状态由单个 Attempt 独占，没有全局单例。

pub mod classifier;
pub mod confidence;
pub mod history;
pub mod proof;
pub mod repetition;

pub use classifier::{ClassifyInput, FailureCategory, FailureRecord, Outcome, OutcomeClassifier, Tier};
pub use confidence::{ConfidenceTracker, ConfidenceUpdate, MAX_CONFIDENCE};
pub use history::FailureHistory;
pub use proof::{ProofArtifact, ProofVerifier};
pub use repetition::{
    extract_request_params, extract_response_length, normalize_action, NormalizedAction,
    RepetitionDetector, RepetitionSignal,
};
