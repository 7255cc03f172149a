//! 记忆层：只追加的回合日志、压缩段、关键发现与上下文压缩

pub mod compressor;
pub mod findings;
pub mod token_budget;
pub mod transcript;

pub use compressor::{categorize_command, CompressionReport, ContextCompressor};
pub use findings::{ExtractionRule, FindingExtractor, FindingKind, FindingStore, KeyFinding};
pub use token_budget::TokenEstimator;
pub use transcript::{CompressedSegment, Transcript, Turn, TurnOutput};
