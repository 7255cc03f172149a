//! Shadow - 安全测试尝试循环的编排控制器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态机、Router、错误、超时重试、取消
//! - **knowledge**: 外部知识检索与触发器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: Transcript、关键发现、上下文压缩
//! - **observability**: tracing 初始化与 Turn 事件
//! - **roles**: Advisor / Attacker / Reviewer
//! - **sandbox**: Action 执行（shell / docker）与 Observation
//! - **signals**: 结果分类、证明校验、信心、重复检测

pub mod config;
pub mod core;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod roles;
pub mod sandbox;
pub mod signals;

pub use crate::core::{Attempt, Controller, ControllerError, TerminationReport};
