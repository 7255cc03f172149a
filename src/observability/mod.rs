//! 可观测性：tracing 初始化 + 每个 Turn 的事件输出
//!
//! 事件只写不读，不会反馈到控制决策中。

use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::core::Transition;
use crate::roles::Role;
use crate::signals::FailureRecord;

/// RUST_LOG 优先，默认 info
pub fn init() {
    init_with_level("info");
}

pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// 每个 Turn 输出一条
#[derive(Debug, Clone, Serialize)]
pub struct TurnEvent {
    pub attempt_id: String,
    pub turn: usize,
    pub role: Role,
    pub transition: Transition,
    /// 命中的路由规则
    pub rule: &'static str,
    pub confidence: u32,
    pub consecutive_failures: u32,
    pub failure: Option<FailureRecord>,
    pub duration_ms: u64,
}

pub trait TurnSink: Send + Sync {
    fn record(&self, event: &TurnEvent);
}

/// 以 JSON 审计字段写入 tracing
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TurnSink for TracingSink {
    fn record(&self, event: &TurnEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(audit = %json, "turn"),
            Err(e) => tracing::warn!("Failed to serialize turn event: {}", e),
        }
    }
}

/// 转发到通道（报告 / 测试用）；接收端关闭后静默丢弃
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TurnSink for ChannelSink {
    fn record(&self, event: &TurnEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl TurnSink for NoopSink {
    fn record(&self, _event: &TurnEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> TurnEvent {
        TurnEvent {
            attempt_id: "a1".into(),
            turn: 3,
            role: Role::Attacker,
            transition: Transition::RetrySame,
            rule: "transient_failure",
            confidence: 50,
            consecutive_failures: 1,
            failure: None,
            duration_ms: 12,
        }
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["role"], "ATTACKER");
        assert_eq!(json["transition"], "RETRY_SAME");
        assert_eq!(json["confidence"], 50);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.record(&event());
        let got = rx.recv().await.unwrap();
        assert_eq!(got.turn, 3);
        drop(rx);
        sink.record(&event());
    }
}
