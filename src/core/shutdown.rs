//! 外部取消：Ctrl+C / SIGTERM / 全局超时 → CancellationToken
//!
//! 控制器在每次迭代开始时检查令牌，进行中的外部调用通过同一令牌被中断。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 全局超时
    Deadline,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(4);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 传给 Controller::run 的取消令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.token.is_cancelled() {
            return;
        }
        tracing::warn!(reason = ?reason, "Cancelling attempt");
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let reason = wait_for_signal().await;
            tracing::info!(reason = ?reason, "Received termination signal");
            manager.shutdown(reason);
        });
    }

    /// 全局超时：到期后取消（令牌先被取消则提前退出）
    pub fn arm_deadline(self: &Arc<Self>, after: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = manager.token.cancelled() => {}
                _ = tokio::time::sleep(after) => manager.shutdown(ShutdownReason::Deadline),
            }
        });
    }
}

/// Ctrl+C；处理器注册失败时记录错误并永不返回（不能误判为用户中止）
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> ShutdownReason {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to listen for SIGTERM: {}", e);
            ctrl_c().await;
            return ShutdownReason::UserInitiated;
        }
    };
    tokio::select! {
        _ = ctrl_c() => ShutdownReason::UserInitiated,
        _ = sigterm.recv() => ShutdownReason::Signal,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> ShutdownReason {
    ctrl_c().await;
    ShutdownReason::UserInitiated
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
