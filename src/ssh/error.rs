// SSH 错误类型定义

use std::time::Duration;

use thiserror::Error;

use super::session::CommandOutcome;
use super::state::SessionState;

/// SSH 错误类型
///
/// 每个错误对单次尝试都是终止性的，核心层不做重试。
#[derive(Debug, Error)]
pub enum SshError {
    /// 网络错误（DNS、拒绝连接、不可达、连接中断）
    #[error("Network error: {0}")]
    Network(String),

    /// 超过调用方给定的期限
    #[error("{stage} timed out after {:.1}s", .after.as_secs_f64())]
    Timeout {
        stage: &'static str,
        after: Duration,
    },

    /// 认证失败（所有方式均被拒绝或未配置任何方式）
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// 主机密钥与已记录的指纹不一致
    #[error("Host key mismatch for {host}: expected {expected}, got {actual}")]
    HostKeyMismatch {
        host: String,
        expected: String,
        actual: String,
    },

    /// 严格模式下遇到未知主机
    #[error("Host key for {host} is not trusted ({fingerprint})")]
    HostKeyUnknown { host: String, fingerprint: String },

    /// 私钥无法解析
    #[error("Private key error: {0}")]
    Key(String),

    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// 通道错误
    #[error("Channel error: {0}")]
    Channel(String),

    /// 状态机顺序被违反
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl SshError {
    /// 映射为命令结果的终止标签
    pub fn outcome(&self) -> CommandOutcome {
        match self {
            SshError::Timeout { .. } => CommandOutcome::Timeout,
            SshError::Auth(_) | SshError::Key(_) => CommandOutcome::AuthFailure,
            _ => CommandOutcome::NetworkFailure,
        }
    }
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        match e {
            russh::Error::IO(io) => SshError::Network(io.to_string()),
            russh::Error::Disconnect | russh::Error::HUP => {
                SshError::Network("connection closed by remote host".to_string())
            }
            other => SshError::Protocol(other.to_string()),
        }
    }
}
