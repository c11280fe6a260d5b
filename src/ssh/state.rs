// SSH 会话状态机
//
// Idle → Connecting → Authenticating → Ready → Executing → Ready ... → Closed
// Failed 可由 Connecting / Authenticating / Executing 进入；close() 可从任意状态进入 Closed

use std::fmt;

use serde::Serialize;

/// 会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// 尚未连接
    Idle,
    /// 传输层已建立（或正在建立），等待认证
    Connecting,
    /// 正在认证
    Authenticating,
    /// 可以执行命令
    Ready,
    /// 命令执行中
    Executing,
    /// 已关闭，传输已释放
    Closed,
    /// 失败，传输已释放
    Failed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    /// 是否仍持有传输
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Ready | Self::Executing
        )
    }

    /// 是否允许进入 Failed
    pub fn can_fail(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Executing
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
