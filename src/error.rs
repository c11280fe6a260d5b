// 核心错误类型
//
// 各模块使用自己的错误枚举，这里统一包装，并提供 kind() 供边界层翻译成提示信息。

use thiserror::Error;

use crate::models::{ServerId, SyncedConfigId, ValidationError};
use crate::ssh::SshError;
use crate::sync::xrayr::XrayrError;
use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("Server {0} not found")]
    ServerNotFound(ServerId),

    #[error("Sync target {0} not found")]
    SyncTargetNotFound(SyncedConfigId),

    /// 存在性探测的否定结果，不是连接失败
    #[error("Remote file {path} does not exist")]
    ConfigNotFound { path: String },

    /// 命令已执行但以非零状态退出
    #[error("Remote command exited with status {status}: {stderr}")]
    RemoteCommand { status: i32, stderr: String },

    #[error("Failed to render document: {0}")]
    Render(String),

    #[error("Invalid XrayR configuration: {0}")]
    Xrayr(#[from] XrayrError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 错误类别
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Encryption,
    Decryption,
    KeyMismatch,
    NotFound,
    Network,
    Timeout,
    Auth,
    HostKey,
    Protocol,
    ConfigNotFound,
    RemoteCommand,
    InvalidState,
    InvalidDocument,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Vault(e) => match e {
                VaultError::Encryption(_) | VaultError::InvalidKey(_) => ErrorKind::Encryption,
                VaultError::Decryption(_) => ErrorKind::Decryption,
                VaultError::KeyMismatch => ErrorKind::KeyMismatch,
                VaultError::NotFound(_) => ErrorKind::NotFound,
                VaultError::Empty => ErrorKind::Validation,
            },
            Error::Ssh(e) => match e {
                SshError::Network(_) => ErrorKind::Network,
                SshError::Timeout { .. } => ErrorKind::Timeout,
                SshError::Auth(_) | SshError::Key(_) => ErrorKind::Auth,
                SshError::HostKeyMismatch { .. } | SshError::HostKeyUnknown { .. } => {
                    ErrorKind::HostKey
                }
                SshError::Protocol(_) | SshError::Channel(_) => ErrorKind::Protocol,
                SshError::InvalidState { .. } => ErrorKind::InvalidState,
            },
            Error::ServerNotFound(_) | Error::SyncTargetNotFound(_) => ErrorKind::NotFound,
            Error::ConfigNotFound { .. } => ErrorKind::ConfigNotFound,
            Error::RemoteCommand { .. } => ErrorKind::RemoteCommand,
            Error::Render(_) | Error::Xrayr(_) => ErrorKind::InvalidDocument,
        }
    }
}
