// 凭据保险库错误类型
//
// 错误信息中不得包含任何明文

use thiserror::Error;

use crate::models::ServerId;

/// 保险库错误
#[derive(Debug, Error)]
pub enum VaultError {
    /// 加密失败（主密钥无效等）
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// 解密失败（密文被篡改、密钥错误或格式损坏）
    #[error("Decryption failed: {0}")]
    Decryption(#[from] DecryptFailure),

    /// 主密钥格式错误
    #[error("Invalid master key: {0}")]
    InvalidKey(String),

    /// 轮换时提供的旧密钥与当前密钥不一致
    #[error("Provided key does not match the active master key")]
    KeyMismatch,

    /// 服务器没有保存凭据
    #[error("No credentials stored for server {0}")]
    NotFound(ServerId),

    /// 写入后既无密码也无私钥
    #[error("At least one of password or private key is required")]
    Empty,
}

/// 解密失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecryptFailure {
    #[error("malformed ciphertext ({0})")]
    Malformed(&'static str),

    #[error("authentication tag did not verify")]
    Authentication,

    #[error("plaintext is not valid UTF-8")]
    Encoding,
}
