// Server 数据结构与边界校验

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{defaults, limits};

/// 服务器 ID（由注册表分配，创建后不可变）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub u64);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 凭据组合，在校验时计算一次并随记录携带
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialPresence {
    PasswordOnly,
    KeyOnly,
    Both,
}

impl CredentialPresence {
    /// 两者都没有时返回 None
    pub fn from_flags(has_password: bool, has_private_key: bool) -> Option<Self> {
        match (has_password, has_private_key) {
            (true, true) => Some(Self::Both),
            (true, false) => Some(Self::PasswordOnly),
            (false, true) => Some(Self::KeyOnly),
            (false, false) => None,
        }
    }

    pub fn has_password(self) -> bool {
        matches!(self, Self::PasswordOnly | Self::Both)
    }

    pub fn has_private_key(self) -> bool {
        matches!(self, Self::KeyOnly | Self::Both)
    }

    /// 计算应用更新后的凭据组合
    pub fn after_update(
        current: Option<Self>,
        password: &SecretUpdate,
        private_key: &SecretUpdate,
    ) -> Option<Self> {
        let had_password = current.is_some_and(Self::has_password);
        let had_key = current.is_some_and(Self::has_private_key);
        Self::from_flags(password.resolve(had_password), private_key.resolve(had_key))
    }
}

/// 单个密钥字段的更新意图
#[derive(Clone, Default, PartialEq, Eq)]
pub enum SecretUpdate {
    /// 保持原值
    #[default]
    Keep,
    /// 替换为新值
    Set(String),
    /// 显式清除
    Clear,
}

impl SecretUpdate {
    /// 表单输入转换：缺省或空字符串都表示保持不变
    pub fn from_input(value: Option<String>) -> Self {
        match value {
            Some(v) if !v.is_empty() => Self::Set(v),
            _ => Self::Keep,
        }
    }

    /// 给定原来是否存在，返回更新后是否存在
    fn resolve(&self, existed: bool) -> bool {
        match self {
            Self::Keep => existed,
            Self::Set(v) => !v.is_empty() || existed,
            Self::Clear => false,
        }
    }
}

impl fmt::Debug for SecretUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => f.write_str("Keep"),
            Self::Set(_) => f.write_str("Set(<redacted>)"),
            Self::Clear => f.write_str("Clear"),
        }
    }
}

/// 服务器记录（不含任何明文凭据）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub description: Option<String>,
    pub credentials: CredentialPresence,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ServerRecord {
    pub fn has_password(&self) -> bool {
        self.credentials.has_password()
    }

    pub fn has_private_key(&self) -> bool {
        self.credentials.has_private_key()
    }

    /// host:port 形式的地址，用于日志和 known hosts
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// 新建服务器请求
#[derive(Clone)]
pub struct NewServer {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub description: Option<String>,
    pub password: Option<String>,
    pub private_key: Option<String>,
}

impl Default for NewServer {
    fn default() -> Self {
        Self {
            name: String::new(),
            hostname: String::new(),
            port: defaults::SSH_PORT,
            username: String::new(),
            description: None,
            password: None,
            private_key: None,
        }
    }
}

impl fmt::Debug for NewServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewServer")
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("description", &self.description)
            .field("has_password", &non_empty(&self.password))
            .field("has_private_key", &non_empty(&self.private_key))
            .finish()
    }
}

impl NewServer {
    /// 校验字段并计算凭据组合
    pub fn validate(&self) -> Result<CredentialPresence, ValidationError> {
        check_text("name", &self.name, limits::SERVER_NAME_MAX)?;
        check_text("hostname", &self.hostname, limits::HOSTNAME_MAX)?;
        check_port(self.port)?;
        check_text("username", &self.username, limits::USERNAME_MAX)?;

        CredentialPresence::from_flags(non_empty(&self.password), non_empty(&self.private_key))
            .ok_or(ValidationError::NoCredentials)
    }
}

/// 编辑服务器请求，None 表示字段不变
#[derive(Clone, Debug, Default)]
pub struct ServerUpdate {
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    /// Some("") 清除描述
    pub description: Option<String>,
    pub password: SecretUpdate,
    pub private_key: SecretUpdate,
}

impl ServerUpdate {
    /// 只校验提供了的字段
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            check_text("name", name, limits::SERVER_NAME_MAX)?;
        }
        if let Some(hostname) = &self.hostname {
            check_text("hostname", hostname, limits::HOSTNAME_MAX)?;
        }
        if let Some(port) = self.port {
            check_port(port)?;
        }
        if let Some(username) = &self.username {
            check_text("username", username, limits::USERNAME_MAX)?;
        }
        Ok(())
    }

    /// 是否涉及凭据变更
    pub fn touches_credentials(&self) -> bool {
        self.password != SecretUpdate::Keep || self.private_key != SecretUpdate::Keep
    }
}

/// 边界校验错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("at least one of password or private key is required")]
    NoCredentials,

    #[error("name already in use: {0}")]
    DuplicateName(String),

    #[error("invalid remote path: {0}")]
    InvalidPath(String),
}

pub(crate) fn check_text(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

fn check_port(port: u16) -> Result<(), ValidationError> {
    if port == 0 {
        return Err(ValidationError::InvalidPort);
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}
