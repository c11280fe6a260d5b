// 同步目标（远程配置文件）元数据

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::limits;
use crate::sync::document::ParsedSnapshot;

use super::server::{check_text, ServerId, ValidationError};

/// 同步目标 ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncedConfigId(pub u64);

impl fmt::Display for SyncedConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 每台服务器上一个命名配置文件的同步状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncedConfig {
    pub id: SyncedConfigId,
    pub server_id: ServerId,
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    /// 首次成功拉取前为 None
    pub last_sync_at: Option<DateTime<Utc>>,
    pub raw_content: Option<String>,
    pub snapshot: Option<ParsedSnapshot>,
    pub content_hash: Option<String>,
    /// 仅在内容哈希变化时推进
    pub last_changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// 注册同步目标请求
#[derive(Clone, Debug)]
pub struct NewSyncTarget {
    pub server_id: ServerId,
    pub name: String,
    pub path: String,
    pub description: Option<String>,
}

impl NewSyncTarget {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_text("name", &self.name, limits::CONFIG_NAME_MAX)?;
        validate_remote_path(&self.path)
    }
}

/// 修改同步目标请求，None 表示不变
#[derive(Clone, Debug, Default)]
pub struct SyncTargetUpdate {
    pub name: Option<String>,
    pub path: Option<String>,
    /// Some("") 清除描述
    pub description: Option<String>,
}

impl SyncTargetUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            check_text("name", name, limits::CONFIG_NAME_MAX)?;
        }
        if let Some(path) = &self.path {
            validate_remote_path(path)?;
        }
        Ok(())
    }
}

/// 远程路径必须是绝对路径，且不含会破坏命令行的字符
pub fn validate_remote_path(path: &str) -> Result<(), ValidationError> {
    if !path.starts_with('/') {
        return Err(ValidationError::InvalidPath(
            "path must start with '/'".to_string(),
        ));
    }
    if path.len() > limits::CONFIG_PATH_MAX {
        return Err(ValidationError::InvalidPath(format!(
            "path exceeds {} characters",
            limits::CONFIG_PATH_MAX
        )));
    }
    if path.ends_with('/') {
        return Err(ValidationError::InvalidPath(
            "path must name a file".to_string(),
        ));
    }
    if path.chars().any(|c| c == '\0' || c == '\n' || c == '\r') {
        return Err(ValidationError::InvalidPath(
            "path contains control characters".to_string(),
        ));
    }
    Ok(())
}
