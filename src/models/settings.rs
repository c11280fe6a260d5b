// Settings 配置数据结构

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, env};

// ======================== 主配置结构 ========================

/// 应用设置（持久化用）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub connection: ConnectionSettings,
    pub sync: SyncSettings,
    pub vault: VaultSettings,
}

// ======================== 连接设置 ========================

/// 主机密钥校验策略
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// 首次连接时记录指纹，之后必须一致
    #[default]
    TrustOnFirstUse,
    /// 只接受 known hosts 中已有的指纹
    Strict,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connection_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub host_key_policy: HostKeyPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: defaults::CONNECT_TIMEOUT_SECS,
            keepalive_interval_secs: 60,
            host_key_policy: HostKeyPolicy::TrustOnFirstUse,
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

// ======================== 同步设置 ========================

/// 快照过期策略
///
/// 连续失败达到阈值后将同步记录标记为 stale，快照本身保留。
/// None 表示从不标记。
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StalenessPolicy {
    pub max_consecutive_failures: Option<u32>,
}

impl StalenessPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn after_failures(max: u32) -> Self {
        Self {
            max_consecutive_failures: Some(max),
        }
    }

    /// 给定连续失败次数判断是否过期
    pub fn is_stale(&self, consecutive_failures: u32) -> bool {
        self.max_consecutive_failures
            .is_some_and(|max| consecutive_failures >= max.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub default_config_path: String,
    pub fetch_timeout_secs: u64,
    pub staleness: StalenessPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_config_path: defaults::CONFIG_PATH.to_string(),
            fetch_timeout_secs: defaults::FETCH_TIMEOUT_SECS,
            staleness: StalenessPolicy::disabled(),
        }
    }
}

impl SyncSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

// ======================== 凭据库设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// 读取主密钥的环境变量名
    pub master_key_env: String,
    /// 启动时校验所有密文能否用当前密钥解开
    pub verify_on_load: bool,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            master_key_env: env::MASTER_KEY.to_string(),
            verify_on_load: true,
        }
    }
}
