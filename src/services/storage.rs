// 本地数据持久化服务
//
// state.json       服务器记录、密文表、同步目标
// settings.json    应用设置
// known_hosts.json 主机指纹
//
// 所有文件先写入同目录下的临时文件再 rename，避免写到一半的文件。

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{AppSettings, KnownHostsConfig, ServerRecord, SyncedConfig};
use crate::vault::StoredCredentials;

const STATE_FILE: &str = "state.json";
const SETTINGS_FILE: &str = "settings.json";
const KNOWN_HOSTS_FILE: &str = "known_hosts.json";

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/shellmaster
/// Linux: ~/.config/shellmaster
/// Windows: C:\Users\<用户名>\AppData\Roaming\shellmaster
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("无法获取系统配置目录")?
        .join("shellmaster");
    ensure_dir(&config_dir)?;
    Ok(config_dir)
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("无法创建配置目录 {}", dir.display()))?;
    }
    Ok(())
}

/// 持久化的核心状态（只含密文）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub servers: Vec<ServerRecord>,
    pub credentials: Vec<StoredCredentials>,
    pub sync_targets: Vec<SyncedConfig>,
}

fn load_json<T: DeserializeOwned + Default>(path: &Path, what: &str) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("无法读取{}文件", what))?;
    let value =
        serde_json::from_str(&content).with_context(|| format!("无法解析{}文件", what))?;
    Ok(value)
}

fn save_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let content =
        serde_json::to_string_pretty(value).with_context(|| format!("无法序列化{}", what))?;

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, content).with_context(|| format!("无法写入{}文件", what))?;
    fs::rename(&temp, path).with_context(|| format!("无法替换{}文件", what))?;
    Ok(())
}

// ======================== 核心状态 ========================

/// 加载核心状态
pub fn load_state(dir: &Path) -> Result<PersistedState> {
    load_json(&dir.join(STATE_FILE), "状态")
}

/// 保存核心状态
pub fn save_state(dir: &Path, state: &PersistedState) -> Result<()> {
    save_json(&dir.join(STATE_FILE), state, "状态")
}

// ======================== Settings 配置持久化 ========================

/// 加载应用设置
pub fn load_settings(dir: &Path) -> Result<AppSettings> {
    load_json(&dir.join(SETTINGS_FILE), "设置配置")
}

/// 保存应用设置
pub fn save_settings(dir: &Path, settings: &AppSettings) -> Result<()> {
    save_json(&dir.join(SETTINGS_FILE), settings, "设置配置")
}

// ======================== Known Hosts 持久化 ========================

/// 加载 Known Hosts
pub fn load_known_hosts(dir: &Path) -> Result<KnownHostsConfig> {
    load_json(&dir.join(KNOWN_HOSTS_FILE), "Known Hosts")
}

/// 保存 Known Hosts
pub fn save_known_hosts(dir: &Path, config: &KnownHostsConfig) -> Result<()> {
    save_json(&dir.join(KNOWN_HOSTS_FILE), config, "Known Hosts")
}
