// Known Hosts 数据模型
// 用于存储和验证 SSH 服务器公钥指纹

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 已知主机条目
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnownHost {
    /// 主机地址（host:port 格式）
    pub host: String,
    /// 密钥类型（ssh-ed25519, ssh-rsa 等）
    pub key_type: String,
    /// SHA256 指纹
    pub fingerprint: String,
    /// 首次连接时间
    pub first_seen: DateTime<Utc>,
    /// 最后使用时间
    pub last_used: DateTime<Utc>,
}

/// 指纹比对结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostKeyCheck {
    /// 指纹一致
    Trusted,
    /// 从未见过的主机
    Unknown,
    /// 已记录的指纹与当前不同
    Mismatch { expected: String },
}

/// Known Hosts 配置
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KnownHostsConfig {
    pub hosts: Vec<KnownHost>,
}

impl KnownHostsConfig {
    pub fn find(&self, host: &str) -> Option<&KnownHost> {
        self.hosts.iter().find(|h| h.host == host)
    }

    /// 比对指纹
    pub fn check(&self, host: &str, fingerprint: &str) -> HostKeyCheck {
        match self.find(host) {
            None => HostKeyCheck::Unknown,
            Some(known) if known.fingerprint == fingerprint => HostKeyCheck::Trusted,
            Some(known) => HostKeyCheck::Mismatch {
                expected: known.fingerprint.clone(),
            },
        }
    }

    /// 记录新主机或刷新最后使用时间（不会覆盖已有的不同指纹）
    pub fn record(&mut self, host: &str, key_type: &str, fingerprint: &str) {
        let now = Utc::now();
        match self.hosts.iter_mut().find(|h| h.host == host) {
            Some(known) if known.fingerprint == fingerprint => known.last_used = now,
            Some(_) => {}
            None => self.hosts.push(KnownHost {
                host: host.to_string(),
                key_type: key_type.to_string(),
                fingerprint: fingerprint.to_string(),
                first_seen: now,
                last_used: now,
            }),
        }
    }

    /// 删除主机条目（服务器重装后由运维显式调用）
    pub fn forget(&mut self, host: &str) -> bool {
        let before = self.hosts.len();
        self.hosts.retain(|h| h.host != host);
        self.hosts.len() != before
    }
}
