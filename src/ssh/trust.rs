// 主机信任（known hosts 指纹校验）

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::models::known_hosts::HostKeyCheck;
use crate::models::{HostKeyPolicy, KnownHostsConfig};

use super::error::SshError;

/// 共享的 known hosts 表
#[derive(Clone, Default)]
pub struct HostTrust {
    hosts: Arc<RwLock<KnownHostsConfig>>,
    policy: HostKeyPolicy,
}

impl HostTrust {
    pub fn new(hosts: KnownHostsConfig, policy: HostKeyPolicy) -> Self {
        Self {
            hosts: Arc::new(RwLock::new(hosts)),
            policy,
        }
    }

    pub fn policy(&self) -> HostKeyPolicy {
        self.policy
    }

    /// 校验服务器公钥指纹，首次见到时按策略记录
    pub fn verify(&self, host: &str, key_type: &str, fingerprint: &str) -> Result<(), SshError> {
        let mut hosts = self.hosts.write();
        match hosts.check(host, fingerprint) {
            HostKeyCheck::Trusted => {
                hosts.record(host, key_type, fingerprint);
                Ok(())
            }
            HostKeyCheck::Unknown => match self.policy {
                HostKeyPolicy::TrustOnFirstUse => {
                    info!(
                        "[Trust] Recording new host {} ({} {})",
                        host, key_type, fingerprint
                    );
                    hosts.record(host, key_type, fingerprint);
                    Ok(())
                }
                HostKeyPolicy::Strict => {
                    warn!("[Trust] Rejecting unknown host {} ({})", host, fingerprint);
                    Err(SshError::HostKeyUnknown {
                        host: host.to_string(),
                        fingerprint: fingerprint.to_string(),
                    })
                }
            },
            HostKeyCheck::Mismatch { expected } => {
                warn!(
                    "[Trust] Host key mismatch for {}: expected {}, got {}",
                    host, expected, fingerprint
                );
                Err(SshError::HostKeyMismatch {
                    host: host.to_string(),
                    expected,
                    actual: fingerprint.to_string(),
                })
            }
        }
    }

    /// 当前表的副本（持久化用）
    pub fn snapshot(&self) -> KnownHostsConfig {
        self.hosts.read().clone()
    }

    /// 删除主机条目
    pub fn forget(&self, host: &str) -> bool {
        self.hosts.write().forget(host)
    }
}
