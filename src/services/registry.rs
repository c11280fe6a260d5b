// 服务器注册表
//
// 持有 ServerRecord，在边界处校验输入，删除时级联清理凭据、同步目标和服务器锁。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{
    CredentialPresence, NewServer, ServerId, ServerRecord, ServerUpdate, ValidationError,
};
use crate::ssh::ServerLocks;
use crate::sync::SyncStore;
use crate::vault::CredentialVault;

struct RegistryInner {
    servers: BTreeMap<ServerId, ServerRecord>,
    next_id: u64,
}

pub struct ServerRegistry {
    inner: RwLock<RegistryInner>,
    vault: Arc<CredentialVault>,
    configs: Arc<SyncStore>,
    locks: ServerLocks,
}

impl ServerRegistry {
    pub fn new(vault: Arc<CredentialVault>, configs: Arc<SyncStore>, locks: ServerLocks) -> Self {
        Self::from_records(Vec::new(), vault, configs, locks)
    }

    /// 从持久化记录恢复
    pub fn from_records(
        records: Vec<ServerRecord>,
        vault: Arc<CredentialVault>,
        configs: Arc<SyncStore>,
        locks: ServerLocks,
    ) -> Self {
        let next_id = records.iter().map(|s| s.id.0).max().unwrap_or(0) + 1;
        Self {
            inner: RwLock::new(RegistryInner {
                servers: records.into_iter().map(|s| (s.id, s)).collect(),
                next_id,
            }),
            vault,
            configs,
            locks,
        }
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    pub fn locks(&self) -> &ServerLocks {
        &self.locks
    }

    /// 注册服务器
    ///
    /// 既无密码也无私钥的请求在到达保险库之前即被拒绝。
    pub fn register(&self, request: NewServer) -> Result<ServerRecord> {
        request.validate()?;

        let mut inner = self.inner.write();
        ensure_unique_name(&inner, &request.name, None)?;

        let id = ServerId(inner.next_id);
        let stored = self.vault.store(
            id,
            request.password.as_deref(),
            request.private_key.as_deref(),
        )?;
        inner.next_id += 1;

        let record = ServerRecord {
            id,
            name: request.name.trim().to_string(),
            hostname: request.hostname.trim().to_string(),
            port: request.port,
            username: request.username.trim().to_string(),
            description: request.description.filter(|d| !d.trim().is_empty()),
            credentials: stored,
            created_at: Utc::now(),
            updated_at: None,
        };
        inner.servers.insert(id, record.clone());

        info!(
            "[Registry] Registered server {} '{}' ({}, {:?})",
            id,
            record.name,
            record.address(),
            record.credentials
        );
        Ok(record)
    }

    /// 编辑服务器
    pub fn update(&self, id: ServerId, update: ServerUpdate) -> Result<ServerRecord> {
        update.validate()?;

        let mut inner = self.inner.write();
        let current = inner
            .servers
            .get(&id)
            .map(|s| s.credentials)
            .ok_or(Error::ServerNotFound(id))?;
        if let Some(name) = &update.name {
            ensure_unique_name(&inner, name, Some(id))?;
        }

        let credentials = if update.touches_credentials() {
            // 先在元数据上判断结果是否为空，空则不触碰保险库
            CredentialPresence::after_update(Some(current), &update.password, &update.private_key)
                .ok_or(ValidationError::NoCredentials)?;
            self.vault
                .update(id, &update.password, &update.private_key)?
        } else {
            current
        };

        let record = inner
            .servers
            .get_mut(&id)
            .ok_or(Error::ServerNotFound(id))?;
        if let Some(name) = update.name {
            record.name = name.trim().to_string();
        }
        if let Some(hostname) = update.hostname {
            record.hostname = hostname.trim().to_string();
        }
        if let Some(port) = update.port {
            record.port = port;
        }
        if let Some(username) = update.username {
            record.username = username.trim().to_string();
        }
        if let Some(description) = update.description {
            record.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        record.credentials = credentials;
        record.updated_at = Some(Utc::now());

        info!("[Registry] Updated server {} '{}'", id, record.name);
        Ok(record.clone())
    }

    /// 删除服务器，级联删除凭据和同步目标
    pub fn delete(&self, id: ServerId) -> Result<ServerRecord> {
        let record = self
            .inner
            .write()
            .servers
            .remove(&id)
            .ok_or(Error::ServerNotFound(id))?;

        self.vault.remove(id);
        let configs = self.configs.remove_for_server(id);
        self.locks.forget(id);

        info!(
            "[Registry] Deleted server {} '{}' ({} sync targets removed)",
            id, record.name, configs
        );
        Ok(record)
    }

    pub fn get(&self, id: ServerId) -> Option<ServerRecord> {
        self.inner.read().servers.get(&id).cloned()
    }

    /// 解析服务器连接参数
    pub fn resolve(&self, id: ServerId) -> Result<ServerRecord> {
        self.get(id).ok_or(Error::ServerNotFound(id))
    }

    pub fn list(&self) -> Vec<ServerRecord> {
        self.inner.read().servers.values().cloned().collect()
    }

    pub fn has_password(&self, id: ServerId) -> bool {
        self.vault.has_password(id)
    }

    pub fn has_private_key(&self, id: ServerId) -> bool {
        self.vault.has_private_key(id)
    }
}

fn ensure_unique_name(
    inner: &RegistryInner,
    name: &str,
    except: Option<ServerId>,
) -> Result<(), ValidationError> {
    let name = name.trim();
    if inner
        .servers
        .values()
        .any(|s| s.name == name && Some(s.id) != except)
    {
        return Err(ValidationError::DuplicateName(name.to_string()));
    }
    Ok(())
}
