// 同步目标元数据存储
//
// 纯本地的增删改查；快照字段只由引擎在同步成功或失败时通过 modify 修改。

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::models::{
    NewSyncTarget, ServerId, SyncTargetUpdate, SyncedConfig, SyncedConfigId, ValidationError,
};

struct StoreInner {
    configs: BTreeMap<SyncedConfigId, SyncedConfig>,
    next_id: u64,
}

/// 同步目标表
pub struct SyncStore {
    inner: RwLock<StoreInner>,
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::from_records(Vec::new())
    }
}

impl SyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从持久化记录恢复
    pub fn from_records(records: Vec<SyncedConfig>) -> Self {
        let next_id = records.iter().map(|c| c.id.0).max().unwrap_or(0) + 1;
        let configs = records.into_iter().map(|c| (c.id, c)).collect();
        Self {
            inner: RwLock::new(StoreInner { configs, next_id }),
        }
    }

    /// 注册同步目标（同一服务器下名称唯一）
    pub fn register(&self, target: NewSyncTarget) -> Result<SyncedConfig> {
        target.validate()?;

        let mut inner = self.inner.write();
        ensure_unique_name(&inner, target.server_id, &target.name, None)?;

        let id = SyncedConfigId(inner.next_id);
        inner.next_id += 1;

        let config = SyncedConfig {
            id,
            server_id: target.server_id,
            name: target.name.trim().to_string(),
            path: target.path,
            description: target.description.filter(|d| !d.trim().is_empty()),
            last_sync_at: None,
            raw_content: None,
            snapshot: None,
            content_hash: None,
            last_changed_at: None,
            consecutive_failures: 0,
            stale: false,
            created_at: Utc::now(),
            updated_at: None,
        };
        inner.configs.insert(id, config.clone());
        Ok(config)
    }

    /// 修改元数据；修改路径不会触发重新拉取
    pub fn update(&self, id: SyncedConfigId, update: SyncTargetUpdate) -> Result<SyncedConfig> {
        update.validate()?;

        let mut inner = self.inner.write();
        let server_id = inner
            .configs
            .get(&id)
            .map(|c| c.server_id)
            .ok_or(Error::SyncTargetNotFound(id))?;
        if let Some(name) = &update.name {
            ensure_unique_name(&inner, server_id, name, Some(id))?;
        }

        let config = inner
            .configs
            .get_mut(&id)
            .ok_or(Error::SyncTargetNotFound(id))?;
        if let Some(name) = update.name {
            config.name = name.trim().to_string();
        }
        if let Some(path) = update.path {
            config.path = path;
        }
        if let Some(description) = update.description {
            config.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        config.updated_at = Some(Utc::now());
        Ok(config.clone())
    }

    /// 删除元数据，不触碰远程文件
    pub fn delete(&self, id: SyncedConfigId) -> Result<SyncedConfig> {
        self.inner
            .write()
            .configs
            .remove(&id)
            .ok_or(Error::SyncTargetNotFound(id))
    }

    /// 删除服务器下的所有同步目标，返回删除数量
    pub fn remove_for_server(&self, server_id: ServerId) -> usize {
        let mut inner = self.inner.write();
        let before = inner.configs.len();
        inner.configs.retain(|_, c| c.server_id != server_id);
        before - inner.configs.len()
    }

    pub fn get(&self, id: SyncedConfigId) -> Option<SyncedConfig> {
        self.inner.read().configs.get(&id).cloned()
    }

    pub fn find(&self, server_id: ServerId, name: &str) -> Option<SyncedConfig> {
        self.inner
            .read()
            .configs
            .values()
            .find(|c| c.server_id == server_id && c.name == name.trim())
            .cloned()
    }

    pub fn list(&self) -> Vec<SyncedConfig> {
        self.inner.read().configs.values().cloned().collect()
    }

    pub fn list_for_server(&self, server_id: ServerId) -> Vec<SyncedConfig> {
        self.inner
            .read()
            .configs
            .values()
            .filter(|c| c.server_id == server_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().configs.is_empty()
    }

    /// 在写锁内读改写一条记录
    pub(crate) fn modify<F>(&self, id: SyncedConfigId, f: F) -> Result<SyncedConfig>
    where
        F: FnOnce(&mut SyncedConfig),
    {
        let mut inner = self.inner.write();
        let config = inner
            .configs
            .get_mut(&id)
            .ok_or(Error::SyncTargetNotFound(id))?;
        f(config);
        Ok(config.clone())
    }
}

fn ensure_unique_name(
    inner: &StoreInner,
    server_id: ServerId,
    name: &str,
    except: Option<SyncedConfigId>,
) -> Result<(), ValidationError> {
    let name = name.trim();
    let taken = inner
        .configs
        .values()
        .any(|c| c.server_id == server_id && c.name == name && Some(c.id) != except);
    if taken {
        return Err(ValidationError::DuplicateName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(server: u64, name: &str) -> NewSyncTarget {
        NewSyncTarget {
            server_id: ServerId(server),
            name: name.to_string(),
            path: "/etc/XrayR/config.yml".to_string(),
            description: None,
        }
    }

    #[test]
    fn test_register_assigns_ids() {
        let store = SyncStore::new();
        let a = store.register(target(1, "xrayr")).unwrap();
        let b = store.register(target(2, "xrayr")).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.last_sync_at.is_none());
        assert!(a.snapshot.is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_names_unique_per_server() {
        let store = SyncStore::new();
        store.register(target(1, "xrayr")).unwrap();
        let err = store.register(target(1, " xrayr ")).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DuplicateName(_))
        ));

        let other = store.register(target(1, "nginx")).unwrap();
        let err = store
            .update(
                other.id,
                SyncTargetUpdate {
                    name: Some("xrayr".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // 改成自己的名字不算冲突
        store
            .update(
                other.id,
                SyncTargetUpdate {
                    name: Some("nginx".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_update_path_keeps_snapshot() {
        let store = SyncStore::new();
        let config = store.register(target(1, "xrayr")).unwrap();
        store
            .modify(config.id, |c| c.raw_content = Some("a: 1\n".to_string()))
            .unwrap();

        let updated = store
            .update(
                config.id,
                SyncTargetUpdate {
                    path: Some("/opt/xrayr/config.yml".to_string()),
                    description: Some("moved".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.path, "/opt/xrayr/config.yml");
        assert_eq!(updated.raw_content.as_deref(), Some("a: 1\n"));
        assert_eq!(updated.description.as_deref(), Some("moved"));
        assert!(updated.updated_at.is_some());

        let err = store
            .update(
                config.id,
                SyncTargetUpdate {
                    path: Some("relative.yml".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_delete_and_cascade() {
        let store = SyncStore::new();
        let a = store.register(target(1, "a")).unwrap();
        store.register(target(1, "b")).unwrap();
        store.register(target(2, "a")).unwrap();

        store.delete(a.id).unwrap();
        assert!(matches!(
            store.delete(a.id),
            Err(Error::SyncTargetNotFound(_))
        ));

        assert_eq!(store.remove_for_server(ServerId(1)), 1);
        assert_eq!(store.list().len(), 1);
        assert!(store.list_for_server(ServerId(1)).is_empty());
    }

    #[test]
    fn test_restore_continues_ids() {
        let store = SyncStore::new();
        store.register(target(1, "a")).unwrap();
        let b = store.register(target(1, "b")).unwrap();

        let restored = SyncStore::from_records(store.list());
        let c = restored.register(target(1, "c")).unwrap();
        assert!(c.id.0 > b.id.0);
        assert_eq!(restored.find(ServerId(1), "b").map(|c| c.id), Some(b.id));
    }
}
