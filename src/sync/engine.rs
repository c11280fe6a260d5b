// 配置同步引擎
//
// 读取远程文件、解析为文档、维护同步元数据并推送修改后的文档。
// 引擎不管理远程文件的生命周期：删除同步目标只删除本地元数据。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::constants::remote;
use crate::error::{Error, Result};
use crate::models::synced_config::validate_remote_path;
use crate::models::{
    NewSyncTarget, ServerId, SyncSettings, SyncTargetUpdate, SyncedConfig, SyncedConfigId,
};
use crate::services::RemoteExecutor;
use crate::ssh::CommandResult;

use super::commands;
use super::document::{parse_yaml, raw_hash, Document};
use super::store::SyncStore;
use super::xrayr::{self, XrayrSummary};

pub struct ConfigSyncEngine {
    executor: Arc<RemoteExecutor>,
    store: Arc<SyncStore>,
    settings: SyncSettings,
}

impl ConfigSyncEngine {
    pub fn new(executor: Arc<RemoteExecutor>, store: Arc<SyncStore>, settings: SyncSettings) -> Self {
        Self {
            executor,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<SyncStore> {
        &self.store
    }

    // ======================== 元数据 ========================

    /// 注册同步目标（不访问远程主机）
    pub fn register(&self, target: NewSyncTarget) -> Result<SyncedConfig> {
        self.executor.registry().resolve(target.server_id)?;
        let config = self.store.register(target)?;
        info!(
            "[Sync] Registered target {} '{}' on server {} ({})",
            config.id, config.name, config.server_id, config.path
        );
        Ok(config)
    }

    /// 以默认路径注册 XrayR 配置文件
    pub fn register_xrayr(&self, server_id: ServerId, name: &str) -> Result<SyncedConfig> {
        self.register(NewSyncTarget {
            server_id,
            name: name.to_string(),
            path: self.settings.default_config_path.clone(),
            description: Some("XrayR".to_string()),
        })
    }

    /// 修改元数据；修改路径后需要调用方显式 fetch
    pub fn update(&self, id: SyncedConfigId, update: SyncTargetUpdate) -> Result<SyncedConfig> {
        self.store.update(id, update)
    }

    /// 删除元数据，远程文件保持不变
    pub fn delete(&self, id: SyncedConfigId) -> Result<SyncedConfig> {
        let config = self.store.delete(id)?;
        info!("[Sync] Deleted target {} '{}'", config.id, config.name);
        Ok(config)
    }

    pub fn get(&self, id: SyncedConfigId) -> Result<SyncedConfig> {
        self.store.get(id).ok_or(Error::SyncTargetNotFound(id))
    }

    pub fn list(&self) -> Vec<SyncedConfig> {
        self.store.list()
    }

    // ======================== 远程操作 ========================

    /// 拉取并解析远程文件
    ///
    /// 内容无法解析时仍然算作一次成功的同步，错误记录在快照中。
    /// SSH 层失败时快照、时间戳和哈希保持不变，只增加连续失败计数。
    /// 结果在服务器锁内记录，同一目标的多次拉取按执行顺序生效。
    pub async fn fetch(&self, id: SyncedConfigId, timeout: Duration) -> Result<SyncedConfig> {
        let target = self.get(id)?;
        debug!(
            "[Sync] Fetching {} from server {}",
            target.path, target.server_id
        );

        self.executor
            .execute_checked_then(
                target.server_id,
                &commands::read_command(&target.path),
                None,
                timeout,
                |outcome| match outcome.and_then(|result| read_output(&target, result)) {
                    Ok(raw) => self.record_success(id, &raw),
                    Err(e) => {
                        warn!(
                            "[Sync] Fetch of target {} ({}) failed: {}",
                            id, target.path, e
                        );
                        if let Err(bookkeeping) = self.record_failure(id) {
                            debug!(
                                "[Sync] Could not record failure for target {}: {}",
                                id, bookkeeping
                            );
                        }
                        Err(e)
                    }
                },
            )
            .await
    }

    /// 并发拉取所有同步目标（不同服务器并行，同一服务器按锁排队）
    pub async fn fetch_all(&self, timeout: Duration) -> Vec<(SyncedConfigId, Result<SyncedConfig>)> {
        let ids: Vec<SyncedConfigId> = self.store.list().into_iter().map(|c| c.id).collect();
        let results = join_all(ids.iter().map(|id| self.fetch(*id, timeout))).await;
        ids.into_iter().zip(results).collect()
    }

    /// 检查同步目标对应的远程文件是否存在，不修改任何记录
    pub async fn check_exists(&self, id: SyncedConfigId, timeout: Duration) -> Result<bool> {
        let target = self.get(id)?;
        self.check_path_exists(target.server_id, &target.path, timeout)
            .await
    }

    /// 检查任意路径是否存在（注册前校验路径用）
    pub async fn check_path_exists(
        &self,
        server_id: ServerId,
        path: &str,
        timeout: Duration,
    ) -> Result<bool> {
        validate_remote_path(path)?;
        let result = self
            .executor
            .execute_checked(server_id, &commands::exists_command(path), None, timeout)
            .await?;
        match result.exit_status {
            0 => Ok(true),
            1 => Ok(false),
            status => Err(Error::RemoteCommand {
                status,
                stderr: result.stderr_string(),
            }),
        }
    }

    /// 渲染文档并写回远程文件，成功后视为一次同步
    pub async fn push(
        &self,
        id: SyncedConfigId,
        document: &Document,
        timeout: Duration,
    ) -> Result<SyncedConfig> {
        let target = self.get(id)?;
        let rendered = document
            .to_yaml_string()
            .map_err(|e| Error::Render(e.to_string()))?;

        info!(
            "[Sync] Pushing {} bytes to {} on server {}",
            rendered.len(),
            target.path,
            target.server_id
        );
        self.executor
            .execute_checked_then(
                target.server_id,
                &commands::write_command(&target.path),
                Some(rendered.as_bytes()),
                timeout,
                |outcome| -> Result<SyncedConfig> {
                    let result = outcome?;
                    if !result.is_success() {
                        warn!(
                            "[Sync] Push to {} exited with status {}",
                            target.path, result.exit_status
                        );
                        return Err(Error::RemoteCommand {
                            status: result.exit_status,
                            stderr: result.stderr_string(),
                        });
                    }
                    self.record_success(id, rendered.as_bytes())
                },
            )
            .await
    }

    /// 最近一次快照的 XrayR 摘要，尚未同步或内容无法解析时为 None
    pub fn xrayr_summary(&self, id: SyncedConfigId) -> Result<Option<XrayrSummary>> {
        let config = self.get(id)?;
        Ok(config
            .snapshot
            .and_then(|snapshot| snapshot.root)
            .map(|root| xrayr::simplify(&root)))
    }

    /// 校验 XrayR 摘要后展开推送
    pub async fn push_xrayr(
        &self,
        id: SyncedConfigId,
        summary: &XrayrSummary,
        timeout: Duration,
    ) -> Result<SyncedConfig> {
        xrayr::validate(summary)?;
        self.push(id, &xrayr::expand(summary), timeout).await
    }

    // ======================== 状态记录 ========================

    fn record_success(&self, id: SyncedConfigId, raw: &[u8]) -> Result<SyncedConfig> {
        let snapshot = parse_yaml(raw);
        let hash = match &snapshot.root {
            Some(root) => root.content_hash(),
            None => raw_hash(raw),
        };
        if let Some(error) = &snapshot.parse_error {
            warn!("[Sync] Target {} content could not be parsed: {}", id, error);
        }

        let now = Utc::now();
        let config = self.store.modify(id, |config| {
            if config.content_hash.as_deref() != Some(hash.as_str()) {
                config.last_changed_at = Some(now);
            }
            config.raw_content = Some(String::from_utf8_lossy(raw).into_owned());
            config.snapshot = Some(snapshot);
            config.content_hash = Some(hash);
            config.last_sync_at = Some(now);
            config.consecutive_failures = 0;
            config.stale = false;
        })?;

        info!(
            "[Sync] Target {} synced ({} bytes, changed: {})",
            id,
            raw.len(),
            config.last_changed_at == Some(now)
        );
        Ok(config)
    }

    fn record_failure(&self, id: SyncedConfigId) -> Result<SyncedConfig> {
        let policy = self.settings.staleness;
        self.store.modify(id, |config| {
            config.consecutive_failures = config.consecutive_failures.saturating_add(1);
            if !config.stale && policy.is_stale(config.consecutive_failures) {
                warn!(
                    "[Sync] Target {} marked stale after {} consecutive failures",
                    config.id, config.consecutive_failures
                );
                config.stale = true;
            }
        })
    }
}

/// 读取命令的退出码：0 成功，66 文件不存在
fn read_output(target: &SyncedConfig, result: CommandResult) -> Result<Vec<u8>> {
    match result.exit_status {
        0 => Ok(result.stdout),
        remote::MISSING_FILE_EXIT => Err(Error::ConfigNotFound {
            path: target.path.clone(),
        }),
        status => Err(Error::RemoteCommand {
            status,
            stderr: result.stderr_string(),
        }),
    }
}
