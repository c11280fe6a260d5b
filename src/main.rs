// ShellMaster 同步工具
// 加载本地状态，拉取所有同步目标并输出摘要

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use shellmaster_sync::models::AppSettings;
use shellmaster_sync::services::storage::{self, PersistedState};
use shellmaster_sync::ssh::ServerLocks;
use shellmaster_sync::vault::VaultConfig;
use shellmaster_sync::{
    ConfigSyncEngine, CredentialVault, HostTrust, MasterKey, RemoteExecutor, RusshConnector,
    ServerRegistry, SyncStore,
};

/// 从环境变量读取主密钥
fn load_master_key(settings: &AppSettings) -> Result<MasterKey> {
    let name = &settings.vault.master_key_env;
    let encoded = std::env::var(name).with_context(|| format!("环境变量 {} 未设置", name))?;
    MasterKey::from_base64(encoded.trim())
        .with_context(|| format!("环境变量 {} 不是有效的主密钥", name))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志系统
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    // .env 文件不存在时忽略
    let _ = dotenvy::dotenv();

    let dir = storage::get_config_dir()?;
    let settings = storage::load_settings(&dir)?;
    let master_key = load_master_key(&settings)?;
    let state = storage::load_state(&dir)?;
    let known_hosts = storage::load_known_hosts(&dir)?;

    let vault = Arc::new(CredentialVault::new(VaultConfig { master_key }));
    vault.import(state.credentials);
    if settings.vault.verify_on_load {
        vault.verify_all().context("主密钥无法解密已保存的凭据")?;
    }
    info!(
        "[Main] Loaded {} servers, {} sync targets (key {})",
        state.servers.len(),
        state.sync_targets.len(),
        vault.key_fingerprint()
    );

    let configs = Arc::new(SyncStore::from_records(state.sync_targets));
    let registry = Arc::new(ServerRegistry::from_records(
        state.servers,
        vault.clone(),
        configs.clone(),
        ServerLocks::new(),
    ));
    let trust = HostTrust::new(known_hosts, settings.connection.host_key_policy);
    let executor = Arc::new(RemoteExecutor::new(
        registry.clone(),
        Arc::new(RusshConnector::new(trust.clone())),
        settings.connection.clone(),
    ));
    let engine = ConfigSyncEngine::new(executor, configs.clone(), settings.sync.clone());

    let results = engine.fetch_all(settings.sync.fetch_timeout()).await;
    let mut failed = 0;
    for (id, result) in &results {
        match result {
            Ok(config) => {
                let nodes = engine
                    .xrayr_summary(*id)
                    .ok()
                    .flatten()
                    .map(|summary| summary.nodes.len())
                    .unwrap_or(0);
                let parse_error = config
                    .snapshot
                    .as_ref()
                    .and_then(|s| s.parse_error.as_ref());
                let status = match parse_error {
                    Some(error) => format!("invalid ({})", error),
                    None => format!("ok, {} nodes", nodes),
                };
                println!("{:>4}  {:<24} {:<32} {}", id.0, config.name, config.path, status);
            }
            Err(e) => {
                failed += 1;
                let (name, path) = configs
                    .get(*id)
                    .map(|c| (c.name, c.path))
                    .unwrap_or_default();
                println!(
                    "{:>4}  {:<24} {:<32} failed ({:?}): {}",
                    id.0,
                    name,
                    path,
                    e.kind(),
                    e
                );
            }
        }
    }
    println!("{} targets, {} failed", results.len(), failed);

    let persisted = PersistedState {
        servers: registry.list(),
        credentials: vault.export(),
        sync_targets: configs.list(),
    };
    storage::save_state(&dir, &persisted)?;
    storage::save_known_hosts(&dir, &trust.snapshot())?;
    // 写回补全默认值后的设置，便于手动编辑
    storage::save_settings(&dir, &settings)?;

    if failed > 0 {
        warn!("[Main] {} of {} sync targets failed", failed, results.len());
    }
    Ok(())
}
