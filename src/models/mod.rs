// 数据模型模块

pub mod known_hosts;
pub mod server;
pub mod settings;
pub mod synced_config;

pub use known_hosts::{KnownHost, KnownHostsConfig};
pub use server::{
    CredentialPresence, NewServer, SecretUpdate, ServerId, ServerRecord, ServerUpdate,
    ValidationError,
};
pub use settings::{
    AppSettings, ConnectionSettings, HostKeyPolicy, StalenessPolicy, SyncSettings, VaultSettings,
};
pub use synced_config::{NewSyncTarget, SyncTargetUpdate, SyncedConfig, SyncedConfigId};
