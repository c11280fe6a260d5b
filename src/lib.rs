// ShellMaster 同步核心
//
// 凭据保险库、SSH 会话与远程命令执行、远程配置文件同步。

pub mod constants;
pub mod error;
pub mod models;
pub mod services;
pub mod ssh;
pub mod sync;
pub mod vault;

pub use error::{Error, ErrorKind, Result};
pub use models::{
    AppSettings, NewServer, NewSyncTarget, ServerId, ServerRecord, SyncedConfig, SyncedConfigId,
};
pub use services::{RemoteExecutor, ServerRegistry};
pub use ssh::{CommandOutcome, CommandResult, HostTrust, RusshConnector, SshSession};
pub use sync::{ConfigSyncEngine, Document, SyncStore};
pub use vault::{CredentialVault, MasterKey};
