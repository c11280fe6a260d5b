// SSH 连接模块
//
// 模块结构:
// - config: 连接配置 (SshConfig, KeepaliveConfig)
// - error: 错误类型 (SshError)
// - state: 会话状态机 (SessionState)
// - trust: 主机信任 (HostTrust)
// - handler: russh Handler 实现
// - transport: 传输接缝 (SshConnector, SshTransport) 与 russh 实现
// - session: 会话 (SshSession, CommandResult)
// - locks: 按服务器串行化 (ServerLocks)

pub mod config;
pub mod error;
pub mod handler;
pub mod locks;
pub mod session;
pub mod state;
pub mod transport;
pub mod trust;

#[cfg(test)]
pub(crate) mod testing;

// 公开导出
pub use config::{KeepaliveConfig, SshConfig};
pub use error::SshError;
pub use locks::ServerLocks;
pub use session::{AuthMethod, CommandOutcome, CommandResult, SshSession};
pub use state::SessionState;
pub use transport::{AuthAttempt, OutputBuffer, RusshConnector, SshConnector, SshTransport};
pub use trust::HostTrust;
