// 远程命令执行
//
// 一次逻辑操作：获取服务器锁 → 连接 → 解密凭据并认证（凭据随即释放）→ 执行 → 关闭。
// 期限从调用开始计算，排队等锁的时间也计入；锁一直持有到结果处理完毕。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::constants::remote;
use crate::error::{Error, Result};
use crate::models::{ConnectionSettings, ServerId, ServerRecord};
use crate::ssh::{CommandOutcome, CommandResult, SshConfig, SshConnector, SshError, SshSession};

use super::registry::ServerRegistry;

pub struct RemoteExecutor {
    registry: Arc<ServerRegistry>,
    connector: Arc<dyn SshConnector>,
    settings: ConnectionSettings,
}

/// 剩余时间；已耗尽时返回超时错误
fn remaining(deadline: Instant, stage: &'static str, total: Duration) -> Result<Duration, SshError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(SshError::Timeout {
            stage,
            after: total,
        });
    }
    Ok(left)
}

/// 只放行完整运行的命令结果
fn checked(server_id: ServerId, result: CommandResult, timeout: Duration) -> Result<CommandResult> {
    match result.outcome {
        CommandOutcome::Success | CommandOutcome::NonZeroExit => Ok(result),
        CommandOutcome::Timeout => Err(SshError::Timeout {
            stage: "execute",
            after: timeout,
        }
        .into()),
        CommandOutcome::NetworkFailure | CommandOutcome::AuthFailure => Err(SshError::Network(
            format!("connection lost while running command on server {}", server_id),
        )
        .into()),
    }
}

impl RemoteExecutor {
    pub fn new(
        registry: Arc<ServerRegistry>,
        connector: Arc<dyn SshConnector>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            registry,
            connector,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// 执行命令，连接或认证失败也以 CommandResult 的 outcome 报告
    ///
    /// 只有服务器不存在、凭据无法解密等本地错误才返回 Err。
    pub async fn run_command(
        &self,
        server_id: ServerId,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let started = Instant::now();
        self.execute_then(server_id, command, None, timeout, |outcome| match outcome {
            Ok(result) => Ok(result),
            Err(Error::Ssh(e)) => Ok(CommandResult::from_error(&e, started.elapsed())),
            Err(e) => Err(e),
        })
        .await
    }

    /// 执行命令，命令未能完整运行时返回 SSH 错误
    ///
    /// 返回的结果 outcome 只会是 Success 或 NonZeroExit。
    pub async fn execute_checked(
        &self,
        server_id: ServerId,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandResult> {
        self.execute_checked_then(server_id, command, stdin, timeout, |outcome| outcome)
            .await
    }

    /// 同 execute_checked，`finish` 在仍持有服务器锁时处理结果
    ///
    /// 同一服务器上的结果按执行顺序被处理。
    pub async fn execute_checked_then<T, F>(
        &self,
        server_id: ServerId,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
        finish: F,
    ) -> T
    where
        F: FnOnce(Result<CommandResult>) -> T,
    {
        self.execute_then(server_id, command, stdin, timeout, move |outcome| {
            finish(outcome.and_then(|result| checked(server_id, result, timeout)))
        })
        .await
    }

    /// 连接测试：认证后回显固定字符串
    pub async fn test_connection(&self, server_id: ServerId, timeout: Duration) -> Result<CommandResult> {
        let command = format!("echo {}", remote::PROBE_ECHO);
        let mut result = self.run_command(server_id, &command, timeout).await?;
        if result.is_success() && result.stdout_string().trim() != remote::PROBE_ECHO {
            warn!("[Executor] Unexpected probe output from server {}", server_id);
            result.outcome = CommandOutcome::NonZeroExit;
        }
        Ok(result)
    }

    async fn execute_then<T, F>(
        &self,
        server_id: ServerId,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
        finish: F,
    ) -> T
    where
        F: FnOnce(Result<CommandResult>) -> T,
    {
        let deadline = Instant::now() + timeout;
        let server = match self.registry.resolve(server_id) {
            Ok(server) => server,
            Err(e) => return finish(Err(e)),
        };

        let lock = self.registry.locks().acquire(server_id);
        let _guard = match tokio::time::timeout(timeout, lock).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    "[Executor] Server {} still busy after {:?}, giving up",
                    server_id, timeout
                );
                return finish(Err(SshError::Timeout {
                    stage: "lock",
                    after: timeout,
                }
                .into()));
            }
        };
        debug!("[Executor] Acquired lock for server {}", server_id);

        let mut session = SshSession::new(self.connector.clone());
        let outcome = self
            .drive(&mut session, &server, command, stdin, deadline, timeout)
            .await;
        session.close().await;
        finish(outcome)
    }

    async fn drive(
        &self,
        session: &mut SshSession,
        server: &ServerRecord,
        command: &str,
        stdin: Option<&[u8]>,
        deadline: Instant,
        total: Duration,
    ) -> Result<CommandResult> {
        let config = SshConfig::for_server(server, &self.settings);

        let connect_timeout = remaining(deadline, "connect", total)?.min(self.settings.connect_timeout());
        session.connect(&config, connect_timeout).await?;

        {
            // 凭据只在认证期间存在
            let credentials = self.registry.vault().unseal(server.id)?;
            let auth_timeout = remaining(deadline, "authenticate", total)?;
            session
                .authenticate(&server.username, &credentials, auth_timeout)
                .await?;
        }

        let exec_timeout = remaining(deadline, "execute", total)?;
        let result = session
            .execute_with_input(command, stdin, exec_timeout)
            .await?;

        info!(
            "[Executor] Server {} command finished: {:?} (exit {}, {:?})",
            server.id, result.outcome, result.exit_status, result.duration
        );
        Ok(result)
    }
}
