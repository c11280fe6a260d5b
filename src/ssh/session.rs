// SSH 会话
// 单次连接的生命周期：连接 → 认证 → 执行命令（可多次）→ 关闭

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::vault::Credentials;

use super::config::SshConfig;
use super::error::SshError;
use super::state::SessionState;
use super::transport::{AuthAttempt, OutputBuffer, SshConnector, SshTransport};

/// 取消命令、断开连接时等待远端响应的上限
const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

/// 命令结果的终止标签
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandOutcome {
    Success,
    Timeout,
    AuthFailure,
    NetworkFailure,
    NonZeroExit,
}

/// 命令执行结果
#[derive(Clone, Debug)]
pub struct CommandResult {
    /// 退出码，远端未报告时为 -1
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    pub outcome: CommandOutcome,
}

impl CommandResult {
    fn completed(exit_status: Option<u32>, output: OutputBuffer, duration: Duration) -> Self {
        let exit_status = exit_status
            .map(|code| i32::try_from(code).unwrap_or(i32::MAX))
            .unwrap_or(-1);
        let outcome = if exit_status == 0 {
            CommandOutcome::Success
        } else {
            CommandOutcome::NonZeroExit
        };
        Self {
            exit_status,
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
            outcome,
        }
    }

    fn interrupted(outcome: CommandOutcome, output: OutputBuffer, duration: Duration) -> Self {
        Self {
            exit_status: -1,
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
            outcome,
        }
    }

    /// 命令没有机会执行（连接或认证阶段失败）
    pub fn from_error(error: &SshError, duration: Duration) -> Self {
        let mut result = Self::interrupted(error.outcome(), OutputBuffer::default(), duration);
        result.stderr = error.to_string().into_bytes();
        result
    }

    pub fn is_success(&self) -> bool {
        self.outcome == CommandOutcome::Success
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// 认证成功所用的方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    PublicKey,
    Password,
}

impl AuthMethod {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PublicKey => "publickey",
            Self::Password => "password",
        }
    }
}

/// SSH 会话
///
/// 同一时刻最多一个命令在执行（所有操作都需要 `&mut self`）。
/// 会话不保存任何凭据。
pub struct SshSession {
    /// 会话 ID
    id: String,
    connector: Arc<dyn SshConnector>,
    transport: Option<Box<dyn SshTransport>>,
    state: SessionState,
    /// host:port，连接后才有
    address: Option<String>,
}

impl SshSession {
    pub fn new(connector: Arc<dyn SshConnector>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            connector,
            transport: None,
            state: SessionState::Idle,
            address: None,
        }
    }

    /// 获取会话 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    fn expect_state(&self, expected: SessionState, operation: &'static str) -> Result<(), SshError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SshError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// 建立传输并校验主机密钥
    pub async fn connect(&mut self, config: &SshConfig, timeout: Duration) -> Result<(), SshError> {
        self.expect_state(SessionState::Idle, "connect")?;
        self.state = SessionState::Connecting;
        let address = config.address();
        self.address = Some(address.clone());

        info!("[Session {}] Connecting to {}", self.id, address);
        match tokio::time::timeout(timeout, self.connector.connect(config)).await {
            Ok(Ok(transport)) => {
                self.transport = Some(transport);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("[Session {}] Connection to {} failed: {}", self.id, address, e);
                self.fail().await;
                Err(e)
            }
            Err(_) => {
                warn!("[Session {}] Connection to {} timed out", self.id, address);
                self.fail().await;
                Err(SshError::Timeout {
                    stage: "connect",
                    after: timeout,
                })
            }
        }
    }

    /// 认证：有私钥时先试私钥，私钥缺失或被拒绝时才试密码
    pub async fn authenticate(
        &mut self,
        username: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<AuthMethod, SshError> {
        self.expect_state(SessionState::Connecting, "authenticate")?;
        self.state = SessionState::Authenticating;

        if credentials.private_key().is_none() && credentials.password().is_none() {
            self.fail().await;
            return Err(SshError::Auth(
                "no authentication method configured".to_string(),
            ));
        }

        let attempt = match self.transport.as_mut() {
            Some(transport) => {
                tokio::time::timeout(timeout, try_methods(&mut **transport, username, credentials))
                    .await
            }
            None => Ok(Err(SshError::Network(
                "transport is not available".to_string(),
            ))),
        };

        match attempt {
            Ok(Ok(method)) => {
                info!(
                    "[Session {}] Authenticated as {} via {}",
                    self.id,
                    username,
                    method.label()
                );
                self.state = SessionState::Ready;
                Ok(method)
            }
            Ok(Err(e)) => {
                warn!("[Session {}] Authentication failed: {}", self.id, e);
                self.fail().await;
                Err(e)
            }
            Err(_) => {
                warn!("[Session {}] Authentication timed out", self.id);
                self.fail().await;
                Err(SshError::Timeout {
                    stage: "authenticate",
                    after: timeout,
                })
            }
        }
    }

    /// 执行命令
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, SshError> {
        self.execute_with_input(command, None, timeout).await
    }

    /// 执行命令，stdin 写完后发送 EOF
    ///
    /// 非零退出码不是错误；超时和传输中断体现在结果的 outcome 中。
    /// 只有状态不对时才返回 Err。
    pub async fn execute_with_input(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandResult, SshError> {
        self.expect_state(SessionState::Ready, "execute")?;
        let Some(transport) = self.transport.as_mut() else {
            return Err(SshError::InvalidState {
                operation: "execute",
                state: self.state,
            });
        };
        self.state = SessionState::Executing;

        debug!("[Session {}] Executing: {}", self.id, command);
        let started = Instant::now();
        let mut output = OutputBuffer::default();
        let run = tokio::time::timeout(timeout, transport.exec(command, stdin, &mut output)).await;

        match run {
            Ok(Ok(exit_status)) => {
                self.state = SessionState::Ready;
                let result = CommandResult::completed(exit_status, output, started.elapsed());
                debug!(
                    "[Session {}] Command finished with status {} in {:?}",
                    self.id, result.exit_status, result.duration
                );
                Ok(result)
            }
            Ok(Err(e)) => {
                warn!("[Session {}] Transport lost during command: {}", self.id, e);
                let result =
                    CommandResult::interrupted(CommandOutcome::NetworkFailure, output, started.elapsed());
                self.fail().await;
                Ok(result)
            }
            Err(_) => {
                warn!(
                    "[Session {}] Command timed out after {:?}, cancelling",
                    self.id, timeout
                );
                let result =
                    CommandResult::interrupted(CommandOutcome::Timeout, output, started.elapsed());
                if let Some(transport) = self.transport.as_mut() {
                    let _ = tokio::time::timeout(TEARDOWN_GRACE, transport.cancel()).await;
                }
                self.fail().await;
                Ok(result)
            }
        }
    }

    /// 关闭会话（任意状态均可，幂等）
    pub async fn close(&mut self) {
        if self.state.is_open() {
            debug!("[Session {}] Closing (was {})", self.id, self.state);
        }
        self.release().await;
        self.state = SessionState::Closed;
    }

    async fn fail(&mut self) {
        self.release().await;
        if self.state.can_fail() {
            self.state = SessionState::Failed;
        }
    }

    async fn release(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = tokio::time::timeout(TEARDOWN_GRACE, transport.disconnect()).await;
        }
    }
}

async fn try_methods(
    transport: &mut dyn SshTransport,
    username: &str,
    credentials: &Credentials,
) -> Result<AuthMethod, SshError> {
    let mut rejections = Vec::new();

    if let Some(private_key) = credentials.private_key() {
        match transport.auth_publickey(username, private_key).await {
            Ok(AuthAttempt::Accepted) => return Ok(AuthMethod::PublicKey),
            Ok(AuthAttempt::Rejected { reason }) => {
                debug!("[Auth] Public key rejected: {}", reason);
                rejections.push(format!("publickey: {}", reason));
            }
            Err(SshError::Key(reason)) if credentials.password().is_some() => {
                debug!("[Auth] Skipping unusable private key: {}", reason);
                rejections.push(format!("publickey: {}", reason));
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(password) = credentials.password() {
        match transport.auth_password(username, password).await? {
            AuthAttempt::Accepted => return Ok(AuthMethod::Password),
            AuthAttempt::Rejected { reason } => {
                debug!("[Auth] Password rejected: {}", reason);
                rejections.push(format!("password: {}", reason));
            }
        }
    }

    Err(SshError::Auth(rejections.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::testing::{Call, MockHost, MockNetwork, Reply};

    fn config(host: &str) -> SshConfig {
        SshConfig {
            host: host.to_string(),
            username: "root".to_string(),
            ..Default::default()
        }
    }

    const SHORT: Duration = Duration::from_secs(2);

    async fn ready_session(net: &MockNetwork) -> SshSession {
        let mut session = SshSession::new(net.connector());
        session.connect(&config("h"), SHORT).await.unwrap();
        session
            .authenticate("root", &Credentials::new(Some("pw".into()), None), SHORT)
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_happy_path_state_transitions() {
        let (net, host) = MockNetwork::with_host("h");
        host.reply("uptime", Reply::exit(0, "up 3 days\n", ""));

        let mut session = SshSession::new(net.connector());
        assert_eq!(session.state(), SessionState::Idle);

        session.connect(&config("h"), SHORT).await.unwrap();
        assert_eq!(session.state(), SessionState::Connecting);

        let method = session
            .authenticate("root", &Credentials::new(Some("pw".into()), None), SHORT)
            .await
            .unwrap();
        assert_eq!(method, AuthMethod::Password);
        assert_eq!(session.state(), SessionState::Ready);

        let result = session.execute("uptime", SHORT).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.exit_status, 0);
        assert_eq!(result.stdout_string(), "up 3 days\n");
        assert_eq!(session.state(), SessionState::Ready);

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(host.calls().last(), Some(&Call::Disconnect));
    }

    #[tokio::test]
    async fn test_connect_failure_never_authenticates() {
        let (net, host) = MockNetwork::with_host("h");
        host.refuse_connections();

        let mut session = SshSession::new(net.connector());
        let err = session.connect(&config("h"), SHORT).await.unwrap_err();
        assert!(matches!(err, SshError::Network(_)));
        assert_eq!(session.state(), SessionState::Failed);

        let err = session
            .authenticate("root", &Credentials::new(Some("pw".into()), None), SHORT)
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::InvalidState { .. }));
        assert!(!host
            .calls()
            .iter()
            .any(|c| matches!(c, Call::AuthKey(_) | Call::AuthPassword(_))));

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let (net, host) = MockNetwork::with_host("h");
        host.hang_connections();

        let mut session = SshSession::new(net.connector());
        let started = Instant::now();
        let err = session
            .connect(&config("h"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Timeout { stage: "connect", .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_unknown_host_is_network_error() {
        let (net, _host) = MockNetwork::with_host("h");
        let mut session = SshSession::new(net.connector());
        let err = session.connect(&config("other"), SHORT).await.unwrap_err();
        assert!(matches!(err, SshError::Network(_)));
    }

    #[tokio::test]
    async fn test_auth_failure_never_executes() {
        let (net, host) = MockNetwork::with_host("h");
        host.reject_password();

        let mut session = SshSession::new(net.connector());
        session.connect(&config("h"), SHORT).await.unwrap();
        let err = session
            .authenticate("root", &Credentials::new(Some("wrong".into()), None), SHORT)
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Auth(_)));
        assert_eq!(session.state(), SessionState::Failed);

        let err = session.execute("uptime", SHORT).await.unwrap_err();
        assert!(matches!(err, SshError::InvalidState { .. }));
        assert!(!host.calls().iter().any(|c| matches!(c, Call::Exec(_))));
        // 认证失败后传输已释放
        assert_eq!(host.calls().last(), Some(&Call::Disconnect));
    }

    #[tokio::test]
    async fn test_no_credentials_never_attempts() {
        let (net, host) = MockNetwork::with_host("h");
        let mut session = SshSession::new(net.connector());
        session.connect(&config("h"), SHORT).await.unwrap();

        let err = session
            .authenticate("root", &Credentials::new(None, None), SHORT)
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Auth(_)));
        assert_eq!(host.calls(), vec![Call::Connect("h:22".into()), Call::Disconnect]);
    }

    #[tokio::test]
    async fn test_key_tried_before_password() {
        let (net, host) = MockNetwork::with_host("h");
        host.reject_key();

        let mut session = SshSession::new(net.connector());
        session.connect(&config("h"), SHORT).await.unwrap();
        let method = session
            .authenticate(
                "root",
                &Credentials::new(Some("pw".into()), Some("KEY".into())),
                SHORT,
            )
            .await
            .unwrap();
        assert_eq!(method, AuthMethod::Password);

        let auth_calls: Vec<_> = host
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::AuthKey(_) | Call::AuthPassword(_)))
            .collect();
        assert_eq!(
            auth_calls,
            vec![Call::AuthKey("root".into()), Call::AuthPassword("root".into())]
        );
    }

    #[tokio::test]
    async fn test_accepted_key_skips_password() {
        let (net, host) = MockNetwork::with_host("h");
        let mut session = SshSession::new(net.connector());
        session.connect(&config("h"), SHORT).await.unwrap();
        let method = session
            .authenticate(
                "root",
                &Credentials::new(Some("pw".into()), Some("KEY".into())),
                SHORT,
            )
            .await
            .unwrap();
        assert_eq!(method, AuthMethod::PublicKey);
        assert!(!host
            .calls()
            .iter()
            .any(|c| matches!(c, Call::AuthPassword(_))));
    }

    #[tokio::test]
    async fn test_unusable_key_falls_back_or_fails() {
        let (net, _host) = MockNetwork::with_host("h");

        let mut session = SshSession::new(net.connector());
        session.connect(&config("h"), SHORT).await.unwrap();
        let method = session
            .authenticate(
                "root",
                &Credentials::new(Some("pw".into()), Some(MockHost::INVALID_KEY.into())),
                SHORT,
            )
            .await
            .unwrap();
        assert_eq!(method, AuthMethod::Password);

        let mut session = SshSession::new(net.connector());
        session.connect(&config("h"), SHORT).await.unwrap();
        let err = session
            .authenticate(
                "root",
                &Credentials::new(None, Some(MockHost::INVALID_KEY.into())),
                SHORT,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Key(_)));
        assert_eq!(err.outcome(), CommandOutcome::AuthFailure);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let (net, host) = MockNetwork::with_host("h");
        host.reply("false", Reply::exit(1, "", "nope\n"));

        let mut session = ready_session(&net).await;
        let result = session.execute("false", SHORT).await.unwrap();
        assert_eq!(result.outcome, CommandOutcome::NonZeroExit);
        assert_eq!(result.exit_status, 1);
        assert_eq!(result.stderr_string(), "nope\n");
        assert_eq!(session.state(), SessionState::Ready);

        // 会话可以继续使用
        let result = session.execute("echo again", SHORT).await.unwrap();
        assert_eq!(result.stdout_string(), "again\n");
    }

    #[tokio::test]
    async fn test_command_timeout_closes_transport() {
        let (net, host) = MockNetwork::with_host("h");
        host.reply(
            "sleep 10",
            Reply::Sleep {
                duration: Duration::from_secs(10),
                partial: "started\n".to_string(),
            },
        );

        let mut session = ready_session(&net).await;
        let started = Instant::now();
        let result = session
            .execute("sleep 10", Duration::from_millis(200))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.outcome, CommandOutcome::Timeout);
        assert_eq!(result.exit_status, -1);
        assert_eq!(result.stdout_string(), "started\n");
        assert_eq!(session.state(), SessionState::Failed);

        let calls = host.calls();
        let tail = &calls[calls.len() - 2..];
        assert_eq!(tail, &[Call::Cancel, Call::Disconnect]);
        assert_eq!(host.in_flight(), 0);

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_transport_loss_mid_command() {
        let (net, host) = MockNetwork::with_host("h");
        host.reply("reboot", Reply::DropConnection);

        let mut session = ready_session(&net).await;
        let result = session.execute("reboot", SHORT).await.unwrap();
        assert_eq!(result.outcome, CommandOutcome::NetworkFailure);
        assert_eq!(session.state(), SessionState::Failed);

        let err = session.execute("uptime", SHORT).await.unwrap_err();
        assert!(matches!(err, SshError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_execute_with_input() {
        let (net, host) = MockNetwork::with_host("h");
        let mut session = ready_session(&net).await;

        let result = session
            .execute_with_input("cat > /tmp/a", Some(b"hello"), SHORT)
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(host.file("/tmp/a").as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (net, _host) = MockNetwork::with_host("h");
        let mut session = SshSession::new(net.connector());
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);

        let err = session.connect(&config("h"), SHORT).await.unwrap_err();
        assert!(matches!(err, SshError::InvalidState { .. }));
    }

    #[test]
    fn test_result_from_error() {
        let err = SshError::Timeout {
            stage: "connect",
            after: Duration::from_secs(1),
        };
        let result = CommandResult::from_error(&err, Duration::ZERO);
        assert_eq!(result.outcome, CommandOutcome::Timeout);
        assert_eq!(result.exit_status, -1);
        assert!(result.stdout.is_empty());
    }
}
