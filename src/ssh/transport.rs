// SSH 传输层
//
// SshConnector / SshTransport 是会话状态机与具体 SSH 实现之间的接缝：
// 生产环境使用 russh，测试中注入脚本化的传输。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::{Handle, Msg};
use russh::ChannelMsg;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::config::SshConfig;
use super::error::SshError;
use super::handler::{HostKeyVerdict, SshClientHandler};
use super::trust::HostTrust;

/// 单次认证尝试的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthAttempt {
    Accepted,
    Rejected { reason: String },
}

/// 命令输出缓冲
///
/// 由调用方持有，命令被超时取消时已收到的部分输出仍然保留。
#[derive(Clone, Debug, Default)]
pub struct OutputBuffer {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// 建立传输（DNS、TCP、SSH 握手、主机密钥校验）
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(&self, config: &SshConfig) -> Result<Box<dyn SshTransport>, SshError>;
}

/// 已完成握手的传输
#[async_trait]
pub trait SshTransport: Send {
    /// 私钥认证，private_key 为 OpenSSH / PEM 文本
    ///
    /// 私钥无法解析时返回 SshError::Key，会话会继续尝试密码。
    async fn auth_publickey(
        &mut self,
        username: &str,
        private_key: &str,
    ) -> Result<AuthAttempt, SshError>;

    /// 密码认证
    async fn auth_password(&mut self, username: &str, password: &str)
        -> Result<AuthAttempt, SshError>;

    /// 执行命令直到远端关闭通道，返回退出码（远端未报告时为 None）
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        output: &mut OutputBuffer,
    ) -> Result<Option<u32>, SshError>;

    /// 取消正在执行的命令
    async fn cancel(&mut self);

    /// 断开连接
    async fn disconnect(&mut self);
}

// ======================== russh 实现 ========================

/// 基于 russh 的连接器
pub struct RusshConnector {
    trust: HostTrust,
}

impl RusshConnector {
    pub fn new(trust: HostTrust) -> Self {
        Self { trust }
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(&self, config: &SshConfig) -> Result<Box<dyn SshTransport>, SshError> {
        let address = config.address();

        // 解析地址
        let socket_addr = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| SshError::Network(format!("Failed to resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| SshError::Network(format!("No address found for {}", address)))?;

        debug!("[SSH] Connecting to {} ({})", address, socket_addr);
        let tcp_stream = TcpStream::connect(socket_addr)
            .await
            .map_err(|e| SshError::Network(format!("{}: {}", socket_addr, e)))?;

        // SSH 握手
        let verdict: HostKeyVerdict = Arc::new(Mutex::new(None));
        let handler = SshClientHandler::new(address.clone(), self.trust.clone(), verdict.clone());
        let handle = russh::client::connect_stream(
            Arc::new(config.to_russh_config()),
            tcp_stream,
            handler,
        )
        .await
        .map_err(|e| {
            // 主机密钥被拒绝时报告具体原因
            verdict.lock().take().unwrap_or_else(|| SshError::from(e))
        })?;

        debug!("[SSH] Handshake with {} completed", address);
        Ok(Box::new(RusshTransport {
            handle,
            active: None,
            address,
        }))
    }
}

/// 基于 russh 的传输
pub struct RusshTransport {
    handle: Handle<SshClientHandler>,
    /// 正在执行命令的通道
    active: Option<russh::Channel<Msg>>,
    address: String,
}

fn auth_attempt(result: russh::client::AuthResult) -> AuthAttempt {
    use russh::client::AuthResult;

    match result {
        AuthResult::Success => AuthAttempt::Accepted,
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } => AuthAttempt::Rejected {
            reason: if partial_success {
                "partial authentication - additional auth required".to_string()
            } else {
                format!("server suggests: {:?}", remaining_methods)
            },
        },
    }
}

#[async_trait]
impl SshTransport for RusshTransport {
    async fn auth_publickey(
        &mut self,
        username: &str,
        private_key: &str,
    ) -> Result<AuthAttempt, SshError> {
        let key = russh::keys::decode_secret_key(private_key, None).map_err(|e| {
            warn!("[SSH] Private key for {} could not be decoded", self.address);
            SshError::Key(e.to_string())
        })?;

        let hash_alg = self.handle.best_supported_rsa_hash().await?.flatten();
        let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

        let result = self
            .handle
            .authenticate_publickey(username, key_with_alg)
            .await?;
        Ok(auth_attempt(result))
    }

    async fn auth_password(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<AuthAttempt, SshError> {
        let result = self.handle.authenticate_password(username, password).await?;
        Ok(auth_attempt(result))
    }

    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        output: &mut OutputBuffer,
    ) -> Result<Option<u32>, SshError> {
        let channel = self.handle.channel_open_session().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        if let Some(input) = stdin {
            channel
                .data(input)
                .await
                .map_err(|e| SshError::Channel(e.to_string()))?;
            channel
                .eof()
                .await
                .map_err(|e| SshError::Channel(e.to_string()))?;
        }

        let channel = self.active.insert(channel);
        let mut exit_status = None;
        let mut closed = false;

        // exit-status 可能在 EOF 之后到达，一直读到通道关闭
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        output.stderr.extend_from_slice(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    debug!("[SSH] Command on {} killed by {:?}", self.address, signal_name);
                }
                ChannelMsg::Close => {
                    closed = true;
                    break;
                }
                _ => {}
            }
        }
        self.active = None;

        if !closed && exit_status.is_none() {
            return Err(SshError::Network(format!(
                "connection to {} lost during command",
                self.address
            )));
        }
        Ok(exit_status)
    }

    async fn cancel(&mut self) {
        if let Some(channel) = self.active.take() {
            debug!("[SSH] Cancelling command on {}", self.address);
            let _ = channel.signal(russh::Sig::TERM).await;
            let _ = channel.close().await;
        }
    }

    async fn disconnect(&mut self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
    }
}
