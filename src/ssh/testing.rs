// 测试用的脚本化 SSH 传输
//
// MockNetwork 按主机名路由到 MockHost；MockHost 用内存文件表模拟
// 同步引擎用到的少量 shell 命令，也可以为某条命令指定固定回复。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::config::SshConfig;
use super::error::SshError;
use super::transport::{AuthAttempt, OutputBuffer, SshConnector, SshTransport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectBehavior {
    Accept,
    Refuse,
    Hang,
}

/// 对某条命令的固定回复
#[derive(Clone, Debug)]
pub(crate) enum Reply {
    Exit {
        status: u32,
        stdout: String,
        stderr: String,
    },
    /// 先输出 partial，然后一直等待
    Sleep { duration: Duration, partial: String },
    /// 执行中断开连接
    DropConnection,
}

impl Reply {
    pub(crate) fn exit(status: u32, stdout: &str, stderr: &str) -> Self {
        Self::Exit {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// 传输上发生的调用
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Connect(String),
    AuthKey(String),
    AuthPassword(String),
    Exec(String),
    Cancel,
    Disconnect,
}

struct HostState {
    connect: ConnectBehavior,
    accept_key: bool,
    accept_password: bool,
    files: HashMap<String, String>,
    replies: HashMap<String, Reply>,
    exec_delay: Duration,
    calls: Vec<Call>,
    in_flight: usize,
    max_in_flight: usize,
}

/// 模拟的远程主机
#[derive(Clone)]
pub(crate) struct MockHost {
    state: Arc<Mutex<HostState>>,
}

impl MockHost {
    /// 解析失败的私钥文本
    pub(crate) const INVALID_KEY: &'static str = "-----BEGIN GARBAGE-----";

    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                connect: ConnectBehavior::Accept,
                accept_key: true,
                accept_password: true,
                files: HashMap::new(),
                replies: HashMap::new(),
                exec_delay: Duration::ZERO,
                calls: Vec::new(),
                in_flight: 0,
                max_in_flight: 0,
            })),
        }
    }

    pub(crate) fn refuse_connections(&self) {
        self.state.lock().connect = ConnectBehavior::Refuse;
    }

    pub(crate) fn hang_connections(&self) {
        self.state.lock().connect = ConnectBehavior::Hang;
    }

    pub(crate) fn accept_connections(&self) {
        self.state.lock().connect = ConnectBehavior::Accept;
    }

    pub(crate) fn reject_key(&self) {
        self.state.lock().accept_key = false;
    }

    pub(crate) fn reject_password(&self) {
        self.state.lock().accept_password = false;
    }

    pub(crate) fn put_file(&self, path: &str, content: &str) {
        self.state
            .lock()
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub(crate) fn remove_file(&self, path: &str) {
        self.state.lock().files.remove(path);
    }

    pub(crate) fn file(&self, path: &str) -> Option<String> {
        self.state.lock().files.get(path).cloned()
    }

    pub(crate) fn reply(&self, command: &str, reply: Reply) {
        self.state.lock().replies.insert(command.to_string(), reply);
    }

    /// 每条命令的执行耗时
    pub(crate) fn set_exec_delay(&self, delay: Duration) {
        self.state.lock().exec_delay = delay;
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn exec_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Exec(_)))
            .count()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    fn log(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

/// 按主机名路由的模拟网络
#[derive(Clone, Default)]
pub(crate) struct MockNetwork {
    hosts: Arc<Mutex<HashMap<String, MockHost>>>,
}

impl MockNetwork {
    pub(crate) fn with_host(hostname: &str) -> (Self, MockHost) {
        let network = Self::default();
        let host = network.add_host(hostname);
        (network, host)
    }

    pub(crate) fn add_host(&self, hostname: &str) -> MockHost {
        let host = MockHost::new();
        self.hosts.lock().insert(hostname.to_string(), host.clone());
        host
    }

    pub(crate) fn connector(&self) -> Arc<dyn SshConnector> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl SshConnector for MockNetwork {
    async fn connect(&self, config: &SshConfig) -> Result<Box<dyn SshTransport>, SshError> {
        let host = self.hosts.lock().get(&config.host).cloned();
        let Some(host) = host else {
            return Err(SshError::Network(format!(
                "failed to lookup address information: {}",
                config.host
            )));
        };

        host.log(Call::Connect(config.address()));
        let behavior = host.state.lock().connect;
        match behavior {
            ConnectBehavior::Accept => Ok(Box::new(MockTransport { host })),
            ConnectBehavior::Refuse => Err(SshError::Network(format!(
                "{}: Connection refused",
                config.address()
            ))),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }
}

struct MockTransport {
    host: MockHost,
}

/// 执行计数，命令被取消时也会归还
struct InFlight {
    host: MockHost,
}

impl InFlight {
    fn enter(host: &MockHost) -> Self {
        let mut state = host.state.lock();
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        Self { host: host.clone() }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.host.state.lock().in_flight -= 1;
    }
}

#[async_trait]
impl SshTransport for MockTransport {
    async fn auth_publickey(
        &mut self,
        username: &str,
        private_key: &str,
    ) -> Result<AuthAttempt, SshError> {
        if private_key == MockHost::INVALID_KEY {
            return Err(SshError::Key("unsupported key format".to_string()));
        }
        self.host.log(Call::AuthKey(username.to_string()));
        Ok(if self.host.state.lock().accept_key {
            AuthAttempt::Accepted
        } else {
            AuthAttempt::Rejected {
                reason: "server suggests: [Password]".to_string(),
            }
        })
    }

    async fn auth_password(
        &mut self,
        username: &str,
        _password: &str,
    ) -> Result<AuthAttempt, SshError> {
        self.host.log(Call::AuthPassword(username.to_string()));
        Ok(if self.host.state.lock().accept_password {
            AuthAttempt::Accepted
        } else {
            AuthAttempt::Rejected {
                reason: "server suggests: [PublicKey]".to_string(),
            }
        })
    }

    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        output: &mut OutputBuffer,
    ) -> Result<Option<u32>, SshError> {
        self.host.log(Call::Exec(command.to_string()));
        let _guard = InFlight::enter(&self.host);

        let (delay, reply) = {
            let state = self.host.state.lock();
            (state.exec_delay, state.replies.get(command).cloned())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Reply::Exit {
                status,
                stdout,
                stderr,
            }) => {
                output.stdout.extend_from_slice(stdout.as_bytes());
                output.stderr.extend_from_slice(stderr.as_bytes());
                Ok(Some(status))
            }
            Some(Reply::Sleep { duration, partial }) => {
                output.stdout.extend_from_slice(partial.as_bytes());
                tokio::time::sleep(duration).await;
                Ok(Some(0))
            }
            Some(Reply::DropConnection) => {
                Err(SshError::Network("connection reset by peer".to_string()))
            }
            None => Ok(Some(self.emulate(command, stdin, output))),
        }
    }

    async fn cancel(&mut self) {
        self.host.log(Call::Cancel);
    }

    async fn disconnect(&mut self) {
        self.host.log(Call::Disconnect);
    }
}

impl MockTransport {
    /// 只认识同步引擎和连接测试会发出的命令形式
    fn emulate(&self, command: &str, stdin: Option<&[u8]>, output: &mut OutputBuffer) -> u32 {
        let Ok(words) = shell_words::split(command) else {
            output.stderr.extend_from_slice(b"sh: syntax error\n");
            return 2;
        };
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        let mut state = self.host.state.lock();

        match words.as_slice() {
            ["echo", text] => {
                output.stdout.extend_from_slice(format!("{}\n", text).as_bytes());
                0
            }
            ["test", "-f", path] => u32::from(!state.files.contains_key(*path)),
            ["test", "-f", path, "||", "exit", "66;", "cat", "--", same] if path == same => {
                match state.files.get(*path) {
                    Some(content) => {
                        output.stdout.extend_from_slice(content.as_bytes());
                        0
                    }
                    None => 66,
                }
            }
            ["cat", ">", tmp, "&&", "mv", "-f", "--", same_tmp, path] if tmp == same_tmp => {
                let content = String::from_utf8_lossy(stdin.unwrap_or_default()).into_owned();
                state.files.insert(path.to_string(), content);
                0
            }
            ["cat", ">", path] => {
                let content = String::from_utf8_lossy(stdin.unwrap_or_default()).into_owned();
                state.files.insert(path.to_string(), content);
                0
            }
            _ => {
                output
                    .stderr
                    .extend_from_slice(format!("sh: {}: command not found\n", command).as_bytes());
                127
            }
        }
    }
}
