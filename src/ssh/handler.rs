// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use russh::keys::PublicKey;
use tracing::debug;

use super::error::SshError;
use super::trust::HostTrust;

/// 握手过程中主机密钥被拒绝时的原因，由连接方取出
pub type HostKeyVerdict = Arc<Mutex<Option<SshError>>>;

/// SSH 客户端 Handler
/// 处理 SSH 连接过程中的各种回调
pub struct SshClientHandler {
    /// host:port
    host: String,
    trust: HostTrust,
    verdict: HostKeyVerdict,
}

impl SshClientHandler {
    /// 创建新的 Handler
    pub fn new(host: String, trust: HostTrust, verdict: HostKeyVerdict) -> Self {
        Self {
            host,
            trust,
            verdict,
        }
    }
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key
            .fingerprint(russh::keys::ssh_key::HashAlg::Sha256)
            .to_string();
        let key_type = server_public_key.algorithm().to_string();

        debug!(
            "[SSH] Server key for {}: {} {}",
            self.host, key_type, fingerprint
        );

        let accepted = match self.trust.verify(&self.host, &key_type, &fingerprint) {
            Ok(()) => true,
            Err(e) => {
                *self.verdict.lock() = Some(e);
                false
            }
        };

        async move { Ok(accepted) }
    }
}
