// 凭据保险库
//
// 对外只暴露“是否有密码 / 是否有私钥”等派生事实。
// 明文只能通过 crate 内部的 unseal 取得，由执行路径在单次连接尝试内使用后立即释放。
// 读写锁保证密钥轮换与解密互斥：轮换等待进行中的解密完成，单次解密不会混用新旧密钥。

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::models::{CredentialPresence, SecretUpdate, ServerId};

use super::cipher::{self, MasterKey, SealedSecret};
use super::error::{DecryptFailure, VaultError};

/// 保险库配置（显式构造并注入，不使用全局状态）
pub struct VaultConfig {
    pub master_key: MasterKey,
}

/// 单台服务器的密文槽
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialSlot {
    pub password: Option<SealedSecret>,
    pub private_key: Option<SealedSecret>,
}

impl CredentialSlot {
    pub fn presence(&self) -> Option<CredentialPresence> {
        CredentialPresence::from_flags(self.password.is_some(), self.private_key.is_some())
    }
}

/// 持久化条目
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub server_id: ServerId,
    #[serde(flatten)]
    pub slot: CredentialSlot,
}

/// 解密后的凭据，仅在单次连接尝试内存在
///
/// 不可 Clone，Debug 输出脱敏，drop 时清零。
pub struct Credentials {
    password: Option<Zeroizing<String>>,
    private_key: Option<Zeroizing<String>>,
}

impl Credentials {
    #[cfg(test)]
    pub(crate) fn new(password: Option<String>, private_key: Option<String>) -> Self {
        Self {
            password: password.map(Zeroizing::new),
            private_key: private_key.map(Zeroizing::new),
        }
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_deref().map(String::as_str)
    }

    pub(crate) fn private_key(&self) -> Option<&str> {
        self.private_key.as_deref().map(String::as_str)
    }

    pub fn presence(&self) -> Option<CredentialPresence> {
        CredentialPresence::from_flags(self.password.is_some(), self.private_key.is_some())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

struct VaultState {
    key: MasterKey,
    slots: HashMap<ServerId, CredentialSlot>,
}

/// 凭据保险库
pub struct CredentialVault {
    state: RwLock<VaultState>,
}

impl CredentialVault {
    pub fn new(config: VaultConfig) -> Self {
        info!(
            "[Vault] Initialized with master key {}",
            config.master_key.fingerprint()
        );
        Self {
            state: RwLock::new(VaultState {
                key: config.master_key,
                slots: HashMap::new(),
            }),
        }
    }

    /// 当前主密钥指纹
    pub fn key_fingerprint(&self) -> String {
        self.state.read().key.fingerprint()
    }

    /// 使用当前主密钥加密
    pub fn encrypt(&self, plaintext: &str) -> Result<SealedSecret, VaultError> {
        let state = self.state.read();
        cipher::seal(&state.key, plaintext.as_bytes())
    }

    /// 使用当前主密钥解密，返回的明文在 drop 时清零
    pub fn decrypt(&self, sealed: &SealedSecret) -> Result<Zeroizing<String>, VaultError> {
        let state = self.state.read();
        decrypt_with(&state.key, sealed)
    }

    /// 为新服务器写入凭据，空字符串视为未提供
    pub fn store(
        &self,
        server_id: ServerId,
        password: Option<&str>,
        private_key: Option<&str>,
    ) -> Result<CredentialPresence, VaultError> {
        let mut state = self.state.write();

        let slot = CredentialSlot {
            password: seal_optional(&state.key, password)?,
            private_key: seal_optional(&state.key, private_key)?,
        };
        let presence = slot.presence().ok_or(VaultError::Empty)?;

        state.slots.insert(server_id, slot);
        debug!("[Vault] Stored credentials for server {} ({:?})", server_id, presence);
        Ok(presence)
    }

    /// 更新凭据
    ///
    /// Keep / 空值保持原密文，Clear 删除该类型。结果为空时拒绝且不做任何修改。
    pub fn update(
        &self,
        server_id: ServerId,
        password: &SecretUpdate,
        private_key: &SecretUpdate,
    ) -> Result<CredentialPresence, VaultError> {
        let mut state = self.state.write();

        let current = state.slots.get(&server_id).cloned().unwrap_or_default();
        let next = CredentialSlot {
            password: apply_update(&state.key, current.password, password)?,
            private_key: apply_update(&state.key, current.private_key, private_key)?,
        };
        let presence = next.presence().ok_or(VaultError::Empty)?;

        state.slots.insert(server_id, next);
        debug!("[Vault] Updated credentials for server {} ({:?})", server_id, presence);
        Ok(presence)
    }

    /// 删除服务器的全部凭据
    pub fn remove(&self, server_id: ServerId) -> bool {
        let removed = self.state.write().slots.remove(&server_id).is_some();
        if removed {
            debug!("[Vault] Removed credentials for server {}", server_id);
        }
        removed
    }

    pub fn presence(&self, server_id: ServerId) -> Option<CredentialPresence> {
        self.state
            .read()
            .slots
            .get(&server_id)
            .and_then(CredentialSlot::presence)
    }

    pub fn has_password(&self, server_id: ServerId) -> bool {
        self.presence(server_id)
            .is_some_and(CredentialPresence::has_password)
    }

    pub fn has_private_key(&self, server_id: ServerId) -> bool {
        self.presence(server_id)
            .is_some_and(CredentialPresence::has_private_key)
    }

    /// 解密某台服务器的凭据，只供执行路径在连接前调用
    pub(crate) fn unseal(&self, server_id: ServerId) -> Result<Credentials, VaultError> {
        let state = self.state.read();
        let slot = state
            .slots
            .get(&server_id)
            .ok_or(VaultError::NotFound(server_id))?;

        let password = slot
            .password
            .as_ref()
            .map(|sealed| decrypt_with(&state.key, sealed))
            .transpose()?;
        let private_key = slot
            .private_key
            .as_ref()
            .map(|sealed| decrypt_with(&state.key, sealed))
            .transpose()?;

        Ok(Credentials {
            password,
            private_key,
        })
    }

    /// 密钥轮换
    ///
    /// 所有密文在新密钥下重新加密后整体替换；任何一条解密失败则中止，原密文与密钥保持不变。
    /// 返回重新加密的密文条数。
    pub fn rotate_key(&self, old: &MasterKey, new: MasterKey) -> Result<usize, VaultError> {
        let mut state = self.state.write();

        if !state.key.matches(old) {
            warn!("[Vault] Key rotation rejected: provided key is not the active key");
            return Err(VaultError::KeyMismatch);
        }

        let mut rotated = HashMap::with_capacity(state.slots.len());
        let mut count = 0;
        for (server_id, slot) in &state.slots {
            let reseal = |sealed: &Option<SealedSecret>| -> Result<Option<SealedSecret>, VaultError> {
                sealed
                    .as_ref()
                    .map(|s| {
                        let plaintext = cipher::open(&state.key, s)?;
                        cipher::seal(&new, &plaintext)
                    })
                    .transpose()
            };

            let next = CredentialSlot {
                password: reseal(&slot.password).inspect_err(|e| {
                    warn!("[Vault] Key rotation aborted at server {}: {}", server_id, e)
                })?,
                private_key: reseal(&slot.private_key).inspect_err(|e| {
                    warn!("[Vault] Key rotation aborted at server {}: {}", server_id, e)
                })?,
            };
            count += usize::from(next.password.is_some()) + usize::from(next.private_key.is_some());
            rotated.insert(*server_id, next);
        }

        state.slots = rotated;
        state.key = new;
        info!(
            "[Vault] Rotated {} secrets to master key {}",
            count,
            state.key.fingerprint()
        );
        Ok(count)
    }

    /// 检查所有密文都能在当前密钥下解密（启动时发现密钥配置错误）
    pub fn verify_all(&self) -> Result<(), VaultError> {
        let state = self.state.read();
        for slot in state.slots.values() {
            for sealed in slot.password.iter().chain(slot.private_key.iter()) {
                cipher::open(&state.key, sealed)?;
            }
        }
        Ok(())
    }

    /// 导出密文表（持久化用）
    pub fn export(&self) -> Vec<StoredCredentials> {
        let state = self.state.read();
        let mut records: Vec<StoredCredentials> = state
            .slots
            .iter()
            .map(|(server_id, slot)| StoredCredentials {
                server_id: *server_id,
                slot: slot.clone(),
            })
            .collect();
        records.sort_by_key(|r| r.server_id);
        records
    }

    /// 导入密文表，替换现有内容
    pub fn import(&self, records: Vec<StoredCredentials>) {
        let mut state = self.state.write();
        state.slots = records
            .into_iter()
            .filter(|r| r.slot.presence().is_some())
            .map(|r| (r.server_id, r.slot))
            .collect();
    }
}

fn decrypt_with(key: &MasterKey, sealed: &SealedSecret) -> Result<Zeroizing<String>, VaultError> {
    let mut bytes = cipher::open(key, sealed)?;
    let text = String::from_utf8(std::mem::take(&mut *bytes))
        .map_err(|e| {
            // 不完整的明文也要清零
            let mut raw = e.into_bytes();
            zeroize::Zeroize::zeroize(&mut raw);
            VaultError::Decryption(DecryptFailure::Encoding)
        })?;
    Ok(Zeroizing::new(text))
}

fn seal_optional(
    key: &MasterKey,
    value: Option<&str>,
) -> Result<Option<SealedSecret>, VaultError> {
    match value {
        Some(v) if !v.is_empty() => cipher::seal(key, v.as_bytes()).map(Some),
        _ => Ok(None),
    }
}

fn apply_update(
    key: &MasterKey,
    current: Option<SealedSecret>,
    update: &SecretUpdate,
) -> Result<Option<SealedSecret>, VaultError> {
    match update {
        SecretUpdate::Keep => Ok(current),
        SecretUpdate::Set(v) if v.is_empty() => Ok(current),
        SecretUpdate::Set(v) => cipher::seal(key, v.as_bytes()).map(Some),
        SecretUpdate::Clear => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn vault_with(key: &MasterKey) -> CredentialVault {
        CredentialVault::new(VaultConfig {
            master_key: MasterKey::from_base64(&key.to_base64()).unwrap(),
        })
    }

    fn vault() -> CredentialVault {
        vault_with(&MasterKey::generate())
    }

    #[test]
    fn test_store_password_only() {
        let vault = vault();
        let presence = vault.store(ServerId(1), Some("secret"), None).unwrap();
        assert_eq!(presence, CredentialPresence::PasswordOnly);
        assert!(vault.has_password(ServerId(1)));
        assert!(!vault.has_private_key(ServerId(1)));

        let exported = vault.export();
        let sealed = exported[0].slot.password.as_ref().unwrap();
        assert_ne!(sealed.as_str(), "secret");
        assert!(!sealed.as_str().contains("secret"));
    }

    #[test]
    fn test_store_requires_a_secret() {
        let vault = vault();
        assert!(matches!(
            vault.store(ServerId(1), Some(""), None),
            Err(VaultError::Empty)
        ));
        assert!(vault.presence(ServerId(1)).is_none());
    }

    #[test]
    fn test_unseal_round_trip() {
        let vault = vault();
        vault
            .store(ServerId(7), Some("pw"), Some("-----BEGIN KEY-----"))
            .unwrap();

        let creds = vault.unseal(ServerId(7)).unwrap();
        assert_eq!(creds.password(), Some("pw"));
        assert_eq!(creds.private_key(), Some("-----BEGIN KEY-----"));
        assert_eq!(creds.presence(), Some(CredentialPresence::Both));
        assert!(!format!("{:?}", creds).contains("pw\""));

        assert!(matches!(
            vault.unseal(ServerId(8)),
            Err(VaultError::NotFound(ServerId(8)))
        ));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let vault = vault();
        let sealed = vault.encrypt("hello").unwrap();
        assert_eq!(vault.decrypt(&sealed).unwrap().as_str(), "hello");
    }

    #[test]
    fn test_update_semantics() {
        let vault = vault();
        vault.store(ServerId(1), Some("pw"), None).unwrap();
        let before = vault.export();

        // 空值保持原密文
        let presence = vault
            .update(
                ServerId(1),
                &SecretUpdate::Set(String::new()),
                &SecretUpdate::Keep,
            )
            .unwrap();
        assert_eq!(presence, CredentialPresence::PasswordOnly);
        assert_eq!(vault.export(), before);

        // 添加私钥
        vault
            .update(
                ServerId(1),
                &SecretUpdate::Keep,
                &SecretUpdate::Set("KEY".to_string()),
            )
            .unwrap();
        assert_eq!(vault.presence(ServerId(1)), Some(CredentialPresence::Both));

        // 清除密码
        vault
            .update(ServerId(1), &SecretUpdate::Clear, &SecretUpdate::Keep)
            .unwrap();
        assert_eq!(vault.presence(ServerId(1)), Some(CredentialPresence::KeyOnly));

        // 清空全部被拒绝，原状态不变
        let before = vault.export();
        assert!(matches!(
            vault.update(ServerId(1), &SecretUpdate::Keep, &SecretUpdate::Clear),
            Err(VaultError::Empty)
        ));
        assert_eq!(vault.export(), before);
    }

    #[test]
    fn test_rotate_key() {
        let old = MasterKey::generate();
        let vault = vault_with(&old);
        vault.store(ServerId(1), Some("pw1"), Some("key1")).unwrap();
        vault.store(ServerId(2), Some("pw2"), None).unwrap();
        let before = vault.export();

        let new = MasterKey::generate();
        let new_fingerprint = new.fingerprint();
        assert_eq!(vault.rotate_key(&old, new).unwrap(), 3);
        assert_eq!(vault.key_fingerprint(), new_fingerprint);
        assert_ne!(vault.export(), before);

        assert_eq!(vault.unseal(ServerId(1)).unwrap().password(), Some("pw1"));
        assert_eq!(vault.unseal(ServerId(2)).unwrap().password(), Some("pw2"));
        vault.verify_all().unwrap();
    }

    #[test]
    fn test_rotate_rejects_wrong_old_key() {
        let old = MasterKey::generate();
        let vault = vault_with(&old);
        vault.store(ServerId(1), Some("pw"), None).unwrap();
        let before = vault.export();

        let err = vault
            .rotate_key(&MasterKey::generate(), MasterKey::generate())
            .unwrap_err();
        assert!(matches!(err, VaultError::KeyMismatch));
        assert_eq!(vault.export(), before);
        assert_eq!(vault.key_fingerprint(), old.fingerprint());
    }

    #[test]
    fn test_rotate_aborts_without_partial_rewrite() {
        let old = MasterKey::generate();
        let vault = vault_with(&old);
        vault.store(ServerId(1), Some("pw"), None).unwrap();

        // 混入一条其他密钥加密的密文
        let mut records = vault.export();
        records.push(StoredCredentials {
            server_id: ServerId(2),
            slot: CredentialSlot {
                password: Some(cipher::seal(&MasterKey::generate(), b"foreign").unwrap()),
                private_key: None,
            },
        });
        vault.import(records);
        let before = vault.export();
        assert!(vault.verify_all().is_err());

        let err = vault.rotate_key(&old, MasterKey::generate()).unwrap_err();
        assert!(matches!(err, VaultError::Decryption(_)));
        assert_eq!(vault.export(), before);
        assert_eq!(vault.key_fingerprint(), old.fingerprint());
        assert_eq!(vault.unseal(ServerId(1)).unwrap().password(), Some("pw"));
    }

    #[test]
    fn test_rotation_never_mixes_keys_with_concurrent_reads() {
        let old = MasterKey::generate();
        let vault = Arc::new(vault_with(&old));
        for i in 0..16 {
            vault
                .store(ServerId(i), Some(&format!("pw{}", i)), None)
                .unwrap();
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let vault = vault.clone();
                thread::spawn(move || {
                    for round in 0..200 {
                        let id = ServerId(round % 16);
                        let creds = vault.unseal(id).expect("unseal during rotation");
                        assert_eq!(creds.password(), Some(format!("pw{}", id.0).as_str()));
                    }
                })
            })
            .collect();

        let mut current = old;
        for _ in 0..5 {
            let next = MasterKey::generate();
            let copy = MasterKey::from_base64(&next.to_base64()).unwrap();
            vault.rotate_key(&current, next).unwrap();
            current = copy;
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
