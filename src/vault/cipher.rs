// 主密钥与单条密文的加解密
//
// 密文格式：base64( version(1) || nonce(12) || ciphertext || tag(16) )
// 算法：ChaCha20-Poly1305，每次加密使用新的随机 nonce

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::error::{DecryptFailure, VaultError};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const FORMAT_VERSION: u8 = 1;

/// 主密钥（32 字节），drop 时清零
pub struct MasterKey(Zeroizing<[u8; KEY_LEN]>);

impl MasterKey {
    /// 生成新的随机主密钥
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut *key);
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        if bytes.len() != KEY_LEN {
            return Err(VaultError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// 从 base64 字符串加载（环境变量 / .env）
    pub fn from_base64(encoded: &str) -> Result<Self, VaultError> {
        let bytes = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|_| VaultError::InvalidKey("not valid base64".to_string()))?,
        );
        Self::from_bytes(&bytes)
    }

    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(BASE64.encode(&*self.0))
    }

    /// 密钥指纹（SHA-256 前 8 字节），只用于日志中区分密钥
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&*self.0);
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// 常量时间比较
    pub(crate) fn matches(&self, other: &MasterKey) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305, VaultError> {
        ChaCha20Poly1305::new_from_slice(&*self.0)
            .map_err(|_| VaultError::Encryption("cipher initialization failed".to_string()))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey({})", self.fingerprint())
    }
}

/// 已加密的密文（可安全持久化）
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSecret(String);

impl SealedSecret {
    /// 从持久化字符串构建，不做校验（解密时校验）
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedSecret({} chars)", self.0.len())
    }
}

/// 加密
pub fn seal(key: &MasterKey, plaintext: &[u8]) -> Result<SealedSecret, VaultError> {
    let cipher = key.cipher()?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    // ChaCha20Poly1305 会把 16 字节 tag 追加到密文末尾
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| VaultError::Encryption("cipher rejected input".to_string()))?;

    let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    blob.push(FORMAT_VERSION);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(SealedSecret(BASE64.encode(blob)))
}

/// 解密，失败时不返回任何部分数据
pub fn open(key: &MasterKey, sealed: &SealedSecret) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let blob = BASE64
        .decode(sealed.as_str())
        .map_err(|_| DecryptFailure::Malformed("not valid base64"))?;

    if blob.len() < 1 + NONCE_LEN + TAG_LEN {
        return Err(DecryptFailure::Malformed("too short").into());
    }
    if blob[0] != FORMAT_VERSION {
        return Err(DecryptFailure::Malformed("unsupported version").into());
    }

    let (nonce, ciphertext) = blob[1..].split_at(NONCE_LEN);
    let cipher = key
        .cipher()
        .map_err(|_| VaultError::Decryption(DecryptFailure::Authentication))?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| DecryptFailure::Authentication)?;

    Ok(Zeroizing::new(plaintext))
}
