// 凭据保险库模块
//
// 模块结构:
// - cipher: 主密钥与单条密文加解密 (MasterKey, SealedSecret)
// - error: 错误类型 (VaultError)
// - store: 保险库 (CredentialVault, Credentials)

pub mod cipher;
pub mod error;
pub mod store;

pub use cipher::{MasterKey, SealedSecret};
pub use error::{DecryptFailure, VaultError};
pub use store::{CredentialSlot, CredentialVault, Credentials, StoredCredentials, VaultConfig};
