//! 凭证保险库模块
//!
//! 提供凭证的加密存储与管理：密文由 Cipher Backend 产生（系统加密器优先，
//! 回退到本地主密钥的对称加密），持久化走系统钥匙串 + 加密文件双层策略，
//! 非敏感元数据单独落盘为明文 JSON 索引。

pub mod audit;
pub mod cipher;
pub mod config;
pub mod model;
pub mod secret_store;
pub mod vault;

#[cfg(not(windows))]
pub mod keychain_unix;
#[cfg(windows)]
pub mod keychain_windows;

pub use cipher::{CipherBackend, OsStringEncryptor};
pub use config::CredentialConfig;
pub use model::{Credential, CredentialKind, GitAuthType};
pub use vault::CredentialVault;
