//! Cipher Backend：带 scheme 前缀的字符串加解密
//!
//! 加密优先走注入的系统字符串加密器（`safe:` 前缀）；系统加密器不可用时
//! 回退到本地主密钥驱动的 AES-256-GCM（`crypto:` 前缀，兼容历史 `forge:`）。
//!
//! 解密只看密文前缀、不看当前能力：回退加密的负载在系统加密器恢复可用后
//! 仍然必须可解。未知前缀是 `InvalidFormat`，必须向调用方冒泡。

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use zeroize::ZeroizeOnDrop;

/// 系统加密器产出的负载前缀
pub const SCHEME_OS: &str = "safe:";
/// 回退对称加密产出的负载前缀
pub const SCHEME_FALLBACK: &str = "crypto:";
/// 历史版本使用的回退前缀，仅解密时接受
pub const SCHEME_FALLBACK_LEGACY: &str = "forge:";

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// 主密钥文件名（data_dir 下，0600）
const MASTER_KEY_FILE: &str = "master.key";

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("无法识别的密文前缀")]
    InvalidFormat,

    #[error("safe: 负载需要系统加密器，但当前不可用")]
    OsEncryptorUnavailable,

    #[error("加密失败: {0}")]
    EncryptFailed(String),

    #[error("解密失败: {0}")]
    DecryptFailed(String),

    #[error("主密钥访问失败: {0}")]
    MasterKey(String),
}

/// 系统提供的字符串加密原语（Electron safeStorage 一类的能力），
/// 由环境注入，便于测试替身。
pub trait OsStringEncryptor: Send + Sync {
    /// 当前是否可用（headless 环境、缺少系统支持时为 false）
    fn is_available(&self) -> bool;

    fn encrypt_string(&self, plaintext: &str) -> Result<Vec<u8>, String>;

    fn decrypt_string(&self, data: &[u8]) -> Result<String, String>;
}

/// Encryption key with automatic zeroization.
#[derive(ZeroizeOnDrop)]
struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// 加解密后端：系统加密器 + 主密钥回退
pub struct CipherBackend {
    os_encryptor: Option<Arc<dyn OsStringEncryptor>>,
    master_key_path: PathBuf,
    // Lazily loaded; generated and persisted on first fallback use
    master_key: Mutex<Option<Arc<EncryptionKey>>>,
}

impl CipherBackend {
    pub fn new(data_dir: &Path, os_encryptor: Option<Arc<dyn OsStringEncryptor>>) -> Self {
        Self {
            os_encryptor,
            master_key_path: data_dir.join(MASTER_KEY_FILE),
            master_key: Mutex::new(None),
        }
    }

    /// 加密任意字符串（空串合法），返回带 scheme 前缀的密文
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if let Some(os) = self.os_encryptor.as_ref() {
            if os.is_available() {
                let encrypted = os
                    .encrypt_string(plaintext)
                    .map_err(CipherError::EncryptFailed)?;
                let encoded = general_purpose::STANDARD.encode(encrypted);
                return Ok(format!("{SCHEME_OS}{encoded}"));
            }
            tracing::debug!("os string encryptor unavailable, using fallback cipher");
        }
        self.fallback_encrypt(plaintext)
    }

    /// 解密：按密文前缀分发，与当前加密能力无关
    pub fn decrypt(&self, tagged: &str) -> Result<String, CipherError> {
        if let Some(encoded) = tagged.strip_prefix(SCHEME_OS) {
            let os = self
                .os_encryptor
                .as_ref()
                .ok_or(CipherError::OsEncryptorUnavailable)?;
            let data = general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| CipherError::DecryptFailed(format!("base64: {e}")))?;
            return os.decrypt_string(&data).map_err(CipherError::DecryptFailed);
        }

        let encoded = tagged
            .strip_prefix(SCHEME_FALLBACK)
            .or_else(|| tagged.strip_prefix(SCHEME_FALLBACK_LEGACY))
            .ok_or(CipherError::InvalidFormat)?;
        self.fallback_decrypt(encoded)
    }

    fn fallback_encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let key = self.load_or_create_master_key()?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| CipherError::EncryptFailed(e.to_string()))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CipherError::EncryptFailed(e.to_string()))?;

        // nonce 前置拼接后整体 base64
        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(nonce.as_slice());
        payload.extend_from_slice(&ciphertext);

        Ok(format!(
            "{SCHEME_FALLBACK}{}",
            general_purpose::STANDARD.encode(payload)
        ))
    }

    fn fallback_decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let payload = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CipherError::DecryptFailed(format!("base64: {e}")))?;
        if payload.len() < NONCE_SIZE {
            return Err(CipherError::DecryptFailed("负载长度不足".to_string()));
        }

        let key = self.load_or_create_master_key()?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| CipherError::DecryptFailed(e.to_string()))?;

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CipherError::DecryptFailed(e.to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CipherError::DecryptFailed(format!("非 UTF-8 明文: {e}")))
    }

    /// 加载主密钥；不存在时生成 256 位随机密钥并以 0600 权限落盘一次
    fn load_or_create_master_key(&self) -> Result<Arc<EncryptionKey>, CipherError> {
        let mut guard = self
            .master_key
            .lock()
            .map_err(|e| CipherError::MasterKey(format!("锁获取失败: {e}")))?;
        if let Some(key) = guard.as_ref() {
            return Ok(Arc::clone(key));
        }

        let key = if self.master_key_path.exists() {
            let encoded = fs::read_to_string(&self.master_key_path)
                .map_err(|e| CipherError::MasterKey(format!("读取失败: {e}")))?;
            let bytes = general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| CipherError::MasterKey(format!("base64: {e}")))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| CipherError::MasterKey("密钥长度不是 32 字节".to_string()))?;
            EncryptionKey(bytes)
        } else {
            use rand::RngCore;
            let mut bytes = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut bytes);
            self.persist_master_key(&bytes)?;
            tracing::info!("generated fallback master key at {:?}", self.master_key_path);
            EncryptionKey(bytes)
        };

        let key = Arc::new(key);
        *guard = Some(Arc::clone(&key));
        Ok(key)
    }

    fn persist_master_key(&self, bytes: &[u8; 32]) -> Result<(), CipherError> {
        if let Some(parent) = self.master_key_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CipherError::MasterKey(format!("创建目录失败: {e}")))?;
        }
        fs::write(
            &self.master_key_path,
            general_purpose::STANDARD.encode(bytes),
        )
        .map_err(|e| CipherError::MasterKey(format!("写入失败: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.master_key_path)
                .map_err(|e| CipherError::MasterKey(format!("读取元数据失败: {e}")))?
                .permissions();
            perms.set_mode(0o600); // rw-------
            fs::set_permissions(&self.master_key_path, perms)
                .map_err(|e| CipherError::MasterKey(format!("设置权限失败: {e}")))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// 测试替身：可逆的假系统加密器（按字节取反）
    pub(crate) struct FakeOsEncryptor {
        pub available: std::sync::atomic::AtomicBool,
    }

    impl FakeOsEncryptor {
        pub(crate) fn new(available: bool) -> Self {
            Self {
                available: std::sync::atomic::AtomicBool::new(available),
            }
        }
    }

    impl OsStringEncryptor for FakeOsEncryptor {
        fn is_available(&self) -> bool {
            self.available.load(std::sync::atomic::Ordering::Relaxed)
        }

        fn encrypt_string(&self, plaintext: &str) -> Result<Vec<u8>, String> {
            Ok(plaintext.bytes().map(|b| !b).collect())
        }

        fn decrypt_string(&self, data: &[u8]) -> Result<String, String> {
            String::from_utf8(data.iter().map(|b| !b).collect()).map_err(|e| e.to_string())
        }
    }

    #[test]
    fn test_fallback_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cipher = CipherBackend::new(dir.path(), None);

        let tagged = cipher.encrypt("s3cret-value").unwrap();
        assert!(tagged.starts_with(SCHEME_FALLBACK));
        assert_eq!(cipher.decrypt(&tagged).unwrap(), "s3cret-value");
    }

    #[test]
    fn test_empty_string_is_valid_plaintext() {
        let dir = TempDir::new().unwrap();
        let cipher = CipherBackend::new(dir.path(), None);

        let tagged = cipher.encrypt("").unwrap();
        assert_eq!(cipher.decrypt(&tagged).unwrap(), "");
    }

    #[test]
    fn test_os_encryptor_preferred_when_available() {
        let dir = TempDir::new().unwrap();
        let cipher = CipherBackend::new(dir.path(), Some(Arc::new(FakeOsEncryptor::new(true))));

        let tagged = cipher.encrypt("value").unwrap();
        assert!(tagged.starts_with(SCHEME_OS));
        assert_eq!(cipher.decrypt(&tagged).unwrap(), "value");
    }

    #[test]
    fn test_fallback_payload_decrypts_after_os_becomes_available() {
        let dir = TempDir::new().unwrap();
        let encryptor = Arc::new(FakeOsEncryptor::new(false));
        let cipher = CipherBackend::new(dir.path(), Some(encryptor.clone()));

        let tagged = cipher.encrypt("stable").unwrap();
        assert!(tagged.starts_with(SCHEME_FALLBACK));

        // 系统加密器上线后，旧的回退负载仍可解密，新写入切换到 safe:
        encryptor
            .available
            .store(true, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(cipher.decrypt(&tagged).unwrap(), "stable");
        assert!(cipher.encrypt("new").unwrap().starts_with(SCHEME_OS));
    }

    #[test]
    fn test_legacy_forge_prefix_accepted() {
        let dir = TempDir::new().unwrap();
        let cipher = CipherBackend::new(dir.path(), None);

        let tagged = cipher.encrypt("legacy").unwrap();
        let legacy = tagged.replacen(SCHEME_FALLBACK, SCHEME_FALLBACK_LEGACY, 1);
        assert_eq!(cipher.decrypt(&legacy).unwrap(), "legacy");
    }

    #[test]
    fn test_unknown_prefix_is_invalid_format() {
        let dir = TempDir::new().unwrap();
        let cipher = CipherBackend::new(dir.path(), None);

        let err = cipher.decrypt("plain:whatever").unwrap_err();
        assert!(matches!(err, CipherError::InvalidFormat));
    }

    #[test]
    fn test_master_key_persisted_across_instances() {
        let dir = TempDir::new().unwrap();
        let tagged = {
            let cipher = CipherBackend::new(dir.path(), None);
            cipher.encrypt("durable").unwrap()
        };

        // 新实例读取同一密钥文件
        let cipher = CipherBackend::new(dir.path(), None);
        assert_eq!(cipher.decrypt(&tagged).unwrap(), "durable");
    }

    #[cfg(unix)]
    #[test]
    fn test_master_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let cipher = CipherBackend::new(dir.path(), None);
        cipher.encrypt("x").unwrap();

        let mode = fs::metadata(dir.path().join(MASTER_KEY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_safe_payload_without_encryptor_errors() {
        let dir = TempDir::new().unwrap();
        let cipher = CipherBackend::new(dir.path(), None);
        let err = cipher.decrypt("safe:aGVsbG8=").unwrap_err();
        assert!(matches!(err, CipherError::OsEncryptorUnavailable));
    }
}
