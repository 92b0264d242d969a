//! 加密负载的双层持久化
//!
//! tier (a)：系统钥匙串服务，固定 service 名，account 为凭证 id；
//! tier (b)：应用私有目录下每凭证一个文件（0600），目录 0700。
//!
//! 写入策略：总是先尝试 (a)；失败只记 warn 并落盘到 (b)，不向调用方报错。
//! 读取按 (a) → (b) 顺序；(a) 未命中时 (b) 是权威来源，因此 (a) 短暂不可用
//! 期间写入的凭证在 (a) 恢复后仍然可读。删除对两层都执行且幂等。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(not(windows))]
use super::keychain_unix::UnixKeychain;
#[cfg(windows)]
use super::keychain_windows::WindowsKeychain;

#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("存储访问错误: {0}")]
    Access(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type SecretStoreResult<T> = Result<T, SecretStoreError>;

/// 系统钥匙串后端抽象：按凭证 id 存取带前缀的密文字符串
pub trait KeychainBackend: Send + Sync {
    fn set(&self, id: &str, value: &str) -> Result<(), String>;

    /// 未命中返回 Ok(None)，访问失败返回 Err
    fn get(&self, id: &str) -> Result<Option<String>, String>;

    /// 幂等：条目不存在不算错误
    fn delete(&self, id: &str) -> Result<(), String>;
}

/// 创建当前平台的系统钥匙串后端，不可用时返回 Err
pub fn system_keychain() -> Result<Arc<dyn KeychainBackend>, String> {
    #[cfg(not(windows))]
    {
        UnixKeychain::new().map(|k| Arc::new(k) as Arc<dyn KeychainBackend>)
    }
    #[cfg(windows)]
    {
        WindowsKeychain::new().map(|k| Arc::new(k) as Arc<dyn KeychainBackend>)
    }
}

/// 双层密文存储
pub struct SecretStore {
    keychain: Option<Arc<dyn KeychainBackend>>,
    secrets_dir: PathBuf,
}

impl SecretStore {
    /// 创建存储；`secrets` 子目录随即建好并收紧权限
    pub fn new(
        data_dir: &Path,
        keychain: Option<Arc<dyn KeychainBackend>>,
    ) -> SecretStoreResult<Self> {
        let secrets_dir = data_dir.join("secrets");
        fs::create_dir_all(&secrets_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&secrets_dir)?.permissions();
            perms.set_mode(0o700); // rwx------
            fs::set_permissions(&secrets_dir, perms)?;
        }

        Ok(Self {
            keychain,
            secrets_dir,
        })
    }

    /// 写入密文：钥匙串优先，失败回退文件层
    pub fn set_secret(&self, id: &str, tagged_ciphertext: &str) -> SecretStoreResult<()> {
        if let Some(keychain) = self.keychain.as_ref() {
            match keychain.set(id, tagged_ciphertext) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        credential_id = id,
                        "keychain write failed, falling back to file tier: {e}"
                    );
                }
            }
        }
        self.write_secret_file(id, tagged_ciphertext)
    }

    /// 读取密文：(a) 命中即返回，否则查 (b)；两层都未命中返回 None
    pub fn get_secret(&self, id: &str) -> SecretStoreResult<Option<String>> {
        if let Some(keychain) = self.keychain.as_ref() {
            match keychain.get(id) {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(credential_id = id, "keychain read failed: {e}");
                }
            }
        }

        let path = self.secret_file(id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    /// 删除两层中的密文；不存在不算错误
    pub fn delete_secret(&self, id: &str) -> SecretStoreResult<()> {
        if let Some(keychain) = self.keychain.as_ref() {
            if let Err(e) = keychain.delete(id) {
                tracing::warn!(credential_id = id, "keychain delete failed: {e}");
            }
        }

        let path = self.secret_file(id);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_secret_file(&self, id: &str, value: &str) -> SecretStoreResult<()> {
        let path = self.secret_file(id);
        fs::write(&path, value)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o600); // rw-------
            fs::set_permissions(&path, perms)?;
        }

        Ok(())
    }

    fn secret_file(&self, id: &str) -> PathBuf {
        // id 是保险库生成的短十六进制，天然是安全的文件名；
        // 防御性过滤一遍以免外部拼出路径分隔符
        let safe: String = id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        self.secrets_dir.join(format!("{safe}.secret"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// 测试替身：可开关故障的内存钥匙串
    struct MemoryKeychain {
        entries: Mutex<HashMap<String, String>>,
        broken: std::sync::atomic::AtomicBool,
    }

    impl MemoryKeychain {
        fn new() -> Self {
            Self {
                entries: Mutex::new(HashMap::new()),
                broken: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn set_broken(&self, broken: bool) {
            self.broken
                .store(broken, std::sync::atomic::Ordering::Relaxed);
        }

        fn is_broken(&self) -> bool {
            self.broken.load(std::sync::atomic::Ordering::Relaxed)
        }
    }

    impl KeychainBackend for MemoryKeychain {
        fn set(&self, id: &str, value: &str) -> Result<(), String> {
            if self.is_broken() {
                return Err("keychain service not running".to_string());
            }
            self.entries
                .lock()
                .unwrap()
                .insert(id.to_string(), value.to_string());
            Ok(())
        }

        fn get(&self, id: &str) -> Result<Option<String>, String> {
            if self.is_broken() {
                return Err("keychain service not running".to_string());
            }
            Ok(self.entries.lock().unwrap().get(id).cloned())
        }

        fn delete(&self, id: &str) -> Result<(), String> {
            if self.is_broken() {
                return Err("keychain service not running".to_string());
            }
            self.entries.lock().unwrap().remove(id);
            Ok(())
        }
    }

    #[test]
    fn test_roundtrip_keychain_tier() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path(), Some(Arc::new(MemoryKeychain::new()))).unwrap();

        store.set_secret("abc123", "crypto:payload").unwrap();
        assert_eq!(
            store.get_secret("abc123").unwrap().as_deref(),
            Some("crypto:payload")
        );
        // 钥匙串命中时不应落过文件
        assert!(!dir.path().join("secrets/abc123.secret").exists());
    }

    #[test]
    fn test_roundtrip_file_tier_without_keychain() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path(), None).unwrap();

        store.set_secret("abc123", "crypto:payload").unwrap();
        assert!(dir.path().join("secrets/abc123.secret").exists());
        assert_eq!(
            store.get_secret("abc123").unwrap().as_deref(),
            Some("crypto:payload")
        );
    }

    #[test]
    fn test_write_during_keychain_outage_survives_recovery() {
        let dir = TempDir::new().unwrap();
        let keychain = Arc::new(MemoryKeychain::new());
        let store = SecretStore::new(dir.path(), Some(keychain.clone())).unwrap();

        keychain.set_broken(true);
        store.set_secret("abc123", "crypto:payload").unwrap();

        // 钥匙串恢复后 (a) 未命中，(b) 仍是权威
        keychain.set_broken(false);
        assert_eq!(
            store.get_secret("abc123").unwrap().as_deref(),
            Some("crypto:payload")
        );
    }

    #[test]
    fn test_get_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path(), None).unwrap();
        assert!(store.get_secret("nope").unwrap().is_none());
    }

    #[test]
    fn test_delete_is_idempotent_on_both_tiers() {
        let dir = TempDir::new().unwrap();
        let keychain = Arc::new(MemoryKeychain::new());
        let store = SecretStore::new(dir.path(), Some(keychain)).unwrap();

        store.set_secret("abc123", "crypto:payload").unwrap();
        store.delete_secret("abc123").unwrap();
        store.delete_secret("abc123").unwrap();
        assert!(store.get_secret("abc123").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path(), None).unwrap();
        store.set_secret("abc123", "crypto:payload").unwrap();

        let mode = fs::metadata(dir.path().join("secrets/abc123.secret"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);

        let dir_mode = fs::metadata(dir.path().join("secrets"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn test_secret_file_name_sanitized() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path(), None).unwrap();
        store.set_secret("../../etc/passwd", "crypto:x").unwrap();
        // 过滤后只剩字母数字，落在 secrets 目录内
        assert!(dir.path().join("secrets/etcpasswd.secret").exists());
    }
}
