//! Unix (macOS/Linux) keychain integration.
//!
//! tier (a) 的平台实现：
//! - macOS: Keychain via security-framework
//! - Linux: Secret Service via secret-service crate
//!
//! 存储单元是「凭证 id → 带前缀密文」，service 名固定。

use super::config::SERVICE_NAME;
use super::secret_store::KeychainBackend;

const ACCOUNT_PREFIX: &str = "credential";

/// Unix keychain backend.
pub struct UnixKeychain {
    #[cfg(target_os = "macos")]
    _phantom: std::marker::PhantomData<()>,
    #[cfg(target_os = "linux")]
    connection: secret_service::blocking::SecretService<'static>,
}

impl UnixKeychain {
    /// Creates a new Unix keychain backend (macOS).
    #[cfg(target_os = "macos")]
    pub fn new() -> Result<Self, String> {
        // Probe keychain availability up front
        use security_framework::os::macos::keychain::SecKeychain;

        match SecKeychain::default() {
            Ok(_) => Ok(UnixKeychain {
                _phantom: std::marker::PhantomData,
            }),
            Err(e) => Err(format!("macOS Keychain unavailable: {e}")),
        }
    }

    /// Creates a new Unix keychain backend (Linux).
    #[cfg(target_os = "linux")]
    pub fn new() -> Result<Self, String> {
        use secret_service::blocking::SecretService;
        use secret_service::EncryptionType;

        match SecretService::connect(EncryptionType::Dh) {
            Ok(connection) => Ok(UnixKeychain { connection }),
            Err(e) => Err(format!("Linux Secret Service unavailable: {e}")),
        }
    }

    /// Creates a new Unix keychain backend (other Unix).
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    pub fn new() -> Result<Self, String> {
        Err("Unix keychain not supported on this platform".to_string())
    }

    fn make_account(id: &str) -> String {
        format!("{ACCOUNT_PREFIX}:{id}")
    }
}

#[cfg(target_os = "macos")]
impl KeychainBackend for UnixKeychain {
    fn set(&self, id: &str, value: &str) -> Result<(), String> {
        use security_framework::os::macos::passwords::{
            delete_generic_password, set_generic_password,
        };

        let account = Self::make_account(id);
        // Delete existing entry if any (update)
        let _ = delete_generic_password(None, SERVICE_NAME, &account);

        set_generic_password(None, SERVICE_NAME, &account, value.as_bytes())
            .map_err(|e| format!("Failed to write to macOS keychain: {e}"))
    }

    fn get(&self, id: &str) -> Result<Option<String>, String> {
        use security_framework::os::macos::passwords::find_generic_password;

        let account = Self::make_account(id);
        match find_generic_password(None, SERVICE_NAME, &account) {
            Ok((bytes, _)) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
            Err(e) => {
                if e.to_string().contains("errSecItemNotFound") {
                    Ok(None)
                } else {
                    Err(format!("Failed to read from macOS keychain: {e}"))
                }
            }
        }
    }

    fn delete(&self, id: &str) -> Result<(), String> {
        use security_framework::os::macos::passwords::delete_generic_password;

        let account = Self::make_account(id);
        match delete_generic_password(None, SERVICE_NAME, &account) {
            Ok(_) => Ok(()),
            Err(e) => {
                // Item not found is OK
                if e.to_string().contains("errSecItemNotFound") {
                    Ok(())
                } else {
                    Err(format!("Failed to delete from macOS keychain: {e}"))
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
impl KeychainBackend for UnixKeychain {
    fn set(&self, id: &str, value: &str) -> Result<(), String> {
        let account = Self::make_account(id);
        let collection = self
            .connection
            .get_default_collection()
            .map_err(|e| format!("Failed to access default collection: {e}"))?;

        collection
            .create_item(
                &format!("chartpilot credential {id}"),
                vec![("service", SERVICE_NAME), ("account", &account)]
                    .into_iter()
                    .collect(),
                value.as_bytes(),
                true, // replace existing
                "text/plain",
            )
            .map_err(|e| format!("Failed to create item: {e}"))?;

        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<String>, String> {
        let account = Self::make_account(id);
        let collection = self
            .connection
            .get_default_collection()
            .map_err(|e| format!("Failed to access default collection: {e}"))?;

        let items = collection
            .search_items(
                vec![("service", SERVICE_NAME), ("account", &account)]
                    .into_iter()
                    .collect(),
            )
            .map_err(|e| format!("Failed to search items: {e}"))?;

        let Some(item) = items.first() else {
            return Ok(None);
        };
        let secret = item
            .get_secret()
            .map_err(|e| format!("Failed to get secret: {e}"))?;
        Ok(Some(String::from_utf8_lossy(&secret).to_string()))
    }

    fn delete(&self, id: &str) -> Result<(), String> {
        let account = Self::make_account(id);
        let collection = self
            .connection
            .get_default_collection()
            .map_err(|e| format!("Failed to access default collection: {e}"))?;

        let items = collection
            .search_items(
                vec![("service", SERVICE_NAME), ("account", &account)]
                    .into_iter()
                    .collect(),
            )
            .map_err(|e| format!("Failed to search items: {e}"))?;

        for item in items {
            item.delete()
                .map_err(|e| format!("Failed to delete item: {e}"))?;
        }

        Ok(())
    }
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
impl KeychainBackend for UnixKeychain {
    fn set(&self, _id: &str, _value: &str) -> Result<(), String> {
        Err("Unix keychain not supported on this platform".to_string())
    }

    fn get(&self, _id: &str) -> Result<Option<String>, String> {
        Err("Unix keychain not supported on this platform".to_string())
    }

    fn delete(&self, _id: &str) -> Result<(), String> {
        Err("Unix keychain not supported on this platform".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keychain_probe_does_not_panic() {
        // 可用或优雅失败都行，取决于运行环境
        match UnixKeychain::new() {
            Ok(_) => println!("system keychain available"),
            Err(e) => println!("system keychain unavailable: {e}"),
        }
    }

    #[test]
    fn test_account_naming() {
        assert_eq!(UnixKeychain::make_account("abc123"), "credential:abc123");
    }
}
