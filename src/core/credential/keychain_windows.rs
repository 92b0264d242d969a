//! Windows Credential Manager integration.
//!
//! tier (a) 的 Windows 实现：凭证 id 映射到 generic credential 的 target name，
//! 密文字符串存进 credential blob。

use super::secret_store::KeychainBackend;
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use winapi::um::wincred::{
    CredDeleteW, CredEnumerateW, CredFree, CredReadW, CredWriteW, CREDENTIALW,
    CRED_ENUMERATE_ALL_CREDENTIALS, CRED_MAX_CREDENTIAL_BLOB_SIZE, CRED_PERSIST_LOCAL_MACHINE,
    CRED_TYPE_GENERIC, PCREDENTIALW,
};

const TARGET_PREFIX: &str = "chartpilot:credential:";

/// ERROR_NOT_FOUND
const NOT_FOUND: u32 = 1168;

/// Windows Credential Manager backend.
pub struct WindowsKeychain;

impl WindowsKeychain {
    /// Creates a new Windows keychain backend, probing availability first.
    pub fn new() -> Result<Self, String> {
        unsafe {
            let mut count: u32 = 0;
            let mut credentials: *mut PCREDENTIALW = ptr::null_mut();
            let result = CredEnumerateW(
                ptr::null(),
                CRED_ENUMERATE_ALL_CREDENTIALS,
                &mut count,
                &mut credentials,
            );

            if !credentials.is_null() {
                CredFree(credentials as *mut _);
            }

            if result == 0 {
                let error_code = winapi::um::errhandlingapi::GetLastError();
                // NOT_FOUND is OK - means no credentials stored yet
                if error_code != NOT_FOUND {
                    return Err(format!(
                        "Windows Credential Manager unavailable, error code: {error_code}"
                    ));
                }
            }
        }

        Ok(WindowsKeychain)
    }

    fn make_target_name(id: &str) -> String {
        format!("{TARGET_PREFIX}{id}")
    }

    fn to_wide_string(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(Some(0)).collect()
    }
}

impl KeychainBackend for WindowsKeychain {
    fn set(&self, id: &str, value: &str) -> Result<(), String> {
        let target_wide = Self::to_wide_string(&Self::make_target_name(id));

        let blob = value.as_bytes();
        if blob.len() > CRED_MAX_CREDENTIAL_BLOB_SIZE as usize {
            return Err(format!(
                "Ciphertext too long ({} bytes, max {})",
                blob.len(),
                CRED_MAX_CREDENTIAL_BLOB_SIZE
            ));
        }

        unsafe {
            let mut cred = CREDENTIALW {
                Flags: 0,
                Type: CRED_TYPE_GENERIC,
                TargetName: target_wide.as_ptr() as *mut _,
                Comment: ptr::null_mut(),
                LastWritten: std::mem::zeroed(),
                CredentialBlobSize: blob.len() as u32,
                CredentialBlob: blob.as_ptr() as *mut _,
                Persist: CRED_PERSIST_LOCAL_MACHINE,
                AttributeCount: 0,
                Attributes: ptr::null_mut(),
                TargetAlias: ptr::null_mut(),
                UserName: ptr::null_mut(),
            };

            let result = CredWriteW(&mut cred, 0);
            if result == 0 {
                let error_code = winapi::um::errhandlingapi::GetLastError();
                return Err(format!(
                    "Failed to write credential to Windows Credential Manager, error code: {error_code}"
                ));
            }
        }

        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<String>, String> {
        let target_wide = Self::to_wide_string(&Self::make_target_name(id));

        unsafe {
            let mut credential: PCREDENTIALW = ptr::null_mut();
            let result = CredReadW(target_wide.as_ptr(), CRED_TYPE_GENERIC, 0, &mut credential);

            if result == 0 {
                let error_code = winapi::um::errhandlingapi::GetLastError();
                if error_code == NOT_FOUND {
                    return Ok(None);
                }
                return Err(format!(
                    "Failed to read credential from Windows Credential Manager, error code: {error_code}"
                ));
            }

            if credential.is_null() {
                return Err(
                    "Failed to read credential from Windows Credential Manager".to_string()
                );
            }

            let cred_ref = &*credential;
            let blob = std::slice::from_raw_parts(
                cred_ref.CredentialBlob,
                cred_ref.CredentialBlobSize as usize,
            );
            let value = String::from_utf8_lossy(blob).to_string();

            CredFree(credential as *mut _);

            Ok(Some(value))
        }
    }

    fn delete(&self, id: &str) -> Result<(), String> {
        let target_wide = Self::to_wide_string(&Self::make_target_name(id));

        unsafe {
            let result = CredDeleteW(target_wide.as_ptr(), CRED_TYPE_GENERIC, 0);
            if result == 0 {
                let error_code = winapi::um::errhandlingapi::GetLastError();
                // NOT_FOUND is OK - entry already gone
                if error_code != NOT_FOUND {
                    return Err(format!(
                        "Failed to delete credential from Windows Credential Manager, error code: {error_code}"
                    ));
                }
            }
        }

        Ok(())
    }
}
