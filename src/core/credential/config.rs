//! 凭证保险库配置
//!
//! 定义保险库的数据目录、存储与审计相关配置。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 钥匙串服务名（tier a 的固定 service key）
pub const SERVICE_NAME: &str = "chartpilot";

/// 凭证保险库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialConfig {
    /// 应用私有数据目录：元数据索引、主密钥、加密负载文件都放在这里
    pub data_dir: PathBuf,

    /// 是否尝试系统钥匙串作为首选存储层（失败时静默回退到文件层）
    #[serde(default = "default_true")]
    pub use_system_keychain: bool,

    /// 是否启用审计模式（记录凭证操作的加盐哈希摘要）
    #[serde(default)]
    pub audit_mode: bool,
}

fn default_true() -> bool {
    true
}

impl CredentialConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            use_system_keychain: true,
            audit_mode: false,
        }
    }

    pub fn with_system_keychain(mut self, enabled: bool) -> Self {
        self.use_system_keychain = enabled;
        self
    }

    pub fn with_audit_mode(mut self, enabled: bool) -> Self {
        self.audit_mode = enabled;
        self
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.data_dir.as_os_str().is_empty() {
            return Err("data_dir 不能为空".to_string());
        }
        Ok(())
    }
}
