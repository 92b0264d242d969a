//! Credential Vault：凭证保险库门面
//!
//! 组合 Cipher Backend 与双层 Secret Store，提供四类凭证的强类型 CRUD、
//! 按 URL/标签查找与稳定 id 生成。敏感字段整体序列化后加密存储，
//! 非敏感元数据写入单个 JSON 索引文件（每次变更全量重写，last-writer-wins）。
//!
//! 保险库是显式构造、依赖注入的服务实例，自己持有数据目录与加密后端；
//! 不提供任何模块级单例。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::audit::{AuditLogger, OperationType};
use super::cipher::{CipherBackend, CipherError, OsStringEncryptor};
use super::config::CredentialConfig;
use super::model::{generate_id, Credential, CredentialKind};
use super::secret_store::{system_keychain, SecretStore, SecretStoreError};

/// 元数据索引文件名
const METADATA_FILE: &str = "credentials.json";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("配置无效: {0}")]
    Config(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Store(#[from] SecretStoreError),
}

pub type VaultResult<T> = Result<T, VaultError>;

/// 敏感字段的整体加密负载；store 时全量替换，绝不局部修补
#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SecretPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    passphrase: Option<String>,
}

impl SecretPayload {
    fn from_credential(cred: &Credential) -> Self {
        Self {
            token: cred.token.clone(),
            password: cred.password.clone(),
            private_key: cred.private_key.clone(),
            passphrase: cred.passphrase.clone(),
        }
    }

    fn apply_to(self, cred: &mut Credential) {
        cred.token = self.token;
        cred.password = self.password;
        cred.private_key = self.private_key;
        cred.passphrase = self.passphrase;
    }
}

/// 查找条件：URL 按规范化后相等匹配，标签取交集
#[derive(Debug, Clone, Default)]
pub struct FindCriteria {
    pub repo_url: Option<String>,
    pub kind: Option<CredentialKind>,
    pub tags: Vec<String>,
}

impl FindCriteria {
    pub fn by_url(url: impl Into<String>) -> Self {
        Self {
            repo_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: CredentialKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// 规范化仓库 URL：trim、小写、去掉尾部 `/` 与 `.git`
///
/// 同一仓库在不同调用点可能带或不带 `.git` 后缀/尾斜杠，查找必须视为等价。
pub fn normalize_repo_url(url: &str) -> String {
    let mut normalized = url.trim().to_lowercase();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    if let Some(stripped) = normalized.strip_suffix(".git") {
        normalized = stripped.to_string();
    }
    while normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// 凭证保险库
pub struct CredentialVault {
    config: CredentialConfig,
    cipher: CipherBackend,
    store: SecretStore,
    metadata_path: PathBuf,
    audit: AuditLogger,
    // 进程内串行化元数据的读-改-写；跨进程仍是 last-writer-wins
    metadata_lock: Mutex<()>,
}

impl CredentialVault {
    /// 创建保险库实例；数据目录随即建好，钥匙串按配置探测、失败静默降级
    pub fn new(
        config: CredentialConfig,
        os_encryptor: Option<Arc<dyn OsStringEncryptor>>,
    ) -> VaultResult<Self> {
        config.validate().map_err(VaultError::Config)?;

        std::fs::create_dir_all(&config.data_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&config.data_dir)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(&config.data_dir, perms)?;
        }

        let keychain = if config.use_system_keychain {
            match system_keychain() {
                Ok(keychain) => Some(keychain),
                Err(e) => {
                    tracing::warn!("system keychain unavailable, file tier only: {e}");
                    None
                }
            }
        } else {
            None
        };

        let cipher = CipherBackend::new(&config.data_dir, os_encryptor);
        let store = SecretStore::new(&config.data_dir, keychain)?;
        let metadata_path = config.data_dir.join(METADATA_FILE);
        let audit = AuditLogger::new(config.audit_mode);

        Ok(Self {
            config,
            cipher,
            store,
            metadata_path,
            audit,
            metadata_lock: Mutex::new(()),
        })
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// 生成凭证稳定标识符（保险库独占所有权，调用方不得自行构造）
    pub fn generate_id(kind: CredentialKind, identifier: &str) -> String {
        generate_id(kind, identifier, Utc::now())
    }

    /// 存入（或整体替换）一个凭证；返回带 id 的凭证
    ///
    /// 敏感字段加密后走双层存储，元数据全量重写；`updated_at` 总是刷新。
    pub async fn store(&self, mut credential: Credential) -> VaultResult<Credential> {
        if credential.id.is_empty() {
            let identifier = credential
                .identifying_url()
                .unwrap_or(credential.name.as_str())
                .to_string();
            credential.id = generate_id(credential.kind, &identifier, credential.created_at);
        }
        credential.updated_at = Utc::now();

        let payload = SecretPayload::from_credential(&credential);
        let plaintext = serde_json::to_string(&payload)?;
        let audit_secret = credential
            .token
            .clone()
            .or_else(|| credential.password.clone());

        let result: VaultResult<()> = async {
            let tagged = self.cipher.encrypt(&plaintext)?;
            self.store.set_secret(&credential.id, &tagged)?;

            let _guard = self.metadata_lock.lock().await;
            let mut metadata = self.load_metadata().await?;
            let mut entry = credential.clone();
            entry.strip_secrets();
            metadata.insert(entry.id.clone(), entry);
            self.save_metadata(&metadata).await?;
            Ok(())
        }
        .await;

        self.audit.log_operation(
            OperationType::Store,
            &credential.id,
            audit_secret.as_deref(),
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
        );
        result?;

        Ok(credential)
    }

    /// 读取完整凭证（元数据 + 解密后的敏感字段）
    ///
    /// 解密失败只记日志并返回缺少敏感字段的凭证，元数据列表不因此失效。
    pub async fn get(&self, id: &str) -> VaultResult<Option<Credential>> {
        let metadata = self.load_metadata().await?;
        let Some(mut credential) = metadata.get(id).cloned() else {
            self.audit
                .log_operation(OperationType::Get, id, None, true, None);
            return Ok(None);
        };

        match self.store.get_secret(id) {
            Ok(Some(tagged)) => match self.cipher.decrypt(&tagged) {
                Ok(plaintext) => match serde_json::from_str::<SecretPayload>(&plaintext) {
                    Ok(payload) => payload.apply_to(&mut credential),
                    Err(e) => {
                        tracing::warn!(credential_id = id, "secret payload malformed: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        credential_id = id,
                        "decryption failed, returning metadata only: {e}"
                    );
                }
            },
            Ok(None) => {
                tracing::debug!(credential_id = id, "no secret payload stored");
            }
            Err(e) => {
                tracing::warn!(credential_id = id, "secret store read failed: {e}");
            }
        }

        self.audit
            .log_operation(OperationType::Get, id, None, true, None);
        Ok(Some(credential))
    }

    /// 列出凭证（仅元数据，不含敏感字段），按 `updated_at` 降序
    pub async fn list(
        &self,
        kind: Option<CredentialKind>,
        environment: Option<&str>,
    ) -> VaultResult<Vec<Credential>> {
        let metadata = self.load_metadata().await?;
        let mut credentials: Vec<Credential> = metadata
            .into_values()
            .filter(|c| kind.map_or(true, |k| c.kind == k))
            .filter(|c| environment.map_or(true, |env| c.environment.as_deref() == Some(env)))
            .collect();
        credentials.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        self.audit
            .log_operation(OperationType::List, "", None, true, None);
        Ok(credentials)
    }

    /// 按条件查找凭证（仅元数据）；URL 规范化后相等 + 标签交集
    pub async fn find(&self, criteria: &FindCriteria) -> VaultResult<Vec<Credential>> {
        let normalized_url = criteria.repo_url.as_deref().map(normalize_repo_url);
        let metadata = self.load_metadata().await?;

        let mut matches: Vec<Credential> = metadata
            .into_values()
            .filter(|c| criteria.kind.map_or(true, |k| c.kind == k))
            .filter(|c| match normalized_url.as_deref() {
                Some(wanted) => c
                    .identifying_url()
                    .map(normalize_repo_url)
                    .map_or(false, |have| have == wanted),
                None => true,
            })
            .filter(|c| {
                criteria.tags.is_empty()
                    || criteria.tags.iter().any(|tag| c.tags.contains(tag))
            })
            .collect();
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        self.audit
            .log_operation(OperationType::Find, "", None, true, None);
        Ok(matches)
    }

    /// 删除凭证（密文 + 元数据）；幂等，返回是否真的删掉了什么
    pub async fn delete(&self, id: &str) -> VaultResult<bool> {
        let result: VaultResult<bool> = async {
            self.store.delete_secret(id)?;

            let _guard = self.metadata_lock.lock().await;
            let mut metadata = self.load_metadata().await?;
            let existed = metadata.remove(id).is_some();
            if existed {
                self.save_metadata(&metadata).await?;
            }
            Ok(existed)
        }
        .await;

        self.audit.log_operation(
            OperationType::Delete,
            id,
            None,
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
        );
        result
    }

    async fn load_metadata(&self) -> VaultResult<HashMap<String, Credential>> {
        match tokio::fs::read_to_string(&self.metadata_path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_metadata(&self, metadata: &HashMap<String, Credential>) -> VaultResult<()> {
        let content = serde_json::to_string_pretty(metadata)?;
        tokio::fs::write(&self.metadata_path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tokio::fs::metadata(&self.metadata_path).await?.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(&self.metadata_path, perms).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credential::model::GitAuthType;
    use tempfile::TempDir;

    fn vault(dir: &TempDir) -> CredentialVault {
        let config = CredentialConfig::new(dir.path()).with_system_keychain(false);
        CredentialVault::new(config, None).unwrap()
    }

    fn git_credential() -> Credential {
        Credential::git("ci-bot", "https://git.acme.io/scm/plat/charts.git", GitAuthType::Token)
            .with_username("ci-bot")
            .with_token("ATBBsecrettoken1234")
            .with_environment("prod")
            .with_tags(vec!["helm".to_string(), "prod".to_string()])
    }

    #[test]
    fn test_normalize_repo_url() {
        let expected = "https://host/a/b";
        assert_eq!(normalize_repo_url("https://host/a/b.git"), expected);
        assert_eq!(normalize_repo_url("https://host/a/b/"), expected);
        assert_eq!(normalize_repo_url("  HTTPS://Host/a/b.GIT  "), expected);
        assert_eq!(normalize_repo_url("https://host/a/b.git/"), expected);
    }

    #[tokio::test]
    async fn test_store_assigns_id_and_rewrites_updated_at() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);

        let before = Utc::now();
        let stored = vault.store(git_credential()).await.unwrap();
        assert_eq!(stored.id.len(), 12);
        assert!(stored.updated_at >= before);
    }

    #[tokio::test]
    async fn test_metadata_file_never_contains_secrets() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        vault.store(git_credential()).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap();
        assert!(!raw.contains("ATBBsecrettoken1234"));
        assert!(raw.contains("ci-bot"));
    }

    #[tokio::test]
    async fn test_list_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);

        vault.store(git_credential()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let mut helm = Credential::new(CredentialKind::Helm, "registry");
        helm.registry_url = Some("oci://charts.acme.io".into());
        helm.token = Some("helm-token-12345".into());
        let helm = vault.store(helm).await.unwrap();

        let all = vault.list(None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        // 最近更新的排在前面，且不带敏感字段
        assert_eq!(all[0].id, helm.id);
        assert!(all.iter().all(|c| !c.has_secrets()));

        let git_only = vault.list(Some(CredentialKind::Git), None).await.unwrap();
        assert_eq!(git_only.len(), 1);

        let prod = vault.list(None, Some("prod")).await.unwrap();
        assert_eq!(prod.len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_tags() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        vault.store(git_credential()).await.unwrap();

        let criteria = FindCriteria::default().with_tags(vec!["helm".to_string()]);
        assert_eq!(vault.find(&criteria).await.unwrap().len(), 1);

        let criteria = FindCriteria::default().with_tags(vec!["unrelated".to_string()]);
        assert!(vault.find(&criteria).await.unwrap().is_empty());
    }
}
