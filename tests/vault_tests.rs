//! 保险库端到端行为：落盘往返、幂等删除、URL 规范化查找、
//! 回退加密的长期可读性、密文损坏时的降级读取。

use std::sync::Arc;

use chartpilot::core::credential::cipher::OsStringEncryptor;
use chartpilot::core::credential::config::CredentialConfig;
use chartpilot::core::credential::model::{Credential, CredentialKind, GitAuthType};
use chartpilot::core::credential::vault::{CredentialVault, FindCriteria};
use tempfile::TempDir;

fn file_only_vault(dir: &TempDir) -> CredentialVault {
    let config = CredentialConfig::new(dir.path()).with_system_keychain(false);
    CredentialVault::new(config, None).unwrap()
}

fn git_credential() -> Credential {
    Credential::git(
        "deploy-bot",
        "https://git.acme.io/scm/plat/charts.git",
        GitAuthType::Token,
    )
    .with_username("deploy-bot")
    .with_token("ATBB-very-secret-token")
    .with_environment("prod")
    .with_tags(vec!["helm".into()])
}

#[tokio::test]
async fn test_round_trip_preserves_secrets_and_metadata() {
    let dir = TempDir::new().unwrap();
    let vault = file_only_vault(&dir);

    let stored = vault.store(git_credential()).await.unwrap();
    let fetched = vault.get(&stored.id).await.unwrap().unwrap();

    assert_eq!(fetched.name, "deploy-bot");
    assert_eq!(fetched.kind, CredentialKind::Git);
    assert_eq!(fetched.token.as_deref(), Some("ATBB-very-secret-token"));
    assert_eq!(fetched.username.as_deref(), Some("deploy-bot"));
    assert_eq!(fetched.environment.as_deref(), Some("prod"));
    assert_eq!(
        fetched.repo_url.as_deref(),
        Some("https://git.acme.io/scm/plat/charts.git")
    );
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let vault = file_only_vault(&dir);

    let stored = vault.store(git_credential()).await.unwrap();
    assert!(vault.delete(&stored.id).await.unwrap());
    // 第二次删除同一个 id：无事发生，不报错
    assert!(!vault.delete(&stored.id).await.unwrap());
    assert!(!vault.delete("never-existed").await.unwrap());
    assert!(vault.get(&stored.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_treats_url_variants_as_equivalent() {
    let dir = TempDir::new().unwrap();
    let vault = file_only_vault(&dir);
    let stored = vault.store(git_credential()).await.unwrap();

    // 同一仓库的四种写法都要命中同一条凭证
    for variant in [
        "https://git.acme.io/scm/plat/charts.git",
        "https://git.acme.io/scm/plat/charts",
        "https://git.acme.io/scm/plat/charts/",
        "HTTPS://GIT.ACME.IO/scm/plat/charts.GIT",
    ] {
        let found = vault.find(&FindCriteria::by_url(variant)).await.unwrap();
        assert_eq!(found.len(), 1, "variant {variant} should match");
        assert_eq!(found[0].id, stored.id);
    }

    let miss = vault
        .find(&FindCriteria::by_url("https://git.acme.io/scm/plat/other"))
        .await
        .unwrap();
    assert!(miss.is_empty());
}

/// 新写入切到系统加密器之后，旧的回退密文必须仍然可读
struct AlwaysOnEncryptor;

impl OsStringEncryptor for AlwaysOnEncryptor {
    fn is_available(&self) -> bool {
        true
    }

    fn encrypt_string(&self, plaintext: &str) -> Result<Vec<u8>, String> {
        Ok(plaintext.bytes().map(|b| b ^ 0xA5).collect())
    }

    fn decrypt_string(&self, data: &[u8]) -> Result<String, String> {
        String::from_utf8(data.iter().map(|b| b ^ 0xA5).collect()).map_err(|e| e.to_string())
    }
}

#[tokio::test]
async fn test_fallback_ciphertext_survives_os_encryptor_arrival() {
    let dir = TempDir::new().unwrap();

    // 第一阶段：无系统加密器，写入走回退密码
    let stored = {
        let vault = file_only_vault(&dir);
        vault.store(git_credential()).await.unwrap()
    };

    // 第二阶段：同一数据目录，系统加密器就位
    let config = CredentialConfig::new(dir.path()).with_system_keychain(false);
    let vault = CredentialVault::new(config, Some(Arc::new(AlwaysOnEncryptor))).unwrap();

    // 旧凭证（crypto: 前缀）仍可完整解密
    let fetched = vault.get(&stored.id).await.unwrap().unwrap();
    assert_eq!(fetched.token.as_deref(), Some("ATBB-very-secret-token"));

    // 新写入走 safe: 路径，读回同样成立
    let mut helm = Credential::new(CredentialKind::Helm, "oci-registry");
    helm.registry_url = Some("oci://charts.acme.io".into());
    helm.token = Some("helm-registry-token".into());
    let helm = vault.store(helm).await.unwrap();
    let fetched = vault.get(&helm.id).await.unwrap().unwrap();
    assert_eq!(fetched.token.as_deref(), Some("helm-registry-token"));
}

#[tokio::test]
async fn test_corrupted_secret_degrades_to_metadata_only() {
    let dir = TempDir::new().unwrap();
    let vault = file_only_vault(&dir);
    let stored = vault.store(git_credential()).await.unwrap();

    // 把密文文件改成无法识别的前缀
    let safe_id: String = stored.id.chars().filter(|c| c.is_alphanumeric()).collect();
    let secret_path = dir.path().join("secrets").join(format!("{safe_id}.secret"));
    std::fs::write(&secret_path, "garbage:not-a-ciphertext").unwrap();

    // get 不失败：元数据可用，敏感字段缺席
    let fetched = vault.get(&stored.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "deploy-bot");
    assert!(fetched.token.is_none());
    assert!(!fetched.has_secrets());
}

#[tokio::test]
async fn test_store_replaces_wholesale() {
    let dir = TempDir::new().unwrap();
    let vault = file_only_vault(&dir);

    let stored = vault.store(git_credential()).await.unwrap();

    // 同 id 再存一份没有 token 的版本：旧 token 不得残留
    let mut updated = stored.clone();
    updated.token = None;
    updated.password = Some("rotated-password".into());
    vault.store(updated).await.unwrap();

    let fetched = vault.get(&stored.id).await.unwrap().unwrap();
    assert!(fetched.token.is_none());
    assert_eq!(fetched.password.as_deref(), Some("rotated-password"));
}
