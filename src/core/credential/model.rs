//! 凭证数据模型
//!
//! 定义保险库管理的四类凭证（git/helm/argocd/vault）及其共享字段。
//!
//! # 安全性
//!
//! - 敏感字段（`token`、`password`、`private_key`、`passphrase`）在序列化时
//!   自动跳过，元数据索引里永远不会出现它们；密文路径由保险库单独处理
//! - 使用 `Display`/`Debug` 输出时自动脱敏
//! - `id` 由保险库生成且不可变，调用方不应自行构造

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// 凭证类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Git 仓库凭证（Bitbucket Server/Cloud）
    Git,
    /// Helm registry 凭证
    Helm,
    /// ArgoCD 服务端凭证
    Argocd,
    /// HashiCorp Vault 凭证
    Vault,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialKind::Git => "git",
            CredentialKind::Helm => "helm",
            CredentialKind::Argocd => "argocd",
            CredentialKind::Vault => "vault",
        };
        write!(f, "{s}")
    }
}

/// Git 凭证的认证方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitAuthType {
    Token,
    Ssh,
    Userpass,
}

/// 凭证信息
///
/// 所有类别共用一个结构，`kind` 为判别字段；类别相关字段为 Option。
/// 敏感字段只进加密负载，序列化本结构（元数据索引）时一律跳过。
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// 保险库生成的稳定标识符（短十六进制）
    #[serde(default)]
    pub id: String,

    /// 展示名称
    pub name: String,

    /// 凭证类别
    #[serde(rename = "type")]
    pub kind: CredentialKind,

    /// 所属环境（dev/staging/prod 等，可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// 标签
    #[serde(default)]
    pub tags: Vec<String>,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 最后更新时间（每次 store 重写）
    pub updated_at: DateTime<Utc>,

    /// Git 仓库地址（kind=git）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,

    /// Git 认证方式（kind=git）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<GitAuthType>,

    /// 用户名（token/userpass 模式）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Helm registry 地址（kind=helm）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,

    /// 服务端地址（kind=argocd / kind=vault）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    /// SSH 公钥（非敏感，随元数据落盘）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// 访问令牌（敏感）
    #[serde(skip_serializing, default)]
    pub token: Option<String>,

    /// 密码（敏感）
    #[serde(skip_serializing, default)]
    pub password: Option<String>,

    /// SSH 私钥（敏感）
    #[serde(skip_serializing, default)]
    pub private_key: Option<String>,

    /// 私钥口令（敏感）
    #[serde(skip_serializing, default)]
    pub passphrase: Option<String>,
}

impl Credential {
    /// 创建新凭证骨架；`id` 留空，由保险库在 store 时生成
    pub fn new(kind: CredentialKind, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            kind,
            environment: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            repo_url: None,
            auth_type: None,
            username: None,
            registry_url: None,
            server_url: None,
            public_key: None,
            token: None,
            password: None,
            private_key: None,
            passphrase: None,
        }
    }

    /// 创建 Git 仓库凭证
    pub fn git(name: impl Into<String>, repo_url: impl Into<String>, auth_type: GitAuthType) -> Self {
        let mut cred = Self::new(CredentialKind::Git, name);
        cred.repo_url = Some(repo_url.into());
        cred.auth_type = Some(auth_type);
        cred
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// 凭证用于 URL 匹配的标识地址（按类别取对应字段）
    pub fn identifying_url(&self) -> Option<&str> {
        match self.kind {
            CredentialKind::Git => self.repo_url.as_deref(),
            CredentialKind::Helm => self.registry_url.as_deref(),
            CredentialKind::Argocd | CredentialKind::Vault => self.server_url.as_deref(),
        }
    }

    /// 是否携带任何敏感字段
    pub fn has_secrets(&self) -> bool {
        self.token.is_some()
            || self.password.is_some()
            || self.private_key.is_some()
            || self.passphrase.is_some()
    }

    /// 清空敏感字段（元数据视图）
    pub fn strip_secrets(&mut self) {
        self.token = None;
        self.password = None;
        self.private_key = None;
        self.passphrase = None;
    }

    /// 获取脱敏后的令牌/密码（用于日志和显示）
    ///
    /// 长度 ≤ 8 显示为 "***"，否则保留前后各 4 位。
    pub fn masked_secret(&self) -> String {
        let secret = self
            .token
            .as_deref()
            .or(self.password.as_deref())
            .unwrap_or("");
        mask(secret)
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return "<none>".to_string();
    }
    // 按字符而不是字节截取，非 ASCII 口令不能让脱敏本身 panic
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        "***".to_string()
    } else {
        let prefix: String = chars[..4].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{prefix}****{suffix}")
    }
}

/// 凭证在日志中显示时自动脱敏，防止敏感信息泄露
impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Credential {{ id: {}, kind: {}, name: {}, secret: {} }}",
            self.id,
            self.kind,
            self.name,
            self.masked_secret()
        )
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("environment", &self.environment)
            .field("tags", &self.tags)
            .field("repo_url", &self.repo_url)
            .field("username", &self.username)
            .field("secret", &self.masked_secret())
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// 生成凭证的稳定标识符
///
/// `SHA-256(kind + identifier + creation-millis)` 截断为 12 位十六进制：
/// 对人类可调试（可复算），在实际凭证数量下足够抗碰撞。
pub fn generate_id(kind: CredentialKind, identifier: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(identifier.as_bytes());
    hasher.update(b":");
    hasher.update(created_at.timestamp_millis().to_string().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}
