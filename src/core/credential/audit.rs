//! 凭证操作审计日志
//!
//! 两种模式：
//! - 标准模式：记录操作类型、凭证 id、时间、结果，不记录任何凭证内容
//! - 审计模式：额外记录敏感负载的 SHA-256 加盐哈希摘要
//!
//! 永远不记录明文令牌或密码；事件保存在内存中并有上限，可导出 JSON。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, Mutex};

/// 内存事件上限，超出后丢弃最旧的
const MAX_EVENTS: usize = 10_000;

/// 凭证操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Store,
    Get,
    Delete,
    List,
    Find,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::Store => "store",
            OperationType::Get => "get",
            OperationType::Delete => "delete",
            OperationType::List => "list",
            OperationType::Find => "find",
        };
        write!(f, "{s}")
    }
}

/// 审计事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub operation: OperationType,

    /// 目标凭证 id（list/find 为空串）
    pub credential_id: String,

    pub timestamp: DateTime<Utc>,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// 敏感负载的加盐哈希摘要（仅审计模式）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_hash: Option<String>,
}

/// 线程安全的审计日志记录器
pub struct AuditLogger {
    audit_mode: bool,
    events: Arc<Mutex<Vec<AuditEvent>>>,
    /// 哈希盐值，进程内随机，防止离线彩虹表
    salt: String,
}

impl AuditLogger {
    pub fn new(audit_mode: bool) -> Self {
        Self {
            audit_mode,
            events: Arc::new(Mutex::new(Vec::new())),
            salt: Self::generate_salt(),
        }
    }

    fn generate_salt() -> String {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn compute_secret_hash(&self, credential_id: &str, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(credential_id.as_bytes());
        hasher.update(secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// 记录一次凭证操作；`secret` 只用于审计模式下计算哈希，不会被存储
    pub fn log_operation(
        &self,
        operation: OperationType,
        credential_id: &str,
        secret: Option<&str>,
        success: bool,
        error: Option<String>,
    ) {
        let secret_hash = match (self.audit_mode, secret) {
            (true, Some(secret)) => Some(self.compute_secret_hash(credential_id, secret)),
            _ => None,
        };

        let event = AuditEvent {
            operation,
            credential_id: credential_id.to_string(),
            timestamp: Utc::now(),
            success,
            error,
            secret_hash,
        };

        if let Ok(mut events) = self.events.lock() {
            if events.len() >= MAX_EVENTS {
                events.remove(0);
            }
            events.push(event);
        }
    }

    pub fn get_events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// 导出审计日志为 JSON
    pub fn export_to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(&self.get_events()).map_err(|e| format!("序列化失败: {e}"))
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_audit_mode(&self) -> bool {
        self.audit_mode
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Clone for AuditLogger {
    fn clone(&self) -> Self {
        Self {
            audit_mode: self.audit_mode,
            events: Arc::clone(&self.events),
            salt: self.salt.clone(),
        }
    }
}
