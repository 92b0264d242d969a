//! Provider 无关的数据模型
//!
//! 字段名与状态枚举在所有后端之间保持同形；各 Provider 负责把自家
//! 词汇（如 Server 的 `SUPERSEDED`）映射到这里的共享词汇。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 托管端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitProviderType {
    BitbucketCloud,
    BitbucketServer,
    Unknown,
}

/// 仓库坐标：构造 Provider 时从 URL 解析一次，实例生命周期内不变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepositoryInfo {
    pub provider_type: GitProviderType,
    pub base_url: String,
    /// Bitbucket Server 的项目 key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
    /// Bitbucket Server 的仓库 slug
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_slug: Option<String>,
    /// Bitbucket Cloud 的 workspace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitFileType {
    File,
    Directory,
}

/// 目录列举条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitFile {
    /// 仓库内完整路径
    pub path: String,
    /// 末级名称
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: GitFileType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// 单文件读取结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitFileContent {
    pub path: String,
    pub content: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<GitCommit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitBranch {
    pub name: String,
    /// 分支头部 commit 哈希。Cloud 的 create_branch 返回的是「将要指向」
    /// 的哈希（分支在首次提交前并不真实存在），这一语义差异有意不抹平。
    pub latest_commit: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl fmt::Display for CommitAuthor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommit {
    /// commit 哈希
    pub id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<CommitAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authored_at: Option<DateTime<Utc>>,
}

/// 共享的 PR 状态词汇
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Merged,
    Declined,
    Superseded,
}

impl PullRequestState {
    /// 从 Bitbucket（Server/Cloud 共用大写词汇）状态映射；未知词汇按 Open 处理
    pub fn from_remote(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "MERGED" => PullRequestState::Merged,
            "DECLINED" => PullRequestState::Declined,
            "SUPERSEDED" => PullRequestState::Superseded,
            _ => PullRequestState::Open,
        }
    }

    /// 转回远端查询参数用的大写词汇
    pub fn as_remote(&self) -> &'static str {
        match self {
            PullRequestState::Open => "OPEN",
            PullRequestState::Merged => "MERGED",
            PullRequestState::Declined => "DECLINED",
            PullRequestState::Superseded => "SUPERSEDED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub state: PullRequestState,
    pub source_branch: String,
    pub target_branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Server 的乐观并发版本号；merge 前必须重新取
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// merge 的结果是数据而非异常：冲突是预期结局，调用方轮询可并性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MergeResult {
    pub fn merged(commit_id: Option<String>) -> Self {
        Self {
            success: true,
            commit_id,
            conflicts: Vec::new(),
            message: None,
        }
    }

    pub fn conflicted(conflicts: Vec<String>) -> Self {
        Self {
            success: false,
            commit_id: None,
            conflicts,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeAction {
    Add,
    Modify,
    Delete,
}

/// 提交的最小单元；一次提交是有序的 FileChange 列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    /// delete 时为 None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub action: FileChangeAction,
}

impl FileChange {
    pub fn add(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
            action: FileChangeAction::Add,
        }
    }

    pub fn modify(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
            action: FileChangeAction::Modify,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
            action: FileChangeAction::Delete,
        }
    }
}

/// 统一 diff 按文件切分后的片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    /// `a/` 侧路径
    pub old_path: String,
    /// `b/` 侧路径（文件身份的规范标识）
    pub new_path: String,
    /// 该文件的完整 diff 文本，含头部行
    pub diff: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pr_state_mapping() {
        assert_eq!(PullRequestState::from_remote("OPEN"), PullRequestState::Open);
        assert_eq!(PullRequestState::from_remote("merged"), PullRequestState::Merged);
        assert_eq!(
            PullRequestState::from_remote("DECLINED"),
            PullRequestState::Declined
        );
        assert_eq!(
            PullRequestState::from_remote("SUPERSEDED"),
            PullRequestState::Superseded
        );
    }

    #[test]
    fn test_pr_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PullRequestState::Open).unwrap(),
            "\"open\""
        );
        assert_eq!(
            serde_json::to_string(&PullRequestState::Superseded).unwrap(),
            "\"superseded\""
        );
    }

    #[test]
    fn test_file_change_constructors() {
        let change = FileChange::modify("values.yaml", "a: 1");
        assert_eq!(change.action, FileChangeAction::Modify);
        assert_eq!(change.content.as_deref(), Some("a: 1"));

        let delete = FileChange::delete("old.yaml");
        assert!(delete.content.is_none());
    }

    #[test]
    fn test_commit_author_display() {
        let author = CommitAuthor {
            name: "Ops Bot".into(),
            email: "ops@acme.io".into(),
        };
        assert_eq!(author.to_string(), "Ops Bot <ops@acme.io>");
    }
}
