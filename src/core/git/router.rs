//! Provider 选择与组合工作流
//!
//! `detect_provider_type` 是启发式而非协议协商：带 `.git` 后缀、默认端口、
//! 不含 `/scm/` 的自托管 URL 会被判成 unknown，这是已知的歧义区间，
//! 调用方对 unknown 应当引导用户显式选择而不是猜。
//!
//! `propose_change` 把「建分支 → 提交 → 开 PR」串成一条流水线；任何一步
//! 失败立即中止后续步骤并报告已到达的阶段。不做补偿回滚：远端删分支
//! 本身就容易失败，半途的清理只会把一个可解释的失败变成两个。

use std::fmt;

use thiserror::Error;
use url::Url;

use super::bitbucket_cloud::BitbucketCloudProvider;
use super::bitbucket_server::BitbucketServerProvider;
use super::errors::{GitProviderError, ProviderResult};
use super::model::{
    CommitAuthor, FileChange, GitBranch, GitCommit, GitProviderType, MergeResult, PullRequest,
};
use super::provider::GitProvider;
use crate::core::credential::model::Credential;

/// 从 URL 猜测托管端类型
pub fn detect_provider_type(repo_url: &str) -> GitProviderType {
    let Ok(url) = Url::parse(repo_url) else {
        return GitProviderType::Unknown;
    };
    let host = url.host_str().unwrap_or_default();

    if host.contains("bitbucket.org") {
        return GitProviderType::BitbucketCloud;
    }

    let server_hints = host.contains("localhost")
        || url.port().is_some()
        || url.path().contains("/scm/")
        || !url.path().trim_end_matches('/').ends_with(".git");
    if server_hints {
        return GitProviderType::BitbucketServer;
    }

    GitProviderType::Unknown
}

/// 工作流推进到的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStage {
    CreateBranch,
    Commit,
    CreatePullRequest,
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowStage::CreateBranch => "create-branch",
            WorkflowStage::Commit => "commit",
            WorkflowStage::CreatePullRequest => "create-pull-request",
        };
        f.write_str(name)
    }
}

/// 工作流失败：携带到达的阶段和此前已经产生的远端状态
#[derive(Error, Debug)]
#[error("propose-change aborted at stage '{stage}': {source}")]
pub struct WorkflowError {
    pub stage: WorkflowStage,
    /// CreateBranch 之后的失败意味着分支已经存在于远端
    pub branch: Option<GitBranch>,
    /// Commit 之后的失败意味着提交已经落在分支上
    pub commit: Option<GitCommit>,
    #[source]
    pub source: GitProviderError,
}

#[derive(Debug, Clone)]
pub struct ProposeChangeRequest {
    pub target_branch: String,
    pub new_branch: String,
    pub changes: Vec<FileChange>,
    pub commit_message: String,
    pub title: String,
    pub description: String,
    pub reviewers: Vec<String>,
    pub author: CommitAuthor,
}

/// 三步全部成功后的产物
#[derive(Debug, Clone)]
pub struct ProposeChangeOutcome {
    pub branch: GitBranch,
    pub commit: GitCommit,
    pub pull_request: PullRequest,
}

/// 按 URL 启发式挑选后端并装配 Provider 实例
#[derive(Debug, Clone, Default)]
pub struct ProviderRouter {
    accept_invalid_certs: bool,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 自托管实例自签名证书的显式放行；只影响 Server 后端
    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// 后端变体在构造时解析一次，之后的调用不再做任何切换
    pub fn create_provider(
        &self,
        repo_url: &str,
        credential: &Credential,
    ) -> ProviderResult<Box<dyn GitProvider>> {
        match detect_provider_type(repo_url) {
            GitProviderType::BitbucketCloud => Ok(Box::new(BitbucketCloudProvider::new(
                repo_url, credential,
            )?)),
            GitProviderType::BitbucketServer => Ok(Box::new(BitbucketServerProvider::new(
                repo_url,
                credential,
                self.accept_invalid_certs,
            )?)),
            GitProviderType::Unknown => Err(GitProviderError::InvalidRepositoryUrl(format!(
                "{repo_url}: cannot determine provider type"
            ))),
        }
    }

    /// 建分支 → 提交 → 开 PR。失败中止后续步骤并附带已产生的远端状态。
    pub async fn propose_change(
        &self,
        provider: &dyn GitProvider,
        request: ProposeChangeRequest,
    ) -> Result<ProposeChangeOutcome, Box<WorkflowError>> {
        let branch = provider
            .create_branch(&request.new_branch, &request.target_branch)
            .await
            .map_err(|source| {
                Box::new(WorkflowError {
                    stage: WorkflowStage::CreateBranch,
                    branch: None,
                    commit: None,
                    source,
                })
            })?;
        tracing::info!(branch = %branch.name, "workflow: branch created");

        let commit = provider
            .create_commit(
                &request.new_branch,
                &request.changes,
                &request.commit_message,
                &request.author,
            )
            .await
            .map_err(|source| {
                Box::new(WorkflowError {
                    stage: WorkflowStage::Commit,
                    branch: Some(branch.clone()),
                    commit: None,
                    source,
                })
            })?;
        tracing::info!(commit = %commit.id, "workflow: changes committed");

        let pull_request = provider
            .create_pull_request(
                &request.new_branch,
                &request.target_branch,
                &request.title,
                &request.description,
                &request.reviewers,
            )
            .await
            .map_err(|source| {
                Box::new(WorkflowError {
                    stage: WorkflowStage::CreatePullRequest,
                    branch: Some(branch.clone()),
                    commit: Some(commit.clone()),
                    source,
                })
            })?;
        tracing::info!(pr = pull_request.id, "workflow: pull request opened");

        Ok(ProposeChangeOutcome {
            branch,
            commit,
            pull_request,
        })
    }

    /// propose_change 的收尾配套：合并产出的 PR
    pub async fn merge_proposed(
        &self,
        provider: &dyn GitProvider,
        pull_request_id: u64,
        message: Option<&str>,
    ) -> ProviderResult<MergeResult> {
        provider.merge_pull_request(pull_request_id, message).await
    }
}
