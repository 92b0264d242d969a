//! Git Provider 统一抽象
//!
//! 所有后端实现同一套接口；任何方法都可能失败（认证、权限、不存在、
//! 远端错误），调用方不得假设某个方法不可能出错。

use async_trait::async_trait;

use super::errors::ProviderResult;
use super::model::{
    CommitAuthor, FileChange, FileDiff, GitBranch, GitCommit, GitFile, GitFileContent,
    GitRepositoryInfo, MergeResult, PullRequest, PullRequestState,
};

#[async_trait]
pub trait GitProvider: std::fmt::Debug + Send + Sync {
    /// 仓库坐标；构造时从 URL 解析一次，之后只读
    fn repository_info(&self) -> &GitRepositoryInfo;

    /// 列举目录；`recursive` 时目录深度优先展开
    async fn list_files(
        &self,
        path: &str,
        branch: &str,
        recursive: bool,
    ) -> ProviderResult<Vec<GitFile>>;

    /// 读取单个文件（内容 + 大小 + 最近一次提交）
    async fn get_file_content(&self, path: &str, branch: &str) -> ProviderResult<GitFileContent>;

    async fn get_branches(&self) -> ProviderResult<Vec<GitBranch>>;

    /// 从 `from_branch` 创建分支。注意 Cloud 的分支在首次提交前只是
    /// 「将要指向」某哈希的承诺，见各实现文档。
    async fn create_branch(&self, name: &str, from_branch: &str) -> ProviderResult<GitBranch>;

    /// 把一组有序 FileChange 作为一次提交应用到分支上
    async fn create_commit(
        &self,
        branch: &str,
        changes: &[FileChange],
        message: &str,
        author: &CommitAuthor,
    ) -> ProviderResult<GitCommit>;

    async fn create_pull_request(
        &self,
        source_branch: &str,
        target_branch: &str,
        title: &str,
        description: &str,
        reviewers: &[String],
    ) -> ProviderResult<PullRequest>;

    async fn get_pull_request(&self, id: u64) -> ProviderResult<PullRequest>;

    async fn list_pull_requests(
        &self,
        state: Option<PullRequestState>,
        limit: Option<u32>,
    ) -> ProviderResult<Vec<PullRequest>>;

    /// 合并 PR；冲突不是错误，以 `MergeResult { success: false, .. }` 返回
    async fn merge_pull_request(
        &self,
        id: u64,
        message: Option<&str>,
    ) -> ProviderResult<MergeResult>;

    /// 某文件在分支上的提交历史
    async fn get_file_commits(
        &self,
        path: &str,
        branch: &str,
        limit: Option<u32>,
    ) -> ProviderResult<Vec<GitCommit>>;

    /// PR 的统一 diff，按文件切分
    async fn get_pull_request_diff(&self, id: u64) -> ProviderResult<Vec<FileDiff>>;
}
