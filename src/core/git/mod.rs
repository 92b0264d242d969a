//! Git 托管端抽象
//!
//! 统一的 Provider 接口 + Bitbucket Server / Bitbucket Cloud 两个 REST 实现，
//! 以及根据仓库 URL 选择实现并编排「改动 → 分支 → 提交 → PR」流程的 Router。
//! 所有 DTO 与状态枚举跨后端同形，各实现负责把自家词汇映射到共享词汇。

pub mod bitbucket_cloud;
pub mod bitbucket_server;
pub mod diff;
pub mod errors;
pub mod model;
pub mod provider;
pub mod router;
mod urls;

pub use errors::{GitProviderError, ProviderResult};
pub use model::{
    CommitAuthor, FileChange, FileChangeAction, FileDiff, GitBranch, GitCommit, GitFile,
    GitFileContent, GitFileType, GitProviderType, GitRepositoryInfo, MergeResult, PullRequest,
    PullRequestState,
};
pub use provider::GitProvider;
pub use router::ProviderRouter;
