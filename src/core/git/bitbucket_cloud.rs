//! Bitbucket Cloud（bitbucket.org）REST 2.0 客户端
//!
//! 与 Server 的结构性差异：
//! - 提交是原子的：一次 multipart POST `/src` 带上全部文件变更，要么
//!   全部生效要么全部不生效，没有部分应用
//! - `create_branch` 是「预期性」的：Cloud 在首次提交前不物化空分支，
//!   返回的 GitBranch 表示分支将要指向的哈希，而不是已存在的引用
//! - 分页跟随响应里的 `next` 绝对 URL 而不是游标参数
//!
//! 认证只走 Bearer token（workspace/repository access token）。
//! `api_base` 可覆盖，默认指向官方 API 域名。

use reqwest::Method;
use url::Url;

use super::errors::{GitProviderError, ProviderResult};
use super::model::{
    CommitAuthor, FileChange, FileChangeAction, FileDiff, GitBranch, GitCommit, GitFile,
    GitFileContent, GitFileType, GitProviderType, GitRepositoryInfo, MergeResult, PullRequest,
    PullRequestState,
};
use super::provider::GitProvider;
use crate::core::credential::model::{Credential, GitAuthType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

const DEFAULT_API_BASE: &str = "https://api.bitbucket.org/2.0";

/// 跟随 `next` 链接的页数上限
const MAX_PAGES: u32 = 1000;

const PAGE_LEN: u32 = 100;

#[derive(Debug)]
pub struct BitbucketCloudProvider {
    info: GitRepositoryInfo,
    client: reqwest::Client,
    token: String,
    api_base: String,
}

impl BitbucketCloudProvider {
    pub fn new(repo_url: &str, credential: &Credential) -> ProviderResult<Self> {
        let (workspace, repository_slug) = parse_cloud_url(repo_url)?;

        // Cloud 只接受 Bearer；userpass 凭证在这里没有用武之地
        if credential.auth_type != Some(GitAuthType::Token) {
            return Err(GitProviderError::AuthenticationFailed(
                "bitbucket cloud requires a token credential".into(),
            ));
        }
        let token = credential.token.clone().ok_or_else(|| {
            GitProviderError::AuthenticationFailed("token credential has no token".into())
        })?;

        Ok(Self {
            info: GitRepositoryInfo {
                provider_type: GitProviderType::BitbucketCloud,
                base_url: "https://bitbucket.org".to_string(),
                project_key: None,
                repository_slug: Some(repository_slug),
                workspace: Some(workspace),
            },
            client: reqwest::Client::new(),
            token,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// 覆盖 API 基地址（测试用）
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// `{api_base}/repositories/{workspace}/{slug}`
    fn repo_api(&self) -> String {
        format!(
            "{}/repositories/{}/{}",
            self.api_base,
            self.info.workspace.as_deref().unwrap_or_default(),
            self.info.repository_slug.as_deref().unwrap_or_default()
        )
    }

    fn request(&self, method: Method, url: String) -> reqwest::RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.token)
    }

    async fn check(resp: reqwest::Response) -> ProviderResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let code = status.as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(GitProviderError::from_status(code, extract_error_detail(&body)))
    }

    /// 列举单个目录（一层），沿 `next` 链接翻页
    async fn list_dir(&self, path: &str, branch: &str) -> ProviderResult<Vec<GitFile>> {
        let mut files = Vec::new();
        let mut url = format!(
            "{}/src/{}/{}?pagelen={}",
            self.repo_api(),
            branch,
            super::urls::encode_path(path.trim_matches('/')),
            PAGE_LEN
        );

        for page in 0.. {
            if page >= MAX_PAGES {
                tracing::warn!(path, "src pagination exceeded {MAX_PAGES} pages, stopping");
                break;
            }

            let resp = Self::check(self.request(Method::GET, url.clone()).send().await?).await?;
            let listing: SrcPage = resp.json().await?;

            for entry in listing.values {
                let file_type = if entry.kind == "commit_directory" {
                    GitFileType::Directory
                } else {
                    GitFileType::File
                };
                let name = entry
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&entry.path)
                    .to_string();
                files.push(GitFile {
                    path: entry.path,
                    name,
                    file_type,
                    size: entry.size,
                });
            }

            match listing.next {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(files)
    }

    /// 分支头部提交；`/src` 提交接口不回传 commit 对象，提交后重查合成
    async fn branch_head_commit(&self, branch: &str) -> ProviderResult<GitCommit> {
        let url = format!("{}/commits/{}?pagelen=1", self.repo_api(), branch);
        let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
        let page: CommitPage = resp.json().await?;
        page.values
            .into_iter()
            .next()
            .map(map_commit)
            .ok_or_else(|| GitProviderError::NotFound(format!("branch '{branch}' has no commits")))
    }

    /// 分支头部哈希：create_branch 需要把源分支解析成具体 commit
    async fn branch_head_hash(&self, branch: &str) -> ProviderResult<String> {
        let url = format!("{}/refs/branches/{}", self.repo_api(), branch);
        let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
        let entry: BranchEntry = resp.json().await?;
        Ok(entry.target.hash)
    }
}

#[async_trait]
impl GitProvider for BitbucketCloudProvider {
    fn repository_info(&self) -> &GitRepositoryInfo {
        &self.info
    }

    async fn list_files(
        &self,
        path: &str,
        branch: &str,
        recursive: bool,
    ) -> ProviderResult<Vec<GitFile>> {
        let mut results = Vec::new();
        let mut pending = vec![path.to_string()];

        while let Some(dir) = pending.pop() {
            let entries = self.list_dir(&dir, branch).await?;
            for entry in entries {
                if recursive && entry.file_type == GitFileType::Directory {
                    pending.push(entry.path.clone());
                }
                results.push(entry);
            }
        }

        Ok(results)
    }

    async fn get_file_content(&self, path: &str, branch: &str) -> ProviderResult<GitFileContent> {
        let encoded = super::urls::encode_path(path);
        let raw_url = format!("{}/src/{}/{}", self.repo_api(), branch, encoded);
        let resp = Self::check(self.request(Method::GET, raw_url).send().await?).await?;
        let content = resp.text().await?;

        // ?format=meta 返回文件元数据（大小 + 所属提交）
        let meta_url = format!("{}/src/{}/{}?format=meta", self.repo_api(), branch, encoded);
        let meta: Option<SrcMeta> = match self.request(Method::GET, meta_url).send().await {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok(),
            _ => None,
        };

        let (size, last_commit) = match meta {
            Some(meta) => {
                let last_commit = match meta.commit {
                    Some(commit) => {
                        // meta 里只有哈希，完整提交信息需要单独取
                        let url = format!("{}/commit/{}", self.repo_api(), commit.hash);
                        match self.request(Method::GET, url).send().await {
                            Ok(resp) if resp.status().is_success() => {
                                resp.json::<CloudCommit>().await.ok().map(map_commit)
                            }
                            _ => Some(GitCommit {
                                id: commit.hash,
                                message: String::new(),
                                author: None,
                                authored_at: None,
                            }),
                        }
                    }
                    None => None,
                };
                (meta.size, last_commit)
            }
            None => (None, None),
        };

        Ok(GitFileContent {
            path: path.to_string(),
            size: size.unwrap_or(content.len() as u64),
            content,
            last_commit,
        })
    }

    async fn get_branches(&self) -> ProviderResult<Vec<GitBranch>> {
        // 默认分支名来自仓库对象的 mainbranch
        let repo_url = self.repo_api();
        let resp = Self::check(self.request(Method::GET, repo_url).send().await?).await?;
        let repo: RepoEntry = resp.json().await?;
        let default_name = repo.mainbranch.map(|b| b.name).unwrap_or_default();

        let mut branches = Vec::new();
        let mut url = format!("{}/refs/branches?pagelen={}", self.repo_api(), PAGE_LEN);

        for page in 0.. {
            if page >= MAX_PAGES {
                tracing::warn!("branch pagination exceeded {MAX_PAGES} pages, stopping");
                break;
            }

            let resp = Self::check(self.request(Method::GET, url.clone()).send().await?).await?;
            let listing: BranchPage = resp.json().await?;

            for entry in listing.values {
                let is_default = entry.name == default_name;
                branches.push(GitBranch {
                    name: entry.name,
                    latest_commit: entry.target.hash,
                    is_default,
                });
            }

            match listing.next {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(branches)
    }

    /// 预期性分支创建：Cloud 没有独立的建分支调用，分支在首次 `/src`
    /// 提交时才物化。这里只把源分支头部解析成具体哈希，作为「将要指向」
    /// 的承诺返回，不向远端发任何创建请求。
    async fn create_branch(&self, name: &str, from_branch: &str) -> ProviderResult<GitBranch> {
        let hash = self.branch_head_hash(from_branch).await?;

        Ok(GitBranch {
            name: name.to_string(),
            latest_commit: hash,
            is_default: false,
        })
    }

    async fn create_commit(
        &self,
        branch: &str,
        changes: &[FileChange],
        message: &str,
        author: &CommitAuthor,
    ) -> ProviderResult<GitCommit> {
        // 原子提交：全部变更塞进一个 multipart 表单
        let mut form = reqwest::multipart::Form::new()
            .text("message", message.to_string())
            .text("branch", branch.to_string())
            .text("author", author.to_string());

        for change in changes {
            match change.action {
                FileChangeAction::Add | FileChangeAction::Modify => {
                    form = form.text(
                        change.path.clone(),
                        change.content.clone().unwrap_or_default(),
                    );
                }
                FileChangeAction::Delete => {
                    // 删除用重复的 files 字段表达
                    form = form.text("files", change.path.clone());
                }
            }
        }

        let url = format!("{}/src", self.repo_api());
        let resp = self.request(Method::POST, url).multipart(form).send().await?;
        Self::check(resp).await?;

        // /src 成功时响应体为空，提交对象重查分支头部合成
        self.branch_head_commit(branch).await
    }

    async fn create_pull_request(
        &self,
        source_branch: &str,
        target_branch: &str,
        title: &str,
        description: &str,
        reviewers: &[String],
    ) -> ProviderResult<PullRequest> {
        let body = json!({
            "title": title,
            "description": description,
            "source": { "branch": { "name": source_branch } },
            "destination": { "branch": { "name": target_branch } },
            "reviewers": reviewers
                .iter()
                .map(|uuid| json!({ "uuid": uuid }))
                .collect::<Vec<_>>(),
        });

        let url = format!("{}/pullrequests", self.repo_api());
        let resp = Self::check(self.request(Method::POST, url).json(&body).send().await?).await?;
        let pr: CloudPullRequest = resp.json().await?;
        Ok(map_pull_request(pr))
    }

    async fn get_pull_request(&self, id: u64) -> ProviderResult<PullRequest> {
        let url = format!("{}/pullrequests/{id}", self.repo_api());
        let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
        let pr: CloudPullRequest = resp.json().await?;
        Ok(map_pull_request(pr))
    }

    async fn list_pull_requests(
        &self,
        state: Option<PullRequestState>,
        limit: Option<u32>,
    ) -> ProviderResult<Vec<PullRequest>> {
        let mut url = format!(
            "{}/pullrequests?pagelen={}",
            self.repo_api(),
            limit.unwrap_or(PAGE_LEN)
        );
        if let Some(state) = state {
            url.push_str(&format!("&state={}", state.as_remote()));
        }

        let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
        let page: PullRequestPage = resp.json().await?;
        Ok(page.values.into_iter().map(map_pull_request).collect())
    }

    async fn merge_pull_request(
        &self,
        id: u64,
        message: Option<&str>,
    ) -> ProviderResult<MergeResult> {
        let url = format!("{}/pullrequests/{id}/merge", self.repo_api());
        let mut req = self.request(Method::POST, url);
        if let Some(message) = message {
            req = req.json(&json!({ "message": message }));
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();

        // Cloud 把合并冲突报成 400/409，错误详情在 error.message
        if status == 400 || status == 409 {
            let body = resp.text().await.unwrap_or_default();
            let detail = extract_error_detail(&body);
            if detail.to_lowercase().contains("conflict") {
                return Ok(MergeResult::conflicted(vec![detail]));
            }
            return Ok(MergeResult {
                success: false,
                commit_id: None,
                conflicts: Vec::new(),
                message: Some(detail),
            });
        }

        let resp = Self::check(resp).await?;
        let merged: CloudPullRequest = resp.json().await?;
        Ok(MergeResult::merged(merged.merge_commit.map(|c| c.hash)))
    }

    async fn get_file_commits(
        &self,
        path: &str,
        branch: &str,
        limit: Option<u32>,
    ) -> ProviderResult<Vec<GitCommit>> {
        let url = format!(
            "{}/commits/{}?path={}&pagelen={}",
            self.repo_api(),
            branch,
            super::urls::encode_query_value(path),
            limit.unwrap_or(25)
        );
        let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
        let page: CommitPage = resp.json().await?;
        Ok(page.values.into_iter().map(map_commit).collect())
    }

    async fn get_pull_request_diff(&self, id: u64) -> ProviderResult<Vec<FileDiff>> {
        let url = format!("{}/pullrequests/{id}/diff", self.repo_api());
        let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
        let text = resp.text().await?;
        Ok(super::diff::split_unified_diff(&text))
    }
}

/// 只认 bitbucket.org 的 `/{workspace}/{repo}` 形状
fn parse_cloud_url(repo_url: &str) -> ProviderResult<(String, String)> {
    let url = Url::parse(repo_url)
        .map_err(|e| GitProviderError::InvalidRepositoryUrl(format!("{repo_url}: {e}")))?;

    if url.host_str() != Some("bitbucket.org") {
        return Err(GitProviderError::InvalidRepositoryUrl(format!(
            "{repo_url}: not a bitbucket.org url"
        )));
    }

    let segments: Vec<&str> = url
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let [workspace, repo, ..] = segments.as_slice() else {
        return Err(GitProviderError::InvalidRepositoryUrl(format!(
            "{repo_url}: expected /{{workspace}}/{{repository}}"
        )));
    };

    let repo = repo.trim_end_matches(".git");
    if workspace.is_empty() || repo.is_empty() {
        return Err(GitProviderError::InvalidRepositoryUrl(repo_url.to_string()));
    }

    Ok((workspace.to_string(), repo.to_string()))
}

/// Cloud 错误体：`{"error": {"message": "..."}}`
fn extract_error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorEntry,
    }
    #[derive(Deserialize)]
    struct ErrorEntry {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => {
            const MAX: usize = 512;
            if body.chars().count() > MAX {
                let head: String = body.chars().take(MAX).collect();
                format!("{head}…")
            } else {
                body.to_string()
            }
        }
    }
}

// ---- Cloud wire types ----

#[derive(Deserialize)]
struct SrcPage {
    values: Vec<SrcEntry>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct SrcEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<u64>,
}

#[derive(Deserialize)]
struct SrcMeta {
    size: Option<u64>,
    commit: Option<CommitRef>,
}

#[derive(Deserialize)]
struct CommitRef {
    hash: String,
}

#[derive(Deserialize)]
struct RepoEntry {
    mainbranch: Option<MainBranch>,
}

#[derive(Deserialize)]
struct MainBranch {
    name: String,
}

#[derive(Deserialize)]
struct BranchPage {
    values: Vec<BranchEntry>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct BranchEntry {
    name: String,
    target: CommitRef,
}

#[derive(Deserialize)]
struct CommitPage {
    values: Vec<CloudCommit>,
}

#[derive(Deserialize)]
struct CloudCommit {
    hash: String,
    #[serde(default)]
    message: String,
    author: Option<CloudAuthor>,
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CloudAuthor {
    /// `"Name <email>"` 形式
    raw: Option<String>,
}

fn map_commit(commit: CloudCommit) -> GitCommit {
    GitCommit {
        id: commit.hash,
        message: commit.message,
        author: commit.author.and_then(|a| a.raw).and_then(parse_raw_author),
        authored_at: commit.date,
    }
}

/// `"Name <email>"` → CommitAuthor；解析不了时整串作为名字
fn parse_raw_author(raw: String) -> Option<CommitAuthor> {
    if raw.is_empty() {
        return None;
    }
    match raw.split_once('<') {
        Some((name, rest)) => Some(CommitAuthor {
            name: name.trim().to_string(),
            email: rest.trim_end_matches('>').trim().to_string(),
        }),
        None => Some(CommitAuthor {
            name: raw,
            email: String::new(),
        }),
    }
}

#[derive(Deserialize)]
struct CloudPullRequest {
    id: u64,
    title: String,
    #[serde(default)]
    description: String,
    state: String,
    source: PrEndpoint,
    destination: PrEndpoint,
    author: Option<CloudUser>,
    created_on: Option<DateTime<Utc>>,
    links: Option<CloudLinks>,
    merge_commit: Option<CommitRef>,
}

#[derive(Deserialize)]
struct PrEndpoint {
    branch: PrBranch,
}

#[derive(Deserialize)]
struct PrBranch {
    name: String,
}

#[derive(Deserialize)]
struct CloudUser {
    display_name: String,
}

#[derive(Deserialize)]
struct CloudLinks {
    html: Option<CloudLink>,
}

#[derive(Deserialize)]
struct CloudLink {
    href: String,
}

#[derive(Deserialize)]
struct PullRequestPage {
    values: Vec<CloudPullRequest>,
}

fn map_pull_request(pr: CloudPullRequest) -> PullRequest {
    PullRequest {
        id: pr.id,
        title: pr.title,
        description: pr.description,
        state: PullRequestState::from_remote(&pr.state),
        source_branch: pr.source.branch.name,
        target_branch: pr.destination.branch.name,
        author: pr.author.map(|a| a.display_name),
        created_at: pr.created_on,
        url: pr.links.and_then(|l| l.html).map(|l| l.href),
        version: None,
    }
}
