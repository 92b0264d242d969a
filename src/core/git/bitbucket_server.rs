//! Bitbucket Server（自托管）REST 客户端
//!
//! Server API 的几个怪癖决定了这里的形状：
//! - 浏览接口按 `isLastPage`/`nextPageStart` 游标分页，没有一次取全树的接口，
//!   递归列举靠逐目录深度优先展开
//! - 读一个文件要三次往返：raw 内容、browse 元数据、最近提交
//! - 没有原子多文件提交接口：每个 FileChange 单独 PUT/DELETE，后面的文件
//!   失败时前面的已经落在分支上，部分应用是合同的一部分，不做补偿回滚
//! - merge 需要先取 PR 当前 `version` 作乐观并发令牌；409 按响应体区分
//!   「已合并/已拒绝」与真冲突，一律作为数据返回而不是抛错
//!
//! 自托管实例常用自签名证书，`accept_invalid_certs` 是显式的信任放宽开关，
//! 默认关闭。

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

/// 浏览/分支分页的单页大小
const PAGE_LIMIT: u32 = 100;

/// 分页循环的页数上限：远端永远不置 isLastPage 时防止无界迭代
const MAX_PAGES: u32 = 1000;

#[derive(Debug)]
enum ServerAuth {
    Bearer(String),
    Basic { username: String, password: String },
}

#[derive(Debug)]
pub struct BitbucketServerProvider {
    info: GitRepositoryInfo,
    client: reqwest::Client,
    auth: ServerAuth,
    /// `{base}/rest/api/1.0/projects/{key}/repos/{slug}`
    api_base: String,
}

impl BitbucketServerProvider {
    /// 解析仓库 URL 并构造客户端；解析不出项目与仓库坐标是构造期错误，
    /// 不会推迟到第一次调用
    pub fn new(
        repo_url: &str,
        credential: &Credential,
        accept_invalid_certs: bool,
    ) -> ProviderResult<Self> {
        let (base_url, project_key, repository_slug) = parse_server_url(repo_url)?;

        let auth = match credential.auth_type {
            Some(GitAuthType::Token) => {
                let token = credential.token.clone().ok_or_else(|| {
                    GitProviderError::AuthenticationFailed("token credential has no token".into())
                })?;
                ServerAuth::Bearer(token)
            }
            Some(GitAuthType::Userpass) => {
                let username = credential.username.clone().ok_or_else(|| {
                    GitProviderError::AuthenticationFailed("userpass credential has no username".into())
                })?;
                let password = credential.password.clone().ok_or_else(|| {
                    GitProviderError::AuthenticationFailed("userpass credential has no password".into())
                })?;
                ServerAuth::Basic { username, password }
            }
            _ => {
                return Err(GitProviderError::AuthenticationFailed(
                    "bitbucket server REST access requires token or userpass credentials".into(),
                ))
            }
        };

        if accept_invalid_certs {
            tracing::warn!(base_url, "accepting invalid TLS certificates (explicit opt-in)");
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        let api_base = format!(
            "{base_url}/rest/api/1.0/projects/{project_key}/repos/{repository_slug}"
        );

        Ok(Self {
            info: GitRepositoryInfo {
                provider_type: GitProviderType::BitbucketServer,
                base_url,
                project_key: Some(project_key),
                repository_slug: Some(repository_slug),
                workspace: None,
            },
            client,
            auth,
            api_base,
        })
    }

    fn request(&self, method: Method, url: String) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.auth {
            ServerAuth::Bearer(token) => req.bearer_auth(token),
            ServerAuth::Basic { username, password } => req.basic_auth(username, Some(password)),
        }
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

    /// 列举单个目录（一层），跟随分页游标直到 isLastPage
    async fn list_dir(&self, path: &str, branch: &str) -> ProviderResult<Vec<GitFile>> {
        let mut files = Vec::new();
        let mut start: u64 = 0;

        for page in 0.. {
            if page >= MAX_PAGES {
                tracing::warn!(path, "browse pagination exceeded {MAX_PAGES} pages, stopping");
                break;
            }

            let url = format!(
                "{}/browse/{}?at=refs/heads/{}&limit={}&start={}",
                self.api_base,
                super::urls::encode_path(path),
                branch,
                PAGE_LIMIT,
                start
            );
            let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
            let browse: BrowseResponse = resp.json().await?;

            let Some(children) = browse.children else {
                // browse 到文件节点没有 children；调用方应当传目录路径
                break;
            };

            for entry in children.values {
                let name = entry.path.name;
                let full_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", path.trim_end_matches('/'), name)
                };
                let file_type = if entry.kind == "DIRECTORY" {
                    GitFileType::Directory
                } else {
                    GitFileType::File
                };
                files.push(GitFile {
                    path: full_path,
                    name,
                    file_type,
                    size: entry.size,
                });
            }

            if children.is_last_page {
                break;
            }
            match children.next_page_start {
                Some(next) => start = next,
                None => break,
            }
        }

        Ok(files)
    }

    /// 文件最近一次提交；文件不存在时返回 None
    async fn latest_file_commit(
        &self,
        path: &str,
        branch: &str,
    ) -> ProviderResult<Option<GitCommit>> {
        let url = format!(
            "{}/commits?path={}&until=refs/heads/{}&limit=1",
            self.api_base,
            super::urls::encode_query_value(path),
            branch
        );
        let resp = self.request(Method::GET, url).send().await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        let page: CommitPage = resp.json().await?;
        Ok(page.values.into_iter().next().map(map_commit))
    }

    /// 分支头部提交：逐文件编辑接口不返回 commit 对象，提交完成后
    /// 重新查询分支合成返回值
    async fn branch_head_commit(&self, branch: &str) -> ProviderResult<GitCommit> {
        let url = format!(
            "{}/commits?until=refs/heads/{}&limit=1",
            self.api_base, branch
        );
        let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
        let page: CommitPage = resp.json().await?;
        page.values
            .into_iter()
            .next()
            .map(map_commit)
            .ok_or_else(|| GitProviderError::NotFound(format!("branch '{branch}' has no commits")))
    }

    /// 应用单个 FileChange（一次 PUT 或 DELETE）
    async fn apply_change(
        &self,
        branch: &str,
        change: &FileChange,
        message: &str,
    ) -> ProviderResult<()> {
        let url = format!(
            "{}/browse/{}",
            self.api_base,
            super::urls::encode_path(&change.path)
        );

        match change.action {
            FileChangeAction::Add | FileChangeAction::Modify => {
                let mut form = reqwest::multipart::Form::new()
                    .text("content", change.content.clone().unwrap_or_default())
                    .text("message", message.to_string())
                    .text("branch", branch.to_string());

                // 编辑已有文件需要 sourceCommitId；文件不存在时按新增处理
                if let Some(commit) = self.latest_file_commit(&change.path, branch).await? {
                    form = form.text("sourceCommitId", commit.id);
                }

                let resp = self.request(Method::PUT, url).multipart(form).send().await?;
                Self::check(resp).await?;
            }
            FileChangeAction::Delete => {
                let mut form = reqwest::multipart::Form::new()
                    .text("message", message.to_string())
                    .text("branch", branch.to_string());
                if let Some(commit) = self.latest_file_commit(&change.path, branch).await? {
                    form = form.text("sourceCommitId", commit.id);
                }

                let resp = self
                    .request(Method::DELETE, url)
                    .multipart(form)
                    .send()
                    .await?;
                Self::check(resp).await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl GitProvider for BitbucketServerProvider {
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
        // 一次逻辑读 = 三次往返：raw、browse 元数据、最近提交
        let encoded = super::urls::encode_path(path);
        let raw_url = format!(
            "{}/raw/{}?at=refs/heads/{}",
            self.api_base, encoded, branch
        );
        let resp = Self::check(self.request(Method::GET, raw_url).send().await?).await?;
        let content = resp.text().await?;

        let meta_url = format!(
            "{}/browse/{}?at=refs/heads/{}&limit=0",
            self.api_base, encoded, branch
        );
        let size = match self.request(Method::GET, meta_url).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .json::<BrowseResponse>()
                .await
                .ok()
                .and_then(|b| b.size),
            _ => None,
        };

        let last_commit = self.latest_file_commit(path, branch).await?;

        Ok(GitFileContent {
            path: path.to_string(),
            size: size.unwrap_or(content.len() as u64),
            content,
            last_commit,
        })
    }

    async fn get_branches(&self) -> ProviderResult<Vec<GitBranch>> {
        let mut branches = Vec::new();
        let mut start: u64 = 0;

        for page in 0.. {
            if page >= MAX_PAGES {
                tracing::warn!("branch pagination exceeded {MAX_PAGES} pages, stopping");
                break;
            }

            let url = format!(
                "{}/branches?limit={}&start={}",
                self.api_base, PAGE_LIMIT, start
            );
            let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
            let page_data: BranchPage = resp.json().await?;

            branches.extend(page_data.values.into_iter().map(map_branch));

            if page_data.is_last_page {
                break;
            }
            match page_data.next_page_start {
                Some(next) => start = next,
                None => break,
            }
        }

        Ok(branches)
    }

    async fn create_branch(&self, name: &str, from_branch: &str) -> ProviderResult<GitBranch> {
        let url = format!("{}/branches", self.api_base);
        let body = json!({
            "name": name,
            "startPoint": format!("refs/heads/{from_branch}"),
        });
        let resp = Self::check(self.request(Method::POST, url).json(&body).send().await?).await?;
        let branch: BranchEntry = resp.json().await?;
        Ok(map_branch(branch))
    }

    /// 逐文件编辑接口把提交归属到认证用户本人，`author` 参数在
    /// Server 后端不生效（Cloud 后端会采用它）
    async fn create_commit(
        &self,
        branch: &str,
        changes: &[FileChange],
        message: &str,
        _author: &CommitAuthor,
    ) -> ProviderResult<GitCommit> {
        // 没有事务：按列表顺序逐文件应用，失败即停，已应用的保留在分支上
        let mut applied: Vec<String> = Vec::new();

        for change in changes {
            if let Err(e) = self.apply_change(branch, change, message).await {
                if applied.is_empty() {
                    return Err(e);
                }
                return Err(GitProviderError::PartialCommitFailure {
                    applied,
                    path: change.path.clone(),
                    detail: e.to_string(),
                });
            }
            applied.push(change.path.clone());
        }

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
        let repo_ref = json!({
            "slug": self.info.repository_slug,
            "project": { "key": self.info.project_key },
        });
        let body = json!({
            "title": title,
            "description": description,
            "state": "OPEN",
            "open": true,
            "fromRef": { "id": format!("refs/heads/{source_branch}"), "repository": repo_ref },
            "toRef": { "id": format!("refs/heads/{target_branch}"), "repository": repo_ref },
            "reviewers": reviewers
                .iter()
                .map(|name| json!({ "user": { "name": name } }))
                .collect::<Vec<_>>(),
        });

        let url = format!("{}/pull-requests", self.api_base);
        let resp = Self::check(self.request(Method::POST, url).json(&body).send().await?).await?;
        let pr: ServerPullRequest = resp.json().await?;
        Ok(map_pull_request(pr))
    }

    async fn get_pull_request(&self, id: u64) -> ProviderResult<PullRequest> {
        let url = format!("{}/pull-requests/{id}", self.api_base);
        let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
        let pr: ServerPullRequest = resp.json().await?;
        Ok(map_pull_request(pr))
    }

    async fn list_pull_requests(
        &self,
        state: Option<PullRequestState>,
        limit: Option<u32>,
    ) -> ProviderResult<Vec<PullRequest>> {
        let state_param = state.map(|s| s.as_remote()).unwrap_or("ALL");
        let url = format!(
            "{}/pull-requests?state={}&limit={}",
            self.api_base,
            state_param,
            limit.unwrap_or(PAGE_LIMIT)
        );
        let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
        let page: PullRequestPage = resp.json().await?;
        Ok(page.values.into_iter().map(map_pull_request).collect())
    }

    async fn merge_pull_request(
        &self,
        id: u64,
        message: Option<&str>,
    ) -> ProviderResult<MergeResult> {
        // 乐观并发：merge 前必须重新取当前 version
        let pr = self.get_pull_request(id).await?;
        let version = pr.version.unwrap_or(0);

        let url = format!("{}/pull-requests/{id}/merge?version={version}", self.api_base);
        let mut req = self.request(Method::POST, url);
        if let Some(message) = message {
            req = req.json(&json!({ "message": message }));
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();

        if status == 409 {
            // 响应体区分真冲突与「已合并/已拒绝」
            let body = resp.text().await.unwrap_or_default();
            let messages = extract_error_messages(&body);
            let is_conflict = messages
                .iter()
                .any(|m| m.to_lowercase().contains("conflict"));
            if is_conflict {
                return Ok(MergeResult::conflicted(messages));
            }
            return Ok(MergeResult {
                success: false,
                commit_id: None,
                conflicts: Vec::new(),
                message: Some(messages.join("; ")),
            });
        }

        let resp = Self::check(resp).await?;
        let merged: ServerPullRequest = resp.json().await?;
        let commit_id = merged
            .properties
            .and_then(|p| p.merge_commit)
            .map(|c| c.id);
        Ok(MergeResult::merged(commit_id))
    }

    async fn get_file_commits(
        &self,
        path: &str,
        branch: &str,
        limit: Option<u32>,
    ) -> ProviderResult<Vec<GitCommit>> {
        let url = format!(
            "{}/commits?path={}&until=refs/heads/{}&limit={}",
            self.api_base,
            super::urls::encode_query_value(path),
            branch,
            limit.unwrap_or(25)
        );
        let resp = Self::check(self.request(Method::GET, url).send().await?).await?;
        let page: CommitPage = resp.json().await?;
        Ok(page.values.into_iter().map(map_commit).collect())
    }

    async fn get_pull_request_diff(&self, id: u64) -> ProviderResult<Vec<FileDiff>> {
        let url = format!("{}/pull-requests/{id}/diff", self.api_base);
        let resp = Self::check(
            self.request(Method::GET, url)
                .header(reqwest::header::ACCEPT, "text/plain")
                .send()
                .await?,
        )
        .await?;
        let text = resp.text().await?;
        Ok(super::diff::split_unified_diff(&text))
    }
}

/// 解析两种 Server 路径形状：`/scm/{proj}/{repo}` 与 `/projects/{proj}/repos/{repo}`
fn parse_server_url(repo_url: &str) -> ProviderResult<(String, String, String)> {
    let url = Url::parse(repo_url)
        .map_err(|e| GitProviderError::InvalidRepositoryUrl(format!("{repo_url}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| GitProviderError::InvalidRepositoryUrl(format!("{repo_url}: no host")))?;

    let base_url = match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    };

    let segments: Vec<&str> = url
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let (project, repo) = match segments.as_slice() {
        ["scm", project, repo, ..] => (project, repo),
        ["projects", project, "repos", repo, ..] => (project, repo),
        _ => {
            return Err(GitProviderError::InvalidRepositoryUrl(format!(
                "{repo_url}: expected /scm/{{project}}/{{repo}} or /projects/{{project}}/repos/{{repo}}"
            )))
        }
    };

    let repo = repo.trim_end_matches(".git");
    if project.is_empty() || repo.is_empty() {
        return Err(GitProviderError::InvalidRepositoryUrl(repo_url.to_string()));
    }

    Ok((base_url, project.to_string(), repo.to_string()))
}

/// 从 Server 的错误响应体提取 `errors[].message`
fn extract_error_messages(body: &str) -> Vec<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        errors: Vec<ErrorEntry>,
    }
    #[derive(Deserialize)]
    struct ErrorEntry {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => {
            parsed.errors.into_iter().map(|e| e.message).collect()
        }
        _ => vec![truncate(body)],
    }
}

fn extract_error_detail(body: &str) -> String {
    extract_error_messages(body).join("; ")
}

fn truncate(body: &str) -> String {
    const MAX: usize = 512;
    if body.chars().count() > MAX {
        let head: String = body.chars().take(MAX).collect();
        format!("{head}…")
    } else {
        body.to_string()
    }
}

// ---- Server wire types ----

#[derive(Deserialize)]
struct BrowseResponse {
    children: Option<BrowseChildren>,
    size: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrowseChildren {
    values: Vec<BrowseEntry>,
    #[serde(default)]
    is_last_page: bool,
    next_page_start: Option<u64>,
}

#[derive(Deserialize)]
struct BrowseEntry {
    path: BrowsePath,
    #[serde(rename = "type")]
    kind: String,
    size: Option<u64>,
}

#[derive(Deserialize)]
struct BrowsePath {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchPage {
    values: Vec<BranchEntry>,
    #[serde(default)]
    is_last_page: bool,
    next_page_start: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchEntry {
    display_id: String,
    latest_commit: String,
    #[serde(default)]
    is_default: bool,
}

fn map_branch(entry: BranchEntry) -> GitBranch {
    GitBranch {
        name: entry.display_id,
        latest_commit: entry.latest_commit,
        is_default: entry.is_default,
    }
}

#[derive(Deserialize)]
struct CommitPage {
    values: Vec<ServerCommit>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerCommit {
    id: String,
    #[serde(default)]
    message: String,
    author: Option<ServerAuthor>,
    author_timestamp: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerAuthor {
    name: String,
    #[serde(default)]
    email_address: String,
}

fn map_commit(commit: ServerCommit) -> GitCommit {
    GitCommit {
        id: commit.id,
        message: commit.message,
        author: commit.author.map(|a| CommitAuthor {
            name: a.name,
            email: a.email_address,
        }),
        authored_at: commit
            .author_timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPullRequest {
    id: u64,
    version: Option<u64>,
    title: String,
    #[serde(default)]
    description: String,
    state: String,
    from_ref: ServerRef,
    to_ref: ServerRef,
    author: Option<ServerPrAuthor>,
    created_date: Option<i64>,
    links: Option<ServerLinks>,
    properties: Option<ServerPrProperties>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerRef {
    display_id: Option<String>,
    id: String,
}

impl ServerRef {
    fn branch_name(&self) -> String {
        self.display_id
            .clone()
            .unwrap_or_else(|| self.id.trim_start_matches("refs/heads/").to_string())
    }
}

#[derive(Deserialize)]
struct ServerPrAuthor {
    user: ServerUser,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerUser {
    name: String,
}

#[derive(Deserialize)]
struct ServerLinks {
    #[serde(rename = "self")]
    self_links: Vec<ServerLink>,
}

#[derive(Deserialize)]
struct ServerLink {
    href: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPrProperties {
    merge_commit: Option<ServerMergeCommit>,
}

#[derive(Deserialize)]
struct ServerMergeCommit {
    id: String,
}

#[derive(Deserialize)]
struct PullRequestPage {
    values: Vec<ServerPullRequest>,
}

fn map_pull_request(pr: ServerPullRequest) -> PullRequest {
    PullRequest {
        id: pr.id,
        title: pr.title,
        description: pr.description,
        state: PullRequestState::from_remote(&pr.state),
        source_branch: pr.from_ref.branch_name(),
        target_branch: pr.to_ref.branch_name(),
        author: pr.author.map(|a| a.user.name),
        created_at: pr
            .created_date
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        url: pr
            .links
            .and_then(|l| l.self_links.into_iter().next())
            .map(|l| l.href),
        version: pr.version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_credential() -> Credential {
        Credential::git(
            "srv",
            "https://git.acme.io/scm/plat/charts.git",
            GitAuthType::Token,
        )
        .with_token("tok")
    }

    #[test]
    fn test_parse_scm_url() {
        let (base, project, repo) =
            parse_server_url("https://git.acme.io/scm/PLAT/charts.git").unwrap();
        assert_eq!(base, "https://git.acme.io");
        assert_eq!(project, "PLAT");
        assert_eq!(repo, "charts");
    }

    #[test]
    fn test_parse_projects_url_with_port() {
        let (base, project, repo) =
            parse_server_url("https://git.acme.io:7990/projects/PLAT/repos/charts").unwrap();
        assert_eq!(base, "https://git.acme.io:7990");
        assert_eq!(project, "PLAT");
        assert_eq!(repo, "charts");
    }

    #[test]
    fn test_parse_rejects_unrecognized_shapes() {
        assert!(matches!(
            parse_server_url("https://git.acme.io/plat/charts"),
            Err(GitProviderError::InvalidRepositoryUrl(_))
        ));
        assert!(matches!(
            parse_server_url("not a url"),
            Err(GitProviderError::InvalidRepositoryUrl(_))
        ));
    }

    #[test]
    fn test_construction_is_where_url_errors_surface() {
        let err = BitbucketServerProvider::new(
            "https://git.acme.io/nothing",
            &token_credential(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, GitProviderError::InvalidRepositoryUrl(_)));
    }

    #[test]
    fn test_ssh_credential_rejected() {
        let cred = Credential::git("s", "https://git.acme.io/scm/p/r.git", GitAuthType::Ssh);
        let err =
            BitbucketServerProvider::new("https://git.acme.io/scm/p/r.git", &cred, false)
                .unwrap_err();
        assert!(matches!(err, GitProviderError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_repository_info_computed_once() {
        let provider = BitbucketServerProvider::new(
            "https://git.acme.io/scm/plat/charts.git",
            &token_credential(),
            false,
        )
        .unwrap();
        let info = provider.repository_info();
        assert_eq!(info.provider_type, GitProviderType::BitbucketServer);
        assert_eq!(info.project_key.as_deref(), Some("plat"));
        assert_eq!(info.repository_slug.as_deref(), Some("charts"));
        assert!(info.workspace.is_none());
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"errors":[{"message":"Repository does not exist"}]}"#;
        assert_eq!(extract_error_detail(body), "Repository does not exist");

        // 非 JSON 响应体原样（截断）返回
        assert_eq!(extract_error_detail("gateway timeout"), "gateway timeout");
    }
}
