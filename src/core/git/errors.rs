use thiserror::Error;

/// Provider 调用的错误分类
///
/// 合并冲突不在这里：它是 merge 的预期结果，作为 `MergeResult` 数据返回。
#[derive(Error, Debug)]
pub enum GitProviderError {
    /// 构造期错误，URL 无法解析出仓库坐标；调用方需修正输入
    #[error("invalid repository url: {0}")]
    InvalidRepositoryUrl(String),

    /// 凭证无效或过期，调用方应引导重新认证
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// 凭证有效但权限不足
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// 仓库/分支/文件/PR 不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// Bitbucket Server 专属：逐文件提交中途失败，前面的文件已在分支上
    #[error("partial commit failure at '{path}' after {} applied change(s): {detail}", applied.len())]
    PartialCommitFailure {
        /// 已经成功落到分支上的文件路径，按应用顺序
        applied: Vec<String>,
        /// 失败的文件路径
        path: String,
        detail: String,
    },

    /// 其余非 2xx 响应，携带远端可解析的错误详情
    #[error("remote error ({status}): {detail}")]
    Remote { status: u16, detail: String },

    /// 网络层失败（连接、TLS、超时）
    #[error("network error: {0}")]
    Network(String),
}

pub type ProviderResult<T> = Result<T, GitProviderError>;

impl From<reqwest::Error> for GitProviderError {
    fn from(e: reqwest::Error) -> Self {
        GitProviderError::Network(e.to_string())
    }
}

impl GitProviderError {
    /// 按 HTTP 状态码分类非 2xx 响应；`detail` 为远端错误消息
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 => GitProviderError::AuthenticationFailed(detail),
            403 => GitProviderError::PermissionDenied(detail),
            404 => GitProviderError::NotFound(detail),
            _ => GitProviderError::Remote { status, detail },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            GitProviderError::from_status(401, "x"),
            GitProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            GitProviderError::from_status(403, "x"),
            GitProviderError::PermissionDenied(_)
        ));
        assert!(matches!(
            GitProviderError::from_status(404, "x"),
            GitProviderError::NotFound(_)
        ));
        assert!(matches!(
            GitProviderError::from_status(500, "x"),
            GitProviderError::Remote { status: 500, .. }
        ));
    }

    #[test]
    fn test_partial_commit_display_counts_applied() {
        let err = GitProviderError::PartialCommitFailure {
            applied: vec!["values.yaml".into()],
            path: "Chart.yaml".into(),
            detail: "500".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Chart.yaml"));
        assert!(msg.contains("1 applied"));
    }
}
