//! tracing 初始化；宿主进程启动时调用一次
use tracing_subscriber::{fmt, EnvFilter};

/// 安装全局 subscriber；重复调用是 no-op
pub fn init_logging() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    // RUST_LOG 优先，缺省 info
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
    tracing::debug!("logging initialized");
}
