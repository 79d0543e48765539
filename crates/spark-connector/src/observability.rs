//! 默认日志订阅者的安装入口。
//!
//! # 教案式说明
//! - **意图（Why）**：连接器内部只发出 `tracing` 事件，不关心输出去向；
//!   没有自带日志体系的宿主可以调用 [`install`] 一次性获得可用的控制台输出。
//! - **契约（What）**：过滤规则取自 `RUST_LOG`，缺省为 `info`；重复调用返回
//!   [`InstallError::AlreadyInstalled`]，外部已设置全局订阅者时返回
//!   [`InstallError::SubscriberAlreadySet`]。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装阶段的失败路径。
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("connector logging has already been installed")]
    AlreadyInstalled,
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局 `tracing` 订阅者。
pub fn install() -> Result<(), InstallError> {
    if INSTALLED.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| InstallError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
