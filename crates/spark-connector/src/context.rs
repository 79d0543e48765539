use std::{fmt, sync::Arc};

use crate::{
    config::ConnectorConfig,
    error::Result,
    native::NativeNetwork,
    security::{AllowAll, PermissionChecker},
    wait::{CooperativeYield, ReadinessWait},
};

/// 一次性初始化、显式传递的连接器能力包。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 原生网络、权限检查器、等待策略与配置都是进程级状态，但不应成为隐式全局单例；
///   宿主在启动时构造一次 `ConnectorContext`，再把它交给 TCP 与 TLS 连接器的构造函数。
///
/// ## 契约（What）
/// - 克隆只复制一个 `Arc`，所有克隆共享同一组能力；
/// - 构造后不可变，连接器在整个生命周期内看到的是同一份配置。
#[derive(Clone)]
pub struct ConnectorContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    network: Arc<dyn NativeNetwork>,
    permissions: Arc<dyn PermissionChecker>,
    waiter: Arc<dyn ReadinessWait>,
    config: ConnectorConfig,
}

impl ConnectorContext {
    pub fn builder(network: Arc<dyn NativeNetwork>) -> ConnectorContextBuilder {
        ConnectorContextBuilder {
            network,
            permissions: None,
            waiter: None,
            config: ConnectorConfig::default(),
        }
    }

    pub fn network(&self) -> &Arc<dyn NativeNetwork> {
        &self.inner.network
    }

    pub fn permissions(&self) -> &Arc<dyn PermissionChecker> {
        &self.inner.permissions
    }

    pub fn waiter(&self) -> &Arc<dyn ReadinessWait> {
        &self.inner.waiter
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }
}

impl fmt::Debug for ConnectorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorContext")
            .field("network", &self.inner.network)
            .field("permissions", &self.inner.permissions)
            .field("waiter", &self.inner.waiter)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// [`ConnectorContext`] 的构建器。
///
/// 未显式指定时，权限检查默认放行，等待策略由配置中的退避参数生成 [`CooperativeYield`]。
pub struct ConnectorContextBuilder {
    network: Arc<dyn NativeNetwork>,
    permissions: Option<Arc<dyn PermissionChecker>>,
    waiter: Option<Arc<dyn ReadinessWait>>,
    config: ConnectorConfig,
}

impl ConnectorContextBuilder {
    pub fn permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn waiter(mut self, waiter: Arc<dyn ReadinessWait>) -> Self {
        self.waiter = Some(waiter);
        self
    }

    pub fn config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    /// 校验配置并冻结能力包。
    pub fn build(self) -> Result<ConnectorContext> {
        self.config.validate()?;
        let waiter = self.waiter.unwrap_or_else(|| {
            Arc::new(CooperativeYield::new(
                self.config.retry_yield_threshold,
                self.config.retry_backoff_unit,
                self.config.retry_backoff_max,
            ))
        });
        Ok(ConnectorContext {
            inner: Arc::new(ContextInner {
                network: self.network,
                permissions: self.permissions.unwrap_or_else(|| Arc::new(AllowAll)),
                waiter,
                config: self.config,
            }),
        })
    }
}
