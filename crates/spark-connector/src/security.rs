use std::{borrow::Cow, fmt};

use crate::error::ConnectorError;

/// 权限检查失败的两种形态。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckFailure {
    /// 策略或用户拒绝了目标。
    Denied { reason: Cow<'static, str> },
    /// 等待用户决策时被打断。
    Interrupted,
}

impl CheckFailure {
    pub fn denied(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    /// 转换为连接器错误，保证中断信号不会以无类型形式逃逸。
    pub fn into_error(self, target: impl Into<String>) -> ConnectorError {
        match self {
            Self::Denied { reason } => ConnectorError::Security {
                target: target.into(),
                reason,
                source: None,
            },
            Self::Interrupted => ConnectorError::Interrupted {
                target: target.into(),
            },
        }
    }
}

/// 连接创建前的权限检查能力。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 受限运行时中，应用能否访问某个网络端点由宿主策略决定，可能需要弹窗询问用户；
///   连接器只负责在做任何 I/O 之前调用本 trait，并把结果翻译为类型化错误。
///
/// ## 契约（What）
/// - `check_connect`：目标串形如 `ssl://host:443` 或 `socket://host:80`，可能阻塞；
/// - `check_accept`：针对入站连接的远端地址，默认与 `check_connect` 使用同一策略。
pub trait PermissionChecker: Send + Sync + fmt::Debug {
    fn check_connect(&self, target: &str) -> Result<(), CheckFailure>;

    fn check_accept(&self, target: &str) -> Result<(), CheckFailure> {
        self.check_connect(target)
    }
}

/// 放行一切目标的默认策略。
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn check_connect(&self, _target: &str) -> Result<(), CheckFailure> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_check_maps_to_interrupted_error() {
        let err = CheckFailure::Interrupted.into_error("ssl://host:443");
        assert!(matches!(err, ConnectorError::Interrupted { ref target } if target == "ssl://host:443"));
    }

    #[test]
    fn denied_check_maps_to_security_error() {
        let err = CheckFailure::denied("blocked by policy").into_error("socket://host:80");
        assert!(matches!(err, ConnectorError::Security { source: None, .. }));
    }
}
