use std::{borrow::Cow, fmt, io, time::Duration};

use thiserror::Error;

use crate::connection::AccessMode;

/// 连接器统一的结果别名。
pub type Result<T, E = ConnectorError> = std::result::Result<T, E>;

/// 描述一次底层操作对应的稳定错误码与默认文案。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 同一类原生失败（如 `ECONNRESET`）出现在读、写、关闭等不同阶段时，排障人员需要
///   一眼看出发生在哪个操作上；把“操作”显式建模为常量，避免在调用点手写字符串。
///
/// ## 契约 (What)
/// - `code`：遵循 `spark.connector.<层>.<语义>` 的稳定错误码，仅用于 [`ConnectorError::Io`]
///   等需要区分操作的变体；
/// - `message`：简短的人类可读操作名，拼接进错误文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

impl OperationKind {
    /// 以常量形式声明操作。
    pub const fn new(code: &'static str, message: &'static str) -> Self {
        Self { code, message }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

/// 非 I/O 变体使用的稳定错误码。
pub mod codes {
    pub const ADDRESS_INVALID: &str = "spark.connector.address_invalid";
    pub const INVALID_ARGUMENT: &str = "spark.connector.invalid_argument";
    pub const CLOSED: &str = "spark.connector.closed";
    pub const STREAM_CLOSED: &str = "spark.connector.stream_closed";
    pub const ACCESS_MODE: &str = "spark.connector.access_mode";
    pub const SECURITY_DENIED: &str = "spark.connector.security.denied";
    pub const SECURITY_INTERRUPTED: &str = "spark.connector.security.interrupted";
    pub const TIMEOUT: &str = "spark.connector.timeout";
    pub const CERTIFICATE_REJECTED: &str = "spark.connector.tls.certificate_rejected";
}

/// 错误的处置分类，驱动调用方的重试、告警与关闭策略。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 瞬时故障，建议在 `after` 之后重试。
    Retryable { after: Duration },
    /// 重试无意义，需要调用方修正输入或放弃连接。
    NonRetryable,
    /// 权限或证书层面的拒绝，应进入安全审计链路。
    Security,
    /// 调用方请求的超时已触发。
    Timeout,
    /// 等待被外部信号打断。
    Cancelled,
}

/// 连接器错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“定位符格式错误”“在已关闭连接上操作”“与并发关闭竞争”“权限/证书拒绝”
///   与“原生 I/O 失败”区分开，让调用方无需解析文案即可决定下一步。
/// - **契约 (What)**：
///   - 校验类错误（`Address`/`InvalidArgument`/`Closed`）总是在触达原生层之前同步返回，
///     不会留下任何部分状态；
///   - `StreamClosed` 只在读写与另一线程的 `close` 竞争时出现，与 `Closed` 区分；
///   - `Timeout` 表示调用方请求的截止时间已到，与“读到 0 字节”“读到流末尾”均不同；
///   - `Security` 可携带关闭被拒句柄时遇到的 I/O 错误，`source()` 可追溯。
/// - **执行逻辑 (How)**：`code()` 给出稳定错误码，`category()` 给出处置分类；
///   `Io` 变体的分类沿用 `io::ErrorKind` 的映射表。
/// - **设计权衡 (Trade-offs)**：变体字段保存 `String`，牺牲少量堆分配换取可读上下文。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectorError {
    /// 定位符格式错误或缺少必要部分。
    #[error("malformed locator `{locator}`: {reason}")]
    Address {
        locator: String,
        reason: Cow<'static, str>,
    },

    /// 不支持的套接字选项或越界取值。
    #[error("invalid argument: {detail}")]
    InvalidArgument { detail: Cow<'static, str> },

    /// 在未处于打开状态的连接上执行操作。
    #[error("{operation}: connection is not open")]
    Closed { operation: OperationKind },

    /// 操作执行期间连接被另一线程关闭。
    #[error("{operation}: stream was closed while the operation was in flight")]
    StreamClosed { operation: OperationKind },

    /// 访问模式不允许该方向的流。
    #[error("{operation}: connection opened in `{mode}` mode")]
    AccessMode {
        operation: OperationKind,
        mode: AccessMode,
    },

    /// 权限检查拒绝了目标。
    #[error("permission denied for `{target}`: {reason}")]
    Security {
        target: String,
        reason: Cow<'static, str>,
        #[source]
        source: Option<io::Error>,
    },

    /// 权限检查在等待决策时被打断。
    #[error("security check for `{target}` was interrupted")]
    Interrupted { target: String },

    /// 调用方请求的截止时间已到。
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: OperationKind,
        elapsed: Duration,
    },

    /// 对端证书链未通过校验。
    #[error("certificate rejected for `{host}`: {reason}")]
    Certificate { host: String, reason: String },

    /// 其余原生层失败。
    #[error("{operation}: {source}")]
    Io {
        operation: OperationKind,
        #[source]
        source: io::Error,
    },
}

impl ConnectorError {
    /// 构造定位符格式错误。
    pub fn address(locator: impl Into<String>, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Address {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// 构造参数错误。
    pub fn invalid_argument(detail: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument {
            detail: detail.into(),
        }
    }

    /// 构造“连接未打开”错误。
    pub fn closed(operation: OperationKind) -> Self {
        Self::Closed { operation }
    }

    /// 构造“与并发关闭竞争”错误。
    pub fn stream_closed(operation: OperationKind) -> Self {
        Self::StreamClosed { operation }
    }

    /// 将原生 I/O 错误归入指定操作。
    pub fn io(operation: OperationKind, source: io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// 将 `io::Error` 还原为连接器错误。
    ///
    /// # 教案级注释
    ///
    /// ## 意图（Why）
    /// - 连接器的流实现 `std::io::Read`/`Write`，错误需要经由 `io::Error` 穿过
    ///   `rustls` 等第三方代码；回到连接器边界时应恢复原始分类，而不是再包一层 `Io`。
    ///
    /// ## 契约（What）
    /// - 若 `source` 内部承载的正是 [`ConnectorError`]，原样取出；
    /// - 否则包装为 `Io { operation, source }`。
    pub fn lift(operation: OperationKind, source: io::Error) -> Self {
        let carries_connector_error = source
            .get_ref()
            .is_some_and(|inner| inner.is::<ConnectorError>());
        if carries_connector_error {
            if let Some(inner) = source.into_inner() {
                if let Ok(error) = inner.downcast::<ConnectorError>() {
                    return *error;
                }
            }
            return Self::io(
                operation,
                io::Error::other("connector error lost while unwrapping"),
            );
        }
        Self::io(operation, source)
    }

    /// 在不取得所有权的前提下查看 `io::Error` 中承载的连接器错误。
    pub fn from_io(error: &io::Error) -> Option<&ConnectorError> {
        error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ConnectorError>())
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Address { .. } => codes::ADDRESS_INVALID,
            Self::InvalidArgument { .. } => codes::INVALID_ARGUMENT,
            Self::Closed { .. } => codes::CLOSED,
            Self::StreamClosed { .. } => codes::STREAM_CLOSED,
            Self::AccessMode { .. } => codes::ACCESS_MODE,
            Self::Security { .. } => codes::SECURITY_DENIED,
            Self::Interrupted { .. } => codes::SECURITY_INTERRUPTED,
            Self::Timeout { .. } => codes::TIMEOUT,
            Self::Certificate { .. } => codes::CERTIFICATE_REJECTED,
            Self::Io { operation, .. } => operation.code,
        }
    }

    /// 处置分类。
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Address { .. }
            | Self::InvalidArgument { .. }
            | Self::Closed { .. }
            | Self::StreamClosed { .. }
            | Self::AccessMode { .. } => ErrorCategory::NonRetryable,
            Self::Security { .. } | Self::Certificate { .. } => ErrorCategory::Security,
            Self::Interrupted { .. } => ErrorCategory::Cancelled,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Io { source, .. } => categorize_io_error(source),
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::Address { .. } | Self::InvalidArgument { .. } => io::ErrorKind::InvalidInput,
            Self::Closed { .. } | Self::StreamClosed { .. } => io::ErrorKind::NotConnected,
            Self::AccessMode { .. } => io::ErrorKind::Unsupported,
            Self::Security { .. } => io::ErrorKind::PermissionDenied,
            Self::Interrupted { .. } => io::ErrorKind::Interrupted,
            Self::Timeout { .. } => io::ErrorKind::TimedOut,
            Self::Certificate { .. } => io::ErrorKind::InvalidData,
            Self::Io { source, .. } => source.kind(),
        }
    }
}

impl From<ConnectorError> for io::Error {
    fn from(error: ConnectorError) -> Self {
        io::Error::new(error.io_kind(), error)
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::WouldBlock | ErrorKind::Interrupted => ErrorCategory::Retryable {
            after: Duration::from_millis(5),
        },
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe => ErrorCategory::Retryable {
            after: Duration::from_millis(50),
        },
        ErrorKind::WriteZero => ErrorCategory::Retryable {
            after: Duration::from_millis(10),
        },
        ErrorKind::PermissionDenied | ErrorKind::Unsupported => ErrorCategory::NonRetryable,
        _ => ErrorCategory::NonRetryable,
    }
}
