#![deny(unsafe_code)]
#![doc = r#"
# spark-connector

## 设计动机（Why）
- **定位**：受限运行时中，应用代码以 `scheme://host:port` 形式的定位符打开字节流连接；
  本 crate 收拢 TCP 与 TLS 两个连接器共享的契约，使二者在错误分类、套接字选项、
  生命周期状态上保持同一种语言。
- **架构角色**：位于原生套接字原语（外部协作者）与应用代码之间；
  `spark-connector-tcp` 与 `spark-connector-tls` 均只依赖本 crate 的 trait 与类型。

## 核心契约（What）
- [`Locator`]：定位符解析，authority 之后出现路径/查询/片段一律视为格式错误；
- [`ConnectorError`]：`Address`/`InvalidArgument`/`Closed`/`StreamClosed`/`Security`/
  `Certificate`/`Io` 等分类，附稳定错误码与 [`ErrorCategory`]；
- [`StreamConnection`]/[`SocketConnection`]：两种连接共同实现的能力集合；
- [`NativeSocket`]/[`NativeNetwork`]：原生层边界，`read` 以 [`NativeRead::Pending`]
  表达“暂未就绪”；
- [`ConnectorContext`]：一次性初始化的能力包，显式传入各连接器构造函数。

## 实现策略（How）
- 同步阻塞语义：逻辑读在原生“未就绪”时通过 [`ReadinessWait`] 协作让出，再重新轮询；
- 失败清理依赖 [`ReleaseGuard`] 的作用域释放，按获取的逆序展开；
- 日志统一走 `tracing`，宿主可调用 [`observability::install`] 安装默认订阅者。

## 风险与考量（Trade-offs）
- 原生层被建模为非阻塞原语，真正的阻塞仅发生在等待策略中；等待策略过于激进会抬高 CPU，
  过于保守会增加读延迟，默认值参考了传输层背压统计的阈值与退避单位。
"#]

pub mod config;
pub mod connection;
pub mod context;
pub mod data;
pub mod error;
pub mod guard;
pub mod locator;
pub mod native;
pub mod observability;
pub mod option;
pub mod security;
pub mod wait;

#[cfg(feature = "test-util")]
pub mod testing;

pub use config::ConnectorConfig;
pub use connection::{AccessMode, ConnectionState, SocketConnection, StateCell, StreamConnection};
pub use context::{ConnectorContext, ConnectorContextBuilder};
pub use data::{DataInput, DataOutput};
pub use error::{ConnectorError, ErrorCategory, OperationKind, Result};
pub use guard::ReleaseGuard;
pub use locator::Locator;
pub use native::{NativeListener, NativeNetwork, NativeRead, NativeSocket};
pub use option::{OPTION_UNAVAILABLE, SocketOption};
pub use security::{AllowAll, CheckFailure, PermissionChecker};
pub use wait::{CooperativeYield, ReadinessWait};
