#![deny(unsafe_code)]
#![doc = r#"
# spark-connector-tcp

## 设计动机（Why）
- 为 `socket://host:port` 定位符提供传输连接：主动连接、监听、接管入站句柄；
- 安全连接（`spark-connector-tls`）以组合方式复用本 crate 的 [`TcpConnection`]。

## 核心契约（What）
- [`open`]：解析定位符，主机非空时主动连接，主机为空时返回监听连接；
- [`TcpConnection`]：阻塞式逻辑读（原生 `Pending` 时协作让出并重试）、单次写、
  幂等的半关闭与关闭、套接字选项校验；
- [`SystemNetwork`]：基于 `socket2` 的原生层实现。

## 实现策略（How）
- 原生句柄放在可被关闭线程清空的槽位里，读循环每轮重新取句柄，从而把并发关闭
  确定性地报告为 `StreamClosed`；
- 连接内部状态由 `Arc` 共享，最后一个持有者析构时执行与显式关闭相同的释放路径。
"#]

mod connection;
mod error;
mod listener;
mod stream;
mod system;

pub use connection::TcpConnection;
pub use listener::TcpServerConnection;
pub use stream::{TcpInputStream, TcpOutputStream};
pub use system::{SystemListener, SystemNetwork, SystemSocket};

use spark_connector::{AccessMode, ConnectorContext, ConnectorError, Locator, Result};
use tracing::debug;

/// 传输连接使用的定位符 scheme。
pub const SCHEME: &str = "socket";

/// [`open`] 的结果：主动连接或监听连接。
#[derive(Debug)]
pub enum TcpEndpoint {
    Client(TcpConnection),
    Server(TcpServerConnection),
}

impl TcpEndpoint {
    pub fn into_client(self) -> Option<TcpConnection> {
        match self {
            Self::Client(conn) => Some(conn),
            Self::Server(_) => None,
        }
    }

    pub fn into_server(self) -> Option<TcpServerConnection> {
        match self {
            Self::Server(server) => Some(server),
            Self::Client(_) => None,
        }
    }
}

/// 按 `socket://[host][:port]` 打开传输连接。
///
/// # 教案式注释
///
/// ## 逻辑 (How)
/// 1. 解析定位符并校验 scheme，失败时不创建任何原生句柄；
/// 2. 主机为空：对 `socket://:port` 做权限检查后绑定端口，返回 [`TcpEndpoint::Server`]；
/// 3. 主机非空：端口必须存在，对 `socket://host:port` 做权限检查后主动连接。
///
/// ## 契约 (What)
/// - `want_timeouts` 为真时，读操作受 `ConnectorConfig::read_timeout` 约束，超时返回
///   `ConnectorError::Timeout`；
/// - 权限被拒返回 `Security`，检查被打断返回 `Interrupted`。
pub fn open(
    ctx: &ConnectorContext,
    locator: &str,
    mode: AccessMode,
    want_timeouts: bool,
) -> Result<TcpEndpoint> {
    let parsed = Locator::parse(locator)?;
    parsed.expect_scheme(SCHEME)?;
    let target = format!("{SCHEME}:{}", parsed.authority());

    let Some(host) = parsed.host() else {
        ctx.permissions()
            .check_connect(&target)
            .map_err(|failure| failure.into_error(target.clone()))?;
        debug!(%target, "opening tcp listener");
        return TcpServerConnection::listen(ctx, parsed.port(), mode, want_timeouts)
            .map(TcpEndpoint::Server);
    };

    let port = parsed
        .port()
        .ok_or_else(|| ConnectorError::address(locator, "missing port for active connect"))?;
    ctx.permissions()
        .check_connect(&target)
        .map_err(|failure| failure.into_error(target.clone()))?;
    TcpConnection::connect(ctx, host, port, mode, want_timeouts).map(TcpEndpoint::Client)
}
