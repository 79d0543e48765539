#![deny(unsafe_code)]
#![doc = r#"
# spark-connector-tls

## 设计动机（Why）
- 为 `ssl://host:port` 定位符提供安全连接：在独占的 TCP 传输连接之上叠加经认证的字节流，
  对端证书在任何应用数据流动之前完成校验；
- 分层打开的任一步失败都必须按逆序释放已获取的资源，不留半开状态。

## 核心契约（What）
- [`SecureConnection`]：权限检查 → 传输连接 → 原始输出流 → 原始输入流 → 会话握手；
  关闭时先关会话、再无条件关闭传输；
- [`TrustStore`]：受信根证书的一次性惰性加载，显式传入而非全局单例；
- [`SecurityInfo`]：握手完成后的协议、密码套件、证书链与指纹快照。

## 实现策略（How）
- 会话基于 `rustls` 的同步客户端状态机，由本 crate 在原始流上驱动记录收发；
- 证书相关的 `rustls` 错误归入 `ConnectorError::Certificate`，其余归入 `Io`。
"#]

mod connection;
mod error;
mod info;
mod session;
mod stream;
mod trust;

pub use connection::SecureConnection;
pub use info::SecurityInfo;
pub use stream::{SecureInputStream, SecureOutputStream};
pub use trust::TrustStore;

use std::sync::Arc;

use spark_connector::{AccessMode, ConnectorContext, Result};

/// 安全连接使用的定位符 scheme。
pub const SCHEME: &str = "ssl";

/// 创建并打开一个安全连接。
///
/// 打开失败时连接对象随错误一同丢弃；需要在失败后继续观察连接状态或
/// [`SecureConnection::security_info`] 的调用方，应先 [`SecureConnection::new`] 再调用 `open`。
pub fn open(
    ctx: &ConnectorContext,
    trust: Arc<TrustStore>,
    locator: &str,
    mode: AccessMode,
    want_timeouts: bool,
) -> Result<SecureConnection> {
    let connection = SecureConnection::new(ctx, trust);
    connection.open(locator, mode, want_timeouts)?;
    Ok(connection)
}
