use std::{fmt, net::SocketAddr, sync::Arc};

use parking_lot::Mutex;
use spark_connector::{
    AccessMode, ConnectionState, ConnectorContext, ConnectorError, NativeListener, Result,
    StateCell,
};
use tracing::{debug, warn};

use crate::{
    connection::TcpConnection,
    error::{self, map_io_error},
};

/// 监听模式的 TCP 连接（空主机定位符，例如 `socket://:9000`）。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 空主机是入站服务套接字的入口：打开时只绑定端口，不做任何主动连接；
///   入站句柄经 [`TcpConnection::adopt`] 完成远端地址权限检查后才交给应用。
///
/// ## 契约（What）
/// - `listen`：`port` 为 `None` 或 0 时由系统分配端口，`local_port` 返回实际端口；
/// - `accept_and_open`：阻塞直至有入站连接；监听器被并发关闭时返回 `StreamClosed`；
/// - `close`：幂等，析构时自动关闭。
///
/// ## 注意事项（Trade-offs）
/// - 本类型不拥有接受循环的线程模型，调用方自行决定在哪个线程上调用 `accept_and_open`。
pub struct TcpServerConnection {
    ctx: ConnectorContext,
    listener: Mutex<Option<Arc<dyn NativeListener>>>,
    local: SocketAddr,
    mode: AccessMode,
    want_timeouts: bool,
    state: StateCell,
}

impl TcpServerConnection {
    /// 绑定端口并开始监听。权限检查由调用方负责。
    pub fn listen(
        ctx: &ConnectorContext,
        port: Option<u16>,
        mode: AccessMode,
        want_timeouts: bool,
    ) -> Result<Self> {
        let listener = ctx
            .network()
            .listen(port.unwrap_or(0), ctx.config().listen_backlog)
            .map_err(|err| map_io_error(error::LISTEN, err))?;
        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(err) => {
                if let Err(close_err) = listener.close() {
                    warn!(error = %close_err, "closing half-initialized listener failed");
                }
                return Err(map_io_error(error::LISTEN, err));
            }
        };
        debug!(%local, "tcp listener bound");
        Ok(Self {
            ctx: ctx.clone(),
            listener: Mutex::new(Some(listener)),
            local,
            mode,
            want_timeouts,
            state: StateCell::new(ConnectionState::Open),
        })
    }

    /// 等待一个入站连接并接管它。
    pub fn accept_and_open(&self) -> Result<TcpConnection> {
        let listener = self
            .listener
            .lock()
            .clone()
            .ok_or_else(|| ConnectorError::closed(error::ACCEPT))?;
        let (handle, remote) = listener.accept().map_err(|err| {
            if self.state.load().is_terminal() {
                ConnectorError::stream_closed(error::ACCEPT)
            } else {
                map_io_error(error::ACCEPT, err)
            }
        })?;
        debug!(%remote, local = %self.local, "inbound tcp connection accepted");
        TcpConnection::adopt(&self.ctx, handle, self.mode, self.want_timeouts)
    }

    pub fn local_address(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.local.ip().to_string())
    }

    pub fn local_port(&self) -> Result<u16> {
        self.ensure_open()?;
        Ok(self.local.port())
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// 停止监听；重复调用为空操作。
    pub fn close(&self) -> Result<()> {
        self.state.terminate(ConnectionState::Closed);
        let Some(listener) = self.listener.lock().take() else {
            return Ok(());
        };
        debug!(local = %self.local, "tcp listener closed");
        listener
            .close()
            .map_err(|err| map_io_error(error::CLOSE, err))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.load().is_usable() {
            Ok(())
        } else {
            Err(ConnectorError::closed(error::ADDRESS))
        }
    }
}

impl Drop for TcpServerConnection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(code = err.code(), error = %err, "tcp listener close on drop failed");
        }
    }
}

impl fmt::Debug for TcpServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpServerConnection")
            .field("local", &self.local)
            .field("mode", &self.mode)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}
