use std::{
    fmt, io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::{Buf, BytesMut};
use parking_lot::{Mutex, RwLock};
use spark_connector::{
    AccessMode, ConnectionState, ConnectorContext, ConnectorError, NativeRead, NativeSocket,
    OPTION_UNAVAILABLE, OperationKind, ReadinessWait, Result, SocketConnection, SocketOption,
    StateCell, StreamConnection,
};
use tracing::{debug, trace, warn};

use crate::{
    error::{self, map_io_error},
    stream::{TcpInputStream, TcpOutputStream},
};

/// 连接内部状态，由连接本身与其派生的输入/输出流共享。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 流对象可以被移动到其他线程，而关闭可能发生在任意一方；把句柄与缓冲放进共享结构，
///   才能让“另一线程关闭”对正在轮询的读线程立即可见。
///
/// ## 契约（What）
/// - `handle`：唯一的原生句柄槽位，`close` 把句柄移出后槽位永远为空，确保只释放一次；
/// - `staged`：已从原生层取出、尚未交给调用方的字节，容量不超过 `capacity`；
/// - `eof`：一旦置位，后续读取直接报告流末尾，不再调用原生原语；
/// - `output_shutdown`：输出方向是否已半关闭，互斥锁同时串行化半关闭调用本身。
///
/// ## 注意事项（Trade-offs）
/// - `reader` 互斥锁串行化逻辑读者并复用读取暂存区；`available` 只短暂持有 `staged`，
///   因此不会被阻塞中的读调用卡住。
pub(crate) struct TcpShared {
    handle: RwLock<Option<Arc<dyn NativeSocket>>>,
    host: String,
    port: u16,
    mode: AccessMode,
    reader: Mutex<BytesMut>,
    staged: Mutex<BytesMut>,
    eof: AtomicBool,
    output_shutdown: Mutex<bool>,
    state: StateCell,
    read_timeout: Option<Duration>,
    capacity: usize,
    waiter: Arc<dyn ReadinessWait>,
}

impl TcpShared {
    pub(crate) fn waiter(&self) -> &Arc<dyn ReadinessWait> {
        &self.waiter
    }

    /// 取出当前句柄；连接未打开时返回 `Closed`。
    pub(crate) fn handle(&self, operation: OperationKind) -> Result<Arc<dyn NativeSocket>> {
        if !self.state.load().is_usable() {
            return Err(ConnectorError::closed(operation));
        }
        self.handle
            .read()
            .clone()
            .ok_or_else(|| ConnectorError::closed(operation))
    }

    /// 操作进行中重新取句柄；句柄已被并发关闭时返回 `StreamClosed`。
    fn live_handle(&self, operation: OperationKind) -> Result<Arc<dyn NativeSocket>> {
        if self.state.load().is_terminal() {
            return Err(ConnectorError::stream_closed(operation));
        }
        self.handle
            .read()
            .clone()
            .ok_or_else(|| ConnectorError::stream_closed(operation))
    }

    fn invalidated(&self) -> bool {
        self.state.load().is_terminal() || self.handle.read().is_none()
    }

    fn native_failure(&self, operation: OperationKind, err: io::Error) -> ConnectorError {
        if self.invalidated() {
            ConnectorError::stream_closed(operation)
        } else {
            map_io_error(operation, err)
        }
    }

    /// 逻辑读：返回 `Some(n)` 表示读到 `n` 字节，`None` 表示流末尾。
    ///
    /// # 教案级注释
    ///
    /// ## 逻辑（How）
    /// 1. 连接未打开时直接返回 `Closed`；
    /// 2. 暂存区有数据时先交付暂存数据，不触碰原生层；
    /// 3. 已记录流末尾时直接返回 `None`；
    /// 4. 否则进入 [`Self::fill`] 的轮询循环，把取到的数据放入暂存区后再交付。
    pub(crate) fn read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        self.handle(error::READ)?;
        let mut scratch = self.reader.lock();

        {
            let mut staged = self.staged.lock();
            if !staged.is_empty() {
                return Ok(Some(drain_into(&mut staged, buf)));
            }
        }
        if self.eof.load(Ordering::Acquire) {
            return Ok(None);
        }

        match self.fill(&mut scratch)? {
            Some(n) => {
                let mut staged = self.staged.lock();
                // `disconnect` 先终止状态再清空暂存区，二者都在此锁之后可见。
                if self.state.load().is_terminal() {
                    return Err(ConnectorError::stream_closed(error::READ));
                }
                staged.extend_from_slice(&scratch[..n]);
                Ok(Some(drain_into(&mut staged, buf)))
            }
            None => {
                self.eof.store(true, Ordering::Release);
                Ok(None)
            }
        }
    }

    /// 把非阻塞原语转换为阻塞语义的轮询循环。
    ///
    /// 每一轮都重新取句柄，使并发关闭在下一次轮询时即被感知；`Pending` 时先检查调用方的
    /// 超时，再交给等待策略让出线程。
    fn fill(&self, scratch: &mut BytesMut) -> Result<Option<usize>> {
        scratch.clear();
        scratch.resize(self.capacity, 0);
        let started = Instant::now();
        let mut attempt = 0_u32;
        loop {
            let handle = self.live_handle(error::READ)?;
            match handle.read(&mut scratch[..]) {
                Ok(NativeRead::Data(n)) => return Ok(Some(n.min(self.capacity))),
                Ok(NativeRead::Eof) => return Ok(None),
                Ok(NativeRead::Pending) => {}
                Err(err) => return Err(self.native_failure(error::READ, err)),
            }
            drop(handle);

            if let Some(limit) = self.read_timeout {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    return Err(ConnectorError::Timeout {
                        operation: error::READ,
                        elapsed,
                    });
                }
            }
            trace!(attempt, host = %self.host, port = self.port, "native read pending, yielding");
            self.waiter.wait(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    /// 暂存区非空时返回暂存字节数，否则不阻塞地询问原生层。
    pub(crate) fn available(&self) -> Result<usize> {
        let handle = self.handle(error::AVAILABLE)?;
        let staged = self.staged.lock().len();
        if staged > 0 {
            return Ok(staged);
        }
        if self.eof.load(Ordering::Acquire) {
            return Ok(0);
        }
        handle
            .available()
            .map(|ready| ready.min(self.capacity))
            .map_err(|err| self.native_failure(error::AVAILABLE, err))
    }

    /// 单次原生写；返回 0 表示套接字暂不可写。
    pub(crate) fn write(&self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let handle = self.handle(error::WRITE)?;
        if *self.output_shutdown.lock() {
            return Err(ConnectorError::closed(error::WRITE));
        }
        handle
            .write(buf)
            .map_err(|err| self.native_failure(error::WRITE, err))
    }

    /// 半关闭输出方向；成功一次后再次调用为空操作。
    pub(crate) fn shutdown_output(&self) -> Result<()> {
        let handle = self.handle(error::SHUTDOWN)?;
        let mut done = self.output_shutdown.lock();
        if *done {
            return Ok(());
        }
        handle
            .shutdown_output()
            .map_err(|err| self.native_failure(error::SHUTDOWN, err))?;
        *done = true;
        self.state
            .transition(ConnectionState::Open, ConnectionState::OutputShutdown);
        Ok(())
    }

    /// 先尝试半关闭输出，再完全释放句柄；第二次调用为空操作。
    pub(crate) fn disconnect(&self) -> Result<()> {
        self.state.terminate(ConnectionState::Closed);
        let Some(handle) = self.handle.write().take() else {
            return Ok(());
        };

        let mut outcome = Ok(());
        {
            let mut done = self.output_shutdown.lock();
            if !*done {
                match handle.shutdown_output() {
                    Ok(()) => *done = true,
                    Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
                    Err(err) => outcome = Err(map_io_error(error::SHUTDOWN, err)),
                }
            }
        }
        if let Err(err) = handle.close() {
            if outcome.is_ok() {
                outcome = Err(map_io_error(error::CLOSE, err));
            } else {
                warn!(host = %self.host, port = self.port, error = %err, "tcp close failed after shutdown failure");
            }
        }
        self.staged.lock().clear();
        debug!(host = %self.host, port = self.port, "tcp connection closed");
        outcome
    }

    fn endpoint(&self, local: bool) -> Result<SocketAddr> {
        self.handle(error::ADDRESS)?
            .endpoint(local)
            .map_err(|err| self.native_failure(error::ADDRESS, err))
    }

    fn set_option(&self, option: SocketOption, value: i32) -> Result<()> {
        option.validate_value(value)?;
        self.handle(error::OPTION)?
            .set_option(option, value)
            .map_err(|err| self.native_failure(error::OPTION, err))
    }

    fn get_option(&self, option: SocketOption) -> Result<i32> {
        match self.handle(error::OPTION)?.get_option(option) {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == io::ErrorKind::Unsupported => Ok(OPTION_UNAVAILABLE),
            Err(err) => Err(self.native_failure(error::OPTION, err)),
        }
    }
}

impl Drop for TcpShared {
    fn drop(&mut self) {
        if self.handle.get_mut().is_some() {
            warn!(host = %self.host, port = self.port, "reclaiming tcp connection dropped without close");
            if let Err(err) = self.disconnect() {
                warn!(code = err.code(), error = %err, "tcp reclamation failed");
            }
        }
    }
}

impl fmt::Debug for TcpShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpShared")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("mode", &self.mode)
            .field("state", &self.state.load())
            .field("eof", &self.eof.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn drain_into(staged: &mut BytesMut, buf: &mut [u8]) -> usize {
    let n = staged.len().min(buf.len());
    buf[..n].copy_from_slice(&staged[..n]);
    staged.advance(n);
    n
}

/// TCP 传输连接。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 持有唯一的原生句柄，把非阻塞原语包装为阻塞式的逻辑读写，并实现半关闭、
///   套接字选项校验与端点查询；安全连接以组合方式持有本类型。
///
/// ## 逻辑 (How)
/// - `connect`：解析主机、调用原生连接原语，成功后进入 `Open`；
/// - `adopt`：接管监听端交付的已连接句柄，先做远端地址的权限检查，失败立即关闭句柄；
/// - 被丢弃而未显式关闭时，共享状态的析构执行与 `disconnect` 相同的释放路径。
///
/// ## 契约 (What)
/// - 校验类错误（`InvalidArgument`/`Closed`）总在触达原生层之前返回；
/// - `disconnect` 与 `close` 幂等；
/// - `read` 的 `None` 表示流末尾，此后不再调用原生读。
///
/// ## 注意事项 (Trade-offs)
/// - 输入流与输出流共享同一份内部状态；若要真正并行读写，应各自只由一个线程驱动。
pub struct TcpConnection {
    shared: Arc<TcpShared>,
}

impl TcpConnection {
    /// 主动连接 `host:port`。权限检查由调用方负责。
    pub fn connect(
        ctx: &ConnectorContext,
        host: &str,
        port: u16,
        mode: AccessMode,
        want_timeouts: bool,
    ) -> Result<Self> {
        let network = ctx.network();
        let addr = network
            .resolve(host, port)
            .map_err(|err| map_io_error(error::RESOLVE, err))?;
        let handle = network
            .connect(addr, ctx.config().connect_timeout)
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        debug!(host, port, %addr, %mode, "tcp connection established");
        Ok(Self::from_handle(ctx, handle, host.to_owned(), port, mode, want_timeouts))
    }

    /// 接管一个已连接的原生句柄。
    ///
    /// 远端地址未通过权限检查时句柄被立即关闭，返回的 `Security` 错误携带关闭时遇到的
    /// I/O 失败（若有）。
    pub fn adopt(
        ctx: &ConnectorContext,
        handle: Arc<dyn NativeSocket>,
        mode: AccessMode,
        want_timeouts: bool,
    ) -> Result<Self> {
        let remote = match handle.endpoint(false) {
            Ok(remote) => remote,
            Err(err) => {
                if let Err(close_err) = handle.close() {
                    warn!(error = %close_err, "closing unidentified inbound handle failed");
                }
                return Err(map_io_error(error::ADOPT, err));
            }
        };

        let target = format!("{}://{remote}", crate::SCHEME);
        if let Err(failure) = ctx.permissions().check_accept(&target) {
            let close_result = handle.close();
            let mut err = failure.into_error(target);
            match (&mut err, close_result) {
                (ConnectorError::Security { source, .. }, Err(close_err)) => {
                    *source = Some(close_err);
                }
                (_, Err(close_err)) => {
                    warn!(error = %close_err, "closing rejected inbound handle failed");
                }
                (_, Ok(())) => {}
            }
            debug!(%remote, code = err.code(), "inbound connection rejected");
            return Err(err);
        }

        debug!(%remote, %mode, "inbound tcp connection adopted");
        Ok(Self::from_handle(
            ctx,
            handle,
            remote.ip().to_string(),
            remote.port(),
            mode,
            want_timeouts,
        ))
    }

    fn from_handle(
        ctx: &ConnectorContext,
        handle: Arc<dyn NativeSocket>,
        host: String,
        port: u16,
        mode: AccessMode,
        want_timeouts: bool,
    ) -> Self {
        let config = ctx.config();
        let capacity = config.read_buffer_capacity;
        Self {
            shared: Arc::new(TcpShared {
                handle: RwLock::new(Some(handle)),
                host,
                port,
                mode,
                reader: Mutex::new(BytesMut::with_capacity(capacity)),
                staged: Mutex::new(BytesMut::with_capacity(capacity)),
                eof: AtomicBool::new(false),
                output_shutdown: Mutex::new(false),
                state: StateCell::new(ConnectionState::Open),
                read_timeout: config.read_timeout.filter(|_| want_timeouts),
                capacity,
                waiter: Arc::clone(ctx.waiter()),
            }),
        }
    }

    /// 阻塞读取；`Ok(None)` 表示流末尾。
    pub fn read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.shared.read(buf)
    }

    pub fn available(&self) -> Result<usize> {
        self.shared.available()
    }

    /// 单次写调用，可能只写入部分字节。
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.shared.write(buf)
    }

    pub fn shutdown_output(&self) -> Result<()> {
        self.shared.shutdown_output()
    }

    pub fn disconnect(&self) -> Result<()> {
        self.shared.disconnect()
    }

    /// 定位符中的主机，或入站连接的远端 IP。
    pub fn host(&self) -> &str {
        &self.shared.host
    }

    pub fn mode(&self) -> AccessMode {
        self.shared.mode
    }

    /// 是否已读到流末尾。
    pub fn is_eof(&self) -> bool {
        self.shared.eof.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TcpConnection").field(&self.shared).finish()
    }
}

impl StreamConnection for TcpConnection {
    type Input = TcpInputStream;
    type Output = TcpOutputStream;

    fn open_input_stream(&self) -> Result<TcpInputStream> {
        if !self.shared.mode.can_read() {
            return Err(ConnectorError::AccessMode {
                operation: error::OPEN_STREAM,
                mode: self.shared.mode,
            });
        }
        self.shared.handle(error::OPEN_STREAM)?;
        Ok(TcpInputStream::new(Arc::clone(&self.shared)))
    }

    fn open_output_stream(&self) -> Result<TcpOutputStream> {
        if !self.shared.mode.can_write() {
            return Err(ConnectorError::AccessMode {
                operation: error::OPEN_STREAM,
                mode: self.shared.mode,
            });
        }
        self.shared.handle(error::OPEN_STREAM)?;
        Ok(TcpOutputStream::new(Arc::clone(&self.shared)))
    }

    fn close(&self) -> Result<()> {
        self.shared.disconnect()
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }
}

impl SocketConnection for TcpConnection {
    fn set_socket_option(&self, option: SocketOption, value: i32) -> Result<()> {
        self.shared.set_option(option, value)
    }

    fn get_socket_option(&self, option: SocketOption) -> Result<i32> {
        self.shared.get_option(option)
    }

    fn local_address(&self) -> Result<String> {
        self.shared.endpoint(true).map(|addr| addr.ip().to_string())
    }

    fn local_port(&self) -> Result<u16> {
        self.shared.endpoint(true).map(|addr| addr.port())
    }

    fn address(&self) -> Result<String> {
        self.shared.endpoint(false).map(|addr| addr.ip().to_string())
    }

    fn port(&self) -> Result<u16> {
        self.shared.endpoint(false).map(|addr| addr.port())
    }
}
