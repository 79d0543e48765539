use std::{fmt, io, sync::Arc};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use spark_connector::{
    AccessMode, ConnectionState, ConnectorContext, ConnectorError, Locator, OperationKind,
    ReleaseGuard, Result, SocketConnection, SocketOption, StateCell, StreamConnection,
};
use spark_connector_tcp::{TcpConnection, TcpInputStream, TcpOutputStream};
use tracing::{debug, info, warn};

use crate::{
    SCHEME,
    error,
    info::SecurityInfo,
    session::TlsSession,
    stream::{SecureInputStream, SecureOutputStream},
    trust::TrustStore,
};

/// 打开成功后独占持有的两层资源。
struct Established {
    transport: TcpConnection,
    session: Arc<TlsSession>,
    mode: AccessMode,
}

/// 打开失败的摘要，供之后的 `security_info` 报告。
#[derive(Clone, Debug)]
enum OpenFailure {
    Certificate { host: String, reason: String },
    Io { kind: io::ErrorKind, message: String },
}

impl OpenFailure {
    fn record(err: &ConnectorError) -> Self {
        match err {
            ConnectorError::Certificate { host, reason } => Self::Certificate {
                host: host.clone(),
                reason: reason.clone(),
            },
            ConnectorError::Io { source, .. } => Self::Io {
                kind: source.kind(),
                message: err.to_string(),
            },
            other => Self::Io {
                kind: io::ErrorKind::Other,
                message: other.to_string(),
            },
        }
    }

    fn to_error(&self) -> ConnectorError {
        match self {
            Self::Certificate { host, reason } => ConnectorError::Certificate {
                host: host.clone(),
                reason: reason.clone(),
            },
            Self::Io { kind, message } => {
                ConnectorError::io(error::SECURITY_INFO, io::Error::new(*kind, message.clone()))
            }
        }
    }
}

/// `ssl://host:port` 安全连接：在独占的 TCP 传输连接之上叠加经认证的字节流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 安全连接以组合方式持有 [`TcpConnection`]，端点与选项查询委托给它，
///   读写则只经过 TLS 会话，原始流成为会话的私有成员；
/// - 打开失败后对象依然存在：调用方可以观察到 `Failed` 状态、通过 `security_info`
///   取回失败分类，而任何端点查询都返回 `Closed`，证明没有残留的半开资源。
///
/// ## 逻辑（How）
/// 1. 任何 I/O 之前先以 `ssl:` + 定位符做权限检查；
/// 2. 解析定位符（主机与端口必填），以读写模式打开传输连接；
/// 3. 依次打开原始输出流、原始输入流、加载信任库、构造并完成会话握手；
///    每获取一项资源即登记一个 [`ReleaseGuard`]，任一步失败时按获取的逆序释放，
///    每一层只释放自己已经拿到的资源。
///
/// ## 契约（What）
/// - `open` 只能调用一次；成功后状态为 `Open`，失败后为 `Failed`；
/// - `close` 先关会话再关传输，会话关闭失败不会阻止传输释放，返回遇到的第一个错误；
/// - `security_info`：握手完成后可用；打开失败时，证书校验失败报告 `Certificate`，
///   其余失败报告 `Io`；从未打开或已关闭时报告 `Closed`。
///
/// ## 注意事项（Trade-offs）
/// - 访问模式只约束应用可见的明文流；TLS 本身总需要双向原始流，因此传输层始终以读写模式打开。
pub struct SecureConnection {
    ctx: ConnectorContext,
    trust: Arc<TrustStore>,
    state: StateCell,
    established: RwLock<Option<Established>>,
    failure: Mutex<Option<OpenFailure>>,
    info: OnceCell<SecurityInfo>,
}

impl SecureConnection {
    pub fn new(ctx: &ConnectorContext, trust: Arc<TrustStore>) -> Self {
        Self {
            ctx: ctx.clone(),
            trust,
            state: StateCell::default(),
            established: RwLock::new(None),
            failure: Mutex::new(None),
            info: OnceCell::new(),
        }
    }

    /// 建立到 `ssl://host:port` 的安全连接。
    pub fn open(&self, locator: &str, mode: AccessMode, want_timeouts: bool) -> Result<()> {
        if !self
            .state
            .transition(ConnectionState::Unopened, ConnectionState::Opening)
        {
            return Err(if self.state.load().is_terminal() {
                ConnectorError::closed(error::HANDSHAKE)
            } else {
                ConnectorError::invalid_argument("secure connection is already opened")
            });
        }

        match self.establish(locator, mode, want_timeouts) {
            Ok(established) => {
                let host = established.transport.host().to_owned();
                *self.established.write() = Some(established);
                if self
                    .state
                    .transition(ConnectionState::Opening, ConnectionState::Open)
                {
                    info!(%host, %mode, "secure connection established");
                    return Ok(());
                }
                // 打开期间被并发关闭。
                if let Some(established) = self.established.write().take() {
                    established.session.abandon();
                    if let Err(err) = established.transport.disconnect() {
                        warn!(code = err.code(), error = %err, "releasing raced secure connection failed");
                    }
                }
                Err(ConnectorError::stream_closed(error::HANDSHAKE))
            }
            Err(err) => {
                *self.failure.lock() = Some(OpenFailure::record(&err));
                self.state.terminate(ConnectionState::Failed);
                debug!(locator, code = err.code(), error = %err, "secure connection open failed");
                Err(err)
            }
        }
    }

    fn establish(&self, locator: &str, mode: AccessMode, want_timeouts: bool) -> Result<Established> {
        let target = format!(
            "{SCHEME}:{}",
            locator
                .split_once(':')
                .filter(|(scheme, _)| scheme.eq_ignore_ascii_case(SCHEME))
                .map_or(locator, |(_, rest)| rest)
        );
        self.ctx
            .permissions()
            .check_connect(&target)
            .map_err(|failure| failure.into_error(target.clone()))?;

        let parsed = Locator::parse(locator)?;
        parsed.expect_scheme(SCHEME)?;
        let host = parsed
            .host()
            .ok_or_else(|| ConnectorError::address(locator, "secure connections require a host"))?;
        let port = parsed
            .port()
            .ok_or_else(|| ConnectorError::address(locator, "missing port"))?;

        let transport = ReleaseGuard::new(
            TcpConnection::connect(&self.ctx, host, port, AccessMode::ReadWrite, want_timeouts)?,
            |transport: TcpConnection| {
                if let Err(err) = transport.disconnect() {
                    warn!(code = err.code(), error = %err, "releasing transport after failed open");
                }
            },
        );
        let output = ReleaseGuard::new(
            transport.open_output_stream()?,
            |mut output: TcpOutputStream| output.close(),
        );
        let input = ReleaseGuard::new(
            transport.open_input_stream()?,
            |mut input: TcpInputStream| input.close(),
        );

        let config = self.trust.client_config()?;
        let tls = TlsSession::client(config, host)?;
        let session = ReleaseGuard::new(
            Arc::new(TlsSession::new(tls, host, input.disarm(), output.disarm())),
            |session: Arc<TlsSession>| session.abandon(),
        );
        session.handshake()?;

        let session = session.disarm();
        Ok(Established {
            transport: transport.disarm(),
            session,
            mode,
        })
    }

    /// 已验证的会话元数据。
    pub fn security_info(&self) -> Result<SecurityInfo> {
        match self.state.load() {
            ConnectionState::Failed => Err(self
                .failure
                .lock()
                .as_ref()
                .map(OpenFailure::to_error)
                .unwrap_or_else(|| ConnectorError::closed(error::SECURITY_INFO))),
            _ => self.with_established(error::SECURITY_INFO, |established| {
                self.info
                    .get_or_try_init(|| established.session.security_info())
                    .cloned()
            }),
        }
    }

    /// 关闭会话，随后无条件关闭传输连接；重复调用为空操作。
    pub fn close(&self) -> Result<()> {
        self.state.terminate(ConnectionState::Closed);
        let Some(established) = self.established.write().take() else {
            return Ok(());
        };
        let session = established.session.close();
        if let Err(err) = &session {
            warn!(code = err.code(), error = %err, "tls session close failed, closing transport anyway");
        }
        let transport = established.transport.disconnect();
        debug!(host = established.transport.host(), "secure connection closed");
        session.and(transport)
    }

    fn with_established<T>(
        &self,
        operation: OperationKind,
        f: impl FnOnce(&Established) -> Result<T>,
    ) -> Result<T> {
        if !self.state.load().is_usable() {
            return Err(ConnectorError::closed(operation));
        }
        let guard = self.established.read();
        let established = guard
            .as_ref()
            .ok_or_else(|| ConnectorError::closed(operation))?;
        f(established)
    }
}

impl StreamConnection for SecureConnection {
    type Input = SecureInputStream;
    type Output = SecureOutputStream;

    fn open_input_stream(&self) -> Result<SecureInputStream> {
        self.with_established(error::OPEN_STREAM, |established| {
            if !established.mode.can_read() {
                return Err(ConnectorError::AccessMode {
                    operation: error::OPEN_STREAM,
                    mode: established.mode,
                });
            }
            Ok(SecureInputStream::new(Arc::clone(&established.session)))
        })
    }

    fn open_output_stream(&self) -> Result<SecureOutputStream> {
        self.with_established(error::OPEN_STREAM, |established| {
            if !established.mode.can_write() {
                return Err(ConnectorError::AccessMode {
                    operation: error::OPEN_STREAM,
                    mode: established.mode,
                });
            }
            Ok(SecureOutputStream::new(Arc::clone(&established.session)))
        })
    }

    fn close(&self) -> Result<()> {
        SecureConnection::close(self)
    }

    fn state(&self) -> ConnectionState {
        self.state.load()
    }
}

impl SocketConnection for SecureConnection {
    fn set_socket_option(&self, option: SocketOption, value: i32) -> Result<()> {
        self.with_established(error::OPTION, |established| {
            established.transport.set_socket_option(option, value)
        })
    }

    fn get_socket_option(&self, option: SocketOption) -> Result<i32> {
        self.with_established(error::OPTION, |established| {
            established.transport.get_socket_option(option)
        })
    }

    fn local_address(&self) -> Result<String> {
        self.with_established(error::ADDRESS, |established| {
            established.transport.local_address()
        })
    }

    fn local_port(&self) -> Result<u16> {
        self.with_established(error::ADDRESS, |established| established.transport.local_port())
    }

    fn address(&self) -> Result<String> {
        self.with_established(error::ADDRESS, |established| established.transport.address())
    }

    fn port(&self) -> Result<u16> {
        self.with_established(error::ADDRESS, |established| established.transport.port())
    }
}

impl Drop for SecureConnection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(code = err.code(), error = %err, "secure connection close on drop failed");
        }
    }
}

impl fmt::Debug for SecureConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureConnection")
            .field("state", &self.state.load())
            .field("trust", &self.trust)
            .finish_non_exhaustive()
    }
}
