use std::{
    fmt,
    io::{self, Read, Write},
    mem,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use rustls::{ClientConfig, ClientConnection};
use rustls_pki_types::ServerName;
use spark_connector::{ConnectorError, OperationKind, Result};
use spark_connector_tcp::{TcpInputStream, TcpOutputStream};
use tracing::{debug, trace, warn};

use crate::{
    error::{self, map_stream_error, map_tls_error},
    info::SecurityInfo,
};

/// 单次从传输层读取密文的上限。
const CIPHERTEXT_CHUNK: usize = 4096;

/// 以 `rustls` 客户端状态机驱动的认证字节流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 原始传输流在会话建立后成为会话的私有成员，应用只能经由会话读写明文；
///   读与写分别持有各自的原始流，一方阻塞于套接字时另一方照常推进。
///
/// ## 逻辑（How）
/// - 状态机只在 `tls` 锁内短暂访问：读路径送入密文、写路径加密明文，随后把待发记录
///   按产生顺序追加到 `outbox`，释放 `tls` 后再写往原始输出；任何线程都不会在持有 `tls`
///   时阻塞于原始流；
/// - 持有 `output` 的线程独占发送权，每次取走 `outbox` 的全部前缀，因此记录顺序与产生顺序一致；
/// - 读路径只尝试获取 `output`：已有发送者时把记录留在 `outbox`，由该发送者释放 `output`
///   后复查并代为送出，读者因此不会等待一个被对端反压的写者。
///
/// ## 契约（What）
/// - `handshake`：阻塞直至握手完成；证书校验失败返回 `Certificate`，其他失败返回 `Io`；
/// - `read` 返回 0 表示对端关闭；`write` 返回已接受的明文字节数；
/// - `close`：幂等，发送 `close_notify` 后依次关闭原始输入、原始输出；之后的读写返回 `Closed`。
pub(crate) struct TlsSession {
    host: String,
    tls: Mutex<ClientConnection>,
    outbox: Mutex<Vec<u8>>,
    input: Mutex<TcpInputStream>,
    output: Mutex<TcpOutputStream>,
    closed: AtomicBool,
}

/// 待发记录的发送方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delivery {
    /// 等待 `output`，返回时记录已写出。
    Wait,
    /// `output` 被占用时交给当前持有者。
    Handoff,
}

impl TlsSession {
    /// 为 `host` 创建客户端状态机；尚未触碰任何流。
    pub(crate) fn client(config: Arc<ClientConfig>, host: &str) -> Result<ClientConnection> {
        let server_name = ServerName::try_from(host.to_owned()).map_err(|err| {
            ConnectorError::io(
                error::HANDSHAKE,
                io::Error::new(io::ErrorKind::InvalidInput, err),
            )
        })?;
        ClientConnection::new(config, server_name)
            .map_err(|err| map_tls_error(error::HANDSHAKE, host, err))
    }

    pub(crate) fn new(
        tls: ClientConnection,
        host: &str,
        input: TcpInputStream,
        output: TcpOutputStream,
    ) -> Self {
        Self {
            host: host.to_owned(),
            tls: Mutex::new(tls),
            outbox: Mutex::new(Vec::new()),
            input: Mutex::new(input),
            output: Mutex::new(output),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn handshake(&self) -> Result<()> {
        let mut input = self.input.lock();
        let mut chunk = [0_u8; CIPHERTEXT_CHUNK];
        loop {
            let handshaking = {
                let mut tls = self.tls.lock();
                self.stage(&mut tls, error::HANDSHAKE)?;
                tls.is_handshaking()
            };
            self.send_staged(error::HANDSHAKE, Delivery::Wait)?;
            if !handshaking {
                debug!(host = %self.host, "tls handshake complete");
                return Ok(());
            }
            let n = input
                .read(&mut chunk)
                .map_err(|err| map_stream_error(error::HANDSHAKE, &self.host, err))?;
            if n == 0 {
                return Err(ConnectorError::io(
                    error::HANDSHAKE,
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the connection during the tls handshake",
                    ),
                ));
            }
            self.feed(&chunk[..n], error::HANDSHAKE, Delivery::Wait)?;
        }
    }

    pub(crate) fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open(error::READ)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let mut input = self.input.lock();
        let mut chunk = [0_u8; CIPHERTEXT_CHUNK];
        loop {
            match self.tls.lock().reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(host = %self.host, "peer closed without close_notify");
                    return Ok(0);
                }
                Err(err) => return Err(map_stream_error(error::READ, &self.host, err)),
            }
            let n = input
                .read(&mut chunk)
                .map_err(|err| map_stream_error(error::READ, &self.host, err))?;
            trace!(host = %self.host, ciphertext = n, "tls records received");
            self.feed(&chunk[..n], error::READ, Delivery::Handoff)?;
        }
    }

    pub(crate) fn write(&self, buf: &[u8]) -> Result<usize> {
        self.ensure_open(error::WRITE)?;
        let accepted = {
            let mut tls = self.tls.lock();
            let accepted = tls
                .writer()
                .write(buf)
                .map_err(|err| map_stream_error(error::WRITE, &self.host, err))?;
            self.stage(&mut tls, error::WRITE)?;
            accepted
        };
        self.send_staged(error::WRITE, Delivery::Wait)?;
        Ok(accepted)
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.ensure_open(error::FLUSH)?;
        self.stage(&mut self.tls.lock(), error::FLUSH)?;
        self.send_staged(error::FLUSH, Delivery::Wait)?;
        self.output
            .lock()
            .flush()
            .map_err(|err| map_stream_error(error::FLUSH, &self.host, err))
    }

    /// 协商结果快照；仅在握手完成后有意义。
    pub(crate) fn security_info(&self) -> Result<SecurityInfo> {
        self.ensure_open(error::SECURITY_INFO)?;
        SecurityInfo::from_connection(&self.tls.lock(), &self.host)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 发送 `close_notify` 并关闭原始流；重复调用为空操作。
    pub(crate) fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let notify = {
            let mut tls = self.tls.lock();
            tls.send_close_notify();
            self.stage(&mut tls, error::SHUTDOWN)
        }
        .and_then(|()| self.send_staged(error::SHUTDOWN, Delivery::Handoff));
        let notify = match notify {
            Err(ConnectorError::Io { ref source, .. }) if peer_gone(source.kind()) => {
                debug!(host = %self.host, "peer already gone, close_notify dropped");
                Ok(())
            }
            other => other,
        };
        // 阻塞中的读者或写者持有原始流，由随后关闭的传输连接唤醒。
        if let Some(mut input) = self.input.try_lock() {
            input.close();
        }
        if let Some(mut output) = self.output.try_lock() {
            output.close();
        }
        debug!(host = %self.host, "tls session closed");
        notify
    }

    /// 失败清理路径上的关闭：错误只记录，不覆盖触发清理的原始错误。
    pub(crate) fn abandon(&self) {
        if let Err(err) = self.close() {
            warn!(host = %self.host, code = err.code(), error = %err, "closing failed tls session");
        }
    }

    fn ensure_open(&self, operation: OperationKind) -> Result<()> {
        if self.is_closed() {
            Err(ConnectorError::closed(operation))
        } else {
            Ok(())
        }
    }

    /// 把一段密文交给状态机并送出由此产生的记录；空切片表示原始输入已到达流末尾。
    fn feed(&self, mut ciphertext: &[u8], operation: OperationKind, delivery: Delivery) -> Result<()> {
        let absorbed = {
            let mut tls = self.tls.lock();
            self.absorb(&mut tls, &mut ciphertext, operation)
        };
        match absorbed {
            Ok(()) => self.send_staged(operation, delivery),
            Err(err) => {
                // 状态机已排队致命告警，尽力送达对端。
                if let Err(alert_err) = self.send_staged(operation, delivery) {
                    debug!(host = %self.host, error = %alert_err, "tls alert not delivered");
                }
                Err(err)
            }
        }
    }

    fn absorb(
        &self,
        tls: &mut ClientConnection,
        ciphertext: &mut &[u8],
        operation: OperationKind,
    ) -> Result<()> {
        if ciphertext.is_empty() {
            tls.read_tls(&mut io::empty())
                .map_err(|err| map_stream_error(operation, &self.host, err))?;
            return self.process(tls, operation);
        }
        while !ciphertext.is_empty() {
            tls.read_tls(&mut *ciphertext)
                .map_err(|err| map_stream_error(operation, &self.host, err))?;
            self.process(tls, operation)?;
        }
        Ok(())
    }

    fn process(&self, tls: &mut ClientConnection, operation: OperationKind) -> Result<()> {
        let processed = tls
            .process_new_packets()
            .map(|_| ())
            .map_err(|err| map_tls_error(operation, &self.host, err));
        match (processed, self.stage(tls, operation)) {
            (Ok(()), staged) => staged,
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(stage_err)) => {
                debug!(host = %self.host, error = %stage_err, "tls alert not staged");
                Err(err)
            }
        }
    }

    /// 在 `tls` 锁内把待发记录按序追加到 `outbox`，不触碰原始流。
    fn stage(&self, tls: &mut ClientConnection, operation: OperationKind) -> Result<()> {
        if !tls.wants_write() {
            return Ok(());
        }
        let mut outbox = self.outbox.lock();
        while tls.wants_write() {
            tls.write_tls(&mut *outbox)
                .map_err(|err| map_stream_error(operation, &self.host, err))?;
        }
        Ok(())
    }

    /// 把 `outbox` 写往原始输出。
    ///
    /// 释放 `output` 后复查 `outbox`：`Handoff` 方在持有者写出期间追加的记录由持有者补发。
    fn send_staged(&self, operation: OperationKind, delivery: Delivery) -> Result<()> {
        loop {
            let output = match delivery {
                Delivery::Wait => Some(self.output.lock()),
                Delivery::Handoff => self.output.try_lock(),
            };
            let Some(mut output) = output else {
                return Ok(());
            };
            let mut wrote = false;
            loop {
                let pending = mem::take(&mut *self.outbox.lock());
                if pending.is_empty() {
                    break;
                }
                output
                    .write_all(&pending)
                    .map_err(|err| map_stream_error(operation, &self.host, err))?;
                wrote = true;
            }
            if wrote {
                output
                    .flush()
                    .map_err(|err| map_stream_error(operation, &self.host, err))?;
            }
            drop(output);
            if self.outbox.lock().is_empty() {
                return Ok(());
            }
        }
    }
}

fn peer_gone(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

impl fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("host", &self.host)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
