use std::{
    io::{self, Read, Write},
    mem::MaybeUninit,
    net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use spark_connector::{NativeListener, NativeNetwork, NativeRead, NativeSocket, SocketOption};
use tracing::trace;

/// `available` 探测时窥视的最大字节数。
const AVAILABLE_PROBE: usize = 4096;

/// 基于 `socket2` 的原生网络实现。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 将操作系统套接字包装成连接器约定的非阻塞原语：读到 `WouldBlock` 时报告
///   [`NativeRead::Pending`]，由连接层决定何时让出、何时重试。
///
/// ## 逻辑 (How)
/// - 主动连接在阻塞模式下完成（可带超时），成功后切换为非阻塞；
/// - 监听套接字保持阻塞，`accept` 得到的套接字同样切换为非阻塞后交付；
/// - 句柄存放在 `RwLock<Option<Socket>>` 中，读写取读锁并发进行，`close` 取写锁
///   把套接字移出并析构，保证文件描述符只释放一次。
///
/// ## 注意事项 (Trade-offs)
/// - `available` 通过非阻塞 `peek` 估算，最多报告 `AVAILABLE_PROBE` 字节；
///   连接层还会再按读缓冲区容量截断。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemNetwork;

impl NativeNetwork for SystemNetwork {
    fn connect(
        &self,
        addr: SocketAddr,
        timeout: Option<Duration>,
    ) -> io::Result<Arc<dyn NativeSocket>> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        let target = SockAddr::from(addr);
        match timeout {
            Some(limit) => socket.connect_timeout(&target, limit)?,
            None => socket.connect(&target)?,
        }
        socket.set_nonblocking(true)?;
        let socket: Arc<dyn NativeSocket> = Arc::new(SystemSocket::new(socket));
        Ok(socket)
    }

    fn listen(&self, port: u16, backlog: i32) -> io::Result<Arc<dyn NativeListener>> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(backlog)?;
        let listener: Arc<dyn NativeListener> = Arc::new(SystemListener {
            socket,
            closed: AtomicBool::new(false),
        });
        Ok(listener)
    }
}

/// 已连接的操作系统套接字。
#[derive(Debug)]
pub struct SystemSocket {
    socket: RwLock<Option<Socket>>,
}

impl SystemSocket {
    fn new(socket: Socket) -> Self {
        Self {
            socket: RwLock::new(Some(socket)),
        }
    }

    fn with_socket<T>(&self, op: impl FnOnce(&Socket) -> io::Result<T>) -> io::Result<T> {
        let guard = self.socket.read();
        match guard.as_ref() {
            Some(socket) => op(socket),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket handle already released",
            )),
        }
    }
}

impl NativeSocket for SystemSocket {
    fn read(&self, buf: &mut [u8]) -> io::Result<NativeRead> {
        self.with_socket(|mut socket| match socket.read(buf) {
            Ok(0) if !buf.is_empty() => Ok(NativeRead::Eof),
            Ok(n) => Ok(NativeRead::Data(n)),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(NativeRead::Pending)
            }
            Err(err) => Err(err),
        })
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.with_socket(|mut socket| match socket.write(buf) {
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            other => other,
        })
    }

    fn available(&self) -> io::Result<usize> {
        self.with_socket(|socket| {
            let mut probe = vec![MaybeUninit::<u8>::new(0); AVAILABLE_PROBE];
            match socket.peek(&mut probe) {
                Ok(n) => Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(err) => Err(err),
            }
        })
    }

    fn shutdown_output(&self) -> io::Result<()> {
        self.with_socket(|socket| socket.shutdown(Shutdown::Write))
    }

    fn close(&self) -> io::Result<()> {
        // 析构即 close(2)。
        if let Some(socket) = self.socket.write().take() {
            trace!("releasing native socket");
            drop(socket);
        }
        Ok(())
    }

    fn set_option(&self, option: SocketOption, value: i32) -> io::Result<()> {
        self.with_socket(|socket| match option {
            SocketOption::Delay => socket.set_tcp_nodelay(value == 0),
            SocketOption::Linger => socket.set_linger(
                (value > 0).then(|| Duration::from_secs(u64::from(value.unsigned_abs()))),
            ),
            SocketOption::KeepAlive => socket.set_keepalive(value != 0),
            SocketOption::RcvBuf => socket.set_recv_buffer_size(value.unsigned_abs() as usize),
            SocketOption::SndBuf => socket.set_send_buffer_size(value.unsigned_abs() as usize),
        })
    }

    fn get_option(&self, option: SocketOption) -> io::Result<i32> {
        self.with_socket(|socket| {
            Ok(match option {
                SocketOption::Delay => i32::from(!socket.tcp_nodelay()?),
                SocketOption::Linger => socket
                    .linger()?
                    .map_or(0, |linger| saturate(linger.as_secs() as usize)),
                SocketOption::KeepAlive => i32::from(socket.keepalive()?),
                SocketOption::RcvBuf => saturate(socket.recv_buffer_size()?),
                SocketOption::SndBuf => saturate(socket.send_buffer_size()?),
            })
        })
    }

    fn endpoint(&self, local: bool) -> io::Result<SocketAddr> {
        self.with_socket(|socket| {
            let addr = if local {
                socket.local_addr()?
            } else {
                socket.peer_addr()?
            };
            addr.as_socket().ok_or_else(|| {
                io::Error::new(io::ErrorKind::Unsupported, "endpoint is not an IP address")
            })
        })
    }
}

fn saturate(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// 阻塞式监听套接字。
#[derive(Debug)]
pub struct SystemListener {
    socket: Socket,
    closed: AtomicBool,
}

impl NativeListener for SystemListener {
    fn accept(&self) -> io::Result<(Arc<dyn NativeSocket>, SocketAddr)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "listener already closed",
            ));
        }
        let (socket, remote) = self.socket.accept()?;
        socket.set_nonblocking(true)?;
        let remote = remote.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "peer is not an IP address")
        })?;
        let socket: Arc<dyn NativeSocket> = Arc::new(SystemSocket::new(socket));
        Ok((socket, remote))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()?.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "listener is not bound to an IP address")
        })
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // 唤醒阻塞在 accept 上的线程；描述符随监听器析构释放。
        match self.socket.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }
}
