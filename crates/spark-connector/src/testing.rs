//! 脚本化的原生层与权限检查替身，仅在 `test-util` 特性下编译。
//!
//! # 教案式说明
//! - **意图（Why）**：连接器的核心难点（读重试、EOF 粘滞、并发关闭、失败清理）都依赖原生层的
//!   特定返回序列，用真实套接字很难稳定复现；脚本化替身让集成测试精确控制每一次原生调用的结果，
//!   并通过计数器断言“某个原语被调用了几次”。
//! - **契约（What）**：所有替身都是线程安全的，可在读线程与关闭线程之间共享。

use std::{
    collections::{HashMap, VecDeque},
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    native::{NativeListener, NativeNetwork, NativeRead, NativeSocket},
    option::{OPTION_UNAVAILABLE, SocketOption},
    security::{CheckFailure, PermissionChecker},
    wait::ReadinessWait,
};

/// 脚本中的一次原生读结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadStep {
    Data(Vec<u8>),
    Pending,
    Eof,
    Error(io::ErrorKind),
}

impl ReadStep {
    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Data(bytes.into())
    }
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicUsize,
    writes: AtomicUsize,
    shutdowns: AtomicUsize,
    closes: AtomicUsize,
    option_sets: AtomicUsize,
    option_gets: AtomicUsize,
}

/// 按脚本返回结果的原生套接字。
#[derive(Debug)]
pub struct ScriptedSocket {
    local: SocketAddr,
    remote: SocketAddr,
    reads: Mutex<VecDeque<ReadStep>>,
    pending_when_idle: bool,
    write_limits: Mutex<VecDeque<usize>>,
    written: Mutex<Vec<u8>>,
    options: Mutex<HashMap<SocketOption, i32>>,
    close_error: Option<io::ErrorKind>,
    closed: AtomicBool,
    counters: Counters,
}

impl ScriptedSocket {
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            local,
            remote,
            reads: Mutex::new(VecDeque::new()),
            pending_when_idle: false,
            write_limits: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            options: Mutex::new(HashMap::new()),
            close_error: None,
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// 以回环地址构造，远端端口为 `remote_port`。
    pub fn loopback(remote_port: u16) -> Self {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self::new(SocketAddr::new(ip, 50_000), SocketAddr::new(ip, remote_port))
    }

    pub fn with_reads(self, steps: impl IntoIterator<Item = ReadStep>) -> Self {
        self.reads.lock().extend(steps);
        self
    }

    /// 脚本耗尽后持续返回 `Pending`，而不是 `Eof`。
    pub fn pending_when_idle(mut self) -> Self {
        self.pending_when_idle = true;
        self
    }

    /// 依次限制每次写调用最多写入的字节数；耗尽后整块写入。
    pub fn with_write_limits(self, limits: impl IntoIterator<Item = usize>) -> Self {
        self.write_limits.lock().extend(limits);
        self
    }

    /// `close` 在释放句柄后仍报告给定错误。
    pub fn failing_close(mut self, kind: io::ErrorKind) -> Self {
        self.close_error = Some(kind);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn read_calls(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.counters.shutdowns.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// `set_option` 与 `get_option` 的调用总数。
    pub fn option_calls(&self) -> usize {
        self.counters.option_sets.load(Ordering::SeqCst)
            + self.counters.option_gets.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> io::Result<()> {
        if self.is_closed() {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "scripted socket already closed",
            ))
        } else {
            Ok(())
        }
    }
}

impl NativeSocket for ScriptedSocket {
    fn read(&self, buf: &mut [u8]) -> io::Result<NativeRead> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        self.ensure_live()?;
        let mut reads = self.reads.lock();
        let Some(step) = reads.pop_front() else {
            return Ok(if self.pending_when_idle {
                NativeRead::Pending
            } else {
                NativeRead::Eof
            });
        };
        match step {
            ReadStep::Data(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    reads.push_front(ReadStep::Data(bytes[n..].to_vec()));
                }
                Ok(NativeRead::Data(n))
            }
            ReadStep::Pending => Ok(NativeRead::Pending),
            ReadStep::Eof => Ok(NativeRead::Eof),
            ReadStep::Error(kind) => Err(io::Error::from(kind)),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        self.ensure_live()?;
        let limit = self.write_limits.lock().pop_front().unwrap_or(buf.len());
        let n = limit.min(buf.len());
        self.written.lock().extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn available(&self) -> io::Result<usize> {
        self.ensure_live()?;
        Ok(match self.reads.lock().front() {
            Some(ReadStep::Data(bytes)) => bytes.len(),
            _ => 0,
        })
    }

    fn shutdown_output(&self) -> io::Result<()> {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.ensure_live()
    }

    fn close(&self) -> io::Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        match self.close_error {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(()),
        }
    }

    fn set_option(&self, option: SocketOption, value: i32) -> io::Result<()> {
        self.counters.option_sets.fetch_add(1, Ordering::SeqCst);
        self.ensure_live()?;
        self.options.lock().insert(option, value);
        Ok(())
    }

    fn get_option(&self, option: SocketOption) -> io::Result<i32> {
        self.counters.option_gets.fetch_add(1, Ordering::SeqCst);
        self.ensure_live()?;
        Ok(self
            .options
            .lock()
            .get(&option)
            .copied()
            .unwrap_or(OPTION_UNAVAILABLE))
    }

    fn endpoint(&self, local: bool) -> io::Result<SocketAddr> {
        self.ensure_live()?;
        Ok(if local { self.local } else { self.remote })
    }
}

/// 交付预置入站连接的监听替身。
#[derive(Debug)]
pub struct ScriptedListener {
    local: SocketAddr,
    pending: Mutex<VecDeque<Arc<ScriptedSocket>>>,
    closes: AtomicUsize,
}

impl ScriptedListener {
    /// 排队一个将由 `accept` 交付的入站连接。
    pub fn push_incoming(&self, socket: Arc<ScriptedSocket>) {
        self.pending.lock().push_back(socket);
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl NativeListener for ScriptedListener {
    fn accept(&self) -> io::Result<(Arc<dyn NativeSocket>, SocketAddr)> {
        let socket = self.pending.lock().pop_front().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "no scripted inbound connection",
            )
        })?;
        let remote = socket.remote;
        let socket: Arc<dyn NativeSocket> = socket;
        Ok((socket, remote))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 按队列交付脚本化套接字的原生网络。
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    hosts: Mutex<HashMap<String, IpAddr>>,
    sockets: Mutex<VecDeque<Arc<ScriptedSocket>>>,
    connects: Mutex<Vec<(SocketAddr, Option<Duration>)>>,
    listeners: Mutex<Vec<Arc<ScriptedListener>>>,
    resolves: AtomicUsize,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册主机名到地址的映射。
    pub fn with_host(self, name: &str, ip: IpAddr) -> Self {
        self.hosts.lock().insert(name.to_owned(), ip);
        self
    }

    /// 排队一个将由下一次 `connect` 交付的套接字。
    pub fn push_socket(&self, socket: Arc<ScriptedSocket>) {
        self.sockets.lock().push_back(socket);
    }

    pub fn connect_calls(&self) -> Vec<(SocketAddr, Option<Duration>)> {
        self.connects.lock().clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn listeners(&self) -> Vec<Arc<ScriptedListener>> {
        self.listeners.lock().clone()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl NativeNetwork for ScriptedNetwork {
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let ip = match host.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => self.hosts.lock().get(host).copied().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("unknown host `{host}`"))
            })?,
        };
        Ok(SocketAddr::new(ip, port))
    }

    fn connect(
        &self,
        addr: SocketAddr,
        timeout: Option<Duration>,
    ) -> io::Result<Arc<dyn NativeSocket>> {
        self.connects.lock().push((addr, timeout));
        let socket = self.sockets.lock().pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "no scripted socket queued")
        })?;
        let socket: Arc<dyn NativeSocket> = socket;
        Ok(socket)
    }

    fn listen(&self, port: u16, _backlog: i32) -> io::Result<Arc<dyn NativeListener>> {
        let bound = if port == 0 { 49_152 } else { port };
        let listener = Arc::new(ScriptedListener {
            local: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), bound),
            pending: Mutex::new(VecDeque::new()),
            closes: AtomicUsize::new(0),
        });
        self.listeners.lock().push(Arc::clone(&listener));
        let listener: Arc<dyn NativeListener> = listener;
        Ok(listener)
    }
}

/// 权限检查的裁决。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(&'static str),
    Interrupt,
}

impl Verdict {
    fn apply(&self) -> Result<(), CheckFailure> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(CheckFailure::denied(*reason)),
            Self::Interrupt => Err(CheckFailure::Interrupted),
        }
    }
}

/// 记录每次检查目标并返回预设裁决的权限检查器。
#[derive(Debug)]
pub struct RecordingPermissions {
    connect: Verdict,
    accept: Verdict,
    connect_targets: Mutex<Vec<String>>,
    accept_targets: Mutex<Vec<String>>,
}

impl RecordingPermissions {
    pub fn new(connect: Verdict, accept: Verdict) -> Self {
        Self {
            connect,
            accept,
            connect_targets: Mutex::new(Vec::new()),
            accept_targets: Mutex::new(Vec::new()),
        }
    }

    pub fn allow_all() -> Self {
        Self::new(Verdict::Allow, Verdict::Allow)
    }

    pub fn connect_targets(&self) -> Vec<String> {
        self.connect_targets.lock().clone()
    }

    pub fn accept_targets(&self) -> Vec<String> {
        self.accept_targets.lock().clone()
    }
}

impl PermissionChecker for RecordingPermissions {
    fn check_connect(&self, target: &str) -> Result<(), CheckFailure> {
        self.connect_targets.lock().push(target.to_owned());
        self.connect.apply()
    }

    fn check_accept(&self, target: &str) -> Result<(), CheckFailure> {
        self.accept_targets.lock().push(target.to_owned());
        self.accept.apply()
    }
}

/// 统计等待次数的等待策略，每次等待只让出一次调度。
#[derive(Debug, Default)]
pub struct CountingWait {
    waits: AtomicU32,
}

impl CountingWait {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> u32 {
        self.waits.load(Ordering::SeqCst)
    }
}

impl ReadinessWait for CountingWait {
    fn wait(&self, _attempt: u32) {
        self.waits.fetch_add(1, Ordering::SeqCst);
        thread::yield_now();
    }
}
