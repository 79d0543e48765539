//! 原生套接字层边界。
//!
//! # 教案式说明
//! - **意图 (Why)**：字节级 connect/read/write/close 属于外部协作者；连接器只通过本模块的
//!   trait 与之交互，从而可以在测试中以脚本化实现替换真实套接字。
//! - **契约 (What)**：`NativeSocket::read` 是非阻塞原语，`Pending` 表示“暂无数据，
//!   既不是错误也不是流末尾”；所有方法以 `&self` 调用，实现需自行保证跨线程安全，
//!   使关闭线程能在读线程轮询期间使句柄失效。
//! - **风险 (Trade-offs)**：trait 对象带来一次虚调用，相比原生 I/O 的成本可以忽略。

use std::{
    fmt, io,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use crate::option::SocketOption;

/// 一次原生读的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NativeRead {
    /// 读到 `n` 个字节，`n > 0`。
    Data(usize),
    /// 暂无可读数据。
    Pending,
    /// 对端已结束发送。
    Eof,
}

/// 单个已连接的原生句柄。
pub trait NativeSocket: Send + Sync + fmt::Debug {
    fn read(&self, buf: &mut [u8]) -> io::Result<NativeRead>;

    /// 单次写调用，可能只写入部分字节，也可能在不可写时返回 0。
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// 不阻塞地查询已就绪的字节数。
    fn available(&self) -> io::Result<usize>;

    /// 冲刷并发送“发送结束”信号。
    fn shutdown_output(&self) -> io::Result<()>;

    /// 完全释放句柄。
    fn close(&self) -> io::Result<()>;

    fn set_option(&self, option: SocketOption, value: i32) -> io::Result<()>;

    fn get_option(&self, option: SocketOption) -> io::Result<i32>;

    /// `local = true` 返回本地端点，否则返回远端端点。
    fn endpoint(&self, local: bool) -> io::Result<SocketAddr>;
}

/// 已绑定的监听句柄。
pub trait NativeListener: Send + Sync + fmt::Debug {
    /// 阻塞直至一个入站连接就绪。
    fn accept(&self) -> io::Result<(Arc<dyn NativeSocket>, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn close(&self) -> io::Result<()>;
}

/// 创建原生句柄的能力。
pub trait NativeNetwork: Send + Sync + fmt::Debug {
    /// 将主机名解析为原生层接受的地址形式，优先 IPv4。
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        let candidates: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        candidates
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("`{host}` did not resolve to any address"),
                )
            })
    }

    fn connect(&self, addr: SocketAddr, timeout: Option<Duration>)
    -> io::Result<Arc<dyn NativeSocket>>;

    /// `port = 0` 时由系统分配端口。
    fn listen(&self, port: u16, backlog: i32) -> io::Result<Arc<dyn NativeListener>>;
}
