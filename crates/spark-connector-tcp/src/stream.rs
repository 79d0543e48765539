use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
};

use spark_connector::{ConnectorError, Result};

use crate::{connection::TcpShared, error};

/// TCP 连接的输入流。
///
/// `Read::read` 返回 0 表示流末尾；并发关闭、超时等失败以承载 [`ConnectorError`] 的
/// `io::Error` 形式返回，可用 [`ConnectorError::from_io`] 还原。
pub struct TcpInputStream {
    shared: Arc<TcpShared>,
    closed: bool,
}

impl TcpInputStream {
    pub(crate) fn new(shared: Arc<TcpShared>) -> Self {
        Self {
            shared,
            closed: false,
        }
    }

    /// 不阻塞可读取的字节数。
    pub fn available(&self) -> Result<usize> {
        self.ensure_open(error::AVAILABLE)?;
        self.shared.available()
    }

    /// 关闭本流；连接本身保持打开。
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn ensure_open(&self, operation: spark_connector::OperationKind) -> Result<()> {
        if self.closed {
            Err(ConnectorError::closed(operation))
        } else {
            Ok(())
        }
    }
}

impl Read for TcpInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open(error::READ)?;
        Ok(self.shared.read(buf)?.unwrap_or(0))
    }
}

impl fmt::Debug for TcpInputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpInputStream")
            .field("closed", &self.closed)
            .field("connection", &self.shared)
            .finish()
    }
}

/// TCP 连接的输出流。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 连接层的 `write` 是单次原生调用，非阻塞套接字不可写时会写入 0 字节；
///   作为基础流，本类型负责在 0 字节时借助等待策略重试，使 `Write::write`
///   对非空缓冲区永远不返回 0（否则 `write_all` 会报告 `WriteZero`）。
///
/// ## 契约 (What)
/// - 部分写入直接返回实际字节数，由 `write_all` 等上层循环补齐；
/// - `flush` 无缓冲可冲刷，仅校验流与连接仍然可用。
pub struct TcpOutputStream {
    shared: Arc<TcpShared>,
    closed: bool,
}

impl TcpOutputStream {
    pub(crate) fn new(shared: Arc<TcpShared>) -> Self {
        Self {
            shared,
            closed: false,
        }
    }

    /// 关闭本流；连接本身保持打开。
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn ensure_open(&self, operation: spark_connector::OperationKind) -> Result<()> {
        if self.closed {
            Err(ConnectorError::closed(operation))
        } else {
            Ok(())
        }
    }
}

impl Write for TcpOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open(error::WRITE)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let mut attempt = 0_u32;
        loop {
            let written = self.shared.write(buf)?;
            if written > 0 {
                return Ok(written);
            }
            self.shared.waiter().wait(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open(error::FLUSH)?;
        self.shared.handle(error::FLUSH)?;
        Ok(())
    }
}

impl fmt::Debug for TcpOutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpOutputStream")
            .field("closed", &self.closed)
            .field("connection", &self.shared)
            .finish()
    }
}
