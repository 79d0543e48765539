use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
};

use spark_connector::{ConnectorError, OperationKind, Result};

use crate::{error, session::TlsSession};

/// 安全连接的明文输入流，读取经由会话解密。
pub struct SecureInputStream {
    session: Arc<TlsSession>,
    closed: bool,
}

impl SecureInputStream {
    pub(crate) fn new(session: Arc<TlsSession>) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    /// 关闭本流；会话与连接保持打开。
    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl Read for SecureInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ensure_open(self.closed, error::READ)?;
        Ok(self.session.read(buf)?)
    }
}

impl fmt::Debug for SecureInputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureInputStream")
            .field("closed", &self.closed)
            .field("session", &self.session)
            .finish()
    }
}

/// 安全连接的明文输出流。
///
/// `write` 返回会话接受的明文字节数，对应的 TLS 记录在返回前已交给传输层。
pub struct SecureOutputStream {
    session: Arc<TlsSession>,
    closed: bool,
}

impl SecureOutputStream {
    pub(crate) fn new(session: Arc<TlsSession>) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl Write for SecureOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ensure_open(self.closed, error::WRITE)?;
        Ok(self.session.write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        ensure_open(self.closed, error::FLUSH)?;
        Ok(self.session.flush()?)
    }
}

impl fmt::Debug for SecureOutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureOutputStream")
            .field("closed", &self.closed)
            .field("session", &self.session)
            .finish()
    }
}

fn ensure_open(closed: bool, operation: OperationKind) -> Result<()> {
    if closed {
        Err(ConnectorError::closed(operation))
    } else {
        Ok(())
    }
}
