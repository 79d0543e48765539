use std::fmt;

use crate::error::{ConnectorError, Result};

/// 原生层无法给出选项值时返回的占位值。
pub const OPTION_UNAVAILABLE: i32 = -1;

/// 外部固定编码空间中的套接字选项。
///
/// # 教案式注释
/// - **意图 (Why)**：编码空间由应用层 API 固定，本层负责守门，
///   未识别的编码绝不能透传给原生层。
/// - **契约 (What)**：编码 `DELAY=0`、`LINGER=1`、`KEEPALIVE=2`、`RCVBUF=3`、`SNDBUF=4`；
///   取值为非负整数，`LINGER` 的 0 表示关闭 linger，`DELAY`/`KEEPALIVE` 以非零为开启。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketOption {
    /// 小包合并（Nagle）。值为 0 表示禁用 `TCP_NODELAY`。
    Delay,
    /// 关闭时的逗留秒数。
    Linger,
    KeepAlive,
    RcvBuf,
    SndBuf,
}

impl SocketOption {
    pub const ALL: [SocketOption; 5] = [
        SocketOption::Delay,
        SocketOption::Linger,
        SocketOption::KeepAlive,
        SocketOption::RcvBuf,
        SocketOption::SndBuf,
    ];

    pub const fn code(self) -> i32 {
        match self {
            Self::Delay => 0,
            Self::Linger => 1,
            Self::KeepAlive => 2,
            Self::RcvBuf => 3,
            Self::SndBuf => 4,
        }
    }

    /// 按外部编码查找选项。
    pub fn from_code(code: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|option| option.code() == code)
            .ok_or_else(|| {
                ConnectorError::invalid_argument(format!("unsupported socket option code {code}"))
            })
    }

    /// 校验待设置的取值。
    pub fn validate_value(self, value: i32) -> Result<()> {
        if value < 0 {
            return Err(ConnectorError::invalid_argument(format!(
                "{self} does not accept negative value {value}"
            )));
        }
        Ok(())
    }
}

impl TryFrom<i32> for SocketOption {
    type Error = ConnectorError;

    fn try_from(code: i32) -> Result<Self> {
        Self::from_code(code)
    }
}

impl fmt::Display for SocketOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delay => "DELAY",
            Self::Linger => "LINGER",
            Self::KeepAlive => "KEEPALIVE",
            Self::RcvBuf => "RCVBUF",
            Self::SndBuf => "SNDBUF",
        })
    }
}
