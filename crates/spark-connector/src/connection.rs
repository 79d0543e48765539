use std::{
    fmt,
    io::{Read, Write},
    sync::atomic::{AtomicU8, Ordering},
};

use crate::{
    data::{DataInput, DataOutput},
    error::Result,
    option::SocketOption,
};

/// 连接允许的数据方向。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    #[default]
    ReadWrite,
}

impl AccessMode {
    pub fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "read-write",
        })
    }
}

/// 连接生命周期状态。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - TCP 与 TLS 两种连接共享同一张状态图，调用方只需学习一次；
///   `Failed` 单独建模，让“打开中途失败”与“正常关闭”在排障时可区分。
///
/// ## 契约 (What)
/// - 合法迁移：`Unopened -> Opening -> Open -> OutputShutdown -> Closed`，
///   以及 `Opening -> Failed`、`Open/OutputShutdown -> Closed`；
/// - `Closed` 与 `Failed` 为终态，对终态再次 `close()` 为空操作。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Unopened = 0,
    Opening = 1,
    Open = 2,
    OutputShutdown = 3,
    Closed = 4,
    Failed = 5,
}

impl ConnectionState {
    /// 是否仍可执行读写与查询。
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Open | Self::OutputShutdown)
    }

    /// 是否已进入终态。
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Unopened,
            1 => Self::Opening,
            2 => Self::Open,
            3 => Self::OutputShutdown,
            4 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

/// 以原子字节保存 [`ConnectionState`]，供读线程与关闭线程无锁观察。
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(initial: ConnectionState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// 仅当当前状态等于 `from` 时迁移到 `to`，返回是否迁移成功。
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 进入终态并返回先前状态；已处于终态时保持不变。
    pub fn terminate(&self, terminal: ConnectionState) -> ConnectionState {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let state = ConnectionState::from_u8(current);
            if state.is_terminal() {
                return state;
            }
            match self.0.compare_exchange_weak(
                current,
                terminal as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return state,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ConnectionState::Unopened)
    }
}

/// 字节流连接的公共能力。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 应用代码只面对“可打开、可关闭、能产出输入/输出流”的连接；
///   TCP 与 TLS 通过实现同一 trait 做到可互换，TLS 以组合方式持有 TCP 实例。
///
/// ## 契约（What）
/// - `open_input_stream`/`open_output_stream`：返回独立的流对象，流持有连接内部状态的共享引用，
///   因而可以移动到其他线程；访问模式不允许时返回 `AccessMode` 错误；
/// - `close`：幂等，第二次调用不会重复释放底层句柄；
/// - `open_data_*`：默认实现以大端数据适配器包装基础流。
pub trait StreamConnection: Send + Sync {
    type Input: Read + Send + 'static;
    type Output: Write + Send + 'static;

    fn open_input_stream(&self) -> Result<Self::Input>;

    fn open_output_stream(&self) -> Result<Self::Output>;

    fn open_data_input_stream(&self) -> Result<DataInput<Self::Input>> {
        self.open_input_stream().map(DataInput::new)
    }

    fn open_data_output_stream(&self) -> Result<DataOutput<Self::Output>> {
        self.open_output_stream().map(DataOutput::new)
    }

    fn close(&self) -> Result<()>;

    fn state(&self) -> ConnectionState;
}

/// 在字节流能力之上追加端点查询与套接字调优。
pub trait SocketConnection: StreamConnection {
    fn set_socket_option(&self, option: SocketOption, value: i32) -> Result<()>;

    /// 返回选项当前值；原生层无法给出时返回 [`crate::OPTION_UNAVAILABLE`]。
    fn get_socket_option(&self, option: SocketOption) -> Result<i32>;

    fn local_address(&self) -> Result<String>;

    fn local_port(&self) -> Result<u16>;

    fn address(&self) -> Result<String>;

    fn port(&self) -> Result<u16>;

    /// 以外部整数编码设置选项，未知编码在触达原生层之前被拒绝。
    fn set_socket_option_code(&self, code: i32, value: i32) -> Result<()> {
        self.set_socket_option(SocketOption::from_code(code)?, value)
    }

    fn get_socket_option_code(&self, code: i32) -> Result<i32> {
        self.get_socket_option(SocketOption::from_code(code)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_is_sticky() {
        let cell = StateCell::new(ConnectionState::Open);
        assert_eq!(cell.terminate(ConnectionState::Closed), ConnectionState::Open);
        assert_eq!(cell.terminate(ConnectionState::Failed), ConnectionState::Closed);
        assert_eq!(cell.load(), ConnectionState::Closed);
    }

    #[test]
    fn transition_requires_expected_state() {
        let cell = StateCell::default();
        assert!(!cell.transition(ConnectionState::Open, ConnectionState::Closed));
        assert!(cell.transition(ConnectionState::Unopened, ConnectionState::Opening));
        assert_eq!(cell.load(), ConnectionState::Opening);
    }

    #[test]
    fn access_mode_directions() {
        assert!(AccessMode::Read.can_read() && !AccessMode::Read.can_write());
        assert!(AccessMode::Write.can_write() && !AccessMode::Write.can_read());
        assert!(AccessMode::ReadWrite.can_read() && AccessMode::ReadWrite.can_write());
    }
}
