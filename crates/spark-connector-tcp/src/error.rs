use std::io;

use spark_connector::{ConnectorError, OperationKind};

pub(crate) const RESOLVE: OperationKind =
    OperationKind::new("spark.connector.tcp.resolve_failed", "tcp resolve");
pub(crate) const CONNECT: OperationKind =
    OperationKind::new("spark.connector.tcp.connect_failed", "tcp connect");
pub(crate) const ADOPT: OperationKind =
    OperationKind::new("spark.connector.tcp.adopt_failed", "tcp adopt");
pub(crate) const READ: OperationKind =
    OperationKind::new("spark.connector.tcp.read_failed", "tcp read");
pub(crate) const WRITE: OperationKind =
    OperationKind::new("spark.connector.tcp.write_failed", "tcp write");
pub(crate) const FLUSH: OperationKind =
    OperationKind::new("spark.connector.tcp.flush_failed", "tcp flush");
pub(crate) const AVAILABLE: OperationKind =
    OperationKind::new("spark.connector.tcp.available_failed", "tcp available");
pub(crate) const SHUTDOWN: OperationKind =
    OperationKind::new("spark.connector.tcp.shutdown_failed", "tcp shutdown");
pub(crate) const CLOSE: OperationKind =
    OperationKind::new("spark.connector.tcp.close_failed", "tcp close");
pub(crate) const OPTION: OperationKind =
    OperationKind::new("spark.connector.tcp.option_failed", "tcp socket option");
pub(crate) const ADDRESS: OperationKind =
    OperationKind::new("spark.connector.tcp.address_failed", "tcp address query");
pub(crate) const OPEN_STREAM: OperationKind =
    OperationKind::new("spark.connector.tcp.open_stream_failed", "tcp open stream");
pub(crate) const LISTEN: OperationKind =
    OperationKind::new("spark.connector.tcp.listen_failed", "tcp listen");
pub(crate) const ACCEPT: OperationKind =
    OperationKind::new("spark.connector.tcp.accept_failed", "tcp accept");

/// 将原生 I/O 错误归入指定操作。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> ConnectorError {
    ConnectorError::io(kind, error)
}
