//! TLS 连接错误映射。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 证书链校验失败与其他握手失败需要不同的处置：前者是 `Certificate`（安全事件，不应重试），
//!   后者按 `Io` 归类；本模块集中完成 `rustls::Error` 到 [`ConnectorError`] 的判定。
//!
//! ## 契约（What）
//! - `map_tls_error`：证书相关错误（含对端发来的证书类告警）映射为 `Certificate`，
//!   其余映射为携带操作码的 `Io`；
//! - `map_stream_error`：`io::Error` 可能嵌套 `rustls::Error` 或底层传输的 [`ConnectorError`]，
//!   两者都会被还原，而不是再包一层。

use std::io;

use rustls::{AlertDescription, Error as RustlsError};
use spark_connector::{ConnectorError, OperationKind};

pub(crate) const HANDSHAKE: OperationKind =
    OperationKind::new("spark.connector.tls.handshake_failed", "tls handshake");
pub(crate) const READ: OperationKind =
    OperationKind::new("spark.connector.tls.read_failed", "tls read");
pub(crate) const WRITE: OperationKind =
    OperationKind::new("spark.connector.tls.write_failed", "tls write");
pub(crate) const FLUSH: OperationKind =
    OperationKind::new("spark.connector.tls.flush_failed", "tls flush");
pub(crate) const SHUTDOWN: OperationKind =
    OperationKind::new("spark.connector.tls.shutdown_failed", "tls shutdown");
pub(crate) const TRUST_LOAD: OperationKind =
    OperationKind::new("spark.connector.tls.trust_load_failed", "tls trust store load");
pub(crate) const OPEN_STREAM: OperationKind =
    OperationKind::new("spark.connector.tls.open_stream_failed", "tls open stream");
pub(crate) const OPTION: OperationKind =
    OperationKind::new("spark.connector.tls.option_failed", "tls socket option");
pub(crate) const ADDRESS: OperationKind =
    OperationKind::new("spark.connector.tls.address_failed", "tls address query");
pub(crate) const SECURITY_INFO: OperationKind =
    OperationKind::new("spark.connector.tls.security_info_failed", "tls security info");

/// 将 `rustls` 错误映射为连接器错误。
pub(crate) fn map_tls_error(kind: OperationKind, host: &str, error: RustlsError) -> ConnectorError {
    if is_certificate_error(&error) {
        return ConnectorError::Certificate {
            host: host.to_owned(),
            reason: error.to_string(),
        };
    }
    ConnectorError::io(kind, io::Error::new(io::ErrorKind::InvalidData, error))
}

/// 将流读写中的 `io::Error` 映射为连接器错误。
pub(crate) fn map_stream_error(kind: OperationKind, host: &str, error: io::Error) -> ConnectorError {
    if error
        .get_ref()
        .is_some_and(|inner| inner.is::<RustlsError>())
    {
        if let Some(inner) = error.into_inner() {
            if let Ok(rustls_error) = inner.downcast::<RustlsError>() {
                return map_tls_error(kind, host, *rustls_error);
            }
        }
        return ConnectorError::io(kind, io::Error::other("tls error lost while unwrapping"));
    }
    ConnectorError::lift(kind, error)
}

fn is_certificate_error(error: &RustlsError) -> bool {
    match error {
        RustlsError::NoCertificatesPresented
        | RustlsError::InvalidCertificate(_)
        | RustlsError::InvalidCertRevocationList(_)
        | RustlsError::UnsupportedNameType => true,
        RustlsError::AlertReceived(alert) => is_certificate_alert(alert),
        _ => false,
    }
}

fn is_certificate_alert(alert: &AlertDescription) -> bool {
    matches!(
        alert,
        AlertDescription::BadCertificate
            | AlertDescription::UnsupportedCertificate
            | AlertDescription::CertificateRevoked
            | AlertDescription::CertificateExpired
            | AlertDescription::CertificateUnknown
            | AlertDescription::UnknownCA
            | AlertDescription::NoCertificate
            | AlertDescription::CertificateUnobtainable
            | AlertDescription::CertificateRequired
    )
}
