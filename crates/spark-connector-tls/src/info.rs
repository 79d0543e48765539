use std::io;

use rustls::ClientConnection;
use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use spark_connector::{ConnectorError, Result};

use crate::error;

/// 已建立安全会话的协商结果与对端证书元数据。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 应用在握手完成后常需展示或审计对端身份：协议版本、密码套件、证书链与指纹；
///   把这些信息一次性拷贝成不可变快照，避免调用方持有会话内部的锁。
///
/// ## 契约 (What)
/// - `peer_certificates` 按对端发送顺序排列，第一张为终端实体证书；
/// - `fingerprint_sha256` 为终端实体证书 DER 的 SHA-256，小写十六进制；
/// - 仅在握手完成后可构造，否则返回 `Io`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityInfo {
    protocol: String,
    cipher_suite: String,
    server_name: String,
    peer_certificates: Vec<CertificateDer<'static>>,
    fingerprint_sha256: String,
}

impl SecurityInfo {
    pub(crate) fn from_connection(tls: &ClientConnection, server_name: &str) -> Result<Self> {
        let not_ready = |what: &'static str| {
            ConnectorError::io(
                error::SECURITY_INFO,
                io::Error::new(io::ErrorKind::NotConnected, what),
            )
        };
        if tls.is_handshaking() {
            return Err(not_ready("tls handshake has not completed"));
        }
        let protocol = tls
            .protocol_version()
            .ok_or_else(|| not_ready("no protocol version negotiated"))?;
        let suite = tls
            .negotiated_cipher_suite()
            .ok_or_else(|| not_ready("no cipher suite negotiated"))?;
        let chain: Vec<CertificateDer<'static>> = tls
            .peer_certificates()
            .map(|certs| certs.iter().map(|cert| cert.clone().into_owned()).collect())
            .unwrap_or_default();
        let leaf = chain
            .first()
            .ok_or_else(|| not_ready("peer presented no certificate"))?;
        let der: &[u8] = leaf.as_ref();
        let fingerprint_sha256 = hex::encode(Sha256::digest(der));

        Ok(Self {
            protocol: format!("{protocol:?}"),
            cipher_suite: format!("{:?}", suite.suite()),
            server_name: server_name.to_owned(),
            peer_certificates: chain,
            fingerprint_sha256,
        })
    }

    /// 协商的协议版本，例如 `TLSv1_3`。
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// 协商的密码套件，例如 `TLS13_AES_256_GCM_SHA384`。
    pub fn cipher_suite(&self) -> &str {
        &self.cipher_suite
    }

    /// 握手时用于 SNI 与证书名称校验的主机名。
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn peer_certificates(&self) -> &[CertificateDer<'static>] {
        &self.peer_certificates
    }

    pub fn fingerprint_sha256(&self) -> &str {
        &self.fingerprint_sha256
    }
}
