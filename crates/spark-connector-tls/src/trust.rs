use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use once_cell::sync::OnceCell;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{CertificateDer, pem::PemObject};
use spark_connector::{ConnectorConfig, ConnectorError, Result};
use tracing::{debug, info};

use crate::error;

type CertificateLoader = Box<dyn Fn() -> Result<Vec<CertificateDer<'static>>> + Send + Sync>;

enum TrustSource {
    Certificates(Vec<CertificateDer<'static>>),
    PemFile(PathBuf),
    Loader(CertificateLoader),
}

impl fmt::Debug for TrustSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Certificates(certs) => f.debug_tuple("Certificates").field(&certs.len()).finish(),
            Self::PemFile(path) => f.debug_tuple("PemFile").field(path).finish(),
            Self::Loader(_) => f.write_str("Loader"),
        }
    }
}

/// 证书信任库：首次建立安全会话前惰性加载一次，之后所有连接共享同一份客户端配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 受信根证书的读取与解析代价较高，且在进程内不会变化；把它建模为显式传入的能力对象，
///   既避免全局可变单例，又保证“首次使用前加载、之后不再重复加载”。
///
/// ## 契约（What）
/// - `client_config`：首次调用时加载根证书并构建 `rustls::ClientConfig`，并发调用者只会看到
///   一次加载；加载失败不缓存，下次调用会重试；
/// - 加载结果为空根集合时返回 `Io`（`spark.connector.tls.trust_load_failed`）；
/// - `load_count`：成功加载的次数，正常情况下至多为 1。
///
/// ## 实现（How）
/// - `OnceCell::get_or_try_init` 保证初始化闭包在竞争下只执行一次；
/// - 加密后端显式选择 `ring`，不依赖进程级默认 provider。
pub struct TrustStore {
    source: TrustSource,
    config: OnceCell<Arc<ClientConfig>>,
    loads: AtomicUsize,
}

impl TrustStore {
    /// 直接信任给定的 DER 证书。
    pub fn from_certificates(certs: impl IntoIterator<Item = CertificateDer<'static>>) -> Self {
        Self::with_source(TrustSource::Certificates(certs.into_iter().collect()))
    }

    /// 从 PEM 文件读取根证书。
    pub fn from_pem_file(path: impl Into<PathBuf>) -> Self {
        Self::with_source(TrustSource::PemFile(path.into()))
    }

    /// 由调用方提供的闭包在首次使用时产出根证书。
    pub fn from_loader<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Vec<CertificateDer<'static>>> + Send + Sync + 'static,
    {
        Self::with_source(TrustSource::Loader(Box::new(loader)))
    }

    /// 使用配置中的 `ca_file`；未配置时返回 `InvalidArgument`。
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        config
            .ca_file
            .as_ref()
            .map(|path| Self::from_pem_file(path.clone()))
            .ok_or_else(|| ConnectorError::invalid_argument("ca_file is required for tls trust"))
    }

    fn with_source(source: TrustSource) -> Self {
        Self {
            source,
            config: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// 取得共享的客户端配置，必要时先加载根证书。
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        self.config
            .get_or_try_init(|| self.load())
            .map(Arc::clone)
    }

    pub fn is_loaded(&self) -> bool {
        self.config.get().is_some()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Acquire)
    }

    fn load(&self) -> Result<Arc<ClientConfig>> {
        let certs = match &self.source {
            TrustSource::Certificates(certs) => certs.clone(),
            TrustSource::PemFile(path) => read_pem_file(path)?,
            TrustSource::Loader(loader) => loader()?,
        };

        let mut roots = RootCertStore::empty();
        for cert in certs {
            roots.add(cert).map_err(|err| {
                ConnectorError::io(
                    error::TRUST_LOAD,
                    io::Error::new(io::ErrorKind::InvalidData, err),
                )
            })?;
        }
        if roots.is_empty() {
            return Err(ConnectorError::io(
                error::TRUST_LOAD,
                io::Error::new(io::ErrorKind::InvalidData, "trust store holds no anchors"),
            ));
        }

        let anchors = roots.len();
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|err| {
            ConnectorError::io(
                error::TRUST_LOAD,
                io::Error::new(io::ErrorKind::Unsupported, err),
            )
        })?
        .with_root_certificates(roots)
        .with_no_client_auth();

        self.loads.fetch_add(1, Ordering::AcqRel);
        info!(anchors, source = ?self.source, "tls trust store loaded");
        Ok(Arc::new(config))
    }
}

fn read_pem_file(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    debug!(path = %path.display(), "reading tls trust anchors");
    let to_error = |err: rustls_pki_types::pem::Error| {
        ConnectorError::io(
            error::TRUST_LOAD,
            io::Error::new(io::ErrorKind::InvalidData, err),
        )
    };
    CertificateDer::pem_file_iter(path)
        .map_err(to_error)?
        .map(|cert| cert.map_err(to_error))
        .collect()
}

impl fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustStore")
            .field("source", &self.source)
            .field("loaded", &self.is_loaded())
            .field("loads", &self.load_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> CertificateDer<'static> {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("generate certificate");
        CertificateDer::from(certified.cert.der().to_vec())
    }

    #[test]
    fn loads_once_and_shares_config() {
        let store = TrustStore::from_certificates([self_signed()]);
        assert!(!store.is_loaded());

        let first = store.client_config().expect("load");
        let second = store.client_config().expect("cached");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn empty_trust_store_is_rejected_and_retried() {
        let store = TrustStore::from_certificates(Vec::new());
        let err = store.client_config().expect_err("no anchors");
        assert_eq!(err.code(), error::TRUST_LOAD.code);
        assert!(!store.is_loaded());
        assert_eq!(store.load_count(), 0);
    }

    #[test]
    fn loader_runs_only_on_first_use() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cert = self_signed();
        let store = TrustStore::from_loader(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![cert.clone()])
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        store.client_config().expect("load");
        store.client_config().expect("cached");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_pem_file_is_an_io_error() {
        let store = TrustStore::from_pem_file("/nonexistent/spark-connector/ca.pem");
        let err = store.client_config().expect_err("missing file");
        assert_eq!(err.code(), error::TRUST_LOAD.code);
    }

    #[test]
    fn pem_file_named_by_config_is_loaded() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("generate certificate");
        let path = std::env::temp_dir().join(format!(
            "spark-connector-tls-roots-{}.pem",
            std::process::id()
        ));
        std::fs::write(&path, certified.cert.pem()).expect("write pem");

        let store = TrustStore::from_config(&ConnectorConfig::default().with_ca_file(&path))
            .expect("ca file configured");
        let loaded = store.client_config();
        std::fs::remove_file(&path).expect("remove pem");
        loaded.expect("load pem");
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn config_without_ca_file_is_rejected() {
        let err = TrustStore::from_config(&ConnectorConfig::default()).expect_err("no ca file");
        assert!(matches!(err, ConnectorError::InvalidArgument { .. }));
    }
}
