//! 基于脚本化原生层的安全连接打开/失败清理测试。

use std::{
    io,
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use rustls_pki_types::CertificateDer;
use spark_connector::{
    AccessMode, ConnectionState, ConnectorContext, ConnectorError, SocketConnection,
    StreamConnection,
    testing::{CountingWait, ReadStep, RecordingPermissions, ScriptedNetwork, ScriptedSocket, Verdict},
};
use spark_connector_tls::{SecureConnection, TrustStore};
use tracing_test::traced_test;

const DEVICE: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
const LOCATOR: &str = "ssl://device.test:443";

struct Harness {
    network: Arc<ScriptedNetwork>,
    permissions: Arc<RecordingPermissions>,
    trust: Arc<TrustStore>,
    ctx: ConnectorContext,
}

impl Harness {
    fn new() -> Self {
        Self::with(RecordingPermissions::allow_all(), trusted_roots())
    }

    fn with(permissions: RecordingPermissions, trust: TrustStore) -> Self {
        let network = ScriptedNetwork::new().with_host("device.test", DEVICE).into_arc();
        let permissions = Arc::new(permissions);
        let ctx = ConnectorContext::builder(network.clone())
            .permissions(permissions.clone())
            .waiter(Arc::new(CountingWait::new()))
            .build()
            .expect("valid context");
        Self {
            network,
            permissions,
            trust: Arc::new(trust),
            ctx,
        }
    }

    fn connection(&self) -> SecureConnection {
        SecureConnection::new(&self.ctx, Arc::clone(&self.trust))
    }
}

fn trusted_roots() -> TrustStore {
    let certified = rcgen::generate_simple_self_signed(vec!["device.test".to_string()])
        .expect("generate certificate");
    TrustStore::from_certificates([CertificateDer::from(certified.cert.der().to_vec())])
}

#[test]
fn denied_permission_prevents_any_io() {
    let harness = Harness::with(
        RecordingPermissions::new(Verdict::Deny("blocked by policy"), Verdict::Allow),
        trusted_roots(),
    );
    let conn = harness.connection();

    let err = conn
        .open(LOCATOR, AccessMode::ReadWrite, false)
        .expect_err("permission denied");
    assert!(matches!(err, ConnectorError::Security { ref target, .. } if target == "ssl://device.test:443"));
    assert_eq!(harness.permissions.connect_targets(), vec!["ssl://device.test:443"]);
    assert!(harness.network.connect_calls().is_empty());
    assert_eq!(harness.network.resolve_calls(), 0);
    assert!(!harness.trust.is_loaded());
    assert_eq!(conn.state(), ConnectionState::Failed);
}

#[test]
fn permission_target_ignores_scheme_case() {
    let harness = Harness::with(
        RecordingPermissions::new(Verdict::Deny("blocked by policy"), Verdict::Allow),
        trusted_roots(),
    );
    let err = harness
        .connection()
        .open("SSL://device.test:443", AccessMode::ReadWrite, false)
        .expect_err("permission denied");
    assert!(matches!(err, ConnectorError::Security { .. }));
    assert_eq!(harness.permissions.connect_targets(), vec!["ssl://device.test:443"]);
}

#[test]
fn interrupted_permission_check_is_typed() {
    let harness = Harness::with(
        RecordingPermissions::new(Verdict::Interrupt, Verdict::Allow),
        trusted_roots(),
    );
    let err = harness
        .connection()
        .open(LOCATOR, AccessMode::ReadWrite, false)
        .expect_err("interrupted");
    assert!(matches!(err, ConnectorError::Interrupted { .. }));
    assert!(harness.network.connect_calls().is_empty());
}

#[test]
fn malformed_locators_never_reach_the_network() {
    let harness = Harness::new();
    for locator in [
        "ssl://:443",
        "ssl://device.test",
        "ssl://device.test:443/path",
        "socket://device.test:443",
    ] {
        let err = harness
            .connection()
            .open(locator, AccessMode::ReadWrite, false)
            .expect_err("malformed locator");
        assert!(
            matches!(err, ConnectorError::Address { .. }),
            "{locator} should be an address error, got {err:?}"
        );
    }
    assert!(harness.network.connect_calls().is_empty());
}

#[test]
fn peer_closing_during_handshake_releases_every_layer() {
    let harness = Harness::new();
    let socket = ScriptedSocket::loopback(443)
        .with_reads([ReadStep::Eof])
        .into_arc();
    harness.network.push_socket(socket.clone());
    let conn = harness.connection();

    let err = conn
        .open(LOCATOR, AccessMode::ReadWrite, false)
        .expect_err("handshake cannot complete");
    assert!(matches!(err, ConnectorError::Io { ref source, .. } if source.kind() == io::ErrorKind::UnexpectedEof));

    // ClientHello 已经发出，随后传输连接被恰好释放一次。
    assert_eq!(socket.written().first(), Some(&0x16));
    assert_eq!(socket.close_calls(), 1);
    assert_eq!(socket.shutdown_calls(), 1);
    assert_eq!(conn.state(), ConnectionState::Failed);
    assert!(matches!(conn.address(), Err(ConnectorError::Closed { .. })));
    assert!(matches!(
        conn.security_info(),
        Err(ConnectorError::Io { ref source, .. }) if source.kind() == io::ErrorKind::UnexpectedEof
    ));

    conn.close().expect("close after failure is a no-op");
    assert_eq!(socket.close_calls(), 1);
}

#[test]
fn trust_load_failure_closes_the_opened_transport() {
    let harness = Harness::with(RecordingPermissions::allow_all(), TrustStore::from_certificates(Vec::new()));
    let socket = ScriptedSocket::loopback(443).into_arc();
    harness.network.push_socket(socket.clone());
    let conn = harness.connection();

    let err = conn
        .open(LOCATOR, AccessMode::ReadWrite, false)
        .expect_err("no trust anchors");
    assert_eq!(err.code(), "spark.connector.tls.trust_load_failed");
    assert!(socket.written().is_empty());
    assert_eq!(socket.read_calls(), 0);
    assert_eq!(socket.close_calls(), 1);
    assert!(matches!(conn.local_port(), Err(ConnectorError::Closed { .. })));
}

#[test]
fn connect_failure_leaves_nothing_to_release() {
    let harness = Harness::new();
    let conn = harness.connection();

    let err = conn
        .open(LOCATOR, AccessMode::ReadWrite, false)
        .expect_err("nothing queued to connect");
    assert!(matches!(err, ConnectorError::Io { ref source, .. } if source.kind() == io::ErrorKind::ConnectionRefused));
    assert_eq!(harness.network.connect_calls().len(), 1);
    assert!(!harness.trust.is_loaded());
}

#[test]
fn connection_opens_only_once() {
    let harness = Harness::new();
    let conn = harness.connection();
    conn.open(LOCATOR, AccessMode::ReadWrite, false)
        .expect_err("nothing queued to connect");

    let err = conn
        .open(LOCATOR, AccessMode::ReadWrite, false)
        .expect_err("already failed");
    assert!(matches!(err, ConnectorError::Closed { .. }));
    assert_eq!(harness.network.connect_calls().len(), 1);
}

#[test]
fn unopened_connection_reports_closed() {
    let harness = Harness::new();
    let conn = harness.connection();
    assert_eq!(conn.state(), ConnectionState::Unopened);
    assert!(matches!(conn.address(), Err(ConnectorError::Closed { .. })));
    assert!(matches!(conn.open_input_stream(), Err(ConnectorError::Closed { .. })));
    assert!(matches!(conn.security_info(), Err(ConnectorError::Closed { .. })));
}

#[test]
#[traced_test]
fn failed_open_is_logged_with_its_code() {
    let harness = Harness::new();
    harness
        .connection()
        .open(LOCATOR, AccessMode::ReadWrite, false)
        .expect_err("nothing queued to connect");
    assert!(logs_contain("secure connection open failed"));
    assert!(logs_contain("spark.connector.tcp.connect_failed"));
}
