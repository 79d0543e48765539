//! 真实回环套接字与 rustls 服务端之间的端到端验证。

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use rustls::{ServerConfig, ServerConnection, StreamOwned};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::{Digest, Sha256};
use spark_connector::{
    AccessMode, ConnectionState, ConnectorContext, ConnectorError, NativeListener, NativeNetwork,
    NativeRead, NativeSocket, SocketConnection, SocketOption, StreamConnection,
};
use spark_connector_tcp::SystemNetwork;
use spark_connector_tls::{SecureConnection, TrustStore, open};

struct Identity {
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
}

fn identity(host: &str) -> anyhow::Result<Identity> {
    let certified = rcgen::generate_simple_self_signed(vec![host.to_string()])?;
    Ok(Identity {
        cert: CertificateDer::from(certified.cert.der().to_vec()),
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der())),
    })
}

fn server_config(identity: Identity) -> anyhow::Result<Arc<ServerConfig>> {
    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(vec![identity.cert], identity.key)?;
    Ok(Arc::new(config))
}

/// 接受一个连接，读取 4 字节请求并回写 `pong`，随后发送 `close_notify`。
fn spawn_echo_server(config: Arc<ServerConfig>) -> anyhow::Result<(u16, JoinHandle<anyhow::Result<Vec<u8>>>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let handle = thread::spawn(move || -> anyhow::Result<Vec<u8>> {
        let (tcp, _) = listener.accept()?;
        tcp.set_read_timeout(Some(Duration::from_secs(10)))?;
        let mut stream = StreamOwned::new(ServerConnection::new(config)?, tcp);
        let mut request = vec![0_u8; 4];
        stream.read_exact(&mut request)?;
        stream.write_all(b"pong")?;
        stream.conn.send_close_notify();
        stream.flush()?;
        Ok(request)
    });
    Ok((port, handle))
}

/// 数据量足以填满双方套接字缓冲区。
const BULK: usize = 4 * 1024 * 1024;

/// 先写完 `BULK` 字节再开始读取，读满 `BULK` 字节后返回其中 `0xa5` 的个数。
fn spawn_bulk_server(config: Arc<ServerConfig>) -> anyhow::Result<(u16, JoinHandle<anyhow::Result<usize>>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let handle = thread::spawn(move || -> anyhow::Result<usize> {
        let (tcp, _) = listener.accept()?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;
        tcp.set_write_timeout(Some(Duration::from_secs(30)))?;
        let mut stream = StreamOwned::new(ServerConnection::new(config)?, tcp);
        stream.write_all(&vec![0x5a_u8; BULK])?;
        stream.flush()?;
        let mut received = vec![0_u8; BULK];
        stream.read_exact(&mut received)?;
        stream.conn.send_close_notify();
        stream.flush()?;
        Ok(received.iter().filter(|byte| **byte == 0xa5).count())
    });
    Ok((port, handle))
}

/// 统计关闭次数、并可让写入失败的原生层包装。
#[derive(Debug, Default)]
struct CountingNetwork {
    inner: SystemNetwork,
    closes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

#[derive(Debug)]
struct CountingSocket {
    inner: Arc<dyn NativeSocket>,
    closes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

impl NativeSocket for CountingSocket {
    fn read(&self, buf: &mut [u8]) -> io::Result<NativeRead> {
        self.inner.read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        self.inner.write(buf)
    }

    fn available(&self) -> io::Result<usize> {
        self.inner.available()
    }

    fn shutdown_output(&self) -> io::Result<()> {
        self.inner.shutdown_output()
    }

    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close()
    }

    fn set_option(&self, option: SocketOption, value: i32) -> io::Result<()> {
        self.inner.set_option(option, value)
    }

    fn get_option(&self, option: SocketOption) -> io::Result<i32> {
        self.inner.get_option(option)
    }

    fn endpoint(&self, local: bool) -> io::Result<SocketAddr> {
        self.inner.endpoint(local)
    }
}

impl NativeNetwork for CountingNetwork {
    fn connect(&self, addr: SocketAddr, timeout: Option<Duration>) -> io::Result<Arc<dyn NativeSocket>> {
        let socket: Arc<dyn NativeSocket> = Arc::new(CountingSocket {
            inner: self.inner.connect(addr, timeout)?,
            closes: Arc::clone(&self.closes),
            fail_writes: Arc::clone(&self.fail_writes),
        });
        Ok(socket)
    }

    fn listen(&self, port: u16, backlog: i32) -> io::Result<Arc<dyn NativeListener>> {
        self.inner.listen(port, backlog)
    }
}

#[test]
fn secure_exchange_over_loopback() -> anyhow::Result<()> {
    let server_identity = identity("localhost")?;
    let trusted = server_identity.cert.clone();
    let (port, server) = spawn_echo_server(server_config(server_identity)?)?;

    let ctx = ConnectorContext::builder(Arc::new(SystemNetwork)).build()?;
    let trust = Arc::new(TrustStore::from_certificates([trusted.clone()]));
    let conn = open(
        &ctx,
        Arc::clone(&trust),
        &format!("ssl://localhost:{port}"),
        AccessMode::ReadWrite,
        false,
    )?;
    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(conn.port()?, port);
    assert_eq!(conn.address()?, "127.0.0.1");
    conn.set_socket_option(SocketOption::Delay, 0)?;

    let mut output = conn.open_output_stream()?;
    output.write_all(b"ping")?;
    output.flush()?;

    let mut input = conn.open_input_stream()?;
    let mut response = Vec::new();
    input.read_to_end(&mut response)?;
    assert_eq!(response, b"pong");

    let request = server
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))??;
    assert_eq!(request, b"ping");

    let info = conn.security_info()?;
    assert_eq!(info.server_name(), "localhost");
    assert_eq!(info.protocol(), "TLSv1_3");
    assert!(info.cipher_suite().starts_with("TLS13_"));
    assert_eq!(info.peer_certificates(), &[trusted.clone()]);
    assert_eq!(info.fingerprint_sha256(), hex::encode(Sha256::digest(&*trusted)));

    conn.close()?;
    conn.close()?;
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(conn.address(), Err(ConnectorError::Closed { .. })));
    assert!(matches!(input.read(&mut [0_u8; 1]), Err(err) if err.kind() == io::ErrorKind::NotConnected));
    assert_eq!(trust.load_count(), 1);
    Ok(())
}

#[test]
fn untrusted_certificate_fails_after_streams_opened_and_releases_transport() -> anyhow::Result<()> {
    let (port, server) = spawn_echo_server(server_config(identity("localhost")?)?)?;
    let stranger = identity("localhost")?;

    let network = Arc::new(CountingNetwork::default());
    let ctx = ConnectorContext::builder(network.clone()).build()?;
    let conn = SecureConnection::new(&ctx, Arc::new(TrustStore::from_certificates([stranger.cert])));

    let err = conn
        .open(&format!("ssl://localhost:{port}"), AccessMode::ReadWrite, false)
        .expect_err("server certificate is not trusted");
    assert!(matches!(err, ConnectorError::Certificate { ref host, .. } if host == "localhost"));
    assert_eq!(conn.state(), ConnectionState::Failed);
    assert_eq!(network.closes.load(Ordering::SeqCst), 1);

    assert!(matches!(conn.address(), Err(ConnectorError::Closed { .. })));
    assert!(matches!(conn.security_info(), Err(ConnectorError::Certificate { .. })));

    // 服务端随即观察到握手失败。
    let outcome = server
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))?;
    assert!(outcome.is_err());

    drop(conn);
    assert_eq!(network.closes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn host_name_mismatch_is_a_certificate_error() -> anyhow::Result<()> {
    let server_identity = identity("elsewhere.test")?;
    let trusted = server_identity.cert.clone();
    let (port, server) = spawn_echo_server(server_config(server_identity)?)?;

    let ctx = ConnectorContext::builder(Arc::new(SystemNetwork)).build()?;
    let err = open(
        &ctx,
        Arc::new(TrustStore::from_certificates([trusted])),
        &format!("ssl://localhost:{port}"),
        AccessMode::ReadWrite,
        false,
    )
    .expect_err("certificate does not name localhost");
    assert!(matches!(err, ConnectorError::Certificate { .. }));

    let _ = server.join();
    Ok(())
}

#[test]
fn access_mode_limits_plaintext_streams() -> anyhow::Result<()> {
    let server_identity = identity("localhost")?;
    let trusted = server_identity.cert.clone();
    let (port, server) = spawn_echo_server(server_config(server_identity)?)?;

    let ctx = ConnectorContext::builder(Arc::new(SystemNetwork)).build()?;
    let conn = open(
        &ctx,
        Arc::new(TrustStore::from_certificates([trusted])),
        &format!("ssl://localhost:{port}"),
        AccessMode::Write,
        false,
    )?;
    assert!(matches!(conn.open_input_stream(), Err(ConnectorError::AccessMode { .. })));

    let mut output = conn.open_data_output_stream()?;
    output.write_all(b"ping")?;
    output.flush()?;
    let request = server
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))??;
    assert_eq!(request, b"ping");
    conn.close()?;
    Ok(())
}

#[test]
fn reader_and_writer_progress_independently() -> anyhow::Result<()> {
    let server_identity = identity("localhost")?;
    let trusted = server_identity.cert.clone();
    let (port, server) = spawn_bulk_server(server_config(server_identity)?)?;

    let ctx = ConnectorContext::builder(Arc::new(SystemNetwork)).build()?;
    let conn = open(
        &ctx,
        Arc::new(TrustStore::from_certificates([trusted])),
        &format!("ssl://localhost:{port}"),
        AccessMode::ReadWrite,
        false,
    )?;

    // 对端在读取之前先写满缓冲区，写线程因此会长时间阻塞在原始输出上。
    let mut output = conn.open_output_stream()?;
    let writer = thread::spawn(move || -> io::Result<()> {
        output.write_all(&vec![0xa5_u8; BULK])?;
        output.flush()
    });

    let mut input = conn.open_input_stream()?;
    let mut received = vec![0_u8; BULK];
    input.read_exact(&mut received)?;
    assert!(received.iter().all(|byte| *byte == 0x5a));

    writer
        .join()
        .map_err(|_| anyhow::anyhow!("writer thread panicked"))??;
    let echoed = server
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))??;
    assert_eq!(echoed, BULK);

    conn.close()?;
    Ok(())
}

#[test]
fn failed_close_notify_still_releases_the_transport() -> anyhow::Result<()> {
    let server_identity = identity("localhost")?;
    let trusted = server_identity.cert.clone();
    let (port, server) = spawn_echo_server(server_config(server_identity)?)?;

    let network = Arc::new(CountingNetwork::default());
    let ctx = ConnectorContext::builder(network.clone()).build()?;
    let conn = open(
        &ctx,
        Arc::new(TrustStore::from_certificates([trusted])),
        &format!("ssl://localhost:{port}"),
        AccessMode::ReadWrite,
        false,
    )?;

    network.fail_writes.store(true, Ordering::SeqCst);
    let err = conn.close().expect_err("close_notify cannot be written");
    assert!(matches!(
        err,
        ConnectorError::Io { ref source, .. } if source.kind() == io::ErrorKind::PermissionDenied
    ));
    assert_eq!(network.closes.load(Ordering::SeqCst), 1);
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(conn.address(), Err(ConnectorError::Closed { .. })));

    conn.close()?;
    drop(conn);
    assert_eq!(network.closes.load(Ordering::SeqCst), 1);

    // 传输关闭后服务端读到流末尾。
    let outcome = server
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))?;
    assert!(outcome.is_err());
    Ok(())
}
