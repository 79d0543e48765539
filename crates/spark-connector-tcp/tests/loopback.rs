//! 真实回环套接字上的端到端验证。

use std::{io::Read, sync::Arc, thread};

use spark_connector::{
    AccessMode, ConnectorContext, ConnectorError, SocketConnection, SocketOption, StreamConnection,
};
use spark_connector_tcp::{SystemNetwork, open};

fn context() -> ConnectorContext {
    ConnectorContext::builder(Arc::new(SystemNetwork))
        .build()
        .expect("default context")
}

#[test]
fn loopback_exchange_with_half_close() -> anyhow::Result<()> {
    let ctx = context();
    let server = open(&ctx, "socket://:0", AccessMode::ReadWrite, false)?
        .into_server()
        .ok_or_else(|| anyhow::anyhow!("expected listener"))?;
    let port = server.local_port()?;
    assert_ne!(port, 0);

    let peer = thread::spawn(move || -> anyhow::Result<String> {
        let conn = server.accept_and_open()?;
        let mut input = conn.open_data_input_stream()?;
        let request = input.read_utf()?;
        let mut output = conn.open_data_output_stream()?;
        output.write_utf("pong")?;
        conn.shutdown_output()?;
        conn.disconnect()?;
        server.close()?;
        Ok(request)
    });

    let client = open(
        &ctx,
        &format!("socket://127.0.0.1:{port}"),
        AccessMode::ReadWrite,
        false,
    )?
    .into_client()
    .ok_or_else(|| anyhow::anyhow!("expected client"))?;
    assert_eq!(client.address()?, "127.0.0.1");
    assert_eq!(client.port()?, port);
    assert_eq!(client.local_address()?, "127.0.0.1");

    client.open_data_output_stream()?.write_utf("ping")?;
    let mut input = client.open_data_input_stream()?;
    assert_eq!(input.read_utf()?, "pong");

    let mut rest = Vec::new();
    input.read_to_end(&mut rest)?;
    assert!(rest.is_empty());
    assert!(client.is_eof());

    let request = peer
        .join()
        .map_err(|_| anyhow::anyhow!("peer thread panicked"))??;
    assert_eq!(request, "ping");

    client.close()?;
    assert!(matches!(client.address(), Err(ConnectorError::Closed { .. })));
    Ok(())
}

#[test]
fn socket_options_reach_the_operating_system() -> anyhow::Result<()> {
    let ctx = context();
    let server = open(&ctx, "socket://:0", AccessMode::ReadWrite, false)?
        .into_server()
        .ok_or_else(|| anyhow::anyhow!("expected listener"))?;
    let port = server.local_port()?;
    let accepter = thread::spawn(move || server.accept_and_open().map(|conn| conn.close()));

    let client = open(
        &ctx,
        &format!("socket://localhost:{port}"),
        AccessMode::ReadWrite,
        false,
    )?
    .into_client()
    .ok_or_else(|| anyhow::anyhow!("expected client"))?;

    client.set_socket_option(SocketOption::Delay, 0)?;
    assert_eq!(client.get_socket_option(SocketOption::Delay)?, 0);
    client.set_socket_option(SocketOption::KeepAlive, 1)?;
    assert_eq!(client.get_socket_option(SocketOption::KeepAlive)?, 1);
    client.set_socket_option(SocketOption::Linger, 0)?;
    assert_eq!(client.get_socket_option(SocketOption::Linger)?, 0);
    assert!(client.get_socket_option(SocketOption::SndBuf)? > 0);

    accepter
        .join()
        .map_err(|_| anyhow::anyhow!("accept thread panicked"))???;
    client.close()?;
    Ok(())
}
