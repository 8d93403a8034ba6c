//! Test harness: a scripted game server speaking the client's wire format.
//!
//! Tests drive both ends explicitly. The server side accepts connections,
//! reads what the client sent and pushes whatever messages the scenario
//! needs.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::{Duration, Instant},
};

use anyhow::Context;
use arena_client::GameClient;
use arena_shared::{
    config::ClientConfig,
    net::{read_frame, write_frame},
    protocol::Envelope,
};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// Upper bound on any single wait in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ScriptedServer {
    listener: TcpListener,
}

/// Binds to an ephemeral localhost port and returns a client config that
/// points at it, with a short retry backoff.
pub async fn bind_ephemeral() -> anyhow::Result<(ScriptedServer, ClientConfig)> {
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .context("bind scripted server")?;
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Scripted server listening");

    let cfg = ClientConfig {
        server_addr: addr.to_string(),
        retry_backoff_ms: 100,
        ..ClientConfig::default()
    };
    Ok((ScriptedServer { listener }, cfg))
}

impl ScriptedServer {
    /// Waits for the next client connection.
    pub async fn accept_one(&self) -> anyhow::Result<ServerConn> {
        let (stream, peer) = tokio::time::timeout(TEST_TIMEOUT, self.listener.accept())
            .await
            .context("accept timed out")??;
        info!(peer = %peer, "Scripted server accepted");
        Ok(ServerConn { stream })
    }
}

/// Server end of one accepted connection. Dropping it closes the socket.
pub struct ServerConn {
    stream: TcpStream,
}

impl ServerConn {
    pub async fn send(&mut self, kind: &str, payload: Value) -> anyhow::Result<()> {
        write_frame(&mut self.stream, &Envelope::new(kind, payload)).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<Envelope> {
        tokio::time::timeout(TEST_TIMEOUT, read_frame(&mut self.stream))
            .await
            .context("recv timed out")?
    }

    /// Reads `n` envelopes and returns their type strings.
    pub async fn recv_kinds(&mut self, n: usize) -> anyhow::Result<Vec<String>> {
        let mut kinds = Vec::with_capacity(n);
        for _ in 0..n {
            kinds.push(self.recv().await?.kind);
        }
        Ok(kinds)
    }
}

/// Ticks `client` against real time until `done` holds.
pub async fn drive_until(
    client: &mut GameClient,
    mut done: impl FnMut(&GameClient) -> bool,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + TEST_TIMEOUT;
    let mut last = Instant::now();
    while !done(client) {
        if Instant::now() > deadline {
            anyhow::bail!(
                "condition not reached; client is {}",
                client.status_text()
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        let now = Instant::now();
        client.tick(now, now - last);
        last = now;
    }
    Ok(())
}

/// Ticks `client` for `duration` of real time.
pub async fn drive_for(client: &mut GameClient, duration: Duration) {
    let end = Instant::now() + duration;
    let mut last = Instant::now();
    while Instant::now() < end {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let now = Instant::now();
        client.tick(now, now - last);
        last = now;
    }
}
