//! TCP accept loop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::game::context::GameContext;
use crate::net::pipeline;

/// Stream-socket front door of the server
pub struct TcpServer {
    ctx: Arc<GameContext>,
    listener: TcpListener,
}

impl TcpServer {
    pub async fn bind(ctx: Arc<GameContext>) -> anyhow::Result<Self> {
        let addr = SocketAddr::new(ctx.config.bind_address, ctx.config.port);
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { ctx, listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one pipeline per socket
    pub async fn run(self) -> anyhow::Result<()> {
        // Periodic sweep: expire timed notifications on every connection
        let sweep_ctx = self.ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                sweep_ctx.connections.tick_all(&sweep_ctx.store);
            }
        });

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%addr, "Failed to set TCP_NODELAY: {e}");
                    }
                    pipeline::spawn(self.ctx.clone(), stream, addr);
                }
                Err(e) => {
                    warn!("Accept failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::game::persistence::MemoryStore;
    use crate::net::framing;
    use crate::net::protocol::{self, ClientCommand, ServerPacket};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    async fn test_server() -> (Arc<GameContext>, SocketAddr, tokio::task::JoinHandle<()>) {
        let config = ServerConfig { port: 0, ..ServerConfig::default() };
        let ctx = GameContext::new(config, Arc::new(MemoryStore::new()));
        let server = TcpServer::bind(ctx.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });
        (ctx, addr, handle)
    }

    #[tokio::test]
    async fn test_accepted_socket_receives_init_time() {
        let (_ctx, addr, handle) = test_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let frame = framing::read_frame(&mut stream).await.unwrap();
        let packet = protocol::decode_packet(&frame).unwrap();
        assert!(matches!(packet, ServerPacket::InitTime { .. }));

        handle.abort();
    }

    #[tokio::test]
    async fn test_ping_round_trip_over_socket() {
        let (_ctx, addr, handle) = test_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        // InitTime first, then the session share
        let _ = framing::read_frame(&mut stream).await.unwrap();
        let _ = framing::read_frame(&mut stream).await.unwrap();

        let frame = protocol::encode_commands(&[ClientCommand::Ping { client_ms: 42 }]).unwrap();
        framing::write_frame(&mut stream, &frame).await.unwrap();

        let reply = framing::read_frame(&mut stream).await.unwrap();
        match protocol::decode_packet(&reply).unwrap() {
            ServerPacket::Pong { client_ms, .. } => assert_eq!(client_ms, 42),
            other => panic!("expected pong, got {other:?}"),
        }

        stream.shutdown().await.unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_disconnect_cleans_connection_up() {
        let (ctx, addr, handle) = test_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _ = framing::read_frame(&mut stream).await.unwrap();
        assert_eq!(ctx.connections.count(), 1);

        stream.shutdown().await.unwrap();
        drop(stream);

        // Give the receive stage a moment to observe the disconnect
        for _ in 0..50 {
            if ctx.connections.count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ctx.connections.count(), 0);
        handle.abort();
    }
}
