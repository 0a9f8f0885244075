//! What happens after resolution: a TCP greeting exchange with the endpoint.
//!
//! The service writes `HELLO_FROM_SERVER`, reads one message and answers
//! `ECHO_FROM_SERVER:<message>`. The client reads the greeting, sends
//! `HELLO_FROM_CLIENT` and reads the echo. Messages are unframed; each side
//! does a single read per message.

use crate::endpoint::Endpoint;
use crate::error::{DiscoveryError, Result};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Greeting the service sends first.
pub const SERVER_GREETING: &str = "HELLO_FROM_SERVER";

/// Message the client sends after reading the greeting.
pub const CLIENT_HELLO: &str = "HELLO_FROM_CLIENT";

/// Prefix of the service's echo.
pub const ECHO_PREFIX: &str = "ECHO_FROM_SERVER:";

const READ_BUF: usize = 4096;

/// Consumes a resolved endpoint.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Talk to `endpoint` until done or until `shutdown` fires.
    async fn connect(&self, endpoint: Endpoint, shutdown: &Shutdown) -> Result<Exchange>;
}

/// Transcript of one client-side exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Greeting read from the service.
    pub greeting: String,
    /// Echo read after sending our hello, if the service sent one.
    pub reply: Option<String>,
}

/// Client half of the greeting exchange.
#[derive(Debug, Clone)]
pub struct GreetingClient {
    connect_timeout: Duration,
}

impl GreetingClient {
    /// Create a client that gives up connecting after `connect_timeout`.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn exchange(mut stream: TcpStream) -> io::Result<Exchange> {
        let mut buf = vec![0u8; READ_BUF];

        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before greeting",
            ));
        }
        let greeting = String::from_utf8_lossy(&buf[..n]).into_owned();
        debug!("Server greeting: {}", greeting);

        stream.write_all(CLIENT_HELLO.as_bytes()).await?;

        let n = stream.read(&mut buf).await?;
        let reply = (n > 0).then(|| String::from_utf8_lossy(&buf[..n]).into_owned());
        Ok(Exchange { greeting, reply })
    }
}

impl Default for GreetingClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ConnectionHandler for GreetingClient {
    async fn connect(&self, endpoint: Endpoint, shutdown: &Shutdown) -> Result<Exchange> {
        let addr = endpoint.socket_addr();
        let stream = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(DiscoveryError::Cancelled),
            connected = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)) => {
                match connected {
                    Ok(stream) => stream?,
                    Err(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("connect to {addr} timed out after {:?}", self.connect_timeout),
                        )
                        .into());
                    }
                }
            }
        };
        info!("Connected to {}", addr);

        let exchange = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(DiscoveryError::Cancelled),
            exchange = Self::exchange(stream) => exchange?,
        };
        if let Some(reply) = &exchange.reply {
            info!("Server reply: {}", reply);
        }
        Ok(exchange)
    }
}

/// Service half of the greeting exchange.
#[derive(Debug)]
pub struct GreetingService {
    listener: TcpListener,
}

impl GreetingService {
    /// Bind the service listener.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }

    /// Wrap an already bound listener.
    #[must_use]
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listener }
    }

    /// Address the service accepts on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires, one task per connection.
    pub async fn serve(self, shutdown: Shutdown) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Greeting service listening on {}", addr),
            Err(e) => warn!("Greeting service has no local address: {}", e),
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        debug!("TCP connected: {}", peer);
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            result = handle_client(stream) => {
                                if let Err(e) = result {
                                    warn!("Client {} handler error: {}", peer, e);
                                }
                            }
                        }
                        debug!("TCP disconnected: {}", peer);
                    });
                }
                Err(e) => warn!("Accept failed: {}", e),
            }
        }
        info!("Greeting service stopped");
    }
}

async fn handle_client(mut stream: TcpStream) -> io::Result<()> {
    stream.write_all(SERVER_GREETING.as_bytes()).await?;

    let mut buf = vec![0u8; READ_BUF];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    let text = String::from_utf8_lossy(&buf[..n]);
    debug!("Received: {}", text);
    stream
        .write_all(format!("{ECHO_PREFIX}{text}").as_bytes())
        .await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::net::Ipv4Addr;

    async fn start_service() -> (crate::shutdown::ShutdownTrigger, Endpoint) {
        let service = GreetingService::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .unwrap();
        let endpoint = Endpoint::from(service.local_addr().unwrap());
        let (trigger, shutdown) = shutdown::channel();
        tokio::spawn(service.serve(shutdown));
        (trigger, endpoint)
    }

    #[tokio::test]
    async fn test_greeting_exchange() {
        let (trigger, endpoint) = start_service().await;
        let (_client_trigger, client_shutdown) = shutdown::channel();

        let exchange = GreetingClient::default()
            .connect(endpoint, &client_shutdown)
            .await
            .unwrap();

        assert_eq!(exchange.greeting, SERVER_GREETING);
        assert_eq!(
            exchange.reply.as_deref(),
            Some("ECHO_FROM_SERVER:HELLO_FROM_CLIENT")
        );
        trigger.trigger();
    }

    #[tokio::test]
    async fn test_service_handles_many_clients() {
        let (trigger, endpoint) = start_service().await;
        let (_client_trigger, client_shutdown) = shutdown::channel();
        let client = GreetingClient::default();

        for _ in 0..3 {
            let exchange = client.connect(endpoint, &client_shutdown).await.unwrap();
            assert_eq!(exchange.greeting, SERVER_GREETING);
        }
        trigger.trigger();
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (_trigger, shutdown) = shutdown::channel();

        let err = GreetingClient::default()
            .connect(Endpoint::new(Ipv4Addr::LOCALHOST, port), &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Io(_)));
    }

    #[tokio::test]
    async fn test_connect_cancelled() {
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        // Non-routable address keeps the connect pending.
        let err = GreetingClient::new(Duration::from_secs(5))
            .connect(Endpoint::new(Ipv4Addr::new(10, 255, 255, 1), 9), &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Cancelled));
    }
}
