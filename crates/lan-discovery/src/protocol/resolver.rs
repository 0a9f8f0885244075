//! Bounded-retry probe resolution shared by the datagram transports.
//!
//! # State Machine
//!
//! ```text
//!   IDLE ──► SEND_PROBE ──► AWAIT_RESPONSE ──► SUCCESS
//!               ▲                 │
//!               │   timeout,      │ malformed → keep waiting
//!               └── attempts left ┤
//!                                 ▼
//!                          NOT FOUND (budget spent)
//! ```
//!
//! Each attempt sends exactly one probe and waits for the first response
//! that parses, bounded by the per-attempt timeout. Datagrams still queued
//! from an earlier attempt are discarded before the next probe goes out.

use crate::endpoint::Endpoint;
use crate::error::{DiscoveryError, Result};
use crate::protocol::wire::{Advertisement, DISCOVER_REQUEST, MAX_DATAGRAM, WireFormat};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// One side of a probe/response exchange.
///
/// Implementations must make [`ProbeTransport::recv`] cancel-safe; the
/// resolver drops it whenever the attempt deadline or shutdown wins.
#[async_trait]
pub trait ProbeTransport: Send {
    /// Send a fresh probe.
    async fn send_probe(&mut self) -> io::Result<()>;

    /// Wait for the next datagram.
    async fn recv(&mut self) -> io::Result<(Vec<u8>, SocketAddr)>;

    /// Drop anything already queued without blocking.
    fn discard_pending(&mut self) -> usize {
        0
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Endpoint to hand to the connection handler.
    pub endpoint: Endpoint,
    /// Protocol tag, when the transport carries one.
    pub schema: Option<String>,
    /// Remaining lease TTL, when resolved through the registry.
    pub ttl_secs: Option<u64>,
    /// Attempt (1-based) that produced the endpoint.
    pub attempt: u32,
    /// Socket that answered the probe, for datagram transports.
    pub responder: Option<SocketAddr>,
}

/// Drives the probe/retry state machine over any [`ProbeTransport`].
#[derive(Debug, Clone)]
pub struct ClientResolver {
    attempts: u32,
    attempt_timeout: Duration,
}

impl Default for ClientResolver {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl ClientResolver {
    /// Create a resolver with the given attempt budget (at least one).
    #[must_use]
    pub fn new(attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            attempt_timeout,
        }
    }

    /// Configured attempt budget.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured per-attempt timeout.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Probe until a response in `format` parses or the budget runs out.
    ///
    /// `service` is only used for logging and the error value.
    pub async fn resolve<T: ProbeTransport + ?Sized>(
        &self,
        service: &str,
        transport: &mut T,
        format: &WireFormat,
        shutdown: &Shutdown,
    ) -> Result<Resolved> {
        for attempt in 1..=self.attempts {
            if shutdown.is_triggered() {
                return Err(DiscoveryError::Cancelled);
            }

            let stale = transport.discard_pending();
            if stale > 0 {
                debug!("Discarded {} stale datagram(s) before attempt {}", stale, attempt);
            }

            info!("Discovery attempt {}/{}", attempt, self.attempts);
            let deadline = Instant::now() + self.attempt_timeout;

            let sent = tokio::select! {
                _ = shutdown.cancelled() => return Err(DiscoveryError::Cancelled),
                sent = transport.send_probe() => sent,
            };
            if let Err(e) = sent {
                warn!("Failed to send probe on attempt {}: {}", attempt, e);
                // A failed send still costs a full attempt.
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(DiscoveryError::Cancelled),
                    _ = sleep_until(deadline) => continue,
                }
            }

            match self
                .await_response(transport, format, deadline, shutdown)
                .await?
            {
                Some((advertisement, responder)) => {
                    info!(
                        "Resolved {} to {} via {} on attempt {}",
                        service, advertisement.endpoint, responder, attempt
                    );
                    return Ok(Resolved {
                        endpoint: advertisement.endpoint,
                        schema: advertisement.schema,
                        ttl_secs: None,
                        attempt,
                        responder: Some(responder),
                    });
                }
                None => info!("No response, retrying..."),
            }
        }

        Err(DiscoveryError::ServiceNotFound {
            service: service.to_string(),
            attempts: self.attempts,
        })
    }

    /// Wait for a parseable response until `deadline`.
    ///
    /// Returns `Ok(None)` on timeout or on a receive error, which ends the
    /// current attempt only.
    async fn await_response<T: ProbeTransport + ?Sized>(
        &self,
        transport: &mut T,
        format: &WireFormat,
        deadline: Instant,
        shutdown: &Shutdown,
    ) -> Result<Option<(Advertisement, SocketAddr)>> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Err(DiscoveryError::Cancelled),
                _ = sleep_until(deadline) => return Ok(None),
                received = transport.recv() => match received {
                    Ok((datagram, from)) => {
                        match format.parse_response(&datagram) {
                            Some(advertisement) => return Ok(Some((advertisement, from))),
                            None => debug!(
                                "Ignoring non-matching datagram from {}: {:?}",
                                from,
                                String::from_utf8_lossy(&datagram)
                            ),
                        }
                    }
                    Err(e) => {
                        warn!("Receive failed: {}", e);
                        return Ok(None);
                    }
                },
            }
        }
    }
}

/// UDP transport sending probes to a fixed target (broadcast or group address).
#[derive(Debug)]
pub struct UdpProbeTransport {
    socket: std::sync::Arc<UdpSocket>,
    target: SocketAddr,
    buf: Vec<u8>,
}

impl UdpProbeTransport {
    /// Wrap an already configured socket.
    #[must_use]
    pub fn new(socket: std::sync::Arc<UdpSocket>, target: SocketAddr) -> Self {
        Self {
            socket,
            target,
            buf: vec![0u8; MAX_DATAGRAM],
        }
    }

    /// Where probes are sent.
    #[must_use]
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl ProbeTransport for UdpProbeTransport {
    async fn send_probe(&mut self) -> io::Result<()> {
        self.socket
            .send_to(DISCOVER_REQUEST.as_bytes(), self.target)
            .await
            .map(|_| ())
    }

    async fn recv(&mut self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let (len, from) = self.socket.recv_from(&mut self.buf).await?;
        Ok((self.buf[..len].to_vec(), from))
    }

    fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while self.socket.try_recv_from(&mut self.buf).is_ok() {
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn responder_addr() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::new(192, 168, 1, 10), 15000))
    }

    /// Replies with scripted datagrams for specific attempts.
    struct ScriptedTransport {
        probes: Arc<AtomicU32>,
        script: HashMap<u32, Vec<Vec<u8>>>,
        fail_sends: bool,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new(script: HashMap<u32, Vec<Vec<u8>>>) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                probes: Arc::new(AtomicU32::new(0)),
                script,
                fail_sends: false,
                tx,
                rx,
            }
        }

        fn silent() -> Self {
            Self::new(HashMap::new())
        }
    }

    #[async_trait]
    impl ProbeTransport for ScriptedTransport {
        async fn send_probe(&mut self) -> io::Result<()> {
            let attempt = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_sends {
                return Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "down"));
            }
            for reply in self.script.get(&attempt).cloned().unwrap_or_default() {
                let _ = self.tx.send(reply);
            }
            Ok(())
        }

        async fn recv(&mut self) -> io::Result<(Vec<u8>, SocketAddr)> {
            // The sender lives in self, so this pends forever when empty.
            match self.rx.recv().await {
                Some(datagram) => Ok((datagram, responder_addr())),
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")),
            }
        }

        fn discard_pending(&mut self) -> usize {
            let mut dropped = 0;
            while self.rx.try_recv().is_ok() {
                dropped += 1;
            }
            dropped
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let (_trigger, shutdown) = shutdown::channel();
        let mut script = HashMap::new();
        script.insert(1, vec![b"DISCOVER_RESPONSE;192.168.1.10;16000".to_vec()]);
        let mut transport = ScriptedTransport::new(script);
        let probes = transport.probes.clone();

        let resolver = ClientResolver::new(3, TIMEOUT);
        let started = Instant::now();
        let resolved = resolver
            .resolve("svc", &mut transport, &WireFormat::Delimited, &shutdown)
            .await
            .unwrap();

        assert_eq!(resolved.attempt, 1);
        assert_eq!(
            resolved.endpoint,
            Endpoint::new(Ipv4Addr::new(192, 168, 1, 10), 16000)
        );
        assert_eq!(resolved.responder, Some(responder_addr()));
        assert_eq!(probes.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < TIMEOUT);
    }

    #[tokio::test]
    async fn test_silent_peer_exhausts_attempts() {
        let (_trigger, shutdown) = shutdown::channel();
        let mut transport = ScriptedTransport::silent();
        let probes = transport.probes.clone();

        let resolver = ClientResolver::new(3, TIMEOUT);
        let started = Instant::now();
        let err = resolver
            .resolve("svc", &mut transport, &WireFormat::Delimited, &shutdown)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(
            err,
            DiscoveryError::ServiceNotFound { attempts: 3, .. }
        ));
        assert_eq!(probes.load(Ordering::SeqCst), 3);
        assert!(elapsed >= TIMEOUT * 3, "elapsed {:?}", elapsed);
        assert!(elapsed < TIMEOUT * 3 + Duration::from_millis(500), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_malformed_response_does_not_end_attempt() {
        let (_trigger, shutdown) = shutdown::channel();
        let mut script = HashMap::new();
        script.insert(
            1,
            vec![br#"DISCOVER_RESPONSE_JSON;{"ip":"10.0.0.1","port":16000}"#.to_vec()],
        );
        let mut transport = ScriptedTransport::new(script);
        let probes = transport.probes.clone();
        let format = WireFormat::Json {
            schema: "tcp".to_string(),
        };

        let resolver = ClientResolver::new(2, TIMEOUT);
        let started = Instant::now();
        let err = resolver
            .resolve("svc", &mut transport, &format, &shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::ServiceNotFound { .. }));
        assert_eq!(probes.load(Ordering::SeqCst), 2);
        // The malformed reply arrived immediately but attempt 1 still ran to its timeout.
        assert!(started.elapsed() >= TIMEOUT * 2);
    }

    #[tokio::test]
    async fn test_valid_response_after_malformed_in_same_attempt() {
        let (_trigger, shutdown) = shutdown::channel();
        let mut script = HashMap::new();
        script.insert(
            1,
            vec![
                b"garbage".to_vec(),
                br#"DISCOVER_RESPONSE_JSON;{"schema":"tcp","ip":"10.0.0.1","port":16000}"#
                    .to_vec(),
            ],
        );
        let mut transport = ScriptedTransport::new(script);
        let format = WireFormat::Json {
            schema: "tcp".to_string(),
        };

        let resolved = ClientResolver::new(3, TIMEOUT)
            .resolve("svc", &mut transport, &format, &shutdown)
            .await
            .unwrap();
        assert_eq!(resolved.attempt, 1);
        assert_eq!(resolved.schema.as_deref(), Some("tcp"));
        assert_eq!(resolved.endpoint.port, 16000);
    }

    #[tokio::test]
    async fn test_success_on_later_attempt() {
        let (_trigger, shutdown) = shutdown::channel();
        let mut script = HashMap::new();
        script.insert(3, vec![b"DISCOVER_RESPONSE;10.0.0.7;16000".to_vec()]);
        let mut transport = ScriptedTransport::new(script);

        let resolved = ClientResolver::new(3, TIMEOUT)
            .resolve("svc", &mut transport, &WireFormat::Delimited, &shutdown)
            .await
            .unwrap();
        assert_eq!(resolved.attempt, 3);
    }

    #[tokio::test]
    async fn test_send_failures_consume_attempts() {
        let (_trigger, shutdown) = shutdown::channel();
        let mut transport = ScriptedTransport::silent();
        transport.fail_sends = true;
        let probes = transport.probes.clone();

        let err = ClientResolver::new(2, TIMEOUT)
            .resolve("svc", &mut transport, &WireFormat::Delimited, &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::ServiceNotFound { attempts: 2, .. }
        ));
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_mid_probe() {
        let (trigger, shutdown) = shutdown::channel();
        let mut transport = ScriptedTransport::silent();

        let resolver = ClientResolver::new(3, Duration::from_secs(10));
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        let started = Instant::now();
        let err = resolver
            .resolve("svc", &mut transport, &WireFormat::Delimited, &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
        cancel.await.unwrap();
    }

    #[test]
    fn test_zero_attempts_still_probes_once() {
        let resolver = ClientResolver::new(0, TIMEOUT);
        assert_eq!(resolver.attempts(), 1);
    }

    #[tokio::test]
    async fn test_udp_transport_discards_stale_datagrams() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let local = socket.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"stale-1", local).await.unwrap();
        sender.send_to(b"stale-2", local).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut transport = UdpProbeTransport::new(socket, local);
        assert_eq!(transport.discard_pending(), 2);
        assert_eq!(transport.discard_pending(), 0);
    }
}
