//! WebTransport listener.
//!
//! Each session request is gated on its token before it is accepted. An
//! admitted client opens one bidirectional stream for reliable frames;
//! movement may additionally arrive as datagrams, and `player-moved` is
//! sent back the same way.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};
use wtransport::endpoint::IncomingSession;
use wtransport::{Connection, Endpoint, RecvStream, SendStream, VarInt};

use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::net::connection::{ConnectionHandle, ConnectionId, ConnectionReceivers, Outgoing};
use crate::net::dos_protection::{DoSConfig, DoSError, DoSProtection, GuardId, MessageClass};
use crate::net::framing::{
    read_frame, validate_datagram_size, write_frame, write_message, FramingError,
};
use crate::net::gate::ConnectionGate;
use crate::net::protocol::{decode, encode, ClientMessage, ServerMessage};
use crate::net::tls::TlsConfig;
use crate::world::WorldHandle;

/// How long an admitted client has to open its reliable stream
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the peer after a server-initiated close
const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// State shared by every connection task
struct Shared {
    gate: ConnectionGate,
    world: WorldHandle,
    dos: Mutex<DoSProtection>,
    metrics: Arc<Metrics>,
}

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    shared: Arc<Shared>,
}

impl WebTransportServer {
    pub fn new(
        config: ServerConfig,
        tls_config: TlsConfig,
        gate: ConnectionGate,
        world: WorldHandle,
        metrics: Arc<Metrics>,
    ) -> Self {
        let dos = DoSProtection::new(DoSConfig {
            max_connections_total: config.max_connections,
            ..Default::default()
        });

        Self {
            config,
            tls_config,
            shared: Arc::new(Shared {
                gate,
                world,
                dos: Mutex::new(dos),
                metrics,
            }),
        }
    }

    /// Get the certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        self.tls_config.cert_hash()
    }

    /// Accept sessions until the endpoint fails
    pub async fn run(self) -> anyhow::Result<()> {
        // Unspecified address binds dual-stack (IPv4 + IPv6)
        let builder = wtransport::ServerConfig::builder();
        let builder = if self.config.bind_address.is_unspecified() {
            builder.with_bind_default(self.config.port)
        } else {
            builder.with_bind_address(SocketAddr::new(self.config.bind_address, self.config.port))
        };
        let server_config = builder
            .with_identity(self.tls_config.identity)
            .keep_alive_interval(Some(Duration::from_secs(3)))
            .build();

        let server = Endpoint::server(server_config)?;
        info!("WebTransport server listening on port {}", self.config.port);

        loop {
            let incoming = server.accept().await;
            let shared = self.shared.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_session(incoming, shared).await {
                    debug!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Gate, register and serve one session request
async fn handle_session(incoming: IncomingSession, shared: Arc<Shared>) -> anyhow::Result<()> {
    let request = incoming.await?;
    let remote = request.remote_address();

    // Nothing is created for a connection that fails the gate
    let session = match shared.gate.admit(request.path()) {
        Ok(session) => session,
        Err(e) => {
            warn!("Connection from {} rejected: {}", remote, e);
            Metrics::incr(&shared.metrics.connections_rejected);
            request.forbidden().await;
            return Ok(());
        }
    };

    let registration = shared.dos.lock().register_connection(remote.ip());
    let guard_id = match registration {
        Ok(id) => id,
        Err(e) => {
            warn!("Connection from {} rejected by DoS protection: {}", remote, e);
            Metrics::incr(&shared.metrics.connections_rejected);
            request.too_many_requests().await;
            return Ok(());
        }
    };

    debug!(
        "Admitted {} from {} (token {})",
        session.name,
        remote,
        session.token.log_prefix()
    );

    let result = async {
        let connection = Arc::new(request.accept().await?);
        let (send, recv) = tokio::time::timeout(STREAM_OPEN_TIMEOUT, connection.accept_bi())
            .await
            .map_err(|_| anyhow::anyhow!("client did not open a stream"))??;

        let (handle, receivers) = ConnectionHandle::channel();
        let id = shared.world.connect(session, handle).await?;

        let writer = tokio::spawn(write_loop(
            connection.clone(),
            send,
            receivers,
            id,
            shared.metrics.clone(),
        ));

        let reader = Reader {
            id,
            guard_id,
            shared: shared.clone(),
        };
        reader.run(&connection, recv).await;

        // Departure is announced however the connection ended
        let _ = shared.world.disconnect(id).await;
        let _ = writer.await;
        debug!("Connection {} closed", id);
        anyhow::Ok(())
    }
    .await;

    shared.dos.lock().unregister_connection(guard_id);
    result
}

/// Where an inbound message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Stream,
    Datagram,
}

enum Flow {
    Continue,
    Close,
}

/// Outcome of screening one inbound payload
#[derive(Debug, PartialEq)]
enum Screened {
    /// Pass to the world
    Forward(ClientMessage),
    /// Drop the payload, keep the connection
    Drop(&'static str),
    /// Dropped by rate limiting
    Throttled(DoSError),
    /// Close the connection
    Close(DoSError),
}

/// Size check, decode, lane filter and rate limit for one payload.
/// The DoS lock is only taken for the two checks, never across decoding.
fn screen(dos: &Mutex<DoSProtection>, guard_id: GuardId, data: &[u8], lane: Lane) -> Screened {
    let size_check = dos.lock().check_size(data.len());
    if let Err(e) = size_check {
        return Screened::Close(e);
    }

    let Ok(message) = decode::<ClientMessage>(data) else {
        return Screened::Drop("undecodable");
    };

    if lane == Lane::Datagram && !matches!(message, ClientMessage::Move { .. }) {
        return Screened::Drop("only move is accepted as a datagram");
    }

    let verdict = dos.lock().check_message(guard_id, MessageClass::of(&message));
    match verdict {
        Ok(()) => Screened::Forward(message),
        Err(e) if e.is_fatal() => Screened::Close(e),
        Err(e) => Screened::Throttled(e),
    }
}

/// Inbound side of one connection
struct Reader {
    id: ConnectionId,
    guard_id: GuardId,
    shared: Arc<Shared>,
}

impl Reader {
    /// Pump the stream and datagrams until either ends or asks to close
    async fn run(&self, connection: &Connection, mut recv: RecvStream) {
        let stream = async {
            loop {
                match read_frame(&mut recv).await {
                    Ok(frame) => {
                        if let Flow::Close = self.ingest(&frame, Lane::Stream).await {
                            break;
                        }
                    }
                    Err(FramingError::MessageTooLarge(size, max)) => {
                        warn!("Closing {}: frame of {} bytes (max {})", self.id, size, max);
                        break;
                    }
                    Err(e) => {
                        debug!("Stream from {} ended: {}", self.id, e);
                        break;
                    }
                }
            }
        };

        let datagrams = async {
            loop {
                match connection.receive_datagram().await {
                    Ok(datagram) => {
                        if let Flow::Close = self.ingest(&datagram, Lane::Datagram).await {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Datagram receive on {} ended: {}", self.id, e);
                        break;
                    }
                }
            }
        };

        // Either pump finishing ends the connection
        tokio::select! {
            _ = stream => {}
            _ = datagrams => {}
        }
        connection.close(VarInt::from_u32(0), b"closed");
    }

    async fn ingest(&self, data: &[u8], lane: Lane) -> Flow {
        let message = match screen(&self.shared.dos, self.guard_id, data, lane) {
            Screened::Forward(message) => message,
            Screened::Drop(why) => {
                debug!("Dropping {:?} payload from {}: {}", lane, self.id, why);
                return Flow::Continue;
            }
            Screened::Throttled(e) => {
                debug!("{}: {}", self.id, e);
                Metrics::incr(&self.shared.metrics.messages_throttled);
                return Flow::Continue;
            }
            Screened::Close(e) => {
                warn!("Disconnecting {}: {}", self.id, e);
                return Flow::Close;
            }
        };

        match self.shared.world.message(self.id, message).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Close,
        }
    }
}

/// Unreliable datagram path of a connection
trait DatagramSink {
    /// Largest datagram the peer accepts, if datagrams are supported
    fn datagram_limit(&self) -> Option<usize>;
    /// Best-effort send; false if the datagram was not queued
    fn push_datagram(&self, payload: &[u8]) -> bool;
}

impl DatagramSink for Connection {
    fn datagram_limit(&self) -> Option<usize> {
        self.max_datagram_size()
    }

    fn push_datagram(&self, payload: &[u8]) -> bool {
        self.send_datagram(payload).is_ok()
    }
}

/// Why the outbound pump stopped
#[derive(Debug, PartialEq)]
enum WriterExit {
    /// The world asked for a close
    Closed(String),
    /// The stream refused a write
    WriteFailed,
    /// The world dropped the connection's handle
    Released,
}

/// Drain a connection's outbound lanes onto the wire, then close it.
/// The connection is closed however the pump ends, so the reader stops
/// and the player is removed.
async fn write_loop(
    connection: Arc<Connection>,
    mut send: SendStream,
    mut receivers: ConnectionReceivers,
    id: ConnectionId,
    metrics: Arc<Metrics>,
) {
    let exit = pump_outgoing(&*connection, &mut send, &mut receivers, &metrics).await;
    debug!("Writer for {} stopped: {:?}", id, exit);

    let reason = match exit {
        WriterExit::Closed(reason) => {
            let _ = send.finish().await;
            let _ = tokio::time::timeout(CLOSE_LINGER, connection.closed()).await;
            reason
        }
        WriterExit::WriteFailed => "write failed".to_string(),
        WriterExit::Released => "closed".to_string(),
    };
    connection.close(VarInt::from_u32(0), reason.as_bytes());
}

async fn pump_outgoing<W, D>(
    datagrams: &D,
    send: &mut W,
    receivers: &mut ConnectionReceivers,
    metrics: &Metrics,
) -> WriterExit
where
    W: AsyncWrite + Unpin,
    D: DatagramSink,
{
    loop {
        tokio::select! {
            biased;

            item = receivers.reliable.recv() => match item {
                Some(Outgoing::Message(message)) => {
                    if write_message(send, &message).await.is_err() {
                        return WriterExit::WriteFailed;
                    }
                }
                Some(Outgoing::Close { reason }) => return WriterExit::Closed(reason),
                None => return WriterExit::Released,
            },

            Some(message) = receivers.volatile.recv() => {
                match send_volatile(datagrams, send, &message).await {
                    Ok(true) => {}
                    Ok(false) => Metrics::incr(&metrics.volatile_dropped),
                    Err(_) => return WriterExit::WriteFailed,
                }
            }
        }
    }
}

/// Send as a datagram, falling back to the stream if it would not fit.
/// `Ok(false)` means the update was lost; an error means the stream failed.
async fn send_volatile<W, D>(
    datagrams: &D,
    send: &mut W,
    message: &ServerMessage,
) -> Result<bool, FramingError>
where
    W: AsyncWrite + Unpin,
    D: DatagramSink,
{
    let bytes = encode(message)?;

    let fits = validate_datagram_size(&bytes).is_ok()
        && datagrams
            .datagram_limit()
            .map_or(false, |max| bytes.len() <= max);

    if fits {
        Ok(datagrams.push_datagram(&bytes))
    } else {
        write_frame(send, &bytes).await?;
        Ok(true)
    }
}
