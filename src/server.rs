use std::{
    future::Future,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, Receiver},
    task::JoinSet,
};
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Message},
    WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    error::RelayError,
    health::HealthServer,
    keepalive::{Keepalive, Step},
    model::{connection::Liveness, message::ClientEvent, message::ServerEvent},
    registry::Registry,
    relay::{Relay, Session},
};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// How long shutdown waits for connection tasks to say goodbye.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long the close handshake may take once a connection is done.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// WebSocket front end of the relay.
///
/// Owns the listener, the registry shared by every connection task and the
/// optional health-check server. Nothing is global: dropping the server or
/// letting [`RelayServer::run`] return tears everything down.
pub struct RelayServer {
    config: Arc<RelayConfig>,
    listener: TcpListener,
    relay: Relay,
    health: Option<HealthServer>,
}

impl RelayServer {
    pub async fn bind(config: RelayConfig) -> Result<RelayServer, RelayError> {
        let listener = TcpListener::bind(config.listen).await?;
        info!("Relay listening on ws://{}", listener.local_addr()?);

        let health = config.health_listen.map(HealthServer::start).transpose()?;

        Ok(RelayServer {
            config: Arc::new(config),
            listener,
            relay: Relay::new(Arc::new(Registry::new())),
            health,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health.as_ref().map(HealthServer::local_addr)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.relay.registry())
    }

    /// Accept connections until `shutdown` resolves, then drop every
    /// connection and stop the health check.
    pub async fn run<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        let RelayServer {
            config,
            listener,
            relay,
            health,
        } = self;

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let relay = relay.clone();
                        let config = Arc::clone(&config);
                        tasks.spawn(handle_connection(stream, addr, relay, config));
                    }
                    // Usually fd exhaustion. Keep serving existing connections.
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        let dropped = relay.registry().shutdown();
        info!("Shutting down, dropped {} connection(s)", dropped);

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Connection tasks did not finish in {:?}, aborting", SHUTDOWN_GRACE);
            tasks.abort_all();
        }

        if let Some(health) = health {
            if let Err(e) = tokio::task::spawn_blocking(move || health.stop()).await {
                warn!("Health check did not stop cleanly: {}", e);
            }
        }

        Ok(())
    }
}

/// Serve a single WebSocket connection from handshake to close.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    relay: Relay,
    config: Arc<RelayConfig>,
) {
    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_frame_size),
        max_frame_size: Some(config.max_frame_size),
        ..Default::default()
    };

    let ws = match accept_async_with_config(stream, Some(ws_config)).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let (mut sink, stream) = ws.split();
    let (tx, outbox) = mpsc::channel(config.outbox_capacity);
    let mut session = relay.connect(tx);
    info!("{} connected from {}", session.id(), addr);

    let keepalive = Keepalive::new(config.ping_interval, config.ping_timeout, Instant::now());

    match serve(&relay, &mut session, &mut sink, stream, outbox, keepalive).await {
        Ok(()) => {}
        Err(e @ RelayError::Stalled(_)) => info!("{} {}", session.id(), e),
        Err(e) => warn!("{} transport failure: {}", session.id(), e),
    }

    // Unregister before closing so no fan-out targets us while the close
    // handshake is in flight. A peer that stopped reading cannot complete
    // it, hence the bound.
    relay.disconnect(&mut session);
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
}

/// Drive one connection until it closes, fails or times out.
///
/// Three things can wake the loop: an inbound frame, an event queued for
/// this connection by another member of its room, or the keepalive deadline.
async fn serve(
    relay: &Relay,
    session: &mut Session,
    sink: &mut WsSink,
    mut stream: WsStream,
    mut outbox: Receiver<ServerEvent>,
    mut keepalive: Keepalive,
) -> Result<(), RelayError> {
    let id = session.id();

    loop {
        let deadline = match keepalive.poll(Instant::now()) {
            Step::Wait(deadline) => deadline,
            Step::SendPing => {
                debug!("{} idle, sending ping", id);
                relay.registry().set_liveness(id, keepalive.liveness());
                write(sink, Message::Ping(vec![]), keepalive.timeout()).await?;
                continue;
            }
            Step::Expired => {
                info!("{} keepalive timed out", id);
                return Ok(());
            }
        };

        tokio::select! {
            frame = stream.next() => {
                let Some(frame) = frame else {
                    debug!("{} stream ended", id);
                    return Ok(());
                };
                let frame = frame?;

                if relay.registry().liveness(id) == Some(Liveness::PendingTimeout) {
                    relay.registry().set_liveness(id, Liveness::Alive);
                }
                keepalive.observe(Instant::now());

                match frame {
                    Message::Text(text) => handle_frame(relay, session, ClientEvent::decode(&text)),
                    Message::Binary(bytes) => {
                        handle_frame(relay, session, ClientEvent::decode_bytes(&bytes))
                    }
                    Message::Ping(data) => {
                        write(sink, Message::Pong(data), keepalive.timeout()).await?
                    }
                    Message::Pong(_) | Message::Frame(_) => {}
                    Message::Close(_) => {
                        info!("{} closed by client", id);
                        return Ok(());
                    }
                }
            }

            event = outbox.recv() => {
                let Some(event) = event else {
                    // The registry dropped our queue: server shutdown.
                    debug!("{} outbox closed", id);
                    return Ok(());
                };
                write(sink, Message::Text(event.encode()?), keepalive.timeout()).await?;
            }

            _ = tokio::time::sleep_until(deadline.into()) => {}
        }
    }
}

/// Send one frame, giving up if the peer does not drain its socket within
/// `limit`. Every write goes through here so a stalled reader cannot hold
/// the loop away from the keepalive.
async fn write(sink: &mut WsSink, msg: Message, limit: Duration) -> Result<(), RelayError> {
    match tokio::time::timeout(limit, sink.send(msg)).await {
        Ok(sent) => Ok(sent?),
        Err(_) => Err(RelayError::Stalled(limit)),
    }
}

fn handle_frame(relay: &Relay, session: &mut Session, decoded: Result<ClientEvent, RelayError>) {
    let event = match decoded {
        Ok(event) => event,
        Err(e) => {
            warn!("{} sent a malformed frame: {}", session.id(), e);
            relay.reject(session, &e);
            return;
        }
    };

    let kind = event.kind();
    let room = event.room().to_string();
    match relay.handle(session, event) {
        Ok(delivered) => debug!(
            "{} {} for {:?} reached {} peer(s)",
            session.id(),
            kind,
            room,
            delivered
        ),
        Err(e) if e.is_protocol_violation() => {
            warn!("Dropped {} from {}: {}", kind, session.id(), e)
        }
        Err(e) => warn!("{} {} failed: {}", session.id(), kind, e),
    }
}
