//! WebSocket Server Module
//!
//! Bridges the robot's key-value table to remote clients over the `picoserve`
//! framework. A data logger connects to `/ws`, writes the speed command with
//! `set`, switches modes with `mode`, and receives every changed entry
//! (including the telemetry array) once per table flush interval.

use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::{
    future::Future,
    pin::{pin, Pin},
};

use embassy_futures::select::{select, Either};
use embassy_net::Stack;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::{Duration, Instant, Ticker};
use embedded_io_async::Read;
use hashbrown::{hash_map::Entry, HashMap};
use lazy_static::lazy_static;
use picoserve::{
    extract::{FromRequest, State},
    io::embedded_io_async as embedded_aio,
    request::{RequestBody, RequestParts},
    response::{
        ws::{Message, ReadMessageError, SocketRx, SocketTx, WebSocketCallback, WebSocketUpgrade},
        Json, StatusCode,
    },
    url_encoded::deserialize_form,
    Router,
};
use serde::Deserialize;

use crate::utils::{
    connection::table::{EntryUpdate, NetworkTable},
    controllers::{SystemCommand, MODE_CHANNEL},
};

/// Shared state handed to every route.
#[derive(Clone, Copy)]
pub struct AppState {
    pub table: &'static NetworkTable,
    /// How often changed entries are pushed to each client.
    pub update_rate: Duration,
}

/// One WebSocket client subscribed to the table.
pub struct TableSocket {
    table: &'static NetworkTable,
    session: String,
    update_rate: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionState {
    pub connected_at: u64,
    pub last_seen: u64,
    pub updates_sent: u32,
}
pub struct SessionManager;

lazy_static! {
    pub static ref SESSION_STORE: Mutex<CriticalSectionRawMutex, HashMap<String, SessionState>> =
        Mutex::new(HashMap::new());
}

/// Apply one client command to `table` and build the reply text.
///
/// Mode requests are forwarded to the robot loop through `MODE_CHANNEL`.
pub async fn handle_command(
    table: &NetworkTable,
    data: &[u8],
) -> String {
    match serde_json::from_slice::<SystemCommand>(data) {
        Ok(SystemCommand::Set { k, v }) => match table.put_remote(&k, v) {
            Ok(()) => "ok".to_string(),
            Err(error) => {
                tracing::warn!(?error, key = %k, "table write rejected");
                format!("rejected: {:?}", error)
            }
        },
        Ok(SystemCommand::Get { k }) => {
            let entry = table.get(&k).map(|v| EntryUpdate {
                seq: table.revision(&k).unwrap_or(0),
                k,
                v,
            });
            match entry.map(|e| serde_json::to_string(&e)) {
                Some(Ok(text)) => text,
                Some(Err(error)) => {
                    tracing::error!(?error, "error serializing entry");
                    "Serialization failed".to_string()
                }
                None => "null".to_string(),
            }
        }
        Ok(SystemCommand::Mode { m }) => {
            MODE_CHANNEL.send(m).await;
            "Mode request received and forwarded".to_string()
        }
        Err(error) => {
            tracing::error!(?error, "error deserializing SystemCommand");
            "Invalid command format".to_string()
        }
    }
}

/// Serialized `{k, v, seq}` frames for entries changed since `last_seq`,
/// advancing `last_seq` past them.
pub fn pending_frames(
    table: &NetworkTable,
    last_seq: &mut u64,
) -> Vec<String> {
    let (updates, seq) = table.updates_since(*last_seq);
    *last_seq = seq;
    updates
        .iter()
        .filter_map(|update| match serde_json::to_string(update) {
            Ok(text) => Some(text),
            Err(error) => {
                tracing::error!(?error, key = %update.k, "error serializing update");
                None
            }
        })
        .collect()
}

/// Work done each time the flush ticker fires.
pub(crate) trait TickHandler {
    type Error;

    async fn on_tick(&mut self) -> Result<(), Self::Error>;
}

/// Poll `read` to completion, running `handler` on every tick in between.
///
/// The read future stays pinned across ticks: a frame whose bytes arrive in
/// several segments is never abandoned halfway through its header.
pub(crate) async fn read_across_ticks<F, H>(
    mut read: Pin<&mut F>,
    ticker: &mut Ticker,
    handler: &mut H,
) -> Result<F::Output, H::Error>
where
    F: Future,
    H: TickHandler,
{
    loop {
        match select(read.as_mut(), ticker.next()).await {
            Either::First(output) => return Ok(output),
            Either::Second(()) => handler.on_tick().await?,
        }
    }
}

/// Pushes table changes to one socket.
struct FlushTick<'a, W: embedded_aio::Write> {
    socket: &'a TableSocket,
    tx: &'a mut SocketTx<W>,
    last_seq: &'a mut u64,
}

impl<W: embedded_aio::Write> TickHandler for FlushTick<'_, W> {
    type Error = W::Error;

    async fn on_tick(&mut self) -> Result<(), W::Error> {
        let frames = pending_frames(self.socket.table, self.last_seq);
        for frame in &frames {
            self.tx.send_text(frame).await?;
        }
        if !frames.is_empty() {
            let now = Instant::now().as_secs();
            SessionManager::record_flush(&self.socket.session, now, frames.len() as u32).await;
        }
        Ok(())
    }
}

/// Handles incoming WebSocket connections.
impl WebSocketCallback for TableSocket {
    async fn run<Reader, Writer>(
        self,
        mut rx: SocketRx<Reader>,
        mut tx: SocketTx<Writer>,
    ) -> Result<(), Writer::Error>
    where
        Reader: embedded_aio::Read,
        Writer: embedded_aio::Write<Error = Reader::Error>,
    {
        let mut buffer = [0; 1024];
        let mut ticker = Ticker::every(self.update_rate);
        let mut last_seq = 0;

        tx.send_text("Connected").await?;

        let close_reason = loop {
            let read = pin!(rx.next_message(&mut buffer));
            let mut flusher = FlushTick {
                socket: &self,
                tx: &mut tx,
                last_seq: &mut last_seq,
            };
            let message = match read_across_ticks(read, &mut ticker, &mut flusher).await {
                Ok(message) => message,
                Err(err) => {
                    SessionManager::remove_session(&self.session).await;
                    return Err(err);
                }
            };

            match message {
                Ok(Message::Pong(_)) => continue,
                Ok(Message::Ping(data)) => tx.send_pong(data).await?,
                Ok(Message::Close(reason)) => {
                    tracing::info!(?reason, session = %self.session, "websocket closed");
                    break None;
                }
                Ok(Message::Text(data)) => {
                    let reply = handle_command(self.table, data.as_bytes()).await;
                    tx.send_text(&reply).await?
                }
                Ok(Message::Binary(data)) => {
                    let reply = handle_command(self.table, data).await;
                    tx.send_binary(reply.as_bytes()).await?
                }
                Err(error) => {
                    tracing::error!(?error, "websocket error");
                    let code = match error {
                        ReadMessageError::TextIsNotUtf8 => 1007,
                        ReadMessageError::ReservedOpcode(_) => 1003,
                        ReadMessageError::ReadFrameError(_)
                        | ReadMessageError::UnexpectedMessageStart
                        | ReadMessageError::MessageStartsWithContinuation => 1002,
                        ReadMessageError::Io(err) => {
                            SessionManager::remove_session(&self.session).await;
                            return Err(err);
                        }
                    };
                    break Some((code, "Websocket Error"));
                }
            };
        };

        SessionManager::remove_session(&self.session).await;
        tx.close(close_reason).await
    }
}

impl SessionManager {
    /// Creates a new session with the given session ID and timestamp.
    /// Returns false, leaving the existing session untouched, if the ID is
    /// already in use.
    pub async fn create_session(
        session_id: String,
        timestamp: u64,
    ) -> bool {
        match SESSION_STORE.lock().await.entry(session_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(SessionState {
                    connected_at: timestamp,
                    last_seen: timestamp,
                    updates_sent: 0,
                });
                true
            }
        }
    }

    /// Retrieves a copy of the session state for the given session ID.
    /// Returns None if the session does not exist.
    pub async fn get_session(session_id: &str) -> Option<SessionState> {
        SESSION_STORE.lock().await.get(session_id).cloned()
    }

    /// Note a flush of `count` updates to the session.
    /// Returns true if the session was found and updated.
    pub async fn record_flush(
        session_id: &str,
        timestamp: u64,
        count: u32,
    ) -> bool {
        if let Some(session) = SESSION_STORE.lock().await.get_mut(session_id) {
            session.last_seen = timestamp;
            session.updates_sent = session.updates_sent.saturating_add(count);
            true
        } else {
            false
        }
    }

    /// Removes the session identified by session_id.
    /// Returns true if a session was removed.
    pub async fn remove_session(session_id: &str) -> bool {
        SESSION_STORE.lock().await.remove(session_id).is_some()
    }

    /// Returns a list of active session IDs.
    pub async fn list_sessions() -> Vec<String> {
        SESSION_STORE.lock().await.keys().cloned().collect()
    }
}

/// Creates the table server
pub async fn run(
    id: usize,
    port: u16,
    stack: Stack<'static>,
    state: AppState,
    config: Option<&'static picoserve::Config<Duration>>,
) -> ! {
    let default_config = picoserve::Config::new(picoserve::Timeouts {
        start_read_request: Some(Duration::from_secs(5)),
        persistent_start_read_request: None,
        read_request: Some(Duration::from_secs(1)),
        write: Some(Duration::from_secs(5)),
    });

    let config = config.unwrap_or(&default_config);

    let router = Router::new()
        .route(
            "/",
            picoserve::routing::get(|| async {
                picoserve::response::Response::new(StatusCode::OK, "characterization table server")
                    .with_headers([("Content-Type", "text/plain; charset=utf-8")])
            }),
        )
        // Snapshot of every entry, for pollers that skip the socket
        .route(
            "/table",
            picoserve::routing::get(|State(state): State<AppState>| async move {
                Json(state.table.snapshot())
            }),
        )
        // WebSocket communication on "/ws"
        .route(
            "/ws",
            picoserve::routing::get(
                |State(state): State<AppState>, params: WsConnectionParams| async move {
                    let session_id = params.query.session;
                    tracing::info!("New WebSocket connection with session id: {}", session_id);
                    params
                        .upgrade
                        .on_upgrade(TableSocket {
                            table: state.table,
                            session: session_id,
                            update_rate: state.update_rate,
                        })
                        .with_protocol("messages")
                },
            ),
        );

    // Print out the IP and port before starting the server.
    if let Some(ip_cfg) = stack.config_v4() {
        tracing::info!("Starting server at {}:{}", ip_cfg.address, port);
    } else {
        tracing::warn!(
            "Starting table server on port {port}, but no IPv4 address is assigned yet!"
        );
    }

    let (mut rx_buffer, mut tx_buffer, mut http_buffer) = ([0; 1024], [0; 1024], [0; 4096]);

    picoserve::listen_and_serve_with_state(
        id,
        &router,
        config,
        stack,
        port,
        &mut rx_buffer,
        &mut tx_buffer,
        &mut http_buffer,
        &state,
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    session: String,
}

pub struct WsConnectionParams {
    pub upgrade: WebSocketUpgrade,
    pub query: QueryParams,
}

impl<'r, S> FromRequest<'r, S> for WsConnectionParams {
    type Rejection = &'static str; // Or a custom error type

    async fn from_request<R: Read>(
        state: &'r S,
        parts: RequestParts<'r>,
        body: RequestBody<'r, R>,
    ) -> Result<Self, Self::Rejection> {
        // First extract the WebSocketUpgrade as usual.
        let upgrade = WebSocketUpgrade::from_request(state, parts.clone(), body)
            .await
            .map_err(|_| "Failed to extract WebSocketUpgrade")?;

        // Then extract the query string for QueryParams.
        let query_str = parts.query().ok_or("Missing query parameters")?;
        let query =
            deserialize_form::<QueryParams>(query_str).map_err(|_| "Invalid query parameters")?;

        if query.session.is_empty() {
            return Err("Session ID is required");
        }

        // Claim the id now so a second socket cannot share it.
        let now = Instant::now().as_secs();
        if !SessionManager::create_session(query.session.clone(), now).await {
            return Err("Session ID already in use");
        }

        Ok(WsConnectionParams { upgrade, query })
    }
}
