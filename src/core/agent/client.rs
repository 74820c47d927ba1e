//! Agent session transport
//!
//! Connection strategy, in order:
//!
//! 1. HTTPS GET for a short-lived signed WSS URL, then connect to it.
//! 2. On any failure (non-2xx, network error, malformed body, timeout,
//!    or a failed handshake on the signed URL), connect directly to the
//!    provider WSS endpoint with the API key in a header.
//!
//! If the first transport drops abnormally before the session is ready,
//! the direct transport is retried exactly once. Any closure after ready
//! is final for the call.

use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::config::{API_KEY_HEADER, AgentConnectConfig};
use super::messages::{AgentControl, AgentInbound, AudioChunk, InitiationData, classify};
use super::{AgentError, AgentEvent, AgentResult};
use crate::core::audio::AudioFormat;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Capacity of the command channel feeding the socket task.
const COMMAND_CAPACITY: usize = 256;

/// Poll period for the session's deadline checks.
const TICK: Duration = Duration::from_millis(50);

/// Nudge payloads paired positionally with
/// [`AgentConnectConfig::NUDGE_SCHEDULE`].
fn nudge_message(index: usize) -> AgentControl {
    match index {
        0 => AgentControl::user_message("Hello"),
        1 => AgentControl::ConversationStart,
        _ => AgentControl::user_message("Hello?"),
    }
}

#[derive(Debug)]
enum AgentCommand {
    Control(AgentControl),
    Audio(String),
    Close,
}

/// Cheap cloneable handle for issuing commands to the socket task.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    pub async fn send_control(&self, control: AgentControl) -> AgentResult<()> {
        self.tx
            .send(AgentCommand::Control(control))
            .await
            .map_err(|_| AgentError::NotConnected)
    }

    /// Queue one base64 caller-audio chunk.
    pub async fn send_audio(&self, chunk_b64: String) -> AgentResult<()> {
        self.tx
            .send(AgentCommand::Audio(chunk_b64))
            .await
            .map_err(|_| AgentError::NotConnected)
    }

    /// Ask the socket task to close the transport and exit.
    pub async fn close(&self) {
        let _ = self.tx.send(AgentCommand::Close).await;
    }
}

/// Spawn the session task for one call.
///
/// Returns immediately; connection progress and inbound traffic arrive on
/// `events`. The caller must not write audio before [`AgentEvent::Open`].
pub fn connect(
    cfg: AgentConnectConfig,
    init: InitiationData,
    events: mpsc::Sender<AgentEvent>,
) -> AgentHandle {
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    tokio::spawn(run_session(cfg, init, rx, events));
    AgentHandle { tx }
}

/// Mutable session state shared across a fallback reconnect.
#[derive(Debug, Default)]
struct SessionFlags {
    ready: bool,
    agent_has_spoken: bool,
}

enum SocketOutcome {
    /// Transport closed; `graceful` reflects the close code.
    Closed { graceful: bool },
    /// The orchestrator asked for shutdown or went away.
    Finished,
}

async fn run_session(
    cfg: AgentConnectConfig,
    init: InitiationData,
    mut cmd_rx: mpsc::Receiver<AgentCommand>,
    events: mpsc::Sender<AgentEvent>,
) {
    let (mut ws, mut on_direct) = match open_transport(&cfg).await {
        Ok(pair) => pair,
        Err(e) => {
            let _ = events.send(AgentEvent::ConnectFailed(e.to_string())).await;
            return;
        }
    };

    let mut flags = SessionFlags::default();
    loop {
        match drive_socket(ws, &cfg, &init, &mut cmd_rx, &events, &mut flags).await {
            SocketOutcome::Finished => return,
            SocketOutcome::Closed { graceful } => {
                // One retry on the direct transport if the signed one
                // dropped during the handshake window.
                if !graceful && !on_direct && !flags.ready {
                    tracing::warn!("agent transport dropped during handshake, retrying direct");
                    match connect_ws(&cfg.direct_url(), Some(&cfg.api_key)).await {
                        Ok(stream) => {
                            ws = stream;
                            on_direct = true;
                            continue;
                        }
                        Err(e) => {
                            let _ = events.send(AgentEvent::ConnectFailed(e.to_string())).await;
                            return;
                        }
                    }
                }
                let _ = events.send(AgentEvent::Closed { graceful }).await;
                return;
            }
        }
    }
}

/// Try the signed URL first, then fall back to the direct endpoint.
async fn open_transport(cfg: &AgentConnectConfig) -> AgentResult<(WsStream, bool)> {
    match fetch_signed_url(cfg).await {
        Ok(url) => match connect_ws(&url, None).await {
            Ok(ws) => {
                tracing::info!("agent connected via signed URL");
                return Ok((ws, false));
            }
            Err(e) => tracing::warn!(error = %e, "signed transport failed, falling back"),
        },
        Err(e) => tracing::warn!(error = %e, "signed URL unavailable, falling back"),
    }
    let ws = connect_ws(&cfg.direct_url(), Some(&cfg.api_key)).await?;
    tracing::info!("agent connected via direct endpoint");
    Ok((ws, true))
}

async fn fetch_signed_url(cfg: &AgentConnectConfig) -> AgentResult<String> {
    #[derive(Deserialize)]
    struct SignedUrlResponse {
        signed_url: String,
    }

    let request = reqwest::Client::new()
        .get(cfg.signed_url())
        .header(API_KEY_HEADER, cfg.api_key.as_str())
        .send();

    let response = tokio::time::timeout(cfg.signed_url_timeout, request)
        .await
        .map_err(|_| AgentError::SignedUrl("request timed out".into()))?
        .map_err(|e| AgentError::SignedUrl(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AgentError::SignedUrl(format!(
            "unexpected status {}",
            response.status()
        )));
    }

    let body: SignedUrlResponse = response
        .json()
        .await
        .map_err(|e| AgentError::SignedUrl(format!("malformed body: {e}")))?;
    Ok(body.signed_url)
}

async fn connect_ws(url: &str, api_key: Option<&str>) -> AgentResult<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| AgentError::ConnectionFailed(e.to_string()))?;
    if let Some(key) = api_key {
        let value = key
            .parse()
            .map_err(|_| AgentError::ConnectionFailed("API key is not a valid header".into()))?;
        request.headers_mut().insert(API_KEY_HEADER, value);
    }

    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| AgentError::ConnectionFailed(e.to_string()))?;
    Ok(ws)
}

/// Run one transport until it closes or the orchestrator shuts us down.
async fn drive_socket(
    ws: WsStream,
    cfg: &AgentConnectConfig,
    init: &InitiationData,
    cmd_rx: &mut mpsc::Receiver<AgentCommand>,
    events: &mpsc::Sender<AgentEvent>,
    flags: &mut SessionFlags,
) -> SocketOutcome {
    let (mut sink, mut stream) = ws.split();

    // The initiation record goes out before anything else on the socket.
    let record = AgentControl::ConversationInitiationClientData {
        conversation_initiation_client_data: init.clone(),
    };
    if send_json(&mut sink, &record).await.is_err() {
        return SocketOutcome::Closed { graceful: false };
    }
    let _ = events.send(AgentEvent::Open).await;

    let opened = Instant::now();
    let mut metadata_deadline = if flags.ready {
        None
    } else {
        Some(opened + cfg.metadata_fallback)
    };
    let mut nudges: Vec<(Instant, usize)> = AgentConnectConfig::NUDGE_SCHEDULE
        .iter()
        .enumerate()
        .map(|(i, d)| (opened + *d, i))
        .collect();

    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(AgentCommand::Control(control)) => {
                    if send_json(&mut sink, &control).await.is_err() {
                        return SocketOutcome::Closed { graceful: false };
                    }
                }
                Some(AgentCommand::Audio(chunk_b64)) => {
                    let record = AudioChunk { user_audio_chunk: chunk_b64 };
                    if send_json(&mut sink, &record).await.is_err() {
                        return SocketOutcome::Closed { graceful: false };
                    }
                }
                Some(AgentCommand::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "call ended".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    return SocketOutcome::Finished;
                }
            },

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_inbound(&text, &mut sink, events, flags, &mut metadata_deadline, &mut nudges).await;
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let graceful = frame
                        .as_ref()
                        .is_none_or(|f| f.code == CloseCode::Normal);
                    tracing::info!(graceful, "agent socket closed by provider");
                    return SocketOutcome::Closed { graceful };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "agent socket error");
                    return SocketOutcome::Closed { graceful: false };
                }
                None => return SocketOutcome::Closed { graceful: false },
            },

            _ = ticker.tick() => {
                let now = Instant::now();
                if !flags.ready && metadata_deadline.is_some_and(|d| now >= d) {
                    // Provider variant without metadata: proceed with the
                    // line defaults rather than stalling the call.
                    metadata_deadline = None;
                    flags.ready = true;
                    tracing::info!("no agent metadata within fallback window, assuming ulaw_8000");
                    let _ = events.send(AgentEvent::Ready {
                        input_format: AudioFormat::Ulaw8000,
                        output_format: AudioFormat::Ulaw8000,
                        optimistic: true,
                    }).await;
                }
                while let Some(&(deadline, index)) = nudges.first() {
                    if now < deadline {
                        break;
                    }
                    nudges.remove(0);
                    if !flags.agent_has_spoken {
                        tracing::debug!(nudge = index, "agent silent, sending nudge");
                        if send_json(&mut sink, &nudge_message(index)).await.is_err() {
                            return SocketOutcome::Closed { graceful: false };
                        }
                    }
                }
            }
        }
    }
}

async fn handle_inbound(
    text: &str,
    sink: &mut WsSink,
    events: &mpsc::Sender<AgentEvent>,
    flags: &mut SessionFlags,
    metadata_deadline: &mut Option<Instant>,
    nudges: &mut Vec<(Instant, usize)>,
) {
    let record = match classify(text) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed agent record");
            return;
        }
    };

    match record {
        AgentInbound::Metadata {
            input_format,
            output_format,
        } => {
            *metadata_deadline = None;
            if !flags.ready {
                flags.ready = true;
                tracing::info!(?input_format, ?output_format, "agent session ready");
                let _ = events
                    .send(AgentEvent::Ready {
                        input_format,
                        output_format,
                        optimistic: false,
                    })
                    .await;
            }
        }
        AgentInbound::Audio(bytes) => {
            if !flags.agent_has_spoken {
                flags.agent_has_spoken = true;
                nudges.clear();
            }
            let _ = events.send(AgentEvent::Audio(bytes)).await;
        }
        AgentInbound::Ping { event_id } => {
            let _ = send_json(sink, &AgentControl::Pong { event_id }).await;
        }
        AgentInbound::Interruption => {
            let _ = events.send(AgentEvent::Interruption).await;
        }
        AgentInbound::UserTranscript(transcript) => {
            let _ = events.send(AgentEvent::UserTranscript(transcript)).await;
        }
        AgentInbound::AgentResponse(response) => {
            let _ = events.send(AgentEvent::AgentResponse(response)).await;
        }
        AgentInbound::ProviderError(message) => {
            tracing::error!(error = %message, "agent reported an error");
            let _ = events.send(AgentEvent::ProviderError(message)).await;
        }
        AgentInbound::Unknown(tag) => {
            tracing::debug!(tag = %tag, "ignoring unrecognized agent record");
        }
    }
}

async fn send_json<T: Serialize>(sink: &mut WsSink, record: &T) -> AgentResult<()> {
    let json = serde_json::to_string(record).map_err(|e| AgentError::Serialization(e.to_string()))?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| AgentError::ConnectionFailed(e.to_string()))
}
