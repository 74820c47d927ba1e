//! Call orchestration
//!
//! One `Call` exists per accepted telephony stream. It owns the pacing
//! counters, the upstream buffer, the turn controller, every named
//! deadline, and the write channels for both sockets. The socket loop in
//! `handler.rs` feeds it three inputs: telephony events, agent events,
//! and a 50 ms tick; everything else is method calls on this struct, so
//! the whole state machine can be driven synchronously in tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::prelude::*;
use serde_json::Value;
use tokio::sync::mpsc;

use super::messages::{TelephonyInbound, TelephonyOutbound, TelephonyRoute, close_codes};
use crate::config::BridgeConfig;
use crate::core::agent::messages::{DynamicVariables, InitiationData};
use crate::core::agent::{self, AgentConnectConfig, AgentControl, AgentEvent, AgentHandle};
use crate::core::audio::{AudioFormat, FramePacer, UpstreamBuffer, codec};
use crate::core::turn::{TurnConfig, TurnController, TurnState};

/// Delay between `user_audio_end` and the processing nudge that forces
/// the agent to commit the utterance.
pub const PROCESSING_NUDGE_DELAY: Duration = Duration::from_millis(250);

/// What the socket loop should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFlow {
    Continue,
    /// Stop the loop; close records have already been queued.
    Terminate,
}

/// Orchestrator's view of the agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AiState {
    /// No `start` event yet, so no session either.
    #[default]
    Idle,
    Connecting,
    /// Transport up; audio may be written.
    Open,
    /// Formats negotiated (or assumed after the fallback window).
    Ready,
}

impl AiState {
    pub fn is_open(self) -> bool {
        matches!(self, AiState::Open | AiState::Ready)
    }
}

pub struct Call {
    pub session_id: String,
    created_at: Instant,
    config: Arc<BridgeConfig>,

    telephony_tx: mpsc::Sender<TelephonyRoute>,
    agent_events_tx: mpsc::Sender<AgentEvent>,
    agent: Option<AgentHandle>,

    stream_sid: Option<String>,
    mode: String,
    caller_phone: String,
    authorized: bool,

    ai_state: AiState,
    input_format: AudioFormat,
    output_format: AudioFormat,

    pacer: FramePacer,
    buffer: UpstreamBuffer,
    turns: TurnController,

    processing_nudge_at: Option<Instant>,
    user_activity_sent: bool,

    total_inbound: u64,
    total_outbound_frames: u64,
    marks_acked: u64,
}

impl Call {
    pub fn new(
        config: Arc<BridgeConfig>,
        telephony_tx: mpsc::Sender<TelephonyRoute>,
        agent_events_tx: mpsc::Sender<AgentEvent>,
        authorized_at_upgrade: bool,
    ) -> Self {
        let turns = TurnController::new(TurnConfig {
            silence: config.silence(),
            max_utterance: config.max_utterance(),
            ..TurnConfig::default()
        });
        let buffer = UpstreamBuffer::new(config.packet_bytes());
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            created_at: Instant::now(),
            config,
            telephony_tx,
            agent_events_tx,
            agent: None,
            stream_sid: None,
            mode: "discovery".to_string(),
            caller_phone: String::new(),
            authorized: authorized_at_upgrade,
            ai_state: AiState::Idle,
            input_format: AudioFormat::Ulaw8000,
            output_format: AudioFormat::Ulaw8000,
            pacer: FramePacer::new(),
            buffer,
            turns,
            processing_nudge_at: None,
            user_activity_sent: false,
            total_inbound: 0,
            total_outbound_frames: 0,
            marks_acked: 0,
        }
    }

    // =========================================================================
    // Telephony events
    // =========================================================================

    pub async fn handle_telephony(&mut self, event: TelephonyInbound, now: Instant) -> CallFlow {
        match event {
            TelephonyInbound::Connected => {
                tracing::trace!(session_id = %self.session_id, "telephony connected");
                CallFlow::Continue
            }
            TelephonyInbound::Start { stream_sid, start } => {
                self.handle_start(stream_sid, start).await
            }
            TelephonyInbound::Media { media } => self.handle_media(media, now).await,
            TelephonyInbound::Mark { mark } => {
                self.marks_acked += 1;
                tracing::trace!(session_id = %self.session_id, mark = %mark.name, "mark acked");
                CallFlow::Continue
            }
            TelephonyInbound::Stop => self.handle_stop(now).await,
            TelephonyInbound::Other => {
                tracing::debug!(session_id = %self.session_id, "ignoring unhandled telephony event");
                CallFlow::Continue
            }
        }
    }

    async fn handle_start(
        &mut self,
        stream_sid: Option<String>,
        start: super::messages::StartMeta,
    ) -> CallFlow {
        let Some(sid) = start.stream_sid.or(stream_sid) else {
            tracing::warn!(session_id = %self.session_id, "start event without stream id");
            self.close_telephony(close_codes::INTERNAL_ERROR, "missing stream id")
                .await;
            return CallFlow::Terminate;
        };
        let params = start.custom_parameters;

        // Auth may have been settled at upgrade; otherwise the start
        // event's token parameter decides.
        if !self.authorized {
            if let Some(expected) = &self.config.auth_token {
                if params.get("token").map(String::as_str) != Some(expected.as_str()) {
                    tracing::warn!(session_id = %self.session_id, "start token mismatch");
                    self.close_telephony(close_codes::POLICY_VIOLATION, "authentication failed")
                        .await;
                    return CallFlow::Terminate;
                }
            }
            self.authorized = true;
        }

        self.stream_sid = Some(sid.clone());
        if let Some(mode) = params.get("mode") {
            self.mode = mode.clone();
        }
        if let Some(phone) = params.get("caller_phone") {
            self.caller_phone = phone.clone();
        }
        let agent_id = params
            .get("agent_id")
            .cloned()
            .unwrap_or_else(|| self.config.agent_id_for_mode(&self.mode).to_string());
        let profile = params.get("profile_b64").and_then(|b64| decode_profile(b64));

        tracing::info!(
            session_id = %self.session_id,
            stream_sid = %sid,
            mode = %self.mode,
            agent_id = %agent_id,
            "call started"
        );

        let init = InitiationData {
            dynamic_variables: DynamicVariables {
                caller_phone: self.caller_phone.clone(),
                mode: self.mode.clone(),
                session_id: self.session_id.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                profile,
            },
        };
        let connect_cfg = AgentConnectConfig {
            api_key: self.config.elevenlabs_api_key.clone(),
            agent_id,
            signed_url_timeout: self.config.signed_url_timeout(),
            metadata_fallback: self.config.metadata_fallback(),
        };
        self.agent = Some(agent::connect(
            connect_cfg,
            init,
            self.agent_events_tx.clone(),
        ));
        self.ai_state = AiState::Connecting;
        CallFlow::Continue
    }

    async fn handle_media(
        &mut self,
        media: super::messages::MediaPayload,
        now: Instant,
    ) -> CallFlow {
        if !media.is_inbound() {
            return CallFlow::Continue;
        }
        let frame = match BASE64_STANDARD.decode(&media.payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "bad media payload");
                return CallFlow::Continue;
            }
        };
        self.total_inbound += 1;

        // Caller speaking over the agent: signal activity once per
        // utterance so the agent can decide to yield.
        if self.turns.state() == TurnState::Idle
            && self.turns.agent_active(now)
            && !self.user_activity_sent
        {
            self.user_activity_sent = true;
            self.send_agent_control(AgentControl::UserActivity).await;
        }

        if self.turns.on_caller_frame(now, self.ai_state.is_open()) {
            self.user_activity_sent = false;
            self.send_agent_control(AgentControl::UserAudioStart).await;
        }

        self.buffer.push(&frame);
        if self.buffer.is_full() && self.ai_state.is_open() {
            self.flush_upstream().await;
        }
        CallFlow::Continue
    }

    async fn handle_stop(&mut self, now: Instant) -> CallFlow {
        tracing::info!(session_id = %self.session_id, "telephony stop");
        self.flush_upstream().await;
        self.turns.force_end(now);
        self.send_agent_control(AgentControl::UserAudioEnd).await;
        self.send_agent_control(AgentControl::user_message("(Call ended)"))
            .await;
        self.close_telephony(close_codes::NORMAL, "stream stopped")
            .await;
        CallFlow::Terminate
    }

    // =========================================================================
    // Agent events
    // =========================================================================

    pub async fn handle_agent(&mut self, event: AgentEvent, now: Instant) -> CallFlow {
        match event {
            AgentEvent::Open => {
                self.ai_state = AiState::Open;
                tracing::info!(session_id = %self.session_id, "agent transport open");
                if self.buffer.is_full() {
                    self.flush_upstream().await;
                }
                CallFlow::Continue
            }
            AgentEvent::Ready {
                input_format,
                output_format,
                optimistic,
            } => {
                self.ai_state = AiState::Ready;
                self.input_format = input_format;
                self.output_format = output_format;
                tracing::info!(
                    session_id = %self.session_id,
                    ?input_format,
                    ?output_format,
                    optimistic,
                    "agent session ready"
                );
                // Audio that piled up while connecting goes out now, in
                // arrival order.
                self.flush_upstream().await;
                CallFlow::Continue
            }
            AgentEvent::Audio(bytes) => {
                self.handle_agent_audio(&bytes, now).await;
                CallFlow::Continue
            }
            AgentEvent::Interruption => {
                if let Some(sid) = self.stream_sid.clone() {
                    tracing::debug!(session_id = %self.session_id, "interruption, clearing playout");
                    self.send_telephony(TelephonyOutbound::clear(&sid)).await;
                }
                CallFlow::Continue
            }
            AgentEvent::UserTranscript(text) => {
                tracing::debug!(session_id = %self.session_id, transcript = %text, "user transcript");
                CallFlow::Continue
            }
            AgentEvent::AgentResponse(text) => {
                tracing::debug!(session_id = %self.session_id, response = %text, "agent response");
                CallFlow::Continue
            }
            AgentEvent::ProviderError(message) => {
                tracing::error!(session_id = %self.session_id, error = %message, "agent error, terminating");
                self.close_telephony(close_codes::INTERNAL_ERROR, "agent error")
                    .await;
                CallFlow::Terminate
            }
            AgentEvent::ConnectFailed(message) => {
                tracing::error!(session_id = %self.session_id, error = %message, "agent unreachable");
                self.close_telephony(close_codes::INTERNAL_ERROR, "agent unreachable")
                    .await;
                CallFlow::Terminate
            }
            AgentEvent::Closed { graceful } => {
                tracing::info!(session_id = %self.session_id, graceful, "agent socket closed");
                let code = if graceful {
                    close_codes::NORMAL
                } else {
                    close_codes::INTERNAL_ERROR
                };
                self.close_telephony(code, "agent session ended").await;
                CallFlow::Terminate
            }
        }
    }

    async fn handle_agent_audio(&mut self, payload: &[u8], now: Instant) {
        if self.turns.on_agent_audio(now) {
            tracing::debug!(session_id = %self.session_id, "agent took the floor, caller turn reset");
            self.processing_nudge_at = None;
        }

        // Pacing needs the stream id from the start event.
        let Some(sid) = self.stream_sid.clone() else {
            tracing::warn!(session_id = %self.session_id, "agent audio before stream start, dropping");
            return;
        };

        for frame in self.pacer.push(payload, self.output_format) {
            let payload_b64 = BASE64_STANDARD.encode(&frame.payload);
            self.send_telephony(TelephonyOutbound::media(
                &sid,
                frame.seq,
                frame.chunk,
                frame.ts_ms,
                payload_b64,
            ))
            .await;
            self.send_telephony(TelephonyOutbound::mark(&sid, frame.chunk))
                .await;
            self.total_outbound_frames += 1;
            if frame.seq % self.config.log_frame_sample == 0 {
                tracing::debug!(
                    session_id = %self.session_id,
                    seq = frame.seq,
                    chunk = frame.chunk,
                    ts_ms = frame.ts_ms,
                    "outbound frame"
                );
            }
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Advance every deadline. Called on the loop's 50 ms tick.
    pub async fn on_tick(&mut self, now: Instant) {
        if let Some(end) = self.turns.on_tick(now) {
            tracing::debug!(session_id = %self.session_id, reason = ?end, "caller turn ended");
            self.flush_upstream().await;
            self.send_agent_control(AgentControl::UserAudioEnd).await;
            self.processing_nudge_at = Some(now + PROCESSING_NUDGE_DELAY);
        }

        if self.processing_nudge_at.is_some_and(|d| now >= d) {
            self.processing_nudge_at = None;
            self.send_agent_control(AgentControl::UserActivity).await;
        }

        // Periodic flush: catches packets completed while the agent was
        // still connecting.
        if self.buffer.is_full() && self.ai_state.is_open() {
            self.flush_upstream().await;
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Final cleanup after the socket loop exits, on every path.
    pub async fn finish(self) {
        if let Some(agent) = &self.agent {
            agent.close().await;
        }
        tracing::info!(
            session_id = %self.session_id,
            duration_ms = self.created_at.elapsed().as_millis() as u64,
            total_inbound = self.total_inbound,
            total_outbound_frames = self.total_outbound_frames,
            marks_acked = self.marks_acked,
            "call finished"
        );
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Send the entire upstream buffer as one packet in the agent's input
    /// format. A flush before the transport is open, or of an empty
    /// buffer, is a no-op; the audio stays buffered for the ready flush.
    async fn flush_upstream(&mut self) {
        if !self.ai_state.is_open() {
            return;
        }
        let Some(agent) = &self.agent else {
            return;
        };
        let Some(mulaw) = self.buffer.take() else {
            return;
        };

        let payload = match self.input_format {
            AudioFormat::Ulaw8000 => mulaw.to_vec(),
            AudioFormat::Pcm16k => {
                let samples = codec::mulaw_decode(&mulaw);
                codec::samples_to_pcm_bytes(&codec::upsample_8k_to_16k(&samples))
            }
            AudioFormat::Pcm8k => {
                let samples = codec::mulaw_decode(&mulaw);
                codec::samples_to_pcm_bytes(&samples)
            }
        };

        if let Err(e) = agent.send_audio(BASE64_STANDARD.encode(&payload)).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "dropping upstream packet");
        }
    }

    async fn send_agent_control(&self, control: AgentControl) {
        let Some(agent) = &self.agent else {
            tracing::trace!(session_id = %self.session_id, "no agent session for control record");
            return;
        };
        if let Err(e) = agent.send_control(control).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "agent control send failed");
        }
    }

    async fn send_telephony(&self, record: TelephonyOutbound) {
        if self
            .telephony_tx
            .send(TelephonyRoute::Outgoing(record))
            .await
            .is_err()
        {
            tracing::warn!(session_id = %self.session_id, "telephony writer gone, frame dropped");
        }
    }

    async fn close_telephony(&self, code: u16, reason: &'static str) {
        let _ = self
            .telephony_tx
            .send(TelephonyRoute::Close { code, reason })
            .await;
    }
}

fn decode_profile(b64: &str) -> Option<Value> {
    let bytes = BASE64_STANDARD
        .decode(b64)
        .map_err(|e| tracing::warn!(error = %e, "profile_b64 is not valid base64"))
        .ok()?;
    serde_json::from_slice(&bytes)
        .map_err(|e| tracing::warn!(error = %e, "profile_b64 is not valid JSON"))
        .ok()
}
