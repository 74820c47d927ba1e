//! Agent WebSocket protocol records
//!
//! Outbound records are typed serde enums. Inbound records are
//! classified through a `serde_json::Value` probe instead: provider
//! variants disagree on where they nest audio and metadata, so one
//! extractor checks the known field paths in order and unknown tags are
//! surfaced for logging rather than failing the call.

use base64::prelude::*;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::core::audio::AudioFormat;

// =============================================================================
// Outbound records (bridge -> agent)
// =============================================================================

/// Control records sent on the agent socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentControl {
    /// Session initiation carrying dynamic variables. No voice or prompt
    /// overrides are sent; the agent's own configuration rules.
    ConversationInitiationClientData {
        conversation_initiation_client_data: InitiationData,
    },
    /// The caller started speaking.
    UserAudioStart,
    /// The caller finished an utterance.
    UserAudioEnd,
    /// The caller is active while the agent holds the floor (barge-in),
    /// also used as the post-utterance processing nudge.
    UserActivity,
    /// Nudge variant that asks the agent to open the conversation.
    ConversationStart,
    /// Short textual nudge or terminal note.
    UserMessage { user_message: UserMessageBody },
    /// Keepalive reply echoing the ping's event id.
    Pong { event_id: Value },
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiationData {
    pub dynamic_variables: DynamicVariables,
}

#[derive(Debug, Clone, Serialize)]
pub struct DynamicVariables {
    pub caller_phone: String,
    pub mode: String,
    pub session_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserMessageBody {
    pub message: String,
}

impl AgentControl {
    pub fn user_message(message: impl Into<String>) -> Self {
        AgentControl::UserMessage {
            user_message: UserMessageBody {
                message: message.into(),
            },
        }
    }
}

/// Caller audio record. Deliberately untagged: the wire shape is a bare
/// `{"user_audio_chunk": "<base64>"}` object.
#[derive(Debug, Clone, Serialize)]
pub struct AudioChunk {
    pub user_audio_chunk: String,
}

// =============================================================================
// Inbound classification (agent -> bridge)
// =============================================================================

/// Classified inbound record.
#[derive(Debug)]
pub enum AgentInbound {
    Metadata {
        input_format: AudioFormat,
        output_format: AudioFormat,
    },
    Audio(Bytes),
    Ping {
        event_id: Value,
    },
    Interruption,
    UserTranscript(String),
    AgentResponse(String),
    ProviderError(String),
    /// Unrecognized record; the tag (or `<untagged>`) for diagnostics.
    Unknown(String),
}

/// Classify one inbound text frame.
///
/// Returns `Err` only on malformed JSON; every well-formed record maps to
/// a variant, with unrecognized ones landing in [`AgentInbound::Unknown`].
pub fn classify(text: &str) -> Result<AgentInbound, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;

    // An error field anywhere at the top level is fatal, whatever the tag.
    if let Some(err) = value.get("error") {
        return Ok(AgentInbound::ProviderError(compact(err)));
    }

    let tag = value.get("type").and_then(Value::as_str).unwrap_or("");
    match tag {
        "error" => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified provider error");
            return Ok(AgentInbound::ProviderError(message.to_string()));
        }
        "conversation_initiation_metadata" => return Ok(parse_metadata(&value)),
        "ping" => {
            let event_id = value
                .get("event_id")
                .or_else(|| value.get("ping_event").and_then(|p| p.get("event_id")))
                .cloned()
                .unwrap_or(Value::Null);
            return Ok(AgentInbound::Ping { event_id });
        }
        "interruption" => return Ok(AgentInbound::Interruption),
        "user_transcript" => {
            return Ok(AgentInbound::UserTranscript(nested_text(
                &value,
                "user_transcript_event",
                "user_transcript",
            )));
        }
        "agent_response" => {
            return Ok(AgentInbound::AgentResponse(nested_text(
                &value,
                "agent_response_event",
                "agent_response",
            )));
        }
        _ => {}
    }

    // Audio arrives under several field names depending on the provider
    // variant; probe them in order regardless of the tag.
    if let Some(b64) = extract_audio_b64(&value) {
        return match BASE64_STANDARD.decode(b64) {
            Ok(bytes) => Ok(AgentInbound::Audio(Bytes::from(bytes))),
            Err(e) => {
                tracing::warn!(error = %e, "agent audio payload is not valid base64");
                Ok(AgentInbound::Unknown(format!("{tag}(bad base64)")))
            }
        };
    }

    Ok(AgentInbound::Unknown(if tag.is_empty() {
        "<untagged>".to_string()
    } else {
        tag.to_string()
    }))
}

/// Probe the known audio field paths in order.
fn extract_audio_b64(value: &Value) -> Option<&str> {
    const PATHS: [&[&str]; 6] = [
        &["audio"],
        &["audio_event", "audio_base_64"],
        &["audio", "chunk"],
        &["tts", "audio"],
        &["response", "audio"],
        &["chunk"],
    ];
    for path in PATHS {
        let mut cursor = Some(value);
        for key in path {
            cursor = cursor.and_then(|v| v.get(key));
        }
        if let Some(s) = cursor.and_then(Value::as_str) {
            return Some(s);
        }
    }
    None
}

fn parse_metadata(value: &Value) -> AgentInbound {
    // The event body may be nested under either metadata key, or the
    // format fields may sit at the top level.
    let body = value
        .get("conversation_initiation_metadata_event")
        .or_else(|| value.get("conversation_initiation_metadata"))
        .unwrap_or(value);

    let fmt = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .map(AudioFormat::from_wire)
            .unwrap_or_default()
    };

    AgentInbound::Metadata {
        input_format: fmt("user_input_audio_format"),
        output_format: fmt("agent_output_audio_format"),
    }
}

fn nested_text(value: &Value, event_key: &str, field: &str) -> String {
    value
        .get(event_key)
        .and_then(|e| e.get(field))
        .or_else(|| value.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_records_serialize_to_wire_shapes() {
        let json = serde_json::to_string(&AgentControl::UserAudioStart).unwrap();
        assert_eq!(json, r#"{"type":"user_audio_start"}"#);

        let json = serde_json::to_string(&AgentControl::user_message("Hello")).unwrap();
        assert_eq!(
            json,
            r#"{"type":"user_message","user_message":{"message":"Hello"}}"#
        );

        let json = serde_json::to_string(&AgentControl::Pong {
            event_id: Value::from(17),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"pong","event_id":17}"#);
    }

    #[test]
    fn audio_chunk_is_untagged() {
        let json = serde_json::to_string(&AudioChunk {
            user_audio_chunk: "AAAA".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"user_audio_chunk":"AAAA"}"#);
    }

    #[test]
    fn initiation_omits_absent_profile() {
        let init = AgentControl::ConversationInitiationClientData {
            conversation_initiation_client_data: InitiationData {
                dynamic_variables: DynamicVariables {
                    caller_phone: "+15550100".into(),
                    mode: "discovery".into(),
                    session_id: "s1".into(),
                    timestamp: "2025-01-01T00:00:00Z".into(),
                    profile: None,
                },
            },
        };
        let json = serde_json::to_string(&init).unwrap();
        assert!(json.contains(r#""type":"conversation_initiation_client_data""#));
        assert!(json.contains(r#""dynamic_variables""#));
        assert!(!json.contains("profile"));
    }

    #[test]
    fn classifies_nested_metadata() {
        let msg = r#"{
            "type": "conversation_initiation_metadata",
            "conversation_initiation_metadata_event": {
                "user_input_audio_format": "pcm_16000",
                "agent_output_audio_format": "ulaw_8000"
            }
        }"#;
        match classify(msg).unwrap() {
            AgentInbound::Metadata {
                input_format,
                output_format,
            } => {
                assert_eq!(input_format, AudioFormat::Pcm16k);
                assert_eq!(output_format, AudioFormat::Ulaw8000);
            }
            other => panic!("expected Metadata, got {other:?}"),
        }
    }

    #[test]
    fn metadata_without_formats_defaults_to_ulaw() {
        let msg = r#"{"type":"conversation_initiation_metadata"}"#;
        match classify(msg).unwrap() {
            AgentInbound::Metadata {
                input_format,
                output_format,
            } => {
                assert_eq!(input_format, AudioFormat::Ulaw8000);
                assert_eq!(output_format, AudioFormat::Ulaw8000);
            }
            other => panic!("expected Metadata, got {other:?}"),
        }
    }

    #[test]
    fn classifies_audio_in_every_known_shape() {
        let b64 = BASE64_STANDARD.encode([1u8, 2, 3]);
        let shapes = [
            format!(r#"{{"type":"audio","audio":"{b64}"}}"#),
            format!(r#"{{"type":"audio","audio_event":{{"audio_base_64":"{b64}"}}}}"#),
            format!(r#"{{"audio":{{"chunk":"{b64}"}}}}"#),
            format!(r#"{{"tts":{{"audio":"{b64}"}}}}"#),
            format!(r#"{{"response":{{"audio":"{b64}"}}}}"#),
            format!(r#"{{"chunk":"{b64}"}}"#),
        ];
        for shape in &shapes {
            match classify(shape).unwrap() {
                AgentInbound::Audio(bytes) => assert_eq!(&bytes[..], &[1, 2, 3]),
                other => panic!("shape {shape} classified as {other:?}"),
            }
        }
    }

    #[test]
    fn classifies_ping_with_nested_event_id() {
        let msg = r#"{"type":"ping","ping_event":{"event_id":42}}"#;
        match classify(msg).unwrap() {
            AgentInbound::Ping { event_id } => assert_eq!(event_id, Value::from(42)),
            other => panic!("expected Ping, got {other:?}"),
        }
    }

    #[test]
    fn error_field_is_fatal_whatever_the_tag() {
        let msg = r#"{"type":"audio","error":"quota exceeded"}"#;
        match classify(msg).unwrap() {
            AgentInbound::ProviderError(e) => assert_eq!(e, "quota exceeded"),
            other => panic!("expected ProviderError, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tags_are_preserved_for_logging() {
        match classify(r#"{"type":"vad_score","score":0.9}"#).unwrap() {
            AgentInbound::Unknown(tag) => assert_eq!(tag, "vad_score"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(classify("not json").is_err());
    }

    #[test]
    fn transcripts_are_diagnostic() {
        let msg = r#"{"type":"user_transcript","user_transcript_event":{"user_transcript":"hi"}}"#;
        match classify(msg).unwrap() {
            AgentInbound::UserTranscript(t) => assert_eq!(t, "hi"),
            other => panic!("expected UserTranscript, got {other:?}"),
        }
    }
}
