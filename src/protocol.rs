use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, SignalError};

pub const LOGIN: &str = "login";
pub const OFFER: &str = "offer";
pub const ANSWER: &str = "answer";
pub const CANDIDATE: &str = "candidate";

// Handshake: client announces itself right after the socket opens
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoginMessage {
    pub signal: String,
    pub login: String,
}

impl LoginMessage {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            signal: LOGIN.to_string(),
            login: login.into(),
        }
    }
}

/// Envelope used for both directions. Inbound frames of any kind decode into
/// it, so callers must look at [`SignalMessage::kind`] themselves.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SignalMessage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub signal: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub peer: String,
    // The actual SDP or ICE candidate, never interpreted here
    #[serde(default)]
    pub data: Value,
    // Only present when offer correlation is enabled. Non-string ids from the
    // server are not ours and read as `None`.
    #[serde(
        default,
        deserialize_with = "string_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(id) => Some(id),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalKind {
    Login,
    Offer,
    Answer,
    Candidate,
    Other(String),
}

impl SignalKind {
    pub fn as_str(&self) -> &str {
        match self {
            SignalKind::Login => LOGIN,
            SignalKind::Offer => OFFER,
            SignalKind::Answer => ANSWER,
            SignalKind::Candidate => CANDIDATE,
            SignalKind::Other(other) => other,
        }
    }
}

impl From<&str> for SignalKind {
    fn from(value: &str) -> Self {
        match value {
            LOGIN => SignalKind::Login,
            OFFER => SignalKind::Offer,
            ANSWER => SignalKind::Answer,
            CANDIDATE => SignalKind::Candidate,
            other => SignalKind::Other(other.to_string()),
        }
    }
}

impl SignalMessage {
    pub fn new(kind: SignalKind, peer: impl Into<String>, data: Value) -> Self {
        Self {
            signal: kind.as_str().to_string(),
            peer: peer.into(),
            data,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn kind(&self) -> SignalKind {
        SignalKind::from(self.signal.as_str())
    }

    /// Decodes a raw inbound frame.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(SignalError::Decode)
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(SignalError::Encode)
    }
}

pub fn encode_login(login: &str) -> Result<String> {
    serde_json::to_string(&LoginMessage::new(login)).map_err(SignalError::Encode)
}

/// Parses caller payload bytes into a neutral JSON value and wraps them into a
/// signal frame. Payloads that are not valid JSON are rejected.
pub fn encode_signal(
    kind: SignalKind,
    peer: &str,
    payload: &[u8],
    id: Option<&str>,
) -> Result<String> {
    let data: Value = serde_json::from_slice(payload).map_err(SignalError::Encode)?;
    let mut message = SignalMessage::new(kind, peer, data);
    if let Some(id) = id {
        message = message.with_id(id);
    }
    message.encode()
}

/// Reads only the correlation id of an inbound frame, if it has one.
pub(crate) fn correlation_id(raw: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(default, deserialize_with = "string_id")]
        id: Option<String>,
    }

    serde_json::from_slice::<Envelope>(raw)
        .ok()
        .and_then(|envelope| envelope.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_wire_shape() {
        let text = encode_login("alice").unwrap();
        assert_eq!(text, r#"{"signal":"login","login":"alice"}"#);
    }

    #[test]
    fn signal_wire_shape_without_id() {
        let text = encode_signal(SignalKind::Offer, "bob", br#"{"sdp":"v=0"}"#, None).unwrap();
        assert_eq!(text, r#"{"signal":"offer","peer":"bob","data":{"sdp":"v=0"}}"#);
    }

    #[test]
    fn signal_carries_id_when_correlated() {
        let text = encode_signal(SignalKind::Offer, "bob", b"null", Some("42")).unwrap();
        assert_eq!(text, r#"{"signal":"offer","peer":"bob","data":null,"id":"42"}"#);
        assert_eq!(correlation_id(text.as_bytes()).as_deref(), Some("42"));
    }

    #[test]
    fn candidate_payload_survives_round_trip() {
        let payload = json!({"x": 1, "nested": {"list": [1, "two", null, {"z": false}]}});
        let text = encode_signal(
            SignalKind::Candidate,
            "p1",
            payload.to_string().as_bytes(),
            None,
        )
        .unwrap();

        let decoded = SignalMessage::decode(text.as_bytes()).unwrap();
        assert_eq!(decoded.kind(), SignalKind::Candidate);
        assert_eq!(decoded.peer, "p1");
        assert_eq!(decoded.data, payload);
    }

    #[test]
    fn payload_key_order_is_kept() {
        let text = encode_signal(SignalKind::Answer, "p", br#"{"b":1,"a":2}"#, None).unwrap();
        assert!(text.ends_with(r#""data":{"b":1,"a":2}}"#));
    }

    #[test]
    fn invalid_payload_is_an_encode_error() {
        let err = encode_signal(SignalKind::Candidate, "p1", b"{not json", None).unwrap_err();
        assert!(matches!(err, SignalError::Encode(_)));
    }

    #[test]
    fn unknown_kinds_still_decode() {
        let decoded = SignalMessage::decode(br#"{"signal":"welcome"}"#).unwrap();
        assert_eq!(decoded.kind(), SignalKind::Other("welcome".into()));
        assert_eq!(decoded.peer, "");
        assert_eq!(decoded.data, Value::Null);
    }

    #[test]
    fn null_fields_decode_as_empty() {
        let decoded = SignalMessage::decode(br#"{"signal":"offer","peer":null,"data":{}}"#).unwrap();
        assert_eq!(decoded.kind(), SignalKind::Offer);
        assert_eq!(decoded.peer, "");
        assert_eq!(decoded.data, serde_json::json!({}));

        let decoded = SignalMessage::decode(br#"{"signal":null,"peer":"bob","data":null}"#).unwrap();
        assert_eq!(decoded.signal, "");
        assert_eq!(decoded.peer, "bob");
    }

    #[test]
    fn foreign_ids_and_extra_fields_are_tolerated() {
        let raw = br#"{"signal":"offer","peer":"bob","data":{},"id":7,"seq":12}"#;
        let decoded = SignalMessage::decode(raw).unwrap();
        assert_eq!(decoded.kind(), SignalKind::Offer);
        assert_eq!(decoded.peer, "bob");
        assert_eq!(decoded.id, None);
        assert_eq!(correlation_id(raw), None);

        let decoded = SignalMessage::decode(br#"{"signal":"answer","id":"abc"}"#).unwrap();
        assert_eq!(decoded.id.as_deref(), Some("abc"));
    }

    #[test]
    fn non_object_frame_fails_to_decode() {
        assert!(matches!(
            SignalMessage::decode(b"[1,2]"),
            Err(SignalError::Decode(_))
        ));
        assert_eq!(correlation_id(b"[1,2]"), None);
    }
}
