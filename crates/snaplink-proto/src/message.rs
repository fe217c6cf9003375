//! Relay frames.
//!
//! Frames are JSON objects discriminated by their `type` field. Most frame
//! kinds map onto a typed [`RelayMessage`] variant through serde. Liveness
//! probes and their `*_response` acks are matched by name, and anything the
//! protocol does not know is preserved verbatim as [`RelayMessage::Other`]
//! so newer peers never break older ones.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::code::PairingCode;
use crate::error::ProtoError;

/// Milliseconds since the Unix epoch, as carried in `ts`/`timestamp` fields.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Screenshot request mode. An absent or unrecognised mode is `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Capture now, then serve the newest buffered item.
    Single,
    /// Serve what is already buffered without capturing.
    Buffer,
    /// A mode this build does not understand.
    #[default]
    #[serde(other)]
    Unknown,
}

impl CaptureMode {
    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Buffer => "buffer",
            Self::Unknown => "unknown",
        }
    }
}

/// Requested capture quality. Unrecognised values fall back to `High`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Smallest thumbnail.
    Low,
    /// Mid-size thumbnail.
    Medium,
    /// Full resolution.
    #[default]
    #[serde(other)]
    High,
}

/// Image list carried by `screenshot-single` / `screenshot-multi`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Encoded images (data URLs), oldest first.
    pub images: Vec<String>,
}

/// Body of a `screenshot_success` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessBody {
    /// Mode that was served (`single`, `buffer`).
    pub mode: String,
    /// Number of images sent.
    pub count: usize,
    /// When the response was produced.
    pub timestamp: i64,
    /// Free-form details about how the request was served.
    #[serde(default)]
    pub details: Value,
}

/// Body of a `screenshot_error` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error category, e.g. `BufferEmpty`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable detail.
    #[serde(default)]
    pub details: String,
    /// When the error was produced.
    pub timestamp: i64,
}

/// Liveness probe kinds. Each has a `<kind>_response` ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// `health_check`
    HealthCheck,
    /// `connection_verify`
    ConnectionVerify,
    /// `connection_alive`
    ConnectionAlive,
    /// `keepalive`
    Keepalive,
    /// `focus_check`
    FocusCheck,
    /// `wake_check`
    WakeCheck,
}

impl ProbeKind {
    const ALL: [ProbeKind; 6] = [
        Self::HealthCheck,
        Self::ConnectionVerify,
        Self::ConnectionAlive,
        Self::Keepalive,
        Self::FocusCheck,
        Self::WakeCheck,
    ];

    /// Wire name of the probe.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check",
            Self::ConnectionVerify => "connection_verify",
            Self::ConnectionAlive => "connection_alive",
            Self::Keepalive => "keepalive",
            Self::FocusCheck => "focus_check",
            Self::WakeCheck => "wake_check",
        }
    }

    /// Look a probe up by wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

/// A relay frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayMessage {
    /// Application heartbeat.
    #[serde(rename = "ping")]
    Ping {
        /// Send time in epoch milliseconds.
        #[serde(default, alias = "timestamp", skip_serializing_if = "Option::is_none")]
        ts: Option<i64>,
    },
    /// Heartbeat ack.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed or local time in epoch milliseconds.
        #[serde(default, alias = "timestamp", skip_serializing_if = "Option::is_none")]
        ts: Option<i64>,
    },
    /// Client announcing itself after joining a code.
    #[serde(rename = "connection_request")]
    ConnectionRequest {
        /// The code the client joined.
        code: PairingCode,
        /// Send time in epoch milliseconds.
        ts: i64,
    },
    /// The counterpart joined the code.
    #[serde(rename = "partner_connected")]
    PartnerConnected,
    /// The counterpart left the code.
    #[serde(rename = "partner_disconnected")]
    PartnerDisconnected,
    /// Remote request for screenshots.
    #[serde(rename = "screenshot_request")]
    ScreenshotRequest {
        /// How to serve the request.
        #[serde(default, deserialize_with = "lenient_mode")]
        mode: CaptureMode,
        /// Maximum number of buffered images to send (buffer mode).
        /// Zero, negative or non-numeric counts mean "all".
        #[serde(
            default,
            deserialize_with = "lenient_count",
            skip_serializing_if = "Option::is_none"
        )]
        count: Option<usize>,
        /// Capture quality (single mode).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quality: Option<Quality>,
    },
    /// One freshly captured image.
    #[serde(rename = "screenshot-single")]
    ScreenshotSingle {
        /// The image.
        payload: ImagePayload,
    },
    /// Several buffered images.
    #[serde(rename = "screenshot-multi")]
    ScreenshotMulti {
        /// The images, oldest first.
        payload: ImagePayload,
    },
    /// A screenshot request was served.
    #[serde(rename = "screenshot_success")]
    ScreenshotSuccess {
        /// Result details.
        success: SuccessBody,
    },
    /// A screenshot request could not be served.
    #[serde(rename = "screenshot_error")]
    ScreenshotError {
        /// Failure details.
        error: ErrorBody,
    },
    /// Liveness probe.
    #[serde(skip)]
    Probe {
        /// Which probe.
        kind: ProbeKind,
        /// Send time in epoch milliseconds.
        timestamp: Option<i64>,
    },
    /// Ack for a liveness probe (`<kind>_response`).
    #[serde(skip)]
    ProbeAck {
        /// Which probe is acknowledged.
        kind: ProbeKind,
    },
    /// A frame type this build does not model. The raw object is kept.
    #[serde(skip)]
    Other {
        /// The `type` discriminator.
        kind: String,
        /// The whole frame.
        body: Value,
    },
}

const TYPED_KINDS: [&str; 10] = [
    "ping",
    "pong",
    "connection_request",
    "partner_connected",
    "partner_disconnected",
    "screenshot_request",
    "screenshot-single",
    "screenshot-multi",
    "screenshot_success",
    "screenshot_error",
];

fn lenient_mode<'de, D>(deserializer: D) -> Result<CaptureMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .filter(|n| *n > 0)
        .and_then(|n| usize::try_from(n).ok()))
}

impl RelayMessage {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtoError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtoError::MissingType)?;

        if let Some(probe) = ProbeKind::from_wire(kind) {
            return Ok(Self::Probe {
                kind: probe,
                timestamp: value.get("timestamp").and_then(Value::as_i64),
            });
        }
        if let Some(ack) = kind.strip_suffix("_response").and_then(ProbeKind::from_wire) {
            return Ok(Self::ProbeAck { kind: ack });
        }
        if TYPED_KINDS.contains(&kind) {
            return Ok(serde_json::from_value(value)?);
        }

        Ok(Self::Other {
            kind: kind.to_string(),
            body: value,
        })
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        let text = match self {
            Self::Probe { kind, timestamp } => {
                json!({ "type": kind.as_str(), "timestamp": timestamp }).to_string()
            }
            Self::ProbeAck { kind } => {
                json!({ "type": format!("{}_response", kind.as_str()) }).to_string()
            }
            Self::Other { body, .. } => body.to_string(),
            typed => serde_json::to_string(typed)?,
        };
        Ok(text)
    }

    /// The wire `type` of this frame.
    pub fn kind(&self) -> &str {
        match self {
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::ConnectionRequest { .. } => "connection_request",
            Self::PartnerConnected => "partner_connected",
            Self::PartnerDisconnected => "partner_disconnected",
            Self::ScreenshotRequest { .. } => "screenshot_request",
            Self::ScreenshotSingle { .. } => "screenshot-single",
            Self::ScreenshotMulti { .. } => "screenshot-multi",
            Self::ScreenshotSuccess { .. } => "screenshot_success",
            Self::ScreenshotError { .. } => "screenshot_error",
            Self::Probe { kind, .. } => kind.as_str(),
            Self::ProbeAck { .. } => "probe_response",
            Self::Other { kind, .. } => kind,
        }
    }

    /// Link-maintenance acks consumed by the connection layer and never
    /// handed to the application.
    pub fn is_internal_ack(&self) -> bool {
        matches!(self, Self::Pong { .. } | Self::ProbeAck { .. })
    }

    /// A heartbeat stamped with the current time.
    pub fn ping() -> Self {
        Self::Ping { ts: Some(now_millis()) }
    }

    /// A heartbeat ack stamped with the current time.
    pub fn pong() -> Self {
        Self::Pong { ts: Some(now_millis()) }
    }

    /// A client announcement for `code`.
    pub fn connection_request(code: PairingCode) -> Self {
        Self::ConnectionRequest {
            code,
            ts: now_millis(),
        }
    }

    /// A liveness probe stamped with the current time.
    pub fn probe(kind: ProbeKind) -> Self {
        Self::Probe {
            kind,
            timestamp: Some(now_millis()),
        }
    }

    /// A `screenshot-single` frame.
    pub fn screenshot_single(image: String) -> Self {
        Self::ScreenshotSingle {
            payload: ImagePayload {
                images: vec![image],
            },
        }
    }

    /// A `screenshot-multi` frame.
    pub fn screenshot_multi(images: Vec<String>) -> Self {
        Self::ScreenshotMulti {
            payload: ImagePayload { images },
        }
    }

    /// A `screenshot_success` frame.
    pub fn screenshot_success(mode: &str, count: usize, details: Value) -> Self {
        Self::ScreenshotSuccess {
            success: SuccessBody {
                mode: mode.to_string(),
                count,
                timestamp: now_millis(),
                details,
            },
        }
    }

    /// A `screenshot_error` frame.
    pub fn screenshot_error(kind: &str, details: impl Into<String>) -> Self {
        Self::ScreenshotError {
            error: ErrorBody {
                kind: kind.to_string(),
                details: details.into(),
                timestamp: now_millis(),
            },
        }
    }
}
