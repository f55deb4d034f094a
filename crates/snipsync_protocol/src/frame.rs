//! Live-channel frame codec.
//!
//! Each frame on the live channel is a JSON object
//! `{"type": "created"|"updated"|"deleted", "data": {...}}` where `data` is a
//! partial snippet payload. Unknown `data` fields (`organizationId`,
//! `projectId`, future additions) are accepted and ignored.

use crate::action::{ActionKind, SnippetDelta, UpdateAction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while decoding a live frame.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The frame is not valid JSON or is missing required fields.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame's `type` field is not a known action kind.
    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct LiveFrame {
    #[serde(rename = "type")]
    kind: String,
    data: SnippetDelta,
}

/// Decodes one live-channel frame into an update action.
pub fn decode_frame(text: &str) -> Result<UpdateAction, FrameError> {
    let frame: LiveFrame = serde_json::from_str(text)?;
    let kind =
        ActionKind::from_wire_str(&frame.kind).ok_or(FrameError::UnknownType(frame.kind))?;
    Ok(UpdateAction {
        kind,
        delta: frame.data,
    })
}

/// Encodes an update action as a live-channel frame.
pub fn encode_frame(action: &UpdateAction) -> String {
    let frame = LiveFrame {
        kind: action.kind.as_wire_str().into(),
        data: action.delta.clone(),
    };
    // A frame built from well-formed types always serializes.
    serde_json::to_string(&frame).unwrap_or_default()
}
