//! Blob codec for stored analysis results
//!
//! Payloads are JSON documents wrapped in a versioned envelope:
//! `{"version": 1, "analysis": {"kind": "success", ...}}`.
//! Decoding never panics; anything unreadable comes back as a `DecodeError`.

use crate::analysis::AnalysisResult;
use serde::{Deserialize, Serialize};

/// Version written into every payload
pub const PAYLOAD_VERSION: u32 = 1;

/// Reasons a stored payload could not be turned back into an `AnalysisResult`
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Truncated,

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    analysis: &'a AnalysisResult,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Deserialize)]
struct Envelope {
    analysis: AnalysisResult,
}

/// Serialize an analysis result into a payload blob
pub fn encode(result: &AnalysisResult) -> Vec<u8> {
    serde_json::to_vec(&EnvelopeRef {
        version: PAYLOAD_VERSION,
        analysis: result,
    })
    // Only string keys and plain data: serialization cannot fail.
    .expect("analysis results always serialize")
}

/// Deserialize a payload blob written by `encode`
pub fn decode(bytes: &[u8]) -> Result<AnalysisResult, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Truncated);
    }

    let header: Header = serde_json::from_slice(bytes)?;
    if header.version != PAYLOAD_VERSION {
        return Err(DecodeError::UnsupportedVersion(header.version));
    }

    let envelope: Envelope = serde_json::from_slice(bytes)?;
    Ok(envelope.analysis)
}
