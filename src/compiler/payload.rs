//! Stored form of a compiled unit
//!
//! `{ "format": 1, "digest": "<sha256 of body>", "body": "<json>" }`

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::UnitBody;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: u32,
    digest: String,
    body: String,
}

/// Hash text using SHA256
pub fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn encode(body: &UnitBody) -> Result<Vec<u8>, String> {
    let body = serde_json::to_string(body).map_err(|e| e.to_string())?;
    let envelope = Envelope {
        format: FORMAT_VERSION,
        digest: hash_source(&body),
        body,
    };
    serde_json::to_vec(&envelope).map_err(|e| e.to_string())
}

pub(crate) fn decode(payload: &[u8]) -> Result<UnitBody, String> {
    let envelope: Envelope =
        serde_json::from_slice(payload).map_err(|e| format!("Unreadable payload: {}", e))?;

    if envelope.format != FORMAT_VERSION {
        return Err(format!("Unsupported payload format {}", envelope.format));
    }
    if hash_source(&envelope.body) != envelope.digest {
        return Err("Payload digest does not match its body".to_string());
    }

    serde_json::from_str(&envelope.body).map_err(|e| format!("Unreadable unit body: {}", e))
}
