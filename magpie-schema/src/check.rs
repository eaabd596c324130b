use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque CI check payload.
///
/// The internal shape varies by origin system (different CI vendors emit
/// different documents), so the pipeline carries it as a versioned blob and
/// never interprets `data`. Decoding belongs to downstream consumers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CheckPayload {
    pub version: u32,
    pub origin: String,
    pub data: Value,
}
