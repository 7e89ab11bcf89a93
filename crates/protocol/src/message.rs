use std::collections::HashMap;

use {
    bytes::Bytes,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::{INITIAL_TTL, SpokeEnvelope, ids::VirtualAddress};

/// A routed unit of communication.
///
/// Only `ttl` changes while the message moves through the fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub source: VirtualAddress,
    pub destination: VirtualAddress,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(with = "base64_bytes", default)]
    pub payload: Bytes,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub ttl: i32,
    #[serde(default)]
    pub priority: i32,
}

impl Message {
    pub fn new(
        source: impl Into<VirtualAddress>,
        destination: impl Into<VirtualAddress>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: String::new(),
            source: source.into(),
            destination: destination.into(),
            tenant_id: tenant_id.into(),
            payload: Bytes::new(),
            headers: HashMap::new(),
            timestamp: Utc::now(),
            ttl: INITIAL_TTL,
            priority: 0,
        }
    }

    /// Build the routed message for a frame read from a spoke.
    ///
    /// The whole raw frame becomes the payload.
    pub fn from_envelope(
        envelope: SpokeEnvelope,
        source: VirtualAddress,
        tenant_id: impl Into<String>,
        raw: Bytes,
    ) -> Self {
        Self {
            id: envelope.id,
            kind: envelope.kind,
            source,
            destination: VirtualAddress::from(envelope.destination),
            tenant_id: tenant_id.into(),
            payload: raw,
            headers: HashMap::new(),
            timestamp: Utc::now(),
            ttl: INITIAL_TTL,
            priority: 0,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_ttl(mut self, ttl: i32) -> Self {
        self.ttl = ttl;
        self
    }
}

mod base64_bytes {
    use {
        base64::{Engine, engine::general_purpose::STANDARD},
        bytes::Bytes,
        serde::{Deserialize, Deserializer, Serializer, de::Error},
    };

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}
