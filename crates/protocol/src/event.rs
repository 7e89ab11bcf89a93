//! CloudEvents 1.0 envelope for hub events shared across a fleet.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

pub const SPEC_VERSION: &str = "1.0";

/// Event types emitted by the hub.
pub mod types {
    pub const SPOKE_CONNECTED: &str = "spoke.connected";
    pub const SPOKE_DISCONNECTED: &str = "spoke.disconnected";
    pub const MESSAGE_BROADCAST: &str = "message.broadcast";
    pub const MESSAGE_FORWARDED: &str = "message.forwarded";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    /// Empty until assigned at publish time.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenantid: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl CloudEvent {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            specversion: SPEC_VERSION.into(),
            event_type: event_type.into(),
            source: source.into(),
            id: String::new(),
            time: None,
            subject: String::new(),
            tenantid: String::new(),
            data,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenantid = tenant.into();
        self
    }

    /// Fill in `id` and `time` when the publisher left them empty.
    pub fn stamp(&mut self) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        if self.time.is_none() {
            self.time = Some(Utc::now());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn stamp_keeps_existing_id() {
        let mut ev = CloudEvent::new(types::SPOKE_CONNECTED, "hub-a", serde_json::json!({}));
        ev.id = "fixed".into();
        ev.stamp();
        assert_eq!(ev.id, "fixed");
        assert!(ev.time.is_some());
    }

    #[test]
    fn serializes_cloudevents_attribute_names() {
        let mut ev = CloudEvent::new(types::MESSAGE_BROADCAST, "hub-a", serde_json::json!({"n": 1}))
            .with_tenant("t1")
            .with_subject("m-1");
        ev.stamp();
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["specversion"], "1.0");
        assert_eq!(v["type"], "message.broadcast");
        assert_eq!(v["tenantid"], "t1");
        assert_eq!(v["subject"], "m-1");
        assert!(v["time"].is_string());
    }
}
