use serde::Serialize;

/// A frame ready to be pushed onto a connection's transport task. The
/// transport task (see `ws::session`) owns the actual salvo `WebSocket`
/// sink and serializes this to a text frame.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub event: String,
    pub payload: serde_json::Value,
}

impl OutboundFrame {
    pub fn new(event: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            event: event.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    #[must_use]
    pub fn to_wire_json(&self) -> serde_json::Value {
        serde_json::json!({ "event": self.event, "payload": self.payload })
    }
}
