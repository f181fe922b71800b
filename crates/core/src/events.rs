use serde::{Deserialize, Serialize};

/// Fan-out scope for an outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// All subscribers of the resource room.
    Room,
    /// Only the originating user's sessions (all of that user's tabs).
    User,
    /// Every connection on this instance.
    Global,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

/// Static declaration of a logical event: its wire name, fan-out scope,
/// and optional retry policy for cross-instance delivery (the pub/sub bus
/// itself is out of core scope; this table is the interface it would read).
#[derive(Debug, Clone, Copy)]
pub struct EventRoute {
    pub wire_name: &'static str,
    pub scope: FanOut,
    pub retry: Option<RetryPolicy>,
}

macro_rules! event_route {
    ($name:ident, $wire:expr, $scope:expr) => {
        pub const $name: EventRoute = EventRoute {
            wire_name: $wire,
            scope: $scope,
            retry: None,
        };
    };
    ($name:ident, $wire:expr, $scope:expr, retry($max:expr, $backoff:expr)) => {
        pub const $name: EventRoute = EventRoute {
            wire_name: $wire,
            scope: $scope,
            retry: Some(RetryPolicy {
                max_retries: $max,
                backoff_ms: $backoff,
            }),
        };
    };
}

event_route!(CONNECTED, "CONNECTED", FanOut::User);
event_route!(CONNECT_ERROR, "CONNECT_ERROR", FanOut::User);
event_route!(RESOURCE_JOINED, "resource:joined", FanOut::User);
event_route!(RESOURCE_LEFT, "resource:left", FanOut::User);
event_route!(USER_JOINED, "user:joined", FanOut::Room, retry(3, 200));
event_route!(USER_LEFT, "user:left", FanOut::Room, retry(3, 200));
event_route!(RESOURCE_ALL_USERS, "resource:all_users", FanOut::User);
event_route!(LOCK_ACQUIRED, "LOCK_ACQUIRED", FanOut::Room, retry(3, 200));
event_route!(LOCK_RELEASED, "LOCK_RELEASED", FanOut::Room, retry(3, 200));
event_route!(LOCK_STOLEN, "LOCK_STOLEN", FanOut::Room, retry(3, 200));
event_route!(SERVER_SHUTDOWN, "SERVER_SHUTDOWN", FanOut::Global);

/// A JSON wire frame: `{ event, payload }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame<T> {
    pub event: String,
    pub payload: T,
}

impl<T: Serialize> Frame<T> {
    #[must_use]
    pub fn new(route: &EventRoute, payload: T) -> Self {
        Self {
            event: route.wire_name.to_string(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_events_carry_a_retry_policy() {
        assert!(USER_JOINED.retry.is_some());
        assert_eq!(USER_JOINED.scope, FanOut::Room);
    }

    #[test]
    fn user_scoped_events_have_no_retry_policy() {
        assert!(CONNECTED.retry.is_none());
        assert_eq!(CONNECTED.scope, FanOut::User);
    }

    #[test]
    fn frame_wraps_wire_name_and_payload() {
        let frame = Frame::new(&CONNECTED, serde_json::json!({"socketId": "s1"}));
        assert_eq!(frame.event, "CONNECTED");
    }
}
