//! Typed dispatch events, built from an envelope's `t` and `d` after decoding.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::GatewayError;
use crate::models::{Guild, Member, Message, Ready, User};

/// Well-known event type names.
pub mod names {
    pub const READY: &str = "READY";
    pub const MESSAGE_CREATE: &str = "MESSAGE_CREATE";
    pub const GUILD_CREATE: &str = "GUILD_CREATE";
    pub const GUILD_UPDATE: &str = "GUILD_UPDATE";
    pub const MEMBER_JOIN: &str = "MEMBER_JOIN";
    pub const USER_UPDATE: &str = "USER_UPDATE";
}

/// A dispatched gateway event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Ready(Ready),
    MessageCreate(Message),
    GuildCreate(Guild),
    GuildUpdate(Guild),
    MemberJoin(Member),
    UserUpdate(User),
    /// Event type with no model, or a payload that did not fit its model; kept as-is.
    Other { event_type: String, payload: Value },
}

fn parse<T: DeserializeOwned>(event_type: &str, payload: &Value) -> Result<T, GatewayError> {
    <T as serde::Deserialize>::deserialize(payload)
        .map_err(|e| GatewayError::MalformedMessage(format!("{} payload: {}", event_type, e)))
}

impl Event {
    /// Build the typed event for a known type. Fails when the payload does not
    /// match its model; unknown types always succeed as `Other`.
    pub fn try_from_dispatch(event_type: &str, payload: Value) -> Result<Self, GatewayError> {
        Ok(match event_type {
            names::READY => Event::Ready(parse(event_type, &payload)?),
            names::MESSAGE_CREATE => Event::MessageCreate(parse(event_type, &payload)?),
            names::GUILD_CREATE => Event::GuildCreate(parse(event_type, &payload)?),
            names::GUILD_UPDATE => Event::GuildUpdate(parse(event_type, &payload)?),
            names::MEMBER_JOIN => Event::MemberJoin(parse(event_type, &payload)?),
            names::USER_UPDATE => Event::UserUpdate(parse(event_type, &payload)?),
            other => Event::Other {
                event_type: other.to_string(),
                payload,
            },
        })
    }

    /// Like `try_from_dispatch`, but a payload that does not fit its model is
    /// logged and delivered untyped as `Other`, so no dispatch is lost.
    pub fn from_dispatch(event_type: &str, payload: Value) -> Self {
        match Self::try_from_dispatch(event_type, payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("{}; delivering untyped", e);
                Event::Other {
                    event_type: event_type.to_string(),
                    payload,
                }
            }
        }
    }

    /// Wire name of this event.
    pub fn event_type(&self) -> &str {
        match self {
            Event::Ready(_) => names::READY,
            Event::MessageCreate(_) => names::MESSAGE_CREATE,
            Event::GuildCreate(_) => names::GUILD_CREATE,
            Event::GuildUpdate(_) => names::GUILD_UPDATE,
            Event::MemberJoin(_) => names::MEMBER_JOIN,
            Event::UserUpdate(_) => names::USER_UPDATE,
            Event::Other { event_type, .. } => event_type,
        }
    }

    /// Payload as JSON (for printing or forwarding).
    pub fn payload(&self) -> Value {
        let v = match self {
            Event::Ready(r) => serde_json::to_value(r),
            Event::MessageCreate(m) => serde_json::to_value(m),
            Event::GuildCreate(g) | Event::GuildUpdate(g) => serde_json::to_value(g),
            Event::MemberJoin(m) => serde_json::to_value(m),
            Event::UserUpdate(u) => serde_json::to_value(u),
            Event::Other { payload, .. } => return payload.clone(),
        };
        v.unwrap_or(Value::Null)
    }
}
