//! Gateway client: persistent WebSocket session with the Derailed gateway.
//!
//! Wire protocol: JSON envelopes `{op, s, t, d}`. The server opens with hello
//! (op 1, heartbeat interval); the client answers with identify (op 2) and then
//! heartbeats (op 4) carrying the last sequence. Every envelope with an event
//! type is published on the session's event bus.

mod backoff;
mod bus;
mod codec;
mod error;
mod event;
mod heartbeat;
mod session;
pub(crate) mod transport;

pub use backoff::ReconnectPolicy;
pub use bus::{EventBus, Handler, PublishReport, SubscriptionId, WILDCARD};
pub use codec::{decode, encode, Envelope, Opcode};
pub use error::GatewayError;
pub use event::{names, Event};
pub use heartbeat::HeartbeatScheduler;
pub use session::{ConnectionState, Session, SessionOptions};
pub use transport::{Connector, Transport, WsConnector};
