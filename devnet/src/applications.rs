//! Prebuilt devices used by the simulations, tests and benchmarks.

mod capture;
pub use capture::Capture;

mod ping_responder;
pub use ping_responder::{PingResponder, PING, PING_RESPONSE};

mod alarm_relay;
pub use alarm_relay::{AlarmRelay, ALARM};
