//! Prebuilt simulation setups for testing, benchmarking and the command line.

mod ping_pong;
pub use ping_pong::{ping_pong, PingPongStats};

mod alarm_storm;
pub use alarm_storm::{alarm_storm, AlarmStormStats};
