//! Example chat world built on the framelink network core.
//!
//! The `world-server` binary runs the authoritative chat room; the
//! `dummy-client` binary dials N sessions and chats on a repeating timer.
//! Both follow the fixed-tick application-loop contract: drain service
//! events, drain session events, dispatch messages, update the timer.

#![deny(unsafe_code)]

pub mod room;
pub mod schema;

use std::time::{SystemTime, UNIX_EPOCH};

/// Initialize tracing. `RUST_LOG` wins over the CLI level when set.
pub fn init_logging(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Wall-clock milliseconds since the Unix epoch, for message timestamps.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
