//! stderr logging: `[LEVEL] [stream] message`.
//!
//! The stream tag is part of each message. `RUST_LOG` overrides the default
//! filter, which keeps the WebRTC stack quiet.

use std::io::Write;

use env_logger::Env;

pub const DEFAULT_FILTER: &str = "warn,rtsp_whip_bridge=info";

pub fn init() {
    env_logger::Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER))
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();
}
