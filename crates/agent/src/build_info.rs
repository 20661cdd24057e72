//! Process-global build metadata
//!
//! `COMMIT` and `BUILD_TIME` are injected by the packaging build via the
//! `SC_AGENT_COMMIT` / `SC_AGENT_BUILD_TIME` compile-time environment;
//! developer builds fall back to `unknown`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const COMMIT: &str = match option_env!("SC_AGENT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

pub const BUILD_TIME: &str = match option_env!("SC_AGENT_BUILD_TIME") {
    Some(build_time) => build_time,
    None => "unknown",
};
