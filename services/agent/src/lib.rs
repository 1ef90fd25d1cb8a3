//! agent: the Flotilla agent session client (spec §4.4) — maintains the
//! outbound framed session to the server and dispatches inbound commands
//! to `flotilla-dispatcher`.

pub mod config;
pub mod identity;
pub mod session;
