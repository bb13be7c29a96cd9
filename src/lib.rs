//! SwitchBot session library
//! Sequential request/response sessions with SwitchBot devices over BLE.
//! A session connects on demand, runs one operation at a time and releases
//! the link afterwards unless it was opened explicitly.

pub mod config;
pub mod core;
pub mod logging;
pub mod utils;
