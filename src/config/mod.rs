pub mod session_config;

pub use session_config::{CONFIG_FILE_NAME, SessionConfig};
