use std::io::Write;

use chrono::Local;
use log::LevelFilter;

/// Install the stderr logger. `RUST_LOG` takes precedence over `level`.
pub fn init(level: LevelFilter) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to initialize logger: {}", e);
    }
}
