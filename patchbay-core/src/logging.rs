use std::fs::File;
use std::path::PathBuf;

use simplelog::{Config, LevelFilter, WriteLogger};

/// Install a file logger at `<config dir>/patchbay/patchbay.log` (or the temp
/// dir when that is not writable). Debug level when `verbose`, warn otherwise.
pub fn init_logging(verbose: bool) -> std::io::Result<PathBuf> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let mut log_path = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("patchbay")
        .join("patchbay.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path) {
        Ok(file) => file,
        Err(_) => {
            log_path = std::env::temp_dir().join("patchbay.log");
            File::create(&log_path)?
        }
    };

    WriteLogger::init(log_level, Config::default(), log_file)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::AlreadyExists, e))?;

    log::info!("patchbay starting (log level: {:?})", log_level);
    Ok(log_path)
}
