use crate::config::ConsoleConfig;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

pub const LOG_FILE_NAME: &str = "adc-console.log";

/// Stdout belongs to the terminal UI, so events go to a file or nowhere.
pub fn init_logging(config: &ConsoleConfig) -> Option<PathBuf> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("ADC_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (make_writer, path) = match open_log_file(&config.log_dir) {
        Ok((file, path)) => (BoxMakeWriter::new(Mutex::new(file)), Some(path)),
        Err(err) => {
            eprintln!("log_file_error: {err}");
            (BoxMakeWriter::new(io::sink), None)
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    path
}

fn open_log_file(log_dir: &Path) -> io::Result<(File, PathBuf)> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}
