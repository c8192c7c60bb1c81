//! Log setup shared by the binaries.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Path of the log file for a run called `name`.
pub fn log_path(name: &str) -> PathBuf {
    PathBuf::from(format!("{name}.log"))
}

/// Log to stderr and, when `name` is given, append to `<name>.log`.
///
/// The level comes from `RUST_LOG` and defaults to `info`.
pub fn init_logging(name: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match name {
        Some(name) => {
            let path = log_path(name);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path() {
        assert_eq!(log_path("ner"), PathBuf::from("ner.log"));
    }

    #[test]
    fn test_init_logging_appends_to_file() {
        let name = std::env::temp_dir()
            .join(format!("seqtag_logging_{}", std::process::id()))
            .to_string_lossy()
            .into_owned();
        let path = log_path(&name);
        std::fs::write(&path, "earlier run\n").unwrap();

        init_logging(Some(&name)).unwrap();
        tracing::warn!("scoring 3 sentences");

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("earlier run\n"));
        assert!(content.contains("scoring 3 sentences"));
        std::fs::remove_file(&path).ok();
    }
}
