use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Stdout, plus a per-instance file under the configured log directory.
pub struct LogTee {
    file: Option<Mutex<File>>,
}

impl LogTee {
    pub fn stdout_only() -> Self {
        Self { file: None }
    }

    /// An empty `log_dir` disables the file.
    pub fn open(log_dir: &str, addr: SocketAddr) -> io::Result<(Self, Option<PathBuf>)> {
        if log_dir.trim().is_empty() {
            return Ok((Self::stdout_only(), None));
        }
        let path = log_path(Path::new(log_dir), addr);
        std::fs::create_dir_all(Path::new(log_dir))?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((
            Self {
                file: Some(Mutex::new(file)),
            },
            Some(path),
        ))
    }
}

/// Hubs sharing a log directory write to separate files, keyed by port.
pub fn log_path(log_dir: &Path, addr: SocketAddr) -> PathBuf {
    log_dir.join(format!("fleetsync-hub-{}.log", addr.port()))
}

pub struct TeeWriter<'a> {
    file: Option<&'a Mutex<File>>,
}

impl Write for TeeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stdout().write_all(buf);
        if let Some(file) = self.file {
            let _ = file
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stdout().flush();
        if let Some(file) = self.file {
            let _ = file.lock().unwrap_or_else(PoisonError::into_inner).flush();
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogTee {
    type Writer = TeeWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            file: self.file.as_ref(),
        }
    }
}

/// `--debug` wins, then `FLEETSYNC_LOG_LEVEL`, then `info`.
pub fn filter_directive(debug: bool, level: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    level
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

pub fn init(config: &Config, addr: SocketAddr) -> Option<PathBuf> {
    let directive = filter_directive(config.debug, std::env::var("FLEETSYNC_LOG_LEVEL").ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let (tee, path) = match LogTee::open(&config.log_dir, addr) {
        Ok(opened) => opened,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            (LogTee::stdout_only(), None)
        }
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(tee)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_files_are_named_after_the_listen_port() {
        let addr: SocketAddr = "127.0.0.1:8440".parse().expect("addr");
        assert_eq!(
            log_path(Path::new("/var/log/fleetsync"), addr),
            PathBuf::from("/var/log/fleetsync/fleetsync-hub-8440.log")
        );
    }

    #[test]
    fn tee_appends_to_the_instance_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("logs");
        let addr: SocketAddr = "127.0.0.1:9001".parse().expect("addr");
        let (tee, path) = LogTee::open(log_dir.to_str().expect("utf8"), addr).expect("open");
        let path = path.expect("file enabled");

        let mut writer = tee.make_writer();
        writer.write_all(b"hub_start\n").expect("write");
        writer.flush().expect("flush");
        assert_eq!(std::fs::read_to_string(path).expect("read"), "hub_start\n");
    }

    #[test]
    fn empty_log_dir_disables_the_file() {
        let addr: SocketAddr = "127.0.0.1:9002".parse().expect("addr");
        let (tee, path) = LogTee::open("  ", addr).expect("open");
        assert!(path.is_none());
        assert!(tee.file.is_none());
    }

    #[test]
    fn debug_flag_overrides_the_level_variable() {
        assert_eq!(filter_directive(true, Some("warn".to_string())), "debug");
        assert_eq!(filter_directive(false, Some("warn".to_string())), "warn");
        assert_eq!(filter_directive(false, Some(" ".to_string())), "info");
        assert_eq!(filter_directive(false, None), "info");
    }
}
