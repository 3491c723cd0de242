use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fleetsync_broker::registry::{DEFAULT_CACHE_LIMIT, DEFAULT_SELECTOR_HEADER};
use fleetsync_broker::DestinationMatching;
use fleetsync_core::wire::DEFAULT_MAX_FRAME_BYTES;

const DEFAULT_ADDR: &str = "127.0.0.1:8440";
const DEFAULT_LOG_DIR: &str = ".fleetsync/logs";

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub debug: bool,
    pub log_dir: String,
    pub cache_limit: usize,
    pub selector_header: String,
    pub destination_matching: DestinationMatching,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    pub stale_seconds: u64,
    pub max_frame_bytes: usize,
    pub state_file: Option<PathBuf>,
    pub hash_salt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            debug: false,
            log_dir: String::new(),
            cache_limit: DEFAULT_CACHE_LIMIT,
            selector_header: DEFAULT_SELECTOR_HEADER.to_string(),
            destination_matching: DestinationMatching::Exact,
            write_timeout: Duration::from_secs(2),
            queue_capacity: 256,
            stale_seconds: 90,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            state_file: None,
            hash_salt: String::new(),
        }
    }
}

#[derive(Parser, Debug, Default)]
#[command(name = "fleetsync-hub")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub addr: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long)]
    pub cache_limit: Option<usize>,
    #[arg(long, default_value = "")]
    pub selector_header: String,
    #[arg(long, default_value = "")]
    pub destination_matching: String,
    #[arg(long, default_value_t = 2)]
    pub write_timeout: u64,
    #[arg(long, default_value_t = 256)]
    pub queue_capacity: usize,
    #[arg(long, default_value_t = 90)]
    pub stale_seconds: u64,
    #[arg(long, default_value = "")]
    pub state_file: String,
}

pub fn load_config() -> Result<Config> {
    resolve_config(Args::parse(), |key| std::env::var(key).ok())
}

/// Flags win over `FLEETSYNC_*` variables, which win over defaults.
pub fn resolve_config<F>(args: Args, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |flag: &str, key: &str| -> Option<String> {
        if !flag.trim().is_empty() {
            return Some(flag.to_string());
        }
        env(key).filter(|value| !value.trim().is_empty())
    };

    let cache_limit = match args.cache_limit {
        Some(limit) => limit,
        None => match lookup("", "FLEETSYNC_CACHE_LIMIT") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid FLEETSYNC_CACHE_LIMIT '{raw}'"))?,
            None => DEFAULT_CACHE_LIMIT,
        },
    };
    let destination_matching = match lookup(&args.destination_matching, "FLEETSYNC_DESTINATION_MATCHING") {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid destination matching '{raw}'"))?,
        None => DestinationMatching::Exact,
    };
    if args.queue_capacity == 0 {
        bail!("queue capacity must be at least 1");
    }

    Ok(Config {
        addr: lookup(&args.addr, "FLEETSYNC_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
        debug: args.debug || env("FLEETSYNC_DEBUG").is_some_and(|value| is_true(&value)),
        log_dir: lookup(&args.log_dir, "FLEETSYNC_LOG_DIR")
            .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
        cache_limit,
        selector_header: lookup(&args.selector_header, "FLEETSYNC_SELECTOR_HEADER")
            .unwrap_or_else(|| DEFAULT_SELECTOR_HEADER.to_string()),
        destination_matching,
        write_timeout: Duration::from_secs(args.write_timeout),
        queue_capacity: args.queue_capacity,
        stale_seconds: args.stale_seconds,
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        state_file: lookup(&args.state_file, "FLEETSYNC_STATE_FILE").map(PathBuf::from),
        hash_salt: env("FLEETSYNC_HASH_SALT").unwrap_or_default(),
    })
}

fn is_true(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn args() -> Args {
        Args {
            write_timeout: 2,
            queue_capacity: 256,
            stale_seconds: 90,
            ..Args::default()
        }
    }

    #[test]
    fn defaults_apply_without_flags_or_env() {
        let config = resolve_config(args(), env(&[])).expect("config");
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.cache_limit, DEFAULT_CACHE_LIMIT);
        assert_eq!(config.destination_matching, DestinationMatching::Exact);
        assert!(config.state_file.is_none());
        assert!(!config.debug);
    }

    #[test]
    fn flags_override_environment() {
        let mut args = args();
        args.addr = "0.0.0.0:9000".to_string();
        args.cache_limit = Some(0);
        let config = resolve_config(
            args,
            env(&[
                ("FLEETSYNC_ADDR", "127.0.0.1:1"),
                ("FLEETSYNC_CACHE_LIMIT", "12"),
                ("FLEETSYNC_DESTINATION_MATCHING", "pattern"),
                ("FLEETSYNC_DEBUG", "yes"),
                ("FLEETSYNC_STATE_FILE", "/etc/fleetsync/state.json"),
            ]),
        )
        .expect("config");
        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.cache_limit, 0);
        assert_eq!(config.destination_matching, DestinationMatching::Pattern);
        assert!(config.debug);
        assert_eq!(
            config.state_file,
            Some(PathBuf::from("/etc/fleetsync/state.json"))
        );
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(resolve_config(args(), env(&[("FLEETSYNC_CACHE_LIMIT", "lots")])).is_err());
        assert!(resolve_config(args(), env(&[("FLEETSYNC_DESTINATION_MATCHING", "regex")])).is_err());
        let mut zero_queue = args();
        zero_queue.queue_capacity = 0;
        assert!(resolve_config(zero_queue, env(&[])).is_err());
    }
}
