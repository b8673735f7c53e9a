//! Configuration.
//!
//! The daemon reads an INI-style file whose `[rpkirtr]` section holds the
//! listen port, the log file path, the seconds between re-ingests, and
//! optional overrides for the timer values advised to clients. The list
//! of VRP source URLs comes from the command line.

use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;
use ini::Ini;
use crate::pdu::Timing;


//------------ Defaults ------------------------------------------------------

pub const DEFAULT_CONFIG_PATH: &str = "/etc/rpkirtr.conf";
pub const DEFAULT_CACHE_URL: &str = "https://rpki.cloudflare.com/rpki.json";

const DEFAULT_PORT: u16 = 8282;
const DEFAULT_LOG_PATH: &str = "/var/log/rpkirtr.log";
const DEFAULT_REFRESH_PERIOD: u64 = 360;

// Advised timer bounds, RFC 8210 section 6.
const REFRESH_RANGE: (u32, u32) = (1, 86400);
const RETRY_RANGE: (u32, u32) = (1, 7200);
const EXPIRE_RANGE: (u32, u32) = (600, 172800);


//------------ Args ----------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "rpkirtrd", about = "RPKI-to-Router cache server", version)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Comma separated list of VRP JSON source URLs.
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_CACHE_URL)]
    pub urls: Vec<String>,
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        key: &'static str,
        value: String,
    },

    #[error("{key} value {value} outside {min}..={max}")]
    OutOfRange {
        key: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}


//------------ Config --------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub log_path: PathBuf,
    pub urls: Vec<String>,
    pub refresh_period: Duration,
    pub timing: Timing,
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let file = Ini::load_from_file(&args.config).map_err(|source| {
            ConfigError::Read { path: args.config.clone(), source }
        })?;
        Self::from_ini(&file, args.urls.clone())
    }

    fn from_ini(file: &Ini, urls: Vec<String>) -> Result<Self, ConfigError> {
        let section = file.section(Some("rpkirtr"));
        let get = |key| section.and_then(|props| props.get(key));

        let port = match get("port") {
            Some(value) => {
                value.parse::<u16>().ok().filter(|port| {
                    *port != 0
                }).ok_or_else(|| ConfigError::InvalidValue {
                    key: "port", value: value.into()
                })?
            }
            None => DEFAULT_PORT,
        };
        let log_path = match get("log") {
            Some(value) => PathBuf::from(value),
            None => PathBuf::from(DEFAULT_LOG_PATH),
        };
        let refresh_period = match get("refresh_period") {
            Some(value) => {
                let seconds = value.parse::<u64>().ok().filter(|secs| {
                    *secs != 0
                }).ok_or_else(|| ConfigError::InvalidValue {
                    key: "refresh_period", value: value.into()
                })?;
                Duration::from_secs(seconds)
            }
            None => Duration::from_secs(DEFAULT_REFRESH_PERIOD),
        };
        let default_timing = Timing::default();
        let timing = Timing {
            refresh: ranged(
                get("refresh"), "refresh",
                REFRESH_RANGE, default_timing.refresh
            )?,
            retry: ranged(
                get("retry"), "retry",
                RETRY_RANGE, default_timing.retry
            )?,
            expire: ranged(
                get("expire"), "expire",
                EXPIRE_RANGE, default_timing.expire
            )?,
        };
        Ok(Config { port, log_path, urls, refresh_period, timing })
    }
}

fn ranged(
    value: Option<&str>,
    key: &'static str,
    (min, max): (u32, u32),
    default: u32,
) -> Result<u32, ConfigError> {
    let value = match value {
        Some(value) => value,
        None => return Ok(default),
    };
    let parsed = value.parse::<u32>().map_err(|_| {
        ConfigError::InvalidValue { key, value: value.into() }
    })?;
    if parsed < min || parsed > max {
        return Err(ConfigError::OutOfRange { key, value: parsed, min, max })
    }
    Ok(parsed)
}


//============ Tests =========================================================
