use adc_api::{normalize_base_url, DEFAULT_BASE_URL};
use adc_core::idle::timeout_from_minutes;
use adc_core::ConfigError;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_IDLE_TIMEOUT_MINUTES: f64 = 15.0;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Parser, Debug, Default)]
#[command(name = "adc-console", version, about = "Terminal admin console")]
pub struct Args {
    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// API base URL
    #[arg(long)]
    pub api_url: Option<String>,
    #[arg(long)]
    pub idle_timeout_minutes: Option<f64>,
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Keep the session in memory only
    #[arg(long, default_value_t = false)]
    pub forget_session: bool,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

/// On-disk shape. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub api_base_url: Option<String>,
    pub idle_timeout_minutes: Option<f64>,
    pub request_timeout_secs: Option<u64>,
    pub state_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub remember_session: Option<bool>,
    pub redirect_authenticated_from_public: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleConfig {
    pub api_base_url: String,
    pub idle_timeout_minutes: f64,
    pub request_timeout_secs: u64,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub remember_session: bool,
    pub redirect_authenticated_from_public: bool,
    pub config_path: PathBuf,
    pub debug: bool,
}

impl ConsoleConfig {
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        resolve(args, &|key| std::env::var(key).ok())
    }

    pub fn vault_path(&self) -> PathBuf {
        self.state_dir.join("session.sqlite")
    }
}

type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_value(env: EnvLookup<'_>, key: &str) -> Option<String> {
    env(key).filter(|value| !value.trim().is_empty())
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_env<T: std::str::FromStr>(env: EnvLookup<'_>, key: &str) -> Result<Option<T>, ConfigError> {
    match env_value(env, key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{key}={raw} is not valid"))),
        None => Ok(None),
    }
}

fn home_dir(env: EnvLookup<'_>) -> PathBuf {
    env_value(env, "HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_config_path(env: EnvLookup<'_>) -> PathBuf {
    let config_dir = env_value(env, "XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir(env).join(".config"));
    config_dir.join("adc/config.toml")
}

fn default_state_dir(env: EnvLookup<'_>) -> PathBuf {
    if let Some(value) = env_value(env, "XDG_STATE_HOME") {
        return PathBuf::from(value).join("adc");
    }
    if let Some(value) = env_value(env, "HOME") {
        return PathBuf::from(value).join(".local/state/adc");
    }
    PathBuf::from(".adc/state")
}

/// A missing file is only an error when the path was asked for explicitly.
pub fn load_file_config(path: &Path, required: bool) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        if required {
            return Err(ConfigError::Invalid(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|err| ConfigError::Invalid(format!("read {}: {err}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|err| ConfigError::Invalid(format!("parse {}: {err}", path.display())))
}

/// Defaults, then the TOML file, then environment, then flags.
pub fn resolve(args: &Args, env: EnvLookup<'_>) -> Result<ConsoleConfig, ConfigError> {
    let (config_path, required) = match (&args.config, env_value(env, "ADC_CONFIG_PATH")) {
        (Some(path), _) => (path.clone(), true),
        (None, Some(path)) => (PathBuf::from(path), true),
        (None, None) => (default_config_path(env), false),
    };
    let file = load_file_config(&config_path, required)?;

    let api_base_url = args
        .api_url
        .clone()
        .or_else(|| env_value(env, "ADC_API_URL"))
        .or(file.api_base_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let api_base_url = normalize_base_url(&api_base_url)?;

    let idle_timeout_minutes = match args.idle_timeout_minutes {
        Some(minutes) => minutes,
        None => parse_env::<f64>(env, "ADC_IDLE_TIMEOUT_MINUTES")?
            .or(file.idle_timeout_minutes)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_MINUTES),
    };
    timeout_from_minutes(idle_timeout_minutes)?;

    let request_timeout_secs = match args.request_timeout_secs {
        Some(secs) => secs,
        None => parse_env::<u64>(env, "ADC_REQUEST_TIMEOUT_SECS")?
            .or(file.request_timeout_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
    };
    if request_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "request timeout must be at least one second".to_string(),
        ));
    }

    let state_dir = args
        .state_dir
        .clone()
        .or_else(|| env_value(env, "ADC_STATE_DIR").map(PathBuf::from))
        .or(file.state_dir)
        .unwrap_or_else(|| default_state_dir(env));
    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| env_value(env, "ADC_LOG_DIR").map(PathBuf::from))
        .or(file.log_dir)
        .unwrap_or_else(|| state_dir.join("logs"));

    let remember_session = if args.forget_session {
        false
    } else {
        match env_value(env, "ADC_REMEMBER_SESSION") {
            Some(raw) => parse_bool_flag(&raw).ok_or_else(|| {
                ConfigError::Invalid(format!("ADC_REMEMBER_SESSION={raw} is not a boolean"))
            })?,
            None => file.remember_session.unwrap_or(true),
        }
    };

    Ok(ConsoleConfig {
        api_base_url,
        idle_timeout_minutes,
        request_timeout_secs,
        state_dir,
        log_dir,
        remember_session,
        redirect_authenticated_from_public: file.redirect_authenticated_from_public.unwrap_or(true),
        config_path,
        debug: args.debug,
    })
}
