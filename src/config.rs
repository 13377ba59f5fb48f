//! Configuration loading and management
//!
//! Defaults are rooted at `$HOME/.local/share/prism`. An optional
//! `config.toml` in that directory (or the path given on the command line)
//! overrides them, and environment variables override the file. API keys
//! are only ever read from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::presentation::PresentationMode;

const CONFIG_FILE: &str = "config.toml";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Shared state cells
    pub status_file: PathBuf,
    pub mic_file: PathBuf,
    /// Written by the capture process
    pub inbound_file: PathBuf,
    pub chat_log_file: PathBuf,
    pub images_dir: PathBuf,
    pub screenshots_dir: PathBuf,

    /// Capture bridge poll period
    pub poll_interval: Duration,
    /// Presentation observer poll period
    pub observer_interval: Duration,
    /// Window in which a repeat of the last accepted text is dropped
    pub cooldown: Duration,
    /// Pause after speech before the microphone reopens
    pub settle_delay: Duration,
    pub request_timeout: Duration,
    pub image_timeout: Duration,
    pub image_retry_attempts: u32,
    pub image_retry_backoff: Duration,

    pub min_utterance_chars: usize,
    pub history_limit: usize,
    pub search_result_cap: usize,
    pub classify_attempts: u32,

    pub username: String,
    pub assistant_name: String,
    /// Words per minute for speech output
    pub voice_rate: u32,
    pub greeting: bool,
    pub mode: PresentationMode,

    pub keys: ApiKeys,
}

/// Collaborator credentials
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub cohere: Option<String>,
    pub cerebras: Option<String>,
    pub serper: Option<String>,
    pub huggingface: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = |key: &Option<String>| if key.is_some() { "set" } else { "unset" };
        f.debug_struct("ApiKeys")
            .field("cohere", &state(&self.cohere))
            .field("cerebras", &state(&self.cerebras))
            .field("serper", &state(&self.serper))
            .field("huggingface", &state(&self.huggingface))
            .finish()
    }
}

/// The optional on-disk overrides
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    socket_path: Option<PathBuf>,
    inbound_file: Option<PathBuf>,
    images_dir: Option<PathBuf>,
    screenshots_dir: Option<PathBuf>,

    poll_interval_ms: Option<u64>,
    observer_interval_ms: Option<u64>,
    cooldown_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    image_timeout_secs: Option<u64>,
    image_retry_attempts: Option<u32>,
    image_retry_backoff_secs: Option<u64>,

    min_utterance_chars: Option<usize>,
    history_limit: Option<usize>,
    search_result_cap: Option<usize>,
    classify_attempts: Option<u32>,

    username: Option<String>,
    assistant_name: Option<String>,
    voice_rate: Option<u32>,
    greeting: Option<bool>,
    mode: Option<PresentationMode>,
}

impl Config {
    /// Load configuration from defaults, the config file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let data_dir = match std::env::var("PRISM_DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(home).join(".local").join("share").join("prism")
            }
        };

        Self::from_sources(data_dir, config_path, |name| std::env::var(name).ok())
    }

    fn from_sources(
        data_dir: PathBuf,
        config_path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::with_data_dir(data_dir);

        let file = match config_path {
            Some(path) => Some(read_file(path)?),
            None => {
                let default_path = config.data_dir.join(CONFIG_FILE);
                if default_path.exists() {
                    Some(read_file(&default_path)?)
                } else {
                    None
                }
            }
        };
        if let Some(file) = file {
            config.apply_file(file);
        }

        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    /// Defaults for everything, rooted at `data_dir`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            socket_path: data_dir.join("daemon.sock"),
            status_file: data_dir.join("status.data"),
            mic_file: data_dir.join("mic.data"),
            inbound_file: data_dir.join("voice_input.txt"),
            chat_log_file: data_dir.join("chat_log.json"),
            images_dir: data_dir.join("images"),
            screenshots_dir: data_dir.join("screenshots"),
            data_dir,

            poll_interval: Duration::from_millis(500),
            observer_interval: Duration::from_millis(100),
            cooldown: Duration::from_secs(2),
            settle_delay: Duration::from_millis(300),
            request_timeout: Duration::from_secs(30),
            image_timeout: Duration::from_secs(60),
            image_retry_attempts: 3,
            image_retry_backoff: Duration::from_secs(10),

            min_utterance_chars: 2,
            history_limit: 10,
            search_result_cap: 5,
            classify_attempts: 2,

            username: "User".to_string(),
            assistant_name: "P.R.I.S.M".to_string(),
            voice_rate: 175,
            greeting: true,
            mode: PresentationMode::default(),

            keys: ApiKeys::default(),
        }
    }

    fn apply_file(&mut self, file: ConfigFile) {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        set(&mut self.socket_path, file.socket_path);
        set(&mut self.inbound_file, file.inbound_file);
        set(&mut self.images_dir, file.images_dir);
        set(&mut self.screenshots_dir, file.screenshots_dir);

        set(&mut self.poll_interval, file.poll_interval_ms.map(Duration::from_millis));
        set(&mut self.observer_interval, file.observer_interval_ms.map(Duration::from_millis));
        set(&mut self.cooldown, file.cooldown_ms.map(Duration::from_millis));
        set(&mut self.settle_delay, file.settle_delay_ms.map(Duration::from_millis));
        set(&mut self.request_timeout, file.request_timeout_secs.map(Duration::from_secs));
        set(&mut self.image_timeout, file.image_timeout_secs.map(Duration::from_secs));
        set(&mut self.image_retry_attempts, file.image_retry_attempts);
        set(&mut self.image_retry_backoff, file.image_retry_backoff_secs.map(Duration::from_secs));

        set(&mut self.min_utterance_chars, file.min_utterance_chars);
        set(&mut self.history_limit, file.history_limit);
        set(&mut self.search_result_cap, file.search_result_cap);
        set(&mut self.classify_attempts, file.classify_attempts);

        set(&mut self.username, file.username);
        set(&mut self.assistant_name, file.assistant_name);
        set(&mut self.voice_rate, file.voice_rate);
        set(&mut self.greeting, file.greeting);
        set(&mut self.mode, file.mode);
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if let Some(username) = var("PRISM_USERNAME") {
            self.username = username;
        }
        if let Some(name) = var("PRISM_ASSISTANT_NAME") {
            self.assistant_name = name;
        }
        if let Some(path) = var("PRISM_INBOUND_FILE") {
            self.inbound_file = PathBuf::from(path);
        }

        self.keys = ApiKeys {
            cohere: var("COHERE_API_KEY"),
            cerebras: var("CEREBRAS_API_KEY"),
            serper: var("SERPER_API_KEY"),
            huggingface: var("HUGGINGFACE_API_KEY"),
        };
    }

    /// Reject values the runtime cannot work with. Poll periods feed
    /// `tokio::time::interval`, which panics on zero.
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("poll_interval_ms", self.poll_interval),
            ("observer_interval_ms", self.observer_interval),
            ("request_timeout_secs", self.request_timeout),
            ("image_timeout_secs", self.image_timeout),
        ] {
            ensure!(!value.is_zero(), "{name} must be greater than zero");
        }

        ensure!(self.history_limit > 0, "history_limit must be at least 1");
        ensure!(self.classify_attempts > 0, "classify_attempts must be at least 1");
        ensure!(self.image_retry_attempts > 0, "image_retry_attempts must be at least 1");
        Ok(())
    }

    /// Ensure data directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.images_dir, &self.screenshots_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<ConfigFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
}
