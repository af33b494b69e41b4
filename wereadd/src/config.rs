//! Daemon configuration.
//!
//! Loads an optional JSON file, resolves `${VAR}` placeholders in its string
//! values, then applies environment overrides. Precedence is
//! env > file > built-in default; per-account `reading_overrides` sit on top
//! of the merged global reading settings.

use rand::Rng;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use weread_connectors::{
    Channel, ChannelConfig, NotificationConfig, DEFAULT_BARK_SERVER, DEFAULT_NTFY_SERVER,
};
use weread_domain::{AnchorPolicy, Book, Catalog, Chapter, Probability, ReadingMode, ValueRange};
use weread_engine::{PacingConfig, SelectorConfig};
use weread_exec::SessionConfig;

use crate::error::{DaemonError, DaemonResult};

/// Config file read when `WEREAD_CONFIG` is unset and the file exists
const DEFAULT_CONFIG_FILE: &str = "weread.json";

/// Account name used when no `users` are configured
const DEFAULT_ACCOUNT: &str = "default";

/// Environment lookup, injectable for tests.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

// =============================================================================
// Sections
// =============================================================================

/// How the binary runs after startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// One pass, then exit
    #[default]
    Immediate,
    /// One pass, triggered by an external scheduler
    Scheduled,
    /// Repeated passes with a daily cap
    Daemon,
}

impl FromStr for StartupMode {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "immediate" => Ok(StartupMode::Immediate),
            "scheduled" => Ok(StartupMode::Scheduled),
            "daemon" => Ok(StartupMode::Daemon),
            other => Err(DaemonError::Config(format!(
                "Invalid startup mode: {}. Expected: immediate, scheduled, daemon",
                other
            ))),
        }
    }
}

impl fmt::Display for StartupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupMode::Immediate => write!(f, "immediate"),
            StartupMode::Scheduled => write!(f, "scheduled"),
            StartupMode::Daemon => write!(f, "daemon"),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// Run mode
    pub startup_mode: StartupMode,
    /// Random wait before each session's first request, in seconds
    pub startup_delay: ValueRange,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            startup_mode: StartupMode::Immediate,
            startup_delay: ValueRange::saturating(1.0, 10.0),
        }
    }
}

/// Overrides one account may apply to the global reading settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingOverrides {
    /// Reading mode
    pub mode: Option<ReadingMode>,
    /// Target duration, in minutes
    pub target_duration: Option<ValueRange>,
    /// Reading interval, in seconds
    pub reading_interval: Option<ValueRange>,
    /// Start from the template's book and chapter
    pub use_curl_data_first: Option<bool>,
    /// Fall back to the first configured book
    pub fallback_to_config: Option<bool>,
}

/// One account and where its request template comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    /// Account name used in logs and reports
    pub name: String,
    /// Path of a file holding the copied curl command
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// Inline curl command
    #[serde(default)]
    pub content: Option<String>,
    /// Reading settings for this account only
    #[serde(default)]
    pub reading_overrides: ReadingOverrides,
}

impl AccountProfile {
    /// Profile reading its template from inline content.
    pub fn inline(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_path: None,
            content: Some(content.into()),
            reading_overrides: ReadingOverrides::default(),
        }
    }

    fn has_source(&self) -> bool {
        self.file_path.is_some() || self.content.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// Request template sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurlSection {
    /// Global template file
    pub file_path: Option<PathBuf>,
    /// Global inline template
    pub content: Option<String>,
    /// Accounts; empty means one account using the global template
    pub users: Vec<AccountProfile>,
}

/// A chapter as written in the config: a bare id or an id with its index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChapterEntry {
    /// Chapter id only
    Id(String),
    /// Chapter id with an explicit index
    Indexed {
        /// Chapter id
        chapter_id: String,
        /// Explicit chapter index
        #[serde(default)]
        chapter_index: Option<u32>,
    },
}

impl ChapterEntry {
    fn to_chapter(&self) -> Chapter {
        match self {
            ChapterEntry::Id(id) => Chapter::new(id.as_str()),
            ChapterEntry::Indexed {
                chapter_id,
                chapter_index: Some(index),
            } => Chapter::with_index(chapter_id.as_str(), *index),
            ChapterEntry::Indexed { chapter_id, .. } => Chapter::new(chapter_id.as_str()),
        }
    }
}

/// A configured book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookEntry {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// WeRead book id
    pub book_id: String,
    /// Chapters in reading order
    pub chapters: Vec<ChapterEntry>,
}

/// `smart_random` tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartRandomSection {
    /// Chance of staying on the current book
    pub book_continuity: Probability,
    /// Chance of reading the next chapter when staying
    pub chapter_continuity: Probability,
    /// Seconds between book switches
    pub book_switch_cooldown: u64,
}

impl Default for SmartRandomSection {
    fn default() -> Self {
        let defaults = SelectorConfig::default();
        Self {
            book_continuity: defaults.book_continuity,
            chapter_continuity: defaults.chapter_continuity,
            book_switch_cooldown: defaults.book_switch_cooldown.as_secs(),
        }
    }
}

/// Reading settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingSection {
    /// Position selection policy
    pub mode: ReadingMode,
    /// Session length, in minutes
    pub target_duration: ValueRange,
    /// Gap between requests, in seconds
    pub reading_interval: ValueRange,
    /// Start from the template's book and chapter
    pub use_curl_data_first: bool,
    /// Fall back to the first configured book
    pub fallback_to_config: bool,
    /// `smart_random` tuning
    pub smart_random: SmartRandomSection,
    /// Books to read
    pub books: Vec<BookEntry>,
}

impl Default for ReadingSection {
    fn default() -> Self {
        Self {
            mode: ReadingMode::SmartRandom,
            target_duration: ValueRange::saturating(60.0, 70.0),
            reading_interval: ValueRange::saturating(25.0, 35.0),
            use_curl_data_first: true,
            fallback_to_config: true,
            smart_random: SmartRandomSection::default(),
            books: Vec::new(),
        }
    }
}

/// Network settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Request timeout, in seconds
    pub timeout: u64,
    /// Retries per request
    pub retry_times: u32,
    /// Backoff before a retry, in seconds
    pub retry_delay: ValueRange,
    /// Requests per minute, 0 for unlimited
    pub rate_limit: u32,
    /// Failed iterations in a row that abort a session
    pub circuit_breaker_threshold: u32,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            timeout: 30,
            retry_times: 3,
            retry_delay: ValueRange::saturating(5.0, 15.0),
            rate_limit: 10,
            circuit_breaker_threshold: 5,
        }
    }
}

/// Human-like pacing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanSimulationSection {
    /// Master switch for breaks and speed variation
    pub enabled: bool,
    /// Vary reading speed over time
    pub reading_speed_variation: bool,
    /// Speed multiplier range
    pub speed_range: ValueRange,
    /// Chance of a break after each request
    pub break_probability: Probability,
    /// Break length, in seconds
    pub break_duration: ValueRange,
    /// Use one random browser User-Agent per session
    pub rotate_user_agent: bool,
}

impl Default for HumanSimulationSection {
    fn default() -> Self {
        let defaults = PacingConfig::default();
        Self {
            enabled: defaults.enabled,
            reading_speed_variation: defaults.speed_variation,
            speed_range: defaults.speed_range,
            break_probability: defaults.break_probability,
            break_duration: defaults.break_duration,
            rotate_user_agent: false,
        }
    }
}

/// Daemon mode settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Wait between passes, in minutes
    pub session_interval: ValueRange,
    /// Passes allowed per local calendar day
    pub max_daily_sessions: u32,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            session_interval: ValueRange::saturating(120.0, 180.0),
            max_daily_sessions: 12,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application settings
    pub app: AppSection,
    /// Request template sources and accounts
    pub curl_config: CurlSection,
    /// Reading settings
    pub reading: ReadingSection,
    /// Network settings
    pub network: NetworkSection,
    /// Pacing settings
    pub human_simulation: HumanSimulationSection,
    /// Push notifications
    pub notification: NotificationConfig,
    /// Daemon mode settings
    pub daemon: DaemonSection,
}

impl Config {
    /// Load configuration from `.env`, the config file and the environment.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let lookup = |key: &str| env::var(key).ok();
        let path = read(&lookup, "WEREAD_CONFIG")
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()));

        let mut config = match path {
            Some(path) => Self::load_file(&path, &lookup)?,
            None => Self::default(),
        };
        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn load_file(path: &Path, lookup: Lookup) -> DaemonResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DaemonError::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text, lookup)
    }

    /// Parse JSON config text, resolving `${VAR}` placeholders.
    pub fn from_json_str(text: &str, lookup: Lookup) -> DaemonResult<Self> {
        let mut value: Value = serde_json::from_str(text)
            .map_err(|e| DaemonError::Config(format!("Invalid config JSON: {}", e)))?;

        let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| DaemonError::Config(e.to_string()))?;
        resolve_placeholders(&mut value, &pattern, lookup);

        serde_json::from_value(value)
            .map_err(|e| DaemonError::Config(format!("Invalid config: {}", e)))
    }

    /// Apply environment overrides on top of file values.
    pub fn apply_env(&mut self, lookup: Lookup) -> DaemonResult<()> {
        set_parsed(lookup, "STARTUP_MODE", &mut self.app.startup_mode)?;
        set_parsed(lookup, "STARTUP_DELAY", &mut self.app.startup_delay)?;

        if let Some(path) = read(lookup, "WEREAD_CURL_BASH_FILE_PATH") {
            self.curl_config.file_path = Some(PathBuf::from(path));
        }
        if let Some(content) = read(lookup, "WEREAD_CURL_STRING") {
            self.curl_config.content = Some(content);
        }

        let reading = &mut self.reading;
        set_parsed(lookup, "READING_MODE", &mut reading.mode)?;
        set_parsed(lookup, "TARGET_DURATION", &mut reading.target_duration)?;
        set_parsed(lookup, "READING_INTERVAL", &mut reading.reading_interval)?;
        set_flag(lookup, "USE_CURL_DATA_FIRST", &mut reading.use_curl_data_first)?;
        set_flag(lookup, "FALLBACK_TO_CONFIG", &mut reading.fallback_to_config)?;
        set_probability(lookup, "BOOK_CONTINUITY", &mut reading.smart_random.book_continuity)?;
        set_probability(lookup, "CHAPTER_CONTINUITY", &mut reading.smart_random.chapter_continuity)?;
        set_parsed(lookup, "BOOK_SWITCH_COOLDOWN", &mut reading.smart_random.book_switch_cooldown)?;

        let network = &mut self.network;
        set_parsed(lookup, "NETWORK_TIMEOUT", &mut network.timeout)?;
        set_parsed(lookup, "RETRY_TIMES", &mut network.retry_times)?;
        set_parsed(lookup, "RETRY_DELAY", &mut network.retry_delay)?;
        set_parsed(lookup, "RATE_LIMIT", &mut network.rate_limit)?;
        set_parsed(lookup, "CIRCUIT_BREAKER_THRESHOLD", &mut network.circuit_breaker_threshold)?;

        let human = &mut self.human_simulation;
        set_flag(lookup, "HUMAN_SIMULATION_ENABLED", &mut human.enabled)?;
        set_flag(lookup, "READING_SPEED_VARIATION", &mut human.reading_speed_variation)?;
        set_parsed(lookup, "SPEED_RANGE", &mut human.speed_range)?;
        set_probability(lookup, "BREAK_PROBABILITY", &mut human.break_probability)?;
        set_parsed(lookup, "BREAK_DURATION", &mut human.break_duration)?;
        set_flag(lookup, "ROTATE_USER_AGENT", &mut human.rotate_user_agent)?;

        set_flag(lookup, "NOTIFICATION_ENABLED", &mut self.notification.enabled)?;
        set_flag(lookup, "INCLUDE_STATISTICS", &mut self.notification.include_statistics)?;
        for channel in env_channels(lookup)? {
            let existing = self
                .notification
                .channels
                .iter_mut()
                .find(|c| c.channel.name() == channel.name());
            match existing {
                Some(entry) => {
                    entry.channel = channel;
                    entry.enabled = true;
                }
                None => self.notification.channels.push(ChannelConfig::enabled(channel)),
            }
        }

        set_parsed(lookup, "SESSION_INTERVAL", &mut self.daemon.session_interval)?;
        set_parsed(lookup, "MAX_DAILY_SESSIONS", &mut self.daemon.max_daily_sessions)?;

        Ok(())
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> DaemonResult<()> {
        if self.network.timeout == 0 {
            return Err(DaemonError::Config("network.timeout must be positive".to_string()));
        }
        if self.network.circuit_breaker_threshold == 0 {
            return Err(DaemonError::Config(
                "network.circuit_breaker_threshold must be at least 1".to_string(),
            ));
        }
        if self.daemon.max_daily_sessions == 0 {
            return Err(DaemonError::Config(
                "daemon.max_daily_sessions must be at least 1".to_string(),
            ));
        }

        let accounts = self.accounts();
        let mut names = HashSet::new();
        for account in &accounts {
            if account.name.trim().is_empty() {
                return Err(DaemonError::Config("account name must be non-empty".to_string()));
            }
            if !names.insert(account.name.as_str()) {
                return Err(DaemonError::Config(format!("duplicate account name: {}", account.name)));
            }
            if !account.has_source() && !self.has_global_template() {
                return Err(DaemonError::Template {
                    account: account.name.clone(),
                    reason: "no curl template configured (set WEREAD_CURL_BASH_FILE_PATH or WEREAD_CURL_STRING)"
                        .to_string(),
                });
            }
        }

        self.catalog()?;

        for entry in self.notification.channels.iter().filter(|c| c.enabled) {
            entry.channel.validate()?;
        }

        Ok(())
    }

    fn has_global_template(&self) -> bool {
        self.curl_config.file_path.is_some()
            || self.curl_config.content.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    /// Accounts to run, in order.
    pub fn accounts(&self) -> Vec<AccountProfile> {
        if self.curl_config.users.is_empty() {
            vec![AccountProfile {
                name: DEFAULT_ACCOUNT.to_string(),
                file_path: self.curl_config.file_path.clone(),
                content: self.curl_config.content.clone(),
                reading_overrides: ReadingOverrides::default(),
            }]
        } else {
            self.curl_config.users.clone()
        }
    }

    /// Load an account's curl command.
    ///
    /// Tries the account's file (when it exists), its inline content, then
    /// the global file and the global content.
    pub async fn template_for(&self, account: &AccountProfile) -> DaemonResult<String> {
        let sources = [
            (account.file_path.as_deref(), account.content.as_deref()),
            (self.curl_config.file_path.as_deref(), self.curl_config.content.as_deref()),
        ];

        for (file, content) in sources {
            if let Some(path) = file.filter(|p| p.exists()) {
                let text = tokio::fs::read_to_string(path).await.map_err(|e| DaemonError::Template {
                    account: account.name.clone(),
                    reason: format!("cannot read {}: {}", path.display(), e),
                })?;
                return Ok(text.trim().to_string());
            }
            if let Some(content) = content.filter(|c| !c.trim().is_empty()) {
                return Ok(content.trim().to_string());
            }
        }

        Err(DaemonError::Template {
            account: account.name.clone(),
            reason: "no readable curl template".to_string(),
        })
    }

    /// Configured books as a catalog.
    pub fn catalog(&self) -> DaemonResult<Catalog> {
        let books = self
            .reading
            .books
            .iter()
            .map(|entry| {
                let chapters = entry.chapters.iter().map(ChapterEntry::to_chapter).collect();
                Book::new(entry.book_id.as_str(), entry.name.as_str(), chapters)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Catalog::new(books))
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout)
    }

    /// Session settings for one account, drawing its target duration.
    pub fn session_config<R: Rng + ?Sized>(
        &self,
        overrides: &ReadingOverrides,
        rng: &mut R,
    ) -> SessionConfig {
        let reading = &self.reading;
        let human = &self.human_simulation;

        let target = overrides.target_duration.unwrap_or(reading.target_duration);

        SessionConfig {
            mode: overrides.mode.unwrap_or(reading.mode),
            selector: SelectorConfig {
                book_continuity: reading.smart_random.book_continuity,
                chapter_continuity: reading.smart_random.chapter_continuity,
                book_switch_cooldown: Duration::from_secs(reading.smart_random.book_switch_cooldown),
            },
            pacing: PacingConfig {
                enabled: human.enabled,
                speed_variation: human.reading_speed_variation,
                speed_range: human.speed_range,
                reading_interval: overrides.reading_interval.unwrap_or(reading.reading_interval),
                rate_limit: self.network.rate_limit,
                break_probability: human.break_probability,
                break_duration: human.break_duration,
                ..PacingConfig::default()
            },
            anchor: AnchorPolicy {
                use_seed_first: overrides.use_curl_data_first.unwrap_or(reading.use_curl_data_first),
                fallback_to_config: overrides.fallback_to_config.unwrap_or(reading.fallback_to_config),
            },
            target_duration: target.sample_mins(rng),
            request_timeout: self.request_timeout(),
            retry_times: self.network.retry_times,
            retry_delay: self.network.retry_delay,
            circuit_breaker_threshold: self.network.circuit_breaker_threshold,
            startup_delay: Some(self.app.startup_delay),
            rotate_user_agent: human.rotate_user_agent,
            ..SessionConfig::default()
        }
    }

    /// Create test configuration.
    ///
    /// One inline account, one three-chapter book, no delays or breaks,
    /// one-minute sessions at a fixed 30s interval.
    pub fn test() -> Self {
        Self {
            app: AppSection {
                startup_mode: StartupMode::Immediate,
                startup_delay: ValueRange::saturating(0.0, 0.0),
            },
            curl_config: CurlSection {
                file_path: None,
                content: Some(TEST_TEMPLATE.to_string()),
                users: Vec::new(),
            },
            reading: ReadingSection {
                mode: ReadingMode::Sequential,
                target_duration: ValueRange::saturating(1.0, 1.0),
                reading_interval: ValueRange::saturating(30.0, 30.0),
                books: vec![BookEntry {
                    name: "Test Book".to_string(),
                    book_id: "ce032b305a9bc1ce0b0dd2a".to_string(),
                    chapters: vec![
                        ChapterEntry::Id("7cb321502467cbbc409e62d".to_string()),
                        ChapterEntry::Id("e3632bd0222e369853df322".to_string()),
                        ChapterEntry::Id("16732dc0161679091c5aeb1".to_string()),
                    ],
                }],
                ..ReadingSection::default()
            },
            network: NetworkSection {
                timeout: 5,
                retry_times: 0,
                retry_delay: ValueRange::saturating(0.0, 0.0),
                rate_limit: 0,
                circuit_breaker_threshold: 2,
            },
            human_simulation: HumanSimulationSection {
                enabled: false,
                ..HumanSimulationSection::default()
            },
            notification: NotificationConfig::default(),
            daemon: DaemonSection {
                session_interval: ValueRange::saturating(1.0, 1.0),
                max_daily_sessions: 2,
            },
        }
    }
}

/// Sample request template used by [`Config::test`].
pub const TEST_TEMPLATE: &str = r#"curl 'https://weread.qq.com/web/book/read' -H 'content-type: application/json;charset=UTF-8' -H 'cookie: wr_vid=123456; wr_skey=Ab3dEf7h' -H 'user-agent: Mozilla/5.0 (X11; Linux x86_64)' --data-raw '{"appId":"wb182564874663h1234567890","b":"ce032b305a9bc1ce0b0dd2a","c":"7cb321502467cbbc409e62d","ci":1,"co":389,"sm":"[插图]","pr":74,"rt":30,"ps":"b1d32a307a4c3259g0160f4d","pc":"4d3323607a4c3259g016ac48"}'"#;

// =============================================================================
// Helpers
// =============================================================================

fn resolve_placeholders(value: &mut Value, pattern: &Regex, lookup: Lookup) {
    match value {
        Value::String(text) if text.contains("${") => {
            let resolved = pattern
                .replace_all(text, |caps: &regex::Captures| {
                    lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned();
            *text = resolved;
        }
        Value::Array(items) => {
            for item in items {
                resolve_placeholders(item, pattern, lookup);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                resolve_placeholders(item, pattern, lookup);
            }
        }
        _ => {}
    }
}

/// Non-empty, trimmed environment value.
fn read(lookup: Lookup, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn invalid(key: &str, raw: &str, reason: impl fmt::Display) -> DaemonError {
    DaemonError::Config(format!("Invalid {}: {} ({})", key, raw, reason))
}

fn set_parsed<T>(lookup: Lookup, key: &str, slot: &mut T) -> DaemonResult<()>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(raw) = read(lookup, key) {
        *slot = raw.parse().map_err(|e| invalid(key, &raw, e))?;
    }
    Ok(())
}

fn set_flag(lookup: Lookup, key: &str, slot: &mut bool) -> DaemonResult<()> {
    if let Some(raw) = read(lookup, key) {
        *slot = match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => return Err(invalid(key, &raw, "expected true or false")),
        };
    }
    Ok(())
}

fn set_probability(lookup: Lookup, key: &str, slot: &mut Probability) -> DaemonResult<()> {
    if let Some(raw) = read(lookup, key) {
        let value: f64 = raw.parse().map_err(|e| invalid(key, &raw, e))?;
        *slot = Probability::new(value).map_err(|e| invalid(key, &raw, e))?;
    }
    Ok(())
}

fn parse_format<T: DeserializeOwned>(lookup: Lookup, key: &str) -> DaemonResult<Option<T>> {
    read(lookup, key)
        .map(|raw| serde_json::from_value(Value::String(raw.clone())).map_err(|e| invalid(key, &raw, e)))
        .transpose()
}

/// Channels described by environment variables.
fn env_channels(lookup: Lookup) -> DaemonResult<Vec<Channel>> {
    let get = |key: &str| read(lookup, key);
    let mut channels = Vec::new();

    if let Some(token) = get("PUSHPLUS_TOKEN") {
        channels.push(Channel::PushPlus { token });
    }
    if let (Some(bot_token), Some(chat_id)) = (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
        channels.push(Channel::Telegram {
            bot_token,
            chat_id,
            proxy: get("HTTPS_PROXY").or_else(|| get("HTTP_PROXY")),
        });
    }
    if let Some(spt) = get("WXPUSHER_SPT") {
        channels.push(Channel::WxPusher { spt });
    }
    if let Some(device_key) = get("BARK_DEVICE_KEY") {
        channels.push(Channel::Bark {
            server: get("BARK_SERVER").unwrap_or_else(|| DEFAULT_BARK_SERVER.to_string()),
            device_key,
            sound: get("BARK_SOUND"),
        });
    }
    if let Some(topic) = get("NTFY_TOPIC") {
        channels.push(Channel::Ntfy {
            server: get("NTFY_SERVER").unwrap_or_else(|| DEFAULT_NTFY_SERVER.to_string()),
            topic,
            token: get("NTFY_TOKEN"),
        });
    }
    if let Some(webhook_url) = get("FEISHU_WEBHOOK_URL") {
        channels.push(Channel::Feishu {
            webhook_url,
            msg_type: parse_format(lookup, "FEISHU_MSG_TYPE")?.unwrap_or_default(),
        });
    }
    if let Some(webhook_url) = get("WEWORK_WEBHOOK_URL") {
        channels.push(Channel::WeWork {
            webhook_url,
            msg_type: parse_format(lookup, "WEWORK_MSG_TYPE")?.unwrap_or_default(),
        });
    }
    if let Some(webhook_url) = get("DINGTALK_WEBHOOK_URL") {
        channels.push(Channel::DingTalk {
            webhook_url,
            msg_type: parse_format(lookup, "DINGTALK_MSG_TYPE")?.unwrap_or_default(),
        });
    }
    if let (Some(server), Some(token)) = (get("GOTIFY_SERVER"), get("GOTIFY_TOKEN")) {
        let mut priority: u8 = 5;
        set_parsed(lookup, "GOTIFY_PRIORITY", &mut priority)?;
        channels.push(Channel::Gotify {
            server,
            token,
            priority,
            title: get("GOTIFY_TITLE"),
        });
    }

    Ok(channels)
}

// =============================================================================
// Tests
// =============================================================================
