// Configuration: per-game timing/rules and the host's trivia.toml.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// GameConfig
// ---------------------------------------------------------------------------

/// Timing and rule settings for one game. Each game gets its own copy, so
/// sessions running side by side may use different values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameConfig {
    /// How long a round accepts answers.
    pub round_duration: Duration,
    /// Cadence of "time left" ticks and of batched reveal snapshots.
    pub tick_interval: Duration,
    /// Pause between a round's ranking and the next round.
    pub delay_between_rounds: Duration,
    pub rounds_per_game: u32,
    /// Emit a WrongAnswer event (with time left) for every incorrect guess.
    pub tick_after_wrong_answer: bool,
    /// Restrict question selection to the first N positions of the channel's
    /// permutation. 0 means the whole pool.
    pub question_limit: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(90),
            tick_interval: Duration::from_secs(10),
            delay_between_rounds: Duration::from_secs(5),
            rounds_per_game: 3,
            tick_after_wrong_answer: false,
            question_limit: 0,
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rounds_per_game == 0 {
            return Err(ConfigError::ValidationError {
                field: "game.rounds_per_game".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.round_duration.is_zero() {
            return Err(ConfigError::ValidationError {
                field: "game.round_duration_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ValidationError {
                field: "game.tick_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.tick_interval > self.round_duration {
            return Err(ConfigError::ValidationError {
                field: "game.tick_interval_secs".into(),
                message: format!(
                    "must not exceed round duration ({}s), got {}s",
                    self.round_duration.as_secs(),
                    self.tick_interval.as_secs()
                ),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// trivia.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire trivia.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    game: GameSection,
    database: DatabaseSection,
    questions: QuestionsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct GameSection {
    round_duration_secs: u64,
    tick_interval_secs: u64,
    delay_between_rounds_secs: u64,
    rounds_per_game: u32,
    tick_after_wrong_answer: bool,
    question_limit: usize,
}

impl Default for GameSection {
    fn default() -> Self {
        let defaults = GameConfig::default();
        Self {
            round_duration_secs: defaults.round_duration.as_secs(),
            tick_interval_secs: defaults.tick_interval.as_secs(),
            delay_between_rounds_secs: defaults.delay_between_rounds.as_secs(),
            rounds_per_game: defaults.rounds_per_game,
            tick_after_wrong_answer: defaults.tick_after_wrong_answer,
            question_limit: defaults.question_limit,
        }
    }
}

impl From<GameSection> for GameConfig {
    fn from(s: GameSection) -> Self {
        Self {
            round_duration: Duration::from_secs(s.round_duration_secs),
            tick_interval: Duration::from_secs(s.tick_interval_secs),
            delay_between_rounds: Duration::from_secs(s.delay_between_rounds_secs),
            rounds_per_game: s.rounds_per_game,
            tick_after_wrong_answer: s.tick_after_wrong_answer,
            question_limit: s.question_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct QuestionsSection {
    path: String,
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub game: GameConfig,
    pub db_path: String,
    pub questions_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/trivia.toml` relative to `base_dir`. A relative
/// questions path is resolved against `base_dir`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("trivia.toml");
    let text = std::fs::read_to_string(&path).map_err(|_| ConfigError::FileNotFound {
        path: path.clone(),
    })?;
    parse_config(&text, &path, base_dir)
}

fn parse_config(text: &str, path: &Path, base_dir: &Path) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let questions_path = PathBuf::from(&file.questions.path);
    let questions_path = if questions_path.is_relative() {
        base_dir.join(questions_path)
    } else {
        questions_path
    };

    let config = Config {
        game: file.game.into(),
        db_path: file.database.path,
        questions_path,
    };
    validate(&config)?;
    Ok(config)
}

/// Copy `defaults/trivia.toml` to `config/trivia.toml` when the latter is
/// missing. Returns the copied path, if any.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let default_path = base_dir.join("defaults").join("trivia.toml");
    let config_dir = base_dir.join("config");
    let target = config_dir.join("trivia.toml");

    if target.exists() {
        return Ok(None);
    }
    if !default_path.exists() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "neither defaults/trivia.toml nor config/trivia.toml found in {}",
                base_dir.display()
            ),
        });
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;
    std::fs::copy(&default_path, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {}: {e}", default_path.display()),
    })?;
    Ok(Some(target))
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures the default config file is copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    config.game.validate()?;
    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }
    Ok(())
}
