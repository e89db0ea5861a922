//! Application-level configuration loading, including the static problem catalogue.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::external::problems::Problem;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CHRONOCODE_CONFIG_PATH";
/// Length of a battle counted from the room's `startTime`.
const DEFAULT_BATTLE_DURATION_SECS: u64 = 300;
/// Longest accepted battle; larger configured values are clamped to it.
const MAX_BATTLE_DURATION_SECS: u64 = 24 * 60 * 60;
/// Find-or-create cycles attempted before a join conflict is surfaced.
const DEFAULT_JOIN_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    battle_duration: Duration,
    join_attempts: u32,
    problems: Vec<Problem>,
    problem_bank_url: Option<String>,
    judge_url: Option<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        problems = app_config.problems.len(),
                        battle_duration_secs = app_config.battle_duration.as_secs(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Fixed battle length.
    pub fn battle_duration(&self) -> Duration {
        self.battle_duration
    }

    /// Bound on matchmaking retries after losing a join race.
    pub fn join_attempts(&self) -> u32 {
        self.join_attempts
    }

    /// Static problem catalogue.
    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// Base URL of a remote problem bank, if configured.
    pub fn problem_bank_url(&self) -> Option<&str> {
        self.problem_bank_url.as_deref()
    }

    /// Base URL of a remote judge, if configured.
    pub fn judge_url(&self) -> Option<&str> {
        self.judge_url.as_deref()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            battle_duration: Duration::from_secs(DEFAULT_BATTLE_DURATION_SECS),
            join_attempts: DEFAULT_JOIN_ATTEMPTS,
            problems: default_problems(),
            problem_bank_url: None,
            judge_url: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    battle_duration_secs: Option<u64>,
    join_attempts: Option<u32>,
    problems: Option<Vec<RawProblem>>,
    problem_bank_url: Option<String>,
    judge_url: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        let problems = match value.problems {
            Some(problems) if !problems.is_empty() => {
                problems.into_iter().map(Into::into).collect()
            }
            _ => defaults.problems,
        };

        Self {
            battle_duration: value
                .battle_duration_secs
                .filter(|secs| *secs > 0)
                .map(|secs| Duration::from_secs(secs.min(MAX_BATTLE_DURATION_SECS)))
                .unwrap_or(defaults.battle_duration),
            join_attempts: value
                .join_attempts
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.join_attempts),
            problems,
            problem_bank_url: value.problem_bank_url.filter(|url| !url.is_empty()),
            judge_url: value.judge_url.filter(|url| !url.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single catalogue entry.
struct RawProblem {
    id: String,
    title: Option<String>,
    description: Option<String>,
}

impl From<RawProblem> for Problem {
    fn from(value: RawProblem) -> Self {
        Self {
            title: value.title.unwrap_or_else(|| value.id.clone()),
            description: value.description.unwrap_or_default(),
            id: value.id,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in catalogue shipped with the binary.
fn default_problems() -> Vec<Problem> {
    (1..=5)
        .map(|index| Problem {
            id: format!("problem_{index}"),
            title: format!("Problem {index}"),
            description: String::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_battle_rules() {
        let config = AppConfig::default();
        assert_eq!(config.battle_duration(), Duration::from_secs(300));
        assert_eq!(config.join_attempts(), 5);
        let ids: Vec<_> = config.problems().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            ["problem_1", "problem_2", "problem_3", "problem_4", "problem_5"]
        );
        assert!(config.problem_bank_url().is_none());
        assert!(config.judge_url().is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = AppConfig::from_json(r#"{ "battle_duration_secs": 60 }"#).unwrap();
        assert_eq!(config.battle_duration(), Duration::from_secs(60));
        assert_eq!(config.join_attempts(), 5);
        assert_eq!(config.problems().len(), 5);
    }

    #[test]
    fn custom_catalogue_replaces_default() {
        let config = AppConfig::from_json(
            r#"{ "problems": [{ "id": "two_sum", "title": "Two Sum" }, { "id": "fizz" }] }"#,
        )
        .unwrap();
        assert_eq!(config.problems().len(), 2);
        assert_eq!(config.problems()[0].title, "Two Sum");
        assert_eq!(config.problems()[1].title, "fizz");
    }

    #[test]
    fn zero_values_and_empty_urls_are_ignored() {
        let config = AppConfig::from_json(
            r#"{ "battle_duration_secs": 0, "join_attempts": 0, "judge_url": "" }"#,
        )
        .unwrap();
        assert_eq!(config.battle_duration(), Duration::from_secs(300));
        assert_eq!(config.join_attempts(), 5);
        assert!(config.judge_url().is_none());
    }

    #[test]
    fn huge_battle_duration_is_clamped() {
        let config = AppConfig::from_json(
            r#"{ "battle_duration_secs": 18446744073709551615 }"#,
        )
        .unwrap();
        assert_eq!(
            config.battle_duration(),
            Duration::from_secs(MAX_BATTLE_DURATION_SECS)
        );
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(AppConfig::from_json("{ not json").is_err());
    }
}
