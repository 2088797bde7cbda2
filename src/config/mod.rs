use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Criteria used when `create_tree` is called without any.
pub const DEFAULT_CRITERIA: [&str; 3] = ["feasibility", "complexity", "risk"];

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Where tree records are kept.
    pub storage: StorageConfig,
    /// Log filter and output format.
    pub logging: LoggingConfig,
    /// Defaults for new trees and selections.
    pub search: SearchConfig,
}

/// Durable record configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding one JSON record per thought tree.
    pub data_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `mcp_thought_tree=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable output.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Defaults applied to new trees and selections
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Criteria for trees created without any.
    pub default_criteria: Vec<String>,
    /// Depth ceiling for trees created without one.
    pub default_max_depth: u32,
    /// Beam width when `select_path` is not given one.
    pub default_beam_width: usize,
    /// Minimum dissimilarity the diverse strategy requires, in [0, 1].
    pub diversity_threshold: f64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let storage = StorageConfig {
            data_dir: env::var("TOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_data_dir()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: env::var("LOG_FORMAT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(LogFormat::Pretty),
        };

        let default_criteria = match env::var("TOT_DEFAULT_CRITERIA") {
            Ok(raw) => parse_criteria(&raw),
            Err(_) => SearchConfig::default().default_criteria,
        };

        let search = SearchConfig {
            default_criteria,
            default_max_depth: env::var("TOT_DEFAULT_MAX_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            default_beam_width: env::var("TOT_DEFAULT_BEAM_WIDTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            diversity_threshold: env::var("TOT_DIVERSITY_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.3),
        };
        search.validate()?;

        Ok(Config {
            storage,
            logging,
            search,
        })
    }
}

impl SearchConfig {
    /// Reject defaults that would produce trees violating their own invariants.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.default_criteria.is_empty() {
            return Err(AppError::Config {
                message: "TOT_DEFAULT_CRITERIA must name at least one criterion".to_string(),
            });
        }
        if self.default_max_depth == 0 {
            return Err(AppError::Config {
                message: "TOT_DEFAULT_MAX_DEPTH must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.diversity_threshold) {
            return Err(AppError::Config {
                message: format!(
                    "TOT_DIVERSITY_THRESHOLD must be within [0.0, 1.0], got {}",
                    self.diversity_threshold
                ),
            });
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/thought-trees"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_criteria: DEFAULT_CRITERIA.iter().map(|c| c.to_string()).collect(),
            default_max_depth: 5,
            default_beam_width: 3,
            diversity_threshold: 0.3,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    match env::var("CODEAGENT_HOME") {
        Ok(home) => PathBuf::from(home).join("data").join("thought-trees"),
        Err(_) => StorageConfig::default().data_dir,
    }
}

fn parse_criteria(raw: &str) -> Vec<String> {
    let mut criteria: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        if !criteria.iter().any(|c| c == name) {
            criteria.push(name.to_string());
        }
    }
    criteria
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_config_default() {
        let config = SearchConfig::default();
        assert_eq!(
            config.default_criteria,
            vec!["feasibility", "complexity", "risk"]
        );
        assert_eq!(config.default_max_depth, 5);
        assert_eq!(config.default_beam_width, 3);
        assert!((config.diversity_threshold - 0.3).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_search_config_rejects_bad_threshold() {
        let config = SearchConfig {
            diversity_threshold: 1.5,
            ..SearchConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TOT_DIVERSITY_THRESHOLD"));
    }

    #[test]
    fn test_search_config_rejects_zero_depth() {
        let config = SearchConfig {
            default_max_depth: 0,
            ..SearchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_search_config_rejects_empty_criteria() {
        let config = SearchConfig {
            default_criteria: Vec::new(),
            ..SearchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_criteria() {
        assert_eq!(
            parse_criteria(" speed, ,cost ,risk"),
            vec!["speed", "cost", "risk"]
        );
        assert!(parse_criteria(" , ").is_empty());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
