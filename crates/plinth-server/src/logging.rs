//! Logging configuration and initialization.
//!
//! Presets pick a level per `plinth::` target, CLI overrides adjust single
//! targets, and `RUST_LOG` replaces the whole filter when set.

use std::collections::HashMap;

use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const TARGET_PREFIX: &str = "plinth::";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{}'. Use 'text' or 'json'.", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Startup, monitoring and failures
    #[default]
    Production,
    Verbose,
    Debug,
    /// Everything, including per-message fanout traces
    Trace,
    /// Warnings and errors only
    Quiet,
}

impl LogPreset {
    fn directives(&self) -> &'static [&'static str] {
        match self {
            LogPreset::Production => &[
                "plinth::startup=info",
                "plinth::monitoring=info",
                "plinth::dispatch=warn",
                "plinth::ws=warn",
                "plinth::fanout=info",
                "tower_http=warn",
            ],
            LogPreset::Verbose => &["plinth=info", "tower_http=info"],
            LogPreset::Debug => &["plinth=debug", "plinth::fanout=info", "tower_http=debug"],
            LogPreset::Trace => &["plinth=trace", "tower_http=trace"],
            LogPreset::Quiet => &["plinth=warn", "tower_http=error"],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    /// Per-target level overrides, keyed by full target name.
    pub overrides: HashMap<String, Level>,
    pub format: LogFormat,
}

impl LogConfig {
    /// Build from CLI flags. The quietest flag wins, then the most detailed.
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        log_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        let preset = if quiet {
            LogPreset::Quiet
        } else if trace {
            LogPreset::Trace
        } else if debug {
            LogPreset::Debug
        } else if verbose {
            LogPreset::Verbose
        } else {
            LogPreset::Production
        };

        let overrides = log_overrides
            .iter()
            .flat_map(|arg| arg.split(','))
            .filter_map(|part| {
                let (target, level) = part.split_once('=')?;
                let level = parse_level(level.trim())?;
                Some((qualify(target.trim()), level))
            })
            .collect();

        Self {
            preset,
            overrides,
            format,
        }
    }

    pub fn build_filter(&self) -> EnvFilter {
        if let Ok(env_filter) = EnvFilter::try_from_default_env() {
            return env_filter;
        }
        EnvFilter::try_new(self.directives()).unwrap_or_else(|_| EnvFilter::new("info"))
    }

    fn directives(&self) -> String {
        let mut directives: Vec<String> = self
            .preset
            .directives()
            .iter()
            .map(|d| d.to_string())
            .collect();
        let mut overrides: Vec<_> = self.overrides.iter().collect();
        overrides.sort();
        for (target, level) in overrides {
            directives.push(format!("{}={}", target, level.as_str().to_lowercase()));
        }
        directives.join(",")
    }
}

/// "ws" -> "plinth::ws"; full names and `tower_http` pass through.
fn qualify(target: &str) -> String {
    if target.starts_with(TARGET_PREFIX) || target == "plinth" || target == "tower_http" {
        target.to_string()
    } else {
        format!("{}{}", TARGET_PREFIX, target)
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

pub fn init(config: &LogConfig) {
    let filter = config.build_filter();

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).with_thread_names(true))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_preset_priority() {
        let config = LogConfig::from_cli(true, true, true, true, vec![], LogFormat::Text);
        assert_eq!(config.preset, LogPreset::Quiet);
        let config = LogConfig::from_cli(true, true, false, false, vec![], LogFormat::Text);
        assert_eq!(config.preset, LogPreset::Debug);
        let config = LogConfig::from_cli(false, false, false, false, vec![], LogFormat::Text);
        assert_eq!(config.preset, LogPreset::Production);
    }

    #[test]
    fn test_overrides_are_qualified() {
        let config = LogConfig::from_cli(
            false,
            false,
            false,
            false,
            vec!["fanout=trace,ws=debug".into(), "tower_http=info".into(), "bogus".into()],
            LogFormat::Text,
        );
        assert_eq!(config.overrides.get("plinth::fanout"), Some(&Level::TRACE));
        assert_eq!(config.overrides.get("plinth::ws"), Some(&Level::DEBUG));
        assert_eq!(config.overrides.get("tower_http"), Some(&Level::INFO));
        assert_eq!(config.overrides.len(), 3);
    }

    #[test]
    fn test_overrides_follow_preset_directives() {
        let config = LogConfig::from_cli(
            false,
            false,
            false,
            true,
            vec!["plinth::monitoring=info".into()],
            LogFormat::Text,
        );
        assert_eq!(
            config.directives(),
            "plinth=warn,tower_http=error,plinth::monitoring=info"
        );
    }
}
