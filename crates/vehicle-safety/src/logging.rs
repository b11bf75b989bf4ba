//! Logging setup

use crate::config::LoggingConfig;
use crate::SafetyError;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parse a level name such as `info` or `DEBUG`
pub fn parse_level(level: &str) -> Result<Level, SafetyError> {
    level
        .trim()
        .parse::<Level>()
        .map_err(|_| SafetyError::InvalidLogLevel(level.to_string()))
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<(), SafetyError> {
    let level = parse_level(&config.level)?;
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let result = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.map_err(|e| SafetyError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level(" DEBUG ").unwrap(), Level::DEBUG);
        assert!(matches!(
            parse_level("loud"),
            Err(SafetyError::InvalidLogLevel(_))
        ));
    }
}
