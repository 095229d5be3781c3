use std::path::PathBuf;

use clap::Parser;

const EXAMPLE: &str = "Example:
  docker-notifier --interval 30 --telegram-token \"xxx\" --telegram-chat-id \"-xxx\" \\
      --error-pattern \"ERROR\" --error-pattern \"FATAL\"";

/// Monitor container logs and send alerts to Telegram.
///
/// Every option can also be set in the TOML file given with `--config`.
/// Options on the command line win over the file.
#[derive(Parser, Debug, Default)]
#[command(version, about, long_about = None, after_help = EXAMPLE)]
pub struct Args {
    /// Path to a TOML config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log polling interval in seconds [default: 5]
    #[arg(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Only watch containers labelled com.andvarfolomeev.dockernotifier.enable=true
    #[arg(long)]
    pub label_enable: bool,

    /// Telegram Bot API token (required)
    #[arg(long)]
    pub telegram_token: Option<String>,

    /// Target chat ID (required)
    #[arg(long)]
    pub telegram_chat_id: Option<String>,

    /// Bot API server, for self-hosted deployments [default: https://api.telegram.org]
    #[arg(long, value_name = "URL")]
    pub telegram_api_url: Option<String>,

    /// Regex matched case-insensitively against every log line; repeat for
    /// more patterns [default: ERROR]
    #[arg(long = "error-pattern", value_name = "PATTERN")]
    pub error_patterns: Vec<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_repeated_patterns() {
        let args = Args::try_parse_from([
            "docker-notifier",
            "--telegram-token",
            "t",
            "--telegram-chat-id",
            "-42",
            "--error-pattern",
            "ERROR",
            "--error-pattern",
            "FATAL",
            "--interval",
            "30",
            "--label-enable",
        ])
        .expect("Failed to parse args");

        assert_eq!(args.error_patterns, vec!["ERROR", "FATAL"]);
        assert_eq!(args.interval, Some(30));
        assert_eq!(args.telegram_chat_id.as_deref(), Some("-42"));
        assert!(args.label_enable);
        assert!(!args.debug);
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_parse_rejects_negative_interval() {
        assert!(Args::try_parse_from(["docker-notifier", "--interval", "-1"]).is_err());
    }
}
