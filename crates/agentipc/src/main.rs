mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "agentipc", version, about = "In-process provider/consumer IPC")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "warn",
        env = "AGENTIPC_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_subcommand() {
        let cli = Cli::try_parse_from([
            "agentipc",
            "request",
            "--data",
            "hello",
            "--upper",
            "--timeout",
            "500ms",
        ])
        .expect("request args should parse");

        match cli.command {
            Command::Request(args) => {
                assert_eq!(args.data, "hello");
                assert!(args.upper);
                assert_eq!(args.timeout, "500ms");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_stress_subcommand_with_global_flags() {
        let cli = Cli::try_parse_from([
            "agentipc",
            "stress",
            "--consumers",
            "8",
            "--requests",
            "10",
            "--format",
            "json",
            "--log-level",
            "debug",
        ])
        .expect("stress args should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        match cli.command {
            Command::Stress(args) => {
                assert_eq!(args.consumers, 8);
                assert_eq!(args.requests, 10);
                assert!(args.capacity.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_subcommand() {
        let err = Cli::try_parse_from(["agentipc", "listen"]).expect_err("should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }
}
