use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod request;
pub mod stress;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an in-process echo provider and send it one request.
    Request(RequestArgs),
    /// Drive one provider from many consumer threads and report.
    Stress(StressArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Request(args) => request::run(args, format),
        Command::Stress(args) => stress::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Request payload.
    #[arg(long, short = 'd', default_value = "ping")]
    pub data: String,
    /// Have the provider upper-case its reply.
    #[arg(long)]
    pub upper: bool,
    /// How long the provider sleeps before answering (e.g. 200ms).
    #[arg(long)]
    pub delay: Option<String>,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct StressArgs {
    /// Number of consumer threads.
    #[arg(long, short = 'c', default_value = "4")]
    pub consumers: usize,
    /// Requests sent by each consumer.
    #[arg(long, short = 'n', default_value = "1000")]
    pub requests: usize,
    /// Listener capacity of the channel. Default: one per consumer.
    #[arg(long)]
    pub capacity: Option<usize>,
    /// Per-request reply timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration(" 3 ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        for bad in ["", "0s", "0ms", "bad", "1.5s", "-1s"] {
            let err = parse_duration(bad).expect_err("should be rejected");
            assert_eq!(err.code, USAGE, "{bad:?}");
        }
    }
}
