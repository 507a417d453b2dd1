use std::io::{IsTerminal, Write};
use std::time::Duration;

use agentipc_channel::DispatchStats;
use agentipc_frame::{status, Reply};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    channel: &'a str,
    status: u16,
    status_name: &'static str,
    size: usize,
    body: String,
    elapsed_us: u128,
}

pub fn print_reply(reply: &Reply, channel: &str, elapsed: Duration, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                channel,
                status: reply.status,
                status_name: status::status_name(reply.status),
                size: reply.payload.len(),
                body: body_preview(&reply.payload),
                elapsed_us: elapsed.as_micros(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "STATUS", "SIZE", "ELAPSED", "BODY"])
                .add_row(vec![
                    channel.to_string(),
                    format!("{} {}", reply.status, status::status_name(reply.status)),
                    reply.payload.len().to_string(),
                    format!("{elapsed:?}"),
                    body_preview(&reply.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} status={} ({}) size={} elapsed={:?} body={}",
                channel,
                reply.status,
                status::status_name(reply.status),
                reply.payload.len(),
                elapsed,
                body_preview(&reply.payload)
            );
        }
        OutputFormat::Raw => print_raw(&reply.payload),
    }
}

/// Outcome of a `stress` run.
#[derive(Debug, Serialize)]
pub struct StressReport {
    pub channel: String,
    pub consumers: usize,
    pub requests_per_consumer: usize,
    pub completed: u64,
    pub failed: u64,
    pub mismatched: u64,
    pub overlapping_calls: u64,
    pub elapsed_ms: u128,
    pub requests_per_sec: f64,
    pub dispatch: DispatchStats,
}

impl StressReport {
    pub fn passed(&self) -> bool {
        self.failed == 0 && self.mismatched == 0 && self.overlapping_calls == 0
    }
}

pub fn print_stress(report: &StressReport, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METRIC", "VALUE"]);
            for (metric, value) in [
                ("channel", report.channel.clone()),
                ("consumers", report.consumers.to_string()),
                ("requests/consumer", report.requests_per_consumer.to_string()),
                ("completed", report.completed.to_string()),
                ("failed", report.failed.to_string()),
                ("mismatched", report.mismatched.to_string()),
                ("overlapping calls", report.overlapping_calls.to_string()),
                ("elapsed (ms)", report.elapsed_ms.to_string()),
                ("requests/sec", format!("{:.0}", report.requests_per_sec)),
                ("connections closed", report.dispatch.closed.to_string()),
                ("connection faults", report.dispatch.faults.to_string()),
            ] {
                table.add_row(vec![metric.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} consumers x {} requests on '{}': completed={} failed={} mismatched={} \
                 overlapping={} in {}ms ({:.0} req/s)",
                report.consumers,
                report.requests_per_consumer,
                report.channel,
                report.completed,
                report.failed,
                report.mismatched,
                report.overlapping_calls,
                report.elapsed_ms,
                report.requests_per_sec
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn body_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
