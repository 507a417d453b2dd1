use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use agentipc_channel::{ChannelConfig, Consumer, ProviderRegistry};
use agentipc_frame::{Reply, Request};
use tracing::{debug, info, warn};

use crate::cmd::{parse_duration, StressArgs};
use crate::exit::{channel_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_stress, OutputFormat, StressReport};

const PROVIDER: &str = "stress";

/// Detects re-entrant handler calls.
#[derive(Default)]
struct Reentry {
    inside: AtomicUsize,
    overlaps: AtomicU64,
}

impl Reentry {
    fn enter(&self) {
        if self.inside.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn exit(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Tally {
    completed: u64,
    failed: u64,
    mismatched: u64,
}

pub fn run(args: StressArgs, format: OutputFormat) -> CliResult<i32> {
    if args.consumers == 0 || args.requests == 0 {
        return Err(CliError::new(
            USAGE,
            "--consumers and --requests must be greater than zero",
        ));
    }
    let timeout = parse_duration(&args.timeout)?;
    let capacity = args.capacity.unwrap_or(args.consumers);

    let registry = ProviderRegistry::new();
    registry
        .add_provider(
            PROVIDER,
            ChannelConfig {
                capacity,
                request_timeout: timeout,
                ..ChannelConfig::default()
            },
        )
        .map_err(|err| channel_error("add provider failed", err))?;

    let reentry = Arc::new(Reentry::default());
    let guard = Arc::clone(&reentry);
    registry
        .set_handler(PROVIDER, move |request: &Request| {
            guard.enter();
            let reply = Reply::ok(request.clone().into_bytes());
            guard.exit();
            reply
        })
        .map_err(|err| channel_error("set handler failed", err))?;

    let consumers = (0..args.consumers)
        .map(|_| registry.register(PROVIDER))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| channel_error("register failed", err))?;
    let handle = registry
        .start(PROVIDER)
        .map_err(|err| channel_error("start failed", err))?;
    debug!(providers = ?registry.providers(), "providers ready");
    info!(
        consumers = args.consumers,
        requests = args.requests,
        capacity,
        "stress run started"
    );

    let barrier = Arc::new(Barrier::new(args.consumers));
    let started = Instant::now();
    let workers: Vec<_> = consumers
        .into_iter()
        .map(|consumer| {
            let barrier = Arc::clone(&barrier);
            let requests = args.requests;
            thread::Builder::new()
                .name(format!("consumer-{}", consumer.id().get()))
                .spawn(move || {
                    barrier.wait();
                    drive(consumer, requests)
                })
        })
        .collect::<Result<_, _>>()
        .map_err(|err| crate::exit::io_error("spawn consumer failed", err))?;

    let mut tally = Tally::default();
    for worker in workers {
        let part = worker
            .join()
            .map_err(|_| CliError::new(INTERNAL, "consumer thread panicked"))?;
        tally.completed += part.completed;
        tally.failed += part.failed;
        tally.mismatched += part.mismatched;
    }
    let elapsed = started.elapsed();

    let dispatch = handle
        .stop_and_join()
        .map_err(|err| channel_error("dispatch loop failed", err))?;

    let report = StressReport {
        channel: PROVIDER.to_string(),
        consumers: args.consumers,
        requests_per_consumer: args.requests,
        completed: tally.completed,
        failed: tally.failed,
        mismatched: tally.mismatched,
        overlapping_calls: reentry.overlaps.load(Ordering::SeqCst),
        elapsed_ms: elapsed.as_millis(),
        requests_per_sec: tally.completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        dispatch,
    };
    print_stress(&report, format);

    Ok(if report.passed() { SUCCESS } else { FAILURE })
}

fn drive(mut consumer: Consumer, requests: usize) -> Tally {
    let mut tally = Tally::default();
    for n in 0..requests {
        let body = format!("{}:{n}", consumer.id());
        match consumer.send_text(&body) {
            Ok(reply) if reply.is_ok() && reply.payload == body.as_bytes() => tally.completed += 1,
            Ok(reply) => {
                warn!(connection = %consumer.id(), status = reply.status, "unexpected reply");
                tally.mismatched += 1;
            }
            Err(err) => {
                warn!(connection = %consumer.id(), error = %err, "request failed");
                tally.failed += 1;
                if !err.is_retryable() {
                    tally.failed += (requests - n - 1) as u64;
                    break;
                }
            }
        }
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentry_counts_overlaps() {
        let reentry = Reentry::default();
        reentry.enter();
        reentry.enter();
        reentry.exit();
        reentry.exit();
        reentry.enter();
        reentry.exit();
        assert_eq!(reentry.overlaps.load(Ordering::SeqCst), 1);
    }
}
