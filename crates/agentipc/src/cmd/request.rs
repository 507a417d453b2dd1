use std::thread;
use std::time::Instant;

use agentipc_channel::{ChannelConfig, ProviderRegistry};
use agentipc_frame::{status, Reply, Request};
use tracing::debug;

use crate::cmd::{parse_duration, RequestArgs};
use crate::exit::{channel_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_reply, OutputFormat};

const PROVIDER: &str = "echo";

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let delay = args.delay.as_deref().map(parse_duration).transpose()?;

    let registry = ProviderRegistry::new();
    registry
        .add_provider(
            PROVIDER,
            ChannelConfig {
                capacity: 1,
                request_timeout: timeout,
                ..ChannelConfig::default()
            },
        )
        .map_err(|err| channel_error("add provider failed", err))?;
    let upper = args.upper;
    registry
        .set_handler(PROVIDER, move |request: &Request| {
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
            echo(request, upper)
        })
        .map_err(|err| channel_error("set handler failed", err))?;
    registry
        .set_start(PROVIDER, ProviderRegistry::start)
        .map_err(|err| channel_error("set start failed", err))?;

    let mut consumer = registry
        .register(PROVIDER)
        .map_err(|err| channel_error("register failed", err))?;
    let handles = registry
        .start_all()
        .map_err(|err| channel_error("start failed", err))?;

    let started = Instant::now();
    let result = consumer.send(args.data.as_bytes());
    let elapsed = started.elapsed();
    debug!(elapsed_us = elapsed.as_micros() as u64, "request finished");

    // Close the connection first so a still-sleeping handler finds it gone.
    drop(consumer);
    for handle in handles {
        handle.stop();
    }

    let reply = result.map_err(|err| channel_error("request failed", err))?;
    print_reply(&reply, PROVIDER, elapsed, format);
    Ok(if reply.is_ok() { SUCCESS } else { FAILURE })
}

fn echo(request: &Request, upper: bool) -> Reply {
    if request.is_empty() {
        return Reply::new(status::TOOFEW, "empty request");
    }
    match request.text() {
        Ok(text) if upper => Reply::ok(text.to_uppercase()),
        Ok(_) => Reply::ok(request.clone().into_bytes()),
        Err(_) => Reply::new(status::PARAM, "request is not valid UTF-8"),
    }
}
