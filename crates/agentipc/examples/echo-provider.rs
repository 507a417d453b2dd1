//! One provider, a handful of consumer threads, one dispatch loop.
//!
//! Run with:
//!   cargo run --example echo-provider

use std::thread;

use agentipc::channel::{ChannelConfig, ProviderRegistry};
use agentipc::frame::{status, Reply, Request};

const CONSUMERS: usize = 3;

fn handle(request: &Request) -> Reply {
    match request.text() {
        Ok("ping") => Reply::ok("PONG"),
        Ok(text) => Reply::ok(text.to_uppercase()),
        Err(_) => Reply::new(status::PARAM, "request is not UTF-8"),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = ProviderRegistry::new();
    registry.add_provider("echo", ChannelConfig::with_capacity(CONSUMERS))?;
    registry.set_handler("echo", handle)?;
    registry.set_start("echo", ProviderRegistry::start)?;

    // Every connection is registered before the dispatch loop starts.
    let consumers = (0..CONSUMERS)
        .map(|_| registry.register("echo"))
        .collect::<Result<Vec<_>, _>>()?;
    let handles = registry.start_all()?;

    let workers: Vec<_> = consumers
        .into_iter()
        .map(|mut consumer| {
            thread::spawn(move || -> Result<(), agentipc::channel::ChannelError> {
                for command in ["ping", "hello"] {
                    let reply = consumer.send_text(command)?;
                    eprintln!(
                        "{} {command} -> {} {}",
                        consumer.id(),
                        reply.status,
                        String::from_utf8_lossy(&reply.payload)
                    );
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        if let Err(err) = worker.join().map_err(|_| "consumer thread panicked")? {
            eprintln!("consumer failed: {err}");
        }
    }

    for handle in handles {
        let stats = handle.stop_and_join()?;
        eprintln!(
            "dispatch stopped: {} requests, {} connections closed",
            stats.requests, stats.closed
        );
    }
    Ok(())
}
