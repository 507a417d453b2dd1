use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use agentipc_frame::{write_reply, FrameConfig, FrameError, RequestReader};
use agentipc_transport::{wait_readable, IpcStream};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelConfig, Listener};
use crate::error::{ChannelError, Result};
use crate::handler::Handler;

/// Counters reported by a dispatch loop when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Requests answered.
    pub requests: u64,
    /// Connections closed, for any reason.
    pub closed: u64,
    /// Connections closed because of a protocol or I/O fault.
    pub faults: u64,
}

/// Asks a dispatch loop to stop.
///
/// Cloneable; any clone may signal. The loop notices at the top of its next
/// readiness wait, finishing the requests already in hand first.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

struct StopInner {
    stopped: AtomicBool,
    wake: IpcStream,
}

impl StopSignal {
    fn new() -> Result<(Self, IpcStream)> {
        let (wake, wake_rx) = IpcStream::pair()?;
        wake.set_nonblocking(true)?;
        wake_rx.set_nonblocking(true)?;
        let signal = Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                wake,
            }),
        };
        Ok((signal, wake_rx))
    }

    /// Request the loop to stop.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // A full buffer already wakes the loop; a closed peer means it is gone.
        let _ = (&self.inner.wake).write(&[1]);
    }

    /// True once stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Bound every provider-side read and write once a request is in progress.
fn configure_listeners(listeners: &[Listener], config: &ChannelConfig) -> Result<()> {
    for listener in listeners {
        listener
            .stream
            .set_read_timeout(config.listener_read_timeout)?;
        listener
            .stream
            .set_write_timeout(config.listener_read_timeout)?;
    }
    Ok(())
}

/// The provider-side loop serving every listener of one channel.
pub(crate) struct Dispatcher {
    channel: String,
    listeners: Vec<Listener>,
    handler: Box<dyn Handler>,
    frame_config: FrameConfig,
    stop: StopSignal,
    wake: IpcStream,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Build the loop for `channel`, taking its listeners and handler.
    ///
    /// Every fallible step runs before the channel is frozen, so a failure
    /// leaves it startable.
    pub(crate) fn for_channel(channel: &mut Channel) -> Result<Self> {
        channel.check_startable()?;
        let config = channel.config().clone();
        let (stop, wake) = StopSignal::new()?;
        configure_listeners(channel.listeners(), &config)?;
        let (listeners, handler) = channel.take_for_dispatch()?;

        Ok(Self::assemble(
            channel.name().to_string(),
            listeners,
            handler,
            &config,
            stop,
            wake,
        ))
    }

    #[cfg(test)]
    pub(crate) fn new(
        channel: String,
        listeners: Vec<Listener>,
        handler: Box<dyn Handler>,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let (stop, wake) = StopSignal::new()?;
        configure_listeners(&listeners, config)?;
        Ok(Self::assemble(channel, listeners, handler, config, stop, wake))
    }

    fn assemble(
        channel: String,
        listeners: Vec<Listener>,
        handler: Box<dyn Handler>,
        config: &ChannelConfig,
        stop: StopSignal,
        wake: IpcStream,
    ) -> Self {
        Self {
            channel,
            listeners,
            handler,
            frame_config: FrameConfig {
                max_payload_size: config.max_request_size,
                read_timeout: config.listener_read_timeout,
                write_timeout: config.listener_read_timeout,
            },
            stop,
            wake,
            stats: DispatchStats::default(),
        }
    }

    pub(crate) fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run until stopped. Only a failed readiness wait ends the loop with an error.
    pub(crate) fn run(mut self) -> Result<DispatchStats> {
        info!(
            channel = %self.channel,
            listeners = self.listeners.len(),
            "dispatch loop started"
        );

        while !self.stop.is_stopped() {
            let mut fds = Vec::with_capacity(self.listeners.len() + 1);
            fds.push(self.wake.as_raw_fd());
            fds.extend(self.listeners.iter().map(|l| l.stream.as_raw_fd()));

            let ready = match wait_readable(&fds, None) {
                Ok(ready) => ready,
                Err(err) => {
                    error!(channel = %self.channel, error = %err, "readiness wait failed");
                    return Err(err.into());
                }
            };

            if ready[0].is_ready() {
                self.drain_wake();
            }

            let mut closing = Vec::new();
            for (index, readiness) in ready[1..].iter().enumerate() {
                if !readiness.is_ready() {
                    continue;
                }
                if let Err(err) = self.serve(index) {
                    self.record_close(index, &err);
                    closing.push(index);
                }
            }

            for index in closing.into_iter().rev() {
                let listener = self.listeners.remove(index);
                let _ = listener.stream.shutdown();
            }
        }

        info!(
            channel = %self.channel,
            requests = self.stats.requests,
            closed = self.stats.closed,
            faults = self.stats.faults,
            "dispatch loop stopped"
        );
        Ok(self.stats)
    }

    /// Read one request from a ready listener, run the handler, write the reply.
    fn serve(&mut self, index: usize) -> std::result::Result<(), FrameError> {
        let listener = &self.listeners[index];
        let mut reader = RequestReader::with_config(&listener.stream, self.frame_config.clone());
        let request = reader.read_request()?;

        let reply = self.handler.handle(&request);
        debug!(
            channel = %self.channel,
            connection = %listener.id,
            size = request.len(),
            status = reply.status,
            "served request"
        );
        drop(request);

        write_reply(&mut &listener.stream, &reply)?;
        self.stats.requests += 1;
        Ok(())
    }

    fn record_close(&mut self, index: usize, err: &FrameError) {
        let connection = self.listeners[index].id;
        self.stats.closed += 1;
        match err {
            FrameError::ConnectionClosed => {
                debug!(channel = %self.channel, %connection, "consumer closed connection");
            }
            FrameError::Io(_) if err.is_disconnect() => {
                debug!(channel = %self.channel, %connection, error = %err, "consumer gone");
            }
            other => {
                self.stats.faults += 1;
                warn!(
                    channel = %self.channel,
                    %connection,
                    error = %other,
                    "closing connection after protocol fault"
                );
            }
        }
    }

    fn drain_wake(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.wake.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

/// Handle to a running dispatch loop.
///
/// Dropping the handle detaches the loop; it then runs for the life of the
/// process.
#[derive(Debug)]
pub struct DispatchHandle {
    channel: String,
    stop: StopSignal,
    thread: JoinHandle<Result<DispatchStats>>,
}

impl DispatchHandle {
    pub(crate) fn spawn(dispatcher: Dispatcher) -> Result<Self> {
        let channel = dispatcher.channel.clone();
        let stop = dispatcher.stop_signal();
        let thread = std::thread::Builder::new()
            .name(format!("ipc-{channel}"))
            .spawn(move || dispatcher.run())
            .map_err(|err| ChannelError::Transport(err.into()))?;

        Ok(Self {
            channel,
            stop,
            thread,
        })
    }

    /// Name of the channel this loop serves.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// A stop signal that outlives the handle.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Ask the loop to stop without waiting for it.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// True once the dispatch thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the loop to exit.
    pub fn join(self) -> Result<DispatchStats> {
        match self.thread.join() {
            Ok(result) => result,
            Err(_) => Err(ChannelError::DispatchPanicked(self.channel)),
        }
    }

    /// Stop the loop and wait for it to exit.
    pub fn stop_and_join(self) -> Result<DispatchStats> {
        self.stop();
        self.join()
    }
}
