use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::{Result, TransportError};

/// Readiness reported for one endpoint by [`wait_readable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Nothing to do for this endpoint.
    Idle,
    /// Data (or end-of-stream) can be read without blocking.
    Readable,
    /// The endpoint hung up or errored with no pending data.
    Hangup,
}

impl Readiness {
    /// True when the caller should service the endpoint.
    pub fn is_ready(self) -> bool {
        !matches!(self, Readiness::Idle)
    }
}

/// Block until at least one of `fds` is readable, or `timeout` elapses.
///
/// This is a level-triggered `poll(2)` for `POLLIN`. `None` waits forever.
/// A wait interrupted by a signal (`EINTR`) is retried transparently. The
/// returned vector is index-aligned with `fds`; on timeout every entry is
/// [`Readiness::Idle`].
pub fn wait_readable(fds: &[RawFd], timeout: Option<Duration>) -> Result<Vec<Readiness>> {
    let nfds = libc::nfds_t::try_from(fds.len()).map_err(|_| TransportError::TooManyEndpoints {
        count: fds.len(),
        max: libc::nfds_t::MAX as usize,
    })?;

    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let timeout_ms = timeout_to_millis(timeout);

    loop {
        // SAFETY: `pollfds` is a valid, exclusively borrowed array of exactly `nfds`
        // initialized `pollfd` entries for the duration of the call.
        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), nfds, timeout_ms) };
        if rc >= 0 {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(TransportError::Poll(err));
    }

    Ok(pollfds.iter().map(|p| classify(p.revents)).collect())
}

fn classify(revents: libc::c_short) -> Readiness {
    if revents & libc::POLLIN != 0 {
        Readiness::Readable
    } else if revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
        Readiness::Hangup
    } else {
        Readiness::Idle
    }
}

fn timeout_to_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(duration) => {
            // Round up so a sub-millisecond wait does not turn into a busy poll.
            let mut millis = duration.as_millis();
            if Duration::from_millis(millis as u64) < duration {
                millis += 1;
            }
            libc::c_int::try_from(millis).unwrap_or(libc::c_int::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsRawFd;

    use super::*;
    use crate::stream::IpcStream;

    #[test]
    fn idle_endpoints_time_out() {
        let (provider, _consumer) = IpcStream::pair().unwrap();
        let ready = wait_readable(&[provider.as_raw_fd()], Some(Duration::from_millis(5))).unwrap();
        assert_eq!(ready, vec![Readiness::Idle]);
    }

    #[test]
    fn reports_only_the_written_endpoint() {
        let (first, _first_consumer) = IpcStream::pair().unwrap();
        let (second, mut second_consumer) = IpcStream::pair().unwrap();

        second_consumer.write_all(b"x").unwrap();

        let ready = wait_readable(&[first.as_raw_fd(), second.as_raw_fd()], None).unwrap();
        assert_eq!(ready, vec![Readiness::Idle, Readiness::Readable]);
    }

    #[test]
    fn closed_peer_is_ready() {
        let (provider, consumer) = IpcStream::pair().unwrap();
        drop(consumer);

        let ready = wait_readable(&[provider.as_raw_fd()], Some(Duration::from_secs(1))).unwrap();
        assert!(ready[0].is_ready());
    }

    #[test]
    fn empty_set_honours_timeout() {
        let ready = wait_readable(&[], Some(Duration::from_millis(1))).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn sub_millisecond_timeout_rounds_up() {
        assert_eq!(timeout_to_millis(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_to_millis(Some(Duration::from_millis(7))), 7);
        assert_eq!(timeout_to_millis(None), -1);
    }
}
