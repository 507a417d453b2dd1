use agentipc_frame::{Reply, Request};

/// A provider's request handler.
///
/// The dispatch loop calls `handle` once per request, never concurrently with
/// itself, so the handler may keep private mutable state without locking. It
/// runs on the channel's only dispatch thread: while it blocks, every other
/// connection on the channel waits.
///
/// The request is borrowed for the duration of the call and released by the
/// dispatch loop afterwards.
pub trait Handler: Send + 'static {
    fn handle(&mut self, request: &Request) -> Reply;
}

impl<F> Handler for F
where
    F: FnMut(&Request) -> Reply + Send + 'static,
{
    fn handle(&mut self, request: &Request) -> Reply {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use agentipc_frame::status;

    use super::*;

    struct Counter {
        seen: usize,
    }

    impl Handler for Counter {
        fn handle(&mut self, _request: &Request) -> Reply {
            self.seen += 1;
            Reply::ok(self.seen.to_string())
        }
    }

    #[test]
    fn struct_handler_keeps_state() {
        let mut handler = Counter { seen: 0 };
        handler.handle(&Request::new(&b"a"[..]));
        let reply = handler.handle(&Request::new(&b"b"[..]));
        assert_eq!(reply.text().unwrap(), "2");
    }

    #[test]
    fn closures_are_handlers() {
        let mut boxed: Box<dyn Handler> = Box::new(|request: &Request| match request.text() {
            Ok("ping") => Reply::ok("PONG"),
            _ => Reply::new(status::UNKNOWN, "unknown command"),
        });

        assert_eq!(boxed.handle(&Request::new(&b"ping"[..])).status, status::OK);
        assert_eq!(
            boxed.handle(&Request::new(&b"nope"[..])).status,
            status::UNKNOWN
        );
    }
}
