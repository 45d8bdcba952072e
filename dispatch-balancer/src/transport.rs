/// Outcome of the previous attempt, as reported by the transport layer
/// ahead of a retry. Mirrors nginx/OpenResty's `get_last_failure` tri-state:
/// a `state` plus an optional status `code` the dispatcher maps to one of
/// its three passive-report operations (`status_code == None` => TCP
/// failure, `Some(504)` => timeout, anything else => that HTTP status).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureState {
    /// The transport wants another endpoint ("next").
    Next,
    /// The attempt failed without a path forward ("failed").
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastFailure {
    pub state: FailureState,
    pub status_code: Option<u16>,
}

/// The boundary between the dispatcher and the HTTP transport. Request/
/// response I/O, socket framing and TLS are out of scope for this crate —
/// this trait only models the hooks the dispatcher calls as it resolves and
/// hands off an endpoint (SPEC_FULL.md §6).
pub trait Transport {
    fn set_timeouts(&mut self, connect: f64, send: f64, read: f64);

    /// Configure the transport's own retry budget. Called once, on the
    /// first attempt only.
    fn set_more_tries(&mut self, n: u32);

    fn set_current_peer(&mut self, host: &str, port: u16) -> Result<(), String>;

    /// Outcome of the previous attempt, if any.
    fn get_last_failure(&self) -> Option<LastFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        timeouts: Option<(f64, f64, f64)>,
        more_tries: Option<u32>,
        peer: Option<(String, u16)>,
        failure: Option<LastFailure>,
    }

    impl Transport for RecordingTransport {
        fn set_timeouts(&mut self, connect: f64, send: f64, read: f64) {
            self.timeouts = Some((connect, send, read));
        }
        fn set_more_tries(&mut self, n: u32) {
            self.more_tries = Some(n);
        }
        fn set_current_peer(&mut self, host: &str, port: u16) -> Result<(), String> {
            self.peer = Some((host.to_string(), port));
            Ok(())
        }
        fn get_last_failure(&self) -> Option<LastFailure> {
            self.failure
        }
    }

    #[test]
    fn records_hooks_called_by_a_dispatcher() {
        let mut t = RecordingTransport::default();
        t.set_timeouts(1.0, 2.0, 3.0);
        t.set_more_tries(2);
        t.set_current_peer("10.0.0.1", 80).unwrap();
        assert_eq!(t.timeouts, Some((1.0, 2.0, 3.0)));
        assert_eq!(t.more_tries, Some(2));
        assert_eq!(t.peer, Some(("10.0.0.1".to_string(), 80)));
        assert_eq!(t.get_last_failure(), None);
    }

    #[test]
    fn reports_last_failure_with_status_code() {
        let mut t = RecordingTransport::default();
        t.failure = Some(LastFailure { state: FailureState::Next, status_code: Some(504) });
        let f = t.get_last_failure().unwrap();
        assert_eq!(f.state, FailureState::Next);
        assert_eq!(f.status_code, Some(504));
    }
}
