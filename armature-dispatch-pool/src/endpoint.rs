//! Endpoint rotation with cool-down decay.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// One configured upstream base URL, e.g. `http://es1:9200`.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub(crate) name: String,
}

impl Endpoint {
    pub(crate) fn new(name: String) -> Self {
        Self { name }
    }
}

/// Current wall-clock time as epoch seconds, the same time base `pick`
/// compares cool-downs against.
pub(crate) fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

struct RingState {
    endpoints: Vec<Endpoint>,
    allowed_at: Vec<i64>,
    pos: usize,
}

/// Round-robins across configured endpoints, skipping any whose cool-down
/// (`allowed_at`) has not yet elapsed.
///
/// `pick` mirrors the source's rotation loop exactly, including its cool-down
/// decay: this is called out in the specification as unusual-but-intentional
/// and must not be "improved" into more conventional scheduling.
pub(crate) struct EndpointRing {
    state: Mutex<RingState>,
}

impl EndpointRing {
    pub(crate) fn new(endpoints: Vec<Endpoint>) -> Self {
        assert!(!endpoints.is_empty(), "EndpointRing requires at least one endpoint");
        let allowed_at = vec![0; endpoints.len()];
        Self {
            state: Mutex::new(RingState {
                endpoints,
                allowed_at,
                pos: 0,
            }),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    pub(crate) fn endpoint_name(&self, idx: usize) -> String {
        self.state.lock().endpoints[idx].name.clone()
    }

    /// Select the next dispatchable endpoint, returning its index.
    ///
    /// Starting at the cursor, while the endpoint at the cursor is cooling
    /// down (`allowed_at > now`), decay its `allowed_at` by `offset` (which
    /// stays `0` until a full rotation completes without finding an eligible
    /// endpoint, then becomes `1`) and advance the cursor. Once an eligible
    /// endpoint is found it is returned and the cursor advances past it for
    /// next time. This guarantees forward progress even if every endpoint is
    /// simultaneously cooling down.
    pub(crate) fn pick(&self, now: i64) -> usize {
        let mut state = self.state.lock();
        let n = state.endpoints.len();
        let start_pos = state.pos;
        let mut offset: i64 = 0;

        while state.allowed_at[state.pos] > now {
            state.allowed_at[state.pos] -= offset;
            state.pos = (state.pos + 1) % n;
            if state.pos == start_pos {
                offset = 1;
            }
        }

        let chosen = state.pos;
        state.pos = (state.pos + 1) % n;
        chosen
    }

    /// Put `idx` into a 30-second cool-down following a transport failure.
    ///
    /// Application-level HTTP error statuses (including 5xx) must never
    /// reach this -- only transport/connect-level failures cool an endpoint
    /// down.
    pub(crate) fn cool_down(&self, idx: usize, now: i64) {
        const COOL_DOWN_SECONDS: i64 = 30;
        let mut state = self.state.lock();
        state.allowed_at[idx] = now + COOL_DOWN_SECONDS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(n: usize) -> EndpointRing {
        EndpointRing::new(
            (0..n)
                .map(|i| Endpoint::new(format!("http://host{i}")))
                .collect(),
        )
    }

    #[test]
    fn round_robins_when_nothing_is_cooling() {
        let r = ring(3);
        let picks: Vec<_> = (0..6).map(|_| r.pick(1000)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn skips_a_cooling_endpoint() {
        let r = ring(2);
        r.cool_down(0, 1000); // endpoint 0 now allowed at 1030
        assert_eq!(r.pick(1000), 1);
        // cursor now back at 0, which is still cooling at t=1000
        assert_eq!(r.pick(1000), 1);
    }

    #[test]
    fn makes_progress_when_all_endpoints_are_cooling() {
        let r = ring(2);
        r.cool_down(0, 1000);
        r.cool_down(1, 1000);
        // Neither endpoint is eligible yet at t=1000, but pick must still
        // return *something* rather than loop forever.
        let picked = r.pick(1000);
        assert!(picked == 0 || picked == 1);
    }
}
