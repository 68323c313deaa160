//! Message identifier generation for webhook events that arrive without one.

use std::sync::Mutex;

use chrono::Utc;

/// Strategy for minting message identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Time-derived identifiers of the form `msg_{millis}_{seq}`.
///
/// `seq` counts ids minted within the same millisecond, so ids never collide
/// within a process. The millisecond component never moves backwards, even if
/// the clock does.
pub struct ClockCounterIds {
    clock: Box<dyn Fn() -> i64 + Send + Sync>,
    state: Mutex<IdState>,
}

#[derive(Default)]
struct IdState {
    last_millis: i64,
    seq: u32,
}

impl ClockCounterIds {
    /// Use the system clock.
    pub fn new() -> Self {
        Self::with_clock(|| Utc::now().timestamp_millis())
    }

    /// Use a custom millisecond clock (deterministic ids in tests).
    pub fn with_clock(clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            state: Mutex::new(IdState::default()),
        }
    }
}

impl Default for ClockCounterIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for ClockCounterIds {
    fn next_id(&self) -> String {
        let now = (self.clock)();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if now > state.last_millis {
            state.last_millis = now;
            state.seq = 0;
        } else {
            state.seq += 1;
        }
        format!("msg_{}_{}", state.last_millis, state.seq)
    }
}
