use hover_proto::telemetry::{FlightEvent, Phase};

/// Host-side observers of a session. Called from the control loop and the
/// telemetry dispatcher, so implementations must not block.
pub trait SessionHooks: Send + Sync {
    /// Sample summaries, phase transitions, commands, aborts and link faults.
    fn on_event(&self, _event: &FlightEvent) {}

    /// Fired when takeoff completes (hover start) and when hover completes.
    fn on_phase_complete(&self, _phase: Phase) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}

pub(crate) fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
