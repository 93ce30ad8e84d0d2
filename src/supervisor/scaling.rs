//! Scaling policy.
//!
//! A pure function from observed load to a scaling decision, kept free of
//! side effects so it can be tested without creating processes.

use crate::config::SupervisorConfig;

/// What the control loop should do with the worker population this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    /// Leave the population alone.
    Idle,
    /// Spawn this many workers.
    ScaleUp(usize),
    /// Retire one worker.
    ScaleDown,
}

/// Load signals observed at the start of a control-loop tick.
#[derive(Debug, Clone, Copy)]
pub struct LoadSnapshot {
    /// Tasks waiting in the queue.
    pub pending_depth: usize,
    /// Tasks dispatched and not yet completed.
    pub in_flight: usize,
    /// Workers currently registered.
    pub worker_count: usize,
    /// Consecutive ticks with no pending and no in-flight work.
    pub idle_ticks: u32,
}

/// Decides how to adjust the worker population.
///
/// Rules, in priority order:
///
/// - below `min_workers` (including cold start at zero): spawn up to the
///   minimum in one decision,
/// - fully idle for `scale_down_idle_ticks` consecutive ticks and above
///   the minimum: retire one worker (the sustained-idle requirement is
///   the hysteresis that prevents flapping),
/// - at `max_workers`: never grow, however deep the backlog; it is
///   absorbed by queueing,
/// - backlog above `scale_up_threshold`: grow by exactly one worker per
///   tick to avoid a thundering herd of process creation.
pub fn decide(snapshot: LoadSnapshot, config: &SupervisorConfig) -> ScalingDecision {
    if snapshot.worker_count < config.min_workers {
        let deficit = config.min_workers - snapshot.worker_count;
        let headroom = config.max_workers - snapshot.worker_count;
        return ScalingDecision::ScaleUp(deficit.min(headroom));
    }

    if snapshot.pending_depth == 0
        && snapshot.in_flight == 0
        && snapshot.idle_ticks >= config.scale_down_idle_ticks
        && snapshot.worker_count > config.min_workers
    {
        return ScalingDecision::ScaleDown;
    }

    if snapshot.worker_count >= config.max_workers {
        return ScalingDecision::Idle;
    }

    if snapshot.pending_depth > config.scale_up_threshold {
        return ScalingDecision::ScaleUp(1);
    }

    ScalingDecision::Idle
}
