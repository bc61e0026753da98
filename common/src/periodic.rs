use serde::{Deserialize, Serialize};

/// Scheduler rate the tick-counted gate assumes.
///
/// In [`GateMode::Ticks`] an interval of `N` seconds becomes a threshold of
/// `N * tick_rate_hz` polls. If the loop actually runs faster or slower the
/// interval drifts by the same ratio; the wall-clock check still prevents
/// firing early.
pub const ASSUMED_TICK_RATE_HZ: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum GateMode {
    /// Wall clock only. Requires a clock that does not jump backwards.
    Clock,
    /// Iteration counter plus a coarse wall-clock check, for platforms
    /// without a trustworthy clock.
    Ticks { tick_rate_hz: u32 },
}

impl GateMode {
    pub const fn ticks() -> Self {
        Self::Ticks {
            tick_rate_hz: ASSUMED_TICK_RATE_HZ,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "clock" => Some(Self::Clock),
            "ticks" => Some(Self::ticks()),
            _ => None,
        }
    }
}

impl Default for GateMode {
    fn default() -> Self {
        Self::Clock
    }
}

#[derive(Debug, Clone)]
pub struct PeriodicTask {
    interval_secs: u32,
    mode: GateMode,
    iteration_count: u64,
    next_due_at: Option<i64>,
}

impl PeriodicTask {
    pub fn new(interval_secs: u32, mode: GateMode) -> Self {
        Self {
            interval_secs: interval_secs.max(1),
            mode,
            iteration_count: 0,
            next_due_at: None,
        }
    }

    pub fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    pub fn iteration_count(&self) -> u64 {
        self.iteration_count
    }

    pub fn next_due_at(&self) -> Option<i64> {
        self.next_due_at
    }

    /// Number of polls that must pass before the clock is consulted.
    pub fn tick_threshold(&self) -> u64 {
        match self.mode {
            GateMode::Clock => 0,
            GateMode::Ticks { tick_rate_hz } => {
                u64::from(self.interval_secs) * u64::from(tick_rate_hz)
            }
        }
    }

    pub fn tick(&mut self) {
        self.iteration_count = self.iteration_count.saturating_add(1);
    }

    pub fn is_due(&self, now: i64) -> bool {
        match self.mode {
            GateMode::Clock => self.next_due_at.is_some_and(|due| now >= due),
            GateMode::Ticks { .. } => {
                self.iteration_count > self.tick_threshold()
                    && self.next_due_at.map_or(true, |due| now > due)
            }
        }
    }

    pub fn poll(&mut self, now: i64) -> bool {
        match self.mode {
            GateMode::Clock => {
                self.tick();
                if self.next_due_at.is_none() {
                    self.next_due_at = Some(self.after_interval(now));
                }
                self.is_due(now)
            }
            GateMode::Ticks { .. } => {
                if self.iteration_count <= self.tick_threshold() {
                    self.tick();
                    return false;
                }
                if self.is_due(now) {
                    return true;
                }
                // Counter ran out before the clock did: start counting again.
                self.iteration_count = 0;
                false
            }
        }
    }

    pub fn mark_fired(&mut self, now: i64) {
        self.advance_to(self.after_interval(now));
        self.iteration_count = 0;
    }

    /// Restart the countdown so the next fire is at least one interval away.
    pub fn rearm(&mut self, now: i64) {
        self.advance_to(self.after_interval(now));
        self.iteration_count = 0;
    }

    fn after_interval(&self, now: i64) -> i64 {
        now.saturating_add(i64::from(self.interval_secs))
    }

    fn advance_to(&mut self, candidate: i64) {
        self.next_due_at = Some(match self.next_due_at {
            Some(due) => due.max(candidate),
            None => candidate,
        });
    }
}
