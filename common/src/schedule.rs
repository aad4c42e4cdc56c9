use crate::config::SamplingConfig;

/// Millisecond deadline on a wrapping 32-bit clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at_ms: u32,
    interval_ms: u32,
}

impl Deadline {
    /// A deadline at 0, so the first poll strictly after boot fires.
    pub const fn new(interval_ms: u32) -> Self {
        Self {
            at_ms: 0,
            interval_ms,
        }
    }

    pub fn at_ms(&self) -> u32 {
        self.at_ms
    }

    pub fn is_elapsed(&self, now_ms: u32) -> bool {
        // Signed distance keeps the comparison correct across counter wrap.
        (now_ms.wrapping_sub(self.at_ms) as i32) > 0
    }

    /// Returns true at most once per interval. The deadline moves before the
    /// caller gets a chance to act, so a repeated poll with the same `now_ms`
    /// is false.
    pub fn poll(&mut self, now_ms: u32) -> bool {
        if !self.is_elapsed(now_ms) {
            return false;
        }
        self.at_ms = now_ms.wrapping_add(self.interval_ms);
        true
    }
}

/// Deadlines for the two independent jobs of the sampling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    pub report: Deadline,
    pub diagnostics: Deadline,
}

impl ScheduleState {
    pub fn new(report_interval_ms: u32, diagnostics_interval_ms: u32) -> Self {
        Self {
            report: Deadline::new(report_interval_ms),
            diagnostics: Deadline::new(diagnostics_interval_ms),
        }
    }

    pub fn from_config(config: &SamplingConfig) -> Self {
        Self::new(config.report_interval_ms, config.diagnostics_interval_ms)
    }

    pub fn should_report(&mut self, now_ms: u32) -> bool {
        self.report.poll(now_ms)
    }

    pub fn should_log_diagnostics(&mut self, now_ms: u32) -> bool {
        self.diagnostics.poll(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_fire_at_boot_instant() {
        let mut state = ScheduleState::new(2_000, 10_000);

        assert!(!state.should_report(0));
        assert!(state.should_report(1));
        assert_eq!(state.report.at_ms(), 2_001);
    }

    #[test]
    fn fires_once_per_tick() {
        let mut state = ScheduleState::new(2_000, 10_000);

        assert!(state.should_report(500));
        assert!(!state.should_report(500));
    }

    #[test]
    fn fires_at_most_once_per_interval() {
        let mut state = ScheduleState::new(2_000, 10_000);
        let mut fired = Vec::new();

        for now in (1..=10_000).step_by(10) {
            if state.should_report(now) {
                fired.push(now);
            }
        }

        assert_eq!(fired.first(), Some(&1));
        for pair in fired.windows(2) {
            assert!(pair[1] >= pair[0] + 2_000, "{pair:?}");
        }
    }

    #[test]
    fn equal_to_deadline_is_not_elapsed() {
        let mut deadline = Deadline::new(2_000);
        assert!(deadline.poll(100));

        assert!(!deadline.poll(2_100));
        assert!(deadline.poll(2_101));
    }

    #[test]
    fn survives_counter_wrap() {
        let mut deadline = Deadline::new(2_000);
        let near_wrap = u32::MAX - 500;

        // Walk the clock up in steps shorter than half the counter range.
        assert!(deadline.poll(1));
        assert!(deadline.poll(2_000_000_000));
        assert!(deadline.poll(4_000_000_000));
        assert!(deadline.poll(near_wrap));
        assert_eq!(deadline.at_ms(), 1_499);

        // Past the wrap but still inside the interval.
        assert!(!deadline.poll(u32::MAX));
        assert!(!deadline.poll(100));
        assert!(!deadline.poll(1_499));
        assert!(deadline.poll(1_500));
    }

    #[test]
    fn deadlines_are_independent() {
        let mut state = ScheduleState::new(2_000, 10_000);

        assert!(state.should_log_diagnostics(1));
        assert!(state.should_report(1));

        assert!(state.should_report(2_002));
        assert!(!state.should_log_diagnostics(2_002));
        assert!(state.should_log_diagnostics(10_002));
    }
}
