use embedded_hal::digital::{InputPin, OutputPin};

use crate::{
    diagnostics::{DiagnosticReport, DiagnosticReporter, MemoryProbe},
    publisher::{AccessoryServer, PublishSummary, Publisher},
    sampler::{ClimateSensor, Sampler},
    schedule::ScheduleState,
};

/// What a single tick did. Both fields are `None` on most ticks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickOutcome {
    pub report: Option<PublishSummary>,
    pub diagnostics: Option<DiagnosticReport>,
}

/// Cooperative sample-and-publish loop.
///
/// The loop holds no timing state of its own: deadlines live in the
/// [`ScheduleState`] the caller passes to every [`tick`](Self::tick).
pub struct SamplingLoop<S, P, O, M> {
    sampler: Sampler<S, P>,
    publisher: Publisher<O>,
    diagnostics: DiagnosticReporter<M>,
}

impl<S, P, O, M> SamplingLoop<S, P, O, M>
where
    S: ClimateSensor,
    P: InputPin,
    O: OutputPin,
    M: MemoryProbe,
{
    pub fn new(
        sampler: Sampler<S, P>,
        publisher: Publisher<O>,
        diagnostics: DiagnosticReporter<M>,
    ) -> Self {
        Self {
            sampler,
            publisher,
            diagnostics,
        }
    }

    /// Polls the server, then runs whichever of the report and diagnostics
    /// jobs is due at `now_ms`.
    pub fn tick<A: AccessoryServer>(
        &mut self,
        now_ms: u32,
        schedule: &mut ScheduleState,
        server: &mut A,
    ) -> TickOutcome {
        server.poll();

        let mut outcome = TickOutcome::default();

        if schedule.should_report(now_ms) {
            outcome.report = Some(self.report(server));
        }

        if schedule.should_log_diagnostics(now_ms) {
            outcome.diagnostics = Some(self.diagnostics.report(server));
        }

        outcome
    }

    /// Samples once and publishes the result, regardless of the schedule.
    pub fn report<A: AccessoryServer>(&mut self, server: &mut A) -> PublishSummary {
        let reading = self.sampler.sample();
        self.publisher.publish(server, &reading)
    }
}
