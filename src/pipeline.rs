//! One competitor's scoring chain
//!
//! in-order buffer -> flight status -> task position -> distance calculator
//! -> score formatter. Each call to `next` pulls fixes through the chain
//! until a score comes out, nothing is eligible yet, or the chain has
//! closed. A rewind requested by the task-position stage is handed back to
//! the buffer on the following pull.

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{Span, debug, info, trace};

use crate::aat::AatCalculator;
use crate::distance::DistanceCalculator;
use crate::fix::{Epoch, PositionFix};
use crate::flight_status::{FlightStatusStage, StatusOutcome};
use crate::in_order::{DEFAULT_IN_ORDER_DELAY_SECS, InOrderBuffer, Mode, Pull};
use crate::racing::RacingCalculator;
use crate::scores::{PilotInfo, PilotScore, task_scores};
use crate::task::Task;
use crate::task_position::{TaskPositionStage, TaskStatus};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub delay_secs: i64,
    pub mode: Mode,
    pub start_override: Option<Epoch>,
    /// Track already received, replayed before anything pushed later
    pub history: Vec<PositionFix>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            delay_secs: DEFAULT_IN_ORDER_DELAY_SECS,
            mode: Mode::Live,
            start_override: None,
            history: Vec::new(),
        }
    }
}

pub struct CompetitorPipeline {
    competitor: String,
    task: Arc<Task>,
    pilot: PilotInfo,
    in_order: InOrderBuffer,
    flight_status: FlightStatusStage,
    position: TaskPositionStage,
    calculator: Box<dyn DistanceCalculator>,
    rewind: Option<Epoch>,
    done: bool,
    last_score: Option<PilotScore>,
    span: Span,
}

impl CompetitorPipeline {
    pub fn new(task: Arc<Task>, pilot: PilotInfo, options: PipelineOptions) -> Self {
        let competitor = pilot.compno.clone();
        let calculator: Box<dyn DistanceCalculator> = if task.is_assigned_area() {
            Box::new(AatCalculator::new(task.clone()))
        } else {
            Box::new(RacingCalculator::new(task.clone()))
        };
        let span = tracing::info_span!("competitor", compno = %competitor);
        debug!(
            parent: &span,
            history = options.history.len(),
            start_override = ?options.start_override,
            "Building pipeline"
        );

        Self {
            in_order: InOrderBuffer::with_history(options.delay_secs, options.mode, options.history),
            flight_status: FlightStatusStage::new(task.home),
            position: TaskPositionStage::new(task.clone(), &competitor, options.start_override),
            competitor,
            task,
            pilot,
            calculator,
            rewind: None,
            done: false,
            last_score: None,
            span,
        }
    }

    pub fn competitor(&self) -> &str {
        &self.competitor
    }

    /// Hand a fix to the in-order buffer, false if it was a duplicate
    pub fn push_fix(&mut self, fix: PositionFix) -> bool {
        self.in_order.insert(fix)
    }

    /// Landed out, finished, or (in replay) out of fixes
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn status(&self) -> &TaskStatus {
        self.position.status()
    }

    pub fn last_score(&self) -> Option<&PilotScore> {
        self.last_score.as_ref()
    }

    /// Pull fixes through the chain until a score is produced
    pub fn next(&mut self, now: Epoch) -> Result<Pull<PilotScore>> {
        let span = self.span.clone();
        let _entered = span.enter();
        self.pull(now)
    }

    fn pull(&mut self, now: Epoch) -> Result<Pull<PilotScore>> {
        loop {
            if self.done {
                return Ok(Pull::Closed);
            }

            let ordered = match self.in_order.next(now, self.rewind.take()) {
                Pull::Ready(ordered) => ordered,
                Pull::Pending => return Ok(Pull::Pending),
                Pull::Closed => {
                    debug!("Fix stream exhausted");
                    self.done = true;
                    return Ok(Pull::Closed);
                }
            };
            if !ordered.fix.location().is_finite() {
                bail!("Non-finite position in fix at {}", ordered.fix.t);
            }

            let (classified, landed) = match self.flight_status.process(ordered) {
                StatusOutcome::Forward(classified) => (classified, false),
                StatusOutcome::Suppress => continue,
                StatusOutcome::Terminate(classified) => (classified, true),
            };

            let step = self.position.process(classified);
            self.rewind = step.rewind;
            if landed || step.finished {
                info!(landed, finished = step.finished, "Pipeline complete");
                self.done = true;
            }

            let Some(status) = step.status else {
                continue;
            };
            let Some(calculated) = self.calculator.calculate(&status) else {
                trace!(t = status.t, "Calculator skipped update");
                continue;
            };
            let score = task_scores(&self.task, &self.pilot, &calculated);
            self.last_score = Some(score.clone());
            return Ok(Pull::Ready(score));
        }
    }

    /// Run the chain as far as `now` allows, returning the newest score
    pub fn advance(&mut self, now: Epoch) -> Result<Option<PilotScore>> {
        let mut latest = None;
        while let Pull::Ready(score) = self.next(now)? {
            latest = Some(score);
        }
        Ok(latest)
    }

    /// Score everything buffered regardless of age
    pub fn replay(&mut self) -> Result<Option<PilotScore>> {
        self.advance(Epoch::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight_status::FlightState;
    use crate::task::{Direction, LegDefinition, LegKind, TaskDefinition, TaskRules};

    fn task() -> Arc<Task> {
        let leg = |name: &str, lat: f64, kind: LegKind, radius1: f64, direction: Direction| LegDefinition {
            name: name.to_string(),
            lat,
            lng: 8.0,
            kind,
            radius1,
            radius2: None,
            angle1: 180.0,
            angle2: None,
            direction,
            fixed_bearing: None,
            length: None,
        };
        let definition = TaskDefinition {
            rules: TaskRules::default(),
            home: None,
            legs: vec![
                leg("S", 50.0, LegKind::Line, 5.0, Direction::NextPoint),
                leg("TP1", 50.2, LegKind::Sector, 0.5, Direction::Symmetrical),
                leg("F", 50.0, LegKind::Line, 1.0, Direction::PreviousPoint),
            ],
        };
        Arc::new(Task::prepare(&definition).unwrap())
    }

    fn fix(t: Epoch, lat: f64, lng: f64) -> PositionFix {
        PositionFix {
            competitor: "A1".to_string(),
            lat,
            lng,
            altitude_msl: 1200.0,
            altitude_agl: Some(800.0),
            t,
            bearing: None,
            speed: None,
            vario: None,
            is_late: false,
        }
    }

    #[test]
    fn test_holds_fixes_until_delay_elapsed() {
        let mut pipeline = CompetitorPipeline::new(task(), PilotInfo::unknown("A1"), PipelineOptions::default());
        assert!(pipeline.push_fix(fix(100, 49.99, 8.0)));
        assert!(!pipeline.push_fix(fix(100, 49.99, 8.0)));
        assert_eq!(pipeline.next(105).unwrap(), Pull::Pending);

        let Pull::Ready(score) = pipeline.next(110).unwrap() else {
            panic!("expected a score once the fix is old enough");
        };
        assert_eq!(score.t, 100);
        assert_eq!(score.flight_state, FlightState::Airborne);
        assert_eq!(score.utc_start, None);
        assert_eq!(pipeline.next(110).unwrap(), Pull::Pending);
    }

    #[test]
    fn test_replay_closes_when_exhausted() {
        let options = PipelineOptions {
            mode: Mode::Replay,
            // out of order on purpose, crossing the start line at t=40
            history: vec![fix(40, 50.01, 8.0), fix(0, 49.98, 8.0), fix(20, 49.99, 8.0)],
            ..PipelineOptions::default()
        };
        let mut pipeline = CompetitorPipeline::new(task(), PilotInfo::unknown("A1"), options);
        let score = pipeline.replay().unwrap().unwrap();
        assert_eq!(score.t, 40);
        assert_eq!(score.utc_start, Some(40));
        assert!(pipeline.is_done());
        assert_eq!(pipeline.next(Epoch::MAX).unwrap(), Pull::Closed);
        assert_eq!(pipeline.last_score().map(|s| s.t), Some(40));
    }

    #[test]
    fn test_non_finite_fix_fails_pipeline() {
        let mut pipeline = CompetitorPipeline::new(task(), PilotInfo::unknown("A1"), PipelineOptions::default());
        pipeline.push_fix(fix(0, f64::NAN, 8.0));
        assert!(pipeline.next(100).is_err());
    }

    #[test]
    fn test_start_override_is_used() {
        let options = PipelineOptions {
            mode: Mode::Replay,
            start_override: Some(50),
            history: vec![fix(100, 50.1, 8.0)],
            ..PipelineOptions::default()
        };
        let mut pipeline = CompetitorPipeline::new(task(), PilotInfo::unknown("A1"), options);
        pipeline.replay().unwrap();
        assert_eq!(pipeline.status().utc_start, Some(50));
        assert!(pipeline.status().start_confirmed);
    }
}
