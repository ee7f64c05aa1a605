//! Task-position state machine
//!
//! Consumes classified fixes in time order and tracks where the competitor
//! is on the task: start, the turnpoint being flown to, sector entries and
//! exits, and the closest approach to the next sector. Missed turns hidden
//! by a gap in the track are detected in hindsight and reported as a rewind
//! request for the reordering stage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fix::{Epoch, PositionFix, TrackPoint};
use crate::flight_status::{ClassifiedFix, FlightState};
use crate::geometry::LatLng;
use crate::sector::{self, SectorCheck};
use crate::task::Task;

/// Gaps longer than this may hide a turn
const DOGLEG_MIN_GAP_SECS: Epoch = 20;
/// ...provided the fixes either side are at least this far apart (km)
const DOGLEG_MIN_DISTANCE_KM: f64 = 0.3;
/// Glide ratio at or below which a short gap allows the fastest detour
const FAVOURABLE_GLIDE_RATIO: f64 = 50.0;
/// Distance past a racing turnpoint before the next leg starts (km)
const RACING_EXIT_MARGIN_KM: f64 = 2.0;
/// Fraction of the next leg flown before an assigned area is left behind
const AAT_EXIT_MARGIN_FRACTION: f64 = 0.1;

/// Progress on one leg. Leg 0 is the start and is never scored here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegStatus {
    /// Fixes inside an assigned area
    pub points: Vec<TrackPoint>,
    /// Fixes inside the penalty volume before any real entry
    pub penalty_points: Vec<TrackPoint>,
    pub entry_time: Option<Epoch>,
    pub exit_time: Option<Epoch>,
    pub penalty_time: Option<Epoch>,
    pub altitude_at_entry: Option<f64>,
    /// Turn reconstructed across a gap in the track
    pub estimated: bool,
}

impl LegStatus {
    pub fn achieved(&self) -> bool {
        self.entry_time.is_some() || self.penalty_time.is_some()
    }

    /// Real entries win over penalty points once there are any
    pub fn scoring_points(&self) -> &[TrackPoint] {
        if self.points.is_empty() {
            &self.penalty_points
        } else {
            &self.points
        }
    }

    pub fn turn_time(&self) -> Option<Epoch> {
        self.entry_time.or(self.penalty_time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub competitor: String,
    /// Time of the last processed fix
    pub t: Epoch,
    pub utc_start: Option<Epoch>,
    pub utc_finish: Option<Epoch>,
    pub start_found: bool,
    /// Past leg 1, a restart is no longer possible
    pub start_confirmed: bool,
    /// 0 before the start, then the index of the leg being flown
    pub current_leg: usize,
    pub in_sector: bool,
    pub in_penalty: bool,
    /// Closest approach (km) to the current leg's sector
    pub closest_to_next: Option<f64>,
    /// Fix at the closest approach
    pub closest_to_next_point: Option<TrackPoint>,
    /// Sector point nearest to that fix
    pub closest_sector_point: Option<LatLng>,
    pub legs: Vec<LegStatus>,
    pub last_fix: Option<TrackPoint>,
    pub altitude_agl: Option<f64>,
    pub flight_state: FlightState,
}

impl TaskStatus {
    pub fn new(competitor: &str, leg_count: usize) -> Self {
        Self {
            competitor: competitor.to_string(),
            t: 0,
            utc_start: None,
            utc_finish: None,
            start_found: false,
            start_confirmed: false,
            current_leg: 0,
            in_sector: false,
            in_penalty: false,
            closest_to_next: None,
            closest_to_next_point: None,
            closest_sector_point: None,
            legs: vec![LegStatus::default(); leg_count],
            last_fix: None,
            altitude_agl: None,
            flight_state: FlightState::Unknown,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.utc_finish.is_some()
    }

    pub fn position(&self) -> Option<LatLng> {
        self.last_fix.map(|p| LatLng::new(p.lat, p.lng))
    }

    fn clear_closest(&mut self) {
        self.closest_to_next = None;
        self.closest_to_next_point = None;
        self.closest_sector_point = None;
    }
}

/// A turn believed to have happened inside a gap, waiting for the track to
/// move away from the sector before it is committed
#[derive(Debug, Clone, Copy, PartialEq)]
struct DoglegCandidate {
    leg: usize,
    /// Estimated turn on the sector boundary
    turn: TrackPoint,
    /// First fix after the gap; processing restarts here
    resume_from: Epoch,
    closest: f64,
}

/// Result of feeding one fix to the state machine
#[derive(Debug, Clone, PartialEq)]
pub struct PositionStep {
    /// Snapshot for downstream, absent when nothing worth scoring changed
    pub status: Option<TaskStatus>,
    /// Reprocess the fix stream from this timestamp
    pub rewind: Option<Epoch>,
    pub finished: bool,
}

#[derive(Debug, Default)]
struct LegOutcome {
    changed: bool,
    improved: bool,
    rewind: Option<Epoch>,
}

pub struct TaskPositionStage {
    task: Arc<Task>,
    status: TaskStatus,
    previous: Option<PositionFix>,
    was_in_start: bool,
    start_override: Option<Epoch>,
    dogleg: Option<DoglegCandidate>,
    emitted: bool,
}

impl TaskPositionStage {
    pub fn new(task: Arc<Task>, competitor: &str, start_override: Option<Epoch>) -> Self {
        let mut status = TaskStatus::new(competitor, task.legs.len());
        if let Some(start) = start_override {
            status.utc_start = Some(start);
            status.start_found = true;
            status.start_confirmed = true;
            status.current_leg = 1;
        }
        Self {
            task,
            status,
            previous: None,
            was_in_start: false,
            start_override,
            dogleg: None,
            emitted: false,
        }
    }

    pub fn status(&self) -> &TaskStatus {
        &self.status
    }

    pub fn process(&mut self, input: ClassifiedFix) -> PositionStep {
        if self.status.is_finished() {
            return PositionStep {
                status: None,
                rewind: None,
                finished: true,
            };
        }

        let ClassifiedFix { fix, state, live } = input;
        let was_in_sector = self.status.in_sector;
        let was_in_penalty = self.status.in_penalty;

        self.status.t = fix.t;
        self.status.last_fix = Some(fix.to_track_point());
        self.status.altitude_agl = fix.altitude_agl;
        self.status.flight_state = state;

        let start_changed = self.update_start(&fix, state);

        let scoring = self.status.start_found
            && self.status.current_leg >= 1
            && self.status.utc_start.is_some_and(|start| fix.t >= start);
        let outcome = if scoring {
            self.update_legs(&fix)
        } else {
            LegOutcome::default()
        };

        if outcome.rewind.is_none() {
            self.previous = Some(fix);
        }

        let changed = start_changed
            || outcome.changed
            || outcome.rewind.is_some()
            || self.status.in_sector != was_in_sector
            || self.status.in_penalty != was_in_penalty;
        let accumulating = self.task.is_assigned_area() && self.status.start_found;
        let finished = self.status.is_finished();
        let emit = changed || outcome.improved || live || accumulating || finished || !self.emitted;

        self.emitted |= emit;
        PositionStep {
            status: emit.then(|| self.status.clone()),
            rewind: outcome.rewind,
            finished,
        }
    }

    /// Returns true when the start state changed
    fn update_start(&mut self, fix: &PositionFix, state: FlightState) -> bool {
        if self.start_override.is_some() {
            return false;
        }
        let rules = &self.task.rules;

        if rules.grand_prix_start {
            if let Some(gate) = rules.no_start_before
                && !self.status.start_found
                && fix.t >= gate
            {
                info!(competitor = %fix.competitor, start = gate, "Grand prix start");
                self.begin_task(gate);
                return true;
            }
            return false;
        }

        if state != FlightState::Airborne {
            return false;
        }

        let inside = sector::containment(&self.task.legs[0], fix.location()).in_sector;
        let was_inside = std::mem::replace(&mut self.was_in_start, inside);

        if inside && !was_inside && self.status.start_found && !self.status.start_confirmed {
            info!(competitor = %fix.competitor, t = fix.t, "Re-entered start sector, start cleared");
            self.reset_task();
            return true;
        }

        if !inside && was_inside && !self.status.start_found {
            let gate = self.task.rules.no_start_before;
            if gate.is_some_and(|gate| fix.t < gate) {
                debug!(competitor = %fix.competitor, t = fix.t, gate = ?gate, "Left start sector before the gate opened");
                return false;
            }
            info!(competitor = %fix.competitor, start = fix.t, "Start found");
            self.begin_task(fix.t);
            return true;
        }
        false
    }

    fn begin_task(&mut self, start: Epoch) {
        self.reset_task();
        self.status.utc_start = Some(start);
        self.status.start_found = true;
        self.status.current_leg = 1;
    }

    fn reset_task(&mut self) {
        let status = &mut self.status;
        status.utc_start = None;
        status.start_found = false;
        status.current_leg = 0;
        status.in_sector = false;
        status.in_penalty = false;
        status.clear_closest();
        for leg in status.legs.iter_mut() {
            *leg = LegStatus::default();
        }
        self.dogleg = None;
    }

    fn advance(&mut self) {
        let from = self.status.current_leg;
        self.status.current_leg += 1;
        self.status.clear_closest();
        if self.status.current_leg >= 2 {
            self.status.start_confirmed = true;
        }
        self.dogleg = None;
        debug!(competitor = %self.status.competitor, from, to = from + 1, "Advanced to next leg");
    }

    fn update_legs(&mut self, fix: &PositionFix) -> LegOutcome {
        let task = Arc::clone(&self.task);
        let location = fix.location();
        let mut outcome = LegOutcome::default();

        if let Some(candidate) = self.dogleg {
            let check = sector::containment(&task.legs[candidate.leg], location);
            if candidate.leg != self.status.current_leg || check.in_sector || check.in_penalty {
                self.dogleg = None;
            } else if check.distance > candidate.closest {
                self.commit_dogleg(candidate);
                outcome.rewind = Some(candidate.resume_from);
                outcome.changed = true;
                return outcome;
            } else {
                self.dogleg = Some(DoglegCandidate {
                    closest: check.distance,
                    ..candidate
                });
            }
        }

        if self.dogleg.is_none() {
            self.dogleg = self
                .previous
                .as_ref()
                .and_then(|previous| self.dogleg_candidate(previous, fix));
        }

        let last = task.last_leg();
        let assigned = task.is_assigned_area();
        loop {
            let index = self.status.current_leg;
            let leg = &task.legs[index];
            let check = sector::containment(leg, location);
            self.status.in_sector = check.in_sector;
            self.status.in_penalty = check.in_penalty;

            if index == last {
                if check.in_sector {
                    let leg_status = &mut self.status.legs[index];
                    leg_status.entry_time = Some(fix.t);
                    leg_status.exit_time = Some(fix.t);
                    leg_status.altitude_at_entry = Some(fix.altitude_msl);
                    self.status.utc_finish = Some(fix.t);
                    info!(competitor = %fix.competitor, finish = fix.t, "Finished");
                    outcome.changed = true;
                }
                outcome.improved |= self.track_closest(index, &check, fix);
                break;
            }

            let point = fix.to_track_point();
            let leg_status = &mut self.status.legs[index];
            if check.in_sector {
                if leg_status.entry_time.is_none() {
                    leg_status.entry_time = Some(fix.t);
                    leg_status.altitude_at_entry = Some(fix.altitude_msl);
                    debug!(competitor = %fix.competitor, leg = index, t = fix.t, "Entered sector");
                    outcome.changed = true;
                }
                leg_status.exit_time = Some(fix.t);
                if assigned {
                    leg_status.points.push(point);
                }
            } else if check.in_penalty && leg_status.entry_time.is_none() {
                if leg_status.penalty_time.is_none() {
                    leg_status.penalty_time = Some(fix.t);
                    debug!(competitor = %fix.competitor, leg = index, t = fix.t, "Entered penalty volume");
                    outcome.changed = true;
                }
                if assigned {
                    leg_status.penalty_points.push(point);
                }
            }
            let achieved = leg_status.achieved();
            outcome.improved |= self.track_closest(index, &check, fix);

            if achieved {
                let next = &task.legs[index + 1];
                let margin = if assigned {
                    next.length * AAT_EXIT_MARGIN_FRACTION
                } else {
                    RACING_EXIT_MARGIN_KM
                };
                let left = !check.in_sector && !check.in_penalty && check.distance > margin;
                if left || sector::containment(next, location).in_sector {
                    self.advance();
                    outcome.changed = true;
                    // score the new leg with this same fix
                    continue;
                }
            }
            break;
        }
        outcome
    }

    /// Returns true if this fix is the new closest approach
    fn track_closest(&mut self, index: usize, check: &SectorCheck, fix: &PositionFix) -> bool {
        let improved = self
            .status
            .closest_to_next
            .is_none_or(|closest| check.distance < closest);
        if improved {
            let location = fix.location();
            self.status.closest_to_next = Some(check.distance);
            self.status.closest_to_next_point = Some(fix.to_track_point());
            self.status.closest_sector_point = Some(if check.in_sector {
                location
            } else {
                sector::nearest_point(&self.task.legs[index], location)
            });
        }
        improved
    }

    /// Could the glider have turned the current sector during the gap
    /// between `previous` and `fix`?
    fn dogleg_candidate(&self, previous: &PositionFix, fix: &PositionFix) -> Option<DoglegCandidate> {
        let index = self.status.current_leg;
        if index == 0 || index >= self.task.last_leg() || self.status.legs[index].achieved() {
            return None;
        }
        let gap = fix.t - previous.t;
        let before = previous.location();
        let after = fix.location();
        if gap <= DOGLEG_MIN_GAP_SECS || before.distance_to(&after) < DOGLEG_MIN_DISTANCE_KM {
            return None;
        }

        let leg = &self.task.legs[index];
        let check = sector::containment(leg, after);
        if check.in_sector || check.in_penalty {
            return None;
        }

        let turn = sector::nearest_point(leg, before);
        let inbound = before.distance_to(&turn);
        let detour = inbound + turn.distance_to(&after);
        if !(detour > 0.0) {
            return None;
        }

        let height_lost = previous.altitude_msl - fix.altitude_msl;
        let glide_ratio = if height_lost > 0.0 {
            detour * 1000.0 / height_lost
        } else {
            0.0
        };
        let required_speed = detour / (gap as f64 / 3600.0);
        let max_speed = max_detour_speed(gap, glide_ratio);
        if required_speed > max_speed {
            debug!(competitor = %fix.competitor, leg = index, gap, required_speed, "Gap too short for a turn");
            return None;
        }

        let fraction = inbound / detour;
        let turn_t = (previous.t + (gap as f64 * fraction).round() as Epoch).clamp(previous.t + 1, fix.t - 1);
        debug!(competitor = %fix.competitor, leg = index, turn_t, "Possible turn inside gap");
        Some(DoglegCandidate {
            leg: index,
            turn: TrackPoint {
                t: turn_t,
                lat: turn.lat,
                lng: turn.lng,
                altitude_msl: previous.altitude_msl - height_lost * fraction,
            },
            resume_from: fix.t,
            closest: check.distance,
        })
    }

    fn commit_dogleg(&mut self, candidate: DoglegCandidate) {
        let assigned = self.task.is_assigned_area();
        let leg_status = &mut self.status.legs[candidate.leg];
        leg_status.entry_time = Some(candidate.turn.t);
        leg_status.exit_time = Some(candidate.turn.t);
        leg_status.altitude_at_entry = Some(candidate.turn.altitude_msl);
        leg_status.estimated = true;
        if assigned {
            leg_status.points.push(candidate.turn);
        }
        self.advance();
        self.previous = None;
        metrics::counter!("scoring.task_position.dogleg_committed").increment(1);
        info!(competitor = %self.status.competitor, leg = candidate.leg, turn_t = candidate.turn.t, "Committed estimated turn");
    }
}

fn max_detour_speed(gap: Epoch, glide_ratio: f64) -> f64 {
    match gap {
        g if g > 600 => 160.0,
        g if g > 300 => 200.0,
        g if g > 120 => 250.0,
        _ if glide_ratio <= FAVOURABLE_GLIDE_RATIO => 330.0,
        _ => 250.0,
    }
}
