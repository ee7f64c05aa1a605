//! Externally visible per-pilot score snapshots

use serde::{Deserialize, Serialize};

use crate::distance::CalculatedTaskStatus;
use crate::fix::Epoch;
use crate::flight_status::FlightState;
use crate::geometry::{LatLng, round1};
use crate::task::Task;

/// Speeds above this are treated as sensor error (km/h)
pub const MAX_PLAUSIBLE_SPEED: f64 = 180.0;

/// No speeds until this long after the start
pub const MIN_SPEED_ELAPSED_SECS: Epoch = 300;

/// Glide ratio is only meaningful above this height (m)
const MIN_GLIDE_AGL_M: f64 = 100.0;

/// Handicap used when the pilot is unknown
pub const DEFAULT_HANDICAP: f64 = 100.0;

/// Distance figures for one leg or for the whole task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Figures {
    pub distance: f64,
    /// Task distance up to and including this leg
    pub task_distance: f64,
    pub remaining: Option<f64>,
    pub leg_speed: Option<f64>,
    pub task_speed: Option<f64>,
    pub glide_ratio_remaining: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegScore {
    pub leg: usize,
    pub name: String,
    /// Time the turn counted
    pub time: Option<Epoch>,
    /// Turn reconstructed across a gap in the track
    pub estimated: bool,
    pub actual: Figures,
    pub handicapped: Option<Figures>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotScore {
    pub compno: String,
    pub name: Option<String>,
    pub handicap: f64,
    /// Time of the fix this snapshot was made from
    pub t: Epoch,
    pub utc_start: Option<Epoch>,
    pub utc_finish: Option<Epoch>,
    pub start_confirmed: bool,
    pub current_leg: usize,
    pub flight_state: FlightState,
    pub position: Option<LatLng>,
    pub altitude: Option<f64>,
    pub agl: Option<f64>,
    pub actual: Figures,
    pub handicapped: Option<Figures>,
    pub max_possible: Option<f64>,
    pub min_possible: Option<f64>,
    pub legs: Vec<LegScore>,
    /// Scored points in flying order, for drawing the scored track
    pub scored_points: Vec<LatLng>,
}

impl PilotScore {
    pub fn is_finished(&self) -> bool {
        self.utc_finish.is_some()
    }
}

/// Pilot details the formatter needs
#[derive(Debug, Clone, PartialEq)]
pub struct PilotInfo {
    pub compno: String,
    pub name: Option<String>,
    pub handicap: f64,
}

impl PilotInfo {
    pub fn unknown(compno: &str) -> Self {
        Self {
            compno: compno.to_string(),
            name: None,
            handicap: DEFAULT_HANDICAP,
        }
    }
}

/// Scale a distance to its handicapped equivalent, rounded to 0.1 km
pub fn handicapped_distance(actual: f64, handicap: f64) -> f64 {
    if !(handicap > 0.0) {
        return round1(actual);
    }
    round1(actual * 100.0 / handicap)
}

/// km/h, absent when the duration is not positive or the result is not
/// plausible
pub fn speed(distance: f64, seconds: Epoch) -> Option<f64> {
    if seconds <= 0 {
        return None;
    }
    let speed = distance / (seconds as f64 / 3600.0);
    (speed.is_finite() && speed <= MAX_PLAUSIBLE_SPEED).then(|| round1(speed))
}

pub fn glide_ratio(remaining: f64, agl: Option<f64>) -> Option<f64> {
    agl.filter(|agl| *agl > MIN_GLIDE_AGL_M)
        .map(|agl| round1(remaining * 1000.0 / agl))
}

/// Build the snapshot for one scored status
pub fn task_scores(task: &Task, pilot: &PilotInfo, calculated: &CalculatedTaskStatus) -> PilotScore {
    let status = &calculated.status;
    let now = status.utc_finish.unwrap_or(status.t);
    let speeds_allowed = status
        .utc_start
        .is_some_and(|start| now - start >= MIN_SPEED_ELAPSED_SECS);
    let elapsed = status.utc_start.map(|start| now - start).unwrap_or(0);
    let agl = status.altitude_agl;
    let remaining = calculated.distance_remaining;
    let handicapped = task.rules.handicapped;

    let figures = |distance: f64, remaining: Option<f64>| -> Figures {
        Figures {
            distance: round1(distance),
            task_distance: round1(distance),
            remaining: remaining.map(round1),
            leg_speed: None,
            task_speed: speeds_allowed.then(|| speed(distance, elapsed)).flatten(),
            glide_ratio_remaining: remaining.and_then(|r| glide_ratio(r, agl)),
        }
    };

    let actual = figures(calculated.distance_flown, remaining);
    let handicapped_overall = handicapped.then(|| {
        figures(
            handicapped_distance(calculated.distance_flown, pilot.handicap),
            remaining.map(|r| handicapped_distance(r, pilot.handicap)),
        )
    });

    let mut legs = Vec::with_capacity(task.legs.len().saturating_sub(1));
    let mut task_distance = 0.0;
    let mut leg_started = status.utc_start;
    let last = task.last_leg();
    for (index, leg) in task.legs.iter().enumerate().skip(1) {
        if index > status.current_leg && !status.is_finished() {
            break;
        }
        let Some(calculated_leg) = calculated.legs.get(index) else {
            break;
        };
        let leg_status = status.legs.get(index);
        let turned = if index == last {
            status.utc_finish
        } else if task.is_assigned_area() {
            leg_status.and_then(|l| l.exit_time.or(l.penalty_time))
        } else {
            leg_status.and_then(|l| l.turn_time())
        };
        let is_current = index == status.current_leg && !status.is_finished();
        let leg_end = if is_current { Some(status.t) } else { turned };

        task_distance += calculated_leg.distance;
        let leg_seconds = match (leg_started, leg_end) {
            (Some(from), Some(to)) => to - from,
            _ => 0,
        };
        let task_seconds = match (status.utc_start, leg_end) {
            (Some(from), Some(to)) => to - from,
            _ => 0,
        };
        let leg_remaining = if is_current { remaining } else { None };

        let leg_figures = |distance: f64, task_distance: f64, remaining: Option<f64>| Figures {
            distance: round1(distance),
            task_distance: round1(task_distance),
            remaining: remaining.map(round1),
            leg_speed: speeds_allowed.then(|| speed(distance, leg_seconds)).flatten(),
            task_speed: speeds_allowed.then(|| speed(task_distance, task_seconds)).flatten(),
            glide_ratio_remaining: remaining.and_then(|r| glide_ratio(r, agl)),
        };

        legs.push(LegScore {
            leg: index,
            name: leg.name.clone(),
            time: turned,
            estimated: leg_status.is_some_and(|l| l.estimated),
            actual: leg_figures(calculated_leg.distance, task_distance, leg_remaining),
            handicapped: handicapped.then(|| {
                leg_figures(
                    handicapped_distance(calculated_leg.distance, pilot.handicap),
                    handicapped_distance(task_distance, pilot.handicap),
                    leg_remaining.map(|r| handicapped_distance(r, pilot.handicap)),
                )
            }),
        });
        leg_started = turned;
    }

    let fix = status.last_fix;
    PilotScore {
        compno: pilot.compno.clone(),
        name: pilot.name.clone(),
        handicap: pilot.handicap,
        t: status.t,
        utc_start: status.utc_start,
        utc_finish: status.utc_finish,
        start_confirmed: status.start_confirmed,
        current_leg: status.current_leg,
        flight_state: status.flight_state,
        position: status.position(),
        altitude: fix.map(|f| f.altitude_msl),
        agl,
        actual,
        handicapped: handicapped_overall,
        max_possible: calculated.max_possible.map(round1),
        min_possible: calculated.min_possible.map(round1),
        legs,
        scored_points: calculated.legs.iter().filter_map(|leg| leg.point).collect(),
    }
}
