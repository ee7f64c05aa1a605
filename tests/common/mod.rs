//! Builders shared by the scoring integration tests
//!
//! Tasks are laid out with `LatLng::destination` from a fixed origin and
//! tracks are generated by interpolating between timed waypoints, so every
//! waypoint time lands exactly on a fix.

#![allow(dead_code)]

use std::sync::Arc;

use taskscore::fix::{Epoch, PositionFix};
use taskscore::geometry::LatLng;
use taskscore::task::{Direction, LegDefinition, LegKind, Task, TaskDefinition, TaskRules};

pub const ORIGIN: LatLng = LatLng { lat: 50.0, lng: 8.0 };

pub fn line(name: &str, point: LatLng, radius: f64, direction: Direction) -> LegDefinition {
    LegDefinition {
        name: name.to_string(),
        lat: point.lat,
        lng: point.lng,
        kind: LegKind::Line,
        radius1: radius,
        radius2: None,
        angle1: 90.0,
        angle2: None,
        direction,
        fixed_bearing: None,
        length: None,
    }
}

pub fn cylinder(name: &str, point: LatLng, radius: f64) -> LegDefinition {
    LegDefinition {
        name: name.to_string(),
        lat: point.lat,
        lng: point.lng,
        kind: LegKind::Sector,
        radius1: radius,
        radius2: None,
        angle1: 180.0,
        angle2: None,
        direction: Direction::Symmetrical,
        fixed_bearing: None,
        length: None,
    }
}

pub fn prepare(rules: TaskRules, legs: Vec<LegDefinition>) -> Arc<Task> {
    let definition = TaskDefinition {
        rules,
        home: None,
        legs,
    };
    Arc::new(Task::prepare(&definition).expect("valid task"))
}

pub fn fix(competitor: &str, t: Epoch, point: LatLng) -> PositionFix {
    PositionFix {
        competitor: competitor.to_string(),
        lat: point.lat,
        lng: point.lng,
        altitude_msl: 1200.0,
        altitude_agl: Some(800.0),
        t,
        bearing: None,
        speed: None,
        vario: None,
        is_late: false,
    }
}

/// A fix every `step` seconds along straight segments between waypoints.
/// Waypoint times should be multiples of `step` apart.
pub fn fly(competitor: &str, waypoints: &[(Epoch, LatLng)], step: Epoch) -> Vec<PositionFix> {
    let mut fixes = Vec::new();
    for pair in waypoints.windows(2) {
        let (t0, from) = pair[0];
        let (t1, to) = pair[1];
        let mut t = t0;
        while t < t1 {
            let f = (t - t0) as f64 / (t1 - t0) as f64;
            let point = LatLng::new(from.lat + (to.lat - from.lat) * f, from.lng + (to.lng - from.lng) * f);
            fixes.push(fix(competitor, t, point));
            t += step;
        }
    }
    if let Some(&(t, point)) = waypoints.last() {
        fixes.push(fix(competitor, t, point));
    }
    fixes
}
