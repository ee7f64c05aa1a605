//! Airborne / landed classification of an ordered fix stream

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fix::{Epoch, PositionFix};
use crate::geometry::LatLng;
use crate::in_order::OrderedFix;

/// Movement below this (km) from the last retained fix counts as stationary
const MOVEMENT_THRESHOLD_KM: f64 = 0.012;

/// Stationary for this long means on the ground
const STILLNESS_SECS: Epoch = 60;

/// On the ground within this distance of home is parked, not landed out
const HOME_RADIUS_KM: f64 = 2.0;

/// Above this height the glider is flying whatever it looks like
const AIRBORNE_AGL_M: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightState {
    #[default]
    Unknown,
    /// On the airfield, not yet flown
    Grid,
    Airborne,
    /// On the ground away from home
    Landed,
    /// Back on the airfield after flying
    Home,
}

/// A fix with its classification
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFix {
    pub fix: PositionFix,
    pub state: FlightState,
    pub live: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    Forward(ClassifiedFix),
    /// Stationary and unchanged, nothing new for downstream
    Suppress,
    /// Landed out: the final fix, the pipeline stops after this
    Terminate(ClassifiedFix),
}

#[derive(Debug, Clone)]
pub struct FlightStatusStage {
    home: LatLng,
    retained: Option<PositionFix>,
    stationary_since: Option<Epoch>,
    state: FlightState,
    has_flown: bool,
    terminated: bool,
}

impl FlightStatusStage {
    pub fn new(home: LatLng) -> Self {
        Self {
            home,
            retained: None,
            stationary_since: None,
            state: FlightState::Unknown,
            has_flown: false,
            terminated: false,
        }
    }

    pub fn state(&self) -> FlightState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn process(&mut self, ordered: OrderedFix) -> StatusOutcome {
        if self.terminated {
            return StatusOutcome::Suppress;
        }
        let OrderedFix { fix, live } = ordered;

        let high = fix.altitude_agl.is_some_and(|agl| agl > AIRBORNE_AGL_M);
        let moved = match &self.retained {
            // a rewind takes us back in time: start over from this fix
            Some(previous) if fix.t < previous.t => true,
            Some(previous) => previous.location().distance_to(&fix.location()) > MOVEMENT_THRESHOLD_KM,
            None => false,
        };
        let near_home = fix.location().distance_to(&self.home) <= HOME_RADIUS_KM;

        let new_state = if moved || high {
            self.stationary_since = Some(fix.t);
            self.retained = Some(fix.clone());
            // taxiing around the field is not flying
            if high || !near_home || self.has_flown {
                FlightState::Airborne
            } else if self.state == FlightState::Unknown {
                FlightState::Grid
            } else {
                self.state
            }
        } else {
            if self.retained.is_none() {
                self.retained = Some(fix.clone());
            }
            let since = *self.stationary_since.get_or_insert(fix.t);
            if fix.t - since >= STILLNESS_SECS {
                match (near_home, self.has_flown) {
                    (true, true) => FlightState::Home,
                    (true, false) => FlightState::Grid,
                    (false, true) => FlightState::Landed,
                    (false, false) => self.state,
                }
            } else if self.state == FlightState::Unknown && near_home {
                FlightState::Grid
            } else {
                self.state
            }
        };

        let changed = new_state != self.state;
        if changed {
            debug!(
                competitor = %fix.competitor,
                from = ?self.state,
                to = ?new_state,
                t = fix.t,
                "Flight state changed"
            );
        }
        self.state = new_state;
        if new_state == FlightState::Airborne {
            self.has_flown = true;
        }

        let classified = ClassifiedFix {
            fix,
            state: new_state,
            live,
        };

        if new_state == FlightState::Landed {
            info!(competitor = %classified.fix.competitor, t = classified.fix.t, "Landed out");
            self.terminated = true;
            return StatusOutcome::Terminate(classified);
        }

        if moved || high || changed || live {
            StatusOutcome::Forward(classified)
        } else {
            StatusOutcome::Suppress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix_at(t: Epoch, location: LatLng, agl: Option<f64>) -> OrderedFix {
        OrderedFix {
            fix: PositionFix {
                competitor: "T1".to_string(),
                lat: location.lat,
                lng: location.lng,
                altitude_msl: 200.0 + agl.unwrap_or(0.0),
                altitude_agl: agl,
                t,
                bearing: None,
                speed: None,
                vario: None,
                is_late: false,
            },
            live: false,
        }
    }

    #[test]
    fn test_grid_then_airborne_then_home() {
        let home = LatLng::new(50.0, 8.0);
        let mut stage = FlightStatusStage::new(home);

        // parked on the grid
        for t in 0..3 {
            stage.process(fix_at(t * 30, home, Some(0.0)));
        }
        assert_eq!(stage.state(), FlightState::Grid);

        // flying
        let away = home.destination(90.0, 20.0);
        let outcome = stage.process(fix_at(100, away, Some(900.0)));
        assert!(matches!(outcome, StatusOutcome::Forward(ClassifiedFix { state: FlightState::Airborne, .. })));

        // back and parked
        let parked = home.destination(0.0, 0.5);
        stage.process(fix_at(2000, parked, Some(0.0)));
        stage.process(fix_at(2030, parked, Some(0.0)));
        let outcome = stage.process(fix_at(2070, parked, Some(0.0)));
        assert!(matches!(outcome, StatusOutcome::Forward(ClassifiedFix { state: FlightState::Home, .. })));
        assert!(!stage.is_terminated());
    }

    #[test]
    fn test_landed_out_terminates() {
        let home = LatLng::new(50.0, 8.0);
        let mut stage = FlightStatusStage::new(home);
        let field = home.destination(45.0, 60.0);

        stage.process(fix_at(0, home.destination(45.0, 30.0), Some(1000.0)));
        assert_eq!(stage.state(), FlightState::Airborne);

        assert!(matches!(stage.process(fix_at(100, field, Some(0.0))), StatusOutcome::Forward(_)));
        assert_eq!(stage.process(fix_at(130, field, Some(0.0))), StatusOutcome::Suppress);
        let outcome = stage.process(fix_at(170, field, Some(0.0)));
        assert!(matches!(outcome, StatusOutcome::Terminate(ClassifiedFix { state: FlightState::Landed, .. })));
        assert!(stage.is_terminated());
        assert_eq!(stage.process(fix_at(200, field, Some(0.0))), StatusOutcome::Suppress);
    }

    #[test]
    fn test_live_marker_always_forwarded() {
        let home = LatLng::new(50.0, 8.0);
        let mut stage = FlightStatusStage::new(home);
        stage.process(fix_at(0, home, Some(0.0)));
        assert_eq!(stage.process(fix_at(10, home, Some(0.0))), StatusOutcome::Suppress);

        let mut marked = fix_at(20, home, Some(0.0));
        marked.live = true;
        assert!(matches!(stage.process(marked), StatusOutcome::Forward(_)));
    }
}
