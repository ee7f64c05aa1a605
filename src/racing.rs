//! Racing task scoring: fixed turnpoints, fixed leg lengths

use std::sync::Arc;

use tracing::debug;

use crate::distance::{CalculatedLeg, CalculatedTaskStatus, DistanceCalculator, shortest_remaining};
use crate::geometry::LatLng;
use crate::task::Task;
use crate::task_position::TaskStatus;

pub struct RacingCalculator {
    task: Arc<Task>,
}

impl RacingCalculator {
    pub fn new(task: Arc<Task>) -> Self {
        Self { task }
    }
}

impl DistanceCalculator for RacingCalculator {
    fn calculate(&mut self, status: &TaskStatus) -> Option<CalculatedTaskStatus> {
        let task = &self.task;
        if status.utc_start.is_none() {
            return Some(CalculatedTaskStatus::not_started(task, status));
        }

        let last = task.last_leg();
        let finished = status.is_finished();
        let current = status.current_leg.clamp(1, last);

        let mut legs = vec![CalculatedLeg::default(); task.legs.len()];
        legs[0].point = Some(task.legs[0].point);
        let mut flown = 0.0;
        for (index, leg) in task.legs.iter().enumerate().skip(1) {
            let calculated = &mut legs[index];
            calculated.max_possible = Some(leg.length);
            if finished || index < current {
                calculated.distance = leg.length;
                calculated.point = Some(leg.point);
            } else if index == current {
                let Some(closest) = status.closest_to_next else {
                    debug!(competitor = %status.competitor, leg = index, "No closest approach yet, skipping update");
                    return None;
                };
                calculated.distance = (leg.length - closest).max(0.0);
                calculated.point = status
                    .closest_to_next_point
                    .map(|p| LatLng::new(p.lat, p.lng));
            }
            flown += calculated.distance;
        }

        let remaining = if finished {
            Some(0.0)
        } else {
            let first = if status.legs[current].achieved() {
                current + 1
            } else {
                current
            };
            status.position().and_then(|position| {
                shortest_remaining(task, position, first).map(|(remaining, splits)| {
                    for split in splits {
                        *legs[split.leg].min_possible.get_or_insert(0.0) += split.distance;
                    }
                    remaining
                })
            })
        };

        Some(CalculatedTaskStatus {
            status: status.clone(),
            distance_flown: flown,
            distance_remaining: remaining,
            max_possible: Some(task.total_length()),
            min_possible: remaining.map(|r| flown + r),
            legs,
        })
    }
}
