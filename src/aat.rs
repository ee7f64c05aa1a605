//! Assigned area scoring
//!
//! Keeps one convex hull per area over the points achieved in it and a
//! layered graph linking every hull point to every point of the neighbouring
//! hulls with `maximizing_weight`, so the shortest path from the start to
//! the finish is the longest scoring distance. Hulls are updated from their
//! previous output plus new points only; the graph follows by removing
//! dropped vertices and linking added ones. Queries run on clones.

use std::sync::Arc;

use tracing::debug;

use crate::distance::{
    CalculatedLeg, CalculatedTaskStatus, DistanceCalculator, Layer, LegSplit, PathNode,
    boundary_layer, leg_distances, link_layers, shortest_remaining,
};
use crate::fix::{Epoch, TrackPoint};
use crate::geometry::LatLng;
use crate::geometry::hull::convex_hull;
use crate::graph::{Graph, LONGEST_PATH_CONSTANT, maximizing_weight};
use crate::sector;
use crate::task::Task;
use crate::task_position::TaskStatus;

pub struct AatCalculator {
    task: Arc<Task>,
    graph: Graph<PathNode>,
    hulls: Vec<Vec<TrackPoint>>,
    /// Points of each leg's source list already folded into its hull
    consumed: Vec<usize>,
    /// The hull was built from penalty points
    from_penalty: Vec<bool>,
    start: Option<Epoch>,
}

fn real_distance(weight: f64) -> f64 {
    LONGEST_PATH_CONSTANT - weight
}

impl AatCalculator {
    pub fn new(task: Arc<Task>) -> Self {
        let legs = task.legs.len();
        let mut calculator = Self {
            task,
            graph: Graph::new(),
            hulls: vec![Vec::new(); legs],
            consumed: vec![0; legs],
            from_penalty: vec![false; legs],
            start: None,
        };
        calculator.reset(None);
        calculator
    }

    fn reset(&mut self, start: Option<Epoch>) {
        let legs = self.task.legs.len();
        self.graph = Graph::new();
        self.graph.add_vertex(PathNode::Start);
        self.hulls = vec![Vec::new(); legs];
        self.consumed = vec![0; legs];
        self.from_penalty = vec![false; legs];
        self.start = start;
    }

    /// Hull points of leg `leg` as graph nodes; the start and finish are
    /// single points
    fn layer(&self, leg: usize) -> Layer {
        let last = self.task.last_leg();
        if leg == 0 {
            vec![(PathNode::Start, self.task.legs[0].point)]
        } else if leg >= last {
            vec![(PathNode::Finish, self.task.legs[last].point)]
        } else {
            hull_layer(leg, &self.hulls[leg])
        }
    }

    fn node_point(&self, node: PathNode, status: &TaskStatus) -> Option<LatLng> {
        match node {
            PathNode::Start => Some(self.task.legs[0].point),
            PathNode::Finish => Some(self.task.legs[self.task.last_leg()].point),
            PathNode::Fix { leg, t } => self.hulls[leg]
                .iter()
                .find(|p| p.t == t)
                .map(|p| LatLng::new(p.lat, p.lng)),
            PathNode::Boundary { leg, index } => self.task.legs[leg].geometry.boundary.get(index).copied(),
            PathNode::Current => status.position(),
            PathNode::Virtual => None,
        }
    }

    /// Fold new points into each area's hull and keep the graph in step
    fn update_hulls(&mut self, status: &TaskStatus) {
        let last = self.task.last_leg();
        for leg in 1..last {
            let leg_status = &status.legs[leg];
            let from_penalty = leg_status.points.is_empty();
            let source = leg_status.scoring_points();

            if from_penalty != self.from_penalty[leg] || source.len() < self.consumed[leg] {
                for point in self.hulls[leg].drain(..) {
                    self.graph.remove_vertex(&PathNode::Fix { leg, t: point.t });
                }
                self.consumed[leg] = 0;
                self.from_penalty[leg] = from_penalty;
            }
            if source.len() == self.consumed[leg] {
                continue;
            }

            let mut candidates = self.hulls[leg].clone();
            candidates.extend_from_slice(&source[self.consumed[leg]..]);
            let hull = convex_hull(&candidates);
            self.consumed[leg] = source.len();

            let previous = std::mem::take(&mut self.hulls[leg]);
            for dropped in previous.iter().filter(|p| !hull.iter().any(|q| q.t == p.t)) {
                self.graph.remove_vertex(&PathNode::Fix { leg, t: dropped.t });
            }
            let added: Vec<TrackPoint> = hull
                .iter()
                .filter(|p| !previous.iter().any(|q| q.t == p.t))
                .copied()
                .collect();
            self.hulls[leg] = hull;
            if added.is_empty() {
                continue;
            }

            let added = hull_layer(leg, &added);
            let before = self.layer(leg - 1);
            let after = self.layer(leg + 1);
            link_layers(&mut self.graph, &before, &added, maximizing_weight);
            link_layers(&mut self.graph, &added, &after, maximizing_weight);
            debug!(
                competitor = %status.competitor,
                leg,
                hull = self.hulls[leg].len(),
                vertices = self.graph.vertex_count(),
                "Updated area hull"
            );
        }
    }

    /// Leg currently being flown has achieved points
    fn in_area(&self, status: &TaskStatus) -> bool {
        let current = status.current_leg;
        current >= 1 && current < self.task.last_leg() && !self.hulls[current].is_empty()
    }

    fn distance_flown(&self, status: &TaskStatus) -> Option<(f64, Vec<LegSplit>)> {
        let task = &self.task;
        let last = task.last_leg();

        if status.is_finished() {
            let path = self.graph.shortest_path(&PathNode::Start, &PathNode::Finish);
            if path.is_empty() {
                return None;
            }
            let splits = leg_distances(task, &self.graph, &path, last, real_distance);
            let total: f64 = splits.iter().map(|s| s.distance).sum();
            return Some(((total - task.finish_adjustment()).max(0.0), splits));
        }

        let current = status.current_leg;
        if current == 0 {
            return None;
        }
        let in_area = self.in_area(status);
        let (layer_leg, target_leg) = if in_area {
            (current, current + 1)
        } else {
            (current - 1, current)
        };
        let layer = self.layer(layer_leg);
        if layer.is_empty() {
            return None;
        }

        let (target, progress) = if in_area {
            let position = status.position()?;
            let target = sector::nearest_point(&task.legs[target_leg], position);
            (target, position.distance_to(&target))
        } else {
            (status.closest_sector_point?, status.closest_to_next?)
        };

        let mut graph = self.graph.clone();
        for (node, point) in &layer {
            let credit = (point.distance_to(&target) - progress).max(0.0);
            graph.add_link(*node, PathNode::Virtual, maximizing_weight(credit));
        }
        let path = graph.shortest_path(&PathNode::Start, &PathNode::Virtual);
        if path.is_empty() {
            return None;
        }
        let splits = leg_distances(task, &graph, &path, target_leg, real_distance);
        let total: f64 = splits.iter().map(|s| s.distance).sum();
        Some((total, splits))
    }

    /// Longest task still possible: achieved hulls, then the raw sector
    /// outlines of every area not flown yet
    fn max_possible(&self, status: &TaskStatus) -> Option<(f64, Vec<LegSplit>)> {
        let task = &self.task;
        let last = task.last_leg();
        let first_unflown = if status.is_finished() {
            last
        } else if self.in_area(status) {
            status.current_leg + 1
        } else {
            status.current_leg
        };
        if first_unflown == 0 {
            return None;
        }

        let mut graph = self.graph.clone();
        let mut previous = self.layer(first_unflown - 1);
        if previous.is_empty() {
            return None;
        }
        for leg in first_unflown..last {
            let layer = boundary_layer(task, leg);
            link_layers(&mut graph, &previous, &layer, maximizing_weight);
            previous = layer;
        }
        link_layers(&mut graph, &previous, &self.layer(last), maximizing_weight);

        let path = graph.shortest_path(&PathNode::Start, &PathNode::Finish);
        if path.is_empty() {
            return None;
        }
        let splits = leg_distances(task, &graph, &path, last, real_distance);
        let total: f64 = splits.iter().map(|s| s.distance).sum();
        Some(((total - task.finish_adjustment()).max(0.0), splits))
    }

    /// Shortest way home from the closest approach (or the current position
    /// inside an area) through the remaining sectors
    fn min_remaining(&self, status: &TaskStatus) -> Option<(f64, Vec<LegSplit>)> {
        if status.is_finished() {
            return Some((0.0, Vec::new()));
        }
        let (origin, first) = if self.in_area(status) {
            (status.position()?, status.current_leg + 1)
        } else {
            let closest = status.closest_to_next_point?;
            (LatLng::new(closest.lat, closest.lng), status.current_leg)
        };
        shortest_remaining(&self.task, origin, first)
    }
}

fn hull_layer(leg: usize, points: &[TrackPoint]) -> Layer {
    points
        .iter()
        .map(|p| (PathNode::Fix { leg, t: p.t }, LatLng::new(p.lat, p.lng)))
        .collect()
}

impl DistanceCalculator for AatCalculator {
    fn calculate(&mut self, status: &TaskStatus) -> Option<CalculatedTaskStatus> {
        let Some(start) = status.utc_start else {
            if self.start.is_some() {
                self.reset(None);
            }
            return Some(CalculatedTaskStatus::not_started(&self.task, status));
        };
        if self.start != Some(start) {
            self.reset(Some(start));
        }
        self.update_hulls(status);

        let Some((flown, flown_splits)) = self.distance_flown(status) else {
            debug!(
                competitor = %status.competitor,
                leg = status.current_leg,
                "Missing context for area scoring, skipping update"
            );
            return None;
        };
        let max = self.max_possible(status);
        let remaining = self.min_remaining(status);

        let mut legs = vec![CalculatedLeg::default(); self.task.legs.len()];
        legs[0].point = Some(self.task.legs[0].point);
        for split in &flown_splits {
            let leg = &mut legs[split.leg];
            leg.distance += split.distance;
            if let Some(point) = self.node_point(split.node, status) {
                leg.point = Some(point);
            }
        }
        if let Some((_, splits)) = &max {
            for split in splits {
                *legs[split.leg].max_possible.get_or_insert(0.0) += split.distance;
            }
        }
        if let Some((_, splits)) = &remaining {
            for split in splits {
                *legs[split.leg].min_possible.get_or_insert(0.0) += split.distance;
            }
        }

        let distance_remaining = remaining.as_ref().map(|(d, _)| *d);
        Some(CalculatedTaskStatus {
            status: status.clone(),
            distance_flown: flown,
            distance_remaining,
            max_possible: max.map(|(d, _)| d),
            min_possible: distance_remaining.map(|d| flown + d),
            legs,
        })
    }
}
