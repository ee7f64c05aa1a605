//! Distance calculators turn a `TaskStatus` into scored distances

use serde::{Deserialize, Serialize};

use crate::fix::Epoch;
use crate::geometry::{LatLng, haversine_km};
use crate::graph::Graph;
use crate::task::Task;
use crate::task_position::TaskStatus;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculatedLeg {
    /// Point the leg was scored to, if any
    pub point: Option<LatLng>,
    /// Distance credited for this leg (km)
    pub distance: f64,
    pub max_possible: Option<f64>,
    pub min_possible: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatedTaskStatus {
    pub status: TaskStatus,
    pub distance_flown: f64,
    pub distance_remaining: Option<f64>,
    /// Best task distance still achievable
    pub max_possible: Option<f64>,
    /// Shortest task distance still achievable
    pub min_possible: Option<f64>,
    pub legs: Vec<CalculatedLeg>,
}

impl CalculatedTaskStatus {
    /// Figures before the competitor has started: nothing flown, the whole
    /// nominal task ahead
    pub fn not_started(task: &Task, status: &TaskStatus) -> Self {
        let nominal = task.total_length();
        Self {
            status: status.clone(),
            distance_flown: 0.0,
            distance_remaining: Some(nominal),
            max_possible: Some(nominal),
            min_possible: Some(nominal),
            legs: task
                .legs
                .iter()
                .map(|leg| CalculatedLeg {
                    point: None,
                    distance: 0.0,
                    max_possible: Some(leg.length),
                    min_possible: None,
                })
                .collect(),
        }
    }
}

/// Scores a status update. `None` means the update could not be scored with
/// the context available and should be skipped; the next one will retry.
pub trait DistanceCalculator: Send {
    fn calculate(&mut self, status: &TaskStatus) -> Option<CalculatedTaskStatus>;
}

/// Node identities used by the scoring graphs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathNode {
    Start,
    /// Current position of the competitor
    Current,
    /// An achieved fix on a leg, identified by its timestamp
    Fix { leg: usize, t: Epoch },
    /// A sampled sector boundary coordinate
    Boundary { leg: usize, index: usize },
    /// Synthetic node crediting progress on an unfinished leg
    Virtual,
    Finish,
}

impl PathNode {
    /// Leg whose distance an edge ending at this node is credited to
    pub fn leg(&self, task: &Task, virtual_leg: usize) -> usize {
        match self {
            PathNode::Start | PathNode::Current => 0,
            PathNode::Fix { leg, .. } | PathNode::Boundary { leg, .. } => *leg,
            PathNode::Virtual => virtual_leg,
            PathNode::Finish => task.last_leg(),
        }
    }
}

pub type Layer = Vec<(PathNode, LatLng)>;

/// Sampled boundary of a leg's sector as graph nodes, closing vertex dropped
pub fn boundary_layer(task: &Task, leg: usize) -> Layer {
    let boundary = &task.legs[leg].geometry.boundary;
    let open = match (boundary.first(), boundary.last()) {
        (Some(first), Some(last)) if boundary.len() > 1 && first == last => &boundary[..boundary.len() - 1],
        _ => &boundary[..],
    };
    let mut seen: Vec<LatLng> = Vec::with_capacity(open.len());
    let mut layer = Vec::with_capacity(open.len());
    for (index, point) in open.iter().enumerate() {
        if seen.contains(point) {
            continue;
        }
        seen.push(*point);
        layer.push((PathNode::Boundary { leg, index }, *point));
    }
    layer
}

/// Link every node of `from` to every node of `to`, weights computed from
/// the real distance by `weight`
pub fn link_layers<F>(graph: &mut Graph<PathNode>, from: &[(PathNode, LatLng)], to: &[(PathNode, LatLng)], weight: F)
where
    F: Fn(f64) -> f64,
{
    for (a, a_point) in from {
        for (b, b_point) in to {
            graph.add_link_if_missing(*a, *b, || weight(haversine_km(*a_point, *b_point)));
        }
    }
}

/// One hop of a scored path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegSplit {
    pub leg: usize,
    /// Node the hop ends at
    pub node: PathNode,
    pub distance: f64,
}

/// Split a path (as returned by `shortest_path`, finish first) into hops in
/// flying order. `distance` maps an edge weight back to km.
pub fn leg_distances<F>(
    task: &Task,
    graph: &Graph<PathNode>,
    path: &[PathNode],
    virtual_leg: usize,
    distance: F,
) -> Vec<LegSplit>
where
    F: Fn(f64) -> f64,
{
    let mut splits = Vec::with_capacity(path.len().saturating_sub(1));
    for pair in path.windows(2).rev() {
        let (to, from) = (pair[0], pair[1]);
        if let Some(weight) = graph.weight(&from, &to) {
            splits.push(LegSplit {
                leg: to.leg(task, virtual_leg),
                node: to,
                distance: distance(weight),
            });
        }
    }
    splits
}

/// Shortest distance from `origin` through the sectors of legs
/// `first_leg..last` to the finish, minus the finish ring radius
pub fn shortest_remaining(task: &Task, origin: LatLng, first_leg: usize) -> Option<(f64, Vec<LegSplit>)> {
    let last = task.last_leg();
    let mut graph = Graph::new();
    let mut previous = vec![(PathNode::Current, origin)];
    for leg in first_leg.max(1)..last {
        let layer = boundary_layer(task, leg);
        link_layers(&mut graph, &previous, &layer, |d| d);
        previous = layer;
    }
    link_layers(&mut graph, &previous, &[(PathNode::Finish, task.legs[last].point)], |d| d);

    let path = graph.shortest_path(&PathNode::Current, &PathNode::Finish);
    if path.is_empty() {
        return None;
    }
    let total = graph.path_weight(&path)?;
    let splits = leg_distances(task, &graph, &path, last, |w| w);
    Some(((total - task.finish_adjustment()).max(0.0), splits))
}
