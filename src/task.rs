use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::fix::Epoch;
use crate::geometry::{LatLng, vincenty_km};
use crate::sector::{self, SectorGeometry};

/// How a sector is oriented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Outer bisector of the inbound and outbound legs
    #[default]
    Symmetrical,
    /// Facing away from the next point
    NextPoint,
    /// Facing away from the previous point
    PreviousPoint,
    /// Fixed bearing from the definition
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegKind {
    #[default]
    Sector,
    Line,
}

/// One turnpoint as published by the task store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegDefinition {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub kind: LegKind,
    /// km
    pub radius1: f64,
    #[serde(default)]
    pub radius2: Option<f64>,
    /// Half angle in degrees, 180 is a full circle
    #[serde(default = "default_angle1")]
    pub angle1: f64,
    #[serde(default)]
    pub angle2: Option<f64>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub fixed_bearing: Option<f64>,
    /// Leg length in km if the store already computed it
    #[serde(default)]
    pub length: Option<f64>,
}

fn default_angle1() -> f64 {
    180.0
}

impl LegDefinition {
    pub fn point(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRules {
    #[serde(default)]
    pub assigned_area: bool,
    #[serde(default)]
    pub grand_prix_start: bool,
    /// Start gate opening, epoch seconds
    #[serde(default)]
    pub no_start_before: Option<Epoch>,
    #[serde(default)]
    pub handicapped: bool,
}

/// Task as produced by the external store: rules plus ordered legs,
/// index 0 is the start and the last is the finish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub rules: TaskRules,
    /// Contest airfield; defaults to the start point
    #[serde(default)]
    pub home: Option<LatLng>,
    pub legs: Vec<LegDefinition>,
}

impl TaskDefinition {
    /// Load a task from a `.toml` or `.json` file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let definition: TaskDefinition = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {:?}", path))?,
            _ => toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?,
        };
        Ok(definition)
    }
}

/// A prepared leg with its geometry precomputed
#[derive(Debug, Clone)]
pub struct Leg {
    pub index: usize,
    pub name: String,
    pub point: LatLng,
    pub kind: LegKind,
    pub radius1: f64,
    pub radius2: Option<f64>,
    pub angle1: f64,
    pub angle2: Option<f64>,
    pub direction: Direction,
    pub geometry: SectorGeometry,
    /// Distance from the previous leg's point in km, 0 for the start
    pub length: f64,
}

/// Task shared read-only by every competitor pipeline of a class
#[derive(Debug, Clone)]
pub struct Task {
    pub rules: TaskRules,
    pub home: LatLng,
    pub legs: Vec<Leg>,
}

impl Task {
    pub fn prepare(definition: &TaskDefinition) -> Result<Self> {
        let defs = &definition.legs;
        if defs.len() < 2 {
            bail!("Task needs at least a start and a finish, got {} legs", defs.len());
        }
        for (index, def) in defs.iter().enumerate() {
            if !def.point().is_finite() {
                bail!("Leg {} ({}) has non-finite coordinates", index, def.name);
            }
            if !(def.radius1 > 0.0) {
                bail!("Leg {} ({}) has non-positive radius {}", index, def.name, def.radius1);
            }
        }

        let last = defs.len() - 1;
        let mut legs = Vec::with_capacity(defs.len());
        for (index, def) in defs.iter().enumerate() {
            let geometry = sector::build_boundary(defs, index);
            if geometry.direction_unresolved {
                warn!(
                    leg = index,
                    name = %def.name,
                    "Sector direction could not be resolved, using bisector 0"
                );
            }

            let length = match (index, def.length) {
                (0, _) => 0.0,
                (_, Some(length)) => length,
                (_, None) => {
                    let mut length = vincenty_km(defs[index - 1].point(), def.point());
                    // ring finish: the race ends at the cylinder edge
                    if index == last && geometry.quick_circle {
                        length = (length - def.radius1).max(0.0);
                    }
                    length
                }
            };

            legs.push(Leg {
                index,
                name: def.name.clone(),
                point: def.point(),
                kind: def.kind,
                radius1: def.radius1,
                radius2: def.radius2,
                angle1: def.angle1,
                angle2: def.angle2,
                direction: def.direction,
                geometry,
                length,
            });
        }

        let home = definition.home.unwrap_or(legs[0].point);
        let task = Task {
            rules: definition.rules.clone(),
            home,
            legs,
        };
        info!(
            legs = task.legs.len(),
            assigned_area = task.rules.assigned_area,
            length_km = task.total_length(),
            "Prepared task"
        );
        Ok(task)
    }

    pub fn last_leg(&self) -> usize {
        self.legs.len() - 1
    }

    pub fn is_assigned_area(&self) -> bool {
        self.rules.assigned_area
    }

    /// Sum of leg lengths (nominal task distance)
    pub fn total_length(&self) -> f64 {
        self.legs.iter().map(|leg| leg.length).sum()
    }

    /// Distance subtracted when scoring to the finish point: the radius of
    /// a ring finish, nothing for a line
    pub fn finish_adjustment(&self) -> f64 {
        let finish = &self.legs[self.last_leg()];
        if finish.geometry.quick_circle {
            finish.radius1
        } else {
            0.0
        }
    }

    /// Legs with an unresolved direction, for operator attention
    pub fn degraded_legs(&self) -> Vec<usize> {
        self.legs
            .iter()
            .filter(|leg| leg.geometry.direction_unresolved)
            .map(|leg| leg.index)
            .collect()
    }
}
