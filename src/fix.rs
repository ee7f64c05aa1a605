use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geometry::LatLng;
use crate::geometry::hull::Located;

/// Seconds since the unix epoch
pub type Epoch = i64;

/// A position fix for one competitor, as delivered by the ingestion side.
/// Altitudes are metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Competition number
    pub competitor: String,
    pub lat: f64,
    pub lng: f64,
    pub altitude_msl: f64,
    #[serde(default)]
    pub altitude_agl: Option<f64>,
    /// Epoch seconds
    pub t: Epoch,
    #[serde(default)]
    pub bearing: Option<f64>,
    /// Ground speed in km/h
    #[serde(default)]
    pub speed: Option<f64>,
    /// Raw vario samples passed through for display
    #[serde(default)]
    pub vario: Option<Vec<f64>>,
    #[serde(default)]
    pub is_late: bool,
}

impl PositionFix {
    pub fn location(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn to_track_point(&self) -> TrackPoint {
        TrackPoint {
            t: self.t,
            lat: self.lat,
            lng: self.lng,
            altitude_msl: self.altitude_msl,
        }
    }
}

/// Compact fix kept in leg status for assigned area scoring. Identity is the
/// timestamp: a competitor never has two fixes at the same second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub t: Epoch,
    pub lat: f64,
    pub lng: f64,
    pub altitude_msl: f64,
}

impl Located for TrackPoint {
    fn location(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

impl Located for PositionFix {
    fn location(&self) -> LatLng {
        PositionFix::location(self)
    }
}

/// Read JSON-lines fixes, one object per line. Blank lines are skipped,
/// unparseable ones are logged and skipped.
pub fn read_fixes(reader: impl BufRead) -> Result<Vec<PositionFix>> {
    let mut fixes = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", number + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PositionFix>(&line) {
            Ok(fix) => fixes.push(fix),
            Err(e) => warn!(line = number + 1, error = %e, "Skipping unparseable fix"),
        }
    }
    Ok(fixes)
}

pub fn load_fixes(path: &Path) -> Result<Vec<PositionFix>> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    read_fixes(std::io::BufReader::new(file))
}

/// Split a mixed stream by competitor, keeping arrival order within each
pub fn group_by_competitor(fixes: Vec<PositionFix>) -> BTreeMap<String, Vec<PositionFix>> {
    let mut grouped: BTreeMap<String, Vec<PositionFix>> = BTreeMap::new();
    for fix in fixes {
        grouped.entry(fix.competitor.clone()).or_default().push(fix);
    }
    grouped
}
