//! Turnpoint sector geometry
//!
//! Builds the outline polygon of every leg once when the task is prepared,
//! then answers "is this fix inside, inside the penalty volume, or how far
//! away is it" for each fix.

use geo::Polygon;

use crate::geometry::{LatLng, normalize_bearing, polygon_contains, polygon_from_ring};
use crate::geometry::{haversine_km, nearest_on_boundary};
use crate::task::{Direction, Leg, LegDefinition, LegKind};

/// Fixes within this distance outside a sector are in its penalty volume
pub const PENALTY_ALLOWANCE_KM: f64 = 0.5;

/// Angular step used when walking sector arcs
const ARC_STEP_DEG: f64 = 10.0;

/// Float slack so a point placed exactly on a circle counts as inside
const BOUNDARY_TOLERANCE_KM: f64 = 1e-6;

/// Half angle used for start and finish lines (a half disc)
const LINE_HALF_ANGLE: f64 = 90.0;

/// Derived per-leg geometry
#[derive(Debug, Clone)]
pub struct SectorGeometry {
    /// Direction the sector opens towards, degrees
    pub bisector: f64,
    pub max_radius: f64,
    /// Full circle with no second radius: containment is a distance check
    pub quick_circle: bool,
    /// The direction rule had no reference point, bisector fell back to 0
    pub direction_unresolved: bool,
    /// Closed outline, coordinates rounded to 1e-5 degrees
    pub boundary: Vec<LatLng>,
    pub polygon: Polygon<f64>,
}

/// Result of testing a point against a leg
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectorCheck {
    pub in_sector: bool,
    pub in_penalty: bool,
    /// km to the nearest boundary point, 0 when inside
    pub distance: f64,
}

/// Shape summary of a leg before the outline is built
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocessed {
    pub max_radius: f64,
    pub quick_circle: bool,
    pub point: LatLng,
    /// Effective half angle (lines are half discs)
    pub angle1: f64,
    /// Second radius if it actually shapes the sector
    pub radius2: Option<f64>,
}

pub fn preprocess(def: &LegDefinition) -> Preprocessed {
    let radius2 = match def.kind {
        LegKind::Line => None,
        LegKind::Sector => def.radius2.filter(|r| *r > 0.0),
    };
    let angle1 = match def.kind {
        LegKind::Line => LINE_HALF_ANGLE,
        LegKind::Sector => def.angle1.clamp(0.0, 180.0),
    };
    Preprocessed {
        max_radius: def.radius1.max(radius2.unwrap_or(0.0)),
        quick_circle: def.kind == LegKind::Sector && angle1 >= 180.0 && radius2.is_none(),
        point: def.point(),
        angle1,
        radius2,
    }
}

/// Signed smallest difference `to - from` in (-180, 180]
fn angle_difference(from: f64, to: f64) -> f64 {
    let diff = normalize_bearing(to - from);
    if diff > 180.0 { diff - 360.0 } else { diff }
}

/// Sector bisector for leg `index` per its direction rule. The second value
/// is true when the rule could not be resolved and 0 was used.
pub fn bisector(defs: &[LegDefinition], index: usize) -> (f64, bool) {
    let def = &defs[index];
    let point = def.point();
    let previous = index.checked_sub(1).and_then(|i| defs.get(i)).map(|d| d.point());
    let next = defs.get(index + 1).map(|d| d.point());

    let away_from = |other: Option<LatLng>| {
        other.map(|o| normalize_bearing(point.bearing_to(&o) + 180.0))
    };

    let resolved = match def.direction {
        Direction::Fixed => def.fixed_bearing.map(normalize_bearing),
        Direction::NextPoint => away_from(next),
        Direction::PreviousPoint => away_from(previous),
        Direction::Symmetrical => match (previous, next) {
            (Some(p), Some(n)) => {
                let inbound = point.bearing_to(&p);
                let outbound = point.bearing_to(&n);
                let inner = inbound + angle_difference(inbound, outbound) / 2.0;
                Some(normalize_bearing(inner + 180.0))
            }
            // start and finish have only one neighbour
            (None, Some(_)) => away_from(next),
            (Some(_), None) => away_from(previous),
            (None, None) => None,
        },
    };

    match resolved {
        Some(bearing) => (bearing, false),
        None => (0.0, true),
    }
}

/// Walk an arc from `from` to `to` degrees (either direction) at `radius`
fn arc(center: LatLng, radius: f64, from: f64, to: f64, out: &mut Vec<LatLng>) {
    let span = to - from;
    let steps = (span.abs() / ARC_STEP_DEG).ceil().max(1.0) as usize;
    for step in 0..=steps {
        let angle = from + span * step as f64 / steps as f64;
        out.push(center.destination(normalize_bearing(angle), radius).rounded());
    }
}

/// Build the outline for leg `index`.
///
/// Shapes:
/// * quick circle: full 360° arc
/// * single radius: center, arc over ±angle1, center
/// * shared angle (`angle2 == angle1`): annular wedge between radius2 and radius1
/// * keyhole (`angle2 >= 180`): ±angle1 wedge at radius1, the rest of the circle at radius2
/// * generic wedge: the narrower angle at its radius with the wider angle's radius on the flanks
pub fn build_boundary(defs: &[LegDefinition], index: usize) -> SectorGeometry {
    let def = &defs[index];
    let shape = preprocess(def);
    let (bisector, direction_unresolved) = if shape.quick_circle {
        (0.0, false)
    } else {
        bisector(defs, index)
    };

    let center = shape.point;
    let r1 = def.radius1;
    let a1 = shape.angle1;
    let mut ring = Vec::new();

    match (shape.radius2, def.angle2) {
        _ if shape.quick_circle => {
            arc(center, r1, 0.0, 360.0, &mut ring);
        }
        (None, _) | (Some(_), None) if a1 >= 180.0 => {
            arc(center, r1, 0.0, 360.0, &mut ring);
        }
        (None, _) | (Some(_), None) => {
            ring.push(center.rounded());
            arc(center, r1, bisector - a1, bisector + a1, &mut ring);
            ring.push(center.rounded());
        }
        (Some(r2), Some(a2)) if (a2 - a1).abs() < 1e-9 => {
            arc(center, r1, bisector - a1, bisector + a1, &mut ring);
            arc(center, r2, bisector + a1, bisector - a1, &mut ring);
            ring.push(ring[0]);
        }
        (Some(r2), Some(a2)) if a2 >= 180.0 => {
            arc(center, r1, bisector - a1, bisector + a1, &mut ring);
            arc(center, r2, bisector + a1, bisector + 360.0 - a1, &mut ring);
            ring.push(ring[0]);
        }
        (Some(r2), Some(a2)) => {
            let (inner_angle, inner_radius, outer_angle, outer_radius) = if a1 <= a2 {
                (a1, r1, a2, r2)
            } else {
                (a2, r2, a1, r1)
            };
            ring.push(center.rounded());
            arc(center, outer_radius, bisector - outer_angle, bisector - inner_angle, &mut ring);
            arc(center, inner_radius, bisector - inner_angle, bisector + inner_angle, &mut ring);
            arc(center, outer_radius, bisector + inner_angle, bisector + outer_angle, &mut ring);
            ring.push(center.rounded());
        }
    }

    SectorGeometry {
        bisector,
        max_radius: shape.max_radius,
        quick_circle: shape.quick_circle,
        direction_unresolved,
        polygon: polygon_from_ring(&ring),
        boundary: ring,
    }
}

/// Test a point against a leg's sector and penalty volume
pub fn containment(leg: &Leg, point: LatLng) -> SectorCheck {
    let geometry = &leg.geometry;
    let from_center = haversine_km(leg.point, point);

    let (in_sector, distance) = if geometry.quick_circle {
        let inside = from_center <= leg.radius1 + BOUNDARY_TOLERANCE_KM;
        (inside, if inside { 0.0 } else { from_center - leg.radius1 })
    } else {
        let inside = from_center <= geometry.max_radius + BOUNDARY_TOLERANCE_KM
            && polygon_contains(&geometry.polygon, point);
        let distance = if inside {
            0.0
        } else {
            nearest_on_boundary(&geometry.polygon, point)
                .map(|nearest| haversine_km(nearest, point))
                .unwrap_or_else(|| (from_center - geometry.max_radius).max(0.0))
        };
        (inside, distance)
    };

    SectorCheck {
        in_sector,
        in_penalty: !in_sector && distance <= PENALTY_ALLOWANCE_KM,
        distance,
    }
}

/// Nearest point of the sector to `point` (the point itself when inside)
pub fn nearest_point(leg: &Leg, point: LatLng) -> LatLng {
    let geometry = &leg.geometry;
    if geometry.quick_circle {
        let from_center = haversine_km(leg.point, point);
        if from_center <= leg.radius1 {
            return point;
        }
        return leg
            .point
            .destination(leg.point.bearing_to(&point), leg.radius1);
    }
    if polygon_contains(&geometry.polygon, point) {
        return point;
    }
    nearest_on_boundary(&geometry.polygon, point).unwrap_or(leg.point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskDefinition, TaskRules};

    fn def(name: &str, point: LatLng, kind: LegKind, radius1: f64) -> LegDefinition {
        LegDefinition {
            name: name.to_string(),
            lat: point.lat,
            lng: point.lng,
            kind,
            radius1,
            radius2: None,
            angle1: 180.0,
            angle2: None,
            direction: Direction::Symmetrical,
            fixed_bearing: None,
            length: None,
        }
    }

    fn prepare(legs: Vec<LegDefinition>) -> Task {
        Task::prepare(&TaskDefinition {
            rules: TaskRules::default(),
            home: None,
            legs,
        })
        .unwrap()
    }

    #[test]
    fn test_quick_circle_boundary() {
        let center = LatLng::new(52.0, 0.0);
        let task = prepare(vec![
            def("S", LatLng::new(51.5, 0.0), LegKind::Line, 5.0),
            def("TP", center, LegKind::Sector, 10.0),
            def("F", LatLng::new(51.5, 0.1), LegKind::Line, 1.0),
        ]);
        let leg = &task.legs[1];
        assert!(leg.geometry.quick_circle);

        let on_edge = center.destination(77.0, 10.0);
        let check = containment(leg, on_edge);
        assert!(check.in_sector);
        assert_eq!(check.distance, 0.0);

        let penalty = center.destination(77.0, 10.3);
        let check = containment(leg, penalty);
        assert!(!check.in_sector);
        assert!(check.in_penalty);
        assert!((check.distance - 0.3).abs() < 1e-6);

        let outside = center.destination(77.0, 10.6);
        let check = containment(leg, outside);
        assert!(!check.in_sector);
        assert!(!check.in_penalty);
        assert!((check.distance - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_start_line_is_half_disc_facing_away_from_course() {
        let start = LatLng::new(50.0, 8.0);
        let mut start_def = def("S", start, LegKind::Line, 5.0);
        start_def.direction = Direction::NextPoint;
        let task = prepare(vec![
            start_def,
            def("TP", LatLng::new(50.5, 8.0), LegKind::Sector, 0.5),
            def("F", LatLng::new(50.0, 8.1), LegKind::Line, 1.0),
        ]);
        let leg = &task.legs[0];
        assert!((leg.geometry.bisector - 180.0).abs() < 0.5);
        assert!(!leg.geometry.quick_circle);

        // behind the line (south) is inside, in front (north) is outside
        assert!(containment(leg, start.destination(180.0, 1.0)).in_sector);
        let ahead = containment(leg, start.destination(0.0, 1.0));
        assert!(!ahead.in_sector);
        assert!((ahead.distance - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_symmetrical_bisector_points_outside_corner() {
        let defs = vec![
            def("A", LatLng::new(50.0, 8.0), LegKind::Line, 1.0),
            def("B", LatLng::new(50.5, 8.0), LegKind::Sector, 1.0),
            def("C", LatLng::new(50.5, 8.8), LegKind::Line, 1.0),
        ];
        // inbound from the south, outbound to the east: sector faces north west
        let (bearing, unresolved) = bisector(&defs, 1);
        assert!(!unresolved);
        assert!((bearing - 315.0).abs() < 2.0, "got {bearing}");
    }

    #[test]
    fn test_unresolved_direction_degrades_to_zero() {
        let mut fixed = def("B", LatLng::new(50.5, 8.0), LegKind::Sector, 1.0);
        fixed.direction = Direction::Fixed;
        fixed.angle1 = 45.0;
        let task = prepare(vec![
            def("A", LatLng::new(50.0, 8.0), LegKind::Line, 1.0),
            fixed,
            def("C", LatLng::new(50.5, 8.8), LegKind::Line, 1.0),
        ]);
        assert!(task.legs[1].geometry.direction_unresolved);
        assert_eq!(task.legs[1].geometry.bisector, 0.0);
        assert_eq!(task.degraded_legs(), vec![1]);
    }

    #[test]
    fn test_keyhole_contains_both_parts() {
        let center = LatLng::new(50.5, 8.0);
        let mut keyhole = def("B", center, LegKind::Sector, 10.0);
        keyhole.angle1 = 45.0;
        keyhole.radius2 = Some(0.5);
        keyhole.angle2 = Some(180.0);
        keyhole.direction = Direction::Fixed;
        keyhole.fixed_bearing = Some(0.0);
        let task = prepare(vec![
            def("A", LatLng::new(50.0, 8.0), LegKind::Line, 1.0),
            keyhole,
            def("C", LatLng::new(50.5, 8.8), LegKind::Line, 1.0),
        ]);
        let leg = &task.legs[1];
        assert!(!leg.geometry.quick_circle);
        assert_eq!(leg.geometry.max_radius, 10.0);

        // far out along the wedge
        assert!(containment(leg, center.destination(0.0, 8.0)).in_sector);
        // inside the small cylinder behind the wedge
        assert!(containment(leg, center.destination(180.0, 0.3)).in_sector);
        // behind, outside the cylinder
        assert!(!containment(leg, center.destination(180.0, 2.0)).in_sector);
    }

    #[test]
    fn test_annular_wedge_excludes_inner_part() {
        let center = LatLng::new(50.5, 8.0);
        let mut annular = def("B", center, LegKind::Sector, 10.0);
        annular.angle1 = 45.0;
        annular.radius2 = Some(3.0);
        annular.angle2 = Some(45.0);
        annular.direction = Direction::Fixed;
        annular.fixed_bearing = Some(90.0);
        let task = prepare(vec![
            def("A", LatLng::new(50.0, 8.0), LegKind::Line, 1.0),
            annular,
            def("C", LatLng::new(50.5, 8.8), LegKind::Line, 1.0),
        ]);
        let leg = &task.legs[1];
        assert!(containment(leg, center.destination(90.0, 6.0)).in_sector);
        assert!(!containment(leg, center.destination(90.0, 1.0)).in_sector);
    }

    #[test]
    fn test_nearest_point_on_circle() {
        let center = LatLng::new(52.0, 0.0);
        let task = prepare(vec![
            def("S", LatLng::new(51.5, 0.0), LegKind::Line, 5.0),
            def("TP", center, LegKind::Sector, 10.0),
            def("F", LatLng::new(51.5, 0.1), LegKind::Line, 1.0),
        ]);
        let outside = center.destination(200.0, 25.0);
        let nearest = nearest_point(&task.legs[1], outside);
        assert!((center.distance_to(&nearest) - 10.0).abs() < 1e-6);
        assert!((nearest.distance_to(&outside) - 15.0).abs() < 1e-3);
    }

    #[test]
    fn test_boundary_is_rounded() {
        let defs = vec![
            def("A", LatLng::new(50.0, 8.0), LegKind::Line, 1.0),
            def("B", LatLng::new(50.5, 8.0), LegKind::Sector, 1.234),
        ];
        let geometry = build_boundary(&defs, 1);
        for p in &geometry.boundary {
            assert!(((p.lat * 1e5) - (p.lat * 1e5).round()).abs() < 1e-6);
        }
        assert_eq!(geometry.boundary.first(), geometry.boundary.last());
    }
}
