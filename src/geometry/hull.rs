//! Monotone chain convex hull over achieved-area points
//!
//! Points are ordered by (lat, lng). Collinear boundary points and duplicate
//! coordinates are dropped, which keeps `hull(hull(P) ∪ Q) == hull(P ∪ Q)`:
//! the assigned area optimizer only ever re-hulls its previous output plus
//! the points that arrived since.

use super::LatLng;
use std::cmp::Ordering;

/// Anything with a position can be hulled
pub trait Located {
    fn location(&self) -> LatLng;
}

impl Located for LatLng {
    fn location(&self) -> LatLng {
        *self
    }
}

fn compare(a: &LatLng, b: &LatLng) -> Ordering {
    a.lat.total_cmp(&b.lat).then_with(|| a.lng.total_cmp(&b.lng))
}

/// z component of (b - o) x (c - o) with lat as x and lng as y
fn cross(o: &LatLng, b: &LatLng, c: &LatLng) -> f64 {
    (b.lat - o.lat) * (c.lng - o.lng) - (b.lng - o.lng) * (c.lat - o.lat)
}

/// Convex hull of `points`, returned counter-clockwise starting from the
/// lowest (lat, lng) point. When several points share a coordinate the first
/// one in input order is kept.
pub fn convex_hull<P: Located + Clone>(points: &[P]) -> Vec<P> {
    let mut sorted: Vec<(LatLng, &P)> = points.iter().map(|p| (p.location(), p)).collect();
    // stable, so the first of a duplicate run survives dedup
    sorted.sort_by(|a, b| compare(&a.0, &b.0));
    sorted.dedup_by(|later, earlier| compare(&later.0, &earlier.0) == Ordering::Equal);

    if sorted.len() < 3 {
        return sorted.into_iter().map(|(_, p)| p.clone()).collect();
    }

    let mut lower: Vec<(LatLng, &P)> = Vec::with_capacity(sorted.len());
    for entry in &sorted {
        while lower.len() >= 2
            && cross(&lower[lower.len() - 2].0, &lower[lower.len() - 1].0, &entry.0) <= 0.0
        {
            lower.pop();
        }
        lower.push(*entry);
    }

    let mut upper: Vec<(LatLng, &P)> = Vec::with_capacity(sorted.len());
    for entry in sorted.iter().rev() {
        while upper.len() >= 2
            && cross(&upper[upper.len() - 2].0, &upper[upper.len() - 1].0, &entry.0) <= 0.0
        {
            upper.pop();
        }
        upper.push(*entry);
    }

    // last point of each chain is the first of the other
    lower.pop();
    upper.pop();
    lower.extend(upper);

    if lower.len() < 2 {
        // everything collinear and identical ends, fall back to extremes
        return vec![sorted[0].1.clone(), sorted[sorted.len() - 1].1.clone()];
    }

    lower.into_iter().map(|(_, p)| p.clone()).collect()
}
