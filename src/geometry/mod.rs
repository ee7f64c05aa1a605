//! Geodesy helpers shared by the sector, hull and optimizer code
//!
//! Distances are in kilometres and bearings in degrees (0 = north, clockwise)
//! throughout the scoring pipeline.

pub mod hull;

use geo::{Closest, ClosestPoint, Coord, Intersects, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};

/// Mean earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Output coordinates are rounded to this precision (degrees)
const COORD_PRECISION: f64 = 1e-5;

/// WGS84 ellipsoid for vincenty
const WGS84_A: f64 = 6_378_137.0;
const WGS84_B: f64 = 6_356_752.314_245;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// A geographic position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great circle distance in km
    pub fn distance_to(&self, other: &LatLng) -> f64 {
        haversine_km(*self, *other)
    }

    /// Initial bearing towards `other` in degrees
    pub fn bearing_to(&self, other: &LatLng) -> f64 {
        bearing_deg(*self, *other)
    }

    /// Point reached by travelling `distance_km` on `bearing`
    pub fn destination(&self, bearing: f64, distance_km: f64) -> LatLng {
        destination(*self, bearing, distance_km)
    }

    /// Round both coordinates to 1e-5 degrees
    pub fn rounded(&self) -> LatLng {
        LatLng {
            lat: round_coord(self.lat),
            lng: round_coord(self.lng),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    pub(crate) fn to_point(self) -> Point<f64> {
        Point::new(self.lng, self.lat)
    }

    pub(crate) fn to_coord(self) -> Coord<f64> {
        Coord {
            x: self.lng,
            y: self.lat,
        }
    }
}

/// Haversine distance between two points in km
pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Initial great circle bearing from `a` to `b`, normalised to [0, 360)
pub fn bearing_deg(a: LatLng, b: LatLng) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let y = delta_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lng.cos();

    normalize_bearing(y.atan2(x).to_degrees())
}

/// Destination point given a start, bearing and distance (spherical model)
pub fn destination(origin: LatLng, bearing: f64, distance_km: f64) -> LatLng {
    let angular = distance_km / EARTH_RADIUS_KM;
    let theta = bearing.to_radians();
    let lat1 = origin.lat.to_radians();
    let lng1 = origin.lng.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * theta.cos()).asin();
    let lng2 = lng1
        + (theta.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());

    LatLng {
        lat: lat2.to_degrees(),
        lng: normalize_longitude(lng2.to_degrees()),
    }
}

/// Vincenty inverse distance on the WGS84 ellipsoid in km.
///
/// Falls back to haversine for nearly antipodal points where the iteration
/// does not converge.
pub fn vincenty_km(a: LatLng, b: LatLng) -> f64 {
    let l = (b.lng - a.lng).to_radians();
    let u1 = ((1.0 - WGS84_F) * a.lat.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * b.lat.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..200 {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return 0.0;
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // equatorial line: cos_sq_alpha = 0
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - lambda_prev).abs() < 1e-12 {
            let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return WGS84_B * big_a * (sigma - delta_sigma) / 1000.0;
        }
    }

    haversine_km(a, b)
}

pub fn normalize_bearing(bearing: f64) -> f64 {
    bearing.rem_euclid(360.0)
}

fn normalize_longitude(lng: f64) -> f64 {
    (lng + 540.0).rem_euclid(360.0) - 180.0
}

/// Round a coordinate to 1e-5 degrees
pub fn round_coord(value: f64) -> f64 {
    (value / COORD_PRECISION).round() * COORD_PRECISION
}

/// Round a distance or speed to one decimal place
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Build a closed polygon from a ring of positions
pub(crate) fn polygon_from_ring(ring: &[LatLng]) -> Polygon<f64> {
    let coords: Vec<Coord<f64>> = ring.iter().map(|p| p.to_coord()).collect();
    Polygon::new(LineString::from(coords), vec![])
}

/// Point-in-polygon test. Boundary points count as inside.
pub(crate) fn polygon_contains(polygon: &Polygon<f64>, point: LatLng) -> bool {
    polygon.intersects(&point.to_point())
}

/// Nearest point on the polygon's outline to `point`. The search runs in
/// a local equirectangular projection around `point` so that east-west
/// offsets are weighted like north-south ones at any latitude.
pub(crate) fn nearest_on_boundary(polygon: &Polygon<f64>, point: LatLng) -> Option<LatLng> {
    let scale = point.lat.to_radians().cos().max(1e-6);
    let local: Vec<Coord<f64>> = polygon
        .exterior()
        .coords()
        .map(|c| Coord {
            x: (c.x - point.lng) * scale,
            y: c.y - point.lat,
        })
        .collect();
    match LineString::from(local).closest_point(&Point::new(0.0, 0.0)) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => Some(LatLng {
            lat: point.lat + p.y(),
            lng: point.lng + p.x() / scale,
        }),
        Closest::Indeterminate => None,
    }
}
