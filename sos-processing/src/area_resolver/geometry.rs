//! Planar geometry on lon/lat degrees
//!
//! Area polygons are small enough (counties and below, plus the economic
//! zone) that treating degrees as planar coordinates is accurate for
//! containment tests.

use rstar::AABB;

use sos_common::models::{Point, Polygon};

/// R-tree key of a point
pub fn point_key(point: Point) -> [f64; 2] {
    [point.longitude, point.latitude]
}

/// Envelope around the given vertices, `None` for an empty ring
pub fn envelope_around<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<AABB<[f64; 2]>> {
    let keys: Vec<[f64; 2]> = points.into_iter().map(|point| point_key(*point)).collect();
    if keys.is_empty() {
        return None;
    }
    Some(AABB::from_points(keys.iter()))
}

/// Even-odd ray cast against one ring
///
/// The closing edge is implied, so rings may or may not repeat the
/// first vertex.
pub fn ring_contains(ring: &[Point], point: Point) -> bool {
    if ring.len() < 3 {
        return false;
    }

    let (x, y) = (point.longitude, point.latitude);
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = (ring[i].longitude, ring[i].latitude);
        let (xj, yj) = (ring[j].longitude, ring[j].latitude);
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Inside the exterior ring and outside every hole
pub fn polygon_contains(polygon: &Polygon, point: Point) -> bool {
    ring_contains(&polygon.exterior, point)
        && !polygon.holes.iter().any(|hole| ring_contains(hole, point))
}
