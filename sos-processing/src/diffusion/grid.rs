//! SWEREF99 TM grid generalization
//!
//! Coordinates are projected to SWEREF99 TM (EPSG:3006) with the
//! Gauss–Krüger series on the GRS80 ellipsoid, snapped to the centre of a
//! square grid cell, and projected back to WGS84. Every point in the same
//! cell generalizes to the same coordinate.
//!
//! The series is only used near the central meridian. Points elsewhere are
//! snapped on a latitude/longitude grid of about the same cell size.

use sos_common::models::Point;

const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_222_101;
const CENTRAL_MERIDIAN_DEG: f64 = 15.0;
const SCALE: f64 = 0.9996;
const FALSE_NORTHING: f64 = 0.0;
const FALSE_EASTING: f64 = 500_000.0;

/// Longitude offset from the central meridian covered by the projection
const MAX_MERIDIAN_OFFSET_DEG: f64 = 20.0;
const MAX_ABS_LATITUDE_DEG: f64 = 84.0;
const METERS_PER_DEGREE_LATITUDE: f64 = 111_320.0;

/// Planar SWEREF99 TM position in metres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub northing: f64,
    pub easting: f64,
}

struct Ellipsoid {
    e2: f64,
    n: f64,
    a_roof: f64,
}

impl Ellipsoid {
    fn grs80() -> Self {
        let e2 = FLATTENING * (2.0 - FLATTENING);
        let n = FLATTENING / (2.0 - FLATTENING);
        let a_roof =
            SEMI_MAJOR_AXIS / (1.0 + n) * (1.0 + n.powi(2) / 4.0 + n.powi(4) / 64.0);
        Self { e2, n, a_roof }
    }
}

/// WGS84 (treated as identical to SWEREF99 geodetic) to grid
pub fn to_grid(point: Point) -> GridPoint {
    let Ellipsoid { e2, n, a_roof } = Ellipsoid::grs80();

    let a = e2;
    let b = (5.0 * e2.powi(2) - e2.powi(3)) / 6.0;
    let c = (104.0 * e2.powi(3) - 45.0 * e2.powi(4)) / 120.0;
    let d = 1237.0 * e2.powi(4) / 1260.0;

    let beta = [
        n / 2.0 - 2.0 * n.powi(2) / 3.0 + 5.0 * n.powi(3) / 16.0 + 41.0 * n.powi(4) / 180.0,
        13.0 * n.powi(2) / 48.0 - 3.0 * n.powi(3) / 5.0 + 557.0 * n.powi(4) / 1440.0,
        61.0 * n.powi(3) / 240.0 - 103.0 * n.powi(4) / 140.0,
        49561.0 * n.powi(4) / 161_280.0,
    ];

    let phi = point.latitude.to_radians();
    let delta_lambda = (point.longitude - CENTRAL_MERIDIAN_DEG).to_radians();

    let sin_phi = phi.sin();
    let phi_star = phi
        - sin_phi
            * phi.cos()
            * (a + b * sin_phi.powi(2) + c * sin_phi.powi(4) + d * sin_phi.powi(6));

    let xi_prim = (phi_star.tan() / delta_lambda.cos()).atan();
    let eta_prim = (phi_star.cos() * delta_lambda.sin()).atanh();

    let mut xi_sum = xi_prim;
    let mut eta_sum = eta_prim;
    for (i, beta_i) in beta.iter().enumerate() {
        let k = 2.0 * (i as f64 + 1.0);
        xi_sum += beta_i * (k * xi_prim).sin() * (k * eta_prim).cosh();
        eta_sum += beta_i * (k * xi_prim).cos() * (k * eta_prim).sinh();
    }

    GridPoint {
        northing: SCALE * a_roof * xi_sum + FALSE_NORTHING,
        easting: SCALE * a_roof * eta_sum + FALSE_EASTING,
    }
}

/// Grid to WGS84
pub fn from_grid(grid: GridPoint) -> Point {
    let Ellipsoid { e2, n, a_roof } = Ellipsoid::grs80();

    let delta = [
        n / 2.0 - 2.0 * n.powi(2) / 3.0 + 37.0 * n.powi(3) / 96.0 - n.powi(4) / 360.0,
        n.powi(2) / 48.0 + n.powi(3) / 15.0 - 437.0 * n.powi(4) / 1440.0,
        17.0 * n.powi(3) / 480.0 - 37.0 * n.powi(4) / 840.0,
        4397.0 * n.powi(4) / 161_280.0,
    ];

    let a_star = e2 + e2.powi(2) + e2.powi(3) + e2.powi(4);
    let b_star = -(7.0 * e2.powi(2) + 17.0 * e2.powi(3) + 30.0 * e2.powi(4)) / 6.0;
    let c_star = (224.0 * e2.powi(3) + 889.0 * e2.powi(4)) / 120.0;
    let d_star = -(4279.0 * e2.powi(4)) / 1260.0;

    let xi = (grid.northing - FALSE_NORTHING) / (SCALE * a_roof);
    let eta = (grid.easting - FALSE_EASTING) / (SCALE * a_roof);

    let mut xi_prim = xi;
    let mut eta_prim = eta;
    for (i, delta_i) in delta.iter().enumerate() {
        let k = 2.0 * (i as f64 + 1.0);
        xi_prim -= delta_i * (k * xi).sin() * (k * eta).cosh();
        eta_prim -= delta_i * (k * xi).cos() * (k * eta).sinh();
    }

    let phi_star = (xi_prim.sin() / eta_prim.cosh()).asin();
    let delta_lambda = (eta_prim.sinh() / xi_prim.cos()).atan();

    let sin_phi_star = phi_star.sin();
    let phi = phi_star
        + sin_phi_star
            * phi_star.cos()
            * (a_star
                + b_star * sin_phi_star.powi(2)
                + c_star * sin_phi_star.powi(4)
                + d_star * sin_phi_star.powi(6));

    Point::new(
        CENTRAL_MERIDIAN_DEG + delta_lambda.to_degrees(),
        phi.to_degrees(),
    )
}

/// True if the SWEREF99 TM series is accurate at `point`
pub fn in_projection_domain(point: Point) -> bool {
    (point.longitude - CENTRAL_MERIDIAN_DEG).abs() <= MAX_MERIDIAN_OFFSET_DEG
        && point.latitude.abs() <= MAX_ABS_LATITUDE_DEG
}

fn cell_centre(value: f64, size: f64) -> f64 {
    (value / size).floor() * size + size / 2.0
}

/// Centre of the `cell_size_meters` grid cell containing `grid`
pub fn snap_to_cell(grid: GridPoint, cell_size_meters: u32) -> GridPoint {
    let size = f64::from(cell_size_meters);
    GridPoint {
        northing: cell_centre(grid.northing, size),
        easting: cell_centre(grid.easting, size),
    }
}

/// Centre of the latitude/longitude cell of roughly `cell_size_meters`
///
/// Longitude cells widen with latitude so they keep about the same ground
/// size. They are sized at the latitude of the cell centre, so every point
/// of a latitude band shares the same longitude cells.
pub fn snap_to_degree_cell(point: Point, cell_size_meters: u32) -> Point {
    let size = f64::from(cell_size_meters);

    let latitude_step = (size / METERS_PER_DEGREE_LATITUDE).min(180.0);
    let latitude = (cell_centre(point.latitude + 90.0, latitude_step) - 90.0).clamp(-90.0, 90.0);

    let meters_per_degree_longitude =
        (METERS_PER_DEGREE_LATITUDE * latitude.to_radians().cos()).max(1.0);
    let longitude_step = (size / meters_per_degree_longitude).min(360.0);
    let longitude =
        (cell_centre(point.longitude + 180.0, longitude_step) - 180.0).clamp(-180.0, 180.0);

    Point::new(longitude, latitude)
}

fn is_valid(point: Point) -> bool {
    point.longitude.is_finite()
        && point.latitude.is_finite()
        && (-180.0..=180.0).contains(&point.longitude)
        && (-90.0..=90.0).contains(&point.latitude)
}

/// Generalize a WGS84 point to the centre of its grid cell
///
/// `None` for a zero cell size or when no valid coordinate comes out.
pub fn generalize(point: Point, cell_size_meters: u32) -> Option<Point> {
    if cell_size_meters == 0 || !is_valid(point) {
        return None;
    }

    let generalized = if in_projection_domain(point) {
        from_grid(snap_to_cell(to_grid(point), cell_size_meters))
    } else {
        snap_to_degree_cell(point, cell_size_meters)
    };

    is_valid(generalized).then_some(generalized)
}
