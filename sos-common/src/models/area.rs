//! Administrative and ecological areas

use serde::{Deserialize, Serialize};

/// Area classification used for resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AreaType {
    County,
    Municipality,
    Parish,
    Province,
    /// Sweden's exclusive economic zone, resolved to a flag rather than a reference
    EconomicZoneOfSweden,
    Other,
}

impl AreaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AreaType::County => "County",
            AreaType::Municipality => "Municipality",
            AreaType::Parish => "Parish",
            AreaType::Province => "Province",
            AreaType::EconomicZoneOfSweden => "EconomicZoneOfSweden",
            AreaType::Other => "Other",
        }
    }
}

impl std::fmt::Display for AreaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AreaType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "County" => Ok(AreaType::County),
            "Municipality" => Ok(AreaType::Municipality),
            "Parish" => Ok(AreaType::Parish),
            "Province" => Ok(AreaType::Province),
            "EconomicZoneOfSweden" => Ok(AreaType::EconomicZoneOfSweden),
            "Other" => Ok(AreaType::Other),
            other => Err(crate::Error::InvalidInput(format!("unknown area type: {}", other))),
        }
    }
}

/// WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub longitude: f64,
    pub latitude: f64,
}

impl Point {
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }
}

/// Polygon with one exterior ring and optional holes
///
/// Rings are lists of vertices; closing the ring (repeating the first
/// vertex) is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Point>,
    #[serde(default)]
    pub holes: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Point>) -> Self {
        Self {
            exterior,
            holes: Vec::new(),
        }
    }
}

/// Area geometry in WGS84
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
}

impl Geometry {
    /// Polygons making up the geometry
    pub fn polygons(&self) -> &[Polygon] {
        match self {
            Geometry::Polygon(polygon) => std::slice::from_ref(polygon),
            Geometry::MultiPolygon(polygons) => polygons,
        }
    }
}

/// Named area polygon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub id: i32,
    pub area_type: AreaType,
    /// Feature id within the area type, e.g. the county code "01"
    pub feature_id: String,
    pub name: String,
    pub geometry: Geometry,
}

impl Area {
    pub fn to_ref(&self) -> AreaRef {
        AreaRef {
            feature_id: self.feature_id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Area reference embedded in processed observations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AreaRef {
    pub feature_id: String,
    pub name: String,
}
