//! Area Resolver
//!
//! Immutable snapshot of administrative area polygons, resolving a
//! coordinate to the county, municipality, parish and province containing
//! it. Built once per run and shared across workers behind an `Arc`.

pub mod geometry;

use std::collections::BTreeMap;

use rstar::{Envelope, RTree, RTreeObject, AABB};

use sos_common::models::{Area, AreaRef, AreaType, Point, Polygon};

use geometry::{envelope_around, point_key, polygon_contains};

/// Two same-type areas both containing the resolved point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaOverlap {
    pub area_type: AreaType,
    /// Area that won (lowest id)
    pub chosen_area_id: i32,
    pub other_area_id: i32,
}

/// Areas containing a point, at most one per type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedAreas {
    by_type: BTreeMap<AreaType, AreaRef>,
    overlaps: Vec<AreaOverlap>,
}

impl ResolvedAreas {
    pub fn get(&self, area_type: AreaType) -> Option<&AreaRef> {
        self.by_type.get(&area_type)
    }

    pub fn county(&self) -> Option<&AreaRef> {
        self.get(AreaType::County)
    }

    pub fn municipality(&self) -> Option<&AreaRef> {
        self.get(AreaType::Municipality)
    }

    pub fn parish(&self) -> Option<&AreaRef> {
        self.get(AreaType::Parish)
    }

    pub fn province(&self) -> Option<&AreaRef> {
        self.get(AreaType::Province)
    }

    pub fn is_in_economic_zone_of_sweden(&self) -> bool {
        self.by_type.contains_key(&AreaType::EconomicZoneOfSweden)
    }

    /// Feature id of the resolved area of a type
    pub fn feature_id(&self, area_type: AreaType) -> Option<&str> {
        self.get(area_type).map(|area| area.feature_id.as_str())
    }

    pub fn overlaps(&self) -> &[AreaOverlap] {
        &self.overlaps
    }

    /// Builder used by tests and by callers that already know the areas
    pub fn with(mut self, area_type: AreaType, area: AreaRef) -> Self {
        self.by_type.insert(area_type, area);
        self
    }
}

#[derive(Debug)]
struct IndexedPolygon {
    envelope: AABB<[f64; 2]>,
    polygon: Polygon,
}

#[derive(Debug)]
struct IndexedArea {
    id: i32,
    area_ref: AreaRef,
    envelope: AABB<[f64; 2]>,
    polygons: Vec<IndexedPolygon>,
}

impl IndexedArea {
    fn contains(&self, point: Point) -> bool {
        let key = point_key(point);
        self.polygons
            .iter()
            .any(|part| part.envelope.contains_point(&key) && polygon_contains(&part.polygon, point))
    }
}

impl RTreeObject for IndexedArea {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Immutable area index, one R-tree of area envelopes per area type
#[derive(Default)]
pub struct AreaSnapshot {
    by_type: BTreeMap<AreaType, RTree<IndexedArea>>,
    area_count: usize,
}

impl std::fmt::Debug for AreaSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AreaSnapshot")
            .field("types", &self.by_type.keys().collect::<Vec<_>>())
            .field("area_count", &self.area_count)
            .finish()
    }
}

impl AreaSnapshot {
    /// Index the areas
    ///
    /// Areas without any usable ring are skipped with a warning; they can
    /// never contain a point.
    pub fn load(areas: Vec<Area>) -> Self {
        let mut grouped: BTreeMap<AreaType, Vec<IndexedArea>> = BTreeMap::new();
        let mut area_count = 0;

        for area in areas {
            let polygons: Vec<IndexedPolygon> = area
                .geometry
                .polygons()
                .iter()
                .filter_map(|polygon| {
                    envelope_around(&polygon.exterior).map(|envelope| IndexedPolygon {
                        envelope,
                        polygon: polygon.clone(),
                    })
                })
                .collect();

            let Some(envelope) = polygons
                .iter()
                .map(|part| part.envelope)
                .reduce(|merged, next| merged.merged(&next))
            else {
                tracing::warn!(
                    area_id = area.id,
                    area_type = %area.area_type,
                    "Area has no polygon vertices, skipping"
                );
                continue;
            };

            grouped.entry(area.area_type).or_default().push(IndexedArea {
                id: area.id,
                area_ref: area.to_ref(),
                envelope,
                polygons,
            });
            area_count += 1;
        }

        let by_type: BTreeMap<AreaType, RTree<IndexedArea>> = grouped
            .into_iter()
            .map(|(area_type, areas)| (area_type, RTree::bulk_load(areas)))
            .collect();

        tracing::info!(areas = area_count, types = by_type.len(), "Area snapshot loaded");

        Self { by_type, area_count }
    }

    pub fn len(&self) -> usize {
        self.area_count
    }

    pub fn is_empty(&self) -> bool {
        self.area_count == 0
    }

    /// Resolve the areas containing `point`
    ///
    /// Per type the lowest-id containing area wins; further containing areas
    /// of the same type are reported as overlaps.
    pub fn resolve(&self, point: Point) -> ResolvedAreas {
        let mut resolved = ResolvedAreas::default();
        let at_point = AABB::from_point(point_key(point));

        for (area_type, tree) in &self.by_type {
            let mut containing: Vec<&IndexedArea> = tree
                .locate_in_envelope_intersecting(&at_point)
                .filter(|area| area.contains(point))
                .collect();
            // R-tree order is arbitrary
            containing.sort_by_key(|area| area.id);

            let Some((first, rest)) = containing.split_first() else {
                continue;
            };
            resolved.by_type.insert(*area_type, first.area_ref.clone());
            resolved
                .overlaps
                .extend(rest.iter().map(|area| AreaOverlap {
                    area_type: *area_type,
                    chosen_area_id: first.id,
                    other_area_id: area.id,
                }));
        }

        resolved
    }
}
