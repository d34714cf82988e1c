use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::coords::CoordinateTransform;
use crate::markers::{floor_from_room, MarkerRegistry};

/// A marker placed in the local frame.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerPoint {
    pub room: String,
    pub floor: Option<i32>,
    /// Local (x, y) in meters
    pub position: [f64; 2],
}

impl RTreeObject for MarkerPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for MarkerPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

/// R-Tree over marker positions for "which marker is closest" queries.
///
/// Positions are local coordinates, so the tree must be rebuilt when the
/// session origin moves.
pub struct MarkerTree {
    tree: RTree<MarkerPoint>,
}

impl MarkerTree {
    pub fn new() -> Self {
        MarkerTree { tree: RTree::new() }
    }

    pub fn from_points(points: Vec<MarkerPoint>) -> Self {
        MarkerTree { tree: RTree::bulk_load(points) }
    }

    /// Project every registry entry through `transform` and index it.
    pub fn from_registry(registry: &MarkerRegistry, transform: &CoordinateTransform) -> Self {
        let points = registry
            .iter()
            .map(|(room, (lon, lat))| {
                let (x, y) = transform.to_local(lon, lat);
                MarkerPoint { room: room.to_string(), floor: floor_from_room(room), position: [x, y] }
            })
            .collect();
        Self::from_points(points)
    }

    pub fn insert(&mut self, point: MarkerPoint) {
        self.tree.insert(point);
    }

    /// Closest marker and its distance in meters.
    pub fn nearest(&self, x: f64, y: f64) -> Option<(&MarkerPoint, f64)> {
        let query = [x, y];
        self.tree
            .nearest_neighbor(&query)
            .map(|p| (p, p.distance_2(&query).sqrt()))
    }

    /// Closest marker on `floor`; markers without a floor never match.
    pub fn nearest_on_floor(&self, x: f64, y: f64, floor: i32) -> Option<(&MarkerPoint, f64)> {
        let query = [x, y];
        self.tree
            .nearest_neighbor_iter(&query)
            .find(|p| p.floor == Some(floor))
            .map(|p| (p, p.distance_2(&query).sqrt()))
    }

    /// Markers within `radius_m`, nearest first.
    pub fn within_radius(&self, x: f64, y: f64, radius_m: f64) -> Vec<&MarkerPoint> {
        let query = [x, y];
        let mut hits: Vec<(&MarkerPoint, f64)> = self
            .tree
            .locate_within_distance(query, radius_m * radius_m)
            .map(|p| (p, p.distance_2(&query)))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.into_iter().map(|(p, _)| p).collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl Default for MarkerTree {
    fn default() -> Self {
        Self::new()
    }
}
