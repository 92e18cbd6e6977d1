//! Registry of compiled zones & the queries agents run against them.
use bevy::{platform::collections::HashMap, prelude::Vec3};
use parry3d::{math::Point, shape::Triangle};
use rand::{seq::SliceRandom, Rng};

use crate::{
    point_in_polygon_xz,
    query::{
        find_polygon_path, perform_string_pulling_on_path, FindPolygonPathError,
        StringPullingError,
    },
    zone::{GroupId, Polygon, Zone},
};

/// Vertical slack used by [ZoneIndex::default].
pub const DEFAULT_HEIGHT_TOLERANCE: f32 = 2.0;
/// Groups further than this from a position are never resolved for it.
const GROUP_SEARCH_RADIUS: f32 = 50.0;
/// Max distance from a polygon's plane for a position to count as on it.
const PLANE_DISTANCE_EPSILON: f32 = 0.01;

/// Asked for a zone or group that was never registered.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneLookupError {
    UnknownZone(String),
    UnknownGroup { zone: String, group: GroupId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FindPathError {
    Lookup(ZoneLookupError),
    /// The start or end position isn't inside any polygon of the group.
    NoValidStartOrEndPolygon,
    PolygonPath(FindPolygonPathError),
    StringPulling(StringPullingError),
}

impl FindPathError {
    /// True when the zone & group exist but no route could be found. Lookup errors are setup bugs.
    pub fn is_not_found(&self) -> bool {
        !matches!(self, FindPathError::Lookup(_))
    }
}

impl From<ZoneLookupError> for FindPathError {
    fn from(error: ZoneLookupError) -> Self {
        FindPathError::Lookup(error)
    }
}

impl From<FindPolygonPathError> for FindPathError {
    fn from(error: FindPolygonPathError) -> Self {
        FindPathError::PolygonPath(error)
    }
}

impl From<StringPullingError> for FindPathError {
    fn from(error: StringPullingError) -> Self {
        FindPathError::StringPulling(error)
    }
}

/// Compiled zones by name.
///
/// Queries only read zones, so any number can run at once behind a read lock. Registering & removing zones needs the write lock.
#[derive(Debug)]
pub struct ZoneIndex {
    zones: HashMap<String, Zone>,
    /// Generation of the last write to each zone from [ZoneIndex::set_zone_with_generation] or [ZoneIndex::remove_zone_with_generation].
    zone_generations: HashMap<String, u64>,
    height_tolerance: f32,
}

impl Default for ZoneIndex {
    fn default() -> Self {
        Self::new(DEFAULT_HEIGHT_TOLERANCE)
    }
}

impl ZoneIndex {
    /// A negative ``height_tolerance`` falls back to [DEFAULT_HEIGHT_TOLERANCE].
    pub fn new(height_tolerance: f32) -> Self {
        Self {
            zones: HashMap::default(),
            zone_generations: HashMap::default(),
            height_tolerance: if height_tolerance >= 0.0 {
                height_tolerance
            } else {
                DEFAULT_HEIGHT_TOLERANCE
            },
        }
    }

    pub fn height_tolerance(&self) -> f32 {
        self.height_tolerance
    }

    /// Negative values are ignored.
    pub fn set_height_tolerance(&mut self, height_tolerance: f32) {
        if height_tolerance >= 0.0 {
            self.height_tolerance = height_tolerance;
        }
    }

    /// Registers ``zone`` under ``zone_id``, returning the zone it replaced.
    pub fn set_zone(&mut self, zone_id: impl Into<String>, zone: Zone) -> Option<Zone> {
        self.zones.insert(zone_id.into(), zone)
    }

    /// Registers ``zone`` unless a write with the same or a newer generation already happened for ``zone_id``.
    ///
    /// Returns true if the zone was registered.
    pub fn set_zone_with_generation(
        &mut self,
        zone_id: impl Into<String>,
        zone: Zone,
        generation: u64,
    ) -> bool {
        let zone_id = zone_id.into();
        if self.zone_generations.get(&zone_id).unwrap_or(&0) >= &generation {
            return false;
        }

        self.zone_generations.insert(zone_id.clone(), generation);
        self.zones.insert(zone_id, zone);

        true
    }

    pub fn remove_zone(&mut self, zone_id: &str) -> Option<Zone> {
        self.zones.remove(zone_id)
    }

    /// Removes the zone unless a write with the same or a newer generation already happened for ``zone_id``.
    pub fn remove_zone_with_generation(&mut self, zone_id: &str, generation: u64) -> bool {
        if self.zone_generations.get(zone_id).unwrap_or(&0) >= &generation {
            return false;
        }

        self.zone_generations.insert(zone_id.to_string(), generation);
        self.zones.remove(zone_id).is_some()
    }

    pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.get(zone_id)
    }

    pub fn zone_ids(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    fn lookup_zone(&self, zone_id: &str) -> Result<&Zone, ZoneLookupError> {
        self.zones
            .get(zone_id)
            .ok_or_else(|| ZoneLookupError::UnknownZone(zone_id.to_string()))
    }

    fn lookup_group(
        &self,
        zone_id: &str,
        group: GroupId,
    ) -> Result<(&Zone, &[Polygon]), ZoneLookupError> {
        let zone = self.lookup_zone(zone_id)?;
        let polygons = zone.group(group).ok_or_else(|| ZoneLookupError::UnknownGroup {
            zone: zone_id.to_string(),
            group,
        })?;

        Ok((zone, polygons))
    }

    /// Returns the polygon in ``group`` with the centroid closest to ``position``. Ties go to the polygon with the lowest id.
    ///
    /// With ``require_inside`` only polygons containing ``position`` (see [Zone::is_position_in_polygon]) are considered.
    pub fn closest_polygon(
        &self,
        zone_id: &str,
        group: GroupId,
        position: Vec3,
        require_inside: bool,
    ) -> Result<Option<&Polygon>, ZoneLookupError> {
        let (zone, polygons) = self.lookup_group(zone_id, group)?;

        Ok(closest_polygon_in_group(
            zone,
            polygons,
            position,
            require_inside,
            self.height_tolerance,
        ))
    }

    /// Returns the group ``position`` is in.
    ///
    /// With ``require_planar`` the first group with a polygon whose plane ``position`` is on (within 0.01 units) & inside of on the XZ-plane is returned.
    /// Otherwise the group of the polygon with the closest centroid is returned, as long as it's within 50 units.
    pub fn resolve_group(
        &self,
        zone_id: &str,
        position: Vec3,
        require_planar: bool,
    ) -> Result<Option<GroupId>, ZoneLookupError> {
        let zone = self.lookup_zone(zone_id)?;

        let mut closest_group = None;
        let mut closest_distance = GROUP_SEARCH_RADIUS * GROUP_SEARCH_RADIUS;

        for (group_id, polygons) in zone.groups.iter().enumerate() {
            for polygon in polygons.iter() {
                if require_planar && is_position_on_polygon_plane(zone, polygon, position) {
                    return Ok(Some(group_id));
                }

                let distance = polygon.centroid.distance_squared(position);
                if distance < closest_distance {
                    closest_group = Some(group_id);
                    closest_distance = distance;
                }
            }
        }

        Ok(closest_group)
    }

    /// Returns the centroid of a random polygon in ``group``. See [ZoneIndex::random_polygon_position_with_rng].
    pub fn random_polygon_position(
        &self,
        zone_id: &str,
        group: GroupId,
        near: Option<Vec3>,
        radius: f32,
    ) -> Result<Vec3, ZoneLookupError> {
        self.random_polygon_position_with_rng(zone_id, group, near, radius, &mut rand::thread_rng())
    }

    /// Returns the centroid of a random polygon in ``group``.
    ///
    /// When ``near`` is set & ``radius`` is positive, only polygons with their centroid within ``radius`` of ``near`` are picked from.
    /// Returns [Vec3::ZERO] if there's no polygon to pick.
    pub fn random_polygon_position_with_rng<R: Rng + ?Sized>(
        &self,
        zone_id: &str,
        group: GroupId,
        near: Option<Vec3>,
        radius: f32,
        rng: &mut R,
    ) -> Result<Vec3, ZoneLookupError> {
        let (_, polygons) = self.lookup_group(zone_id, group)?;

        let candidates: Vec<Vec3> = match near {
            Some(near) if radius > 0.0 => polygons
                .iter()
                .map(|polygon| polygon.centroid)
                .filter(|centroid| centroid.distance_squared(near) < radius * radius)
                .collect(),
            _ => polygons.iter().map(|polygon| polygon.centroid).collect(),
        };

        Ok(candidates.choose(rng).copied().unwrap_or(Vec3::ZERO))
    }

    /// Finds a path from ``start_pos`` to ``end_pos`` within ``group``.
    ///
    /// Both positions must be inside a polygon of the group. Returns the waypoints after ``start_pos``, ending with ``end_pos``.
    pub fn find_path(
        &self,
        zone_id: &str,
        group: GroupId,
        start_pos: Vec3,
        end_pos: Vec3,
    ) -> Result<Vec<Vec3>, FindPathError> {
        let (zone, polygons) = self.lookup_group(zone_id, group)?;

        let start_polygon =
            closest_polygon_in_group(zone, polygons, start_pos, true, self.height_tolerance);
        let end_polygon =
            closest_polygon_in_group(zone, polygons, end_pos, true, self.height_tolerance);

        let (Some(start_polygon), Some(end_polygon)) = (start_polygon, end_polygon) else {
            return Err(FindPathError::NoValidStartOrEndPolygon);
        };

        let path = find_polygon_path(polygons, start_polygon.id, end_polygon.id)?;

        Ok(perform_string_pulling_on_path(
            zone, polygons, start_pos, end_pos, &path,
        )?)
    }
}

fn closest_polygon_in_group<'a>(
    zone: &Zone,
    polygons: &'a [Polygon],
    position: Vec3,
    require_inside: bool,
    height_tolerance: f32,
) -> Option<&'a Polygon> {
    let mut closest = None;
    let mut closest_distance = f32::INFINITY;

    for polygon in polygons.iter() {
        let distance = polygon.centroid.distance_squared(position);

        if distance < closest_distance
            && (!require_inside || zone.is_position_in_polygon(position, polygon, height_tolerance))
        {
            closest = Some(polygon);
            closest_distance = distance;
        }
    }

    closest
}

fn is_position_on_polygon_plane(zone: &Zone, polygon: &Polygon, position: Vec3) -> bool {
    let vertices = zone.polygon_vertices(polygon);

    let triangle = Triangle::new(
        Point::from(vertices[0]),
        Point::from(vertices[1]),
        Point::from(vertices[2]),
    );
    // Degenerate triangles don't have a plane.
    let Some(normal) = triangle.normal() else {
        return false;
    };

    let distance = normal.dot(&(Point::from(position) - triangle.a)).abs();

    distance < PLANE_DISTANCE_EPSILON && point_in_polygon_xz(&vertices, position)
}
