//! Compiled zone data: vertices, polygons and their connected groups.
use bevy::prelude::Vec3;
use smallvec::SmallVec;

use crate::{point_in_polygon_xz, VERTICES_IN_TRIANGLE};

/// Index of a group inside a [`Zone`].
pub type GroupId = usize;

/// Vertex ids shared between a polygon and one of its neighbours.
///
/// Normally two ids. Three when two polygons are exact duplicates, fewer than two when the
/// topology was malformed. Anything with fewer than two distinct ids is not a usable link.
pub type Portal = SmallVec<[u32; VERTICES_IN_TRIANGLE]>;

#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    /// Local id of this polygon within its group.
    pub id: usize,
    pub vertex_ids: [u32; VERTICES_IN_TRIANGLE],
    /// Mean of the three vertices, rounded to [`crate::VERTEX_DECIMALS`] decimals.
    pub centroid: Vec3,
    /// Local ids of adjacent polygons in the same group.
    pub neighbours: SmallVec<[usize; VERTICES_IN_TRIANGLE]>,
    /// `portals[i]` is the edge shared with `neighbours[i]`.
    pub portals: SmallVec<[Portal; VERTICES_IN_TRIANGLE]>,
}

impl Polygon {
    /// Returns the portal leading to the polygon with local id `neighbour`, if they are linked.
    pub fn portal_to(&self, neighbour: usize) -> Option<&Portal> {
        self.neighbours
            .iter()
            .position(|id| *id == neighbour)
            .and_then(|index| self.portals.get(index))
    }
}

/// Returns true if the portal references at least two distinct vertices.
pub fn is_usable_portal(portal: &Portal) -> bool {
    portal.len() >= 2 && portal[0] != portal[1]
}

/*
*   A zone is immutable once built. Groups are connected components of the polygon graph,
*   polygon ids & neighbour references are local to their group.
*/
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Zone {
    pub vertices: Vec<Vec3>,
    pub groups: Vec<Vec<Polygon>>,
}

impl Zone {
    pub fn group(&self, group: GroupId) -> Option<&[Polygon]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Total polygon count across all groups.
    pub fn polygon_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    #[inline]
    pub fn polygon_vertices(&self, polygon: &Polygon) -> [Vec3; VERTICES_IN_TRIANGLE] {
        polygon.vertex_ids.map(|id| self.vertices[id as usize])
    }

    /// Checks if ``position`` is inside ``polygon`` on the XZ-plane and within ``height_tolerance`` of its vertical extent.
    pub fn is_position_in_polygon(
        &self,
        position: Vec3,
        polygon: &Polygon,
        height_tolerance: f32,
    ) -> bool {
        let vertices = self.polygon_vertices(polygon);

        let (lowest, highest) = vertices
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(low, high), vertex| {
                (low.min(vertex.y), high.max(vertex.y))
            });

        position.y < highest + height_tolerance
            && position.y > lowest - height_tolerance
            && point_in_polygon_xz(&vertices, position)
    }
}
