//! Path queries within a single group of a [Zone].
//!
//! [find_polygon_path] finds a corridor of polygons with A*, [perform_string_pulling_on_path] turns the corridor into waypoints.
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy::prelude::Vec3;

use crate::{
    tri_area_2, vequal,
    zone::{is_usable_portal, Polygon, Zone},
};

#[derive(Debug, Clone, PartialEq)]
pub enum FindPolygonPathError {
    /// The start polygon isn't in the group.
    InvalidStartPolygon,
    /// The end polygon isn't in the group.
    InvalidEndPolygon,
    /// The polygons aren't connected through any usable portals.
    NoPathFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPullingError {
    PathEmpty,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct SearchNode {
    polygon: usize,
    cost: f32,
    total_cost: f32,
}

impl Eq for SearchNode {}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Flipped so the heap pops the lowest total cost first. Ties go to the lowest polygon.
        other
            .total_cost
            .total_cmp(&self.total_cost)
            .then_with(|| other.polygon.cmp(&self.polygon))
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Performs A* over the polygons of a group, returning the local ids of the polygons from ``start_polygon`` to ``end_polygon`` inclusive.
///
/// Moving between two neighbours costs the distance between their centroids, the heuristic is the distance from a centroid to the centroid of ``end_polygon``.
/// Neighbours linked through unusable portals are never traversed.
pub fn find_polygon_path(
    polygons: &[Polygon],
    start_polygon: usize,
    end_polygon: usize,
) -> Result<Vec<usize>, FindPolygonPathError> {
    if start_polygon >= polygons.len() {
        return Err(FindPolygonPathError::InvalidStartPolygon);
    }
    if end_polygon >= polygons.len() {
        return Err(FindPolygonPathError::InvalidEndPolygon);
    }

    if start_polygon == end_polygon {
        return Ok(vec![start_polygon]);
    }

    let end_centroid = polygons[end_polygon].centroid;

    let mut costs = vec![f32::INFINITY; polygons.len()];
    let mut came_from = vec![usize::MAX; polygons.len()];
    let mut closed = vec![false; polygons.len()];
    let mut open = BinaryHeap::new();

    costs[start_polygon] = 0.0;
    open.push(SearchNode {
        polygon: start_polygon,
        cost: 0.0,
        total_cost: polygons[start_polygon].centroid.distance(end_centroid),
    });

    while let Some(node) = open.pop() {
        if node.polygon == end_polygon {
            let mut path = vec![end_polygon];
            let mut current = end_polygon;
            while current != start_polygon {
                current = came_from[current];
                path.push(current);
            }
            path.reverse();

            return Ok(path);
        }

        if closed[node.polygon] {
            continue;
        }
        closed[node.polygon] = true;

        let polygon = &polygons[node.polygon];
        for (&neighbour, portal) in polygon.neighbours.iter().zip(polygon.portals.iter()) {
            if neighbour >= polygons.len() || closed[neighbour] || !is_usable_portal(portal) {
                continue;
            }

            let neighbour_centroid = polygons[neighbour].centroid;
            let cost = node.cost + polygon.centroid.distance(neighbour_centroid);
            if cost < costs[neighbour] {
                costs[neighbour] = cost;
                came_from[neighbour] = node.polygon;

                open.push(SearchNode {
                    polygon: neighbour,
                    cost,
                    total_cost: cost + neighbour_centroid.distance(end_centroid),
                });
            }
        }
    }

    Err(FindPolygonPathError::NoPathFound)
}

/// Performs "string pulling" on a corridor of polygons from [find_polygon_path], returning the waypoints after ``start_pos`` up to & including ``end_pos``.
///
/// The funnel is evaluated on the XZ-plane. Portals are oriented relative to the polygon they're left from, so either triangle winding works.
pub fn perform_string_pulling_on_path(
    zone: &Zone,
    polygons: &[Polygon],
    start_pos: Vec3,
    end_pos: Vec3,
    path: &[usize],
) -> Result<Vec<Vec3>, StringPullingError> {
    if path.is_empty() {
        return Err(StringPullingError::PathEmpty);
    }

    // (left, right)
    let mut portals = Vec::with_capacity(path.len() + 1);
    portals.push((start_pos, start_pos));

    for window in path.windows(2) {
        let (from, to) = (window[0], window[1]);
        let Some(polygon) = polygons.get(from) else {
            continue;
        };
        let Some(portal) = polygon.portal_to(to).filter(|portal| is_usable_portal(portal)) else {
            continue;
        };

        let a = zone.vertices[portal[0] as usize];
        let b = zone.vertices[portal[1] as usize];

        if tri_area_2(polygon.centroid, a, b) < 0.0 {
            portals.push((b, a));
        } else {
            portals.push((a, b));
        }
    }

    portals.push((end_pos, end_pos));

    let mut points = vec![start_pos];

    let mut portal_apex = start_pos;
    let mut portal_left = start_pos;
    let mut portal_right = start_pos;

    let mut left_index = 0;
    let mut right_index = 0;

    let mut i = 1;
    while i < portals.len() {
        let (left, right) = portals[i];

        // Update right vertex.
        if tri_area_2(portal_apex, portal_right, right) <= 0.0 {
            if vequal(portal_apex, portal_right) || tri_area_2(portal_apex, portal_left, right) > 0.0 {
                // Tighten the funnel.
                portal_right = right;
                right_index = i;
            } else {
                // Right over left, left becomes the new apex.
                push_point(&mut points, portal_left);

                portal_apex = portal_left;

                portal_right = portal_apex;
                right_index = left_index;

                i = left_index + 1;
                continue;
            }
        }

        // Update left vertex.
        if tri_area_2(portal_apex, portal_left, left) >= 0.0 {
            if vequal(portal_apex, portal_left) || tri_area_2(portal_apex, portal_right, left) < 0.0 {
                portal_left = left;
                left_index = i;
            } else {
                // Left over right, right becomes the new apex.
                push_point(&mut points, portal_right);

                portal_apex = portal_right;

                portal_left = portal_apex;
                left_index = right_index;

                i = right_index + 1;
                continue;
            }
        }

        i += 1;
    }

    // The caller already knows where it starts.
    points.remove(0);
    if points.last().map_or(true, |last| !vequal(*last, end_pos)) {
        points.push(end_pos);
    }

    Ok(points)
}

#[inline]
fn push_point(points: &mut Vec<Vec3>, point: Vec3) {
    if points.last().map_or(true, |last| !vequal(*last, point)) {
        points.push(point);
    }
}
