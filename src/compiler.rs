//! Compiles triangle meshes into [Zone]s.
//!
//! Adjacency is found through an inverted index from vertex to the polygons using it, so only polygons sharing a vertex are ever compared.
use std::collections::VecDeque;

use bevy::prelude::{warn, Vec3};
use smallvec::SmallVec;

use crate::{
    conversion::RawMesh,
    round_vec3,
    weld::weld_mesh,
    zone::{Polygon, Portal, Zone},
    VERTEX_DECIMALS, VERTICES_IN_TRIANGLE,
};

#[cfg(feature = "trace")]
use bevy::prelude::info_span;

/// Polygons using each vertex. Most vertices in a triangle mesh are shared by around six triangles.
type VertexPolygons = Vec<SmallVec<[usize; 8]>>;

/// Welds ``mesh`` & compiles the result with [build_zone].
pub fn compile_zone(mesh: &RawMesh, weld_tolerance: f32) -> Zone {
    let welded = {
        #[cfg(feature = "trace")]
        let _span = info_span!("Weld vertices").entered();
        weld_mesh(mesh, weld_tolerance)
    };

    build_zone(&welded.vertices(), &welded.indices)
}

/// Builds a [Zone] from welded vertices & an index buffer with three indices per triangle.
///
/// Vertices are rounded to [VERTEX_DECIMALS] decimals. Triangles referencing vertices that don't exist, and a trailing partial triangle, are skipped with a warning.
pub fn build_zone(vertices: &[Vec3], indices: &[u32]) -> Zone {
    let vertices: Vec<Vec3> = vertices
        .iter()
        .map(|vertex| round_vec3(*vertex, VERTEX_DECIMALS))
        .collect();

    let triangles = {
        #[cfg(feature = "trace")]
        let _span = info_span!("Gather triangles").entered();
        gather_triangles(indices, vertices.len())
    };

    let neighbours = {
        #[cfg(feature = "trace")]
        let _span = info_span!("Build polygon neighbours").entered();
        let vertex_polygons = build_vertex_polygons(&triangles, vertices.len());

        (0..triangles.len())
            .map(|polygon| build_polygon_neighbours(polygon, &triangles, &vertex_polygons))
            .collect::<Vec<_>>()
    };

    let groups = {
        #[cfg(feature = "trace")]
        let _span = info_span!("Build polygon groups").entered();
        build_polygon_groups(&neighbours)
    };

    #[cfg(feature = "trace")]
    let _span = info_span!("Build zone groups").entered();

    // Global polygon index -> (group, local index).
    let mut locations = vec![(0, 0); triangles.len()];
    for (group_id, group) in groups.iter().enumerate() {
        for (local_id, polygon) in group.iter().enumerate() {
            locations[*polygon] = (group_id, local_id);
        }
    }

    let groups = groups
        .iter()
        .enumerate()
        .map(|(group_id, group)| {
            group
                .iter()
                .enumerate()
                .map(|(local_id, &polygon)| {
                    let vertex_ids = triangles[polygon];

                    let mut polygon_neighbours = SmallVec::new();
                    let mut portals = SmallVec::new();
                    for &neighbour in neighbours[polygon].iter() {
                        let (neighbour_group, neighbour_local_id) = locations[neighbour];
                        // Only possible when a degenerate triangle links one way.
                        if neighbour_group != group_id {
                            continue;
                        }

                        polygon_neighbours.push(neighbour_local_id);
                        portals.push(get_shared_vertices_in_order(
                            &vertex_ids,
                            &triangles[neighbour],
                        ));
                    }

                    let centroid = vertex_ids
                        .iter()
                        .map(|vertex| vertices[*vertex as usize])
                        .sum::<Vec3>()
                        / VERTICES_IN_TRIANGLE as f32;

                    Polygon {
                        id: local_id,
                        vertex_ids,
                        centroid: round_vec3(centroid, VERTEX_DECIMALS),
                        neighbours: polygon_neighbours,
                        portals,
                    }
                })
                .collect()
        })
        .collect();

    Zone { vertices, groups }
}

fn gather_triangles(indices: &[u32], vertex_count: usize) -> Vec<[u32; VERTICES_IN_TRIANGLE]> {
    let chunks = indices.chunks_exact(VERTICES_IN_TRIANGLE);
    if !chunks.remainder().is_empty() {
        warn!(
            "Index buffer length {} isn't a multiple of 3, ignoring the trailing {} indices.",
            indices.len(),
            chunks.remainder().len()
        );
    }

    let mut skipped = 0;
    let triangles = chunks
        .filter_map(|triangle| {
            if triangle.iter().any(|index| *index as usize >= vertex_count) {
                skipped += 1;
                return None;
            }

            Some([triangle[0], triangle[1], triangle[2]])
        })
        .collect();

    if skipped > 0 {
        warn!(
            "Skipped {} triangles referencing vertices out of bounds ({} vertices).",
            skipped, vertex_count
        );
    }

    triangles
}

fn build_vertex_polygons(
    triangles: &[[u32; VERTICES_IN_TRIANGLE]],
    vertex_count: usize,
) -> VertexPolygons {
    let mut vertex_polygons: VertexPolygons = vec![SmallVec::new(); vertex_count];

    for (polygon, triangle) in triangles.iter().enumerate() {
        for vertex in triangle {
            vertex_polygons[*vertex as usize].push(polygon);
        }
    }

    vertex_polygons
}

/// Returns the polygons sharing at least two vertices with ``polygon``, in bucket order.
fn build_polygon_neighbours(
    polygon: usize,
    triangles: &[[u32; VERTICES_IN_TRIANGLE]],
    vertex_polygons: &VertexPolygons,
) -> SmallVec<[usize; VERTICES_IN_TRIANGLE]> {
    let [a, b, c] = triangles[polygon];
    let group_a = &vertex_polygons[a as usize];
    let group_b = &vertex_polygons[b as usize];
    let group_c = &vertex_polygons[c as usize];

    let mut neighbours: SmallVec<[usize; VERTICES_IN_TRIANGLE]> = SmallVec::new();

    // Polygons only in group C can't share two vertices with this polygon.
    for &candidate in group_a.iter() {
        if candidate != polygon
            && (group_b.contains(&candidate) || group_c.contains(&candidate))
            && !neighbours.contains(&candidate)
        {
            neighbours.push(candidate);
        }
    }
    for &candidate in group_b.iter() {
        if candidate != polygon && group_c.contains(&candidate) && !neighbours.contains(&candidate)
        {
            neighbours.push(candidate);
        }
    }

    neighbours
}

/// Flood fills the neighbour graph. Each group lists its polygons in breadth-first order from its lowest polygon.
fn build_polygon_groups(neighbours: &[SmallVec<[usize; VERTICES_IN_TRIANGLE]>]) -> Vec<Vec<usize>> {
    let mut visited = vec![false; neighbours.len()];
    let mut groups = Vec::new();
    let mut queue = VecDeque::new();

    for seed in 0..neighbours.len() {
        if visited[seed] {
            continue;
        }

        visited[seed] = true;
        queue.push_back(seed);

        let mut group = Vec::new();
        while let Some(polygon) = queue.pop_front() {
            group.push(polygon);

            for &neighbour in neighbours[polygon].iter() {
                if !visited[neighbour] {
                    visited[neighbour] = true;
                    queue.push_back(neighbour);
                }
            }
        }

        groups.push(group);
    }

    groups
}

/// Returns the vertices of ``a`` that are also in ``b``.
///
/// Two shared vertices come out as ``(a0, a1)``, ``(a1, a2)`` or ``(a2, a0)``, following the winding of ``a``. All three shared returns ``a`` as is.
/// Fewer than two shared vertices means the polygons aren't neighbours, an empty portal is returned.
pub fn get_shared_vertices_in_order(
    a: &[u32; VERTICES_IN_TRIANGLE],
    b: &[u32; VERTICES_IN_TRIANGLE],
) -> Portal {
    let [a0, a1, a2] = *a;

    let shared_0 = b.contains(&a0);
    let shared_1 = b.contains(&a1);
    let shared_2 = b.contains(&a2);

    match (shared_0, shared_1, shared_2) {
        (true, true, true) => Portal::from_slice(a),
        (true, true, false) => Portal::from_slice(&[a0, a1]),
        (false, true, true) => Portal::from_slice(&[a1, a2]),
        (true, false, true) => Portal::from_slice(&[a2, a0]),
        _ => {
            warn!(
                "Polygons {:?} & {:?} were linked as neighbours with fewer than 2 shared vertices.",
                a, b
            );
            Portal::new()
        }
    }
}
