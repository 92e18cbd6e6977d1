use bevy::prelude::Vec3;
use parry3d::{math::Point, shape::TriMesh};

/// Raw triangle mesh buffers, as read from an asset or a collider.
///
/// ``positions`` is a flat ``[x, y, z, x, y, z, ...]`` list and ``indices`` holds three vertex indices per triangle.
/// An empty ``indices`` buffer means ``positions`` is an unindexed triangle list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawMesh {
    pub positions: Vec<f32>,
    pub indices: Vec<u32>,
}

impl RawMesh {
    pub fn new(positions: Vec<f32>, indices: Vec<u32>) -> Self {
        Self { positions, indices }
    }

    pub fn from_triangles(vertices: &[Vec3], triangles: &[[u32; 3]]) -> Self {
        Self {
            positions: vertices.iter().flat_map(|vertex| vertex.to_array()).collect(),
            indices: triangles.iter().flatten().copied().collect(),
        }
    }

    pub fn from_parry_trimesh(trimesh: &TriMesh) -> Self {
        Self::from_parry_points(trimesh.vertices(), trimesh.indices())
    }

    /// Same as [`RawMesh::from_triangles`] for the output of parry3d's ``to_trimesh`` functions.
    pub fn from_parry_points(points: &[Point<f32>], triangles: &[[u32; 3]]) -> Self {
        Self {
            positions: points
                .iter()
                .flat_map(|point| [point.x, point.y, point.z])
                .collect(),
            indices: triangles.iter().flatten().copied().collect(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[inline]
    pub fn vertex(&self, index: usize) -> Option<Vec3> {
        let start = index * 3;
        self.positions
            .get(start..start + 3)
            .map(|position| Vec3::new(position[0], position[1], position[2]))
    }

    /// Positions as vectors. A trailing partial vertex is dropped.
    pub fn vertices(&self) -> Vec<Vec3> {
        self.positions
            .chunks_exact(3)
            .map(|position| Vec3::new(position[0], position[1], position[2]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use parry3d::{na::Vector3, shape::Cuboid};

    use super::*;

    #[test]
    fn triangles_are_flattened() {
        let mesh = RawMesh::from_triangles(
            &[Vec3::ZERO, Vec3::X, Vec3::new(1.0, 2.0, 3.0)],
            &[[0, 1, 2], [2, 1, 0]],
        );

        assert_eq!(mesh.positions, vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 1, 0]);
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.vertex(2), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(mesh.vertex(3), None);
    }

    #[test]
    fn parry_shapes_are_converted() {
        let (points, triangles) = Cuboid::new(Vector3::new(1.0, 0.5, 1.0)).to_trimesh();

        let mesh = RawMesh::from_parry_points(&points, &triangles);

        assert_eq!(mesh.vertex_count(), points.len());
        assert_eq!(mesh.indices.len(), triangles.len() * 3);
        assert_eq!(mesh.vertex(0), Some(Vec3::new(points[0].x, points[0].y, points[0].z)));
    }
}
