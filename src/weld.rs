use bevy::{platform::collections::HashMap, prelude::warn};

use crate::conversion::RawMesh;

/// Welding tolerance used when none is configured.
pub const DEFAULT_WELD_TOLERANCE: f32 = 1e-4;

/// Merges vertices that quantize to the same cell of size ``tolerance``.
///
/// Each referenced vertex is hashed by truncating ``component / tolerance`` towards zero. The first vertex seen for a
/// hash keeps its position & gets the next new index, later vertices with the same hash reuse that index.
///
/// Returns an indexed mesh that only contains referenced vertices. Welding an already welded mesh returns it unchanged.
pub fn weld_vertices(positions: &[f32], indices: &[u32], tolerance: f32) -> RawMesh {
    let shift_multiplier = quantization_multiplier(tolerance);

    let source_vertex_count = positions.len() / 3;
    let reference_count = if indices.is_empty() {
        source_vertex_count
    } else {
        indices.len()
    };

    let mut hash_to_index: HashMap<[i64; 3], u32> = HashMap::default();
    let mut welded = RawMesh {
        positions: Vec::with_capacity(reference_count.min(source_vertex_count) * 3),
        indices: Vec::with_capacity(reference_count),
    };

    let mut skipped = 0;
    for i in 0..reference_count {
        let index = if indices.is_empty() {
            i
        } else {
            indices[i] as usize
        };

        if index >= source_vertex_count {
            skipped += 1;
            // Keep the index buffer aligned to triangles; the compiler skips triangles referencing this.
            welded.indices.push(u32::MAX);
            continue;
        }

        let position = &positions[index * 3..index * 3 + 3];
        let hash = [
            (f64::from(position[0]) * shift_multiplier) as i64,
            (f64::from(position[1]) * shift_multiplier) as i64,
            (f64::from(position[2]) * shift_multiplier) as i64,
        ];

        let next_index = (welded.positions.len() / 3) as u32;
        let welded_index = *hash_to_index.entry(hash).or_insert_with(|| {
            welded.positions.extend_from_slice(position);

            next_index
        });
        welded.indices.push(welded_index);
    }

    if skipped > 0 {
        warn!(
            "{} vertex references were out of bounds while welding ({} vertices).",
            skipped, source_vertex_count
        );
    }

    welded
}

/// ``10^(log10(1 / tolerance))``, snapped to a whole power of ten when the tolerance is one (``1e-4`` isn't exact as an f32).
fn quantization_multiplier(tolerance: f32) -> f64 {
    let tolerance = f64::from(tolerance.max(f32::EPSILON));

    let decimal_shift = (1.0 / tolerance).log10();
    let decimal_shift = if (decimal_shift - decimal_shift.round()).abs() < 1e-4 {
        decimal_shift.round()
    } else {
        decimal_shift
    };

    10f64.powf(decimal_shift)
}

/// Welds ``mesh`` with [`weld_vertices`].
pub fn weld_mesh(mesh: &RawMesh, tolerance: f32) -> RawMesh {
    weld_vertices(&mesh.positions, &mesh.indices, tolerance)
}
