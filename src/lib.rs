//! Zoned **navigation-mesh** pathfinding for 3D worlds in [Bevy].
//!
//! Takes in triangle meshes describing walkable ground from entities with the [NavMeshSource] component and **asynchronously** compiles them into zones of connected polygon groups. Zones can then be queried using [zone_index::ZoneIndex::find_path].
//!
//! ## Quick-start:
//! **Zone compilation:**
//! 1. Add ``ZonedNavigationPlugin`` as a plugin. (eg. `ZonedNavigationPlugin::new(NavMeshSettings::default())`)
//! 2. Spawn an entity with a ``NavMeshSource`` containing the zone's name & a [conversion::RawMesh] of the walkable ground. Parry3d shapes can be converted with [conversion::RawMesh::from_parry_trimesh].
//!
//! *At this point the mesh is welded & compiled in the background, then registered under the zone's name. Removing the component unregisters the zone.*
//!
//! **Querying the nav-mesh / Pathfinding:**
//! 1. Your system needs to take in the ``NavMesh`` resource.
//! 2. Get the underlying data from the nav-mesh using ``NavMesh::get``. This data is wrapped in an ``RwLock``.
//! 3. To access the data call ``RwLock::read``. *This will block until you get read access on the lock. If a task is already writing to the lock it may take time.*
//! 4. Resolve the group you want to path in with ``ZoneIndex::resolve_group``, then call ``ZoneIndex::find_path``.
//!
//! *Alternatively attach a [agent::NavAgent] to an entity with a ``Transform`` & give it a target, it will re-plan & steer on its own.*
//!
//! Zones can also be compiled without the plugin using [compiler::compile_zone] & registered in your own [zone_index::ZoneIndex].
//!
//! ## FAQ
//!
//! > My path query returns ``NoValidStartOrEndPolygon``.
//!
//! The start & end positions must both be inside a polygon of the group on the XZ-plane, and within the height tolerance of it vertically. Groups are connected pieces of the nav-mesh, paths never cross between them.
//!
//! > Why are two triangles that touch not connected?
//!
//! Polygons only connect through shared vertices. Vertices are welded with ``NavMeshSettings::weld_tolerance`` before compiling, raise it if your mesh has small gaps.
//!
//! [Bevy]: https://crates.io/crates/bevy

use std::num::NonZeroU16;
use std::sync::{Arc, RwLock};

use agent::{steer_nav_agents_system, NavAgentSettings};
use bevy::ecs::entity::EntityHashMap;
use bevy::prelude::*;
use bevy::tasks::{AsyncComputeTaskPool, Task};
use compiler::compile_zone;
use conversion::RawMesh;
use weld::DEFAULT_WELD_TOLERANCE;
use zone_index::{ZoneIndex, DEFAULT_HEIGHT_TOLERANCE};

pub mod agent;
pub mod compiler;
pub mod conversion;
pub mod query;
pub mod weld;
pub mod zone;
pub mod zone_index;

/// Vertex count of a polygon. Polygons are always triangles.
pub const VERTICES_IN_TRIANGLE: usize = 3;
/// Decimals vertex positions & polygon centroids are rounded to when compiling.
pub const VERTEX_DECIMALS: i32 = 2;

/// System sets containing the crate's systems.
#[derive(SystemSet, Debug, PartialEq, Eq, Hash, Clone)]
pub enum ZonedNavigation {
    /// Systems reacting to added & removed [NavMeshSource] components and spawning compilation tasks.
    Compilation,
    /// Systems moving [agent::NavAgent]s along their paths. Runs after compilation.
    Steering,
}

pub struct ZonedNavigationPlugin {
    pub settings: NavMeshSettings,
}

impl ZonedNavigationPlugin {
    #[must_use]
    pub fn new(settings: NavMeshSettings) -> ZonedNavigationPlugin {
        ZonedNavigationPlugin { settings }
    }
}

impl Plugin for ZonedNavigationPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.settings.clone())
            .insert_resource(NavMesh::new(ZoneIndex::new(
                self.settings.height_tolerance,
            )));

        app.init_resource::<GenerationTicker>()
            .init_resource::<PendingZoneSources>()
            .init_resource::<NavMeshSourceRelations>()
            .init_resource::<ActiveCompileTasks>()
            .init_resource::<NavAgentSettings>();

        app.configure_sets(
            Update,
            ZonedNavigation::Steering.after(ZonedNavigation::Compilation),
        );

        app.add_systems(
            Update,
            (
                handle_removed_sources_system,
                queue_changed_sources_system,
                remove_finished_tasks,
                send_compile_tasks_system.run_if(can_compile_new_zones),
            )
                .chain()
                .in_set(ZonedNavigation::Compilation),
        );

        app.add_systems(
            Update,
            steer_nav_agents_system.in_set(ZonedNavigation::Steering),
        );
    }
}

/// Which zone each [NavMeshSource] entity registered.
#[derive(Resource, Default)]
struct NavMeshSourceRelations(EntityHashMap<String>);

/// Sources waiting for a free compilation slot, in the order they were added.
#[derive(Resource, Default)]
struct PendingZoneSources(Vec<Entity>);

#[derive(Resource, Default)]
pub struct ActiveCompileTasks(Vec<Task<()>>);
impl ActiveCompileTasks {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Component for entities providing the walkable mesh of a zone.
///
/// The mesh is compiled when the component is added or changed. Insert it again to recompile.
#[derive(Component, Clone, Debug)]
pub struct NavMeshSource {
    /// Name the compiled zone is registered under.
    pub zone: String,
    pub mesh: RawMesh,
}

impl NavMeshSource {
    pub fn new(zone: impl Into<String>, mesh: RawMesh) -> Self {
        Self {
            zone: zone.into(),
            mesh,
        }
    }
}

/// Generation ticker for zones.
///
/// Used to keep track of if the registered zone is newer than the one we are trying to insert in [compile_and_register_zone]. This could happen if a large mesh is replaced by a small one while still compiling.
#[derive(Default, Resource)]
struct GenerationTicker(u64);

/// Settings for zone compilation.
#[derive(Resource, Clone, Debug)]
pub struct NavMeshSettings {
    /// Vertices closer than this on every axis are merged before compiling.
    ///
    /// **Suggested value**: Leave at the default unless your mesh has cracks between triangles that should connect.
    pub weld_tolerance: f32,
    /// Vertical slack when checking if a position is inside a polygon. A position counts as inside if it's within this distance above the highest or below the lowest vertex of the polygon.
    ///
    /// **Suggested value**: Roughly the height of your agents.
    pub height_tolerance: f32,
    /// Max zones to compile in parallel at once. A value of ``None`` will result in no limit.
    pub max_compile_tasks: Option<NonZeroU16>,
}

impl Default for NavMeshSettings {
    fn default() -> Self {
        Self {
            weld_tolerance: DEFAULT_WELD_TOLERANCE,
            height_tolerance: DEFAULT_HEIGHT_TOLERANCE,
            max_compile_tasks: NonZeroU16::new(4),
        }
    }
}

impl NavMeshSettings {
    /// Setter for [`NavMeshSettings::weld_tolerance`]. Negative values are ignored.
    pub fn with_weld_tolerance(mut self, weld_tolerance: f32) -> Self {
        if weld_tolerance >= 0.0 {
            self.weld_tolerance = weld_tolerance;
        }

        self
    }
    /// Setter for [`NavMeshSettings::height_tolerance`]. Negative values are ignored.
    pub fn with_height_tolerance(mut self, height_tolerance: f32) -> Self {
        if height_tolerance >= 0.0 {
            self.height_tolerance = height_tolerance;
        }

        self
    }
    /// Setter for [`NavMeshSettings::max_compile_tasks`]
    pub fn with_max_compile_tasks(mut self, max_compile_tasks: Option<NonZeroU16>) -> Self {
        self.max_compile_tasks = max_compile_tasks;

        self
    }
}

/// Wrapper around the nav-mesh data.
///
/// The underlying [ZoneIndex] must be retrieved using [NavMesh::get]
#[derive(Default, Resource)]
pub struct NavMesh(Arc<RwLock<ZoneIndex>>);

impl NavMesh {
    pub fn new(zone_index: ZoneIndex) -> Self {
        Self(Arc::new(RwLock::new(zone_index)))
    }

    pub fn get(&self) -> Arc<RwLock<ZoneIndex>> {
        self.0.clone()
    }
}

fn queue_changed_sources_system(
    mut pending_sources: ResMut<PendingZoneSources>,
    query: Query<Entity, Changed<NavMeshSource>>,
) {
    for entity in query.iter() {
        if !pending_sources.0.contains(&entity) {
            pending_sources.0.push(entity);
        }
    }
}

fn handle_removed_sources_system(
    mut removed_sources: RemovedComponents<NavMeshSource>,
    mut source_relations: ResMut<NavMeshSourceRelations>,
    mut pending_sources: ResMut<PendingZoneSources>,
    mut generation_ticker: ResMut<GenerationTicker>,
    mut active_compile_tasks: ResMut<ActiveCompileTasks>,
    nav_mesh: Res<NavMesh>,
) {
    let thread_pool = AsyncComputeTaskPool::get();

    for removed in removed_sources.read() {
        pending_sources.0.retain(|entity| *entity != removed);

        let Some(zone) = source_relations.0.remove(&removed) else {
            continue;
        };

        generation_ticker.0 += 1;

        let task = thread_pool.spawn(remove_zone(generation_ticker.0, zone, nav_mesh.0.clone()));
        active_compile_tasks.0.push(task);
    }
}

fn can_compile_new_zones(
    active_compile_tasks: Res<ActiveCompileTasks>,
    pending_sources: Res<PendingZoneSources>,
    nav_mesh_settings: Res<NavMeshSettings>,
) -> bool {
    nav_mesh_settings
        .max_compile_tasks
        .map_or(true, |max_compile_tasks| {
            active_compile_tasks.0.len() < max_compile_tasks.get().into()
        })
        && !pending_sources.0.is_empty()
}

fn send_compile_tasks_system(
    mut active_compile_tasks: ResMut<ActiveCompileTasks>,
    mut generation_ticker: ResMut<GenerationTicker>,
    mut pending_sources: ResMut<PendingZoneSources>,
    mut source_relations: ResMut<NavMeshSourceRelations>,
    nav_mesh_settings: Res<NavMeshSettings>,
    nav_mesh: Res<NavMesh>,
    source_query: Query<&NavMeshSource>,
) {
    let thread_pool = AsyncComputeTaskPool::get();

    let max_task_count = (nav_mesh_settings
        .max_compile_tasks
        .unwrap_or(NonZeroU16::MAX)
        .get() as usize)
        .saturating_sub(active_compile_tasks.0.len());
    let task_count = max_task_count.min(pending_sources.0.len());

    for entity in pending_sources.0.drain(..task_count) {
        let Ok(source) = source_query.get(entity) else {
            continue;
        };

        generation_ticker.0 += 1;

        // Re-inserted with another name, the old zone goes away.
        if let Some(previous_zone) = source_relations.0.insert(entity, source.zone.clone()) {
            if previous_zone != source.zone {
                let task = thread_pool.spawn(remove_zone(
                    generation_ticker.0,
                    previous_zone,
                    nav_mesh.0.clone(),
                ));
                active_compile_tasks.0.push(task);
            }
        }

        let task = thread_pool.spawn(compile_and_register_zone(
            generation_ticker.0,
            source.zone.clone(),
            source.mesh.clone(),
            nav_mesh_settings.weld_tolerance,
            nav_mesh.0.clone(),
        ));

        active_compile_tasks.0.push(task);
    }
}

fn remove_finished_tasks(mut active_compile_tasks: ResMut<ActiveCompileTasks>) {
    active_compile_tasks.0.retain(|task| !task.is_finished());
}

async fn remove_zone(
    generation: u64, // This is the max generation we remove. Should a newer compilation of the zone finish first we won't remove it.
    zone: String,
    nav_mesh: Arc<RwLock<ZoneIndex>>,
) {
    let Ok(mut nav_mesh) = nav_mesh.write() else {
        error!("Nav-Mesh lock has been poisoned. Zones can no longer be updated.");
        return;
    };

    nav_mesh.remove_zone_with_generation(&zone, generation);
}

async fn compile_and_register_zone(
    generation: u64,
    zone_id: String,
    mesh: RawMesh,
    weld_tolerance: f32,
    nav_mesh: Arc<RwLock<ZoneIndex>>,
) {
    #[cfg(feature = "trace")]
    let _span = info_span!("Async compile Zone").entered();

    let zone = compile_zone(&mesh, weld_tolerance);

    let Ok(mut nav_mesh) = nav_mesh.write() else {
        error!("Nav-Mesh lock has been poisoned. Zones can no longer be updated.");
        return;
    };

    let group_count = zone.group_count();
    let polygon_count = zone.polygon_count();
    if nav_mesh.set_zone_with_generation(zone_id.clone(), zone, generation) {
        info!(
            "Registered zone \"{}\" with {} polygons in {} groups.",
            zone_id, polygon_count, group_count
        );
    }
}

/*
*   Lots of math stuff.
*   Don't know where else to put it.
*/

/// Even-odd ray-cast test on the XZ-plane. Points exactly on the lower-z edge of a span count as inside.
fn point_in_polygon_xz(polygon: &[Vec3], point: Vec3) -> bool {
    let mut inside = false;

    let mut j = polygon.len().wrapping_sub(1);
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);

        if ((a.z <= point.z && point.z < b.z) || (b.z <= point.z && point.z < a.z))
            && point.x < (b.x - a.x) * (point.z - a.z) / (b.z - a.z) + a.x
        {
            inside = !inside;
        }

        j = i;
    }

    inside
}

/// Twice the signed area of the triangle ``(a, b, c)`` projected onto the XZ-plane.
///
/// Positive when ``c`` is to the left of ``a -> b`` looking down the Y-axis.
#[inline]
fn tri_area_2(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    (c.x - a.x) * (b.z - a.z) - (b.x - a.x) * (c.z - a.z)
}

#[inline]
fn vequal(a: Vec3, b: Vec3) -> bool {
    a.distance_squared(b) < 0.00001
}

/// Halves round towards positive infinity, so ``-0.125`` becomes ``-0.12``.
#[inline]
fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f32.powi(decimals);

    (value * factor + 0.5).floor() / factor
}

#[inline]
fn round_vec3(vector: Vec3, decimals: i32) -> Vec3 {
    Vec3::new(
        round_to(vector.x, decimals),
        round_to(vector.y, decimals),
        round_to(vector.z, decimals),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_in_triangle_xz() {
        let triangle = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
        ];

        assert!(point_in_polygon_xz(&triangle, Vec3::new(0.8, 0.0, 0.2)));
        // Height is ignored.
        assert!(point_in_polygon_xz(&triangle, Vec3::new(0.8, 100.0, 0.2)));
        assert!(!point_in_polygon_xz(&triangle, Vec3::new(0.2, 0.0, 0.8)));
        assert!(!point_in_polygon_xz(&triangle, Vec3::new(1.5, 0.0, 0.5)));
        assert!(!point_in_polygon_xz(&[], Vec3::ZERO));
    }

    #[test]
    fn tri_area_sign_follows_side() {
        let a = Vec3::ZERO;
        let b = Vec3::new(0.0, 0.0, 1.0);

        assert!(tri_area_2(a, b, Vec3::new(1.0, 0.0, 0.5)) > 0.0);
        assert!(tri_area_2(a, b, Vec3::new(-1.0, 0.0, 0.5)) < 0.0);
        assert_eq!(tri_area_2(a, b, Vec3::new(0.0, 5.0, 0.5)), 0.0);
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(0.666_666, 2), 0.67);
        assert_eq!(round_to(-1.005_1, 2), -1.01);
        assert_eq!(round_to(-0.125, 2), -0.12);
        assert_eq!(round_to(0.125, 2), 0.13);
        assert_eq!(
            round_vec3(Vec3::new(1.0 / 3.0, 2.0 / 3.0, 1.0), VERTEX_DECIMALS),
            Vec3::new(0.33, 0.67, 1.0)
        );
        assert!(vequal(Vec3::ONE, Vec3::new(1.001, 1.0, 1.0)));
        assert!(!vequal(Vec3::ONE, Vec3::new(1.01, 1.0, 1.0)));
    }
}
