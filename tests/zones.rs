use std::{num::NonZeroU16, time::Duration};

use bevy::{ecs::system::RunSystemOnce, prelude::*};
use zoned_navigation::{
    agent::NavAgent,
    conversion::RawMesh,
    zone::Zone,
    zone_index::{FindPathError, ZoneLookupError},
    ActiveCompileTasks, NavMesh, NavMeshSettings, NavMeshSource, ZonedNavigationPlugin,
};

const TIMEOUT_DURATION: Duration = Duration::new(15, 0);
const SLEEP_DURATION: Duration = Duration::from_millis(2);

const ZONE: &str = "ground";

const START_POS: Vec3 = Vec3::new(0.2, 0.0, 0.5);
const END_POS: Vec3 = Vec3::new(1.5, 0.0, 1.8);

#[test]
fn test_simple_navigation() {
    let path = App::setup_test_world().setup_world().run_pathfinding();

    match path {
        Ok(path) => assert_eq!(path, vec![Vec3::new(1.0, 0.0, 1.0), END_POS]),
        Err(error) => panic!("Pathfinding failed: {error:?}"),
    }
}

#[test]
fn zone_is_welded_and_compiled() {
    let zone = App::setup_test_world()
        .setup_world()
        .get_zone(ZONE)
        .expect("Zone wasn't registered.");

    // Every triangle brought its own copies of the shared vertices.
    assert_eq!(zone.vertices.len(), 8);
    assert_eq!(zone.group_count(), 1);
    assert_eq!(zone.polygon_count(), 6);
}

#[test]
fn zone_is_removed() {
    let mut app = App::setup_test_world();
    let path = app.setup_world().clear_world().run_pathfinding();

    assert_eq!(
        path,
        Err(FindPathError::Lookup(ZoneLookupError::UnknownZone(
            ZONE.to_string()
        )))
    );
    assert!(!path.unwrap_err().is_not_found());
    assert!(app.get_zone(ZONE).is_none());
}

#[test]
fn reinserted_source_replaces_zone() {
    let mut app = App::setup_test_world();

    let source = app
        .world_mut()
        .spawn(NavMeshSource::new("first", l_shape_mesh()))
        .id();
    app.wait_for_generation_to_finish();
    assert!(app.get_zone("first").is_some());

    app.world_mut()
        .entity_mut(source)
        .insert(NavMeshSource::new("second", l_shape_mesh()));
    app.wait_for_generation_to_finish();

    assert!(app.get_zone("first").is_none());
    assert!(app.get_zone("second").is_some());

    let zone_ids = app
        .world()
        .resource::<NavMesh>()
        .get()
        .read()
        .expect("Failed to get nav-mesh lock.")
        .zone_ids()
        .map(str::to_string)
        .collect::<Vec<_>>();
    assert_eq!(zone_ids, vec!["second".to_string()]);
}

#[test]
fn zone_is_deterministic() {
    let mut app = App::setup_test_world();

    let zone_one = app.setup_world().get_zone(ZONE);
    app.clear_world();
    let zone_two = app.setup_world().get_zone(ZONE);

    assert!(zone_one.is_some());
    assert_eq!(zone_one, zone_two);
}

#[test]
fn compile_tasks_are_throttled() {
    let mut app = App::setup_test_world();
    app.insert_resource(
        NavMeshSettings::default().with_max_compile_tasks(NonZeroU16::new(1)),
    );

    app.world_mut()
        .run_system_once(|mut commands: Commands| {
            for i in 0..6 {
                commands.spawn(NavMeshSource::new(format!("zone_{i}"), l_shape_mesh()));
            }
        })
        .unwrap();

    app.update();
    assert!(app.world().resource::<ActiveCompileTasks>().len() <= 1);

    app.wait_for_generation_to_finish();
    for i in 0..6 {
        assert!(app.get_zone(&format!("zone_{i}")).is_some());
    }
}

#[test]
fn agent_reaches_target() {
    let mut app = App::setup_test_world();
    app.setup_world();

    let agent = app
        .world_mut()
        .spawn((
            Transform::from_translation(START_POS),
            NavAgent::new(ZONE, 5.0).with_target(END_POS),
        ))
        .id();

    loop {
        app.update();

        let position = app.world().get::<Transform>(agent).unwrap().translation;
        if position.distance(END_POS) <= 0.1 {
            break;
        } else if app.world().resource::<Time>().elapsed() >= TIMEOUT_DURATION {
            panic!("Agent never reached its target, stopped at {position}.");
        }

        std::thread::sleep(SLEEP_DURATION);
    }

    let transform = app.world().get::<Transform>(agent).unwrap();
    assert!(transform.translation.distance(END_POS) <= 0.1);
}

/// The L-shaped corridor from the crate's unit tests as an unindexed triangle list.
fn l_shape_mesh() -> RawMesh {
    let vertices = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(2.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(1.0, 0.0, 1.0),
        Vec3::new(2.0, 0.0, 1.0),
        Vec3::new(1.0, 0.0, 2.0),
        Vec3::new(2.0, 0.0, 2.0),
    ];
    let triangles: [[usize; 3]; 6] = [
        [0, 1, 4],
        [0, 4, 3],
        [1, 2, 5],
        [1, 5, 4],
        [4, 5, 7],
        [4, 7, 6],
    ];

    RawMesh::new(
        triangles
            .iter()
            .flatten()
            .flat_map(|vertex| vertices[*vertex].to_array())
            .collect(),
        Vec::new(),
    )
}

trait TestApp {
    fn setup_test_world() -> App;
    fn wait_for_generation_to_finish(&mut self) -> &mut Self;
    fn setup_world(&mut self) -> &mut Self;
    fn clear_world(&mut self) -> &mut Self;
    fn run_pathfinding(&self) -> Result<Vec<Vec3>, FindPathError>;
    fn get_zone(&self, zone: &str) -> Option<Zone>;
}

impl TestApp for App {
    fn setup_test_world() -> App {
        let mut app = App::new();

        app.add_plugins((
            MinimalPlugins,
            TransformPlugin,
            ZonedNavigationPlugin::new(
                NavMeshSettings::default().with_max_compile_tasks(NonZeroU16::new(8)),
            ),
        ));

        app
    }

    fn wait_for_generation_to_finish(&mut self) -> &mut Self {
        loop {
            self.update();

            if self.world().resource::<ActiveCompileTasks>().is_empty() {
                break;
            } else if self.world().resource::<Time>().elapsed() >= TIMEOUT_DURATION {
                panic!("Generation timed out.");
            }

            std::thread::sleep(SLEEP_DURATION);
        }

        self
    }

    fn setup_world(&mut self) -> &mut Self {
        self.world_mut()
            .run_system_once(|mut commands: Commands| {
                commands.spawn(NavMeshSource::new(ZONE, l_shape_mesh()));
            })
            .unwrap();

        self.wait_for_generation_to_finish();

        self
    }

    fn clear_world(&mut self) -> &mut Self {
        self.world_mut()
            .run_system_once(
                |q_sources: Query<Entity, With<NavMeshSource>>, mut commands: Commands| {
                    for entity in q_sources.iter() {
                        commands.entity(entity).despawn();
                    }
                },
            )
            .unwrap();

        self.wait_for_generation_to_finish();

        self
    }

    fn run_pathfinding(&self) -> Result<Vec<Vec3>, FindPathError> {
        let nav_mesh = self.world().resource::<NavMesh>().get();
        let nav_mesh = nav_mesh.read().expect("Failed to get nav-mesh lock.");

        let group = nav_mesh
            .resolve_group(ZONE, END_POS, true)?
            .ok_or(FindPathError::NoValidStartOrEndPolygon)?;

        nav_mesh.find_path(ZONE, group, START_POS, END_POS)
    }

    fn get_zone(&self, zone: &str) -> Option<Zone> {
        self.world()
            .resource::<NavMesh>()
            .get()
            .read()
            .expect("Failed to get nav-mesh lock.")
            .zone(zone)
            .cloned()
    }
}
