//! Agents that re-plan towards a moving target & steer along the resulting path.
use std::collections::VecDeque;

use bevy::prelude::*;

use crate::{
    zone_index::{FindPathError, ZoneIndex},
    NavMesh,
};

/// Distances controlling when [NavAgent]s re-plan, reach waypoints & stop.
#[derive(Resource, Clone, Debug)]
pub struct NavAgentSettings {
    /// How far the target has to move from where it was when the path was planned before planning again.
    pub replan_distance: f32,
    /// How close an agent has to get to a waypoint for it to count as reached.
    pub arrival_distance: f32,
    /// Agents closer than this to their target stop navigating.
    ///
    /// Should be larger than ``arrival_distance``.
    pub stop_distance: f32,
}

impl Default for NavAgentSettings {
    fn default() -> Self {
        Self {
            replan_distance: 0.5,
            arrival_distance: 0.05,
            stop_distance: 0.1,
        }
    }
}

impl NavAgentSettings {
    /// Setter for [`NavAgentSettings::replan_distance`]. Negative values are ignored.
    pub fn set_replan_distance(&mut self, replan_distance: f32) {
        if replan_distance >= 0.0 {
            self.replan_distance = replan_distance;
        }
    }
    /// Setter for [`NavAgentSettings::arrival_distance`]. Negative values are ignored.
    pub fn set_arrival_distance(&mut self, arrival_distance: f32) {
        if arrival_distance >= 0.0 {
            self.arrival_distance = arrival_distance;
        }
    }
    /// Setter for [`NavAgentSettings::stop_distance`]. Negative values are ignored.
    pub fn set_stop_distance(&mut self, stop_distance: f32) {
        if stop_distance >= 0.0 {
            self.stop_distance = stop_distance;
        }
    }

    pub fn with_replan_distance(mut self, replan_distance: f32) -> Self {
        self.set_replan_distance(replan_distance);

        self
    }
    pub fn with_arrival_distance(mut self, arrival_distance: f32) -> Self {
        self.set_arrival_distance(arrival_distance);

        self
    }
    pub fn with_stop_distance(mut self, stop_distance: f32) -> Self {
        self.set_stop_distance(stop_distance);

        self
    }
}

/// What an agent should do this frame, from [NavAgent::step].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AgentStep {
    /// Stay in place.
    Idle,
    /// Move to ``position``, facing ``waypoint``.
    MoveTo { position: Vec3, waypoint: Vec3 },
    /// No path could be found. Keep moving straight ahead.
    Fallback,
}

/// Component for entities navigating a zone towards a target.
///
/// The entity's ``Transform`` is moved by [steer_nav_agents_system].
#[derive(Component, Clone, Debug)]
pub struct NavAgent {
    /// Zone the agent navigates in.
    pub zone: String,
    /// Movement speed in units per second.
    pub speed: f32,
    pub target: Option<Vec3>,
    path: VecDeque<Vec3>,
    /// Target position the current path was planned for.
    planned_target: Option<Vec3>,
}

impl NavAgent {
    pub fn new(zone: impl Into<String>, speed: f32) -> Self {
        Self {
            zone: zone.into(),
            speed,
            target: None,
            path: VecDeque::new(),
            planned_target: None,
        }
    }

    pub fn with_target(mut self, target: Vec3) -> Self {
        self.target = Some(target);

        self
    }

    /// Remaining waypoints, ending at the target.
    pub fn path(&self) -> &VecDeque<Vec3> {
        &self.path
    }

    /// Advances the agent by ``delta_seconds``, re-planning if there's no path or the target has moved too far.
    pub fn step(
        &mut self,
        position: Vec3,
        zone_index: &ZoneIndex,
        settings: &NavAgentSettings,
        delta_seconds: f32,
    ) -> AgentStep {
        let Some(target) = self.target else {
            self.path.clear();
            return AgentStep::Idle;
        };

        if target.distance(position) <= settings.stop_distance {
            self.path.clear();
            return AgentStep::Idle;
        }

        let target_moved = self
            .planned_target
            .map_or(true, |planned| planned.distance(target) > settings.replan_distance);
        if self.path.is_empty() || target_moved {
            self.planned_target = Some(target);

            match self.plan(position, target, zone_index) {
                Ok(path) => self.path = path.into(),
                Err(error) if error.is_not_found() => {
                    debug!("No path for agent in zone \"{}\": {:?}", self.zone, error);
                    self.path.clear();
                    return AgentStep::Fallback;
                }
                Err(error) => {
                    // Zone most likely isn't compiled yet, try again next frame.
                    debug!("Can't navigate in zone \"{}\": {:?}", self.zone, error);
                    self.path.clear();
                    self.planned_target = None;
                    return AgentStep::Idle;
                }
            }
        }

        let Some(&waypoint) = self.path.front() else {
            return AgentStep::Idle;
        };

        let to_waypoint = waypoint - position;
        if to_waypoint.length_squared() <= settings.arrival_distance * settings.arrival_distance {
            self.path.pop_front();
            return AgentStep::Idle;
        }

        let distance = to_waypoint.length();
        let travel = self.speed * delta_seconds;

        let position = if travel >= distance {
            waypoint
        } else {
            position + to_waypoint / distance * travel
        };

        AgentStep::MoveTo { position, waypoint }
    }

    fn plan(
        &self,
        position: Vec3,
        target: Vec3,
        zone_index: &ZoneIndex,
    ) -> Result<Vec<Vec3>, FindPathError> {
        let Some(group) = zone_index.resolve_group(&self.zone, target, false)? else {
            return Err(FindPathError::NoValidStartOrEndPolygon);
        };

        zone_index.find_path(&self.zone, group, position, target)
    }
}

/// Moves every [NavAgent] along its path.
pub fn steer_nav_agents_system(
    time: Res<Time>,
    nav_agent_settings: Res<NavAgentSettings>,
    nav_mesh: Res<NavMesh>,
    mut agents: Query<(&mut NavAgent, &mut Transform)>,
) {
    if agents.is_empty() {
        return;
    }

    let nav_mesh = nav_mesh.get();
    let Ok(zone_index) = nav_mesh.read() else {
        error!("Nav-Mesh lock has been poisoned. Agents can no longer navigate.");
        return;
    };

    let delta_seconds = time.delta_secs();
    for (mut agent, mut transform) in agents.iter_mut() {
        match agent.step(
            transform.translation,
            &zone_index,
            &nav_agent_settings,
            delta_seconds,
        ) {
            AgentStep::Idle => {}
            AgentStep::MoveTo { position, waypoint } => {
                transform.translation = position;
                if position.distance_squared(waypoint) > f32::EPSILON {
                    transform.look_at(waypoint, Vec3::Y);
                }
            }
            AgentStep::Fallback => {
                let forward = transform.forward();
                transform.translation += forward * agent.speed * delta_seconds;
            }
        }
    }
}
