#![allow(dead_code)]

use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use titan_engine::{ComponentID, ExecutionError, SystemContext, World};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Health {
    pub value: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Frozen {
    pub since: u32,
}

/// Component ids of the fixtures above.
#[derive(Clone, Copy, Debug)]
pub struct Ids {
    pub position: ComponentID,
    pub velocity: ComponentID,
    pub health: ComponentID,
    pub frozen: ComponentID,
}

pub fn world_with_components() -> (World, Ids) {
    let mut world = World::new();
    let ids = Ids {
        position: world.register_component::<Position>().unwrap(),
        velocity: world.register_component::<Velocity>().unwrap(),
        health: world.register_component::<Health>().unwrap(),
        frozen: world.register_component::<Frozen>().unwrap(),
    };
    world.freeze_components();
    (world, ids)
}

pub fn noop(_: &mut SystemContext<'_>) -> Result<(), ExecutionError> {
    Ok(())
}

/// Spins until `done()` holds or `timeout` elapses. Returns the final `done()`.
pub fn spin_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::yield_now();
    }
    done()
}

/// Small deterministic generator for randomized scenarios.
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}
