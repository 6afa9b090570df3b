#![allow(dead_code)]

use bytemuck::{Pod, Zeroable};
use titan_engine::{Bundle, ComponentID, StructuralError, World};

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
pub struct Wealth {
    pub value: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
pub struct Tag {
    pub value: u32,
}

#[derive(Clone, Copy)]
pub struct Ids {
    pub position: ComponentID,
    pub velocity: ComponentID,
    pub wealth: ComponentID,
    pub tag: ComponentID,
}

pub fn make_world() -> (World, Ids) {
    let mut world = World::new();
    let ids = Ids {
        position: world.register_component::<Position>().unwrap(),
        velocity: world.register_component::<Velocity>().unwrap(),
        wealth: world.register_component::<Wealth>().unwrap(),
        tag: world.register_component::<Tag>().unwrap(),
    };
    world.freeze_components();
    (world, ids)
}

pub fn populate(world: &mut World, ids: &Ids, agent_count: usize) -> Result<(), StructuralError> {
    for i in 0..agent_count {
        let bundle = Bundle::new()
            .with(ids.position, Position { x: i as f32, y: 0.0 })
            .with(ids.velocity, Velocity { x: 1.0, y: 0.5 })
            .with(ids.wealth, Wealth { value: 100.0 });
        world.spawn(bundle)?;
    }
    Ok(())
}
