//! Small driver that spawns a few hundred movers, runs some frames and
//! prints per-stage timings.
//!
//! Usage: `frame_demo [config.toml] [frames]`

use bytemuck::{Pod, Zeroable};
use tracing::info;

use titan_engine::prelude::*;
use titan_engine::ECSError;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct Position {
    x: f32,
    y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct Velocity {
    x: f32,
    y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct Lifetime {
    frames: u32,
}

fn main() -> Result<(), ECSError> {
    titan_engine::logging::init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    let frames: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(10);

    let mut world = World::new();
    let position = world.register_component::<Position>()?;
    let velocity = world.register_component::<Velocity>()?;
    let lifetime = world.register_component::<Lifetime>()?;
    world.freeze_components();

    let mut builder = ScheduleBuilder::new().with_policy(config.graph.conflict_policy);
    builder
        .add_fn(
            SystemDescriptor::new("spawn_movers", Stage::Init),
            move |ctx| {
                for i in 0..256u32 {
                    let bundle = Bundle::new()
                        .with(position, Position::default())
                        .with(velocity, Velocity { x: 1.0, y: (i % 7) as f32 })
                        .with(lifetime, Lifetime { frames: i % 32 });
                    ctx.spawn(bundle)?;
                }
                Ok(())
            },
        )
        .add_fn(
            SystemDescriptor::new("integrate", Stage::Update).reads(velocity).writes(position),
            |ctx| ctx.for_each_read_write::<Velocity, Position>(None, |v, p| {
                p.x += v.x;
                p.y += v.y;
            }),
        )
        .add_fn(
            SystemDescriptor::new("age", Stage::Update).writes(lifetime),
            |ctx| ctx.for_each_write::<Lifetime>(None, |l| l.frames = l.frames.saturating_sub(1)),
        )
        .add_fn(
            SystemDescriptor::new("expire", Stage::PostUpdate).reads(lifetime),
            |ctx| {
                let mut expired = Vec::new();
                ctx.for_each_entity_read::<Lifetime>(None, |entity, l| {
                    if l.frames == 0 {
                        expired.push(entity);
                    }
                })?;
                for entity in expired {
                    ctx.despawn(entity)?;
                }
                Ok(())
            },
        )
        .add_fn(
            SystemDescriptor::new("report", Stage::Last)
                .reads(position)
                .execution(ExecutionType::Inline),
            |ctx| {
                let mut sum = 0.0f32;
                ctx.for_each_read::<Position>(None, |p| sum += p.x)?;
                info!(entities = ctx.entity_count(), sum, "frame state");
                Ok(())
            },
        );
    let schedule = builder.build()?;

    let mut driver = FrameDriver::new(schedule, &config)?;
    driver.startup(&mut world)?;
    for _ in 0..frames {
        let report = driver.run_frame(&mut world)?;
        for stage in &report.stages {
            info!(
                frame = report.frame_index,
                stage = %stage.stage,
                executed = stage.executed,
                elapsed_us = stage.elapsed.as_micros() as u64,
                "stage timing"
            );
        }
    }
    driver.shutdown(&mut world)?;
    info!(remaining = world.entity_count(), "done");
    Ok(())
}
