//! # Engine Module
//!
//! Core building blocks of the engine:
//! - Identifiers, signatures and access sets
//! - Component registry and column storage
//! - Entities, archetypes and the world
//! - Systems, the graph builder and the executors
//! - The job system and the frame driver
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod component;
pub mod storage;
pub mod entity;
pub mod archetype;
pub mod world;
pub mod query;
pub mod commands;
pub mod systems;
pub mod graph;
pub mod jobs;
pub mod executor;
pub mod scheduler;
pub mod config;
