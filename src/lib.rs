//! Steel Arena Server Library
//!
//! The authoritative real-time simulation core of a multiplayer tank-battle
//! server: battle lifecycle, entity-component sharing between server and
//! clients, per-connection command pipelines, and the per-tick damage /
//! bonus / flag / scoring subsystems.

pub mod config;
pub mod util;
pub mod ecs;
pub mod game;
pub mod net;
pub mod battle;
