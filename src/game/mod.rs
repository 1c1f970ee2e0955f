pub mod context;
pub mod map;
pub mod persistence;
pub mod physics;
