#[cfg(feature = "devel")]
pub mod debug;

pub mod game;
pub mod physics;
pub mod portal;
pub mod render;
