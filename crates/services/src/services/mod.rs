pub mod config;
pub mod dashboard;
pub mod discord;
pub mod forum_sync;
pub mod mapping;
pub mod render;
pub mod surface;
pub mod task;
pub mod trigger;
