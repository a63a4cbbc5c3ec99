pub mod analysis;
pub mod config;
pub mod engine;
pub mod events;
pub mod gesture;
pub mod mood;
pub mod server;
pub mod services;
pub mod tracker;
