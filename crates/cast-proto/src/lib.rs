//! Shared types for the NeuralCast player: data model, engine boundary,
//! UI wire protocol, configuration and station catalog.

pub mod config;
pub mod engine;
pub mod platform;
pub mod protocol;
pub mod stations;
