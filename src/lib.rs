pub mod catalog;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod identity;
pub mod models;
pub mod normalizer;
pub mod pipelines;
pub mod utils;
pub mod web;

pub use engine::TelemetryEngine;
