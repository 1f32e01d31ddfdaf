// Common library for the changegate scheduled sync runner

pub mod config;
pub mod controller;
pub mod errors;
pub mod executor;
pub mod lock;
pub mod models;
pub mod publisher;
pub mod retry;
pub mod schedule;
pub mod snapshot;
pub mod store;
pub mod telemetry;
pub mod webhook;
