// Core library for the local trigger scheduler: trigger data model, date
// matching, poll engine, and document serialization

pub mod config;
pub mod engine;
pub mod errors;
pub mod import_export;
pub mod models;
pub mod schedule;
pub mod telemetry;
