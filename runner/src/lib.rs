pub mod config;
pub mod database;
pub mod generator;
pub mod orchestrator;
pub mod report;
