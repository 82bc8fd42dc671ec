//! CLI command implementations

pub mod build;
pub mod clear;
pub mod completions;
pub mod config;
pub mod detect;
pub mod query;
pub mod repos;
pub mod serve;
