//! Integration tests for the activity generation pipeline

mod citations;
mod config_integration;
mod pipeline;
mod repair_loop;
mod schema_contract;
pub mod test_utils;
