// src/lib.rs

pub mod config;
pub mod store;
pub mod llm;
pub mod context;
pub mod executor;
pub mod orchestrator;
pub mod cli;
