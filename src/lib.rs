//! # SQL Query Assistant Library
//!
//! Natural-language and spoken questions answered with generated SQL.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod llm;
pub mod pipeline;
pub mod schema;
pub mod server;
pub mod speech;
pub mod translator;
