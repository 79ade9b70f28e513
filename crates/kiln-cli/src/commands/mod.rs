//! Command implementations.
//!
//! - [`build`] - clean, compile and, in hot mode, serve
//! - [`schema`] - print the settings JSON Schema

pub mod build;
pub mod schema;

pub use build::execute as build_execute;
pub use schema::execute as schema_execute;
