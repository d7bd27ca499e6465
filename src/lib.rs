//! Library crate for craftrelay, exposing modules for the binaries and tests.

pub mod config;
/// Storage backends, shard documents and the remote-console client.
pub mod dao;
/// Request, response and wire payload types.
pub mod dto;
/// Error types and their HTTP mapping.
pub mod error;
/// Axum route trees.
pub mod routes;
/// Domain services behind the routes.
pub mod services;
/// Shared application state and its building blocks.
pub mod state;
