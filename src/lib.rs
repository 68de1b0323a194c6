//! Content-addressed upload gateway.
//!
//! Uploads are hashed with SHA-256, stored in an S3-compatible bucket under a
//! key derived from the digest, and recorded in SQLite so they can later be
//! found again by any unambiguous prefix of their hash.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

#[cfg(test)]
mod testing;
