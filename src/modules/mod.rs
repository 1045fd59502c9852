//! Modules layer - Infrastructure components behind the features
//!
//! Hashing, metadata extraction, persistence and storage adapters.

pub mod hashing;
pub mod metadata;
pub mod persistence;
pub mod storage;
