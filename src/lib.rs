//! Tablekit - lessons on mapping Rust structs to SQLite tables
//!
//! This library crate exposes the lessons and configuration for integration testing.
//! The ORM itself lives in `tablekit-db`.

pub mod config;
pub mod lessons;
