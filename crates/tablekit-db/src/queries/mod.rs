//! Typed query helpers for the blog models.

pub mod posts;
pub mod profiles;
pub mod users;
