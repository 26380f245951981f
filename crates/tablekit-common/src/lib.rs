//! Tablekit-Common: shared error taxonomy and typed IDs.
//!
//! - **Error Handling**: [`Error`] covers schema, mapping, cardinality,
//!   constraint and query-cardinality failures, with a [`Result`] alias
//! - **Typed IDs**: integer surrogate keys for users, profiles and posts
//!
//! # Examples
//!
//! ```
//! use tablekit_common::{Error, Result, UserId};
//!
//! let id = UserId::from(1);
//! assert_eq!(id.get(), 1);
//!
//! fn lookup() -> Result<()> {
//!     Err(Error::not_found("User", "username = 'ghost'"))
//! }
//! assert!(lookup().is_err());
//! ```

pub mod error;
pub mod ids;

pub use error::{Error, Result};
pub use ids::*;
