//! Error taxonomy shared by every tablekit crate.
//!
//! Schema, mapping and relationship failures are reported when the metadata is
//! built; constraint and cardinality failures when a session flushes or links
//! entities; `NotFound` / `MultipleResultsFound` when a query's row count does
//! not match what the caller asked for.

use std::fmt;

/// Unified error type for tablekit.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A table is registered twice, or an existing table does not match its
    /// registered shape.
    #[error("Schema conflict on table '{table}': {reason}")]
    SchemaConflict {
        /// The table in question.
        table: String,
        /// What did not match.
        reason: String,
    },

    /// An entity is bound twice, or its fields do not line up with its table.
    #[error("Mapping conflict for {entity}: {reason}")]
    MappingConflict {
        /// Name of the entity type.
        entity: String,
        /// What did not match.
        reason: String,
    },

    /// A one-to-one relationship would end up with more than one child.
    #[error("Cardinality violation on {relationship}: {reason}")]
    CardinalityViolation {
        /// Relationship name, e.g. `User.profile`.
        relationship: String,
        /// What was attempted.
        reason: String,
    },

    /// A unique, not-null or foreign-key constraint rejected a write.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A query expected a row and found none.
    #[error("{entity} not found: {criteria}")]
    NotFound {
        /// Kind of entity that was queried.
        entity: String,
        /// Human-readable description of the criteria.
        criteria: String,
    },

    /// A query expected at most one row and found more.
    #[error("Multiple {entity} rows found where at most one was expected")]
    MultipleResultsFound {
        /// Kind of entity that was queried.
        entity: String,
    },

    /// A query could not be built, e.g. a join without a declared relationship.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The session cannot perform the operation in its current state.
    #[error("Session error: {0}")]
    SessionState(String),

    /// A column value could not be converted into the entity's field type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The storage engine reported an error.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new SchemaConflict error.
    pub fn schema_conflict(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaConflict {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create a new MappingConflict error.
    pub fn mapping_conflict(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MappingConflict {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Create a new CardinalityViolation error.
    pub fn cardinality(relationship: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CardinalityViolation {
            relationship: relationship.into(),
            reason: reason.into(),
        }
    }

    /// Create a new NotFound error.
    pub fn not_found(entity: impl Into<String>, criteria: impl fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            criteria: criteria.to_string(),
        }
    }

    /// Create a new MultipleResultsFound error.
    pub fn multiple_results(entity: impl Into<String>) -> Self {
        Self::MultipleResultsFound {
            entity: entity.into(),
        }
    }

    /// Create a new ConstraintViolation error.
    pub fn constraint<S: Into<String>>(msg: S) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    /// Create a new InvalidQuery error.
    pub fn invalid_query<S: Into<String>>(msg: S) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create a new SessionState error.
    pub fn session_state<S: Into<String>>(msg: S) -> Self {
        Self::SessionState(msg.into())
    }

    /// Create a new Decode error.
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// True for failures caused by the data rather than by the program:
    /// constraint and cardinality breaches and query row-count mismatches.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Error::ConstraintViolation(_)
                | Error::CardinalityViolation { .. }
                | Error::NotFound { .. }
                | Error::MultipleResultsFound { .. }
        )
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
