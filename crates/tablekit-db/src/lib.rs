//! Tablekit-DB: a small object-relational layer over SQLite.
//!
//! Tables are declared in a schema registry, plain structs are bound to them
//! through the entity mapper, foreign-key links become navigable
//! relationships, and a session stages writes and commits them in one
//! transaction. Connections come from an r2d2 pool over rusqlite.
//!
//! # Modules
//!
//! - `pool` - Connection pool management
//! - `value` - Column values and untyped rows
//! - `schema` - Table declarations and `CREATE TABLE` materialisation
//! - `mapper` - Entity traits and bindings
//! - `relationship` - One-to-many and one-to-one navigation
//! - `session` - Unit of work
//! - `query` - Predicates and query execution
//! - `engine` - Pool plus registries, hands out sessions
//! - `models` - Users, profiles and posts
//! - `queries` - Typed helpers over the models
//!
//! # Example
//!
//! ```no_run
//! use tablekit_db::engine::Engine;
//! use tablekit_db::models::{register_blog, User};
//!
//! let mut engine = Engine::open("sqlite:///example-04.db", 4).unwrap();
//! register_blog(&mut engine).unwrap();
//! engine.create_all().unwrap();
//!
//! let mut session = engine.session().unwrap();
//! session.add(User::new("admin", true)).unwrap();
//! session.commit().unwrap();
//!
//! let admin = session.query::<User>().filter_by("username", "admin").one().unwrap();
//! println!("{admin}");
//! ```

pub mod engine;
pub mod mapper;
pub mod models;
pub mod pool;
pub mod queries;
pub mod query;
pub mod relationship;
pub mod schema;
pub mod session;
pub mod value;

pub use engine::Engine;
pub use mapper::{Declarative, Entity};
pub use query::{and, eager, not, or, Col, Predicate};
pub use relationship::{Related, Relationship};
pub use session::Session;
pub use value::{Row, Value};
