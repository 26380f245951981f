use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tablekit")]
#[command(author, version, about = "Lessons on mapping Rust structs to SQLite tables")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database connection string, e.g. sqlite:///blog.db (overrides config)
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Log every SQL statement
    #[arg(long, global = true)]
    pub echo: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Lesson 1: declare the users table by hand and create it
    Table,

    /// Lesson 2: bind a plain struct to a registered users table
    Classic,

    /// Lesson 3: create the users table from a declarative model
    Declarative,

    /// Lesson 4: create the users, profiles and posts tables
    Init,

    /// Lesson 4: create the users admin and mark
    CreateUsers,

    /// Lesson 4: give mark a profile
    AddProfiles,

    /// Lesson 4: create posts for admin and mark
    CreatePosts,

    /// Lesson 4: show users with their profile and posts
    ShowUsers,

    /// Lesson 4: find users by profile first name, then run raw SQL
    FilterProfiles,

    /// Lesson 4: find users with posts about Flask or Django
    FilterPosts,

    /// Run every lesson 4 step in order
    Tour,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
