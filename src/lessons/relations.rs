//! Lesson four: users with an optional profile and many posts.
//!
//! Each step opens its own session and closes it when done, so the steps
//! can run as separate commands against the same database file or all at
//! once through [`tour`].

use std::fmt;

use anyhow::{Context, Result};
use serde::Serialize;
use tablekit_db::models::{register_blog, Post, User, UserProfile};
use tablekit_db::queries::{posts, profiles, users};
use tablekit_db::{Engine, Row, Session};

use super::LessonOptions;

pub const DATABASE_FILE: &str = "example-04.db";

const USERS: [(&str, bool); 2] = [("admin", true), ("mark", false)];
const POSTS: [(&str, &str); 3] = [
    ("Django lesson", "admin"),
    ("Flask lesson", "mark"),
    ("FastAPI lesson", "mark"),
];
const TITLE_PATTERNS: [&str; 2] = ["%flask%", "%django%"];

/// Open the lesson database with the blog models registered.
pub fn open(options: &LessonOptions) -> Result<Engine> {
    let mut engine = options.open()?;
    register_blog(&mut engine)?;
    Ok(engine)
}

/// Create the users, profiles and posts tables.
pub fn init(engine: &Engine) -> Result<Vec<String>> {
    let created = engine.create_all()?;
    tracing::info!("Created tables: {:?}", created);
    Ok(created)
}

pub fn create_users(engine: &Engine) -> Result<Vec<User>> {
    let mut session = engine.session()?;
    let created = users::create_users(&mut session, &USERS).context("Failed to create users")?;
    session.close();
    Ok(created)
}

/// Give mark a profile.
pub fn add_profiles(engine: &Engine) -> Result<UserProfile> {
    let mut session = engine.session()?;
    let profile = profiles::add_profile(&mut session, "mark", "Mark", "Two")
        .context("Failed to add profile for mark")?;
    session.close();
    Ok(profile)
}

#[derive(Debug, Clone, Serialize)]
pub struct PostsReport {
    pub posts: Vec<Post>,
    /// Authors with their posts loaded after the commit.
    pub authors: Vec<User>,
}

pub fn create_posts(engine: &Engine) -> Result<PostsReport> {
    let mut session = engine.session()?;
    let created = posts::create_posts(&mut session, &POSTS).context("Failed to create posts")?;

    let mut authors = Vec::with_capacity(USERS.len());
    for (username, _) in USERS {
        authors.push(lookup(&session, username)?);
    }
    session.resolve_all(&User::POSTS, &mut authors)?;
    session.close();

    Ok(PostsReport {
        posts: created,
        authors,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowUsersReport {
    /// Loaded lazily: one query for the user, one per relationship.
    pub admin: User,
    pub admin_round_trips: u64,
    /// Loaded eagerly through query options.
    pub mark: User,
    pub mark_round_trips: u64,
}

pub fn show_users(engine: &Engine) -> Result<ShowUsersReport> {
    let session = engine.session()?;

    let start = session.round_trips();
    let mut admin = lookup(&session, "admin")?;
    session.resolve(&User::PROFILE, &mut admin)?;
    session.resolve(&User::POSTS, &mut admin)?;
    let admin_round_trips = session.round_trips() - start;

    let start = session.round_trips();
    let mark = users::get_with_related(&session, "mark")?;
    let mark_round_trips = session.round_trips() - start;

    session.close();
    Ok(ShowUsersReport {
        admin,
        admin_round_trips,
        mark,
        mark_round_trips,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterProfilesReport {
    /// Users whose profile first name is "mark", ignoring case.
    pub marks: Vec<User>,
    /// `SELECT * FROM USERS;` through the raw SQL escape hatch.
    pub raw: Vec<Row>,
}

pub fn filter_profiles(engine: &Engine) -> Result<FilterProfilesReport> {
    let session = engine.session()?;
    let marks = profiles::users_with_first_name(&session, "mark")?;
    let raw = session.execute("SELECT * FROM USERS;", &[])?;
    session.close();
    Ok(FilterProfilesReport { marks, raw })
}

#[derive(Debug, Clone, Serialize)]
pub struct PostMatch {
    pub user: User,
    pub post: Post,
}

/// Users paired with their posts about Flask or Django.
pub fn filter_posts(engine: &Engine) -> Result<Vec<PostMatch>> {
    let session = engine.session()?;
    let pairs = posts::users_with_posts_matching(&session, &TITLE_PATTERNS)?;
    session.close();
    Ok(pairs
        .into_iter()
        .map(|(user, post)| PostMatch { user, post })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct TourReport {
    pub created: Vec<String>,
    pub users: Vec<User>,
    pub profile: UserProfile,
    pub posts: PostsReport,
    pub show_users: ShowUsersReport,
    pub filter_profiles: FilterProfilesReport,
    pub filter_posts: Vec<PostMatch>,
}

/// Run every step in order against `engine`.
pub fn tour(engine: &Engine) -> Result<TourReport> {
    Ok(TourReport {
        created: init(engine)?,
        users: create_users(engine)?,
        profile: add_profiles(engine)?,
        posts: create_posts(engine)?,
        show_users: show_users(engine)?,
        filter_profiles: filter_profiles(engine)?,
        filter_posts: filter_posts(engine)?,
    })
}

fn lookup(session: &Session<'_>, username: &str) -> Result<User> {
    users::get_by_username(session, username)?
        .with_context(|| format!("No user named '{username}'; run create-users first"))
}

struct ProfileDisplay<'a>(&'a User);

impl fmt::Display for ProfileDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.profile.get() {
            Some(Some(profile)) => write!(f, "{profile}"),
            Some(None) => write!(f, "None"),
            None => write!(f, "<not loaded>"),
        }
    }
}

struct PostsDisplay<'a>(&'a User);

impl fmt::Display for PostsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.posts.get() {
            Some(posts) => {
                let posts: Vec<String> = posts.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", posts.join(", "))
            }
            None => write!(f, "<not loaded>"),
        }
    }
}

impl fmt::Display for PostsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for author in &self.authors {
            writeln!(
                f,
                "{} with posts {} {}",
                author.username,
                author,
                PostsDisplay(author)
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for ShowUsersReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (user, trips) in [
            (&self.admin, self.admin_round_trips),
            (&self.mark, self.mark_round_trips),
        ] {
            writeln!(
                f,
                "{} with profile and posts {} {} {} ({} queries)",
                user.username,
                user,
                ProfileDisplay(user),
                PostsDisplay(user),
                trips
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for FilterProfilesReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marks: Vec<String> = self.marks.iter().map(ToString::to_string).collect();
        writeln!(f, "marks: [{}]", marks.join(", "))?;
        writeln!(f, "pure SQL:")?;
        for row in &self.raw {
            let line = serde_json::to_string(row).map_err(|_| fmt::Error)?;
            writeln!(f, "  {line}")?;
        }
        Ok(())
    }
}

impl fmt::Display for PostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "user {} (profile: {})", self.user, ProfileDisplay(&self.user))?;
        writeln!(f, "his matched posts: {}", self.post)
    }
}

impl fmt::Display for TourReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.created.is_empty() {
            writeln!(f, "Created tables: {}", self.created.join(", "))?;
        }
        let users: Vec<String> = self.users.iter().map(ToString::to_string).collect();
        writeln!(f, "Created users: {}", users.join(", "))?;
        writeln!(f, "Added profile: {}", self.profile)?;
        writeln!(f)?;
        write!(f, "{}", self.posts)?;
        writeln!(f)?;
        write!(f, "{}", self.show_users)?;
        writeln!(f)?;
        write!(f, "{}", self.filter_profiles)?;
        writeln!(f)?;
        writeln!(f, "users with flask or django posts:")?;
        for found in &self.filter_posts {
            write!(f, "{found}")?;
        }
        Ok(())
    }
}
