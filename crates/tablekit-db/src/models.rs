//! Blog domain: users, their optional profile, and their posts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tablekit_common::{PostId, ProfileId, Result, UserId};

use crate::engine::Engine;
use crate::mapper::{Declarative, Entity};
use crate::query::Col;
use crate::relationship::{Backref, Related, Relationship};
use crate::schema::{ColumnSpec, ColumnType, ServerDefault};
use crate::value::{Row, Value};

/// A user account.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct User {
    pub id: Option<UserId>,
    pub username: String,
    pub is_staff: bool,
    /// Set by the database on insert when left empty.
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Related::is_unresolved")]
    pub posts: Related<Vec<Post>>,
    #[serde(skip_serializing_if = "Related::is_unresolved")]
    pub profile: Related<Option<UserProfile>>,
}

/// Personal details, at most one per user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserProfile {
    pub id: Option<ProfileId>,
    pub first_name: String,
    pub last_name: String,
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Related::is_unresolved")]
    pub user: Related<User>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Post {
    pub id: Option<PostId>,
    pub title: String,
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Related::is_unresolved")]
    pub user: Related<User>,
}

impl User {
    pub const ID: Col = Col::new("users", "id");
    pub const USERNAME: Col = Col::new("users", "username");
    pub const IS_STAFF: Col = Col::new("users", "is_staff");
    pub const CREATED_AT: Col = Col::new("users", "created_at");

    pub const POSTS: Relationship<User, Post> = Relationship::one_to_many(
        "posts",
        "user",
        "user_id",
        user_posts,
        post_user,
        post_user_id,
        set_post_user_id,
    );

    pub const PROFILE: Relationship<User, UserProfile> = Relationship::one_to_one(
        "profile",
        "user",
        "user_id",
        user_profile,
        profile_user,
        profile_user_id,
        set_profile_user_id,
    );

    pub fn new(username: impl Into<String>, is_staff: bool) -> Self {
        Self {
            username: username.into(),
            is_staff,
            ..Self::default()
        }
    }
}

impl UserProfile {
    pub const ID: Col = Col::new("user_profiles", "id");
    pub const FIRST_NAME: Col = Col::new("user_profiles", "first_name");
    pub const LAST_NAME: Col = Col::new("user_profiles", "last_name");
    pub const USER_ID: Col = Col::new("user_profiles", "user_id");

    pub const USER: Backref<User, UserProfile> = User::PROFILE.backref();

    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            ..Self::default()
        }
    }
}

impl Post {
    pub const ID: Col = Col::new("posts", "id");
    pub const TITLE: Col = Col::new("posts", "title");
    pub const USER_ID: Col = Col::new("posts", "user_id");

    pub const USER: Backref<User, Post> = User::POSTS.backref();

    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

fn user_posts(user: &mut User) -> &mut Related<Vec<Post>> {
    &mut user.posts
}

fn user_profile(user: &mut User) -> &mut Related<Option<UserProfile>> {
    &mut user.profile
}

fn post_user(post: &mut Post) -> &mut Related<User> {
    &mut post.user
}

fn post_user_id(post: &Post) -> Option<i64> {
    post.user_id.map(Into::into)
}

fn set_post_user_id(post: &mut Post, id: i64) {
    post.user_id = Some(id.into());
}

fn profile_user(profile: &mut UserProfile) -> &mut Related<User> {
    &mut profile.user
}

fn profile_user_id(profile: &UserProfile) -> Option<i64> {
    profile.user_id.map(Into::into)
}

fn set_profile_user_id(profile: &mut UserProfile, id: i64) {
    profile.user_id = Some(id.into());
}

impl Entity for User {
    const NAME: &'static str = "User";
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["id", "username", "is_staff", "created_at"];

    fn key(&self) -> Option<i64> {
        self.id.map(Into::into)
    }

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("username", self.username.as_str().into()),
            ("is_staff", self.is_staff.into()),
            ("created_at", self.created_at.into()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: Some(row.get_i64("id")?.into()),
            username: row.get_string("username")?,
            is_staff: row.get_bool("is_staff")?,
            created_at: Some(row.get_timestamp("created_at")?),
            ..Self::default()
        })
    }
}

impl Declarative for User {
    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::primary_key("id"),
            ColumnSpec::new("username", ColumnType::string(32))
                .unique()
                .not_null()
                .default("")
                .server_default(ServerDefault::text("")),
            ColumnSpec::new("is_staff", ColumnType::Boolean)
                .not_null()
                .default(false)
                .server_default(ServerDefault::literal("0")),
            ColumnSpec::new("created_at", ColumnType::Timestamp)
                .not_null()
                .default_now()
                .server_default(ServerDefault::CurrentTimestamp),
        ]
    }
}

impl Entity for UserProfile {
    const NAME: &'static str = "UserProfile";
    const TABLE: &'static str = "user_profiles";
    const COLUMNS: &'static [&'static str] = &["id", "first_name", "last_name", "user_id"];

    fn key(&self) -> Option<i64> {
        self.id.map(Into::into)
    }

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("first_name", self.first_name.as_str().into()),
            ("last_name", self.last_name.as_str().into()),
            ("user_id", self.user_id.into()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: Some(row.get_i64("id")?.into()),
            first_name: row.get_string("first_name")?,
            last_name: row.get_string("last_name")?,
            user_id: row.get_opt_i64("user_id")?.map(Into::into),
            ..Self::default()
        })
    }
}

impl Declarative for UserProfile {
    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::primary_key("id"),
            ColumnSpec::new("first_name", ColumnType::string(120))
                .not_null()
                .default("")
                .server_default(ServerDefault::text("")),
            ColumnSpec::new("last_name", ColumnType::string(120))
                .not_null()
                .default("")
                .server_default(ServerDefault::text("")),
            ColumnSpec::new("user_id", ColumnType::Integer)
                .not_null()
                .unique()
                .references("users", "id"),
        ]
    }
}

impl Entity for Post {
    const NAME: &'static str = "Post";
    const TABLE: &'static str = "posts";
    const COLUMNS: &'static [&'static str] = &["id", "title", "user_id"];

    fn key(&self) -> Option<i64> {
        self.id.map(Into::into)
    }

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("title", self.title.as_str().into()),
            ("user_id", self.user_id.into()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: Some(row.get_i64("id")?.into()),
            title: row.get_string("title")?,
            user_id: row.get_opt_i64("user_id")?.map(Into::into),
            ..Self::default()
        })
    }
}

impl Declarative for Post {
    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::primary_key("id"),
            ColumnSpec::new("title", ColumnType::string(90))
                .not_null()
                .default("")
                .server_default(ServerDefault::text("")),
            ColumnSpec::new("user_id", ColumnType::Integer)
                .not_null()
                .references("users", "id"),
        ]
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "User #{id} username:{}", self.username),
            None => write!(f, "User #? username:{}", self.username),
        }
    }
}

impl fmt::Display for UserProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.first_name, self.last_name)
    }
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user_id {
            Some(id) => write!(f, "{} by #{id}", self.title),
            None => write!(f, "{} by #?", self.title),
        }
    }
}

/// Register the blog tables, bind the models and declare their relationships.
pub fn register_blog(engine: &mut Engine) -> Result<()> {
    engine.register_entity::<User>()?;
    engine.register_entity::<UserProfile>()?;
    engine.register_entity::<Post>()?;
    engine.declare_relationship(User::POSTS)?;
    engine.declare_relationship(User::PROFILE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::Cardinality;

    #[test]
    fn test_display() {
        let mut user = User::new("mark", false);
        assert_eq!(user.to_string(), "User #? username:mark");
        user.id = Some(UserId::from(2));
        assert_eq!(user.to_string(), "User #2 username:mark");

        assert_eq!(UserProfile::new("Mark", "Two").to_string(), "Mark Two");

        let mut post = Post::new("Flask lesson");
        post.user_id = Some(UserId::from(2));
        assert_eq!(post.to_string(), "Flask lesson by #2");
    }

    #[test]
    fn test_register_blog() {
        let mut engine = Engine::memory().unwrap();
        register_blog(&mut engine).unwrap();
        assert!(engine.mapper().is_bound::<User>());
        assert_eq!(engine.relations().declared().len(), 2);
        assert_eq!(User::PROFILE.cardinality(), Cardinality::OneToOne);
        assert_eq!(User::POSTS.cardinality(), Cardinality::OneToMany);

        let created = engine.create_all().unwrap();
        assert_eq!(created, vec!["users", "user_profiles", "posts"]);
    }

    #[test]
    fn test_register_blog_twice_conflicts() {
        let mut engine = Engine::memory().unwrap();
        register_blog(&mut engine).unwrap();
        let err = register_blog(&mut engine).unwrap_err();
        assert!(matches!(err, tablekit_common::Error::MappingConflict { .. }));
    }

    #[test]
    fn test_unresolved_relations_are_not_serialized() {
        let user = User {
            id: Some(UserId::from(1)),
            ..User::new("admin", true)
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 1,
                "username": "admin",
                "is_staff": true,
                "created_at": null
            })
        );
    }
}
