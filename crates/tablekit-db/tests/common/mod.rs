//! Shared fixtures for tablekit-db integration tests.
//!
//! [`blog_engine`] builds an engine over a private in-memory database with the
//! blog models registered and their tables created.

#![allow(dead_code)]

use tablekit_db::models::{register_blog, Post, User, UserProfile};
use tablekit_db::{Engine, Session};

pub fn blog_engine() -> Engine {
    let mut engine = Engine::memory().expect("failed to create in-memory engine");
    register_blog(&mut engine).expect("failed to register blog models");
    engine.create_all().expect("failed to create tables");
    engine
}

/// Commit `admin` (staff) and `mark`, returning them with keys assigned.
pub fn seed_users(session: &mut Session<'_>) -> (User, User) {
    let admin = session.add(User::new("admin", true)).unwrap();
    let mark = session.add(User::new("mark", false)).unwrap();
    session.commit().unwrap();
    (
        session.get(admin).unwrap().clone(),
        session.get(mark).unwrap().clone(),
    )
}

/// Seed the full blog: both users, a profile for mark, and three posts.
pub fn seed_blog(session: &mut Session<'_>) -> (User, User) {
    let (admin, mark) = seed_users(session);

    let mut profile = UserProfile::new("Mark", "Two");
    session.attach(&User::PROFILE, &mark, &mut profile).unwrap();
    session.add(profile).unwrap();

    for (title, author) in [
        ("Django lesson", &admin),
        ("Flask lesson", &mark),
        ("FastAPI lesson", &mark),
    ] {
        let mut post = Post::new(title);
        session.attach(&User::POSTS, author, &mut post).unwrap();
        session.add(post).unwrap();
    }
    session.commit().unwrap();
    (admin, mark)
}
