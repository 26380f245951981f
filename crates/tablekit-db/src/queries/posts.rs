//! Post creation and title search.

use tablekit_common::{Error, Result};

use crate::models::{Post, User, UserProfile};
use crate::query::{eager, or};
use crate::session::Session;

/// Stage and commit one post per `(title, author username)` pair.
pub fn create_posts(session: &mut Session<'_>, posts: &[(&str, &str)]) -> Result<Vec<Post>> {
    let mut handles = Vec::with_capacity(posts.len());
    for (title, username) in posts {
        let author = super::users::get_by_username(session, username)?
            .ok_or_else(|| Error::not_found("User", format!("users.username = '{username}'")))?;
        let mut post = Post::new(*title);
        session.attach(&User::POSTS, &author, &mut post)?;
        handles.push(session.add(post)?);
    }
    session.commit()?;
    Ok(handles
        .into_iter()
        .filter_map(|handle| session.get(handle).cloned())
        .collect())
}

/// `(author, post)` pairs for posts whose title matches any of `patterns`,
/// ignoring case, with each author's profile loaded.
pub fn users_with_posts_matching(
    session: &Session<'_>,
    patterns: &[&str],
) -> Result<Vec<(User, Post)>> {
    session
        .query_pair::<User, Post>()
        .join(User::POSTS)
        .filter(or(patterns.iter().map(|p| Post::TITLE.ilike(*p))))
        .options(eager(User::PROFILE))
        .all()
}

/// Profiles of the authors of posts matching `pattern`, reached from the post side.
pub fn author_profiles(session: &Session<'_>, pattern: &str) -> Result<Vec<UserProfile>> {
    session
        .query::<UserProfile>()
        .join(UserProfile::USER)
        .join(Post::USER)
        .filter(Post::TITLE.ilike(pattern))
        .distinct()
        .all()
}
