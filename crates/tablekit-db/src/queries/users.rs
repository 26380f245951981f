//! User lookups and creation.

use tablekit_common::Result;

use crate::models::User;
use crate::query::eager;
use crate::session::Session;

/// Stage and commit one user per `(username, is_staff)` pair.
pub fn create_users(session: &mut Session<'_>, users: &[(&str, bool)]) -> Result<Vec<User>> {
    let handles = users
        .iter()
        .map(|(username, is_staff)| session.add(User::new(*username, *is_staff)))
        .collect::<Result<Vec<_>>>()?;
    session.commit()?;
    Ok(handles
        .into_iter()
        .filter_map(|handle| session.get(handle).cloned())
        .collect())
}

/// Get a user by username, if there is one.
pub fn get_by_username(session: &Session<'_>, username: &str) -> Result<Option<User>> {
    session
        .query::<User>()
        .filter_by("username", username)
        .one_or_none()
}

/// Get a user by username with posts and profile loaded in the same call.
pub fn get_with_related(session: &Session<'_>, username: &str) -> Result<User> {
    session
        .query::<User>()
        .filter_by("username", username)
        .options(eager(User::PROFILE))
        .options(eager(User::POSTS))
        .one()
}

/// List all users by key.
pub fn list_users(session: &Session<'_>) -> Result<Vec<User>> {
    session.query::<User>().all()
}
