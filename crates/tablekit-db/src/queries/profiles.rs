//! Profile creation and profile-based user search.

use tablekit_common::{Error, Result};

use crate::models::{User, UserProfile};
use crate::session::Session;

/// Give `username` a profile and commit it.
///
/// Fails with `NotFound` for an unknown user and `CardinalityViolation` when
/// the user already has a profile.
pub fn add_profile(
    session: &mut Session<'_>,
    username: &str,
    first_name: &str,
    last_name: &str,
) -> Result<UserProfile> {
    let user = super::users::get_by_username(session, username)?
        .ok_or_else(|| Error::not_found("User", format!("users.username = '{username}'")))?;

    let mut profile = UserProfile::new(first_name, last_name);
    session.attach(&User::PROFILE, &user, &mut profile)?;
    let handle = session.add(profile)?;
    session.commit()?;
    session
        .get(handle)
        .cloned()
        .ok_or_else(|| Error::internal("committed profile is no longer tracked"))
}

/// Users whose profile first name matches `pattern`, ignoring case.
pub fn users_with_first_name(session: &Session<'_>, pattern: &str) -> Result<Vec<User>> {
    session
        .query::<User>()
        .join(User::PROFILE)
        .filter(UserProfile::FIRST_NAME.ilike(pattern))
        .all()
}
