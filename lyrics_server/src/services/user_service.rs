//! User accounts.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::user::{NewUser, User};
use crate::schema::users;

pub async fn create_user(conn: &mut AsyncPgConnection, new_user: NewUser) -> anyhow::Result<User> {
    let result = diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result(conn)
        .await?;
    Ok(result)
}

pub async fn get_user(conn: &mut AsyncPgConnection, user_id: i64) -> anyhow::Result<Option<User>> {
    let result = users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

pub async fn get_user_by_email(
    conn: &mut AsyncPgConnection,
    email: &str,
) -> anyhow::Result<Option<User>> {
    let result = users::table
        .filter(users::email.eq(email))
        .select(User::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

pub async fn get_user_by_username(
    conn: &mut AsyncPgConnection,
    username: &str,
) -> anyhow::Result<Option<User>> {
    let result = users::table
        .filter(users::username.eq(username))
        .select(User::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Username seed for an account created from an email address.
pub fn username_base(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default().trim();
    if local.is_empty() {
        "user".to_string()
    } else {
        local.to_string()
    }
}

/// `base`, then `base1`, `base2`, ...
pub fn username_candidate(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{base}{attempt}")
    }
}

/// First free username derived from `email`.
pub async fn unique_username(conn: &mut AsyncPgConnection, email: &str) -> anyhow::Result<String> {
    let base = username_base(email);
    for attempt in 0..1000 {
        let candidate = username_candidate(&base, attempt);
        if get_user_by_username(conn, &candidate).await?.is_none() {
            return Ok(candidate);
        }
    }
    anyhow::bail!("no free username for {email}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_come_from_the_email_local_part() {
        assert_eq!(username_base("ana.lima@example.com"), "ana.lima");
        assert_eq!(username_base("@example.com"), "user");
        assert_eq!(username_candidate("ana", 0), "ana");
        assert_eq!(username_candidate("ana", 3), "ana3");
    }
}
