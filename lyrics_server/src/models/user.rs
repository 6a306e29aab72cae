//! users: Registered accounts (password or Google sign-in).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::users;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i64,
    pub name: Option<String>,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub is_active: bool,
    pub profile_picture_url: Option<String>,
    pub create_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub name: Option<String>,
    pub username: String,
    pub email: String,
    pub hashed_password: String,
    pub profile_picture_url: Option<String>,
}

/// Public view of a user, as returned by the auth endpoints.
#[derive(Debug, Serialize)]
pub struct UserJson {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub name: Option<String>,
    pub profile_picture_url: Option<String>,
    pub is_active: bool,
}

impl From<User> for UserJson {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            name: user.name,
            profile_picture_url: user.profile_picture_url,
            is_active: user.is_active,
        }
    }
}
