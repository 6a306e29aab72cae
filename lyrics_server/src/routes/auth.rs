//! Sign-up, sign-in, Google sign-in and the bearer-token extractor.

use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::user::{NewUser, User, UserJson};
use crate::routes::AppState;
use crate::services::{auth_service, user_service};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/signin", post(signin))
        .route("/google", post(google))
        .route("/users/me", get(me))
}

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
pub struct CurrentUser(pub User);

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(ApiError::credentials)?;

        let claims = auth_service::decode_access_token(&state.config.secret_key, token).map_err(|e| {
            tracing::debug!("Rejected access token: {e}");
            ApiError::credentials()
        })?;
        let user_id = claims.user_id().ok_or_else(ApiError::credentials)?;

        let mut conn = state.pool.get().await?;
        let user = user_service::get_user(&mut conn, user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(ApiError::credentials)?;
        Ok(CurrentUser(user))
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub name: Option<String>,
}

impl SignupRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let email = self.email.trim();
        let valid_email = email
            .split_once('@')
            .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
            .unwrap_or(false);
        if !valid_email {
            return Err(ApiError::Unprocessable("A valid email address is required".into()));
        }
        if self.username.trim().is_empty() {
            return Err(ApiError::Unprocessable("Username must not be empty".into()));
        }
        if self.password.is_empty() {
            return Err(ApiError::Unprocessable("Password must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleRequest {
    pub credential: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

fn issue_token(state: &AppState, user_id: i64) -> Result<Json<TokenResponse>, ApiError> {
    let access_token = auth_service::create_access_token(
        &state.config.secret_key,
        user_id,
        state.config.access_token_expire_minutes,
    )?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<UserJson>, ApiError> {
    req.validate()?;
    let email = req.email.trim().to_string();
    let username = req.username.trim().to_string();

    let mut conn = state.pool.get().await?;
    if user_service::get_user_by_email(&mut conn, &email).await?.is_some() {
        return Err(ApiError::BadRequest("Email already registered".into()));
    }
    if user_service::get_user_by_username(&mut conn, &username).await?.is_some() {
        return Err(ApiError::BadRequest("Username already taken".into()));
    }

    let hashed_password = auth_service::hash_password(&req.password)?;
    let user = user_service::create_user(
        &mut conn,
        NewUser {
            name: req.name,
            username,
            email,
            hashed_password,
            profile_picture_url: None,
        },
    )
    .await
    .map_err(duplicate_account)?;

    tracing::info!(user_id = user.id, "User registered");
    Ok(Json(user.into()))
}

/// A concurrent signup can pass the checks above and still lose on the
/// unique indexes of `users`.
fn duplicate_account(err: anyhow::Error) -> ApiError {
    match err.downcast_ref::<DieselError>() {
        Some(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)) => {
            if info.constraint_name().is_some_and(|c| c.contains("username")) {
                ApiError::BadRequest("Username already taken".into())
            } else {
                ApiError::BadRequest("Email already registered".into())
            }
        }
        _ => err.into(),
    }
}

async fn signin(
    State(state): State<AppState>,
    Json(req): Json<SigninRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let mut conn = state.pool.get().await?;
    let user = user_service::get_user_by_username(&mut conn, req.username.trim()).await?;

    match user {
        Some(user) if user.is_active && auth_service::verify_password(&req.password, &user.hashed_password) => {
            issue_token(&state, user.id)
        }
        _ => Err(ApiError::Unauthorized("Incorrect username or password".into())),
    }
}

async fn google(
    State(state): State<AppState>,
    Json(req): Json<GoogleRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if state.config.google_client_id.is_empty() {
        return Err(ApiError::ServiceUnavailable("Google sign-in is not configured".into()));
    }

    let identity =
        auth_service::verify_google_credential(&state.http, &state.config.google_client_id, &req.credential)
            .await
            .map_err(|e| {
                tracing::warn!("Google credential rejected: {e:#}");
                ApiError::Unauthorized("Invalid Google credential".into())
            })?;

    let mut conn = state.pool.get().await?;
    let user = match user_service::get_user_by_email(&mut conn, &identity.email).await? {
        Some(user) => user,
        None => {
            let username = user_service::unique_username(&mut conn, &identity.email).await?;
            let user = user_service::create_user(
                &mut conn,
                NewUser {
                    name: identity.name,
                    username,
                    email: identity.email,
                    hashed_password: auth_service::UNUSABLE_PASSWORD.to_string(),
                    profile_picture_url: identity.picture,
                },
            )
            .await?;
            tracing::info!(user_id = user.id, "User registered through Google");
            user
        }
    };

    if !user.is_active {
        return Err(ApiError::credentials());
    }
    issue_token(&state, user.id)
}

async fn me(CurrentUser(user): CurrentUser) -> Json<UserJson> {
    Json(user.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer  tok "), Some("tok"));
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("token"), None);
    }

    #[test]
    fn signup_requires_plausible_email() {
        let req = |email: &str| SignupRequest {
            email: email.to_string(),
            username: "ana".to_string(),
            password: "secret".to_string(),
            name: None,
        };
        assert!(req("ana@example.com").validate().is_ok());
        assert!(req("ana").validate().is_err());
        assert!(req("@example.com").validate().is_err());
        assert!(req("ana@localhost").validate().is_err());
    }

    struct UniqueViolation(&'static str);

    impl diesel::result::DatabaseErrorInformation for UniqueViolation {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }
        fn details(&self) -> Option<&str> {
            None
        }
        fn hint(&self) -> Option<&str> {
            None
        }
        fn table_name(&self) -> Option<&str> {
            Some("users")
        }
        fn column_name(&self) -> Option<&str> {
            None
        }
        fn constraint_name(&self) -> Option<&str> {
            Some(self.0)
        }
        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    fn unique_violation(constraint: &'static str) -> anyhow::Error {
        DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new(UniqueViolation(constraint)),
        )
        .into()
    }

    #[test]
    fn lost_signup_race_is_a_bad_request() {
        match duplicate_account(unique_violation("users_email_key")) {
            ApiError::BadRequest(detail) => assert_eq!(detail, "Email already registered"),
            other => panic!("unexpected {other:?}"),
        }
        match duplicate_account(unique_violation("users_username_key")) {
            ApiError::BadRequest(detail) => assert_eq!(detail, "Username already taken"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_insert_errors_stay_internal() {
        let err = anyhow::Error::from(DieselError::NotFound);
        assert!(matches!(duplicate_account(err), ApiError::Internal(_)));
    }
}
