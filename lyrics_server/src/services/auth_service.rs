//! Passwords, access tokens and Google sign-in.
//!
//! Access tokens are compact HS256 JWTs `{sub, iat, exp}` where `sub` is the
//! user id. Passwords are stored as argon2 PHC strings.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Stored for accounts that can only sign in through Google. Not a valid
/// PHC string, so no password ever verifies against it.
pub const UNUSABLE_PASSWORD: &str = "!google-account";

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hashed: &str) -> bool {
    match PasswordHash::new(hashed) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm")]
    Algorithm,
    #[error("bad signature")]
    Signature,
    #[error("token expired")]
    Expired,
    #[error("invalid signing key")]
    Key,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: Option<String>,
}

fn mac_for(secret: &str, signing_input: &str) -> Result<HmacSha256, TokenError> {
    let mut mac = <HmacSha256 as KeyInit>::new_from_slice(secret.as_bytes())
        .map_err(|_| TokenError::Key)?;
    mac.update(signing_input.as_bytes());
    Ok(mac)
}

/// Sign `claims` as an HS256 JWT.
pub fn encode_token(secret: &str, claims: &Claims) -> anyhow::Result<String> {
    let header = serde_json::to_vec(&Header {
        alg: "HS256".to_string(),
        typ: Some("JWT".to_string()),
    })?;
    let payload = serde_json::to_vec(claims)?;
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = mac_for(secret, &signing_input)?.finalize().into_bytes();
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Issue a token for `user_id` valid for `expire_minutes`.
pub fn create_access_token(
    secret: &str,
    user_id: i64,
    expire_minutes: i64,
) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp();
    encode_token(
        secret,
        &Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + expire_minutes * 60,
        },
    )
}

/// Verify signature and expiry at `now` (unix seconds).
pub fn decode_token_at(secret: &str, token: &str, now: i64) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let header: Header = URL_SAFE_NO_PAD
        .decode(header_b64)
        .ok()
        .and_then(|b| serde_json::from_slice(&b).ok())
        .ok_or(TokenError::Malformed)?;
    if header.alg != "HS256" {
        return Err(TokenError::Algorithm);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| TokenError::Malformed)?;
    let signing_input = format!("{header_b64}.{payload_b64}");
    mac_for(secret, &signing_input)?
        .verify_slice(&signature)
        .map_err(|_| TokenError::Signature)?;

    let claims: Claims = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .ok()
        .and_then(|b| serde_json::from_slice(&b).ok())
        .ok_or(TokenError::Malformed)?;
    if claims.exp <= now {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

pub fn decode_access_token(secret: &str, token: &str) -> Result<Claims, TokenError> {
    decode_token_at(secret, token, chrono::Utc::now().timestamp())
}

// ── Google sign-in ──

/// Identity asserted by a verified Google ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleIdentity {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: Option<String>,
    email: Option<String>,
    // Google returns "true"/"false" as strings here.
    email_verified: Option<serde_json::Value>,
    name: Option<String>,
    picture: Option<String>,
}

fn identity_from_tokeninfo(info: TokenInfo, client_id: &str) -> anyhow::Result<GoogleIdentity> {
    if info.aud.as_deref() != Some(client_id) {
        anyhow::bail!("Google token was issued for another client");
    }
    let verified = match &info.email_verified {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    let email = info
        .email
        .filter(|e| !e.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Google token carries no email"))?;
    if !verified {
        anyhow::bail!("Google email {email} is not verified");
    }
    Ok(GoogleIdentity {
        email,
        name: info.name,
        picture: info.picture,
    })
}

/// Validate an ID token with Google's tokeninfo endpoint.
pub async fn verify_google_credential(
    http: &reqwest::Client,
    client_id: &str,
    id_token: &str,
) -> anyhow::Result<GoogleIdentity> {
    if client_id.is_empty() {
        anyhow::bail!("GOOGLE_CLIENT_ID not configured");
    }
    let resp = http
        .get(TOKENINFO_URL)
        .query(&[("id_token", id_token)])
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("Google rejected the credential: {}", resp.status());
    }
    let info: TokenInfo = resp.json().await?;
    identity_from_tokeninfo(info, client_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn passwords_verify_only_against_their_hash() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("anything", UNUSABLE_PASSWORD));
    }

    #[test]
    fn token_round_trips_user_id() {
        let token = create_access_token(SECRET, 42, 30).unwrap();
        assert_eq!(token.split('.').count(), 3);
        let claims = decode_access_token(SECRET, &token).unwrap();
        assert_eq!(claims.user_id(), Some(42));
        assert_eq!(claims.exp - claims.iat, 30 * 60);
    }

    #[test]
    fn secrets_of_any_length_sign_tokens() {
        let long_secret = "k".repeat(200);
        for secret in ["", "short", long_secret.as_str()] {
            let token = create_access_token(secret, 7, 5).unwrap();
            assert_eq!(decode_access_token(secret, &token).unwrap().user_id(), Some(7));
        }
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let token = create_access_token(SECRET, 1, 30).unwrap();
        assert_eq!(
            decode_access_token("other-secret", &token),
            Err(TokenError::Signature)
        );

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"2","iat":0,"exp":99999999999}"#);
        parts[1] = &forged;
        assert_eq!(
            decode_access_token(SECRET, &parts.join(".")),
            Err(TokenError::Signature)
        );
        assert_eq!(decode_access_token(SECRET, "abc"), Err(TokenError::Malformed));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let claims = Claims {
            sub: "5".to_string(),
            iat: 1_000,
            exp: 2_000,
        };
        let token = encode_token(SECRET, &claims).unwrap();
        assert_eq!(decode_token_at(SECRET, &token, 1_999), Ok(claims));
        assert_eq!(decode_token_at(SECRET, &token, 2_000), Err(TokenError::Expired));
    }

    #[test]
    fn non_hs256_headers_are_refused() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"1","iat":0,"exp":99999999999}"#);
        let token = format!("{header}.{payload}.");
        assert_eq!(decode_access_token(SECRET, &token), Err(TokenError::Algorithm));
    }

    #[test]
    fn tokeninfo_requires_matching_audience_and_verified_email() {
        let info = |aud: &str, verified: serde_json::Value| TokenInfo {
            aud: Some(aud.to_string()),
            email: Some("ana@example.com".to_string()),
            email_verified: Some(verified),
            name: Some("Ana".to_string()),
            picture: None,
        };

        let identity =
            identity_from_tokeninfo(info("client", serde_json::json!("true")), "client").unwrap();
        assert_eq!(identity.email, "ana@example.com");
        assert_eq!(identity.name.as_deref(), Some("Ana"));

        assert!(identity_from_tokeninfo(info("other", serde_json::json!(true)), "client").is_err());
        assert!(identity_from_tokeninfo(info("client", serde_json::json!("false")), "client").is_err());
    }
}
