//! Media publishing: S3 (SigV4-signed PUT) or a local directory served at
//! `/media`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::{AwsCredentials, StorageConfig};

type HmacSha256 = Hmac<Sha256>;

/// Public URL prefix for locally stored media.
pub const LOCAL_MEDIA_ROUTE: &str = "/media";

#[derive(Clone)]
pub struct MediaStore {
    config: StorageConfig,
    http: reqwest::Client,
}

/// Default object key for an uploaded original track.
pub fn original_track_key(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("songs/original_song/{}{}", uuid::Uuid::new_v4(), ext)
}

/// Object key for one stem of a split.
pub fn stem_key(batch: &uuid::Uuid, stem: &str) -> String {
    format!("songs/stems/{batch}/{stem}.wav")
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next().map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

impl MediaStore {
    pub fn new(config: StorageConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Directory served at `/media`, when storing locally.
    pub fn local_dir(&self) -> Option<&Path> {
        match &self.config {
            StorageConfig::Local { dir, .. } => Some(dir.as_path()),
            StorageConfig::S3 { .. } => None,
        }
    }

    /// Publish `path` under `key` and return its public URL. Without a key
    /// the file is stored as a new original track.
    pub async fn upload_file(&self, path: &Path, key: Option<&str>) -> anyhow::Result<String> {
        let key = match key {
            Some(key) => key.to_string(),
            None => original_track_key(path),
        };
        let key = key.as_str();
        match &self.config {
            StorageConfig::S3 {
                bucket,
                region,
                credentials,
            } => {
                let body = tokio::fs::read(path)
                    .await
                    .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
                let url = self
                    .put_object(bucket, region, credentials, key, body)
                    .await?;
                tracing::info!(file = %path.display(), url = %url, "Uploaded to S3");
                Ok(url)
            }
            StorageConfig::Local {
                dir,
                public_base_url,
            } => {
                let target = local_target(dir, key)?;
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(path, &target)
                    .await
                    .map_err(|e| anyhow::anyhow!("cannot store {}: {e}", path.display()))?;
                Ok(format!("{public_base_url}{LOCAL_MEDIA_ROUTE}/{key}"))
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        region: &str,
        credentials: &AwsCredentials,
        key: &str,
        body: Vec<u8>,
    ) -> anyhow::Result<String> {
        let host = format!("{bucket}.s3.{region}.amazonaws.com");
        let canonical_uri = format!("/{}", uri_encode_path(key));
        let url = format!("https://{host}{canonical_uri}");
        let request = sign_put(
            credentials,
            region,
            &host,
            &canonical_uri,
            content_type_for(key),
            &body,
            Utc::now(),
        )?;

        let mut builder = self.http.put(&url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let resp = builder.body(body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("S3 upload of {key} failed: {status} {text}");
        }
        Ok(url)
    }
}

/// Resolve `key` inside `dir`, refusing keys that escape it.
fn local_target(dir: &Path, key: &str) -> anyhow::Result<PathBuf> {
    let mut target = dir.to_path_buf();
    for part in key.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            anyhow::bail!("invalid media key {key:?}");
        }
        target.push(part);
    }
    Ok(target)
}

// ── AWS Signature Version 4 ──

/// Headers to send with a signed request, `Authorization` included.
pub struct SignedRequest {
    pub headers: Vec<(String, String)>,
}

/// RFC 3986 encoding of an object key, keeping `/` separators.
pub fn uri_encode_path(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut mac = <HmacSha256 as KeyInit>::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("invalid signing key: {e}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
pub fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> anyhow::Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Sign a single-part S3 PUT of `body`.
pub fn sign_put(
    credentials: &AwsCredentials,
    region: &str,
    host: &str,
    canonical_uri: &str,
    content_type: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> anyhow::Result<SignedRequest> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = hex::encode(Sha256::digest(body));

    // Sorted by lowercase header name.
    let mut headers: Vec<(String, String)> = vec![
        ("content-type".to_string(), content_type.to_string()),
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{}\n", v.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "PUT\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );
    let scope = format!("{date}/{region}/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );
    let key = signing_key(&credentials.secret_access_key, &date, region, "s3")?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    headers.push((
        "authorization".to_string(),
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
    ));
    // reqwest sets Host from the URL.
    headers.retain(|(k, _)| k != "host");

    Ok(SignedRequest { headers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    #[test]
    fn signing_key_matches_published_example() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn signed_put_carries_scope_and_payload_hash() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let signed = sign_put(
            &creds(),
            "eu-west-1",
            "bucket.s3.eu-west-1.amazonaws.com",
            "/songs/a.mp3",
            "audio/mpeg",
            b"",
            now,
        )
        .unwrap();
        let header = |name: &str| {
            signed
                .headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(header("x-amz-date"), "20240501T123000Z");
        assert_eq!(
            header("x-amz-content-sha256"),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let auth = header("authorization");
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240501/eu-west-1/s3/aws4_request, "
        ));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date,"));
        assert!(signed.headers.iter().all(|(k, _)| k != "host"));
    }

    #[test]
    fn session_token_is_signed() {
        let mut credentials = creds();
        credentials.session_token = Some("token".to_string());
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let signed = sign_put(&credentials, "us-east-1", "h", "/k", "audio/wav", b"x", now).unwrap();
        let auth = &signed.headers.last().unwrap().1;
        assert!(auth.contains("x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn keys_are_percent_encoded() {
        assert_eq!(uri_encode_path("songs/a b+c.mp3"), "songs/a%20b%2Bc.mp3");
        assert_eq!(uri_encode_path("songs/stems/x-1_~.wav"), "songs/stems/x-1_~.wav");
    }

    #[test]
    fn generated_keys_keep_extension() {
        let key = original_track_key(Path::new("/tmp/My Song.mp3"));
        assert!(key.starts_with("songs/original_song/"));
        assert!(key.ends_with(".mp3"));
        let batch = uuid::Uuid::nil();
        assert_eq!(
            stem_key(&batch, "bass"),
            "songs/stems/00000000-0000-0000-0000-000000000000/bass.wav"
        );
    }

    #[tokio::test]
    async fn local_store_copies_and_returns_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("input.mp3");
        tokio::fs::write(&source, b"id3").await.unwrap();

        let store = MediaStore::new(
            StorageConfig::Local {
                dir: dir.path().join("media"),
                public_base_url: "http://example.test".to_string(),
            },
            reqwest::Client::new(),
        );
        let url = store
            .upload_file(&source, Some("songs/original_song/abc.mp3"))
            .await
            .unwrap();
        assert_eq!(url, "http://example.test/media/songs/original_song/abc.mp3");
        let copied = tokio::fs::read(dir.path().join("media/songs/original_song/abc.mp3"))
            .await
            .unwrap();
        assert_eq!(copied, b"id3");

        assert!(store.upload_file(&source, Some("../escape.mp3")).await.is_err());
    }

    #[tokio::test]
    async fn upload_without_key_stores_original_track() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Song.mp3");
        tokio::fs::write(&source, b"id3").await.unwrap();

        let store = MediaStore::new(
            StorageConfig::Local {
                dir: dir.path().join("media"),
                public_base_url: "http://example.test".to_string(),
            },
            reqwest::Client::new(),
        );
        let url = store.upload_file(&source, None).await.unwrap();
        let key = url
            .strip_prefix("http://example.test/media/")
            .unwrap();
        assert!(key.starts_with("songs/original_song/"), "{key}");
        assert!(key.ends_with(".mp3"), "{key}");
        let copied = tokio::fs::read(dir.path().join("media").join(key)).await.unwrap();
        assert_eq!(copied, b"id3");
    }
}
