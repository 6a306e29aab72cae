use dagger_sdk::{Directory, Query};

use crate::containers;

/// Start the server against a fresh PostgreSQL database and drive the HTTP
/// API with curl.
/// Flow: boot -> health -> signup -> signin -> me -> reject bad URL -> queue job -> KPIs
pub async fn run(client: &Query, source: Directory) -> eyre::Result<String> {
    let pg = containers::postgres(client);

    let test_script = r#"
set -euo pipefail

BINARY="./target/release/lyric-replacer"
BASE="http://127.0.0.1:${PORT}"

echo "=== Integration Test: HTTP API ==="

echo "[1/8] Starting server..."
$BINARY > /tmp/server.log 2>&1 &
SERVER_PID=$!
trap 'kill $SERVER_PID 2>/dev/null || true' EXIT
for i in $(seq 1 30); do
    curl -sf "$BASE/health" > /dev/null && break
    sleep 1
done

echo "[2/8] Health check..."
curl -sf "$BASE/health"
echo

echo "[3/8] Sign up..."
curl -sf -X POST "$BASE/auth/signup" -H 'Content-Type: application/json' \
    -d '{"email":"ci@example.com","username":"ci","password":"ci-password"}'
echo

echo "[4/8] Sign in..."
TOKEN=$(curl -sf -X POST "$BASE/auth/signin" -H 'Content-Type: application/json' \
    -d '{"username":"ci","password":"ci-password"}' | sed -E 's/.*"access_token":"([^"]+)".*/\1/')
[ -n "$TOKEN" ]

echo "[5/8] Current user..."
curl -sf "$BASE/auth/users/me" -H "Authorization: Bearer $TOKEN" | grep -q '"username":"ci"'

echo "[6/8] Unsupported URL is rejected..."
STATUS=$(curl -s -o /dev/null -w '%{http_code}' -X POST "$BASE/process/process_url" \
    -H "Authorization: Bearer $TOKEN" -H 'Content-Type: application/json' \
    -d '{"url":"https://example.com/song.mp3"}')
[ "$STATUS" = "422" ]

echo "[7/8] Queue a job without waiting..."
STATUS=$(curl -s -o /tmp/queued.json -w '%{http_code}' -X POST "$BASE/process/process_url?wait=false" \
    -H "Authorization: Bearer $TOKEN" -H 'Content-Type: application/json' \
    -d '{"url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ"}')
[ "$STATUS" = "202" ]
cat /tmp/queued.json
echo
curl -sf "$BASE/process/jobs" -H "Authorization: Bearer $TOKEN" | grep -q '"source_kind":"youtube"'

echo "[8/8] KPI endpoints..."
curl -sf "$BASE/kpi/jobs/by_status?days=1"
echo
curl -sf "$BASE/kpi/jobs/success_rate?days=1" > /dev/null
curl -sf "$BASE/kpi/jobs/avg_duration?days=1" > /dev/null

echo ""
echo "=== Integration Test Complete ==="
"#;

    let output = containers::rust_base(client, source)
        .with_service_binding("db", pg)
        .with_env_variable("DATABASE_URL", containers::DATABASE_URL)
        .with_env_variable("SECRET_KEY", "integration-secret")
        .with_env_variable("PORT", "8080")
        .with_env_variable("MEDIA_DIR", "/tmp/media")
        .with_env_variable("WORKSPACE_DIR", "/tmp/jobs")
        .with_env_variable("RUST_LOG", "info")
        .with_exec(vec![
            "sh", "-c",
            "for i in $(seq 1 30); do pg_isready -h db -p 5432 -U lyrics && break; sleep 1; done",
        ])
        .with_exec(vec![
            "cargo", "build", "--release", "--package", "lyric-replacer-server",
        ])
        .with_exec(vec!["bash", "-c", test_script])
        .stdout()
        .await?;

    Ok(format!("[integration] {output}"))
}
