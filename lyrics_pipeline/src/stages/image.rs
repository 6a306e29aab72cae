use dagger_sdk::{Directory, Query};

use crate::containers;

/// Checks run inside the built image as its configured user.
const IMAGE_CHECKS: &str = r#"
set -eu

echo "=== Image Verification ==="

echo "[1/5] ffmpeg on PATH..."
command -v ffmpeg
ffmpeg -hide_banner -version | head -1

echo "[2/5] Runtime user..."
UID_NOW=$(id -u)
echo "uid=$UID_NOW user=$(id -un)"
if [ "$UID_NOW" = "0" ]; then
    echo "ERROR: container runs as root"
    exit 1
fi

echo "[3/5] Cookies file..."
test -f /app/cookies.txt
test -r /app/cookies.txt
echo "/app/cookies.txt readable"

echo "[4/5] Installed tools run without the build toolchain..."
yt-dlp --version
spleeter --help > /dev/null
echo "spleeter ok"
command -v lyric-replacer
if command -v cc > /dev/null || command -v cargo > /dev/null; then
    echo "ERROR: build toolchain leaked into the final stage"
    exit 1
fi

echo "[5/5] Listening port..."
for i in $(seq 1 30); do
    (echo > /dev/tcp/db/5432) 2>/dev/null && break
    sleep 1
done
for P in 8080 "${PROBE_PORT}"; do
    PORT=$P lyric-replacer > /tmp/server-$P.log 2>&1 &
    PID=$!
    OK=0
    for i in $(seq 1 30); do
        if curl -sf "http://127.0.0.1:$P/health" > /dev/null; then OK=1; break; fi
        sleep 1
    done
    kill $PID 2>/dev/null || true
    if [ "$OK" != "1" ]; then
        echo "ERROR: server did not answer on port $P"
        cat /tmp/server-$P.log
        exit 1
    fi
    echo "port $P ok"
done

echo ""
echo "=== Image Verification Complete ==="
"#;

/// Build the Dockerfile and verify the runtime image: ffmpeg present,
/// non-root user, readable cookies file, runnable tools, and the server
/// binding the default and an overridden `PORT`.
pub async fn run(client: &Query, source: Directory) -> eyre::Result<String> {
    let pg = containers::postgres(client);

    let output = containers::service_image(source)
        .with_service_binding("db", pg)
        .with_env_variable("DATABASE_URL", containers::DATABASE_URL)
        .with_env_variable("SECRET_KEY", "image-check-secret")
        .with_env_variable("PROBE_PORT", "9191")
        .with_exec(vec!["bash", "-c", IMAGE_CHECKS])
        .stdout()
        .await?;

    Ok(format!("[image] {output}"))
}
