use dagger_sdk::{Directory, Query};

use crate::containers;

/// Run `cargo audit` against the resolved dependency graph.
pub async fn run(client: &Query, source: Directory) -> eyre::Result<String> {
    let output = containers::rust_base(client, source)
        .with_exec(vec!["cargo", "install", "cargo-audit", "--locked"])
        .with_exec(vec!["cargo", "generate-lockfile"])
        .with_exec(vec!["cargo", "audit"])
        .stdout()
        .await?;

    Ok(format!("[security] Audit passed.\n{output}"))
}
