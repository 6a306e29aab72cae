use dagger_sdk::{Directory, Query};

use crate::containers;

/// Run `cargo clippy` over all targets with correctness errors and all warnings.
pub async fn run(client: &Query, source: Directory) -> eyre::Result<String> {
    let output = containers::rust_base(client, source)
        .with_exec(vec![
            "cargo", "clippy", "--workspace", "--all-targets",
            "--", "-D", "clippy::correctness", "-W", "clippy::all",
        ])
        .stdout()
        .await?;

    Ok(format!("[lint] Clippy passed.\n{output}"))
}
