use dagger_sdk::{Directory, Query};

use crate::containers;

/// Run the unit tests of every workspace crate. The server is a binary
/// crate, so its inline tests run under `--bins`.
pub async fn run(client: &Query, source: Directory) -> eyre::Result<String> {
    let output = containers::rust_base(client, source)
        .with_exec(vec!["cargo", "test", "--workspace", "--bins"])
        .stdout()
        .await?;

    Ok(format!("[test] Unit tests passed.\n{output}"))
}
