mod containers;
mod stages;

use clap::{Parser, ValueEnum};
use dagger_sdk::{Directory, HostDirectoryOpts, Query};

#[derive(Parser)]
#[command(name = "lyric-replacer-pipeline", about = "Lyric Replacer CI/CD Pipeline")]
struct Cli {
    /// Stage to run
    #[arg(value_enum)]
    stage: Stage,

    /// Repository root on the host
    #[arg(long, default_value = ".")]
    source: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Stage {
    /// Fast compile check
    Check,
    /// Format check
    Fmt,
    /// Clippy lint
    Lint,
    /// Unit tests
    Test,
    /// Dependency vulnerability audit
    SecurityAudit,
    /// HTTP API integration test against PostgreSQL
    IntegrationTest,
    /// Build the container image and verify its runtime properties
    Image,
    /// check + fmt, then lint + test, then integration, then image
    All,
}

fn host_directory(client: &Query, source: &str) -> Directory {
    client.host().directory_opts(
        source,
        HostDirectoryOpts {
            exclude: Some(vec!["target/", ".git/", "examples/", "media/", "workspace/"]),
            include: None,
            gitignore: None,
            no_cache: None,
        },
    )
}

async fn run_stage(client: &Query, stage: Stage, src: Directory) -> eyre::Result<String> {
    match stage {
        Stage::Check => stages::check::run(client, src).await,
        Stage::Fmt => stages::fmt::run(client, src).await,
        Stage::Lint => stages::lint::run(client, src).await,
        Stage::Test => stages::test::run(client, src).await,
        Stage::SecurityAudit => stages::security::run(client, src).await,
        Stage::IntegrationTest => stages::integration::run(client, src).await,
        Stage::Image => stages::image::run(client, src).await,
        Stage::All => Err(eyre::eyre!("`all` is not a single stage")),
    }
}

async fn run_all(client: &Query, src: Directory) -> eyre::Result<()> {
    println!("=== Phase 1: Fast Gates ===");
    let (check_out, fmt_out) = tokio::try_join!(
        run_stage(client, Stage::Check, src.clone()),
        run_stage(client, Stage::Fmt, src.clone()),
    )?;
    println!("{check_out}\n{fmt_out}");

    println!("=== Phase 2: Quality Gates ===");
    let (lint_out, test_out) = tokio::try_join!(
        run_stage(client, Stage::Lint, src.clone()),
        run_stage(client, Stage::Test, src.clone()),
    )?;
    println!("{lint_out}\n{test_out}");

    println!("=== Phase 3: Integration ===");
    println!("{}", run_stage(client, Stage::IntegrationTest, src.clone()).await?);

    println!("=== Phase 4: Image ===");
    println!("{}", run_stage(client, Stage::Image, src).await?);

    println!("\n=== Full CI Pipeline Complete ===");
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let Cli { stage, source } = Cli::parse();

    dagger_sdk::connect(move |client| async move {
        let src = host_directory(&client, &source);
        if stage == Stage::All {
            run_all(&client, src).await?;
        } else {
            println!("{}", run_stage(&client, stage, src).await?);
        }
        Ok(())
    })
    .await?;

    Ok(())
}
