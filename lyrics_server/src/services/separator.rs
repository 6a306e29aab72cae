//! Stem separation through the spleeter CLI (5-stem model).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::tools;

/// Stems produced by the `spleeter:5stems` model, in output order.
pub const STEM_NAMES: [&str; 5] = ["vocals", "bass", "drums", "piano", "other"];

/// Paths to every separated stem, keyed by stem name.
#[derive(Debug, Clone)]
pub struct Stems {
    pub dir: PathBuf,
    pub files: BTreeMap<&'static str, PathBuf>,
}

impl Stems {
    pub fn get(&self, stem: &str) -> Option<&Path> {
        self.files.get(stem).map(|p| p.as_path())
    }
}

/// Spleeter writes into `<output_dir>/<input file stem>/<stem>.wav`.
pub fn expected_stems(input: &Path, output_dir: &Path) -> Stems {
    let folder = input
        .file_stem()
        .map(|s| output_dir.join(s))
        .unwrap_or_else(|| output_dir.to_path_buf());
    let files = STEM_NAMES
        .iter()
        .map(|name| (*name, folder.join(format!("{name}.wav"))))
        .collect();
    Stems { dir: folder, files }
}

/// Split `input` into five stems under `output_dir`.
pub async fn split_stems(
    spleeter: &str,
    input: &Path,
    output_dir: &Path,
    timeout: Duration,
) -> anyhow::Result<Stems> {
    tokio::fs::create_dir_all(output_dir).await?;
    tracing::info!(input = %input.display(), "Splitting into 5 stems");

    let input_arg = input.display().to_string();
    let output_arg = output_dir.display().to_string();
    let output = tools::run(
        spleeter,
        [
            "separate",
            "-p",
            "spleeter:5stems",
            "-o",
            output_arg.as_str(),
            input_arg.as_str(),
        ],
        None,
        timeout,
    )
    .await?;
    tracing::debug!(stdout = %tools::truncate_tail(&output.stdout_text(), 1024), "spleeter finished");

    let stems = expected_stems(input, output_dir);
    for (name, path) in &stems.files {
        if !path.is_file() {
            anyhow::bail!("{name} stem not found at {}", path.display());
        }
    }
    Ok(stems)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_live_in_a_folder_named_after_the_input() {
        let stems = expected_stems(Path::new("/jobs/7/download/My Song.mp3"), Path::new("/jobs/7/stems"));
        assert_eq!(stems.dir, Path::new("/jobs/7/stems/My Song"));
        assert_eq!(
            stems.get("vocals").unwrap(),
            Path::new("/jobs/7/stems/My Song/vocals.wav")
        );
        assert_eq!(stems.files.len(), 5);
        assert!(stems.get("guitar").is_none());
    }
}
