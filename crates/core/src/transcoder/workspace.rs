//! Per-job scratch directory.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::types::OutputFormat;

/// Scratch directory holding one job's download and transcoder output.
///
/// The directory and everything left in it are removed when the workspace is
/// dropped, on every exit path of the job.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
}

impl JobWorkspace {
    /// Creates `<base>/<prefix>XXXX`, creating `base` if needed.
    pub fn create(base: &Path, prefix: &str) -> io::Result<Self> {
        std::fs::create_dir_all(base)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", prefix))
            .tempdir_in(base)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the fetched blob is written.
    pub fn download_path(&self) -> PathBuf {
        self.dir.path().join("source.part")
    }

    /// Where ffmpeg writes its output.
    pub fn output_path(&self, format: OutputFormat) -> PathBuf {
        self.dir.path().join(format!("output.{}", format.extension()))
    }
}
