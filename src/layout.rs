use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::domain::{AccessionId, ExistingOutput};
use crate::error::BgdError;

pub const ASSEMBLIES_DIR: &str = "assemblies";
pub const PROTEOMES_DIR: &str = "proteomes";
pub const NUCLEOTIDES_DIR: &str = "nucleotides";
pub const REPORT_FILE: &str = "troublesome_assemblies.csv";
pub const SUMMARY_FILE: &str = "batch_summary.json";

/// Fixed folder layout under the output root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: Utf8PathBuf,
}

/// Folders one accession writes into.
#[derive(Debug, Clone)]
pub struct AccessionPaths {
    pub assembly_dir: Utf8PathBuf,
    pub proteome_dir: Utf8PathBuf,
    pub nucleotide_dir: Utf8PathBuf,
}

impl OutputLayout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// Makes `path` absolute against the current directory.
    pub fn from_path(path: &Path) -> Result<Self, BgdError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|err| BgdError::Filesystem(err.to_string()))?
                .join(path)
        };
        let root = Utf8PathBuf::from_path_buf(absolute)
            .map_err(|_| BgdError::Filesystem("invalid output path".to_string()))?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn assemblies_dir(&self) -> Utf8PathBuf {
        self.root.join(ASSEMBLIES_DIR)
    }

    pub fn proteomes_dir(&self) -> Utf8PathBuf {
        self.root.join(PROTEOMES_DIR)
    }

    pub fn nucleotides_dir(&self) -> Utf8PathBuf {
        self.root.join(NUCLEOTIDES_DIR)
    }

    pub fn report_path(&self) -> Utf8PathBuf {
        self.root.join(REPORT_FILE)
    }

    pub fn summary_path(&self) -> Utf8PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    pub fn accession_dir(&self, accession: &AccessionId) -> Utf8PathBuf {
        self.assemblies_dir().join(accession.as_str())
    }

    pub fn accession_paths(&self, accession: &AccessionId) -> AccessionPaths {
        AccessionPaths {
            assembly_dir: self.accession_dir(accession),
            proteome_dir: self.proteomes_dir(),
            nucleotide_dir: self.nucleotides_dir(),
        }
    }

    /// Output folders left over from an earlier run.
    pub fn existing_dirs(&self) -> Vec<Utf8PathBuf> {
        [
            self.assemblies_dir(),
            self.proteomes_dir(),
            self.nucleotides_dir(),
        ]
        .into_iter()
        .filter(|dir| dir.as_std_path().exists())
        .collect()
    }

    /// Applies the existing-output policy and creates the three folders.
    ///
    /// With [`ExistingOutput::Fail`] nothing on disk changes when a conflict
    /// is found.
    pub fn prepare(&self, policy: ExistingOutput) -> Result<(), BgdError> {
        let existing = self.existing_dirs();
        match policy {
            ExistingOutput::Fail => {
                if let Some(dir) = existing.first() {
                    return Err(BgdError::OutputConflict(dir.as_std_path().to_path_buf()));
                }
            }
            ExistingOutput::Wipe => {
                for dir in &existing {
                    info!(dir = %dir, "removing previous output");
                    fs::remove_dir_all(dir.as_std_path())
                        .map_err(|err| BgdError::Filesystem(err.to_string()))?;
                }
                for file in [self.report_path(), self.summary_path()] {
                    if file.as_std_path().exists() {
                        fs::remove_file(file.as_std_path())
                            .map_err(|err| BgdError::Filesystem(err.to_string()))?;
                    }
                }
            }
            ExistingOutput::Skip => {}
        }

        for dir in [
            self.assemblies_dir(),
            self.proteomes_dir(),
            self.nucleotides_dir(),
        ] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| BgdError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), BgdError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| BgdError::Filesystem(err.to_string()))?;
        write_bytes_atomic(path.as_std_path(), &content)
    }
}

/// Writes through a temp file in the same folder and renames over `path`.
pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), BgdError> {
    let parent = path
        .parent()
        .ok_or_else(|| BgdError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| BgdError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("bgd-write")
        .tempfile_in(parent)
        .map_err(|err| BgdError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| BgdError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| BgdError::Filesystem(err.to_string()))?;
    Ok(())
}
