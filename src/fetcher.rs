use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{AccessionId, AccessionState};
use crate::error::BgdError;
use crate::fs_util;
use crate::layout::AccessionPaths;
use crate::mirror::MirrorClient;
use crate::mover;
use crate::ncbi::{DatasetsClient, default_genome_include};

/// Where the archive keeps one accession.
#[derive(Debug, Clone)]
pub struct RemoteLocation {
    pub directory_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedFiles {
    pub protein: PathBuf,
    pub nucleotide: PathBuf,
}

/// One download strategy, fixed for a whole batch.
///
/// Implementations leave the per-ID folder populated and one protein plus one
/// nucleotide FASTA in the shared folders, or fail without leaving partial
/// copies in the shared folders.
pub trait AssemblyFetcher: Send + Sync {
    fn fetch(
        &self,
        accession: &AccessionId,
        remote: &RemoteLocation,
        paths: &AccessionPaths,
        sink: &dyn ProgressSink,
    ) -> Result<FetchedFiles, BgdError>;
}

/// Mirrors the accession's archive directory, then pulls out and unpacks the
/// `_protein.faa.gz` and `_genomic.fna.gz` files.
pub struct FullFetcher<M: MirrorClient> {
    mirror: M,
}

impl<M: MirrorClient> FullFetcher<M> {
    pub fn new(mirror: M) -> Self {
        Self { mirror }
    }
}

impl<M: MirrorClient> AssemblyFetcher for FullFetcher<M> {
    fn fetch(
        &self,
        accession: &AccessionId,
        remote: &RemoteLocation,
        paths: &AccessionPaths,
        sink: &dyn ProgressSink,
    ) -> Result<FetchedFiles, BgdError> {
        sink.event(ProgressEvent::state(
            accession,
            AccessionState::Downloading,
            format!("mirroring {}", remote.directory_url),
        ));
        let start = Instant::now();
        let stats = self
            .mirror
            .mirror(
                &remote.directory_url,
                accession,
                paths.assembly_dir.as_std_path(),
            )?;
        info!(
            accession = %accession,
            files = stats.files,
            bytes = stats.bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "mirrored assembly directory"
        );

        sink.event(ProgressEvent::state(
            accession,
            AccessionState::Moving,
            "copying protein and genomic files",
        ));
        let placed = mover::place_assembly_files(
            paths.assembly_dir.as_std_path(),
            accession,
            paths.proteome_dir.as_std_path(),
            paths.nucleotide_dir.as_std_path(),
        )?;

        sink.event(ProgressEvent::state(
            accession,
            AccessionState::Unzipping,
            "decompressing copies",
        ));
        let unpacked = fs_util::gunzip_in_place(&placed.protein).and_then(|protein| {
            fs_util::gunzip_in_place(&placed.nucleotide).map(|nucleotide| FetchedFiles {
                protein,
                nucleotide,
            })
        });
        match unpacked {
            Ok(files) => Ok(files),
            Err(err) => {
                discard(&[
                    placed.protein.clone(),
                    placed.nucleotide.clone(),
                    strip_gz(&placed.protein),
                    strip_gz(&placed.nucleotide),
                ]);
                Err(err)
            }
        }
    }
}

/// Downloads one Datasets package and sorts its contents.
pub struct LiteFetcher<D: DatasetsClient> {
    datasets: D,
    include: Vec<String>,
}

impl<D: DatasetsClient> LiteFetcher<D> {
    pub fn new(datasets: D) -> Self {
        Self::with_include(datasets, default_genome_include())
    }

    pub fn with_include(datasets: D, include: Vec<String>) -> Self {
        Self { datasets, include }
    }
}

impl<D: DatasetsClient> AssemblyFetcher for LiteFetcher<D> {
    fn fetch(
        &self,
        accession: &AccessionId,
        _remote: &RemoteLocation,
        paths: &AccessionPaths,
        sink: &dyn ProgressSink,
    ) -> Result<FetchedFiles, BgdError> {
        let scratch_parent = paths
            .assembly_dir
            .parent()
            .ok_or_else(|| BgdError::Filesystem("invalid assembly path".to_string()))?;
        let temp_dir = tempfile::Builder::new()
            .prefix("bgd-package")
            .tempdir_in(scratch_parent.as_std_path())
            .map_err(|err| BgdError::Filesystem(err.to_string()))?;
        let zip_path = temp_dir.path().join(format!("{accession}.zip"));

        sink.event(ProgressEvent::state(
            accession,
            AccessionState::Downloading,
            "requesting datasets package",
        ));
        let start = Instant::now();
        let download = self
            .datasets
            .download_package(accession, &self.include, &zip_path)?;
        info!(
            accession = %accession,
            bytes = download.bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "downloaded datasets package"
        );
        if !zip_path.exists() {
            return Err(BgdError::DownloadFailed(format!(
                "package download missing file: {}",
                zip_path.display()
            )));
        }
        if !download.is_zip {
            return Err(BgdError::DownloadFailed(
                "expected the package to be a zip archive".to_string(),
            ));
        }

        sink.event(ProgressEvent::state(
            accession,
            AccessionState::Unzipping,
            "unpacking package",
        ));
        fs_util::validate_zip(&zip_path)?;
        let extract_dir = temp_dir.path().join("extract");
        fs::create_dir_all(&extract_dir).map_err(|err| BgdError::Filesystem(err.to_string()))?;
        fs_util::extract_zip(&zip_path, &extract_dir)?;
        let data_root = extract_dir.join("ncbi_dataset").join("data");
        let data_dir = data_root.join(accession.as_str());
        if !data_dir.is_dir() {
            return Err(BgdError::FileNotFoundInArchive {
                archive: zip_path.display().to_string(),
                pattern: format!("ncbi_dataset/data/{accession}/"),
            });
        }

        sink.event(ProgressEvent::state(
            accession,
            AccessionState::Moving,
            "copying protein and genomic files",
        ));
        let protein_src = data_dir.join("protein.faa");
        if !protein_src.is_file() {
            return Err(BgdError::FileNotFoundInArchive {
                archive: zip_path.display().to_string(),
                pattern: format!("ncbi_dataset/data/{accession}/protein.faa"),
            });
        }
        let genomic_src = mover::locate_by_suffix(&data_dir, "_genomic.fna")?;
        let genomic_name = genomic_src
            .file_name()
            .and_then(|value| value.to_str())
            .ok_or_else(|| BgdError::Filesystem("non-utf8 file name".to_string()))?;

        let protein = mover::copy_as(
            &protein_src,
            paths.proteome_dir.as_std_path(),
            &format!("{accession}_protein.faa"),
        )?;
        let nucleotide = match mover::copy_as(
            &genomic_src,
            paths.nucleotide_dir.as_std_path(),
            genomic_name,
        ) {
            Ok(path) => path,
            Err(err) => {
                discard(&[protein]);
                return Err(err);
            }
        };

        let kept = fs_util::copy_dir_recursive(&data_dir, paths.assembly_dir.as_std_path())
            .and_then(|()| {
                let report = data_root.join("assembly_data_report.jsonl");
                if report.is_file() {
                    mover::copy_as(
                        &report,
                        paths.assembly_dir.as_std_path(),
                        "assembly_data_report.jsonl",
                    )?;
                }
                Ok(())
            });
        if let Err(err) = kept {
            discard(&[protein, nucleotide]);
            return Err(err);
        }

        // Archive, manifest, checksums and the unpack dir all live in temp_dir.
        temp_dir
            .close()
            .map_err(|err| BgdError::Filesystem(err.to_string()))?;
        debug!(accession = %accession, "removed package scratch dir");

        Ok(FetchedFiles {
            protein,
            nucleotide,
        })
    }
}

fn strip_gz(path: &Path) -> PathBuf {
    path.to_str()
        .and_then(|value| value.strip_suffix(".gz"))
        .map(PathBuf::from)
        .unwrap_or_else(|| path.to_path_buf())
}

fn discard(paths: &[PathBuf]) {
    for path in paths {
        if !path.is_file() {
            continue;
        }
        if let Err(err) = fs::remove_file(path) {
            debug!(path = %path.display(), error = %err, "failed to remove partial copy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_removes_files_and_tolerates_the_rest() {
        let temp = tempfile::tempdir().unwrap();
        let copy = temp.path().join("x_protein.faa");
        let folder = temp.path().join("kept");
        fs::write(&copy, b">x\n").unwrap();
        fs::create_dir(&folder).unwrap();

        discard(&[copy.clone(), temp.path().join("missing.faa"), folder.clone()]);

        assert!(!copy.exists());
        assert!(folder.is_dir());
    }

    #[test]
    fn strip_gz_only_drops_the_extension() {
        assert_eq!(
            strip_gz(Path::new("/a/x_genomic.fna.gz")),
            PathBuf::from("/a/x_genomic.fna")
        );
        assert_eq!(strip_gz(Path::new("/a/x.faa")), PathBuf::from("/a/x.faa"));
    }
}
