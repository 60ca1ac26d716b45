use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::AccessionId;
use crate::error::BgdError;

pub const PROTEIN_SUFFIX: &str = "_protein.faa.gz";
pub const GENOMIC_SUFFIX: &str = "_genomic.fna.gz";

/// Companion files that share the `_genomic.fna` ending but are not the
/// assembly sequence itself.
const GENOMIC_COMPANIONS: &[&str] = &["cds_from_genomic", "rna_from_genomic"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedFiles {
    pub protein: PathBuf,
    pub nucleotide: PathBuf,
}

/// Finds the file in `dir` whose name ends with `suffix`.
///
/// Used inside folders that hold a single assembly. When several names match
/// the lexicographically first is used and a warning is logged.
pub fn locate_by_suffix(dir: &Path, suffix: &str) -> Result<PathBuf, BgdError> {
    pick_single(dir, suffix, matching_files(dir, "", suffix)?)
}

/// Finds the file in `dir` that belongs to exactly `accession` and ends with
/// `suffix`.
///
/// A mirrored archive directory can hold every version of an assembly, so
/// only names starting with `<accession>_` are considered; other versions
/// never match.
pub fn locate_for_accession(
    dir: &Path,
    accession: &AccessionId,
    suffix: &str,
) -> Result<PathBuf, BgdError> {
    let prefix = format!("{accession}_");
    let candidates = matching_files(dir, &prefix, suffix)?;
    if candidates.is_empty() {
        return Err(BgdError::FileNotFoundInArchive {
            archive: dir.display().to_string(),
            pattern: format!("{prefix}*{suffix}"),
        });
    }
    pick_single(dir, suffix, candidates)
}

fn matching_files(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<PathBuf>, BgdError> {
    let entries = fs::read_dir(dir).map_err(|err| BgdError::Filesystem(err.to_string()))?;
    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| BgdError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|value| value.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) || !name.ends_with(suffix) {
            continue;
        }
        if suffix.contains("_genomic.fna") && GENOMIC_COMPANIONS.iter().any(|tag| name.contains(tag))
        {
            continue;
        }
        candidates.push(path);
    }
    candidates.sort();
    Ok(candidates)
}

fn pick_single(dir: &Path, suffix: &str, candidates: Vec<PathBuf>) -> Result<PathBuf, BgdError> {
    if candidates.len() > 1 {
        warn!(
            dir = %dir.display(),
            suffix,
            count = candidates.len(),
            "several files match, using the first one"
        );
    }
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| BgdError::FileNotFoundInArchive {
            archive: dir.display().to_string(),
            pattern: format!("*{suffix}"),
        })
}

/// Copies the protein and genomic archives of `accession` out of a mirrored
/// assembly folder.
///
/// Both files are located before anything is copied.
pub fn place_assembly_files(
    assembly_dir: &Path,
    accession: &AccessionId,
    proteome_dir: &Path,
    nucleotide_dir: &Path,
) -> Result<PlacedFiles, BgdError> {
    let protein = locate_for_accession(assembly_dir, accession, PROTEIN_SUFFIX)?;
    let nucleotide = locate_for_accession(assembly_dir, accession, GENOMIC_SUFFIX)?;

    Ok(PlacedFiles {
        protein: copy_into(&protein, proteome_dir)?,
        nucleotide: copy_into(&nucleotide, nucleotide_dir)?,
    })
}

/// Copies `source` into `dest_dir` under `file_name`, creating the folder.
pub fn copy_as(source: &Path, dest_dir: &Path, file_name: &str) -> Result<PathBuf, BgdError> {
    fs::create_dir_all(dest_dir).map_err(|err| BgdError::Filesystem(err.to_string()))?;
    let target = dest_dir.join(file_name);
    fs::copy(source, &target).map_err(|err| {
        BgdError::Filesystem(format!(
            "copy {} -> {}: {err}",
            source.display(),
            target.display()
        ))
    })?;
    Ok(target)
}

fn copy_into(source: &Path, dest_dir: &Path) -> Result<PathBuf, BgdError> {
    let file_name = source
        .file_name()
        .and_then(|value| value.to_str())
        .ok_or_else(|| BgdError::Filesystem("non-utf8 file name".to_string()))?;
    copy_as(source, dest_dir, file_name)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn companion_genomic_files_are_ignored() {
        let temp = tempfile::tempdir().unwrap();
        for name in [
            "GCA_1_ASM1v1_cds_from_genomic.fna.gz",
            "GCA_1_ASM1v1_rna_from_genomic.fna.gz",
            "GCA_1_ASM1v1_genomic.fna.gz",
        ] {
            fs::write(temp.path().join(name), b"x").unwrap();
        }
        let found = locate_by_suffix(temp.path(), GENOMIC_SUFFIX).unwrap();
        assert_eq!(found, temp.path().join("GCA_1_ASM1v1_genomic.fna.gz"));
    }

    #[test]
    fn only_the_requested_version_matches() {
        let temp = tempfile::tempdir().unwrap();
        for name in [
            "GCA_003841505.1_ASM384150v1_protein.faa.gz",
            "GCA_003841505.2_ASM384150v2_protein.faa.gz",
        ] {
            fs::write(temp.path().join(name), b"x").unwrap();
        }
        let acc: AccessionId = "GCA_003841505.1".parse().unwrap();
        let found = locate_for_accession(temp.path(), &acc, PROTEIN_SUFFIX).unwrap();
        assert_eq!(
            found,
            temp.path().join("GCA_003841505.1_ASM384150v1_protein.faa.gz")
        );
    }

    #[test]
    fn version_numbers_are_not_compared_as_text() {
        let temp = tempfile::tempdir().unwrap();
        for name in [
            "GCA_003841505.9_ASM384150v9_protein.faa.gz",
            "GCA_003841505.10_ASM384150v10_protein.faa.gz",
        ] {
            fs::write(temp.path().join(name), b"x").unwrap();
        }
        let ten: AccessionId = "GCA_003841505.10".parse().unwrap();
        let found = locate_for_accession(temp.path(), &ten, PROTEIN_SUFFIX).unwrap();
        assert_eq!(
            found,
            temp.path().join("GCA_003841505.10_ASM384150v10_protein.faa.gz")
        );
        let nine: AccessionId = "GCA_003841505.9".parse().unwrap();
        let found = locate_for_accession(temp.path(), &nine, PROTEIN_SUFFIX).unwrap();
        assert_eq!(
            found,
            temp.path().join("GCA_003841505.9_ASM384150v9_protein.faa.gz")
        );
    }

    #[test]
    fn other_versions_only_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("GCA_003841505.2_ASM384150v2_protein.faa.gz"),
            b"x",
        )
        .unwrap();
        let acc: AccessionId = "GCA_003841505.1".parse().unwrap();
        let err = locate_for_accession(temp.path(), &acc, PROTEIN_SUFFIX).unwrap_err();
        assert_matches!(err, BgdError::FileNotFoundInArchive { .. });
    }

    #[test]
    fn missing_suffix_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("README.txt"), b"x").unwrap();
        let err = locate_by_suffix(temp.path(), PROTEIN_SUFFIX).unwrap_err();
        assert_matches!(err, BgdError::FileNotFoundInArchive { .. });
    }
}
