use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::BgdError;

const PROTEOME_EXT: &str = ".faa";

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]*)\]").expect("bracket pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum RenameOutcome {
    Renamed { from: String, to: String },
    AlreadyNamed { file: String },
    NotProteome { file: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RenameResult {
    pub file: String,
    pub outcome: Option<RenameOutcome>,
    pub error: Option<String>,
}

/// Organism name from the last bracketed segment of a FASTA header, with
/// whitespace collapsed to underscores.
///
/// `>NP_000000.1 some protein [Escherichia coli]` gives `Escherichia_coli`.
pub fn organism_from_header(line: &str) -> Option<String> {
    let raw = BRACKETED
        .captures_iter(line)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())?;
    if raw.is_empty() {
        return None;
    }
    let name = WHITESPACE.replace_all(raw, "_").replace('/', "_");
    Some(name)
}

pub fn renamed_file_name(file_name: &str, organism: &str) -> Option<String> {
    let stem = file_name.strip_suffix(PROTEOME_EXT)?;
    Some(format!("{stem}_{organism}{PROTEOME_EXT}"))
}

/// Renames `folder/file_name` after the organism in its first header line.
///
/// Running it again on the result is a no-op.
pub fn rename(folder: &Path, file_name: &str) -> Result<RenameOutcome, BgdError> {
    let Some(stem) = file_name.strip_suffix(PROTEOME_EXT) else {
        return Ok(RenameOutcome::NotProteome {
            file: file_name.to_string(),
        });
    };

    let path = folder.join(file_name);
    let header = read_first_line(&path)?;
    let organism = organism_from_header(&header).ok_or_else(|| BgdError::HeaderParseFailed {
        file: file_name.to_string(),
        reason: if header.trim().is_empty() {
            "empty first line".to_string()
        } else {
            "no [organism] annotation in header".to_string()
        },
    })?;

    if stem.ends_with(&format!("_{organism}")) {
        return Ok(RenameOutcome::AlreadyNamed {
            file: file_name.to_string(),
        });
    }

    let new_name = renamed_file_name(file_name, &organism)
        .ok_or_else(|| BgdError::Filesystem(format!("not a proteome file: {file_name}")))?;
    let target = folder.join(&new_name);
    if target.exists() {
        return Err(BgdError::Filesystem(format!(
            "rename target already exists: {}",
            target.display()
        )));
    }
    fs::rename(&path, &target).map_err(|err| BgdError::Filesystem(err.to_string()))?;
    debug!(from = file_name, to = %new_name, "renamed proteome");
    Ok(RenameOutcome::Renamed {
        from: file_name.to_string(),
        to: new_name,
    })
}

/// Renames every file in `folder`; one bad header never stops the sweep.
pub fn rename_all(folder: &Path) -> Result<Vec<RenameResult>, BgdError> {
    let mut names = fs::read_dir(folder)
        .map_err(|err| BgdError::Filesystem(err.to_string()))?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect::<Vec<_>>();
    names.sort();

    let mut results = Vec::with_capacity(names.len());
    for name in names {
        match rename(folder, &name) {
            Ok(outcome) => results.push(RenameResult {
                file: name,
                outcome: Some(outcome),
                error: None,
            }),
            Err(err) => {
                warn!(file = %name, error = %err, "proteome left under its original name");
                results.push(RenameResult {
                    file: name,
                    outcome: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }
    Ok(results)
}

fn read_first_line(path: &Path) -> Result<String, BgdError> {
    let file = fs::File::open(path)
        .map_err(|err| BgdError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut line = String::new();
    BufReader::new(file)
        .read_line(&mut line)
        .map_err(|err| BgdError::Filesystem(format!("read {}: {err}", path.display())))?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn organism_uses_last_bracket() {
        let header = ">WP_1.1 MULTISPECIES: protein [Bacteroidetes] [Flavobacterium sp. 1]";
        assert_eq!(
            organism_from_header(header).as_deref(),
            Some("Flavobacterium_sp._1")
        );
    }

    #[test]
    fn organism_missing_brackets() {
        assert_eq!(organism_from_header(">NP_1.1 hypothetical protein"), None);
        assert_eq!(organism_from_header(">NP_1.1 protein [  ]"), None);
        assert_eq!(organism_from_header(">NP_1.1 protein [unterminated"), None);
    }

    #[test]
    fn organism_slashes_are_replaced() {
        assert_eq!(
            organism_from_header(">x [Influenza A virus (A/Puerto Rico/8/1934)]").as_deref(),
            Some("Influenza_A_virus_(A_Puerto_Rico_8_1934)")
        );
    }

    #[test]
    fn renamed_name_only_touches_extension() {
        assert_eq!(
            renamed_file_name("a.faa.b.faa", "E_coli").as_deref(),
            Some("a.faa.b_E_coli.faa")
        );
        assert_eq!(renamed_file_name("a.fna", "E_coli"), None);
    }

    #[test]
    fn rename_then_rename_again() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("seq.faa"),
            ">NP_000000.1 some protein [Escherichia coli]\nMKV\n",
        )
        .unwrap();

        let first = rename(temp.path(), "seq.faa").unwrap();
        assert_eq!(
            first,
            RenameOutcome::Renamed {
                from: "seq.faa".to_string(),
                to: "seq_Escherichia_coli.faa".to_string(),
            }
        );
        let second = rename(temp.path(), "seq_Escherichia_coli.faa").unwrap();
        assert_matches!(second, RenameOutcome::AlreadyNamed { .. });
        assert!(temp.path().join("seq_Escherichia_coli.faa").exists());
        assert!(!temp.path().join("seq.faa").exists());
    }

    #[test]
    fn rename_without_organism_fails() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("p.faa"), ">NP_1.1 no organism\nMKV\n").unwrap();
        let err = rename(temp.path(), "p.faa").unwrap_err();
        assert_matches!(err, BgdError::HeaderParseFailed { .. });
        assert!(temp.path().join("p.faa").exists());
    }

    #[test]
    fn sweep_isolates_failures() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.faa"), ">x no organism\n").unwrap();
        fs::write(temp.path().join("b.faa"), ">y [Bacillus subtilis]\n").unwrap();
        fs::write(temp.path().join("notes.txt"), "hello").unwrap();

        let results = rename_all(temp.path()).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].error.is_some());
        assert_matches!(
            results[1].outcome,
            Some(RenameOutcome::Renamed { ref to, .. }) if to == "b_Bacillus_subtilis.faa"
        );
        assert_matches!(results[2].outcome, Some(RenameOutcome::NotProteome { .. }));
    }
}
