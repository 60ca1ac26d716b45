use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::BgdError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// Mirror every file of the assembly directory.
    #[default]
    Full,
    /// Single packaged archive from the Datasets API.
    Lite,
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadMode::Full => write!(f, "full"),
            DownloadMode::Lite => write!(f, "lite"),
        }
    }
}

/// What to do when the output root already holds a previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExistingOutput {
    #[default]
    Fail,
    Wipe,
    Skip,
}

impl fmt::Display for ExistingOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExistingOutput::Fail => write!(f, "fail"),
            ExistingOutput::Wipe => write!(f, "wipe"),
            ExistingOutput::Skip => write!(f, "skip"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MirrorKind {
    #[default]
    Http,
    Wget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessionState {
    Pending,
    Downloading,
    Moving,
    Unzipping,
    Renamed,
    Done,
    Failed,
    Skipped,
}

impl AccessionState {
    pub fn label(self) -> &'static str {
        match self {
            AccessionState::Pending => "pending",
            AccessionState::Downloading => "downloading",
            AccessionState::Moving => "moving",
            AccessionState::Unzipping => "unzipping",
            AccessionState::Renamed => "renamed",
            AccessionState::Done => "done",
            AccessionState::Failed => "failed",
            AccessionState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AccessionState::Done | AccessionState::Failed | AccessionState::Skipped
        )
    }
}

impl fmt::Display for AccessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Assembly accession as supplied by the user, e.g. `GCA_003841505.1`.
///
/// Parsing only normalizes surrounding whitespace and quotes; the structure is
/// checked by [`crate::resolver::resolve`] so that malformed entries can be
/// ledgered per accession instead of rejecting the whole input list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessionId(String);

impl AccessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccessionId {
    type Err = BgdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_matches('"').trim().to_string();
        if normalized.is_empty() {
            return Err(BgdError::InvalidInput("empty accession".to_string()));
        }
        if normalized.contains(['/', '\\']) || normalized.chars().any(char::is_whitespace) {
            return Err(BgdError::MalformedIdentifier(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_accession_trims_quotes() {
        let acc: AccessionId = " \"GCA_003841505.1\" ".parse().unwrap();
        assert_eq!(acc.as_str(), "GCA_003841505.1");
    }

    #[test]
    fn parse_accession_rejects_empty() {
        let err = "  ".parse::<AccessionId>().unwrap_err();
        assert_matches!(err, BgdError::InvalidInput(_));
    }

    #[test]
    fn parse_accession_rejects_path_separators() {
        let err = "GCA_000/001.1".parse::<AccessionId>().unwrap_err();
        assert_matches!(err, BgdError::MalformedIdentifier(_));
    }

    #[test]
    fn terminal_states() {
        assert!(AccessionState::Done.is_terminal());
        assert!(AccessionState::Failed.is_terminal());
        assert!(!AccessionState::Moving.is_terminal());
    }
}
