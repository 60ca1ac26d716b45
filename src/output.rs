use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{BatchReport, ProgressEvent, ProgressSink};
use crate::renamer::RenameResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedAccession {
    pub accession: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenameReport {
    pub folder: String,
    pub results: Vec<RenameResult>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_batch(result: &BatchReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_resolve(result: &[ResolvedAccession]) -> io::Result<()> {
        Self::print_json(&result)
    }

    pub fn print_rename(result: &RenameReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Stdout carries the JSON document, so progress goes to the log on stderr.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        match (&event.accession, event.state) {
            (Some(accession), Some(state)) => {
                info!(accession = %accession, state = %state, "{}", event.message)
            }
            _ => info!("{}", event.message),
        }
    }
}
