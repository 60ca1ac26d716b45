use std::cell::Cell;
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{AccessionId, AccessionState, DownloadMode, ExistingOutput};
use crate::error::BgdError;
use crate::fetcher::{AssemblyFetcher, FetchedFiles, RemoteLocation};
use crate::layout::OutputLayout;
use crate::ledger::{FailureEntry, FailureLedger};
use crate::renamer::{self, RenameOutcome, RenameResult};
use crate::resolver::{self, DEFAULT_ARCHIVE_HOST};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub mode: DownloadMode,
    pub on_existing: ExistingOutput,
    pub archive_host: String,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            mode: DownloadMode::Full,
            on_existing: ExistingOutput::Fail,
            archive_host: DEFAULT_ARCHIVE_HOST.to_string(),
        }
    }
}

/// Stops the batch before the next accession once set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessionOutcome {
    pub accession: String,
    pub state: AccessionState,
    pub directory_url: Option<String>,
    pub protein_file: Option<String>,
    pub nucleotide_file: Option<String>,
    pub renamed: bool,
    pub error: Option<String>,
}

impl AccessionOutcome {
    fn pending(accession: &str) -> Self {
        Self {
            accession: accession.to_string(),
            state: AccessionState::Pending,
            directory_url: None,
            protein_file: None,
            nucleotide_file: None,
            renamed: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub mode: DownloadMode,
    pub output_root: String,
    pub outcomes: Vec<AccessionOutcome>,
    pub failures: Vec<FailureEntry>,
    pub renames: Vec<RenameResult>,
    pub report_path: Option<String>,
    pub summary_path: String,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn count(&self, state: AccessionState) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.state == state)
            .count()
    }

    pub fn rename_failures(&self) -> usize {
        self.renames
            .iter()
            .filter(|result| result.error.is_some())
            .count()
    }
}

/// Run summary persisted next to the outputs.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub tool: String,
    pub mode: DownloadMode,
    pub on_existing_output: ExistingOutput,
    pub started_at: String,
    pub finished_at: String,
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub renamed: usize,
    pub rename_failures: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Fetch,
    Rename,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub accession: Option<String>,
    pub state: Option<AccessionState>,
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            accession: None,
            state: None,
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn state(
        accession: impl ToString,
        state: AccessionState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            accession: Some(accession.to_string()),
            state: Some(state),
            message: message.into(),
            elapsed: None,
        }
    }

    fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Remembers the last state a fetcher reported so failures are ledgered at
/// the step where they happened.
struct StateTracker<'a> {
    inner: &'a dyn ProgressSink,
    state: Cell<AccessionState>,
}

impl<'a> StateTracker<'a> {
    fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            state: Cell::new(AccessionState::Pending),
        }
    }
}

impl ProgressSink for StateTracker<'_> {
    fn event(&self, event: ProgressEvent) {
        if let Some(state) = event.state {
            self.state.set(state);
        }
        self.inner.event(event);
    }
}

enum Step {
    Fetched {
        url: String,
        files: FetchedFiles,
    },
    Skipped {
        url: String,
    },
}

struct StepFailure {
    stage: AccessionState,
    url: Option<String>,
    error: BgdError,
}

pub struct App<F: AssemblyFetcher> {
    layout: OutputLayout,
    fetcher: F,
    options: BatchOptions,
}

impl<F: AssemblyFetcher> App<F> {
    pub fn new(layout: OutputLayout, fetcher: F, options: BatchOptions) -> Self {
        Self {
            layout,
            fetcher,
            options,
        }
    }

    /// Downloads every accession in order, isolating per-accession failures.
    ///
    /// Only output-layout problems abort the run; everything else ends up in
    /// the returned report's failure list.
    pub fn run(
        &self,
        accessions: &[String],
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<BatchReport, BgdError> {
        let started_at = chrono::Utc::now();
        let started = Instant::now();

        sink.event(ProgressEvent::message(format!(
            "preparing {} (on existing output: {})",
            self.layout.root(),
            self.options.on_existing
        )));
        self.layout.prepare(self.options.on_existing)?;

        let accessions = dedupe(accessions);
        info!(
            count = accessions.len(),
            mode = %self.options.mode,
            output = %self.layout.root(),
            "starting batch"
        );
        let mut outcomes = accessions
            .iter()
            .map(|raw| AccessionOutcome::pending(raw))
            .collect::<Vec<_>>();
        for outcome in &outcomes {
            sink.event(ProgressEvent::state(
                &outcome.accession,
                AccessionState::Pending,
                "queued",
            ));
        }

        let mut ledger = FailureLedger::new();
        let mut fetched = Vec::new();
        let mut cancelled = false;

        for (idx, raw) in accessions.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                warn!(remaining = accessions.len() - idx, "batch cancelled");
                sink.event(ProgressEvent::message("cancelled; remaining accessions left pending"));
                break;
            }

            let item_start = Instant::now();
            let tracker = StateTracker::new(sink);
            let outcome = &mut outcomes[idx];
            match self.process_one(raw, &tracker) {
                Ok(Step::Fetched { url, files }) => {
                    outcome.directory_url = Some(url);
                    outcome.protein_file = Some(files.protein.display().to_string());
                    outcome.nucleotide_file = Some(files.nucleotide.display().to_string());
                    fetched.push((idx, files));
                    sink.event(
                        ProgressEvent::message(format!("{raw} fetched"))
                            .with_elapsed(item_start.elapsed()),
                    );
                }
                Ok(Step::Skipped { url }) => {
                    outcome.directory_url = Some(url);
                    outcome.state = AccessionState::Skipped;
                    info!(accession = %raw, "assembly folder exists, skipping");
                    sink.event(ProgressEvent::state(
                        raw,
                        AccessionState::Skipped,
                        "already downloaded",
                    ));
                }
                Err(failure) => {
                    warn!(
                        accession = %raw,
                        stage = %failure.stage,
                        error = %failure.error,
                        "accession failed"
                    );
                    ledger.record(raw, failure.stage, &failure.error);
                    outcome.directory_url = failure.url;
                    outcome.state = AccessionState::Failed;
                    outcome.error = Some(failure.error.to_string());
                    sink.event(
                        ProgressEvent::state(raw, AccessionState::Failed, failure.error.to_string())
                            .with_elapsed(item_start.elapsed()),
                    );
                }
            }
        }

        let renames = self.rename_sweep(sink);
        for (idx, files) in &fetched {
            let outcome = &mut outcomes[*idx];
            if let Some(renamed_to) = protein_rename(&renames, &files.protein) {
                outcome.renamed = true;
                outcome.protein_file = Some(
                    self.layout
                        .proteomes_dir()
                        .join(&renamed_to)
                        .to_string(),
                );
                sink.event(ProgressEvent::state(
                    &outcome.accession,
                    AccessionState::Renamed,
                    renamed_to,
                ));
            }
            outcome.state = AccessionState::Done;
            sink.event(ProgressEvent::state(
                &outcome.accession,
                AccessionState::Done,
                "done",
            ));
        }

        let report_path = self.layout.report_path();
        let report_written = ledger.write_report(report_path.as_std_path())?;
        if report_written {
            warn!(
                failed = ledger.len(),
                report = %report_path,
                "some assemblies could not be downloaded"
            );
            sink.event(ProgressEvent::message(format!(
                "{} of {} assemblies failed; see {report_path}",
                ledger.len(),
                accessions.len()
            )));
        } else if report_path.as_std_path().exists() {
            fs::remove_file(report_path.as_std_path())
                .map_err(|err| BgdError::Filesystem(err.to_string()))?;
        }

        let report = BatchReport {
            mode: self.options.mode,
            output_root: self.layout.root().to_string(),
            outcomes,
            failures: ledger.entries().to_vec(),
            renames,
            report_path: report_written.then(|| report_path.to_string()),
            summary_path: self.layout.summary_path().to_string(),
            cancelled,
        };
        let summary = self.summarize(&report, started_at.to_rfc3339());
        OutputLayout::write_json(&self.layout.summary_path(), &summary)?;
        info!(
            done = summary.done,
            failed = summary.failed,
            skipped = summary.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        Ok(report)
    }

    fn process_one(&self, raw: &str, sink: &StateTracker<'_>) -> Result<Step, StepFailure> {
        let fail_early = |error: BgdError| StepFailure {
            stage: AccessionState::Pending,
            url: None,
            error,
        };

        let accession = raw.parse::<AccessionId>().map_err(fail_early)?;
        let url = match resolver::resolve_with_host(accession.as_str(), &self.options.archive_host)
        {
            Ok(url) => url,
            Err(error) => {
                warn!(accession = %raw, "malformed accession, not downloading");
                return Err(fail_early(error));
            }
        };
        debug!(accession = %accession, %url, "resolved");

        let paths = self.layout.accession_paths(&accession);
        let assembly_dir = paths.assembly_dir.as_std_path();
        if assembly_dir.exists() {
            if self.options.on_existing == ExistingOutput::Skip {
                return Ok(Step::Skipped { url });
            }
            return Err(StepFailure {
                stage: AccessionState::Pending,
                url: Some(url),
                error: BgdError::Filesystem(format!(
                    "assembly folder already exists: {}",
                    paths.assembly_dir
                )),
            });
        }
        fs::create_dir_all(assembly_dir).map_err(|err| StepFailure {
            stage: AccessionState::Pending,
            url: Some(url.clone()),
            error: BgdError::Filesystem(err.to_string()),
        })?;

        let remote = RemoteLocation {
            directory_url: url.clone(),
        };
        match self.fetcher.fetch(&accession, &remote, &paths, sink) {
            Ok(files) => Ok(Step::Fetched { url, files }),
            Err(error) => {
                // Drop the partial folder so a `skip` rerun retries it.
                if let Err(err) = fs::remove_dir_all(assembly_dir) {
                    debug!(error = %err, "could not remove partial assembly folder");
                }
                Err(StepFailure {
                    stage: sink.state.get(),
                    url: Some(url),
                    error,
                })
            }
        }
    }

    fn rename_sweep(&self, sink: &dyn ProgressSink) -> Vec<RenameResult> {
        sink.event(ProgressEvent::message("renaming proteomes"));
        match renamer::rename_all(self.layout.proteomes_dir().as_std_path()) {
            Ok(results) => results,
            Err(err) => {
                warn!(error = %err, "rename sweep could not list proteomes");
                Vec::new()
            }
        }
    }

    fn summarize(&self, report: &BatchReport, started_at: String) -> BatchSummary {
        BatchSummary {
            tool: format!("bgd/{}", env!("CARGO_PKG_VERSION")),
            mode: self.options.mode,
            on_existing_output: self.options.on_existing,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            total: report.outcomes.len(),
            done: report.count(AccessionState::Done),
            failed: report.count(AccessionState::Failed),
            skipped: report.count(AccessionState::Skipped),
            pending: report.count(AccessionState::Pending),
            renamed: report.outcomes.iter().filter(|item| item.renamed).count(),
            rename_failures: report.rename_failures(),
            cancelled: report.cancelled,
        }
    }
}

/// Renames every proteome in `folder` on its own, outside a batch.
pub fn rename_folder(
    folder: &std::path::Path,
    sink: &dyn ProgressSink,
) -> Result<Vec<RenameResult>, BgdError> {
    if !folder.is_dir() {
        return Err(BgdError::InvalidInput(format!(
            "not a directory: {}",
            folder.display()
        )));
    }
    let start = Instant::now();
    sink.event(ProgressEvent::message(format!(
        "renaming proteomes in {}",
        folder.display()
    )));
    let results = renamer::rename_all(folder)?;
    for result in &results {
        let message = match (&result.outcome, &result.error) {
            (Some(RenameOutcome::Renamed { from, to }), _) => format!("{from} -> {to}"),
            (Some(RenameOutcome::AlreadyNamed { file }), _) => format!("{file} already named"),
            (Some(RenameOutcome::NotProteome { .. }), _) => continue,
            (None, Some(error)) => format!("{}: {error}", result.file),
            (None, None) => continue,
        };
        sink.event(ProgressEvent::message(message));
    }
    sink.event(
        ProgressEvent::message(format!("{} files checked", results.len()))
            .with_elapsed(start.elapsed()),
    );
    Ok(results)
}

/// Name the proteome ended up with after the sweep, if it carries an organism.
fn protein_rename(renames: &[RenameResult], protein: &std::path::Path) -> Option<String> {
    let name = protein.file_name()?.to_str()?;
    renames
        .iter()
        .find(|result| result.file == name)
        .and_then(|result| match &result.outcome {
            Some(RenameOutcome::Renamed { to, .. }) => Some(to.clone()),
            Some(RenameOutcome::AlreadyNamed { file }) => Some(file.clone()),
            _ => None,
        })
}

fn dedupe(accessions: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(accessions.len());
    for raw in accessions {
        let key = raw.trim().trim_matches('"').trim().to_string();
        if key.is_empty() {
            continue;
        }
        if seen.insert(key.clone()) {
            unique.push(key);
        } else {
            warn!(accession = %key, "duplicate accession ignored");
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let input = vec![
            "GCA_1.1".to_string(),
            " GCA_2.1".to_string(),
            "\"GCA_1.1\"".to_string(),
            "".to_string(),
        ];
        assert_eq!(dedupe(&input), vec!["GCA_1.1", "GCA_2.1"]);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn protein_rename_lookup() {
        let renames = vec![RenameResult {
            file: "x_protein.faa".to_string(),
            outcome: Some(RenameOutcome::Renamed {
                from: "x_protein.faa".to_string(),
                to: "x_protein_E_coli.faa".to_string(),
            }),
            error: None,
        }];
        assert_eq!(
            protein_rename(&renames, std::path::Path::new("/o/proteomes/x_protein.faa")).as_deref(),
            Some("x_protein_E_coli.faa")
        );
        assert_eq!(
            protein_rename(&renames, std::path::Path::new("/o/proteomes/y.faa")),
            None
        );
    }
}
