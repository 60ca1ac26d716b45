use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use bulk_genome_downloader::app::{self, App, BatchOptions, CancelToken, ProgressSinkKind};
use bulk_genome_downloader::config::{ConfigLoader, ResolvedConfig, read_accession_file};
use bulk_genome_downloader::domain::{DownloadMode, ExistingOutput, MirrorKind};
use bulk_genome_downloader::error::BgdError;
use bulk_genome_downloader::fetcher::{AssemblyFetcher, FullFetcher, LiteFetcher};
use bulk_genome_downloader::layout::OutputLayout;
use bulk_genome_downloader::mirror::{HttpMirrorClient, WgetMirrorClient};
use bulk_genome_downloader::ncbi::{NcbiDatasetsClient, map_genome_include};
use bulk_genome_downloader::output::{JsonOutput, OutputMode, RenameReport, ResolvedAccession};
use bulk_genome_downloader::resolver;
use bulk_genome_downloader::tui::{Tui, batch_summary_line};

#[derive(Parser)]
#[command(name = "bgd")]
#[command(about = "Bulk download of NCBI genome assemblies into proteome and nucleotide folders")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download a list of assemblies")]
    Fetch(FetchArgs),
    #[command(about = "Print the archive directory URL of each accession")]
    Resolve(ResolveArgs),
    #[command(about = "Name the proteomes in a folder after their organism")]
    Rename(RenameArgs),
}

#[derive(Args)]
struct FetchArgs {
    #[arg(short, long)]
    output: PathBuf,

    /// File with one accession per line.
    #[arg(short, long, conflicts_with = "input_list")]
    input: Option<PathBuf>,

    #[arg(short = 'l', long, num_args = 1..)]
    input_list: Vec<String>,

    #[arg(long)]
    mode: Option<DownloadMode>,

    #[arg(long)]
    on_existing: Option<OnExisting>,

    #[arg(long)]
    mirror: Option<MirrorKind>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ResolveArgs {
    #[arg(required = true)]
    accessions: Vec<String>,

    #[arg(long)]
    archive_host: Option<String>,
}

#[derive(Args)]
struct RenameArgs {
    folder: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OnExisting {
    Fail,
    Wipe,
    Skip,
    /// Confirm interactively before wiping.
    Ask,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(bgd) = report.downcast_ref::<BgdError>() {
            return ExitCode::from(map_exit_code(bgd));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BgdError) -> u8 {
    match error {
        BgdError::MalformedIdentifier(_)
        | BgdError::InvalidInput(_)
        | BgdError::InvalidInclude(_)
        | BgdError::ConfigRead(_)
        | BgdError::ConfigParse(_) => 2,
        BgdError::DownloadFailed(_)
        | BgdError::DownloadStatus { .. }
        | BgdError::MissingTool(_) => 3,
        BgdError::OutputConflict(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, output_mode),
        Commands::Resolve(args) => run_resolve(args, output_mode),
        Commands::Rename(args) => run_rename(args, output_mode),
    }
}

fn run_fetch(args: FetchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(source) = &config.source {
        debug!(path = %source.display(), "using config file");
    }

    let accessions = if let Some(path) = &args.input {
        read_accession_file(path)?
    } else if !args.input_list.is_empty() {
        args.input_list.clone()
    } else {
        config.accessions.clone()
    };
    if accessions.is_empty() {
        return Err(BgdError::InvalidInput(
            "no accessions given; use --input, --input-list or the config file".to_string(),
        )
        .into());
    }

    let mode = args.mode.or(config.mode).unwrap_or_default();
    let mirror = args.mirror.or(config.mirror).unwrap_or_default();
    let layout = OutputLayout::from_path(&args.output)?;
    let on_existing = resolve_policy(&args, &config, &layout, output_mode)?;
    let options = BatchOptions {
        mode,
        on_existing,
        archive_host: config.archive_host.clone(),
    };
    info!(%mode, %on_existing, count = accessions.len(), "fetch requested");

    match mode {
        DownloadMode::Full => match mirror {
            MirrorKind::Http => {
                let client = HttpMirrorClient::new(config.http)?;
                let app = App::new(layout, FullFetcher::new(client), options);
                run_batch(app, accessions, output_mode)
            }
            MirrorKind::Wget => {
                let client = WgetMirrorClient::new();
                if !client.is_available() {
                    return Err(BgdError::MissingTool("wget".to_string()).into());
                }
                let app = App::new(layout, FullFetcher::new(client), options);
                run_batch(app, accessions, output_mode)
            }
        },
        DownloadMode::Lite => {
            map_genome_include(&config.include)?;
            let client = NcbiDatasetsClient::with_base_url(&config.datasets_base_url, config.http)?;
            let fetcher = LiteFetcher::with_include(client, config.include.clone());
            let app = App::new(layout, fetcher, options);
            run_batch(app, accessions, output_mode)
        }
    }
}

/// Turns `ask` into `wipe` or a conflict before anything runs.
fn resolve_policy(
    args: &FetchArgs,
    config: &ResolvedConfig,
    layout: &OutputLayout,
    output_mode: OutputMode,
) -> miette::Result<ExistingOutput> {
    match args.on_existing {
        Some(OnExisting::Fail) => return Ok(ExistingOutput::Fail),
        Some(OnExisting::Wipe) => return Ok(ExistingOutput::Wipe),
        Some(OnExisting::Skip) => return Ok(ExistingOutput::Skip),
        Some(OnExisting::Ask) => {}
        None => return Ok(config.on_existing_output.unwrap_or_default()),
    }

    let existing = layout.existing_dirs();
    if existing.is_empty() {
        return Ok(ExistingOutput::Fail);
    }
    debug!(count = existing.len(), "asking before wiping existing output");
    let conflict = || BgdError::OutputConflict(layout.root().as_std_path().to_path_buf());
    match output_mode {
        OutputMode::NonInteractive => Err(conflict().into()),
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Fetch, CancelToken::new());
            if tui.confirm_wipe(layout.root(), &existing)? {
                Ok(ExistingOutput::Wipe)
            } else {
                Err(conflict().into())
            }
        }
    }
}

fn run_batch<F: AssemblyFetcher + 'static>(
    app: App<F>,
    accessions: Vec<String>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let cancel = CancelToken::new();
    match output_mode {
        OutputMode::NonInteractive => {
            let report = app.run(&accessions, &JsonOutput, &cancel)?;
            JsonOutput::print_batch(&report).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Fetch, cancel.clone());
            let report = tui.run(move |sink| app.run(&accessions, sink, &cancel))?;
            tui.finish_batch(&report)?;
            println!("{}", batch_summary_line(&report));
            Ok(())
        }
    }
}

fn run_resolve(args: ResolveArgs, output_mode: OutputMode) -> miette::Result<()> {
    let host = args
        .archive_host
        .unwrap_or_else(|| resolver::DEFAULT_ARCHIVE_HOST.to_string());
    let resolved = args
        .accessions
        .iter()
        .map(|accession| match resolver::resolve_with_host(accession, &host) {
            Ok(url) => ResolvedAccession {
                accession: accession.clone(),
                url: Some(url),
                error: None,
            },
            Err(err) => ResolvedAccession {
                accession: accession.clone(),
                url: None,
                error: Some(err.to_string()),
            },
        })
        .collect::<Vec<_>>();

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_resolve(&resolved).into_diagnostic()?,
        OutputMode::Interactive => {
            for item in &resolved {
                match (&item.url, &item.error) {
                    (Some(url), _) => println!("{}\t{url}", item.accession),
                    (None, Some(error)) => eprintln!("{}\t{error}", item.accession),
                    (None, None) => {}
                }
            }
        }
    }

    if let Some(bad) = resolved.iter().find(|item| item.url.is_none()) {
        return Err(BgdError::MalformedIdentifier(bad.accession.clone()).into());
    }
    Ok(())
}

fn run_rename(args: RenameArgs, output_mode: OutputMode) -> miette::Result<()> {
    let folder = args.folder;
    let display = folder.display().to_string();
    let results = match output_mode {
        OutputMode::NonInteractive => app::rename_folder(&folder, &JsonOutput)?,
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Rename, CancelToken::new());
            tui.run(move |sink| app::rename_folder(&folder, sink))?
        }
    };

    let report = RenameReport {
        folder: display,
        results,
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_rename(&report).into_diagnostic()?,
        OutputMode::Interactive => {
            let failed = report
                .results
                .iter()
                .filter(|result| result.error.is_some())
                .count();
            println!(
                "{}: {} files checked, {failed} without an organism name",
                report.folder,
                report.results.len()
            );
        }
    }
    Ok(())
}
