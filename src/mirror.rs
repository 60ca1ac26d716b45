use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use crate::domain::AccessionId;
use crate::error::BgdError;
use crate::fs_util::find_in_path;
use crate::http::{self, HttpSettings};

/// Deepest directory level followed below the mirrored URL.
const MAX_DEPTH: usize = 4;

static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href\s*=\s*"([^"]+)""#).expect("href pattern is valid")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub files: usize,
    pub bytes: u64,
}

/// Recursive download of one accession's files below a remote directory into
/// one flat local folder, never walking above the starting directory.
///
/// The archive directory is shared by every version of an assembly; only the
/// version subdirectories named `<accession>_*` are followed.
pub trait MirrorClient: Send + Sync {
    fn mirror(
        &self,
        url: &str,
        accession: &AccessionId,
        destination: &Path,
    ) -> Result<MirrorStats, BgdError>;
}

/// Links found on one directory index page.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Listing {
    pub dirs: Vec<Url>,
    pub files: Vec<Url>,
}

/// Splits the links of an HTML index into subdirectories and files below
/// `root`. Sorting links, parent links and anything outside `root` are dropped.
pub fn parse_listing(page: &Url, root: &Url, html: &str) -> Listing {
    let mut dirs = BTreeSet::new();
    let mut files = BTreeSet::new();
    for caps in HREF.captures_iter(html) {
        let Some(href) = caps.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        if href.is_empty()
            || href.starts_with('?')
            || href.starts_with('#')
            || href.starts_with("mailto:")
        {
            continue;
        }
        let Ok(mut link) = page.join(href) else {
            continue;
        };
        link.set_query(None);
        link.set_fragment(None);
        if !link.as_str().starts_with(root.as_str()) || link == *page {
            continue;
        }
        if link.path().ends_with('/') {
            dirs.insert(link);
        } else {
            files.insert(link);
        }
    }
    Listing {
        dirs: dirs.into_iter().collect(),
        files: files.into_iter().collect(),
    }
}

/// Mirrors by crawling the archive's HTML directory indexes.
#[derive(Clone)]
pub struct HttpMirrorClient {
    client: Client,
    max_retries: usize,
}

impl HttpMirrorClient {
    pub fn new(settings: HttpSettings) -> Result<Self, BgdError> {
        Ok(Self {
            client: http::build_client(settings, HeaderMap::new())?,
            max_retries: settings.max_retries,
        })
    }

    fn fetch_index(&self, url: &Url) -> Result<String, BgdError> {
        let response = http::send_with_retries(self.max_retries, || self.client.get(url.clone()))?;
        http::ensure_success(response)?
            .text()
            .map_err(|err| BgdError::DownloadFailed(err.to_string()))
    }

    fn fetch_file(&self, url: &Url, destination: &Path) -> Result<u64, BgdError> {
        let response = http::send_with_retries(self.max_retries, || self.client.get(url.clone()))?;
        http::write_response_to_file(response, destination)
    }
}

impl MirrorClient for HttpMirrorClient {
    fn mirror(
        &self,
        url: &str,
        accession: &AccessionId,
        destination: &Path,
    ) -> Result<MirrorStats, BgdError> {
        let root = directory_url(url)?;
        fs::create_dir_all(destination).map_err(|err| BgdError::Filesystem(err.to_string()))?;
        let version_prefix = format!("{accession}_");

        let mut stats = MirrorStats::default();
        let mut visited = HashSet::new();
        let mut written = HashSet::new();
        let mut stack = vec![(root.clone(), 0usize)];
        while let Some((dir, depth)) = stack.pop() {
            if !visited.insert(dir.clone()) {
                continue;
            }
            let html = self.fetch_index(&dir)?;
            let listing = parse_listing(&dir, &root, &html);
            debug!(
                dir = %dir,
                dirs = listing.dirs.len(),
                files = listing.files.len(),
                "indexed directory"
            );
            for file in &listing.files {
                let Some(name) = file_name(file) else {
                    continue;
                };
                if !written.insert(name.to_string()) {
                    warn!(file = name, url = %file, "flattened file overwrites an earlier one");
                }
                stats.bytes += self.fetch_file(file, &destination.join(name))?;
                stats.files += 1;
            }
            if depth >= MAX_DEPTH {
                continue;
            }
            for sub in listing.dirs {
                if depth == 0 && !is_version_dir(&sub, &version_prefix) {
                    debug!(dir = %sub, "skipping other assembly version");
                    continue;
                }
                stack.push((sub, depth + 1));
            }
        }

        if stats.files == 0 {
            return Err(BgdError::DownloadFailed(format!(
                "no files for {accession} found under {root}"
            )));
        }
        Ok(stats)
    }
}

/// Mirrors by running `wget -r -nd --no-parent -e robots=off` in the target,
/// accepting only URLs below the requested version's subdirectory.
#[derive(Clone)]
pub struct WgetMirrorClient {
    wget: Option<PathBuf>,
}

impl WgetMirrorClient {
    pub fn new() -> Self {
        Self {
            wget: find_in_path("wget"),
        }
    }

    pub fn is_available(&self) -> bool {
        self.wget.is_some()
    }

    pub fn wget_args(url: &str, accession: &AccessionId) -> Vec<String> {
        let accept = format!("/{}_", regex::escape(accession.as_str()));
        [
            "-r",
            "-q",
            "-nd",
            "--no-parent",
            "-e",
            "robots=off",
            "-R",
            "index.html*",
            "--accept-regex",
            accept.as_str(),
            url,
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
    }
}

impl Default for WgetMirrorClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorClient for WgetMirrorClient {
    fn mirror(
        &self,
        url: &str,
        accession: &AccessionId,
        destination: &Path,
    ) -> Result<MirrorStats, BgdError> {
        let wget = self
            .wget
            .as_ref()
            .ok_or_else(|| BgdError::MissingTool("wget".to_string()))?;
        fs::create_dir_all(destination).map_err(|err| BgdError::Filesystem(err.to_string()))?;

        let output = Command::new(wget)
            .args(Self::wget_args(url, accession))
            .current_dir(destination)
            .output()
            .map_err(|err| BgdError::DownloadFailed(err.to_string()))?;
        // wget exits 8 when some files 404 but others arrived; judge by content.
        let stats = dir_stats(destination)?;
        if stats.files > 0 {
            return Ok(stats);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("wget fetched nothing from {url} ({})", output.status)
        } else {
            stderr
        };
        Err(BgdError::DownloadFailed(message))
    }
}

fn directory_url(url: &str) -> Result<Url, BgdError> {
    let normalized = if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    };
    Url::parse(&normalized).map_err(|err| BgdError::DownloadFailed(format!("{url}: {err}")))
}

fn file_name(url: &Url) -> Option<&str> {
    url.path_segments()?
        .next_back()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

fn dir_name(url: &Url) -> Option<&str> {
    url.path_segments()?.rev().find(|segment| !segment.is_empty())
}

fn is_version_dir(url: &Url, version_prefix: &str) -> bool {
    dir_name(url).is_some_and(|name| name.starts_with(version_prefix))
}

fn dir_stats(dir: &Path) -> Result<MirrorStats, BgdError> {
    let mut stats = MirrorStats::default();
    for entry in fs::read_dir(dir).map_err(|err| BgdError::Filesystem(err.to_string()))? {
        let entry = entry.map_err(|err| BgdError::Filesystem(err.to_string()))?;
        let meta = entry
            .metadata()
            .map_err(|err| BgdError::Filesystem(err.to_string()))?;
        if meta.is_file() {
            stats.files += 1;
            stats.bytes += meta.len();
        }
    }
    Ok(stats)
}
