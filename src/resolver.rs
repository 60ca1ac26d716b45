use crate::error::BgdError;

pub const DEFAULT_ARCHIVE_HOST: &str = "ftp.ncbi.nlm.nih.gov";

/// Parsed pieces of an assembly accession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessionParts<'a> {
    pub prefix: &'a str,
    pub digits: &'a str,
    pub version: &'a str,
}

/// Splits `GCA_003841505.1` into `("GCA", "003841505", "1")`.
pub fn split_accession(id: &str) -> Result<AccessionParts<'_>, BgdError> {
    let malformed = || BgdError::MalformedIdentifier(id.to_string());

    let (prefix, versioned) = id.split_once('_').ok_or_else(malformed)?;
    if prefix.is_empty() || versioned.contains('_') {
        return Err(malformed());
    }
    let (digits, version) = versioned.split_once('.').ok_or_else(malformed)?;
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(malformed());
    }
    Ok(AccessionParts {
        prefix,
        digits,
        version,
    })
}

/// Cuts the numeric component into 3-digit shards.
///
/// Lengths that are not a multiple of 3 are rejected rather than padded: the
/// archive never publishes such paths.
pub fn shard_digits(digits: &str) -> Option<Vec<&str>> {
    if digits.is_empty() || digits.len() % 3 != 0 || !digits.is_ascii() {
        return None;
    }
    Some(
        (0..digits.len())
            .step_by(3)
            .map(|start| &digits[start..start + 3])
            .collect(),
    )
}

pub fn resolve(id: &str) -> Result<String, BgdError> {
    resolve_with_host(id, DEFAULT_ARCHIVE_HOST)
}

/// Directory URL holding every version of the assembly, e.g.
/// `https://ftp.ncbi.nlm.nih.gov/genomes/all/GCA/003/841/505/`.
pub fn resolve_with_host(id: &str, host: &str) -> Result<String, BgdError> {
    let parts = split_accession(id.trim())?;
    let shards = shard_digits(parts.digits)
        .filter(|shards| shards.len() >= 3)
        .ok_or_else(|| BgdError::MalformedIdentifier(id.to_string()))?;
    let host = host
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    Ok(format!(
        "https://{host}/genomes/all/{}/{}/{}/{}/",
        parts.prefix, shards[0], shards[1], shards[2]
    ))
}
