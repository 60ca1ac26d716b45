use std::path::Path;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::debug;

use crate::domain::AccessionId;
use crate::error::BgdError;
use crate::http::{self, HttpSettings};

pub const DEFAULT_DATASETS_BASE_URL: &str = "https://api.ncbi.nlm.nih.gov/datasets/v2";

#[derive(Debug, Clone, Copy)]
pub struct DownloadInfo {
    pub is_zip: bool,
    pub bytes: u64,
}

/// Packaged genome download from the NCBI Datasets REST API.
pub trait DatasetsClient: Send + Sync {
    fn download_package(
        &self,
        accession: &AccessionId,
        include: &[String],
        destination: &Path,
    ) -> Result<DownloadInfo, BgdError>;
}

#[derive(Clone)]
pub struct NcbiDatasetsClient {
    client: Client,
    base_url: String,
    max_retries: usize,
}

impl NcbiDatasetsClient {
    pub fn new(settings: HttpSettings) -> Result<Self, BgdError> {
        Self::with_base_url(DEFAULT_DATASETS_BASE_URL, settings)
    }

    pub fn with_base_url(base_url: &str, settings: HttpSettings) -> Result<Self, BgdError> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Datasets-Client", HeaderValue::from_static("bgd"));
        headers.insert(
            "X-Datasets-Client-Version",
            HeaderValue::from_str(env!("CARGO_PKG_VERSION"))
                .map_err(|err| BgdError::DownloadFailed(err.to_string()))?,
        );
        if let Ok(api_key) = std::env::var("NCBI_API_KEY") {
            if !api_key.trim().is_empty() {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(api_key.trim())
                        .map_err(|err| BgdError::DownloadFailed(err.to_string()))?,
                );
            }
        }

        Ok(Self {
            client: http::build_client(settings, headers)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: settings.max_retries,
        })
    }

    pub fn package_url(&self, accession: &AccessionId) -> String {
        format!(
            "{}/genome/accession/{}/download",
            self.base_url,
            accession.as_str()
        )
    }
}

impl DatasetsClient for NcbiDatasetsClient {
    fn download_package(
        &self,
        accession: &AccessionId,
        include: &[String],
        destination: &Path,
    ) -> Result<DownloadInfo, BgdError> {
        let include_params = map_genome_include(include)?;
        let url = self.package_url(accession);
        debug!(%url, include = ?include_params, "requesting datasets package");
        let response = http::send_with_retries(self.max_retries, || {
            let mut request = self.client.get(&url);
            for value in &include_params {
                request = request.query(&[("include_annotation_type", value.as_str())]);
            }
            request
        })?;
        let is_zip = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.contains("zip"))
            .unwrap_or(false);
        let bytes = http::write_response_to_file(response, destination)?;
        Ok(DownloadInfo { is_zip, bytes })
    }
}

/// Annotation types requested by lite mode unless configured otherwise.
pub fn default_genome_include() -> Vec<String> {
    vec![
        "genome".to_string(),
        "protein".to_string(),
        "gff3".to_string(),
        "seq-report".to_string(),
    ]
}

pub fn map_genome_include(include: &[String]) -> Result<Vec<String>, BgdError> {
    let mut mapped = Vec::new();
    for item in include {
        let value = match item.as_str() {
            "genome" => "GENOME_FASTA",
            "gff3" => "GENOME_GFF",
            "gbff" => "GENOME_GBFF",
            "gtf" => "GENOME_GTF",
            "rna" => "RNA_FASTA",
            "protein" => "PROT_FASTA",
            "cds" => "CDS_FASTA",
            "seq-report" => "SEQUENCE_REPORT",
            "default" => "DEFAULT",
            other => {
                return Err(BgdError::InvalidInclude(other.to_string()));
            }
        };
        mapped.push(value.to_string());
    }
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn map_include_values() {
        let mapped = map_genome_include(&default_genome_include()).unwrap();
        assert_eq!(
            mapped,
            vec!["GENOME_FASTA", "PROT_FASTA", "GENOME_GFF", "SEQUENCE_REPORT"]
        );
    }

    #[test]
    fn map_include_rejects_unknown() {
        let err = map_genome_include(&["proteome".to_string()]).unwrap_err();
        assert_matches!(err, BgdError::InvalidInclude(_));
    }

    #[test]
    fn package_url_layout() {
        let client = NcbiDatasetsClient::with_base_url(
            "https://example.org/datasets/v2/",
            HttpSettings::default(),
        )
        .unwrap();
        let acc: AccessionId = "GCF_000005845.2".parse().unwrap();
        assert_eq!(
            client.package_url(&acc),
            "https://example.org/datasets/v2/genome/accession/GCF_000005845.2/download"
        );
    }
}
