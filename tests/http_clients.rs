use std::fs;
use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use assert_matches::assert_matches;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

use bulk_genome_downloader::app::{
    App, BatchOptions, BatchReport, CancelToken, ProgressEvent, ProgressSink,
};
use bulk_genome_downloader::domain::{AccessionId, AccessionState, DownloadMode};
use bulk_genome_downloader::error::BgdError;
use bulk_genome_downloader::fetcher::LiteFetcher;
use bulk_genome_downloader::http::HttpSettings;
use bulk_genome_downloader::layout::OutputLayout;
use bulk_genome_downloader::mirror::{HttpMirrorClient, MirrorClient};
use bulk_genome_downloader::ncbi::{DatasetsClient, NcbiDatasetsClient};

const ROOT: &str = "/genomes/all/GCA/003/841/505/";
const V1: &str = "/genomes/all/GCA/003/841/505/GCA_003841505.1_ASM384150v1/";
const V2: &str = "/genomes/all/GCA/003/841/505/GCA_003841505.2_ASM384150v2/";

/// Local servers need a bindable loopback socket; sandboxes without one skip.
async fn start_server() -> Option<MockServer> {
    if TcpListener::bind("127.0.0.1:0").is_err() {
        eprintln!("cannot bind a localhost socket, skipping");
        return None;
    }
    Some(MockServer::start().await)
}

fn settings() -> HttpSettings {
    HttpSettings {
        timeout: Duration::from_secs(10),
        max_retries: 0,
    }
}

fn index(links: &[&str]) -> String {
    let mut html = String::from("<html><body>\n<a href=\"?C=N;O=D\">Name</a>\n");
    html.push_str("<a href=\"/genomes/all/GCA/003/841/\">Parent Directory</a>\n");
    for link in links {
        html.push_str(&format!("<a href=\"{link}\">{link}</a>\n"));
    }
    html.push_str("</body></html>\n");
    html
}

async fn serve(server: &MockServer, at: &str, body: impl Into<Vec<u8>>) {
    let body: Vec<u8> = body.into();
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

fn accession(value: &str) -> AccessionId {
    value.parse().unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn http_mirror_crawls_only_the_requested_version() {
    let Some(server) = start_server().await else {
        return;
    };
    serve(
        &server,
        ROOT,
        index(&["GCA_003841505.1_ASM384150v1/", "GCA_003841505.2_ASM384150v2/"]),
    )
    .await;
    serve(
        &server,
        V1,
        index(&[
            "GCA_003841505.1_ASM384150v1_protein.faa.gz",
            "GCA_003841505.1_ASM384150v1_genomic.fna.gz",
            "md5checksums.txt",
            "GCA_003841505.1_ASM384150v1_assembly_structure/",
        ]),
    )
    .await;
    serve(
        &server,
        &format!("{V1}GCA_003841505.1_ASM384150v1_protein.faa.gz"),
        b"protein v1".to_vec(),
    )
    .await;
    serve(
        &server,
        &format!("{V1}GCA_003841505.1_ASM384150v1_genomic.fna.gz"),
        b"genomic v1".to_vec(),
    )
    .await;
    serve(&server, &format!("{V1}md5checksums.txt"), b"v1 sums".to_vec()).await;
    serve(
        &server,
        &format!("{V1}GCA_003841505.1_ASM384150v1_assembly_structure/"),
        index(&["README.txt"]),
    )
    .await;
    serve(
        &server,
        &format!("{V1}GCA_003841505.1_ASM384150v1_assembly_structure/README.txt"),
        b"structure".to_vec(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(V2))
        .respond_with(ResponseTemplate::new(200).set_body_string(index(&["md5checksums.txt"])))
        .expect(0)
        .mount(&server)
        .await;

    let url = format!("{}{ROOT}", server.uri());
    let temp = tempfile::tempdir().unwrap();
    let destination = temp.path().join("GCA_003841505.1");
    let (stats, dest) = tokio::task::spawn_blocking(move || {
        let client = HttpMirrorClient::new(settings()).unwrap();
        let stats = client
            .mirror(&url, &accession("GCA_003841505.1"), &destination)
            .unwrap();
        (stats, destination)
    })
    .await
    .unwrap();

    assert_eq!(stats.files, 4);
    assert_eq!(
        fs::read(dest.join("GCA_003841505.1_ASM384150v1_protein.faa.gz")).unwrap(),
        b"protein v1"
    );
    assert_eq!(fs::read(dest.join("md5checksums.txt")).unwrap(), b"v1 sums");
    assert!(dest.join("README.txt").is_file());
    assert_eq!(fs::read_dir(&dest).unwrap().count(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn http_mirror_maps_missing_directory_to_status() {
    let Some(server) = start_server().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(ROOT))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let url = format!("{}{ROOT}", server.uri());
    let temp = tempfile::tempdir().unwrap();
    let destination = temp.path().join("GCA_003841505.1");
    let err = tokio::task::spawn_blocking(move || {
        let client = HttpMirrorClient::new(settings()).unwrap();
        client
            .mirror(&url, &accession("GCA_003841505.1"), &destination)
            .unwrap_err()
    })
    .await
    .unwrap();

    assert_matches!(err, BgdError::DownloadStatus { status: 404, .. });
}

#[tokio::test(flavor = "multi_thread")]
async fn http_mirror_without_matching_files_fails() {
    let Some(server) = start_server().await else {
        return;
    };
    serve(&server, ROOT, index(&["GCA_003841505.2_ASM384150v2/"])).await;

    let url = format!("{}{ROOT}", server.uri());
    let temp = tempfile::tempdir().unwrap();
    let destination = temp.path().join("GCA_003841505.1");
    let err = tokio::task::spawn_blocking(move || {
        let client = HttpMirrorClient::new(settings()).unwrap();
        client
            .mirror(&url, &accession("GCA_003841505.1"), &destination)
            .unwrap_err()
    })
    .await
    .unwrap();

    assert_matches!(err, BgdError::DownloadFailed(_));
}

const PACKAGE: &str = "/datasets/v2/genome/accession/GCF_000005845.2/download";

fn package_bytes(accession: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let data = format!("ncbi_dataset/data/{accession}");
    for (name, content) in [
        (
            format!("{data}/protein.faa"),
            ">NP_414542.1 thr operon leader peptide [Escherichia coli str. K-12 substr. MG1655]\nMKR\n",
        ),
        (
            format!("{data}/{accession}_ASM584v2_genomic.fna"),
            ">NC_000913.3 Escherichia coli\nACGT\n",
        ),
    ] {
        writer
            .start_file(name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[tokio::test(flavor = "multi_thread")]
async fn datasets_package_is_saved_with_content_type() {
    let Some(server) = start_server().await else {
        return;
    };
    let body = package_bytes("GCF_000005845.2");
    Mock::given(method("GET"))
        .and(path(PACKAGE))
        .and(query_param("include_annotation_type", "PROT_FASTA"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "application/zip"))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/datasets/v2", server.uri());
    let temp = tempfile::tempdir().unwrap();
    let destination = temp.path().join("package.zip");
    let (info, saved) = tokio::task::spawn_blocking(move || {
        let client = NcbiDatasetsClient::with_base_url(&base, settings()).unwrap();
        let include = vec!["genome".to_string(), "protein".to_string()];
        let info = client
            .download_package(&accession("GCF_000005845.2"), &include, &destination)
            .unwrap();
        (info, fs::read(&destination).unwrap())
    })
    .await
    .unwrap();

    assert!(info.is_zip);
    assert_eq!(info.bytes, body.len() as u64);
    assert_eq!(saved, body);
}

#[tokio::test(flavor = "multi_thread")]
async fn datasets_error_status_is_reported() {
    let Some(server) = start_server().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(PACKAGE))
        .respond_with(
            ResponseTemplate::new(404).set_body_string("{\"error\":\"assembly not found\"}"),
        )
        .mount(&server)
        .await;

    let base = format!("{}/datasets/v2", server.uri());
    let temp = tempfile::tempdir().unwrap();
    let destination = temp.path().join("package.zip");
    let err = tokio::task::spawn_blocking(move || {
        let client = NcbiDatasetsClient::with_base_url(&base, settings()).unwrap();
        client
            .download_package(&accession("GCF_000005845.2"), &[], &destination)
            .unwrap_err()
    })
    .await
    .unwrap();

    assert_matches!(
        err,
        BgdError::DownloadStatus { status: 404, message } if message.contains("assembly not found")
    );
}

struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: ProgressEvent) {}
}

fn lite_batch(base: String, out: &Path) -> BatchReport {
    let client = NcbiDatasetsClient::with_base_url(&base, settings()).unwrap();
    let app = App::new(
        OutputLayout::from_path(out).unwrap(),
        LiteFetcher::new(client),
        BatchOptions {
            mode: DownloadMode::Lite,
            ..BatchOptions::default()
        },
    );
    app.run(
        &["GCF_000005845.2".to_string()],
        &NullSink,
        &CancelToken::new(),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn lite_batch_over_http_places_files() {
    let Some(server) = start_server().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(PACKAGE))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            package_bytes("GCF_000005845.2"),
            "application/zip",
        ))
        .mount(&server)
        .await;

    let base = format!("{}/datasets/v2", server.uri());
    let temp = tempfile::tempdir().unwrap();
    let out = temp.path().join("out");
    let out_dir = out.clone();
    let report = tokio::task::spawn_blocking(move || lite_batch(base, &out_dir))
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].state, AccessionState::Done);
    assert!(
        out.join("nucleotides")
            .join("GCF_000005845.2_ASM584v2_genomic.fna")
            .is_file()
    );
    assert_eq!(fs::read_dir(out.join("proteomes")).unwrap().count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn lite_batch_rejects_non_zip_package() {
    let Some(server) = start_server().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(PACKAGE))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            b"{\"message\":\"try again later\"}".to_vec(),
            "application/json",
        ))
        .mount(&server)
        .await;

    let base = format!("{}/datasets/v2", server.uri());
    let temp = tempfile::tempdir().unwrap();
    let out = temp.path().join("out");
    let out_dir = out.clone();
    let report = tokio::task::spawn_blocking(move || lite_batch(base, &out_dir))
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].state, AccessionState::Failed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, AccessionState::Downloading);
    assert_eq!(report.failures[0].kind, "download-failed");
    assert!(!out.join("assemblies").join("GCF_000005845.2").exists());
    assert!(!out.join("proteomes").join("GCF_000005845.2_protein.faa").exists());
}
