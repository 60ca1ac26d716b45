use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use zip::ZipArchive;

use crate::error::BgdError;

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), BgdError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        BgdError::ExtractionFailed(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| BgdError::ExtractionFailed(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| BgdError::ExtractionFailed(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(BgdError::ExtractionFailed(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| BgdError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| BgdError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| BgdError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| BgdError::ExtractionFailed(err.to_string()))?;
    }
    Ok(())
}

pub fn validate_zip(zip_path: &Path) -> Result<(), BgdError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        BgdError::ExtractionFailed(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| BgdError::ExtractionFailed(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| BgdError::ExtractionFailed(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| BgdError::ExtractionFailed(err.to_string()))?;
    }
    Ok(())
}

/// Decompresses `foo.gz` into `foo` next to it and removes the archive.
///
/// The output is written to a temporary sibling first, so a corrupt archive
/// leaves the `.gz` file untouched.
pub fn gunzip_in_place(gz_path: &Path) -> Result<PathBuf, BgdError> {
    let target = gz_path
        .to_str()
        .and_then(|path| path.strip_suffix(".gz"))
        .map(PathBuf::from)
        .ok_or_else(|| {
            BgdError::ExtractionFailed(format!("not a .gz file: {}", gz_path.display()))
        })?;
    let parent = target
        .parent()
        .ok_or_else(|| BgdError::Filesystem("invalid gzip target path".to_string()))?;

    let input = fs::File::open(gz_path).map_err(|err| {
        BgdError::ExtractionFailed(format!("open gzip {}: {err}", gz_path.display()))
    })?;
    let mut decoder = MultiGzDecoder::new(io::BufReader::new(input));
    let mut temp = tempfile::Builder::new()
        .prefix("bgd-gunzip")
        .tempfile_in(parent)
        .map_err(|err| BgdError::Filesystem(err.to_string()))?;
    io::copy(&mut decoder, temp.as_file_mut()).map_err(|err| {
        BgdError::ExtractionFailed(format!("gunzip {}: {err}", gz_path.display()))
    })?;
    temp.persist(&target)
        .map_err(|err| BgdError::Filesystem(err.to_string()))?;
    fs::remove_file(gz_path).map_err(|err| BgdError::Filesystem(err.to_string()))?;
    Ok(target)
}

pub fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<(), BgdError> {
    fs::create_dir_all(dest).map_err(|err| BgdError::Filesystem(err.to_string()))?;
    for entry in walk_dir(source)? {
        let relative = entry
            .strip_prefix(source)
            .map_err(|err| BgdError::Filesystem(err.to_string()))?;
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| BgdError::Filesystem(err.to_string()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| BgdError::Filesystem(err.to_string()))?;
            }
            fs::copy(&entry, &target).map_err(|err| BgdError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

pub fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, BgdError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| BgdError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| BgdError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

/// Binaries on PATH, looked up once at client construction.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[test]
    fn gunzip_replaces_archive() {
        let temp = tempfile::tempdir().unwrap();
        let gz_path = temp.path().join("x_protein.faa.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&gz_path).unwrap(), Compression::fast());
        encoder.write_all(b">p1 [Bacillus subtilis]\nMKV\n").unwrap();
        encoder.finish().unwrap();

        let out = gunzip_in_place(&gz_path).unwrap();
        assert_eq!(out, temp.path().join("x_protein.faa"));
        assert!(!gz_path.exists());
        assert_eq!(
            fs::read_to_string(out).unwrap(),
            ">p1 [Bacillus subtilis]\nMKV\n"
        );
    }

    #[test]
    fn gunzip_keeps_corrupt_archive() {
        let temp = tempfile::tempdir().unwrap();
        let gz_path = temp.path().join("broken.fna.gz");
        fs::write(&gz_path, b"definitely not gzip").unwrap();

        let err = gunzip_in_place(&gz_path).unwrap_err();
        assert_matches!(err, BgdError::ExtractionFailed(_));
        assert!(gz_path.exists());
        assert!(!temp.path().join("broken.fna").exists());
    }

    #[test]
    fn gunzip_rejects_plain_names() {
        let err = gunzip_in_place(Path::new("plain.fna")).unwrap_err();
        assert_matches!(err, BgdError::ExtractionFailed(_));
    }
}
