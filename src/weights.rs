//! Detector weights provisioning.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};

const CHUNK_SIZE: usize = 64 * 1024;

/// Make sure the model file at `path` exists, downloading it from `url` when absent.
///
/// An existing file is used as-is. A download is streamed to a `.part`
/// sibling, checked against `sha256` when given, and only then moved into
/// place, so an interrupted fetch never leaves a truncated model behind.
pub fn ensure_weights(path: &Path, url: Option<&str>, sha256: Option<&str>) -> Result<PathBuf> {
    if path.is_file() {
        log::debug!("using detector weights at {}", path.display());
        return Ok(path.to_path_buf());
    }
    let url = url.ok_or_else(|| {
        anyhow!(
            "detector weights {} not found and no download url configured",
            path.display()
        )
    })?;
    download(url, path, sha256)?;
    Ok(path.to_path_buf())
}

fn download(url: &str, path: &Path, sha256: Option<&str>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create weights directory {}", parent.display()))?;
    }

    log::info!("downloading detector weights from {}", url);
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch detector weights from {}", url))?;

    let partial = partial_path(path);
    let result = (|| -> Result<()> {
        let mut file = File::create(&partial)
            .with_context(|| format!("create {}", partial.display()))?;
        let (bytes, digest) = copy_hashed(response.into_reader(), &mut file)?;
        file.sync_all().context("flush detector weights")?;
        if bytes == 0 {
            return Err(anyhow!("weights download from {} was empty", url));
        }
        if let Some(expected) = sha256 {
            verify_digest(&digest, expected)?;
        }
        fs::rename(&partial, path)
            .with_context(|| format!("move weights into {}", path.display()))?;
        log::info!("saved {} bytes of detector weights to {}", bytes, path.display());
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Copy `reader` into `writer`, returning the byte count and hex SHA-256.
fn copy_hashed<R: Read, W: Write>(mut reader: R, writer: &mut W) -> Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).context("read weights stream")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).context("write weights")?;
        total += n as u64;
    }
    Ok((total, hex::encode(hasher.finalize())))
}

fn verify_digest(actual: &str, expected: &str) -> Result<()> {
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(anyhow!(
            "weights checksum mismatch: expected {}, got {}",
            expected.trim(),
            actual
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_file_is_used_without_download() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let model = dir.path().join("yolov8n.onnx");
        fs::write(&model, b"onnx")?;
        let resolved = ensure_weights(&model, Some("http://127.0.0.1:9/unreachable"), None)?;
        assert_eq!(resolved, model);
        Ok(())
    }

    #[test]
    fn missing_file_without_url_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = ensure_weights(&dir.path().join("absent.onnx"), None, None).unwrap_err();
        assert!(err.to_string().contains("no download url"));
        Ok(())
    }

    #[test]
    fn hashes_while_copying() -> Result<()> {
        let mut out = Vec::new();
        let (bytes, digest) = copy_hashed(&b"abc"[..], &mut out)?;
        assert_eq!(bytes, 3);
        assert_eq!(out, b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(verify_digest(&digest, &digest.to_uppercase()).is_ok());
        assert!(verify_digest(&digest, "00").is_err());
        Ok(())
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("models/yolov8n.onnx")),
            PathBuf::from("models/yolov8n.onnx.part")
        );
    }
}
