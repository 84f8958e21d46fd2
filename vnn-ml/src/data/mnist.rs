//! MNIST IDX files, downloaded into `<root>/MNIST/raw` on first use.

use super::RawImages;
use crate::error::{MlError, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};

const MIRROR: &str = "https://ossci-datasets.s3.amazonaws.com/mnist";

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

pub fn raw_dir(root: &Path) -> PathBuf {
    root.join("MNIST").join("raw")
}

/// Official training and test sets.
pub fn load(root: &Path) -> Result<(RawImages, RawImages)> {
    let dir = raw_dir(root);
    for name in [TRAIN_IMAGES, TRAIN_LABELS, TEST_IMAGES, TEST_LABELS] {
        ensure_file(&dir, name)?;
    }
    let train = read_pair(&dir.join(TRAIN_IMAGES), &dir.join(TRAIN_LABELS))?;
    let test = read_pair(&dir.join(TEST_IMAGES), &dir.join(TEST_LABELS))?;
    Ok((train, test))
}

fn ensure_file(dir: &Path, name: &str) -> Result<()> {
    let target = dir.join(name);
    if target.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    let url = format!("{MIRROR}/{name}.gz");
    tracing::info!(%url, target = %target.display(), "downloading MNIST file");

    let compressed = reqwest::blocking::get(&url)?.error_for_status()?.bytes()?;
    let mut bytes = Vec::new();
    GzDecoder::new(compressed.as_ref())
        .read_to_end(&mut bytes)
        .map_err(|e| MlError::dataset(format!("failed to decompress {url}: {e}")))?;
    vnn_core::persistence::atomic_write(&target, &bytes)?;
    Ok(())
}

fn read_pair(images: &Path, labels: &Path) -> Result<RawImages> {
    let (count, height, width, pixels) = parse_images(&std::fs::read(images)?)?;
    let labels = parse_labels(&std::fs::read(labels)?)?;
    if labels.len() != count {
        return Err(MlError::dataset(format!(
            "{} has {count} images but {} labels",
            images.display(),
            labels.len()
        )));
    }
    Ok(RawImages {
        pixels,
        labels,
        channels: 1,
        height,
        width,
    })
}

fn be_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| MlError::dataset("truncated IDX header"))
}

/// `(count, rows, cols, pixels)` of an IDX3 image file.
pub fn parse_images(bytes: &[u8]) -> Result<(usize, usize, usize, Vec<u8>)> {
    let magic = be_u32(bytes, 0)?;
    if magic != IMAGES_MAGIC {
        return Err(MlError::dataset(format!(
            "bad IDX image magic {magic}, expected {IMAGES_MAGIC}"
        )));
    }
    let count = be_u32(bytes, 4)? as usize;
    let rows = be_u32(bytes, 8)? as usize;
    let cols = be_u32(bytes, 12)? as usize;
    let body = &bytes[16..];
    let expected = count * rows * cols;
    if body.len() != expected {
        return Err(MlError::dataset(format!(
            "IDX image body has {} bytes, expected {expected}",
            body.len()
        )));
    }
    Ok((count, rows, cols, body.to_vec()))
}

pub fn parse_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    let magic = be_u32(bytes, 0)?;
    if magic != LABELS_MAGIC {
        return Err(MlError::dataset(format!(
            "bad IDX label magic {magic}, expected {LABELS_MAGIC}"
        )));
    }
    let count = be_u32(bytes, 4)? as usize;
    let body = &bytes[8..];
    if body.len() != count {
        return Err(MlError::dataset(format!(
            "IDX label body has {} bytes, expected {count}",
            body.len()
        )));
    }
    Ok(body.to_vec())
}
