//! CIFAR-10 binary batches from `<root>/cifar-10-batches-bin`, downloaded and
//! unpacked on first use.
//!
//! Each record is one label byte followed by 3072 pixel bytes, stored as the red,
//! green and blue 32×32 planes in turn.

use super::RawImages;
use crate::error::{MlError, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};

const ARCHIVE_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";
const BATCHES_DIR: &str = "cifar-10-batches-bin";

const SIDE: usize = 32;
const CHANNELS: usize = 3;
const RECORD: usize = 1 + CHANNELS * SIDE * SIDE;

const TRAIN_BATCHES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_BATCH: &str = "test_batch.bin";

pub fn batches_dir(root: &Path) -> PathBuf {
    root.join(BATCHES_DIR)
}

/// Official training and test sets.
pub fn load(root: &Path) -> Result<(RawImages, RawImages)> {
    let dir = batches_dir(root);
    if !dir.is_dir() {
        download(root)?;
    }
    let mut train = empty();
    for name in TRAIN_BATCHES {
        parse_records(&std::fs::read(dir.join(name))?, &mut train)?;
    }
    let mut test = empty();
    parse_records(&std::fs::read(dir.join(TEST_BATCH))?, &mut test)?;
    Ok((train, test))
}

fn download(root: &Path) -> Result<()> {
    tracing::info!(url = ARCHIVE_URL, root = %root.display(), "downloading CIFAR-10 archive");
    let archive = reqwest::blocking::get(ARCHIVE_URL)?
        .error_for_status()?
        .bytes()?;
    unpack_archive(archive.as_ref(), root)
}

/// Unpack a gzipped tarball holding `cifar-10-batches-bin/` into `root`.
///
/// Extraction happens in a staging directory; only a complete batches directory
/// is renamed into place.
pub fn unpack_archive(archive: impl Read, root: &Path) -> Result<()> {
    let staging = root.join(format!("{BATCHES_DIR}.partial"));
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;
    let unpacked = tar::Archive::new(GzDecoder::new(archive))
        .unpack(&staging)
        .map_err(|e| MlError::dataset(format!("failed to unpack CIFAR-10 archive: {e}")))
        .and_then(|()| {
            let unpacked = staging.join(BATCHES_DIR);
            if unpacked.is_dir() {
                Ok(unpacked)
            } else {
                Err(MlError::dataset(format!(
                    "CIFAR-10 archive has no {BATCHES_DIR} directory"
                )))
            }
        });
    let moved = unpacked.and_then(|dir| Ok(std::fs::rename(dir, batches_dir(root))?));
    std::fs::remove_dir_all(&staging)?;
    moved
}

fn empty() -> RawImages {
    RawImages {
        pixels: Vec::new(),
        labels: Vec::new(),
        channels: CHANNELS,
        height: SIDE,
        width: SIDE,
    }
}

/// Append the records in `bytes` to `into`.
pub fn parse_records(bytes: &[u8], into: &mut RawImages) -> Result<()> {
    if bytes.len() % RECORD != 0 {
        return Err(MlError::dataset(format!(
            "CIFAR-10 batch of {} bytes is not a whole number of {RECORD}-byte records",
            bytes.len()
        )));
    }
    for record in bytes.chunks_exact(RECORD) {
        let label = record[0];
        if label > 9 {
            return Err(MlError::dataset(format!("CIFAR-10 label {label} out of range")));
        }
        into.labels.push(label);
        into.pixels.extend_from_slice(&record[1..]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use pretty_assertions::assert_eq;

    fn record(label: u8, fill: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat_n(fill, RECORD - 1));
        bytes
    }

    #[test]
    fn test_parse_records() {
        let mut bytes = record(3, 10);
        bytes.extend(record(9, 20));
        let mut raw = empty();
        parse_records(&bytes, &mut raw).unwrap();
        assert_eq!(raw.labels, vec![3, 9]);
        assert_eq!(raw.pixels.len(), 2 * 3072);
        assert_eq!(raw.pixels[3072], 20);
    }

    #[test]
    fn test_rejects_partial_record_and_bad_label() {
        let mut raw = empty();
        assert!(parse_records(&[1, 2, 3], &mut raw).is_err());
        assert!(parse_records(&record(10, 0), &mut raw).is_err());
    }

    fn archive(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_unpack_archive_then_load() {
        let mut entries: Vec<(String, Vec<u8>)> = TRAIN_BATCHES
            .iter()
            .enumerate()
            .map(|(i, name)| (format!("{BATCHES_DIR}/{name}"), record(i as u8, 5)))
            .collect();
        entries.push((format!("{BATCHES_DIR}/{TEST_BATCH}"), record(8, 6)));
        entries.push((format!("{BATCHES_DIR}/readme.html"), b"<html></html>".to_vec()));

        let dir = tempfile::tempdir().unwrap();
        unpack_archive(archive(&entries).as_slice(), dir.path()).unwrap();
        assert!(batches_dir(dir.path()).join(TEST_BATCH).is_file());
        assert!(!dir.path().join(format!("{BATCHES_DIR}.partial")).exists());

        let (train, test) = load(dir.path()).unwrap();
        assert_eq!(train.labels, vec![0, 1, 2, 3, 4]);
        assert_eq!(test.labels, vec![8]);
        assert_eq!(test.pixels[0], 6);
    }

    #[test]
    fn test_unpack_rejects_archive_without_batches() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = archive(&[("other/data.bin".to_string(), vec![1, 2, 3])]);
        let err = unpack_archive(bytes.as_slice(), dir.path()).unwrap_err();
        assert!(err.to_string().contains(BATCHES_DIR));
        assert!(!batches_dir(dir.path()).exists());
        assert!(!dir.path().join(format!("{BATCHES_DIR}.partial")).exists());
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        assert!(unpack_archive(&b"not a tarball"[..], dir.path()).is_err());
        assert!(!batches_dir(dir.path()).exists());
        assert!(!dir.path().join(format!("{BATCHES_DIR}.partial")).exists());
    }

    #[test]
    fn test_load_batches() {
        let dir = tempfile::tempdir().unwrap();
        let batches = batches_dir(dir.path());
        std::fs::create_dir_all(&batches).unwrap();
        for (i, name) in TRAIN_BATCHES.iter().enumerate() {
            std::fs::write(batches.join(name), record(i as u8, 0)).unwrap();
        }
        std::fs::write(batches.join(TEST_BATCH), record(7, 1)).unwrap();

        let (train, test) = load(dir.path()).unwrap();
        assert_eq!(train.labels, vec![0, 1, 2, 3, 4]);
        assert_eq!(test.labels, vec![7]);
        assert_eq!(test.channels, 3);
    }
}
