//! Extraction of frame images from a ZIP archive.
//!
//! The archive is read through its central directory, one entry at a time,
//! so entries written with a trailing data descriptor work and no entry is
//! held in memory longer than its callback. Entries that do not pass
//! [`validate_processable_entry`] are skipped.

use std::collections::HashSet;
use std::io::{Read, Seek};

use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::canonical::{self, validate_processable_entry, ProcessableEntry};
use crate::error::ProcessError;

/// A processable entry with its global position in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub index: u32,
    pub entry: ProcessableEntry,
}

fn archive_error(e: impl std::fmt::Display) -> ProcessError {
    ProcessError::Archive(e.to_string())
}

/// Lists the processable entries of an archive in natural order.
///
/// When two folders contain the same file name only the first occurrence is
/// kept, since frames are identified by file name alone.
pub fn scan<R: Read + Seek>(reader: R) -> Result<Vec<ProcessableEntry>, ProcessError> {
    let mut archive = ZipArchive::new(reader).map_err(archive_error)?;
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped = 0usize;

    for i in 0..archive.len() {
        let (name, is_dir) = {
            let file = archive.by_index_raw(i).map_err(archive_error)?;
            (file.name().to_string(), file.is_dir())
        };
        if is_dir {
            continue;
        }

        match validate_processable_entry(&name) {
            Ok(entry) => {
                if seen.insert(entry.base_name.clone()) {
                    entries.push(entry);
                } else {
                    debug!("Skipping duplicate frame name {}", name);
                    skipped += 1;
                }
            }
            Err(reason) => {
                debug!("Skipping archive entry {} ({})", name, reason);
                skipped += 1;
            }
        }
    }

    entries.sort_by(|a, b| {
        canonical::compare(&a.base_name, &b.base_name)
            .then_with(|| a.original_name.cmp(&b.original_name))
    });

    debug!(
        "Archive scan found {} processable entries ({} skipped)",
        entries.len(),
        skipped
    );
    Ok(entries)
}

/// Splits entries into fixed-size batches, keeping order and assigning each
/// entry its global index.
pub fn plan_batches(entries: &[ProcessableEntry], batch_size: usize) -> Vec<Vec<PlannedEntry>> {
    let batch_size = batch_size.max(1);
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| PlannedEntry {
            index: i as u32,
            entry: entry.clone(),
        })
        .collect::<Vec<_>>()
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Number of batches [`plan_batches`] produces for `total` entries.
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    total.div_ceil(batch_size.max(1))
}

/// Opens the archive again and hands the bytes of each entry in `batch` to
/// `f`, one entry at a time and in index order.
///
/// Entries of the batch that are missing from the archive are reported as an
/// error.
pub fn for_each_in_batch<R, E, F>(reader: R, batch: &[PlannedEntry], mut f: F) -> Result<(), E>
where
    R: Read + Seek,
    E: From<ProcessError>,
    F: FnMut(&PlannedEntry, Vec<u8>) -> Result<(), E>,
{
    let mut archive = ZipArchive::new(reader).map_err(archive_error)?;

    for planned in batch {
        let bytes = {
            let mut file = match archive.by_name(&planned.entry.original_name) {
                Ok(file) => file,
                Err(ZipError::FileNotFound) => {
                    return Err(ProcessError::Archive(format!(
                        "entry '{}' disappeared from the archive",
                        planned.entry.original_name
                    ))
                    .into());
                }
                Err(e) => return Err(archive_error(e).into()),
            };
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes).map_err(archive_error)?;
            bytes
        };

        f(planned, bytes)?;
    }

    Ok(())
}
