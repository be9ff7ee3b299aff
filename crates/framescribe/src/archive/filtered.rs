use std::io::{Read, Seek, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ProcessError;

/// Writes the user-facing archive of normalized primary frames.
///
/// Entries are added in the order given; callers sort them naturally first.
pub struct FilteredArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    options: SimpleFileOptions,
    entries: usize,
}

impl<W: Write + Seek> FilteredArchiveWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            zip: ZipWriter::new(writer),
            options: SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(0o644),
            entries: 0,
        }
    }

    /// Copies `reader` into a new entry called `name`.
    pub fn add<R: Read + ?Sized>(&mut self, name: &str, reader: &mut R) -> Result<(), ProcessError> {
        self.zip
            .start_file(name, self.options)
            .map_err(|e| ProcessError::Archive(format!("Failed to start entry {}: {}", name, e)))?;
        std::io::copy(reader, &mut self.zip)
            .map_err(|e| ProcessError::Archive(format!("Failed to write entry {}: {}", name, e)))?;
        self.entries += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Writes the central directory and returns the underlying writer.
    pub fn finish(self) -> Result<W, ProcessError> {
        self.zip
            .finish()
            .map_err(|e| ProcessError::Archive(format!("Failed to finish archive: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_entries_in_given_order() {
        let mut writer = FilteredArchiveWriter::new(Cursor::new(Vec::new()));
        assert!(writer.is_empty());
        writer.add("1.png", &mut &b"one"[..]).unwrap();
        writer.add("2.png", &mut &b"two"[..]).unwrap();
        writer.add("10.png", &mut &b"ten"[..]).unwrap();
        assert_eq!(writer.len(), 3);
        let bytes = writer.finish().unwrap().into_inner();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["1.png", "2.png", "10.png"]);

        let mut content = String::new();
        archive
            .by_name("10.png")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "ten");
    }
}
