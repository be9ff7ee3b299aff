//! Builders for frame images and archives.

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};

use image::{ImageFormat, Rgb, RgbImage};
use zip::write::SimpleFileOptions;

/// A solid 16:9 PNG frame.
pub fn png_frame(value: u8) -> Vec<u8> {
    png_sized(32, 18, value)
}

pub fn png_sized(width: u32, height: u32, value: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    RgbImage::from_pixel(width, height, Rgb([value, value, value]))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Builds a ZIP from `(entry name, bytes)` pairs, in the given order.
pub fn zip_of(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Like [`zip_of`], but written by a streaming writer: sizes and CRCs follow
/// each entry in a data descriptor, as macOS Archive Utility does.
pub fn streamed_zip_of(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new_stream(Vec::new());
    for (name, bytes) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A ZIP with one distinct PNG frame per name.
pub fn frames_zip(names: &[&str]) -> Vec<u8> {
    let entries: Vec<(&str, Vec<u8>)> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, png_frame((i as u8).wrapping_mul(37))))
        .collect();
    zip_of(&entries)
}

/// Entry names of a ZIP, in archive order.
pub fn zip_entry_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index_raw(i).unwrap().name().to_string())
        .collect()
}

/// Reads one entry of a ZIP.
pub fn zip_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut out = Vec::new();
    file.read_to_end(&mut out).unwrap();
    out
}
