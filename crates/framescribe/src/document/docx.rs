//! Minimal Office Open XML word-processing package.

use std::io::{Cursor, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::Paragraph;
use crate::error::ProcessError;

const WORDPROCESSING_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

fn docx_error(e: impl std::fmt::Display) -> ProcessError {
    ProcessError::DocxProcessing(e.to_string())
}

/// Renders paragraphs as a `.docx` file, one `<w:p>` each.
pub fn render_docx(paragraphs: &[Paragraph]) -> Result<Vec<u8>, ProcessError> {
    let document = document_xml(paragraphs)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, content) in [
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", PACKAGE_RELS.as_bytes()),
        ("word/document.xml", document.as_slice()),
    ] {
        zip.start_file(name, options).map_err(docx_error)?;
        zip.write_all(content).map_err(docx_error)?;
    }

    Ok(zip.finish().map_err(docx_error)?.into_inner())
}

fn document_xml(paragraphs: &[Paragraph]) -> Result<Vec<u8>, ProcessError> {
    let mut writer = Writer::new(Vec::new());

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(docx_error)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("w:document").with_attributes([("xmlns:w", WORDPROCESSING_NS)]),
        ))
        .map_err(docx_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("w:body")))
        .map_err(docx_error)?;

    for paragraph in paragraphs {
        write_paragraph(&mut writer, &paragraph.text)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("w:body")))
        .map_err(docx_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("w:document")))
        .map_err(docx_error)?;

    Ok(writer.into_inner())
}

fn write_paragraph(writer: &mut Writer<Vec<u8>>, text: &str) -> Result<(), ProcessError> {
    let clean = xml_safe(text);

    writer
        .write_event(Event::Start(BytesStart::new("w:p")))
        .map_err(docx_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("w:r")))
        .map_err(docx_error)?;

    for (i, line) in clean.split('\n').enumerate() {
        if i > 0 {
            writer
                .write_event(Event::Empty(BytesStart::new("w:br")))
                .map_err(docx_error)?;
        }
        writer
            .write_event(Event::Start(
                BytesStart::new("w:t").with_attributes([("xml:space", "preserve")]),
            ))
            .map_err(docx_error)?;
        writer
            .write_event(Event::Text(BytesText::new(line)))
            .map_err(docx_error)?;
        writer
            .write_event(Event::End(BytesEnd::new("w:t")))
            .map_err(docx_error)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("w:r")))
        .map_err(docx_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("w:p")))
        .map_err(docx_error)?;
    Ok(())
}

/// Drops characters XML 1.0 cannot carry and normalizes line endings.
fn xml_safe(text: &str) -> String {
    text.replace("\r\n", "\n")
        .chars()
        .filter(|c| matches!(c, '\t' | '\n') || !c.is_control())
        .collect()
}
