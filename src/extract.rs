//! Text extraction for uploaded files.
//!
//! The reader is picked from the filename extension; each returns plain
//! UTF-8 text ready for chunking.
//!
//! | Extension | Reader |
//! |-----------|--------|
//! | `.txt` | strict UTF-8 decode (BOM stripped) |
//! | `.pdf` | `pdf-extract` |
//! | `.docx` | `<w:t>` runs of `word/document.xml`, one line per paragraph |

use std::io::Read;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Txt,
    Pdf,
    Docx,
}

impl FileKind {
    /// Select a reader from the (case-insensitive) extension.
    pub fn from_filename(filename: &str) -> Option<FileKind> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".txt") {
            Some(FileKind::Txt)
        } else if lower.ends_with(".pdf") {
            Some(FileKind::Pdf)
        } else if lower.ends_with(".docx") {
            Some(FileKind::Docx)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileKind::Txt => "TXT",
            FileKind::Pdf => "PDF",
            FileKind::Docx => "DOCX",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("Failed to parse {kind} file: {message}")]
    Parse { kind: &'static str, message: String },
}

impl ExtractError {
    fn parse(kind: FileKind, message: impl ToString) -> Self {
        ExtractError::Parse {
            kind: kind.label(),
            message: message.to_string(),
        }
    }
}

/// Extract text from an uploaded file, choosing the reader by filename.
pub fn read_file(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let kind = FileKind::from_filename(filename)
        .ok_or_else(|| ExtractError::UnsupportedFileType(filename.to_lowercase()))?;
    extract_text(bytes, kind)
}

pub fn extract_text(bytes: &[u8], kind: FileKind) -> Result<String, ExtractError> {
    match kind {
        FileKind::Txt => extract_txt(bytes),
        FileKind::Pdf => extract_pdf(bytes),
        FileKind::Docx => extract_docx(bytes),
    }
}

fn extract_txt(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|e| ExtractError::parse(FileKind::Txt, e))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract can panic on malformed input
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| ExtractError::parse(FileKind::Pdf, "malformed PDF"))?
        .map_err(|e| ExtractError::parse(FileKind::Pdf, e))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::parse(FileKind::Docx, e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::parse(FileKind::Docx, "word/document.xml not found"))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::parse(FileKind::Docx, e))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::parse(
            FileKind::Docx,
            "word/document.xml exceeds size limit",
        ));
    }

    docx_paragraphs(&doc_xml)
        .map(|paragraphs| paragraphs.join("\n"))
        .map_err(|e| ExtractError::parse(FileKind::Docx, e))
}

/// Collect the text of each `<w:p>` paragraph.
///
/// `<w:tab/>` becomes a tab and `<w:br/>` a newline, matching how word
/// processors render them as plain text.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, quick_xml::Error> {
    use quick_xml::events::Event;

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    // whitespace inside <w:t xml:space="preserve"> is significant
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Event::Text(te) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn kind_from_filename_is_case_insensitive() {
        assert_eq!(FileKind::from_filename("notes.TXT"), Some(FileKind::Txt));
        assert_eq!(FileKind::from_filename("a.b.pdf"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_filename("Report.Docx"), Some(FileKind::Docx));
        assert_eq!(FileKind::from_filename("image.png"), None);
        assert_eq!(FileKind::from_filename("docx"), None);
    }

    #[test]
    fn unsupported_file_type_returns_error() {
        let err = read_file("photo.PNG", b"foo").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported file type: photo.png");
    }

    #[test]
    fn txt_strips_bom() {
        let text = read_file("a.txt", b"\xEF\xBB\xBFhello").unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn invalid_utf8_txt_returns_error() {
        let err = read_file("a.txt", &[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse TXT file:"));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = read_file("a.pdf", b"not a pdf").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse PDF file:"));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = read_file("a.docx", b"not a zip").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse DOCX file:"));
    }

    #[test]
    fn docx_paragraphs_are_joined_by_newline() {
        let doc = docx_with_body(
            "<w:p><w:r><w:t>First</w:t></w:r><w:r><w:t xml:space=\"preserve\"> line</w:t></w:r></w:p>\
             <w:p><w:r><w:t>Second</w:t><w:tab/><w:t>tabbed</w:t></w:r></w:p>",
        );
        let text = read_file("doc.docx", &doc).unwrap();
        assert_eq!(text, "First line\nSecond\ttabbed");
    }

    #[test]
    fn docx_unescapes_entities() {
        let doc = docx_with_body("<w:p><w:r><w:t>R&amp;D &lt;plan&gt;</w:t></w:r></w:p>");
        assert_eq!(read_file("doc.docx", &doc).unwrap(), "R&D <plan>");
    }

    #[test]
    fn docx_without_document_xml_returns_error() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = read_file("doc.docx", &buf).unwrap_err();
        assert!(err.to_string().contains("word/document.xml not found"));
    }
}
