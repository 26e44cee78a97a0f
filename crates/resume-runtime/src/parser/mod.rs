//! File Parser (C3). Detects format by magic bytes, not filename.

use crate::errors::{Result, RuntimeError};

const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const CFBF_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Sniffed container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Pdf,
    Docx,
    Doc,
    Zip,
}

/// One entry of a recursively expanded archive, or the single file itself.
pub struct ParsedEntry {
    pub filename: String,
    pub text: String,
}

/// Detect format from the first bytes, independent of filename extension.
pub fn sniff(bytes: &[u8]) -> Option<FileFormat> {
    if bytes.starts_with(PDF_MAGIC) {
        return Some(FileFormat::Pdf);
    }
    if bytes.starts_with(CFBF_MAGIC) {
        return Some(FileFormat::Doc);
    }
    if bytes.starts_with(ZIP_MAGIC) {
        return if zip_contains_entry(bytes, "word/document.xml") {
            Some(FileFormat::Docx)
        } else {
            Some(FileFormat::Zip)
        };
    }
    None
}

fn zip_contains_entry(bytes: &[u8], name: &str) -> bool {
    let cursor = std::io::Cursor::new(bytes);
    match zip::ZipArchive::new(cursor) {
        Ok(mut archive) => (0..archive.len()).any(|i| {
            archive
                .by_index(i)
                .map(|f| f.name() == name)
                .unwrap_or(false)
        }),
        Err(_) => false,
    }
}

/// Parse a single file's bytes, given the size ceiling from
/// `upload.maxFileSize`. Returns one entry per recursively-expanded ZIP
/// member, or a single entry for PDF/DOC/DOCX.
pub fn parse(bytes: &[u8], filename: &str, max_size: u64) -> Result<Vec<ParsedEntry>> {
    if bytes.len() as u64 > max_size {
        return Err(RuntimeError::FileTooLarge(bytes.len() as u64, max_size));
    }

    match sniff(bytes) {
        Some(FileFormat::Pdf) => Ok(vec![ParsedEntry {
            filename: filename.to_string(),
            text: parse_pdf(bytes)?,
        }]),
        Some(FileFormat::Docx) => Ok(vec![ParsedEntry {
            filename: filename.to_string(),
            text: parse_docx(bytes)?,
        }]),
        Some(FileFormat::Doc) => Ok(vec![ParsedEntry {
            filename: filename.to_string(),
            text: parse_doc(bytes)?,
        }]),
        Some(FileFormat::Zip) => parse_zip_recursive(bytes, max_size),
        None => Err(RuntimeError::ParseError(format!(
            "unrecognized file format for {filename}"
        ))),
    }
}

fn parse_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RuntimeError::ParseError(format!("pdf extraction failed: {e}")))
}

fn parse_docx(bytes: &[u8]) -> Result<String> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| RuntimeError::ParseError(format!("invalid docx archive: {e}")))?;
    let mut xml = String::new();
    {
        let mut entry = archive
            .by_name("word/document.xml")
            .map_err(|e| RuntimeError::ParseError(format!("docx missing document.xml: {e}")))?;
        std::io::Read::read_to_string(&mut entry, &mut xml)
            .map_err(|e| RuntimeError::ParseError(format!("docx document.xml not utf-8: {e}")))?;
    }
    Ok(strip_ooxml_tags(&xml))
}

/// Crude but dependency-free OOXML text walker: replaces paragraph/break
/// tags with newlines and strips the rest of the markup.
fn strip_ooxml_tags(xml: &str) -> String {
    let newline_tags = ["</w:p>", "<w:br/>", "<w:br>"];
    let mut normalized = xml.to_string();
    for tag in newline_tags {
        normalized = normalized.replace(tag, "\n");
    }
    let mut out = String::with_capacity(normalized.len());
    let mut in_tag = false;
    for c in normalized.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Legacy binary `.doc` (CFBF/OLE2). Only UTF-16LE text-run extraction is
/// attempted — good enough to produce UTF-8 text, not full fidelity.
fn parse_doc(bytes: &[u8]) -> Result<String> {
    let mut text = String::new();
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        let lo = bytes[i];
        let hi = bytes[i + 1];
        if hi == 0 && (0x20..0x7f).contains(&lo) {
            text.push(lo as char);
        } else if hi == 0 && lo == 0x0d {
            text.push('\n');
        }
        i += 2;
    }
    if text.trim().is_empty() {
        return Err(RuntimeError::ParseError(
            "legacy .doc contained no extractable text runs".into(),
        ));
    }
    Ok(text)
}

fn parse_zip_recursive(bytes: &[u8], max_size: u64) -> Result<Vec<ParsedEntry>> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| RuntimeError::ParseError(format!("invalid zip archive: {e}")))?;

    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| RuntimeError::ParseError(format!("zip entry read failed: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut buf)
            .map_err(|e| RuntimeError::ParseError(format!("zip entry decompress failed: {e}")))?;
        drop(entry);
        match parse(&buf, &name, max_size) {
            Ok(mut entries) => out.append(&mut entries),
            Err(e) => {
                tracing::warn!(entry = %name, error = %e, "skipping unparseable zip entry");
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_pdf() {
        assert_eq!(sniff(b"%PDF-1.4 rest"), Some(FileFormat::Pdf));
    }

    #[test]
    fn sniffs_legacy_doc() {
        assert_eq!(sniff(CFBF_MAGIC), Some(FileFormat::Doc));
    }

    #[test]
    fn unknown_bytes_sniff_to_none() {
        assert_eq!(sniff(b"not a known format"), None);
    }

    #[test]
    fn oversized_file_is_rejected() {
        let bytes = vec![0u8; 100];
        let err = parse(&bytes, "x.pdf", 10).unwrap_err();
        assert!(matches!(err, RuntimeError::FileTooLarge(100, 10)));
    }

    #[test]
    fn strip_ooxml_tags_keeps_text_and_breaks() {
        let xml = "<w:p><w:r><w:t>Hello</w:t></w:r></w:p><w:p><w:r><w:t>World</w:t></w:r></w:p>";
        let text = strip_ooxml_tags(xml);
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
    }
}
