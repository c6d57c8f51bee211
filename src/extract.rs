//! Text extraction from stored document files.
//!
//! The worker hands a file path and its declared content type to a
//! [`TextExtractor`]; this module's [`FileExtractor`] reads the file and
//! dispatches on content type, falling back to the file extension when the
//! declared type is generic. Supported formats: PDF, DOCX, PPTX, XLSX and
//! plain-text family types.
//!
//! Extraction is synchronous and CPU-bound; callers run it on a blocking
//! thread.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Zip-bomb guard for a single decompressed OOXML part.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file not found at path: {0}")]
    MissingFile(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("no extractable text in document")]
    EmptyText,
    #[error("extraction timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("extraction task aborted: {0}")]
    Aborted(String),
}

/// Turns a stored file into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, content_type: &str) -> Result<String, ExtractError>;
}

/// Default extractor over the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExtractor;

impl TextExtractor for FileExtractor {
    fn extract(&self, path: &Path, content_type: &str) -> Result<String, ExtractError> {
        if !path.is_file() {
            return Err(ExtractError::MissingFile(path.display().to_string()));
        }
        let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let effective = effective_content_type(content_type, path);
        let text = extract_bytes(&bytes, &effective)?;
        if text.trim().is_empty() {
            return Err(ExtractError::EmptyText);
        }
        Ok(text)
    }
}

/// Resolves generic or parameterized content types (`; charset=...`)
/// against the file extension.
fn effective_content_type(declared: &str, path: &Path) -> String {
    let base = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if base.is_empty() || base == MIME_OCTET_STREAM {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        return guess_content_type(ext).to_string();
    }
    base
}

/// Content type for a lower-case file extension.
pub fn guess_content_type(file_type: &str) -> &'static str {
    match file_type.to_ascii_lowercase().as_str() {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "pptx" => MIME_PPTX,
        "xlsx" => MIME_XLSX,
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        _ => MIME_OCTET_STREAM,
    }
}

fn is_plain_text(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || matches!(
            content_type,
            "application/json" | "application/xml" | "application/x-yaml"
        )
}

/// Extracts plain text from in-memory file content.
pub fn extract_bytes(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string())),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_XLSX => extract_xlsx(bytes),
        ct if is_plain_text(ct) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_part(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "{} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Numbered parts such as `ppt/slides/slide3.xml`, in numeric order.
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Concatenates the text of every `<*:t>` element, separated by `sep`.
fn text_runs(xml: &[u8], sep: &str) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_t = false,
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().unwrap_or_default();
                if !out.is_empty() {
                    out.push_str(sep);
                }
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_part(&mut archive, "word/document.xml")?;
    text_runs(&xml, " ")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_parts(&archive, "ppt/slides/slide") {
        let xml = read_part(&mut archive, &name)?;
        let text = text_runs(&xml, " ")?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n"))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared = shared_strings(&mut archive)?;
    let mut sheets = Vec::new();
    for name in numbered_parts(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_part(&mut archive, &name)?;
        let cells = sheet_cells(&xml, &shared)?;
        if !cells.is_empty() {
            sheets.push(cells);
        }
    }
    Ok(sheets.join("\n"))
}

/// One string per `<si>` item. Rich-text items with several runs are joined.
fn shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    // Workbooks with only numeric cells have no shared string table.
    if archive.by_name("xl/sharedStrings.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_part(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Shared-string and inline cell values of one worksheet, space-separated.
fn sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared_cell = false;
    loop {
        if cells.len() >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if shared_cell {
                    if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                        cells.push(s.clone());
                    }
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn zip_with(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in parts {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_bytes(b"foo", "image/png").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_bytes(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_bytes(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_paragraph_runs_are_joined() {
        let bytes = zip_with(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="x"><w:body><w:p><w:r><w:t>Quarterly </w:t></w:r><w:r><w:t>report</w:t></w:r></w:p></w:body></w:document>"#,
        )]);
        let text = extract_bytes(&bytes, MIME_DOCX).unwrap();
        assert!(text.contains("Quarterly"));
        assert!(text.contains("report"));
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", r#"<p:sld xmlns:a="x"><a:t>ten</a:t></p:sld>"#),
            ("ppt/slides/slide2.xml", r#"<p:sld xmlns:a="x"><a:t>two</a:t></p:sld>"#),
        ]);
        assert_eq!(extract_bytes(&bytes, MIME_PPTX).unwrap(), "two\nten");
    }

    #[test]
    fn xlsx_resolves_shared_and_literal_cells() {
        let bytes = zip_with(&[
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>revenue</t></si><si><t>costs</t></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row><c t="s"><v>1</v></c><c><v>42</v></c></row></sheetData></worksheet>"#,
            ),
        ]);
        assert_eq!(extract_bytes(&bytes, MIME_XLSX).unwrap(), "costs 42");
    }

    #[test]
    fn file_extractor_reads_plain_text_and_falls_back_on_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.md");
        std::fs::write(&path, "# Heading\nbody").unwrap();
        let text = FileExtractor.extract(&path, MIME_OCTET_STREAM).unwrap();
        assert!(text.contains("Heading"));
        let text = FileExtractor
            .extract(&path, "text/markdown; charset=utf-8")
            .unwrap();
        assert!(text.contains("body"));
    }

    #[test]
    fn file_extractor_reports_missing_and_blank_files() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("gone.txt");
        assert!(matches!(
            FileExtractor.extract(&missing, "text/plain"),
            Err(ExtractError::MissingFile(_))
        ));
        let blank = tmp.path().join("blank.txt");
        std::fs::write(&blank, "   \n").unwrap();
        assert!(matches!(
            FileExtractor.extract(&blank, "text/plain"),
            Err(ExtractError::EmptyText)
        ));
    }

    #[test]
    fn guess_content_type_by_extension() {
        assert_eq!(guess_content_type("PDF"), MIME_PDF);
        assert_eq!(guess_content_type("txt"), "text/plain");
        assert_eq!(guess_content_type("unknown"), MIME_OCTET_STREAM);
    }
}
