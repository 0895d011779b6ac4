//! DOCX document loader.
//!
//! A DOCX upload is a ZIP archive whose main part, `word/document.xml`,
//! carries the paragraph text and any tracked changes. The loader walks
//! that XML once with a streaming reader and produces an ordered paragraph
//! sequence plus the document-native redlines.
//!
//! Tracked-change mapping follows the OOXML revision elements: `w:ins` is
//! an insertion, `w:del` (whose runs hold `w:delText`) is a deletion, and
//! `w:moveFrom`/`w:moveTo` become a deletion/insertion pair. Deleted text
//! is not part of the visible paragraph text; inserted text is.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::PipelineError;
use crate::report::{ChangeKind, Redline, RedlineOrigin};

/// The single supported upload media type.
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// One paragraph of the contract, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    /// 1-based index over all paragraphs, including blank ones.
    pub index: usize,
    pub text: String,
}

/// Parse output: paragraphs plus document-native tracked changes.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub paragraphs: Vec<Paragraph>,
    pub redlines: Vec<Redline>,
}

impl ParsedDocument {
    /// Render the contract as `[P#] text` blocks separated by blank lines,
    /// skipping blank paragraphs but keeping their indexes. This is the
    /// text shape the prompt and the issue locations refer to.
    pub fn numbered_text(&self) -> String {
        self.paragraphs
            .iter()
            .filter(|p| !p.text.trim().is_empty())
            .map(|p| format!("[P{}] {}", p.index, p.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Check the declared media type before touching the bytes.
fn check_format(content_type: Option<&str>, file_name: &str) -> Result<(), PipelineError> {
    let has_docx_name = file_name.to_ascii_lowercase().ends_with(".docx");
    match content_type {
        Some(ct) if ct.eq_ignore_ascii_case(DOCX_MIME) => Ok(()),
        // Browsers sometimes fall back to octet-stream; accept it only
        // when the filename still declares the supported format.
        Some(ct) if ct.eq_ignore_ascii_case("application/octet-stream") && has_docx_name => Ok(()),
        Some(ct) => Err(PipelineError::UnsupportedFormat(format!(
            "content type '{ct}' is not supported; only DOCX is accepted"
        ))),
        None if has_docx_name => Ok(()),
        None => Err(PipelineError::UnsupportedFormat(
            "missing content type and filename does not end in .docx".to_string(),
        )),
    }
}

/// Load and parse a DOCX upload.
///
/// Validation order: declared format, then size, then the binary itself.
pub fn load_docx(
    bytes: &[u8],
    content_type: Option<&str>,
    file_name: &str,
    max_bytes: usize,
) -> Result<ParsedDocument, PipelineError> {
    check_format(content_type, file_name)?;

    if bytes.len() > max_bytes {
        return Err(PipelineError::PayloadTooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::CorruptDocument(format!("not a readable DOCX archive: {e}")))?;
    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|_| {
            PipelineError::CorruptDocument("archive has no word/document.xml part".to_string())
        })?
        .read_to_string(&mut document_xml)
        .map_err(|e| PipelineError::CorruptDocument(format!("unreadable document part: {e}")))?;

    parse_document_xml(&document_xml)
}

/// In-progress tracked change while its element is open.
struct ChangeCollector {
    kind: ChangeKind,
    author: String,
    date: String,
    text: String,
}

fn revision_attrs(element: &BytesStart<'_>) -> (String, String) {
    let mut author = "Unknown".to_string();
    let mut date = "Unknown".to_string();
    for attr in element.attributes().flatten() {
        match attr.key.local_name().as_ref() {
            b"author" => {
                if let Ok(value) = attr.unescape_value() {
                    author = value.into_owned();
                }
            }
            b"date" => {
                if let Ok(value) = attr.unescape_value() {
                    date = value.into_owned();
                }
            }
            _ => {}
        }
    }
    (author, date)
}

fn revision_kind(local_name: &[u8]) -> Option<ChangeKind> {
    match local_name {
        b"ins" | b"moveTo" => Some(ChangeKind::Insertion),
        b"del" | b"moveFrom" => Some(ChangeKind::Deletion),
        _ => None,
    }
}

/// Walk `word/document.xml` once, producing paragraphs and redlines.
fn parse_document_xml(xml: &str) -> Result<ParsedDocument, PipelineError> {
    let mut reader = Reader::from_str(xml);

    let mut paragraphs = Vec::new();
    let mut redlines = Vec::new();

    let mut paragraph_index = 0usize;
    let mut paragraph_text = String::new();
    let mut in_paragraph = false;
    // `w:t` holds visible text, `w:delText` holds deleted text.
    let mut in_visible_text = false;
    let mut in_deleted_text = false;
    let mut change_stack: Vec<ChangeCollector> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    in_paragraph = true;
                    paragraph_index += 1;
                    paragraph_text.clear();
                }
                b"t" if in_paragraph => in_visible_text = true,
                b"delText" if in_paragraph => in_deleted_text = true,
                name => {
                    if in_paragraph
                        && let Some(kind) = revision_kind(name)
                    {
                        let (author, date) = revision_attrs(&e);
                        change_stack.push(ChangeCollector {
                            kind,
                            author,
                            date,
                            text: String::new(),
                        });
                    }
                }
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"p" => {
                    in_paragraph = false;
                    paragraphs.push(Paragraph {
                        index: paragraph_index,
                        text: paragraph_text.trim().to_string(),
                    });
                }
                b"t" => in_visible_text = false,
                b"delText" => in_deleted_text = false,
                name => {
                    if revision_kind(name).is_some()
                        && let Some(change) = change_stack.pop()
                        && !change.text.is_empty()
                    {
                        let (original_text, modified_text) = match change.kind {
                            ChangeKind::Deletion => (change.text, String::new()),
                            _ => (String::new(), change.text),
                        };
                        redlines.push(Redline {
                            paragraph_number: paragraph_index,
                            original_text,
                            modified_text,
                            author: change.author,
                            date: change.date,
                            change_type: change.kind,
                            origin: RedlineOrigin::Document,
                        });
                    }
                }
            },
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| {
                    PipelineError::CorruptDocument(format!("invalid XML text: {e}"))
                })?;
                if in_visible_text {
                    // Inserted runs are visible text and also part of the
                    // insertion record; deleted runs never use w:t.
                    paragraph_text.push_str(&text);
                    if let Some(change) = change_stack.last_mut() {
                        change.text.push_str(&text);
                    }
                } else if in_deleted_text
                    && let Some(change) = change_stack.last_mut()
                {
                    change.text.push_str(&text);
                }
            }
            // Self-closing empty paragraphs still occupy an index.
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"p" {
                    paragraph_index += 1;
                    paragraphs.push(Paragraph {
                        index: paragraph_index,
                        text: String::new(),
                    });
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(PipelineError::CorruptDocument(format!(
                    "invalid document XML: {e}"
                )));
            }
        }
    }

    Ok(ParsedDocument {
        paragraphs,
        redlines,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    /// Build a minimal DOCX archive around the given `word/document.xml`
    /// body content (the `<w:body>` children).
    pub fn docx_with_body(body: &str) -> Vec<u8> {
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             <w:body>{body}</w:body></w:document>"
        );
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(xml.as_bytes()).expect("write zip entry");
        writer.finish().expect("finish zip").into_inner()
    }

    pub fn plain_paragraph(text: &str) -> String {
        format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
    }
}
