//! Turns uploaded files and fetched web pages into plain-text documents.
//!
//! File bytes are spooled to a temp file for the duration of parsing; the
//! `NamedTempFile` guard removes it on every exit path.

use std::fs::File;
use std::io::{Read, Write};

use reqwest::Client;
use tempfile::NamedTempFile;

use crate::core::errors::AppError;

/// A loaded plain-text document plus its originating source name.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub source: String,
    /// Page number for formats parsed per page (PDF), 1-based.
    pub page: Option<usize>,
}

/// Source formats the loader can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Docx,
    Text,
}

/// Map a declared MIME type or file extension to a supported kind.
/// `None` means the upload should be skipped with a warning.
pub fn declared_kind(declared_type: &str, name: &str) -> Option<SourceKind> {
    match declared_type {
        "application/pdf" => return Some(SourceKind::Pdf),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            return Some(SourceKind::Docx)
        }
        "text/plain" | "text/markdown" => return Some(SourceKind::Text),
        _ => {}
    }

    let lower = name.to_lowercase();
    if lower.ends_with(".pdf") {
        Some(SourceKind::Pdf)
    } else if lower.ends_with(".docx") {
        Some(SourceKind::Docx)
    } else if lower.ends_with(".txt") || lower.ends_with(".md") {
        Some(SourceKind::Text)
    } else {
        None
    }
}

/// Parse an uploaded file into documents: one per page for PDF, one per file
/// otherwise.
pub fn load_file(bytes: &[u8], kind: SourceKind, name: &str) -> Result<Vec<Document>, AppError> {
    let mut spool = NamedTempFile::new().map_err(|e| AppError::load(name, e))?;
    spool.write_all(bytes).map_err(|e| AppError::load(name, e))?;
    spool.flush().map_err(|e| AppError::load(name, e))?;

    let documents = match kind {
        SourceKind::Pdf => {
            let pages = pdf_extract::extract_text_by_pages(spool.path())
                .map_err(|e| AppError::load(name, e))?;
            pages
                .into_iter()
                .enumerate()
                .filter(|(_, text)| !text.trim().is_empty())
                .map(|(i, text)| Document {
                    text,
                    source: name.to_string(),
                    page: Some(i + 1),
                })
                .collect()
        }
        SourceKind::Docx => {
            let text = extract_docx_text(spool.path()).map_err(|e| AppError::load(name, e))?;
            vec![Document {
                text,
                source: name.to_string(),
                page: None,
            }]
        }
        SourceKind::Text => {
            let mut raw = Vec::new();
            File::open(spool.path())
                .and_then(|mut f| f.read_to_end(&mut raw))
                .map_err(|e| AppError::load(name, e))?;
            vec![Document {
                text: String::from_utf8_lossy(&raw).into_owned(),
                source: name.to_string(),
                page: None,
            }]
        }
    };

    // spool dropped here; the temp file is removed whether parsing
    // succeeded or not
    Ok(documents)
}

/// Fetch a web page and reduce it to plain text.
pub async fn load_url(client: &Client, url: &str) -> Result<Document, AppError> {
    let res = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::load(url, e))?;

    if !res.status().is_success() {
        return Err(AppError::load(url, format!("HTTP {}", res.status())));
    }

    let html = res.text().await.map_err(|e| AppError::load(url, e))?;
    let text = html_to_text(&html);
    if text.trim().is_empty() {
        return Err(AppError::load(url, "page contained no extractable text"));
    }

    Ok(Document {
        text,
        source: url.to_string(),
        page: None,
    })
}

/// DOCX is a zip container; the body text lives in `word/document.xml`.
/// Paragraph closes become newlines, every other tag is dropped.
fn extract_docx_text(path: &std::path::Path) -> anyhow::Result<String> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entry = archive.by_name("word/document.xml")?;

    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;

    let with_breaks = xml.replace("</w:p>", "\n").replace("<w:tab/>", "\t");
    Ok(tidy_lines(&strip_tags(&with_breaks)))
}

/// Reduce an HTML page to its visible text: drop script/style subtrees and
/// tags, then collapse blank lines.
fn html_to_text(html: &str) -> String {
    let mut out = String::new();
    let mut rest = html;
    let mut in_tag = false;
    let mut skip_until: Option<&str> = None;

    while !rest.is_empty() {
        if let Some(closer) = skip_until {
            match find_ascii_ci(rest, closer) {
                Some(pos) => {
                    rest = &rest[pos + closer.len()..];
                    skip_until = None;
                }
                None => break,
            }
            continue;
        }

        if starts_with_ascii_ci(rest, "<script") {
            skip_until = Some("</script>");
            continue;
        }
        if starts_with_ascii_ci(rest, "<style") {
            skip_until = Some("</style>");
            continue;
        }

        let mut chars = rest.char_indices();
        let (_, c) = chars.next().expect("rest is non-empty");
        let next_idx = chars.next().map(|(i, _)| i).unwrap_or(rest.len());

        match c {
            '<' => in_tag = true,
            '>' => {
                if in_tag {
                    in_tag = false;
                    out.push(' ');
                } else {
                    out.push('>');
                }
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
        rest = &rest[next_idx..];
    }

    tidy_lines(&decode_entities(&out))
}

/// Byte-wise ASCII case-insensitive search. The needles are ASCII tag
/// strings, so a match always starts on a char boundary.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

fn starts_with_ascii_ci(haystack: &str, prefix: &str) -> bool {
    let bytes = haystack.as_bytes();
    let prefix = prefix.as_bytes();
    bytes.len() >= prefix.len() && bytes[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn strip_tags(input: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(&out)
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

fn tidy_lines(input: &str) -> String {
    input
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn kind_dispatch_covers_mime_and_extension() {
        assert_eq!(declared_kind("application/pdf", "x"), Some(SourceKind::Pdf));
        assert_eq!(declared_kind("text/plain", "x"), Some(SourceKind::Text));
        assert_eq!(declared_kind("text/markdown", "x"), Some(SourceKind::Text));
        assert_eq!(
            declared_kind("application/octet-stream", "report.docx"),
            Some(SourceKind::Docx)
        );
        assert_eq!(
            declared_kind("application/octet-stream", "README.md"),
            Some(SourceKind::Text)
        );
        assert_eq!(declared_kind("application/zip", "x.zip"), None);
    }

    #[test]
    fn plain_text_loads_as_one_document() {
        let docs = load_file(b"hello world", SourceKind::Text, "notes.txt").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "hello world");
        assert_eq!(docs[0].source, "notes.txt");
        assert_eq!(docs[0].page, None);
    }

    #[test]
    fn docx_body_text_is_extracted() {
        // minimal docx: a zip with just word/document.xml
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            writer
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer
                .write_all(
                    b"<w:document><w:body>\
                      <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>\
                      <w:p><w:r><w:t>Second &amp; last.</w:t></w:r></w:p>\
                      </w:body></w:document>",
                )
                .unwrap();
            writer.finish().unwrap();
        }

        let docs = load_file(&buf, SourceKind::Docx, "report.docx").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "First paragraph.\nSecond & last.");
    }

    #[test]
    fn corrupt_docx_is_a_load_error() {
        let err = load_file(b"not a zip", SourceKind::Docx, "broken.docx");
        assert!(matches!(err, Err(AppError::Load { .. })));
    }

    #[test]
    fn html_is_reduced_to_visible_text() {
        let html = r#"
            <html>
            <head><script>var hidden = 1;</script><style>p { color: red }</style></head>
            <body>
                <h1>Heading</h1>
                <p>Body &amp; text</p>
            </body>
            </html>
        "#;

        let text = html_to_text(html);
        assert!(text.contains("Heading"));
        assert!(text.contains("Body & text"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains("color"));
        assert!(!text.contains('<'));
    }
}
