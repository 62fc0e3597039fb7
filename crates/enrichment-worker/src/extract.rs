//! Text extraction
//!
//! PDFs go through lopdf; plain text and HTML are decoded directly. The
//! content type comes from the download, falling back to sniffing.

use crate::errors::PipelineError;
use regex_lite::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    Html,
    Text,
}

impl ContentKind {
    pub fn detect(content_type: Option<&str>, bytes: &[u8]) -> Option<Self> {
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_lowercase());

        match mime.as_deref() {
            Some("application/pdf") => return Some(ContentKind::Pdf),
            Some("text/html") | Some("application/xhtml+xml") => return Some(ContentKind::Html),
            Some(m) if m.starts_with("text/") => return Some(ContentKind::Text),
            _ => {}
        }

        if bytes.starts_with(b"%PDF") {
            Some(ContentKind::Pdf)
        } else if std::str::from_utf8(bytes).is_ok() {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_lowercase();
            if head.contains("<html") || head.contains("<!doctype html") {
                Some(ContentKind::Html)
            } else {
                Some(ContentKind::Text)
            }
        } else {
            None
        }
    }
}

/// Extract normalized text from downloaded content.
pub fn extract_text(bytes: &[u8], content_type: Option<&str>) -> Result<String, PipelineError> {
    let kind = ContentKind::detect(content_type, bytes)
        .ok_or_else(|| PipelineError::UnsupportedContent(content_type.unwrap_or("unknown").to_string()))?;

    let raw = match kind {
        ContentKind::Pdf => extract_pdf(bytes)?,
        ContentKind::Html => strip_html(&String::from_utf8_lossy(bytes)),
        ContentKind::Text => String::from_utf8_lossy(bytes).into_owned(),
    };

    let cleaned = clean_text(&raw);
    if cleaned.is_empty() {
        return Err(PipelineError::NoText);
    }

    debug!(?kind, original_len = raw.len(), cleaned_len = cleaned.len(), "Text extraction complete");
    Ok(cleaned)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, PipelineError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| PipelineError::PdfParse(e.to_string()))?;

    let mut text = String::new();
    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    for (page_num, page_id) in pages {
        match doc.get_page_content(page_id) {
            Ok(content) => {
                text.push_str(&extract_text_from_content(&content));
                text.push('\n');
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to read page content, skipping");
            }
        }
    }

    Ok(text)
}

/// Text between BT and ET operators of a content stream
fn extract_text_from_content(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;

    for line in content_str.lines() {
        match line.trim() {
            "BT" => in_text_block = true,
            "ET" => {
                in_text_block = false;
                text.push(' ');
            }
            op if in_text_block => {
                if let Some(shown) = shown_text(op) {
                    text.push_str(&shown);
                }
            }
            _ => {}
        }
    }

    text
}

/// String operands of Tj, TJ, ' and " operators
fn shown_text(op: &str) -> Option<String> {
    if !(op.ends_with("Tj") || op.ends_with("TJ") || op.ends_with('\'') || op.ends_with('"')) {
        return None;
    }

    let mut result = String::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut escaped = false;

    for ch in op.chars() {
        if depth > 0 && escaped {
            current.push('\\');
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if depth > 0 => escaped = true,
            '(' => {
                if depth > 0 {
                    current.push(ch);
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                } else {
                    current.push(ch);
                }
            }
            _ if depth > 0 => current.push(ch),
            _ => {}
        }
    }

    (!result.is_empty()).then_some(result)
}

fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some(c) => result.push(c),
            None => {}
        }
    }

    result
}

fn strip_html(html: &str) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();

    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("static regex")
    });
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));

    let without_blocks = blocks.replace_all(html, " ");
    let text = tags.replace_all(&without_blocks, " ");

    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn clean_text(text: &str) -> String {
    text.replace('\u{FEFF}', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}
