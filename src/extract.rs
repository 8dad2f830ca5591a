//! PDF text extraction.
//!
//! Callers hand over raw bytes; this module returns plain UTF-8 text with
//! whitespace runs collapsed line by line. Extraction is CPU-bound, so async
//! callers run it on a blocking thread.

pub const MIME_PDF: &str = "application/pdf";

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug)]
pub enum ExtractError {
    NotPdf,
    Pdf(String),
    NoText,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::NotPdf => write!(f, "file is not a PDF"),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::NoText => write!(f, "PDF contains no extractable text"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// True when `bytes` starts with the PDF header.
pub fn has_pdf_header(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Extract the text of a PDF.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    if !has_pdf_header(bytes) {
        return Err(ExtractError::NotPdf);
    }

    let raw =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let text = normalize_whitespace(&raw);
    if text.is_empty() {
        return Err(ExtractError::NoText);
    }
    Ok(text)
}

/// Collapse runs of spaces inside lines and drop blank lines beyond one.
fn normalize_whitespace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0;

    for line in raw.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = extract_pdf_text(b"hello world").unwrap_err();
        assert!(matches!(err, ExtractError::NotPdf));
    }

    #[test]
    fn invalid_pdf_body_returns_error() {
        let err = extract_pdf_text(b"%PDF-1.4\nnot really a pdf").unwrap_err();
        assert!(err.to_string().contains("PDF"));
    }

    #[test]
    fn normalizes_whitespace() {
        let raw = "\n\n  Title   line \n\n\n\nBody   text\n   \n";
        assert_eq!(normalize_whitespace(raw), "Title line\n\nBody text");
    }

    #[test]
    fn detects_pdf_header() {
        assert!(has_pdf_header(b"%PDF-1.7 ..."));
        assert!(!has_pdf_header(b"PK\x03\x04"));
    }
}
