use regex::Regex;
use std::fmt;
use thiserror::Error;

/// The only shape a normalized design-file URL ever takes.
const CANONICAL_PREFIX: &str = "https://www.figma.com/file/";

/// A design-file URL in its single normalized form,
/// `https://www.figma.com/file/{file_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl {
    url: String,
    file_id_start: usize,
}

impl CanonicalUrl {
    fn from_file_id(file_id: &str) -> Self {
        Self {
            url: format!("{CANONICAL_PREFIX}{file_id}"),
            file_id_start: CANONICAL_PREFIX.len(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn file_id(&self) -> &str {
        &self.url[self.file_id_start..]
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        &self.url
    }
}

/// Raised when a URL does not reference a design file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlFormatError {
    #[error("URL is empty")]
    Empty,

    #[error("Could not extract Figma file ID from URL: {0}")]
    NoFileId(String),
}

/// Extracts the file identifier from the accepted Figma URL shapes.
///
/// Patterns are tried in order and the first one that matches wins:
///
/// - `figma.com/file/{id}`: direct file links
/// - `figma.com/design/{id}`: links copied from the newer design editor
pub struct UrlNormalizer {
    patterns: Vec<Regex>,
}

impl UrlNormalizer {
    pub fn new() -> Self {
        Self {
            patterns: vec![
                Regex::new(r"figma\.com/file/([0-9A-Za-z]+)").expect("Invalid file URL regex"),
                Regex::new(r"figma\.com/design/([0-9A-Za-z]+)").expect("Invalid design URL regex"),
            ],
        }
    }

    /// Normalize `raw` into its canonical form.
    pub fn normalize(&self, raw: &str) -> Result<CanonicalUrl, UrlFormatError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(UrlFormatError::Empty);
        }

        let file_id = self
            .patterns
            .iter()
            .find_map(|pattern| pattern.captures(raw))
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| UrlFormatError::NoFileId(raw.to_string()))?;

        let canonical = CanonicalUrl::from_file_id(file_id);
        tracing::info!("Converted URL to format: {}", canonical);
        Ok(canonical)
    }
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url() {
        let normalizer = UrlNormalizer::new();
        let url = normalizer
            .normalize("https://www.figma.com/file/AbC123xyz/My-Design?node-id=0%3A1")
            .unwrap();
        assert_eq!(url.as_str(), "https://www.figma.com/file/AbC123xyz");
        assert_eq!(url.file_id(), "AbC123xyz");
    }

    #[test]
    fn test_design_url_becomes_file_url() {
        let normalizer = UrlNormalizer::new();
        let url = normalizer
            .normalize("https://www.figma.com/design/Q9w8E7r6/Landing-Page?t=abc")
            .unwrap();
        assert_eq!(url.as_str(), "https://www.figma.com/file/Q9w8E7r6");
    }

    #[test]
    fn test_file_pattern_takes_priority() {
        let normalizer = UrlNormalizer::new();
        let url = normalizer
            .normalize("https://figma.com/design/Second?redirect=figma.com/file/First")
            .unwrap();
        assert_eq!(url.file_id(), "First");
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        let normalizer = UrlNormalizer::new();
        let url = normalizer
            .normalize("  https://www.figma.com/file/abc\n")
            .unwrap();
        assert_eq!(url.to_string(), "https://www.figma.com/file/abc");
    }

    #[test]
    fn test_rejected_inputs() {
        let normalizer = UrlNormalizer::new();
        assert_eq!(normalizer.normalize(""), Err(UrlFormatError::Empty));
        assert_eq!(normalizer.normalize("   "), Err(UrlFormatError::Empty));
        assert!(matches!(
            normalizer.normalize("not a url"),
            Err(UrlFormatError::NoFileId(_))
        ));
        assert!(matches!(
            normalizer.normalize("https://www.figma.com/proto/abc"),
            Err(UrlFormatError::NoFileId(_))
        ));
    }
}
