//! Log sanitization for patient identifiers.
//!
//! Lab uploads carry sample IDs, patient IDs and uploader accounts, and any
//! of them can end up in an error message. The helpers here redact common
//! identifier shapes from formatted text:
//! - UUIDs (analysis and patient IDs)
//! - labelled patient, sample and record IDs (`patient_id=...`, `Sample ID: ...`)
//! - medical record numbers and SSN-like national IDs
//! - email addresses and phone numbers
//!
//! [`SanitizingMakeWriter`] applies [`sanitize`] to every line a
//! `tracing_subscriber` fmt layer writes, so call sites do not have to.
//!
//! Input is capped at `HEMASENSE_SANITIZE_MAX_BYTES` (default 16 KiB) per
//! call; anything past the cap is dropped and marked `[TRUNCATED]`.

use std::sync::OnceLock;

use regex::{Regex, RegexSet};
use tracing_subscriber::fmt::MakeWriter;

const SANITIZE_MAX_BYTES_ENV: &str = "HEMASENSE_SANITIZE_MAX_BYTES";
const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

struct Rule {
    regex: Regex,
    replacement: &'static str,
}

struct Patterns {
    set: RegexSet,
    rules: Vec<Rule>,
}

// Order matters: labelled IDs go first so the label survives and only the
// value is replaced; UUIDs before phones so their digit groups are not split.
const RULES: [(&str, &str); 7] = [
    (
        r"(?i)\b((?:patient|sample|record|subject)[ _-]?id\s*[:=]\s*)[A-Za-z0-9][A-Za-z0-9_-]{0,63}",
        "${1}[REDACTED-ID]",
    ),
    (
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        "[REDACTED-UUID]",
    ),
    (r"(?i)\bMRN[:#\s]?\s*\d{5,12}\b", "[REDACTED-MRN]"),
    (r"\b\d{3}-\d{2}-\d{4}\b", "[REDACTED-SSN]"),
    (
        r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b",
        "[REDACTED-EMAIL]",
    ),
    (
        r"(?:\+\d{1,3}[-.\s]?)?\(?\b[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b",
        "[REDACTED-PHONE]",
    ),
    // Long bare digit runs: national IDs, insurance and record numbers.
    (r"\b\d{11,}\b", "[REDACTED-NUMBER]"),
];

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        set: RegexSet::new(RULES.iter().map(|(p, _)| *p)).expect("Valid regex set"),
        rules: RULES
            .iter()
            .map(|&(pattern, replacement)| Rule {
                regex: Regex::new(pattern).expect("Valid regex"),
                replacement,
            })
            .collect(),
    })
}

fn max_sanitize_bytes() -> usize {
    std::env::var(SANITIZE_MAX_BYTES_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES)
}

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> (&str, bool) {
    if input.len() <= max_bytes {
        return (input, false);
    }
    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

/// Redact identifiers from `input`.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_with_limit(input, max_sanitize_bytes())
}

fn sanitize_with_limit(input: &str, max_bytes: usize) -> String {
    let patterns = patterns();
    let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);

    let mut out = prefix.to_string();
    let matched = patterns.set.matches(prefix);
    if matched.matched_any() {
        for (idx, rule) in patterns.rules.iter().enumerate() {
            // Earlier replacements only shrink what later rules can match.
            if matched.matched(idx) {
                out = rule.regex.replace_all(&out, rule.replacement).into_owned();
            }
        }
    }

    if truncated {
        out.push_str(" [TRUNCATED]");
    }
    out
}

/// Whether `input` contains anything [`sanitize`] would redact.
#[must_use]
pub fn contains_identifier(input: &str) -> bool {
    let (prefix, _) = truncate_to_char_boundary(input, max_sanitize_bytes());
    patterns().set.is_match(prefix)
}

/// A `tracing_subscriber` writer wrapper that sanitizes each formatted log
/// line before it reaches the underlying sink.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter::new(self.inner.make_writer())
    }
}

/// Line-buffering writer produced by [`SanitizingMakeWriter`].
///
/// Bytes are held until a newline arrives; a partial line is sanitized and
/// written on `flush` or when the writer is dropped.
pub struct SanitizingWriter<W: std::io::Write> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W: std::io::Write> SanitizingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    fn write_sanitized(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(bytes);
        self.inner.write_all(sanitize(&text).as_bytes())
    }

    fn drain_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.write_sanitized(&line)?;
        }
        Ok(())
    }

    fn drain_rest(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let rest = std::mem::take(&mut self.buffer);
        self.write_sanitized(&rest)
    }
}

impl<W: std::io::Write> std::io::Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.drain_lines()?;

        // A single line longer than twice the cap is written out truncated
        // rather than buffered without bound.
        if self.buffer.len() > max_sanitize_bytes().saturating_mul(2) {
            self.drain_rest()?;
            self.inner.write_all(b"\n")?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.drain_lines()?;
        self.drain_rest()?;
        self.inner.flush()
    }
}

impl<W: std::io::Write> Drop for SanitizingWriter<W> {
    fn drop(&mut self) {
        let _ = std::io::Write::flush(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sanitize_uuid() {
        let sanitized = sanitize("Saved analysis 550e8400-e29b-41d4-a716-446655440000 to storage");
        assert!(sanitized.contains("[REDACTED-UUID]"));
        assert!(!sanitized.contains("550e8400"));
    }

    #[test]
    fn test_sanitize_labelled_ids() {
        let sanitized = sanitize("upload failed for patient_id=PT-00912 (Sample ID: S77)");
        assert_eq!(
            sanitized,
            "upload failed for patient_id=[REDACTED-ID] (Sample ID: [REDACTED-ID])"
        );
    }

    #[test]
    fn test_sanitize_mrn_and_ssn() {
        let sanitized = sanitize("MRN: 12345678 / SSN 123-45-6789");
        assert!(sanitized.contains("[REDACTED-MRN]"));
        assert!(sanitized.contains("[REDACTED-SSN]"));
        assert!(!sanitized.contains("6789"));
    }

    #[test]
    fn test_sanitize_contact_details() {
        let sanitized = sanitize("uploaded by lab.tech@clinic.org, call +1 555-123-4567");
        assert!(sanitized.contains("[REDACTED-EMAIL]"));
        assert!(sanitized.contains("[REDACTED-PHONE]"));
    }

    #[test]
    fn test_lab_values_untouched() {
        let line = "Prepared 3 of 5 row(s): HGB 9.5, MCV 72.0, PLT 250";
        assert_eq!(sanitize(line), line);
        assert!(!contains_identifier(line));
    }

    #[test]
    fn test_sanitize_truncates_large_inputs() {
        let sanitized = sanitize_with_limit("prefix é 0123456789 suffix", 8);
        assert!(sanitized.ends_with("[TRUNCATED]"));
    }

    #[test]
    fn test_writer_sanitizes_lines() {
        let mut sink = Vec::new();
        {
            let mut writer = SanitizingWriter::new(&mut sink);
            writer.write_all(b"first patient_id=AB12\nsecond ").expect("Should write");
            writer.write_all(b"line\n").expect("Should write");
        }
        let out = String::from_utf8(sink).expect("Should be UTF-8");
        assert_eq!(out, "first patient_id=[REDACTED-ID]\nsecond line\n");
    }
}
