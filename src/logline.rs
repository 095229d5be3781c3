//! Decoding and matching of raw container log output.
//!
//! The Docker Engine multiplexes stdout and stderr into a single stream by
//! prefixing every frame with an 8 byte header. Depending on how the bytes
//! were read they may or may not still carry that header, so the decoder
//! accepts both shapes. Every line is expected to start with the timestamp
//! Docker adds when logs are requested with `timestamps=1`.

use regex::bytes::Regex;

/// Size of the stream multiplexing header.
const HEADER_LEN: usize = 8;
const STREAM_STDOUT: u8 = 1;
const STREAM_STDERR: u8 = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("malformed log line: {line:?}")]
pub struct MalformedLineError {
    line: String,
}

/// A log line whose content matched at least one error pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedLine {
    pub timestamp: Vec<u8>,
    pub content: Vec<u8>,
}

/// Splits `raw` into `(timestamp, content)` pairs.
///
/// Empty lines are skipped. If any other line has no space separating the
/// timestamp from the content the whole batch is rejected.
pub fn decode(raw: &[u8]) -> Result<Vec<(&[u8], &[u8])>, MalformedLineError> {
    let mut lines = Vec::new();
    if raw.is_empty() {
        return Ok(lines);
    }

    for line in raw.split(|b| *b == b'\n') {
        if line.is_empty() {
            continue;
        }
        lines.push(split_line(strip_header(line))?);
    }

    Ok(lines)
}

fn strip_header(line: &[u8]) -> &[u8] {
    // The stream type byte tells a real header apart from a timestamp that
    // happens to be 8 bytes into the line.
    if line.len() > HEADER_LEN && matches!(line[0], STREAM_STDOUT | STREAM_STDERR) {
        &line[HEADER_LEN..]
    } else {
        line
    }
}

fn split_line(line: &[u8]) -> Result<(&[u8], &[u8]), MalformedLineError> {
    match line.iter().position(|b| *b == b' ') {
        Some(pos) => Ok((&line[..pos], &line[pos + 1..])),
        None => Err(MalformedLineError {
            line: String::from_utf8_lossy(line).into_owned(),
        }),
    }
}

/// Compiles every pattern case-insensitively.
///
/// Fails on the first pattern that is not a valid regular expression and
/// returns it alongside the error.
pub fn compile_patterns<S: AsRef<str>>(
    patterns: &[S],
) -> Result<Vec<Regex>, (String, regex::Error)> {
    patterns
        .iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            Regex::new(&format!("(?i){pattern}")).map_err(|e| (pattern.to_string(), e))
        })
        .collect()
}

/// Returns true if any pattern matches `content`.
pub fn matches(patterns: &[Regex], content: &[u8]) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(content))
}

/// Decodes `raw` and keeps the lines whose content matches, in decode order.
pub fn find_matched_lines(
    patterns: &[Regex],
    raw: &[u8],
) -> Result<Vec<MatchedLine>, MalformedLineError> {
    Ok(decode(raw)?
        .into_iter()
        .filter(|(_, content)| matches(patterns, content))
        .map(|(timestamp, content)| MatchedLine {
            timestamp: timestamp.to_vec(),
            content: content.to_vec(),
        })
        .collect())
}
