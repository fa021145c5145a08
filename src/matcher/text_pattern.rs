//! Text-pattern matcher over the raw bytes of the candidate's content
//! window. Offsets are byte offsets into the file even when invalid UTF-8
//! precedes the match. Binary content short-circuits to "no match".

use super::{Evaluation, MatchEvidence, MatchResult, PreparedRecord, Skip, MAX_EXCERPT_CHARS};
use crate::content::CandidateFile;
use crate::entropy::looks_binary;
use crate::error::{DeepScanError, Result};
use crate::types::{MatchKind, Offset, SearchConfig};
use regex::bytes::{Regex, RegexBuilder};

/// Compiled regex size limit; extractor fragments are short
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A compiled text fragment
#[derive(Debug, Clone)]
pub struct TextNeedle {
    regex: Regex,
}

impl TextNeedle {
    /// Literal fragments are escaped; `is_regex` fragments are used as-is.
    pub fn compile(fragment: &str, is_regex: bool, case_sensitive: bool) -> Result<Self> {
        let source = if is_regex {
            fragment.to_string()
        } else {
            regex::escape(fragment)
        };
        let regex = RegexBuilder::new(&source)
            .case_insensitive(!case_sensitive)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| DeepScanError::InvalidPattern(format!("'{}': {}", fragment, e)))?;
        Ok(Self { regex })
    }

    /// Byte offset and bytes of the first match
    pub fn find<'h>(&self, haystack: &'h [u8]) -> Option<(usize, &'h [u8])> {
        self.regex.find(haystack).map(|m| (m.start(), m.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

pub fn evaluate(
    candidate: &CandidateFile,
    reference: &PreparedRecord,
    config: &SearchConfig,
) -> Evaluation {
    let needle = match &reference.text_needle {
        Some(needle) => needle,
        None => return Ok(None),
    };

    let window = candidate
        .window(config.text_window_bytes)
        .map_err(|e| Skip::Unreadable(e.to_string()))?;
    if looks_binary(window) {
        return Err(Skip::NotText);
    }

    Ok(needle.find(window).map(|(offset, matched)| {
        MatchResult::new(
            candidate,
            reference,
            MatchKind::TextPattern,
            MatchEvidence::TextOffset {
                offset: Offset::new(offset as u64),
                matched: String::from_utf8_lossy(matched)
                    .chars()
                    .take(MAX_EXCERPT_CHARS)
                    .collect(),
            },
        )
    }))
}
