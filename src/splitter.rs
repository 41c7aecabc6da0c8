//! Splits oversized post content into a numbered thread.
//!
//! Packing runs once against a budget that reserves room for the widest
//! two-digit suffix (`" (99/99)"`); suffixes are rendered afterwards once the
//! segment count is known. Segments are never re-packed.

use thiserror::Error;

pub const DEFAULT_UNIT_LIMIT: usize = 280;
pub const DEFAULT_MAX_SEGMENTS: usize = 25;
/// Largest thread whose suffixes fit the reserved `" (99/99)"`.
pub const MAX_THREAD_SEGMENTS: usize = 99;

const SUFFIX_RESERVE: &str = " (99/99)";
const SENTENCE_TERMINALS: [char; 4] = ['.', '!', '?', '…'];

/// Limits applied when validating content at authoring time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitLimits {
    pub unit_limit: usize,
    pub max_segments: usize,
}

impl Default for SplitLimits {
    fn default() -> Self {
        Self {
            unit_limit: DEFAULT_UNIT_LIMIT,
            max_segments: DEFAULT_MAX_SEGMENTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("Post content cannot be empty")]
    Empty,

    #[error("Posts with media are published as one unit and must fit in {limit} characters (got {len})")]
    MediaTooLong { len: usize, limit: usize },

    #[error("Word \"{word}\" is too long to fit in a {limit}-character segment")]
    WordTooLong { word: String, limit: usize },

    #[error("Content needs {count} segments but a thread holds at most {max}")]
    TooManySegments { count: usize, max: usize },
}

/// A piece of text plus the whitespace that preceded it in the source.
#[derive(Debug, Clone, Copy)]
struct Unit<'a> {
    gap: &'a str,
    body: &'a str,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into segments of at most `unit_limit` characters.
///
/// Text that already fits is returned unchanged as a single segment.
/// Otherwise each segment carries an `" (i/N)"` suffix. A single word longer
/// than the packing budget is emitted alone and may exceed the limit.
///
/// The length guarantee holds for up to [`MAX_THREAD_SEGMENTS`] segments.
/// Past that a three-digit suffix outgrows the reserve; [`check`] rejects
/// such content before it is ever stored.
pub fn split(text: &str, unit_limit: usize) -> Vec<String> {
    if char_len(text) <= unit_limit {
        return vec![text.to_string()];
    }

    let budget = unit_limit.saturating_sub(char_len(SUFFIX_RESERVE));
    let segments = pack(&units(text, budget), budget);
    render(segments)
}

/// Validate authoring input and return the number of segments it will need.
pub fn check(text: &str, limits: SplitLimits, has_media: bool) -> Result<usize, SplitError> {
    if text.trim().is_empty() {
        return Err(SplitError::Empty);
    }

    let len = char_len(text);
    if has_media {
        if len > limits.unit_limit {
            return Err(SplitError::MediaTooLong {
                len,
                limit: limits.unit_limit,
            });
        }
        return Ok(1);
    }

    let segments = split(text, limits.unit_limit);
    if segments.len() > 1 {
        let budget = limits.unit_limit.saturating_sub(char_len(SUFFIX_RESERVE));
        if let Some(word) = text.split_whitespace().find(|w| char_len(w) > budget) {
            return Err(SplitError::WordTooLong {
                word: word.chars().take(20).collect(),
                limit: limits.unit_limit,
            });
        }
    }
    let max = limits.max_segments.min(MAX_THREAD_SEGMENTS);
    if segments.len() > max {
        return Err(SplitError::TooManySegments {
            count: segments.len(),
            max,
        });
    }

    Ok(segments.len())
}

/// Sentence units, falling back to word units for sentences over `budget`.
fn units(text: &str, budget: usize) -> Vec<Unit<'_>> {
    let mut out = Vec::new();
    for sentence in sentences(text) {
        if char_len(sentence.body) <= budget {
            out.push(sentence);
            continue;
        }
        let mut words = words(sentence.body);
        if let Some(first) = words.first_mut() {
            first.gap = sentence.gap;
        }
        out.extend(words);
    }
    out
}

fn sentences(text: &str) -> Vec<Unit<'_>> {
    let mut units = Vec::new();
    let mut last_end = 0;
    let mut start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }

        let end = if c == '\n' {
            Some(i)
        } else if SENTENCE_TERMINALS.contains(&c)
            && chars.peek().map_or(true, |&(_, next)| next.is_whitespace())
        {
            Some(i + c.len_utf8())
        } else {
            None
        };

        if let (Some(s), Some(e)) = (start, end) {
            let body = text[s..e].trim_end();
            units.push(Unit {
                gap: &text[last_end..s],
                body,
            });
            last_end = s + body.len();
            start = None;
        }
    }

    if let Some(s) = start {
        let body = text[s..].trim_end();
        units.push(Unit {
            gap: &text[last_end..s],
            body,
        });
    }

    units
}

fn words(text: &str) -> Vec<Unit<'_>> {
    let base = text.as_ptr() as usize;
    let mut last_end = 0;
    text.split_whitespace()
        .map(|word| {
            let start = word.as_ptr() as usize - base;
            let unit = Unit {
                gap: &text[last_end..start],
                body: word,
            };
            last_end = start + word.len();
            unit
        })
        .collect()
}

/// Greedy order-preserving packing; whitespace at a split point is dropped.
fn pack(units: &[Unit<'_>], budget: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for unit in units {
        let body_len = char_len(unit.body);
        if current.is_empty() {
            current.push_str(unit.body);
            current_len = body_len;
            continue;
        }

        let gap_len = char_len(unit.gap);
        if current_len + gap_len + body_len <= budget {
            current.push_str(unit.gap);
            current.push_str(unit.body);
            current_len += gap_len + body_len;
        } else {
            segments.push(std::mem::take(&mut current));
            current.push_str(unit.body);
            current_len = body_len;
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn render(segments: Vec<String>) -> Vec<String> {
    let total = segments.len();
    match total {
        0 => vec![String::new()],
        1 => segments,
        _ => segments
            .into_iter()
            .enumerate()
            .map(|(i, segment)| format!("{} ({}/{})", segment, i + 1, total))
            .collect(),
    }
}
