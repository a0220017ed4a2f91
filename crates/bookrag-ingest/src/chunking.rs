//! Sliding-window chunking with boundary snapping.
//!
//! Windows are sized in whitespace tokens (the token approximation the
//! embedding provider bills against). Cuts snap to the nearest preceding
//! sentence boundary inside a tolerance band, then to a paragraph
//! boundary, then hard-cut. Fenced code blocks are atomic: a cut landing
//! inside one is pushed past the closing fence. Consecutive windows
//! share a fixed token overlap so concepts split at a cut stay whole in
//! at least one chunk.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use bookrag_core::PipelineConfig;

use crate::document::ContentDocument;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").unwrap());
static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```").unwrap());

/// Chunking tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Target window size in tokens.
    pub target_tokens: usize,
    /// Overlap between consecutive windows, as a fraction of the target.
    pub overlap_fraction: f32,
    /// How far back from the target a cut may snap to a boundary,
    /// as a fraction of the target.
    pub boundary_tolerance: f32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_tokens: 512,
            overlap_fraction: 0.1,
            boundary_tolerance: 0.15,
        }
    }
}

impl From<&PipelineConfig> for ChunkConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            target_tokens: config.chunk_size,
            overlap_fraction: config.chunk_overlap,
            ..Self::default()
        }
    }
}

impl ChunkConfig {
    pub fn overlap_tokens(&self) -> usize {
        (self.target_tokens as f32 * self.overlap_fraction).round() as usize
    }

    fn tolerance_tokens(&self) -> usize {
        ((self.target_tokens as f32 * self.boundary_tolerance).round() as usize).max(1)
    }
}

/// One retrieval unit cut from a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic: `{content_id}_chunk_{chunk_index}`.
    pub id: String,
    pub content_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
    pub section_title: String,
    pub hierarchy_path: String,
    /// Tokens shared with the following chunk; 0 for the last chunk.
    pub overlap_with_next: usize,
    /// Byte span of this chunk in the source text (includes the overlap
    /// prefix for every chunk after the first).
    pub start_offset: usize,
    pub end_offset: usize,
    pub url: String,
}

pub fn chunk_id(content_id: &str, chunk_index: usize) -> String {
    format!("{content_id}_chunk_{chunk_index}")
}

pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Split a document into ordered, overlapping chunks.
    pub fn chunk_document(&self, doc: &ContentDocument) -> Vec<Chunk> {
        let text = doc.text.as_str();
        let tokens: Vec<Range<usize>> = TOKEN_RE
            .find_iter(text)
            .map(|m| m.start()..m.end())
            .collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        let windows = self.windows(text, &tokens);

        let mut chunks = Vec::with_capacity(windows.len());
        for (index, window) in windows.iter().enumerate() {
            let start_offset = if index == 0 {
                0
            } else {
                tokens[window.start].start
            };
            let end_offset = if window.end == tokens.len() {
                text.len()
            } else {
                tokens[window.end].start
            };
            let overlap_with_next = windows
                .get(index + 1)
                .map(|next| window.end - next.start)
                .unwrap_or(0);

            chunks.push(Chunk {
                id: chunk_id(&doc.id, index),
                content_id: doc.id.clone(),
                chunk_index: index,
                text: text[start_offset..end_offset].to_string(),
                token_count: window.end - window.start,
                section_title: section_for_offset(doc, start_offset),
                hierarchy_path: doc.hierarchy_path.clone(),
                overlap_with_next,
                start_offset,
                end_offset,
                url: doc.url.clone(),
            });
        }

        tracing::debug!(
            "chunked {} into {} chunks ({} tokens)",
            doc.id,
            chunks.len(),
            tokens.len()
        );
        chunks
    }

    /// Token-index windows `[start, end)`, consecutive windows overlapping.
    fn windows(&self, text: &str, tokens: &[Range<usize>]) -> Vec<Range<usize>> {
        let n = tokens.len();
        let target = self.config.target_tokens;
        if n <= target {
            return vec![0..n];
        }

        let overlap = self.config.overlap_tokens();
        let sentence_starts = sentence_start_tokens(text, tokens);
        let paragraph_starts = paragraph_start_tokens(text, tokens);
        let fences = fence_spans(text);

        let mut windows = Vec::new();
        let mut start = 0usize;
        loop {
            let target_end = start + target;
            if target_end >= n {
                windows.push(start..n);
                break;
            }

            let mut end = snap_cut(
                target_end,
                start,
                self.config.tolerance_tokens(),
                &sentence_starts,
                &paragraph_starts,
            );
            end = push_past_fence(end, tokens, &fences).min(n);
            if end <= start {
                end = target_end;
            }

            if end >= n {
                windows.push(start..n);
                break;
            }
            windows.push(start..end);

            // Next window re-reads the last `overlap` tokens. The overlap
            // must not reach back inside a fence the cut was pushed past.
            let next_start = end.saturating_sub(overlap).max(start + 1);
            start = push_past_fence(next_start, tokens, &fences).min(end);
        }
        windows
    }
}

/// Section of the chunk's starting offset: last heading at or before it,
/// falling back to the document title.
fn section_for_offset(doc: &ContentDocument, offset: usize) -> String {
    doc.headings
        .iter()
        .take_while(|h| h.offset <= offset)
        .last()
        .map(|h| h.text.clone())
        .unwrap_or_else(|| doc.title.clone())
}

/// Token indices that begin a sentence (previous token ends with . ! or ?,
/// allowing a closing quote or bracket after the punctuation).
fn sentence_start_tokens(text: &str, tokens: &[Range<usize>]) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(i, _)| {
            let prev = &text[tokens[i - 1].clone()];
            let trimmed = prev.trim_end_matches(['"', '\'', ')', ']']);
            trimmed.ends_with(['.', '!', '?'])
        })
        .map(|(i, _)| i)
        .collect()
}

/// Token indices preceded by a blank line.
fn paragraph_start_tokens(text: &str, tokens: &[Range<usize>]) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(i, range)| {
            let gap = &text[tokens[i - 1].end..range.start];
            gap.matches('\n').count() >= 2
        })
        .map(|(i, _)| i)
        .collect()
}

/// Byte spans of fenced code blocks (``` pairs). An unclosed trailing
/// fence extends to the end of the text.
fn fence_spans(text: &str) -> Vec<Range<usize>> {
    let marks: Vec<usize> = FENCE_RE.find_iter(text).map(|m| m.start()).collect();
    let mut spans = Vec::new();
    let mut iter = marks.chunks(2);
    for pair in &mut iter {
        match pair {
            [open, close] => spans.push(*open..close + 3),
            [open] => spans.push(*open..text.len()),
            _ => {}
        }
    }
    spans
}

/// Greatest boundary token in `(target - tolerance, target]`, preferring
/// sentence starts over paragraph starts; hard cut at target otherwise.
fn snap_cut(
    target_end: usize,
    window_start: usize,
    tolerance: usize,
    sentence_starts: &[usize],
    paragraph_starts: &[usize],
) -> usize {
    let floor = target_end.saturating_sub(tolerance).max(window_start + 1);
    for starts in [sentence_starts, paragraph_starts] {
        let best = starts
            .iter()
            .copied()
            .filter(|&s| s > floor && s <= target_end)
            .next_back();
        if let Some(cut) = best {
            return cut;
        }
    }
    target_end
}

/// If a cut before token `end` would split a fenced block, move it to the
/// first token past the fence.
fn push_past_fence(end: usize, tokens: &[Range<usize>], fences: &[Range<usize>]) -> usize {
    if end == 0 || end >= tokens.len() {
        return end;
    }
    let cut_byte = tokens[end].start;
    for fence in fences {
        if cut_byte > fence.start && cut_byte < fence.end {
            // First token starting at or after the fence close.
            return tokens
                .iter()
                .position(|t| t.start >= fence.end)
                .unwrap_or(tokens.len());
        }
    }
    end
}
