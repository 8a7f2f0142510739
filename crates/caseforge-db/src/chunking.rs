//! Sliding-window chunking of normalized document text.
//!
//! Windows are measured in characters, not bytes: window `i` covers
//! `[start, start + chunk_size)` and `start` advances by
//! `chunk_size - overlap`. The final window may be shorter. Iteration stops
//! once a window reaches the end of the text.
//!
//! # Example
//!
//! ```rust,ignore
//! use caseforge_db::chunking::{ChunkerConfig, SlidingWindowChunker};
//!
//! let chunker = SlidingWindowChunker::new(ChunkerConfig::new(40, 10))?;
//! for span in chunker.windows("Employees must complete onboarding within 5 business days") {
//!     println!("{} [{}..{})", span.text, span.start_char, span.end_char);
//! }
//! ```

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use caseforge_core::{defaults, Chunk, Error, Result};

/// Configuration for the sliding-window chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Window length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows. Must be smaller than `chunk_size`.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            overlap: defaults::CHUNK_OVERLAP,
        }
    }
}

impl ChunkerConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Load from `CHUNK_SIZE` / `CHUNK_OVERLAP`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: std::env::var("CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.chunk_size),
            overlap: std::env::var("CHUNK_OVERLAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.overlap),
        }
    }

    /// Reject configurations that would never advance.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidInput("chunk_size must be positive".to_string()));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::InvalidInput(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Distance between consecutive window starts.
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// One window of text with its character span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub ordinal: usize,
    pub text: String,
    /// Inclusive start, in characters.
    pub start_char: usize,
    /// Exclusive end, in characters.
    pub end_char: usize,
}

impl TextSpan {
    /// Attach the span to a document, producing a storable chunk.
    pub fn into_chunk(self, document_id: Uuid) -> Chunk {
        Chunk::new(
            document_id,
            self.ordinal as i32,
            self.text,
            self.start_char as i32,
            self.end_char as i32,
        )
    }
}

/// Common trait for chunking strategies.
pub trait Chunker: Send + Sync {
    /// Chunk the given text.
    fn chunk(&self, text: &str) -> Vec<TextSpan>;

    /// Get the configuration used by this chunker.
    fn config(&self) -> &ChunkerConfig;
}

/// Fixed-size windows with configurable overlap.
#[derive(Debug, Clone)]
pub struct SlidingWindowChunker {
    config: ChunkerConfig,
}

impl SlidingWindowChunker {
    /// Create a chunker, rejecting `overlap >= chunk_size` and `chunk_size == 0`.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Lazily iterate the windows of `text`.
    ///
    /// Each call starts a fresh iteration and the iterator itself is `Clone`,
    /// so the sequence can be replayed.
    pub fn windows<'a>(&self, text: &'a str) -> Windows<'a> {
        let boundaries = if text.trim().is_empty() {
            Vec::new()
        } else {
            text.char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(text.len()))
                .collect()
        };
        Windows {
            text,
            boundaries,
            config: self.config,
            next_start: Some(0),
            ordinal: 0,
        }
    }

    /// Chunk `text` into storable chunks for `document_id`.
    pub fn chunk_document(&self, document_id: Uuid, text: &str) -> Vec<Chunk> {
        self.windows(text)
            .map(|span| span.into_chunk(document_id))
            .collect()
    }
}

impl Chunker for SlidingWindowChunker {
    fn chunk(&self, text: &str) -> Vec<TextSpan> {
        self.windows(text).collect()
    }

    fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}

/// Iterator over sliding windows. See [`SlidingWindowChunker::windows`].
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    text: &'a str,
    /// Byte offset of every char start, plus `text.len()`.
    boundaries: Vec<usize>,
    config: ChunkerConfig,
    next_start: Option<usize>,
    ordinal: usize,
}

impl Iterator for Windows<'_> {
    type Item = TextSpan;

    fn next(&mut self) -> Option<TextSpan> {
        let char_count = self.boundaries.len().checked_sub(1)?;
        let start = self.next_start?;
        let end = (start + self.config.chunk_size).min(char_count);

        self.next_start = if end >= char_count {
            None
        } else {
            Some(start + self.config.step())
        };

        let span = TextSpan {
            ordinal: self.ordinal,
            text: self.text[self.boundaries[start]..self.boundaries[end]].to_string(),
            start_char: start,
            end_char: end,
        };
        self.ordinal += 1;
        Some(span)
    }
}

fn line_ending_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\r\n?").expect("valid regex"))
}

fn trailing_space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+\n").expect("valid regex"))
}

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

/// Normalize extracted text before chunking.
///
/// Line endings become `\n`, control characters other than newline and tab
/// are dropped, trailing whitespace on each line is removed, runs of blank
/// lines collapse to one, and the result is trimmed.
pub fn normalize_text(text: &str) -> String {
    let unified = line_ending_re().replace_all(text, "\n");
    let printable: String = unified
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let trimmed_lines = trailing_space_re().replace_all(&printable, "\n");
    let collapsed = blank_run_re().replace_all(&trimmed_lines, "\n\n");
    collapsed.trim().to_string()
}
