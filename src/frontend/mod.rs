//! The input surface of the middle end: source files, spans, the surface AST,
//! and the scope/import information the external frontend hands us. Nothing in
//! this module performs analysis; it is the contract the parser and semantic
//! analyzer produce against.

use std::path::PathBuf;

pub mod ast;
pub mod intern;
pub mod resolve;

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }

    /// Formats a span position as `origin:line:column` (1-based)
    pub fn format_span_position(&self, span: Span) -> String {
        let mut line = 1;
        let mut column = 1;

        for (offset, c) in self.contents.char_indices() {
            if offset >= span.start {
                break;
            }

            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }

        format!("{}:{line}:{column}", self.origin)
    }

    /// Prints the source line containing the span with a caret marker below
    /// the offending range
    pub fn highlight_span(&self, span: Span) {
        let line_start = self.contents[..span.start.min(self.contents.len())]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let line_end = self.contents[line_start..]
            .find('\n')
            .map(|i| line_start + i)
            .unwrap_or(self.contents.len());

        let line = &self.contents[line_start..line_end];
        let caret_offset = span.start.saturating_sub(line_start);
        let caret_width = (span.end.min(line_end) - span.start.min(line_end)).max(1);

        eprintln!("    {line}");
        eprintln!("    {}{}", " ".repeat(caret_offset), "^".repeat(caret_width));
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

/// A byte range into a source file. Synthesized nodes use [`Span::DUMMY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const DUMMY: Self = Self { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
