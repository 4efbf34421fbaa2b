//! Diagnostics are plain values: a span, a kind, and a human message. The
//! middle end accumulates them and hands the batch back to the caller; it
//! never prints on its own. [`report`] is the rendering helper a driver can
//! use to format one diagnostic against its source file.

use colored::Colorize;
use strum::Display;

use crate::frontend::{SourceFile, Span};

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub span: Span,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(span: Span, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            span,
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DiagnosticKind {
    /// A syntactic or type form outside the compilable subset
    UnsupportedConstruct,
    /// A resolved expression type cannot be assigned or passed to the
    /// expected type
    TypeMismatch,
    /// A reference the scope table did not resolve
    UnknownSymbol,
    /// A type cycle with no `Weak` edge on it
    CycleError,
    /// Union variants share a would-be discriminant with duplicate or
    /// non-literal values
    DiscriminantAmbiguous,
    /// A type parameter could neither be inferred nor defaulted
    UnresolvedTypeParameter,
    /// A concrete generic argument violates an `extends` constraint
    ConstraintViolation,
    /// The nested instantiation depth limit was hit
    RecursiveGenericDepth,
    /// A throwing function was called outside `try`/`catch`
    PropagationError,
    /// A compiler invariant was violated; a bug in the compiler, not the input
    InternalError,
}

impl DiagnosticKind {
    /// Monomorphization failures cascade, so they abort the pipeline instead
    /// of accumulating
    pub fn aborts_compilation(self) -> bool {
        matches!(
            self,
            DiagnosticKind::UnresolvedTypeParameter
                | DiagnosticKind::ConstraintViolation
                | DiagnosticKind::RecursiveGenericDepth
                | DiagnosticKind::InternalError
        )
    }
}

/// Renders a single diagnostic to stderr in the compiler's standard format
pub fn report(diagnostic: &Diagnostic, source_file: &SourceFile) {
    eprintln!(
        "{}{}{}{} {} {}",
        "error".red(),
        "[".white(),
        diagnostic.kind.to_string().red(),
        "]:".white(),
        diagnostic.message,
        format!(
            "(at {})",
            source_file.format_span_position(diagnostic.span)
        )
        .white()
    );
    source_file.highlight_span(diagnostic.span);
}
