//! Run diagnostics
//!
//! Soft failures that do not stop a run. Every diagnostic is also logged
//! with `tracing::warn!` when it is recorded.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Category of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DiagnosticKind {
    /// A descriptor referenced path id 0 or a negative placeholder
    InvalidPathId,
    /// A required path id is not in any indexed bundle
    ResolutionGap,
    /// No alpha mask was found for an opaque color image
    AlphaNotFound,
    /// A merge task failed, panicked or timed out
    TaskFailed,
    /// An image in the output tree that no result key points to
    UnreferencedOutput,
}

impl DiagnosticKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPathId => "invalid path id",
            Self::ResolutionGap => "resolution gap",
            Self::AlphaNotFound => "alpha not found",
            Self::TaskFailed => "task failed",
            Self::UnreferencedOutput => "unreferenced output",
        }
    }
}

/// One reported problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// What the diagnostic is about (path id, key or output path)
    pub subject: String,
    pub reason: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: DiagnosticKind, subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind.as_str(), self.subject, self.reason)
    }
}

/// Ordered collection of diagnostics for one run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and log a diagnostic
    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::warn!("{diagnostic}");
        self.entries.push(diagnostic);
    }

    /// Shorthand for `push(Diagnostic::new(..))`
    pub fn report(&mut self, kind: DiagnosticKind, subject: impl Into<String>, reason: impl Into<String>) {
        self.push(Diagnostic::new(kind, subject, reason));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Diagnostics of one kind, in recording order
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    /// Remove every diagnostic matching `predicate`, returning the removed ones
    pub fn take_where<F>(&mut self, mut predicate: F) -> Vec<Diagnostic>
    where
        F: FnMut(&Diagnostic) -> bool,
    {
        let (taken, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|d| predicate(d));
        self.entries = kept;
        taken
    }

    /// Count per kind
    #[must_use]
    pub fn summary(&self) -> BTreeMap<DiagnosticKind, usize> {
        let mut counts = BTreeMap::new();
        for d in &self.entries {
            *counts.entry(d.kind).or_insert(0) += 1;
        }
        counts
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_summary_and_take() {
        let mut diags = Diagnostics::new();
        diags.report(DiagnosticKind::ResolutionGap, "999", "not indexed");
        diags.report(DiagnosticKind::AlphaNotFound, "foo/foo.png", "no mask");
        diags.report(DiagnosticKind::AlphaNotFound, "bar/bar.png", "no mask");

        let summary = diags.summary();
        assert_eq!(summary[&DiagnosticKind::AlphaNotFound], 2);
        assert_eq!(summary[&DiagnosticKind::ResolutionGap], 1);

        let taken = diags.take_where(|d| d.kind == DiagnosticKind::AlphaNotFound);
        assert_eq!(taken.len(), 2);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.to_owned().into_iter().next().unwrap().subject, "999");
    }
}
