//! Duration accounting for a dirty→Success arc.
//!
//! Spans are captured at state-transition boundaries from a monotonic
//! clock and accumulate until the next `QueuedForBuild` resets them.

use std::fmt;
use std::time::Duration;

use crate::logger::format_ms;

/// What a span measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanTag {
    Queued,
    Build,
    TypecheckOnly,
    SourceWalk,
    Inject,
    Postprocess,
}

impl SpanTag {
    fn label(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Build => "build",
            Self::TypecheckOnly => "typecheck",
            Self::SourceWalk => "walk",
            Self::Inject => "inject",
            Self::Postprocess => "postprocess",
        }
    }
}

/// Ordered list of tagged wall-clock spans in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Durations {
    spans: Vec<(SpanTag, u64)>,
}

impl Durations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed span.
    pub fn push(&mut self, tag: SpanTag, elapsed: Duration) {
        self.spans.push((tag, elapsed.as_millis() as u64));
    }

    pub fn spans(&self) -> &[(SpanTag, u64)] {
        &self.spans
    }

    /// Sum of all spans, in milliseconds.
    pub fn total_ms(&self) -> u64 {
        self.spans.iter().map(|(_, ms)| ms).sum()
    }

    /// Milliseconds recorded for one tag (0 if absent).
    pub fn ms_for(&self, tag: SpanTag) -> u64 {
        self.spans
            .iter()
            .filter(|(t, _)| *t == tag)
            .map(|(_, ms)| ms)
            .sum()
    }
}

impl fmt::Display for Durations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (tag, ms) in &self.spans {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", tag.label(), format_ms(*ms))?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulation_and_total() {
        let mut d = Durations::new();
        d.push(SpanTag::Queued, Duration::from_millis(3));
        d.push(SpanTag::Build, Duration::from_millis(512));
        d.push(SpanTag::Inject, Duration::from_millis(2));
        assert_eq!(d.total_ms(), 517);
        assert_eq!(d.ms_for(SpanTag::Build), 512);
        assert_eq!(d.ms_for(SpanTag::Postprocess), 0);
        assert_eq!(d.spans().len(), 3);
    }

    #[test]
    fn test_display_summary() {
        let mut d = Durations::new();
        d.push(SpanTag::Build, Duration::from_millis(1340));
        d.push(SpanTag::Inject, Duration::from_millis(2));
        assert_eq!(d.to_string(), "build 1.3s, inject 2ms");
    }
}
