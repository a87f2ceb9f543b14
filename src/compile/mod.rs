//! Compiler invocation, error reports and the import walk.

pub mod driver;
pub mod report;
pub mod walk;

pub use driver::{BuildOutcome, BuildRequest};
