//! Digest pipeline logic for bulletin.
//!
//! Filtering, AI enrichment with layered reply recovery, HTML rendering with
//! a deterministic fallback, and the gated run that ties them together. All
//! outside services are reached through the capability traits in
//! `bulletin-shared`.

pub mod enrichment;
pub mod filter;
pub mod pipeline;
pub mod recovery;
pub mod render;
pub mod schedule;
pub mod score;

#[cfg(test)]
pub(crate) mod testing;

pub use enrichment::{EnrichmentEngine, EnrichmentSettings};
pub use filter::{FilterPolicy, RawCategory};
pub use pipeline::{
    Abort, Composed, Pipeline, ProgressReporter, RunOutcome, RunReport, SilentProgress, Stage,
};
pub use render::{RenderSettings, RenderSource, Rendered, TemplateRenderer};
