//! Violation detection
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DetectionEngine                         │
//! │  - Optional sampling of very large graphs (reported)        │
//! │  - Evaluates (rule, file) pairs in parallel (rayon)         │
//! │  - Isolates failing or panicking predicates                 │
//! │  - Stable sort by (path, line, rule id)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod engine;
mod sampling;

pub use engine::{DetectionEngine, DetectionReport, ProgressCallback};
pub use sampling::{Sample, SamplingPolicy, SamplingSummary};
