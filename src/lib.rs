//! archplan - architectural conformance analysis and phased refactoring
//!
//! The pipeline parses a repository into a [`graph::ModuleGraph`], evaluates
//! a [`rules::RuleRegistry`] against it, scores health and synthesizes a
//! [`planning::Plan`] of ordered change units. The [`execution::Controller`]
//! applies a plan phase by phase behind a [`verification::Gate`], suspending
//! for a decision at every step so a run can be persisted and resumed.

pub mod cache;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod detectors;
pub mod execution;
pub mod graph;
pub mod models;
pub mod parsers;
pub mod pipeline;
pub mod planning;
pub mod reporters;
pub mod rules;
pub mod scoring;
pub mod verification;
