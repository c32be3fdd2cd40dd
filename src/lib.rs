//! Converge - eventual-consistency assertions for Kubernetes-style control planes
//!
//! A control plane reconciles in the background, so a test cannot check its
//! outcome once and move on. Converge expresses expectations as predicates
//! over untyped objects, re-checks them until they hold or a budget runs out,
//! and follows chains of object references (claim to composite to composed
//! resources) to find what to check.
//!
//! # Modules
//!
//! - [`object`] - Object references and untyped object trees
//! - [`field`] - Field path extraction with typed failures
//! - [`manifest`] - Objects loaded from YAML manifest files
//! - [`store`] - Object accessor trait and the kube-backed implementation
//! - [`poll`] - Interval polling with timeout and cancellation
//! - [`condition`] - Predicates over a single object
//! - [`resolve`] - Reference chain walking and multi-object assertions
//! - [`feature`] - Steps, fail-fast composition, and feature runs
//! - [`steps`] - Ready-made assertion steps
//! - [`setup`] - Steps that seed the cluster before assertions
//! - [`pki`] - Throwaway CA generation
//! - [`env`] - Per-run configuration and the feature driver
//! - [`config`] - Settings from YAML or the environment
//! - [`retry`] - Backoff for environment bring-up
//! - [`telemetry`] - Tracing setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod condition;
pub mod config;
pub mod env;
pub mod error;
pub mod feature;
pub mod field;
pub mod manifest;
pub mod object;
pub mod pki;
pub mod poll;
pub mod resolve;
pub mod retry;
pub mod setup;
pub mod steps;
pub mod store;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Field manager name for server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "converge";
