//! # assay
//!
//! AI-assisted pull request review. Assay fetches a PR's metadata and
//! combined diff from the VCS host, optionally enriches it with a linked
//! issue-tracker ticket, splits the diff per file, sends bounded prompts to
//! a language model, and aggregates the per-file findings into a PR-level
//! meta review.
//!
//! The interesting machinery lives in two places: [`diff`] reconstructs
//! per-file diffs from one combined blob (renames, new/deleted files, path
//! normalization), and [`budget`] assembles prompts that fit a model's
//! input window while recording exactly what was cut. Everything else
//! orchestrates those two against narrow collaborator traits for the VCS
//! host, the issue tracker, and the model provider.

pub mod budget;
pub mod config;
pub mod context;
pub mod diff;
pub mod domain;
pub mod error;
pub mod meta;
pub mod review;
pub mod session;
pub mod types;

pub use config::AppConfig;
pub use error::AssayError;
pub use review::{CreateSessionRequest, ReviewEngine};
pub use session::{InMemorySessionStore, SessionStore};
pub use types::{FileReviewResult, MetaReviewResult, ReviewStatus};
