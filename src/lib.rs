#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]

//! Streams a Subversion history into one or more Git repositories by piping
//! commands to `git fast-import`.
//!
//! The crate provides the per-target-repository machinery: spawning and
//! caching `fast-import` children, allocating marks, tracking branch history,
//! staging branch resets and commit transactions, and resuming an interrupted
//! conversion from the persisted marks file and progress log. Walking the SVN
//! repository and mapping SVN paths to repositories and branches is the
//! caller's job; the caller drives revisions in ascending order.

mod export;
mod options;
mod rules;

pub use export::{ExportError, Exporter, Repository, Transaction};
pub use options::Options;
pub use rules::{RepoRule, Rules, RulesError};
