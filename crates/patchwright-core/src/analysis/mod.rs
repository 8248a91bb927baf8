//! Pure-function collaborators that seed stage payloads (spec.md §1): a
//! log parser, a file ranker, and a minimal project-structure analyzer.
//! None of these touch the database or the network; they are plain
//! functions over strings and the filesystem, called by the `plan` and
//! `retrieve` handlers.

pub mod file_ranker;
pub mod log_parser;
pub mod project_analyzer;
