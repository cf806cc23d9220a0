//! # RepoSync Testkit
//!
//! Test utilities for RepoSync.
//!
//! This crate provides:
//! - [`TestRepository`]: a temporary local tree synchronized with an
//!   in-memory remote through a real session
//! - Tree snapshots and convergence assertions
//! - Property-based generators for mutation sequences
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reposync_testkit::prelude::*;
//!
//! #[test]
//! fn remote_file_arrives() {
//!     let repo = TestRepository::new();
//!     repo.remote.put_file("/hello.txt", b"hello").unwrap();
//!     repo.sync();
//!     assert_eq!(repo.read_local("hello.txt").unwrap(), b"hello");
//!     repo.assert_converged();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
