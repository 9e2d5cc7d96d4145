//! # weft-core
//!
//! Core abstractions shared across the weft backfill components:
//!
//! - **Identifiers**: Strongly-typed wrappers for DIDs, revisions, record
//!   paths, and content identifiers
//! - **Observability**: Logging initialization and span constructors
//!
//! ## Crate Boundary
//!
//! `weft-core` is the only crate allowed to define shared primitives.
//! The backfill engine and any downstream consumers interact through the
//! types defined here.
//!
//! ## Example
//!
//! ```rust
//! use weft_core::id::{Did, Rev};
//!
//! let repo = Did::new("did:plc:ewvi7nxzyoun6zhxrhs64oiz");
//! let rev = Rev::new("3jt6walwmos2y");
//! assert!(rev > Rev::empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod id;
pub mod observability;

pub use id::{Cid, Did, RecordPath, Rev};
