//! # Codeloom Core
//!
//! Pure analysis logic for Codeloom: snapshot models, the store contract,
//! the virtual compilation host, heuristic structural search, and the
//! relevance scorer.
//!
//! This crate performs no network or filesystem I/O and needs no async
//! runtime. Every service works on an immutable slice of
//! [`models::ProjectFile`] fetched by the caller.

pub mod glob;
pub mod host;
pub mod models;
pub mod relevance;
pub mod resolve;
pub mod search;
pub mod store;
