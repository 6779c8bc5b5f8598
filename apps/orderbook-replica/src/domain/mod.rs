//! Domain Layer - Order book data structures and subscription identity.
//!
//! Pure types with no I/O. Everything above this layer mutates the book only
//! through these types.

/// Price-level tables for one side of the book.
pub mod book;

/// Replica state for one symbol and its projections.
pub mod replica;

/// Symbols, epochs and subscription records.
pub mod subscription;
