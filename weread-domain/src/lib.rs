//! WeRead Domain Layer
//!
//! Pure domain types with zero I/O dependencies.
//! Contains the catalog entities, seed templates and validated value objects.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod credentials;
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use credentials::{
    render_field, SecretMaterial, SeedRecord, REQUIRED_BODY_FIELDS, SESSION_COOKIE,
};
pub use entities::{AnchorPolicy, Book, Catalog, Chapter, ChapterOrigin, Cursor, Position};
pub use value_objects::{DomainError, Probability, ReadingMode, ValueRange, MAX_RANGE_BOUND};
