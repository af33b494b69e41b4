//! Domain Entities for WeRead
//!
//! Books, chapters and the catalog they form, plus the reading position a
//! request claims to represent. The catalog is immutable once a session
//! starts; all navigation happens through [`Cursor`] indexes.

use crate::value_objects::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Chapter
// =============================================================================

/// Where a chapter entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterOrigin {
    /// Listed in configuration; its ordinal is meaningful
    #[default]
    Configured,
    /// Appended at runtime from the seed template; its ordinal is not
    Seed,
}

/// A chapter of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Remote chapter identifier
    pub id: String,
    /// Explicit chapter index from configuration
    #[serde(default)]
    pub index: Option<u32>,
    /// Origin of this entry
    #[serde(default)]
    pub origin: ChapterOrigin,
}

impl Chapter {
    /// Configured chapter without an explicit index
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index: None,
            origin: ChapterOrigin::Configured,
        }
    }

    /// Configured chapter with an explicit index
    pub fn with_index(id: impl Into<String>, index: u32) -> Self {
        Self {
            id: id.into(),
            index: Some(index),
            origin: ChapterOrigin::Configured,
        }
    }

    fn from_seed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index: None,
            origin: ChapterOrigin::Seed,
        }
    }

    /// Resolve the chapter index sent on the wire.
    ///
    /// Explicit index wins, then the ordinal in a configured list, then the
    /// index inherited from the seed. Seed-appended chapters prefer the
    /// inherited index over their ordinal.
    pub fn resolve_index(&self, ordinal: usize, inherited: Option<u32>) -> u32 {
        if let Some(explicit) = self.index {
            return explicit;
        }
        let derived = u32::try_from(ordinal).unwrap_or(u32::MAX);
        match self.origin {
            ChapterOrigin::Configured => derived,
            ChapterOrigin::Seed => inherited.unwrap_or(derived),
        }
    }
}

// =============================================================================
// Book
// =============================================================================

/// A book with an ordered list of chapters.
///
/// # Invariants
/// - `id` is non-empty
/// - At least one chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Remote book identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Chapters in reading order
    pub chapters: Vec<Chapter>,
}

impl Book {
    /// Create a new book with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidBook` if the id is empty or there are no chapters
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        chapters: Vec<Chapter>,
    ) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::InvalidBook("book id must be non-empty".to_string()));
        }
        if chapters.is_empty() {
            return Err(DomainError::InvalidBook(format!("book {} has no chapters", id)));
        }
        Ok(Self {
            id,
            name: name.into(),
            chapters,
        })
    }

    fn dynamic(id: &str, chapter_id: &str) -> Self {
        let short: String = id.chars().take(10).collect();
        Self {
            id: id.to_string(),
            name: format!("Dynamic book ({}...)", short),
            chapters: vec![Chapter::from_seed(chapter_id)],
        }
    }

    /// Index of a chapter by id
    pub fn chapter_position(&self, chapter_id: &str) -> Option<usize> {
        self.chapters.iter().position(|c| c.id == chapter_id)
    }
}

// =============================================================================
// Cursor / Position
// =============================================================================

/// Index pair pointing at one chapter in a [`Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cursor {
    /// Book index in the catalog
    pub book: usize,
    /// Chapter index in the book
    pub chapter: usize,
}

impl Cursor {
    /// Create a cursor
    pub fn new(book: usize, chapter: usize) -> Self {
        Self { book, chapter }
    }
}

/// Exactly where in the remote content a request claims to be.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Remote book identifier
    pub book_id: String,
    /// Remote chapter identifier
    pub chapter_id: String,
    /// Chapter index sent as `ci`
    pub chapter_index: u32,
    /// Content offset sent as `co`
    pub content_offset: i64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (ci={})", self.book_id, self.chapter_id, self.chapter_index)
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// How the start position is chosen from seed data and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorPolicy {
    /// Prefer the seed template's book/chapter as the starting point
    pub use_seed_first: bool,
    /// Fall back to the first configured book when the seed is unusable
    pub fallback_to_config: bool,
}

impl Default for AnchorPolicy {
    fn default() -> Self {
        Self {
            use_seed_first: true,
            fallback_to_config: true,
        }
    }
}

/// Ordered collection of books available to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    books: Vec<Book>,
}

impl Catalog {
    /// Create a catalog from validated books.
    pub fn new(books: Vec<Book>) -> Self {
        Self { books }
    }

    /// All books in order
    pub fn books(&self) -> &[Book] {
        &self.books
    }

    /// Number of books
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// True when there are no books
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Book at an index
    pub fn book(&self, index: usize) -> Option<&Book> {
        self.books.get(index)
    }

    /// Index of a book by id
    pub fn find_book(&self, book_id: &str) -> Option<usize> {
        self.books.iter().position(|b| b.id == book_id)
    }

    /// Number of chapters in a book (0 for an unknown index)
    pub fn chapter_count(&self, book: usize) -> usize {
        self.books.get(book).map_or(0, |b| b.chapters.len())
    }

    /// Total chapters across all books
    pub fn total_chapters(&self) -> usize {
        self.books.iter().map(|b| b.chapters.len()).sum()
    }

    /// Check that a cursor points into the catalog.
    pub fn check(&self, cursor: Cursor) -> Result<(), DomainError> {
        if cursor.chapter < self.chapter_count(cursor.book) {
            Ok(())
        } else {
            Err(DomainError::OutOfBounds {
                book: cursor.book,
                chapter: cursor.chapter,
            })
        }
    }

    /// Resolve a cursor into a wire position.
    ///
    /// `inherited_index` and `content_offset` come from the seed template.
    pub fn position_at(
        &self,
        cursor: Cursor,
        inherited_index: Option<u32>,
        content_offset: i64,
    ) -> Result<Position, DomainError> {
        self.check(cursor)?;
        let book = &self.books[cursor.book];
        let chapter = &book.chapters[cursor.chapter];

        Ok(Position {
            book_id: book.id.clone(),
            chapter_id: chapter.id.clone(),
            chapter_index: chapter.resolve_index(cursor.chapter, inherited_index),
            content_offset,
        })
    }

    /// Choose the starting cursor, possibly extending the catalog with the
    /// seed's book or chapter.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidCatalog` when neither the seed nor the
    /// configuration yields a usable position.
    pub fn anchor(
        mut self,
        seed_book: Option<&str>,
        seed_chapter: Option<&str>,
        policy: AnchorPolicy,
    ) -> Result<(Catalog, Cursor), DomainError> {
        let seed = match (seed_book, seed_chapter) {
            (Some(b), Some(c)) if !b.is_empty() && !c.is_empty() => Some((b, c)),
            _ => None,
        };

        if let (Some((book_id, chapter_id)), true) = (seed, policy.use_seed_first) {
            let cursor = match self.find_book(book_id) {
                Some(book_idx) => {
                    let book = &mut self.books[book_idx];
                    let chapter_idx = match book.chapter_position(chapter_id) {
                        Some(idx) => idx,
                        None => {
                            book.chapters.push(Chapter::from_seed(chapter_id));
                            book.chapters.len() - 1
                        }
                    };
                    Cursor::new(book_idx, chapter_idx)
                }
                None => {
                    self.books.push(Book::dynamic(book_id, chapter_id));
                    Cursor::new(self.books.len() - 1, 0)
                }
            };
            return Ok((self, cursor));
        }

        if policy.fallback_to_config && !self.is_empty() {
            return Ok((self, Cursor::default()));
        }

        Err(DomainError::InvalidCatalog(
            "no usable seed position and no configured books".to_string(),
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
