//! Collection and document references, and the sources they resolve from
//!
//! A reference is a normalized slash-separated path. Collections live at
//! odd segment counts (`users`, `users/alice/posts`), documents at even
//! ones (`users/alice`).

use crate::cell::ReactiveCell;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

fn split_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "path is empty".to_string(),
        });
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "path contains an empty segment".to_string(),
        });
    }
    Ok(segments)
}

/// Reference to a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionRef(String);

impl CollectionRef {
    /// Parse a collection path
    pub fn parse(path: &str) -> Result<Self> {
        let segments = split_path(path)?;
        if segments.len() % 2 == 0 {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "collection paths need an odd number of segments".to_string(),
            });
        }
        Ok(Self(segments.join("/")))
    }

    /// Full path of the collection
    pub fn path(&self) -> &str {
        &self.0
    }

    /// Last path segment
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Reference to a document inside this collection
    pub fn doc(&self, id: &str) -> DocumentRef {
        DocumentRef(format!("{}/{}", self.0, id.trim_matches('/')))
    }

    /// The document this collection is nested under, if any
    pub fn parent(&self) -> Option<DocumentRef> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| DocumentRef(parent.to_string()))
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a single document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef(String);

impl DocumentRef {
    /// Parse a document path
    pub fn parse(path: &str) -> Result<Self> {
        let segments = split_path(path)?;
        if segments.len() % 2 != 0 {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "document paths need an even number of segments".to_string(),
            });
        }
        Ok(Self(segments.join("/")))
    }

    /// Full path of the document
    pub fn path(&self) -> &str {
        &self.0
    }

    /// Document id (last path segment)
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// The collection containing this document
    pub fn parent(&self) -> CollectionRef {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionRef(parent.to_string()),
            None => CollectionRef(self.0.clone()),
        }
    }

    /// Reference to a subcollection of this document
    pub fn collection(&self, name: &str) -> CollectionRef {
        CollectionRef(format!("{}/{}", self.0, name.trim_matches('/')))
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a document or collection takes its reference from
///
/// `Cell` sources are followed: whenever the cell changes, the owner
/// re-resolves its reference and restarts any open listener.
pub enum Source<R> {
    /// No reference; the owner stays inactive
    None,
    /// A path resolved through the backend
    Path(String),
    /// An already resolved reference
    Ref(R),
    /// A reactive path
    Cell(ReactiveCell<Option<String>>),
}

impl<R: Clone> Clone for Source<R> {
    fn clone(&self) -> Self {
        match self {
            Source::None => Source::None,
            Source::Path(path) => Source::Path(path.clone()),
            Source::Ref(reference) => Source::Ref(reference.clone()),
            Source::Cell(cell) => Source::Cell(cell.clone()),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for Source<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::None => f.write_str("Source::None"),
            Source::Path(path) => f.debug_tuple("Source::Path").field(path).finish(),
            Source::Ref(reference) => f.debug_tuple("Source::Ref").field(reference).finish(),
            Source::Cell(cell) => f.debug_tuple("Source::Cell").field(&cell.get()).finish(),
        }
    }
}

impl<R> Default for Source<R> {
    fn default() -> Self {
        Source::None
    }
}

impl<R: Clone> Source<R> {
    /// Resolve the current reference using `parse` for path strings
    pub fn resolve<F>(&self, parse: F) -> Result<Option<R>>
    where
        F: Fn(&str) -> Result<R>,
    {
        match self {
            Source::None => Ok(None),
            Source::Path(path) => parse(path).map(Some),
            Source::Ref(reference) => Ok(Some(reference.clone())),
            Source::Cell(cell) => match cell.get().as_deref() {
                Some(path) => parse(path).map(Some),
                None => Ok(None),
            },
        }
    }

    /// The reactive cell this source follows, if any
    pub fn cell(&self) -> Option<&ReactiveCell<Option<String>>> {
        match self {
            Source::Cell(cell) => Some(cell),
            _ => None,
        }
    }
}

impl<R> From<&str> for Source<R> {
    fn from(path: &str) -> Self {
        Source::Path(path.to_string())
    }
}

impl<R> From<String> for Source<R> {
    fn from(path: String) -> Self {
        Source::Path(path)
    }
}

impl From<DocumentRef> for Source<DocumentRef> {
    fn from(reference: DocumentRef) -> Self {
        Source::Ref(reference)
    }
}

impl From<CollectionRef> for Source<CollectionRef> {
    fn from(reference: CollectionRef) -> Self {
        Source::Ref(reference)
    }
}

impl<R> From<ReactiveCell<Option<String>>> for Source<R> {
    fn from(cell: ReactiveCell<Option<String>>) -> Self {
        Source::Cell(cell)
    }
}

impl<R> From<Option<String>> for Source<R> {
    fn from(path: Option<String>) -> Self {
        match path {
            Some(path) => Source::Path(path),
            None => Source::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_paths() {
        let users = CollectionRef::parse("/users/").unwrap();
        assert_eq!(users.path(), "users");
        assert_eq!(users.id(), "users");
        assert!(users.parent().is_none());

        let posts = CollectionRef::parse("users/alice/posts").unwrap();
        assert_eq!(posts.parent().unwrap().path(), "users/alice");
        assert_eq!(posts.doc("p1").path(), "users/alice/posts/p1");

        assert!(CollectionRef::parse("users/alice").is_err());
        assert!(CollectionRef::parse("").is_err());
        assert!(CollectionRef::parse("users//posts").is_err());
    }

    #[test]
    fn test_document_paths() {
        let doc = DocumentRef::parse("users/alice").unwrap();
        assert_eq!(doc.id(), "alice");
        assert_eq!(doc.parent().path(), "users");
        assert_eq!(doc.collection("posts").path(), "users/alice/posts");

        assert!(matches!(
            DocumentRef::parse("users"),
            Err(Error::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_source_resolution() {
        let path: Source<DocumentRef> = "todos/1".into();
        assert_eq!(
            path.resolve(DocumentRef::parse).unwrap(),
            Some(DocumentRef::parse("todos/1").unwrap())
        );

        let none: Source<DocumentRef> = Source::None;
        assert_eq!(none.resolve(DocumentRef::parse).unwrap(), None);

        let cell = ReactiveCell::new(Some("todos/2".to_string()));
        let followed: Source<DocumentRef> = cell.clone().into();
        assert_eq!(
            followed.resolve(DocumentRef::parse).unwrap().unwrap().id(),
            "2"
        );
        cell.set(None);
        assert_eq!(followed.resolve(DocumentRef::parse).unwrap(), None);
    }
}
