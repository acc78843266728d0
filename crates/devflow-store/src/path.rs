//! Document and collection paths
//!
//! Paths alternate collection and document segments:
//! `projects` is a collection, `projects/p1` a document,
//! `projects/p1/chat` a sub-collection of that document.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

fn parse_segments(raw: &str) -> Result<Vec<String>, StoreError> {
    if raw.is_empty() {
        return Err(StoreError::invalid_path(raw, "empty path"));
    }
    raw.split('/')
        .map(|segment| {
            if segment.is_empty() {
                Err(StoreError::invalid_path(raw, "empty segment"))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

fn check_segment(segment: &str) -> Result<(), StoreError> {
    if segment.is_empty() {
        return Err(StoreError::invalid_path(segment, "empty segment"));
    }
    if segment.contains('/') {
        return Err(StoreError::invalid_path(segment, "segment contains '/'"));
    }
    Ok(())
}

/// Path to a collection (odd number of segments)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionPath {
    segments: Vec<String>,
}

impl CollectionPath {
    /// Top-level collection
    pub fn root(name: &str) -> Result<Self, StoreError> {
        check_segment(name)?;
        Ok(Self {
            segments: vec![name.to_string()],
        })
    }

    /// Document inside this collection
    pub fn doc(&self, id: &str) -> Result<DocPath, StoreError> {
        check_segment(id)?;
        let mut segments = self.segments.clone();
        segments.push(id.to_string());
        Ok(DocPath { segments })
    }

    /// Document with a freshly generated, time-sortable id
    #[must_use]
    pub fn new_doc(&self) -> DocPath {
        let mut segments = self.segments.clone();
        segments.push(Ulid::new().to_string());
        DocPath { segments }
    }

    /// Last segment
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    /// Owning document, `None` for top-level collections
    #[must_use]
    pub fn parent(&self) -> Option<DocPath> {
        if self.segments.len() < 3 {
            return None;
        }
        Some(DocPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }
}

impl FromStr for CollectionPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = parse_segments(s)?;
        if segments.len() % 2 == 0 {
            return Err(StoreError::invalid_path(
                s,
                "collection paths need an odd number of segments",
            ));
        }
        Ok(Self { segments })
    }
}

impl TryFrom<String> for CollectionPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CollectionPath> for String {
    fn from(value: CollectionPath) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Path to a single document (even number of segments)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath {
    segments: Vec<String>,
}

impl DocPath {
    /// Document id (last segment)
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    /// Collection containing this document
    #[must_use]
    pub fn parent(&self) -> CollectionPath {
        CollectionPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        }
    }

    /// Sub-collection under this document
    pub fn collection(&self, name: &str) -> Result<CollectionPath, StoreError> {
        check_segment(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(CollectionPath { segments })
    }

    /// True when `self` lives strictly below `ancestor`
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &DocPath) -> bool {
        self.segments.len() > ancestor.segments.len()
            && self.segments[..ancestor.segments.len()] == ancestor.segments[..]
    }
}

impl FromStr for DocPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = parse_segments(s)?;
        if segments.len() % 2 != 0 {
            return Err(StoreError::invalid_path(
                s,
                "document paths need an even number of segments",
            ));
        }
        Ok(Self { segments })
    }
}

impl TryFrom<String> for DocPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DocPath> for String {
    fn from(value: DocPath) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_path_parse_and_parent() {
        let path: DocPath = "projects/p1/chat/m1".parse().unwrap();
        assert_eq!(path.id(), "m1");
        assert_eq!(path.parent().to_string(), "projects/p1/chat");
        assert_eq!(
            path.parent().parent().unwrap().to_string(),
            "projects/p1"
        );
    }

    #[test]
    fn doc_path_rejects_collection_shape() {
        assert!("projects".parse::<DocPath>().is_err());
        assert!("projects//p1".parse::<DocPath>().is_err());
        assert!("projects/p1".parse::<CollectionPath>().is_err());
    }

    #[test]
    fn descendant_check() {
        let project: DocPath = "projects/p1".parse().unwrap();
        let message: DocPath = "projects/p1/chat/m1".parse().unwrap();
        let other: DocPath = "projects/p10/chat/m1".parse().unwrap();
        assert!(message.is_descendant_of(&project));
        assert!(!other.is_descendant_of(&project));
        assert!(!project.is_descendant_of(&project));
    }

    #[test]
    fn segment_with_slash_rejected() {
        let projects = CollectionPath::root("projects").unwrap();
        assert!(projects.doc("a/b").is_err());
        assert!(projects.doc("").is_err());
    }

    #[test]
    fn generated_ids_are_sortable() {
        let projects = CollectionPath::root("projects").unwrap();
        let a = projects.new_doc();
        let b = projects.new_doc();
        assert_ne!(a, b);
        assert_eq!(a.parent(), projects);
    }
}
