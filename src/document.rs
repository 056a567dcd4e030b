// ABOUTME: Insertion-ordered BSON document with unique element names.
// ABOUTME: The doc! macro builds documents literally, preserving element order.

use crate::error::{Error, Result};
use crate::value::Bson;
use std::fmt;

/// An ordered collection of uniquely named BSON elements.
///
/// Element order is the order of insertion and is preserved through every
/// encode/decode round trip. Lookup by name is a linear scan; documents in
/// this format are small and the scan beats a map for typical sizes.
#[derive(Clone, PartialEq, Default)]
pub struct Document {
    elements: Vec<(String, Bson)>,
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Document { elements: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Document {
            elements: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Appends an element, failing on a duplicate name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Bson>) -> Result<()> {
        let name = name.into();
        if self.contains_key(&name) {
            return Err(Error::Format(format!("duplicate element name: {name}")));
        }
        self.elements.push((name, value.into()));
        Ok(())
    }

    /// Sets an element, replacing the existing value in place if the name
    /// is already present. Returns the previous value, if any.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        let name = name.into();
        let value = value.into();
        for (n, v) in &mut self.elements {
            if *n == name {
                return Some(std::mem::replace(v, value));
            }
        }
        self.elements.push((name, value));
        None
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Bson> {
        self.elements.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Bson> {
        self.elements
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.elements.iter().any(|(n, _)| n == name)
    }

    /// Removes an element by name, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Bson> {
        let index = self.elements.iter().position(|(n, _)| n == name)?;
        Some(self.elements.remove(index).1)
    }

    /// The zero-based position of an element, if present.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.elements.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// The element names, in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Bson> {
        self.elements.iter().map(|(_, v)| v)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (n, v) in self.iter() {
            map.entry(&n, v);
        }
        map.finish()
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = std::vec::IntoIter<(String, Bson)>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl FromIterator<(String, Bson)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Bson)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (name, value) in iter {
            doc.insert(name, value);
        }
        doc
    }
}

/// Builds a [`Document`] literally, preserving element order.
///
/// ```rust
/// use bsonic::doc;
///
/// let d = doc! {
///     "name" => "widget",
///     "qty" => 7,
///     "tags" => vec!["a", "b"],
/// };
/// assert_eq!(d.keys().collect::<Vec<_>>(), ["name", "qty", "tags"]);
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ($($key:tt => $value:expr),* $(,)?) => {{
        let mut doc = $crate::Document::new();
        $(
            doc.insert($key, $crate::Bson::from($value));
        )*
        doc
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rejects_duplicate_names() {
        let mut d = Document::new();
        d.push("a", 1).unwrap();
        assert!(d.push("a", 2).is_err());
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut d = doc! { "a" => 1, "b" => 2 };
        let old = d.insert("a", 10);
        assert_eq!(old, Some(Bson::Int32(1)));
        assert_eq!(d.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(d.get("a"), Some(&Bson::Int32(10)));
    }

    #[test]
    fn order_is_insertion_order() {
        let d = doc! { "z" => 1, "a" => 2, "m" => 3 };
        assert_eq!(d.keys().collect::<Vec<_>>(), ["z", "a", "m"]);
        assert_eq!(d.position("m"), Some(2));
    }
}
