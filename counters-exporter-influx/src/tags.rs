use std::slice::Iter;

use thiserror::Error;

/// Error parsing a `key=value` tag.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid tag '{input}' (expected 'key=value' with a non-empty key and value)")]
pub struct ParseTagError {
    input: String,
}

/// An ordered set of tags attached to every exported message.
///
/// Tags keep their insertion order, which is also the order they are rendered in. Inserting a key that already exists
/// replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: Vec<(String, String)>,
}

impl TagSet {
    /// Creates an empty `TagSet`.
    pub fn new() -> Self {
        TagSet::default()
    }

    /// Adds a tag, returning the updated set.
    #[must_use]
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.insert(key, value);
        self
    }

    /// Inserts a tag.
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let value = value.into();
        match self.tags.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.tags.push((key, value)),
        }
    }

    /// Parses a `key=value` pair and inserts it.
    ///
    /// The value may itself contain `=`.
    ///
    /// # Errors
    ///
    /// If the input has no `=`, or either the key or the value is empty, an error is returned. Line protocol has no
    /// way to write an empty tag value.
    pub fn insert_parsed(&mut self, input: &str) -> Result<(), ParseTagError> {
        match input.split_once('=') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                self.insert(key, value);
                Ok(())
            }
            _ => Err(ParseTagError { input: input.to_string() }),
        }
    }

    /// Returns an iterator over the tags, in insertion order.
    pub fn iter(&self) -> Iter<'_, (String, String)> {
        self.tags.iter()
    }

    /// Returns the number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for TagSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = TagSet::new();
        for (key, value) in iter {
            tags.insert(key, value);
        }
        tags
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a (String, String);
    type IntoIter = Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
