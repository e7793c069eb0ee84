//! Structural cache keys.

use std::fmt;

use sha2::{Digest, Sha256};

/// One segment of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySegment {
  Str(String),
  Int(i64),
  Bool(bool),
}

impl From<&str> for KeySegment {
  fn from(value: &str) -> Self {
    KeySegment::Str(value.to_string())
  }
}

impl From<String> for KeySegment {
  fn from(value: String) -> Self {
    KeySegment::Str(value)
  }
}

impl From<&String> for KeySegment {
  fn from(value: &String) -> Self {
    KeySegment::Str(value.clone())
  }
}

impl From<i64> for KeySegment {
  fn from(value: i64) -> Self {
    KeySegment::Int(value)
  }
}

impl From<bool> for KeySegment {
  fn from(value: bool) -> Self {
    KeySegment::Bool(value)
  }
}

impl fmt::Display for KeySegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      // Debug formatting quotes and escapes like a JSON string.
      KeySegment::Str(s) => write!(f, "{:?}", s),
      KeySegment::Int(i) => write!(f, "{}", i),
      KeySegment::Bool(b) => write!(f, "{}", b),
    }
  }
}

/// Ordered sequence of segments identifying a cached query.
///
/// Equality and hashing are structural, so two keys built from the same
/// segments always hit the same cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<KeySegment>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  /// Append a segment, builder style.
  pub fn with(mut self, segment: impl Into<KeySegment>) -> Self {
    self.0.push(segment.into());
    self
  }

  pub fn segments(&self) -> &[KeySegment] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// True if every segment of `prefix` matches the start of this key.
  /// The empty key is a prefix of every key.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// Stable SHA-256 hex digest of the rendered key, used to correlate log lines.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, segment) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ",")?;
      }
      write!(f, "{}", segment)?;
    }
    write!(f, "]")
  }
}

/// Types that name a cached query.
pub trait AsQueryKey {
  fn query_key(&self) -> QueryKey;

  /// Human readable description, used in logs and CLI output.
  fn description(&self) -> String {
    self.query_key().to_string()
  }
}

impl AsQueryKey for QueryKey {
  fn query_key(&self) -> QueryKey {
    self.clone()
  }
}
