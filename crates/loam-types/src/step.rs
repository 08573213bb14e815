use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// One path segment in a tree key.
///
/// Steps are non-empty UTF-8 strings; their binary form (used for bucket
/// indexing and on-disk encoding) is the raw UTF-8 bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Step(String);

impl Step {
    /// Create a step, rejecting the empty string.
    pub fn new(s: impl Into<String>) -> Result<Self, TypeError> {
        let s = s.into();
        if s.is_empty() {
            return Err(TypeError::EmptyStep);
        }
        Ok(Self(s))
    }

    /// The step as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Binary serialisation of the step.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Length of the binary form in bytes.
    pub fn byte_len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step({:?})", self.0)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Step {
    type Error = TypeError;

    fn try_from(s: &str) -> Result<Self, TypeError> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(matches!(Step::new(""), Err(TypeError::EmptyStep)));
    }

    #[test]
    fn binary_form_is_utf8() {
        let s = Step::new("src").unwrap();
        assert_eq!(s.as_bytes(), b"src");
        assert_eq!(s.byte_len(), 3);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = Step::new("alpha").unwrap();
        let b = Step::new("beta").unwrap();
        assert!(a < b);
    }

    #[test]
    fn display_is_raw() {
        let s = Step::new("lib.rs").unwrap();
        assert_eq!(format!("{s}"), "lib.rs");
    }
}
