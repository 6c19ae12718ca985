//! Root-scoped path resolution.
//!
//! A [`RootPath`] is fixed for the lifetime of an accessor. Every caller key
//! is resolved against it into an [`AbsoluteKey`], which is the unit of
//! addressing for both the local cache and the backing store. A relative key
//! can never climb out of its root.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::PathError;

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Characters the database refuses inside a path segment.
const FORBIDDEN_SEGMENT_CHARS: [char; 5] = ['.', '$', '#', '[', ']'];

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{([A-Za-z_][A-Za-z0-9_]*)\}$").expect("Invalid placeholder regex")
});

fn validate_segment(segment: &str) -> Result<(), PathError> {
    if let Some(c) = segment
        .chars()
        .find(|c| FORBIDDEN_SEGMENT_CHARS.contains(c) || c.is_ascii_control())
    {
        return Err(PathError::InvalidSegment {
            segment: segment.to_string(),
            reason: format!("contains forbidden character {:?}", c),
        });
    }
    Ok(())
}

// ============================================================================
// ABSOLUTE KEY
// ============================================================================

/// A fully qualified database path.
///
/// Stored as `/`-joined segments with no leading or trailing separator. The
/// database root is the empty key and displays as `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AbsoluteKey(String);

impl AbsoluteKey {
    /// The database root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse an already-absolute path.
    ///
    /// Duplicate separators are collapsed. Navigation tokens (`.`, `..`) are
    /// not accepted here; use [`resolve`] for caller-supplied paths.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let mut key = Self::root();
        for segment in path.split(SEPARATOR).filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(PathError::InvalidSegment {
                    segment: segment.to_string(),
                    reason: "navigation tokens are not allowed in absolute keys".to_string(),
                });
            }
            validate_segment(segment)?;
            key.push_unchecked(segment);
        }
        Ok(key)
    }

    fn push_unchecked(&mut self, segment: &str) {
        if !self.0.is_empty() {
            self.0.push(SEPARATOR);
        }
        self.0.push_str(segment);
    }

    /// The key as stored, `""` for the root.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn parent(&self) -> Option<AbsoluteKey> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEPARATOR) {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Strict ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> Vec<AbsoluteKey> {
        let mut out = Vec::with_capacity(self.depth());
        let mut current = self.parent();
        while let Some(key) = current {
            current = key.parent();
            out.push(key);
        }
        out
    }

    /// True if `self` lies strictly above `other`.
    pub fn is_ancestor_of(&self, other: &AbsoluteKey) -> bool {
        if self.0.len() >= other.0.len() {
            return false;
        }
        if self.is_root() {
            return true;
        }
        other.0.starts_with(&self.0) && other.0[self.0.len()..].starts_with(SEPARATOR)
    }

    /// Segments of `self` below `ancestor`.
    ///
    /// Returns an empty list when the keys are equal and `None` when
    /// `ancestor` does not contain `self`.
    pub fn strip_prefix(&self, ancestor: &AbsoluteKey) -> Option<Vec<&str>> {
        if self == ancestor {
            return Some(Vec::new());
        }
        if !ancestor.is_ancestor_of(self) {
            return None;
        }
        let rest = &self.0[ancestor.0.len()..];
        Some(rest.split(SEPARATOR).filter(|s| !s.is_empty()).collect())
    }

    /// Prefix shared by every strict descendant of this key.
    pub fn descendant_prefix(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            format!("{}{}", self.0, SEPARATOR)
        }
    }
}

impl fmt::Display for AbsoluteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "{}", SEPARATOR)
        } else {
            f.write_str(&self.0)
        }
    }
}

impl TryFrom<String> for AbsoluteKey {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AbsoluteKey> for String {
    fn from(key: AbsoluteKey) -> Self {
        key.0
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Resolve a caller-supplied relative key against a root.
///
/// Empty segments are dropped and `.` is ignored. `..` pops one segment of
/// the relative path; popping past the root is rejected with
/// [`PathError::EscapesRoot`]. An empty relative key addresses the root.
pub fn resolve(root: &AbsoluteKey, relative: &str) -> Result<AbsoluteKey, PathError> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in relative.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::EscapesRoot {
                        path: relative.to_string(),
                    });
                }
            }
            s => {
                validate_segment(s)?;
                segments.push(s);
            }
        }
    }

    let mut key = root.clone();
    for segment in segments {
        key.push_unchecked(segment);
    }
    Ok(key)
}

// ============================================================================
// ROOT PATH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum RootSegment {
    Literal(String),
    Placeholder(String),
}

/// The configured prefix scoping one accessor.
///
/// Templates may contain placeholder segments such as `users/{uid}`. Without
/// bindings the template is taken literally; once bound, every placeholder
/// must be substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPath {
    template: String,
    segments: Vec<RootSegment>,
    key: AbsoluteKey,
}

impl RootPath {
    /// Parse a root template.
    ///
    /// `"/"` addresses the whole database; `""` is rejected.
    pub fn parse(template: &str) -> Result<Self, PathError> {
        if template.is_empty() {
            return Err(PathError::EmptyRoot);
        }

        let mut segments = Vec::new();
        let mut key = AbsoluteKey::root();
        for raw in template.split(SEPARATOR).filter(|s| !s.is_empty()) {
            if raw == "." || raw == ".." {
                return Err(PathError::InvalidSegment {
                    segment: raw.to_string(),
                    reason: "navigation tokens are not allowed in a root path".to_string(),
                });
            }
            validate_segment(raw)?;
            key.push_unchecked(raw);
            segments.push(match PLACEHOLDER.captures(raw) {
                Some(caps) => RootSegment::Placeholder(caps[1].to_string()),
                None => RootSegment::Literal(raw.to_string()),
            });
        }

        Ok(Self {
            template: template.to_string(),
            segments,
            key,
        })
    }

    /// A root addressing the whole database.
    pub fn database_root() -> Self {
        Self {
            template: SEPARATOR.to_string(),
            segments: Vec::new(),
            key: AbsoluteKey::root(),
        }
    }

    /// Substitute placeholders.
    ///
    /// Every placeholder in the template must have a binding. Bindings must
    /// be single, valid segments. Bindings naming no placeholder are ignored.
    pub fn bind(&self, bindings: &BTreeMap<String, String>) -> Result<Self, PathError> {
        if bindings.is_empty() {
            return Ok(self.clone());
        }

        let mut key = AbsoluteKey::root();
        for segment in &self.segments {
            match segment {
                RootSegment::Literal(s) => key.push_unchecked(s),
                RootSegment::Placeholder(name) => {
                    let value = bindings.get(name).ok_or_else(|| {
                        PathError::UnboundPlaceholder { name: name.clone() }
                    })?;
                    validate_binding(name, value)?;
                    key.push_unchecked(value);
                }
            }
        }

        Ok(Self {
            template: self.template.clone(),
            segments: self.segments.clone(),
            key,
        })
    }

    /// The template this root was parsed from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Names of the placeholders in the template, in order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            RootSegment::Placeholder(name) => Some(name.as_str()),
            RootSegment::Literal(_) => None,
        })
    }

    /// The absolute key of the root itself.
    pub fn key(&self) -> &AbsoluteKey {
        &self.key
    }

    /// Resolve a relative key under this root.
    pub fn resolve(&self, relative: &str) -> Result<AbsoluteKey, PathError> {
        resolve(&self.key, relative)
    }
}

impl fmt::Display for RootPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

fn validate_binding(name: &str, value: &str) -> Result<(), PathError> {
    let invalid = |reason: &str| PathError::InvalidBinding {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if value.is_empty() {
        return Err(invalid("value is empty"));
    }
    if value.contains(SEPARATOR) {
        return Err(invalid("value must be a single segment"));
    }
    if value == "." || value == ".." {
        return Err(invalid("value must not be a navigation token"));
    }
    validate_segment(value).map_err(|e| invalid(&e.to_string()))
}
