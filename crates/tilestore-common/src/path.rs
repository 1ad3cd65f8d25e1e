//! Logical dataset paths: `/store/{alias}/{relative-path}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

/// Root segment every logical path starts with.
pub const STORE_ROOT: &str = "store";

/// A validated logical path.
///
/// The alias selects the datasource; the relative part is opaque to the
/// catalog apart from segment validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalPath {
    alias: String,
    relative: String,
}

impl LogicalPath {
    /// Parse and validate a logical path string.
    pub fn parse(path: &str) -> StoreResult<Self> {
        let trimmed = path.trim_end_matches('/');
        let rest = trimmed
            .strip_prefix('/')
            .and_then(|p| p.strip_prefix(STORE_ROOT))
            .and_then(|p| p.strip_prefix('/'))
            .ok_or_else(|| {
                StoreError::invalid_path(path, format!("must start with /{}/", STORE_ROOT))
            })?;

        let (alias, relative) = rest
            .split_once('/')
            .ok_or_else(|| StoreError::invalid_path(path, "missing relative path after alias"))?;

        if alias.is_empty() {
            return Err(StoreError::invalid_path(path, "empty datasource alias"));
        }
        validate_segment(path, alias)?;
        for segment in relative.split('/') {
            validate_segment(path, segment)?;
        }

        Ok(Self {
            alias: alias.to_string(),
            relative: relative.to_string(),
        })
    }

    /// Build a path from an alias and a relative path.
    pub fn new(alias: &str, relative: &str) -> StoreResult<Self> {
        Self::parse(&format!("/{}/{}/{}", STORE_ROOT, alias, relative))
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Last path segment, used as the band or image name.
    pub fn name(&self) -> &str {
        self.relative.rsplit('/').next().unwrap_or(&self.relative)
    }

    /// Child path `{self}/{segment}`.
    pub fn join(&self, segment: &str) -> StoreResult<Self> {
        Self::new(&self.alias, &format!("{}/{}", self.relative, segment))
    }

    /// Physical key prefix on the storage endpoint.
    pub fn physical_key(&self) -> String {
        format!("{}/{}", self.alias, self.relative)
    }
}

fn validate_segment(path: &str, segment: &str) -> StoreResult<()> {
    if segment.is_empty() {
        return Err(StoreError::invalid_path(path, "empty path segment"));
    }
    if segment == "." || segment == ".." {
        return Err(StoreError::invalid_path(path, "relative segments are not allowed"));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, '?' | '=' | '\\' | '*'))
    {
        return Err(StoreError::invalid_path(
            path,
            format!("illegal character {:?}", c),
        ));
    }
    Ok(())
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/{}", STORE_ROOT, self.alias, self.relative)
    }
}

impl FromStr for LogicalPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LogicalPath {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<LogicalPath> for String {
    fn from(p: LogicalPath) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse() {
        let p = LogicalPath::parse("/store/landsat/2024/scene_1/B04").unwrap();
        assert_eq!(p.alias(), "landsat");
        assert_eq!(p.relative(), "2024/scene_1/B04");
        assert_eq!(p.name(), "B04");
        assert_eq!(p.physical_key(), "landsat/2024/scene_1/B04");
        assert_eq!(p.to_string(), "/store/landsat/2024/scene_1/B04");
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        let p = LogicalPath::parse("/store/a/b/").unwrap();
        assert_eq!(p.relative(), "b");
    }

    #[test]
    fn test_rejects_bad_paths() {
        for bad in [
            "store/a/b",
            "/data/a/b",
            "/store/a",
            "/store//b",
            "/store/a/b//c",
            "/store/a/../b",
            "/store/a/b c",
            "/store/a/b?x=1",
        ] {
            let err = LogicalPath::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidPath, "{}", bad);
        }
    }
}
