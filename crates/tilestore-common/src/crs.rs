//! Coordinate Reference System identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known CRS codes the built-in warper can transform between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsCode {
    /// WGS84 Geographic (lon/lat in degrees)
    Epsg4326,
    /// Web Mercator (meters)
    Epsg3857,
}

impl CrsCode {
    /// Parse a CRS string.
    ///
    /// Accepts formats like:
    /// - "EPSG:4326"
    /// - "epsg:4326"
    /// - "CRS:84" (equivalent to EPSG:4326 with lon/lat axis order)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "EPSG:4326" | "CRS:84" | "OGC:CRS84" | "WGS84" => Some(CrsCode::Epsg4326),
            "EPSG:3857" | "EPSG:900913" | "EPSG:3785" => Some(CrsCode::Epsg3857),
            _ => None,
        }
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            CrsCode::Epsg4326 => "EPSG:4326",
            CrsCode::Epsg3857 => "EPSG:3857",
        };
        write!(f, "{}", code)
    }
}

/// A CRS as recorded in band descriptors.
///
/// Stored verbatim (an authority code or a WKT string) so bands in CRSs the
/// built-in warper does not know about can still be catalogued and read in
/// their native grid.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(String);

impl Crs {
    pub fn new(definition: impl Into<String>) -> Self {
        Self(definition.into())
    }

    pub fn wgs84() -> Self {
        Self::from(CrsCode::Epsg4326)
    }

    pub fn web_mercator() -> Self {
        Self::from(CrsCode::Epsg3857)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Known code for this CRS, if any.
    pub fn code(&self) -> Option<CrsCode> {
        CrsCode::parse(&self.0)
    }

    /// Equivalence that honours aliases such as `CRS:84` for `EPSG:4326`.
    pub fn same_as(&self, other: &Crs) -> bool {
        match (self.code(), other.code()) {
            (Some(a), Some(b)) => a == b,
            _ => normalize(&self.0) == normalize(&other.0),
        }
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl From<CrsCode> for Crs {
    fn from(code: CrsCode) -> Self {
        Self(code.to_string())
    }
}

impl From<&str> for Crs {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<String>().to_uppercase()
}
