use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GeoflatError;

const ACCESSION_PREFIXES: &[&str] = &["GSE", "GSM", "GPL", "GDS"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = GeoflatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let digits = ACCESSION_PREFIXES
            .iter()
            .find_map(|prefix| normalized.strip_prefix(prefix));
        let is_valid = digits
            .map(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(false);
        if !is_valid {
            return Err(GeoflatError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// The fixed chain of pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    ResolveUrl,
    FetchArchive,
    UnpackArchive,
    AssembleTables,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        StageName::ResolveUrl,
        StageName::FetchArchive,
        StageName::UnpackArchive,
        StageName::AssembleTables,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::ResolveUrl => "resolve-url",
            StageName::FetchArchive => "fetch-archive",
            StageName::UnpackArchive => "unpack-archive",
            StageName::AssembleTables => "assemble-tables",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = GeoflatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str() == trimmed)
            .ok_or_else(|| GeoflatError::UnknownStage(value.to_string()))
    }
}
