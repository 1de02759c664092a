//! Field vocabulary for the identity card detector

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the six card fields the pipeline extracts.
///
/// Declaration order is the canonical output order; `Ord` follows it so ordered
/// maps keyed by `FieldName` iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldName {
    #[serde(rename = "banglaName")]
    BanglaName,
    #[serde(rename = "birthDate")]
    BirthDate,
    #[serde(rename = "englishName")]
    EnglishName,
    #[serde(rename = "fatherName")]
    FatherName,
    #[serde(rename = "motherName")]
    MotherName,
    #[serde(rename = "numberNID")]
    NumberNid,
}

impl FieldName {
    /// The whitelist, in canonical order
    pub const ALL: [FieldName; 6] = [
        FieldName::BanglaName,
        FieldName::BirthDate,
        FieldName::EnglishName,
        FieldName::FatherName,
        FieldName::MotherName,
        FieldName::NumberNid,
    ];

    /// Detector class label for this field
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::BanglaName => "banglaName",
            FieldName::BirthDate => "birthDate",
            FieldName::EnglishName => "englishName",
            FieldName::FatherName => "fatherName",
            FieldName::MotherName => "motherName",
            FieldName::NumberNid => "numberNID",
        }
    }

    /// Resolve a detector class label. Matching is exact; anything else is outside the whitelist.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.as_str() == label)
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
