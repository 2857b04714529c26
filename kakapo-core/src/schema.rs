//! Filename schema and positional dimension decoding.
//!
//! Every volume in an acquisition directory is named like
//! `S0_t0000_V0_R0_X00_Y00_C00_I0_K0_P0.tif`: sample, timepoint, view,
//! region, tile x, tile y, channel, illumination, camera and plane.
//! [`FilenameSchema`] describes that layout and turns a file name into a typed
//! [`FilenameRecord`].

use crate::{Error, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One axis of the acquisition, in filename order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DimensionKind {
    Sample,
    Timepoint,
    View,
    Region,
    TileX,
    TileY,
    Channel,
    Illumination,
    Camera,
    Plane,
}

impl DimensionKind {
    /// All kinds in filename order.
    pub const ALL: [DimensionKind; 10] = [
        DimensionKind::Sample,
        DimensionKind::Timepoint,
        DimensionKind::View,
        DimensionKind::Region,
        DimensionKind::TileX,
        DimensionKind::TileY,
        DimensionKind::Channel,
        DimensionKind::Illumination,
        DimensionKind::Camera,
        DimensionKind::Plane,
    ];

    /// Lower-case name used in logs and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DimensionKind::Sample => "sample",
            DimensionKind::Timepoint => "timepoint",
            DimensionKind::View => "view",
            DimensionKind::Region => "region",
            DimensionKind::TileX => "tileX",
            DimensionKind::TileY => "tileY",
            DimensionKind::Channel => "channel",
            DimensionKind::Illumination => "illumination",
            DimensionKind::Camera => "camera",
            DimensionKind::Plane => "plane",
        }
    }
}

impl fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of the acquisition naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FilenameSchema {
    /// Field order; position `i` of the split name is `fields[i]`.
    pub fields: Vec<DimensionKind>,
    /// Field delimiter.
    pub delimiter: char,
    /// Extension of single-volume image files, including the dot.
    pub extension: String,
    /// Names starting with this prefix are ignored.
    pub hidden_prefix: char,
    /// Names containing any of these are derived outputs and are ignored.
    pub reserved_substrings: Vec<String>,
}

impl Default for FilenameSchema {
    fn default() -> Self {
        Self {
            fields: DimensionKind::ALL.to_vec(),
            delimiter: '_',
            extension: ".tif".to_string(),
            hidden_prefix: '.',
            reserved_substrings: vec!["MP".to_string(), "max".to_string()],
        }
    }
}

impl FilenameSchema {
    /// Set the image extension (with leading dot).
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Set the field delimiter.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Number of fields a conforming name carries.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Position of `kind` in the name, if the schema carries it.
    #[must_use]
    pub fn position(&self, kind: DimensionKind) -> Option<usize> {
        self.fields.iter().position(|&field| field == kind)
    }

    /// Returns true when `name` is a source volume this schema should decode.
    ///
    /// Hidden files, files without the image extension, and derived outputs
    /// (names containing a reserved substring) are rejected.
    #[must_use]
    pub fn is_qualifying(&self, name: &str) -> bool {
        name.ends_with(&self.extension)
            && !name.starts_with(self.hidden_prefix)
            && !self
                .reserved_substrings
                .iter()
                .any(|reserved| name.contains(reserved.as_str()))
    }

    /// Decode a file name into its dimension tokens.
    ///
    /// The extension is stripped (when present) before splitting.
    ///
    /// # Errors
    /// Returns [`Error::MalformedFilename`] if the field count differs from the
    /// schema, or [`Error::EmptyField`] if a field is empty.
    pub fn decode(&self, name: &str) -> Result<FilenameRecord> {
        let stem = name.strip_suffix(self.extension.as_str()).unwrap_or(name);
        let tokens: Vec<String> = stem.split(self.delimiter).map(str::to_string).collect();

        if tokens.len() != self.fields.len() {
            return Err(Error::MalformedFilename {
                name: name.to_string(),
                expected: self.fields.len(),
                found: tokens.len(),
            });
        }

        if let Some(pos) = tokens.iter().position(String::is_empty) {
            return Err(Error::EmptyField {
                name: name.to_string(),
                field: self.fields[pos].as_str(),
            });
        }

        Ok(FilenameRecord {
            fields: self.fields.clone(),
            tokens,
        })
    }

    /// Join tokens back into a file name following this schema.
    ///
    /// # Errors
    /// Returns [`Error::MalformedFilename`] if the token count is wrong.
    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Result<String> {
        if tokens.len() != self.fields.len() {
            return Err(Error::MalformedFilename {
                name: String::new(),
                expected: self.fields.len(),
                found: tokens.len(),
            });
        }
        let delimiter = self.delimiter.to_string();
        let joined = tokens
            .iter()
            .map(|token| token.as_ref())
            .collect::<Vec<&str>>()
            .join(&delimiter);
        Ok(format!("{joined}{}", self.extension))
    }
}

/// Dimension tokens of one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FilenameRecord {
    fields: Vec<DimensionKind>,
    tokens: Vec<String>,
}

impl FilenameRecord {
    /// Token for `kind`, or `None` if the schema does not carry it.
    #[must_use]
    pub fn get(&self, kind: DimensionKind) -> Option<&str> {
        self.fields
            .iter()
            .position(|&field| field == kind)
            .map(|pos| self.tokens[pos].as_str())
    }

    /// Tokens in schema order.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[must_use]
    pub fn sample(&self) -> Option<&str> {
        self.get(DimensionKind::Sample)
    }

    #[must_use]
    pub fn timepoint(&self) -> Option<&str> {
        self.get(DimensionKind::Timepoint)
    }

    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.get(DimensionKind::Region)
    }

    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.get(DimensionKind::Channel)
    }

    #[must_use]
    pub fn illumination(&self) -> Option<&str> {
        self.get(DimensionKind::Illumination)
    }

    #[must_use]
    pub fn plane(&self) -> Option<&str> {
        self.get(DimensionKind::Plane)
    }

    /// Re-join the tokens into a file name of `schema`.
    ///
    /// # Errors
    /// Returns [`Error::MalformedFilename`] if `schema` has a different field
    /// count.
    pub fn to_file_name(&self, schema: &FilenameSchema) -> Result<String> {
        schema.encode(&self.tokens)
    }

    /// Returns true when the record's token for `kind` equals `name`.
    #[must_use]
    pub fn matches(&self, kind: DimensionKind, name: &str) -> bool {
        self.get(kind) == Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "S0_t0003_V0_R0001_X00_Y00_C00_I0_K0_P0.tif";

    #[test]
    fn test_decode_recovers_tokens_in_order() {
        let schema = FilenameSchema::default();
        let record = schema.decode(NAME).unwrap();
        assert_eq!(
            record.tokens(),
            ["S0", "t0003", "V0", "R0001", "X00", "Y00", "C00", "I0", "K0", "P0"]
        );
        assert_eq!(record.region(), Some("R0001"));
        assert_eq!(record.timepoint(), Some("t0003"));
        assert_eq!(record.plane(), Some("P0"));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let schema = FilenameSchema::default();
        let tokens = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
        let name = schema.encode(&tokens).unwrap();
        assert_eq!(name, "a_b_c_d_e_f_g_h_i_j.tif");
        let record = schema.decode(&name).unwrap();
        assert_eq!(record.tokens(), tokens);
        assert_eq!(record.to_file_name(&schema).unwrap(), name);
        let dashed = FilenameSchema::default().with_delimiter('-');
        assert_eq!(
            record.to_file_name(&dashed).unwrap(),
            "a-b-c-d-e-f-g-h-i-j.tif"
        );
    }

    #[test]
    fn test_decode_rejects_wrong_field_count() {
        let schema = FilenameSchema::default();
        let err = schema.decode("S0_t0_R0.tif").unwrap_err();
        match err {
            Error::MalformedFilename {
                expected, found, ..
            } => {
                assert_eq!(expected, 10);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(schema
            .decode("S0_t0_V0_R0_X0_Y0_C0_I0_K0_P0_extra.tif")
            .is_err());
    }

    #[test]
    fn test_decode_rejects_empty_field() {
        let schema = FilenameSchema::default();
        let err = schema
            .decode("S0__V0_R0_X0_Y0_C0_I0_K0_P0.tif")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::EmptyField {
                field: "timepoint",
                ..
            }
        ));
    }

    #[test]
    fn test_qualifying_filters() {
        let schema = FilenameSchema::default();
        assert!(schema.is_qualifying(NAME));
        assert!(!schema.is_qualifying(".S0_t0_V0_R0_X0_Y0_C0_I0_K0_P0.tif"));
        assert!(!schema.is_qualifying("S0_t0_V0_R0_X0_Y0_C0_I0_K0_MP.tif"));
        assert!(!schema.is_qualifying("R0_C0_t0_max.tif"));
        assert!(!schema.is_qualifying("S0_t0_V0_R0_X0_Y0_C0_I0_K0_P0.txt"));
    }

    #[test]
    fn test_position_follows_field_order() {
        let schema = FilenameSchema::default();
        for (i, kind) in DimensionKind::ALL.iter().enumerate() {
            assert_eq!(schema.position(*kind), Some(i));
        }
    }
}
