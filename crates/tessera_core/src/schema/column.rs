//! Column kinds and definitions.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_codec::Value;

/// Type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnKind {
    /// Row identifier (non-empty text).
    Id,
    /// Plain text.
    Text,
    /// Opaque ID of separately stored rich content.
    RichText,
    /// 64-bit signed integer.
    Integer,
    /// Double-precision number. Integers are accepted too.
    Real,
    /// Boolean.
    Boolean,
    /// Instant plus the IANA time zone it was recorded in, stored as
    /// `<RFC 3339>|<zone>`.
    Date,
    /// One value out of a fixed set.
    Select {
        /// Allowed values.
        options: Vec<String>,
    },
    /// Array of text tags, optionally restricted to a fixed set.
    Tags {
        /// Allowed values, or `None` for free-form tags.
        options: Option<Vec<String>>,
    },
}

impl ColumnKind {
    /// Short name used in messages and mirror DDL.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnKind::Id => "id",
            ColumnKind::Text => "text",
            ColumnKind::RichText => "rich_text",
            ColumnKind::Integer => "integer",
            ColumnKind::Real => "real",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Date => "date",
            ColumnKind::Select { .. } => "select",
            ColumnKind::Tags { .. } => "tags",
        }
    }
}

/// Declaration of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Column type.
    pub kind: ColumnKind,
    /// Whether `null` (or a missing cell) is acceptable.
    #[serde(default)]
    pub nullable: bool,
    /// Value used when the cell is missing.
    #[serde(default, with = "crate::json::optional_value")]
    pub default: Option<Value>,
}

impl ColumnDefinition {
    /// Creates a required column without a default.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            default: None,
        }
    }

    /// The `id` column every table carries.
    pub fn id() -> Self {
        Self::new("id", ColumnKind::Id)
    }

    /// Creates a text column.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    /// Creates a rich text reference column.
    pub fn rich_text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::RichText)
    }

    /// Creates an integer column.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Integer)
    }

    /// Creates a real column.
    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Real)
    }

    /// Creates a boolean column.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Boolean)
    }

    /// Creates a date-with-time-zone column.
    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Date)
    }

    /// Creates a select column.
    pub fn select<I, S>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            ColumnKind::Select {
                options: options.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Creates a free-form tags column.
    pub fn tags(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Tags { options: None })
    }

    /// Creates a tags column restricted to `options`.
    pub fn tags_from<I, S>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            ColumnKind::Tags {
                options: Some(options.into_iter().map(Into::into).collect()),
            },
        )
    }

    /// Marks the column nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Parsed value of a [`ColumnKind::Date`] cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWithZone {
    /// The instant, with the offset it was recorded at.
    pub instant: DateTime<FixedOffset>,
    /// IANA zone name, e.g. `Europe/Paris`.
    pub zone: String,
}

impl DateWithZone {
    /// Creates a date value.
    pub fn new(instant: DateTime<FixedOffset>, zone: impl Into<String>) -> Self {
        Self {
            instant,
            zone: zone.into(),
        }
    }

    /// Parses `<RFC 3339>|<zone>`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let (instant, zone) = text
            .split_once('|')
            .ok_or_else(|| "expected `<RFC 3339>|<zone>`".to_string())?;
        let instant = DateTime::parse_from_rfc3339(instant).map_err(|e| e.to_string())?;
        if !is_zone_name(zone) {
            return Err(format!("invalid time zone {zone:?}"));
        }
        Ok(Self::new(instant, zone))
    }
}

impl fmt::Display for DateWithZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.instant.to_rfc3339(), self.zone)
    }
}

impl From<DateWithZone> for Value {
    fn from(date: DateWithZone) -> Self {
        Value::Text(date.to_string())
    }
}

/// Shape check for IANA names (`UTC`, `Area/Location`, `Area/Sub/Location`).
fn is_zone_name(zone: &str) -> bool {
    !zone.is_empty()
        && zone.split('/').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_build_expected_kinds() {
        let col = ColumnDefinition::select("status", ["draft", "published"])
            .nullable()
            .default_value("draft");
        assert_eq!(
            col.kind,
            ColumnKind::Select {
                options: vec!["draft".into(), "published".into()]
            }
        );
        assert!(col.nullable);
        assert_eq!(col.default, Some(Value::from("draft")));
        assert_eq!(ColumnDefinition::id().kind.name(), "id");
    }

    #[test]
    fn date_parses_and_prints() {
        let date = DateWithZone::parse("2024-03-01T09:30:00+01:00|Europe/Paris").unwrap();
        assert_eq!(date.zone, "Europe/Paris");
        assert_eq!(date.to_string(), "2024-03-01T09:30:00+01:00|Europe/Paris");
    }

    #[test]
    fn date_rejects_bad_input() {
        assert!(DateWithZone::parse("2024-03-01T09:30:00Z").is_err());
        assert!(DateWithZone::parse("yesterday|UTC").is_err());
        assert!(DateWithZone::parse("2024-03-01T09:30:00Z|").is_err());
        assert!(DateWithZone::parse("2024-03-01T09:30:00Z|Europe//Paris").is_err());
    }

    #[test]
    fn definition_serializes_with_default() {
        let col = ColumnDefinition::integer("fontSize").default_value(14i64);
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["kind"]["type"], "integer");
        assert_eq!(json["default"], 14);
        let back: ColumnDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, col);
    }
}
