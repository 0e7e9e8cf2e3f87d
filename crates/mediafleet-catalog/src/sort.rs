//! Typed sort engine.
//!
//! A sort request names a field and a direction. Valid fields depend on each
//! item's extension, so every candidate is checked before any comparison runs.
//! Fields outside the top-level item are read from the metadata bag. Items
//! missing a metadata value sort after those that have one, in both directions.

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CatalogError, CatalogResult};
use crate::model::MediaItem;

static SORT_EXPRESSION: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^(asc|desc)\(([^)]+)\)$"));

const DEFAULT_FIELDS: &[SortField] = &[SortField::Name, SortField::Extension, SortField::NodeId];
const MP3_FIELDS: &[SortField] = &[
    SortField::Name,
    SortField::Extension,
    SortField::NodeId,
    SortField::Album,
    SortField::Title,
    SortField::Artist,
];

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Field a catalog query can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    /// Top-level `name`.
    Name,
    /// Top-level `extension`.
    Extension,
    /// Top-level `nodeId`.
    NodeId,
    /// `metadata.album`
    Album,
    /// `metadata.title`
    Title,
    /// `metadata.artist`
    Artist,
}

enum FieldSource {
    TopLevel(fn(&MediaItem) -> &str),
    Metadata(&'static str),
}

impl SortField {
    /// Wire name of the field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Extension => "extension",
            Self::NodeId => "nodeId",
            Self::Album => "album",
            Self::Title => "title",
            Self::Artist => "artist",
        }
    }

    fn source(self) -> FieldSource {
        match self {
            Self::Name => FieldSource::TopLevel(|item| item.name.as_str()),
            Self::Extension => FieldSource::TopLevel(|item| item.extension.as_str()),
            Self::NodeId => FieldSource::TopLevel(|item| item.node_id.as_str()),
            Self::Album => FieldSource::Metadata("album"),
            Self::Title => FieldSource::Metadata("title"),
            Self::Artist => FieldSource::Metadata("artist"),
        }
    }
}

impl Display for SortField {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MP3_FIELDS
            .iter()
            .copied()
            .find(|field| field.as_str() == value)
            .ok_or_else(|| CatalogError::UnknownSortField {
                value: value.to_string(),
            })
    }
}

/// Fields valid for items with `extension`.
#[must_use]
pub fn allowed_sort_fields(extension: &str) -> &'static [SortField] {
    if extension.eq_ignore_ascii_case("mp3") {
        MP3_FIELDS
    } else {
        DEFAULT_FIELDS
    }
}

/// Requested ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    /// Field compared.
    pub field: SortField,
    /// Direction applied to the field comparison.
    pub direction: SortDirection,
}

impl SortOrder {
    /// Ascending order on `field`.
    #[must_use]
    pub const fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    /// Descending order on `field`.
    #[must_use]
    pub const fn desc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }

    /// Check every item before ordering anything.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnsupportedSortField`] naming the first item
    /// extension that does not support the field.
    pub fn validate<'a>(&self, items: impl IntoIterator<Item = &'a MediaItem>) -> CatalogResult<()> {
        for item in items {
            let allowed = allowed_sort_fields(&item.extension);
            if !allowed.contains(&self.field) {
                return Err(CatalogError::UnsupportedSortField {
                    field: self.field.as_str(),
                    extension: item.extension.clone(),
                    allowed: allowed.iter().map(|field| field.as_str()).collect(),
                });
            }
        }
        Ok(())
    }

    /// Compare two already-validated items.
    #[must_use]
    pub fn compare(&self, left: &MediaItem, right: &MediaItem) -> Ordering {
        let primary = match self.field.source() {
            FieldSource::TopLevel(read) => self.directed(read(left).cmp(read(right))),
            FieldSource::Metadata(key) => {
                match (metadata_value(left, key), metadata_value(right, key)) {
                    (Some(a), Some(b)) => self.directed(a.cmp(&b)),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
        };
        primary.then_with(|| self.tie_break(left, right))
    }

    const fn directed(&self, ordering: Ordering) -> Ordering {
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }

    // Tracks from the same album read naturally by name regardless of direction.
    fn tie_break(&self, left: &MediaItem, right: &MediaItem) -> Ordering {
        let same_kind = left.extension.eq_ignore_ascii_case(&right.extension);
        if same_kind
            && left.extension.eq_ignore_ascii_case("mp3")
            && self.field == SortField::Album
        {
            left.name.cmp(&right.name)
        } else {
            Ordering::Equal
        }
    }
}

impl FromStr for SortOrder {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let malformed = || CatalogError::MalformedSort {
            value: value.to_string(),
        };
        let pattern = (*SORT_EXPRESSION).as_ref().map_err(|_| malformed())?;
        let captures = pattern.captures(value.trim()).ok_or_else(malformed)?;
        let direction = match captures.get(1).map(|m| m.as_str()) {
            Some("asc") => SortDirection::Asc,
            Some("desc") => SortDirection::Desc,
            _ => return Err(malformed()),
        };
        let field = captures
            .get(2)
            .ok_or_else(malformed)?
            .as_str()
            .trim()
            .parse()?;
        Ok(Self { field, direction })
    }
}

/// Typed view of a metadata value used for comparisons.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue<'a> {
    Number(i64),
    Text(&'a str),
}

fn metadata_value<'a>(item: &'a MediaItem, key: &str) -> Option<SortValue<'a>> {
    match item.metadata.get(key)? {
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(SortValue::Text(text)),
        Value::Number(number) => number.as_i64().map(SortValue::Number),
        _ => None,
    }
}

/// Validate, then stably order `items`.
///
/// # Errors
///
/// Returns the validation error without touching `items` when any item does
/// not support the requested field.
pub fn sort_items(items: &mut [MediaItem], order: &SortOrder) -> CatalogResult<()> {
    order.validate(items.iter())?;
    items.sort_by(|left, right| order.compare(left, right));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn track(id: &str, name: &str, album: Option<&str>) -> MediaItem {
        let mut metadata = Map::new();
        if let Some(album) = album {
            metadata.insert("album".into(), json!(album));
        }
        MediaItem {
            id: id.into(),
            node_id: "n1".into(),
            name: name.into(),
            extension: "mp3".into(),
            metadata,
        }
    }

    fn ids(items: &[MediaItem]) -> Vec<&str> {
        items.iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn parses_sort_expressions() -> CatalogResult<()> {
        assert_eq!("asc(name)".parse::<SortOrder>()?, SortOrder::asc(SortField::Name));
        assert_eq!(
            " desc(nodeId) ".parse::<SortOrder>()?,
            SortOrder::desc(SortField::NodeId)
        );
        assert!(matches!(
            "name".parse::<SortOrder>(),
            Err(CatalogError::MalformedSort { .. })
        ));
        assert!(matches!(
            "up(name)".parse::<SortOrder>(),
            Err(CatalogError::MalformedSort { .. })
        ));
        assert!(matches!(
            "asc(size)".parse::<SortOrder>(),
            Err(CatalogError::UnknownSortField { value }) if value == "size"
        ));
        Ok(())
    }

    #[test]
    fn unsupported_field_fails_before_reordering() {
        let mut items = vec![
            track("b", "b", Some("Z")),
            MediaItem {
                extension: "wav".into(),
                ..track("a", "a", Some("A"))
            },
        ];
        let before = items.clone();

        let err = sort_items(&mut items, &SortOrder::asc(SortField::Album)).err();
        assert_eq!(
            err,
            Some(CatalogError::UnsupportedSortField {
                field: "album",
                extension: "wav".into(),
                allowed: vec!["name", "extension", "nodeId"],
            })
        );
        assert_eq!(items, before);
    }

    #[test]
    fn album_ties_break_by_ascending_name_in_both_directions() -> CatalogResult<()> {
        let mut items = vec![
            track("3", "c", Some("A")),
            track("1", "a", Some("B")),
            track("2", "b", Some("A")),
            track("4", "d", Some("B")),
        ];

        sort_items(&mut items, &SortOrder::asc(SortField::Album))?;
        assert_eq!(ids(&items), vec!["2", "3", "1", "4"]);

        sort_items(&mut items, &SortOrder::desc(SortField::Album))?;
        assert_eq!(ids(&items), vec!["1", "4", "2", "3"]);
        Ok(())
    }

    #[test]
    fn missing_metadata_sorts_last() -> CatalogResult<()> {
        let mut items = vec![
            track("none", "x", None),
            track("b", "b", Some("B")),
            track("empty", "y", Some("")),
            track("a", "a", Some("A")),
        ];
        sort_items(&mut items, &SortOrder::desc(SortField::Album))?;
        assert_eq!(ids(&items), vec!["b", "a", "none", "empty"]);
        Ok(())
    }

    #[test]
    fn top_level_fields_work_for_every_extension() -> CatalogResult<()> {
        let mut items = vec![
            MediaItem {
                extension: "wav".into(),
                ..track("w", "w", None)
            },
            track("a", "a", None),
        ];
        sort_items(&mut items, &SortOrder::desc(SortField::Name))?;
        assert_eq!(ids(&items), vec!["w", "a"]);
        Ok(())
    }

    #[test]
    fn numeric_metadata_compares_numerically() {
        let mut left = track("l", "l", None);
        left.metadata.insert("title".into(), json!(9));
        let mut right = track("r", "r", None);
        right.metadata.insert("title".into(), json!(10));
        assert_eq!(
            SortOrder::asc(SortField::Title).compare(&left, &right),
            Ordering::Less
        );
    }
}
