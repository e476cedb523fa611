use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::convert;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Author {
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Contributor {
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub organization: Option<String>,
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub email: Option<String>,
}

/// A catalog record as stored in `objects-index`, before topic and tag ids are resolved.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningObjectRecord {
    #[serde(default, deserialize_with = "convert::lenient_required_string")]
    pub cuid: String,
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "convert::null_as_default")]
    pub author: Author,
    #[serde(default, deserialize_with = "convert::null_as_default")]
    pub contributors: Vec<Contributor>,
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub object_collection: Option<String>,
    #[serde(default, deserialize_with = "convert::lenient_i32")]
    pub version: Option<i32>,
    #[serde(default, deserialize_with = "convert::lenient_string")]
    pub length: Option<String>,
    #[serde(default, deserialize_with = "convert::lenient_string_list")]
    pub topics: Vec<String>,
    #[serde(default, deserialize_with = "convert::lenient_string_list")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearningObject {
    pub cuid: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub date: Option<String>,
    pub author: Author,
    pub contributors: Vec<Contributor>,
    pub collection: Option<String>,
    pub version: Option<i32>,
    pub length: Option<String>,
    pub topics: Vec<String>,
    pub tags: Vec<String>,
}

impl LearningObject {
    pub fn release_date(&self) -> Option<NaiveDate> {
        self.date.as_deref().and_then(convert::parse_iso8601_date)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub timestamp: Option<String>,
    pub cuid: Option<String>,
    pub downloaded_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub lo_id: Option<String>,
    pub collection: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub value: Option<String>,
    pub comment: Option<String>,
    pub date: Option<String>,
    pub user: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub name: Option<String>,
    pub email: Option<String>,
    pub organization: Option<String>,
    pub access_groups: Vec<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub organization: Option<String>,
    pub access: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Organization {
    pub name: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub name: Option<String>,
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: Option<String>,
    pub status: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub organizations: Vec<String>,
    pub category: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

/// A report row after positional decoding: the first dimension and first metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageViewRow {
    pub dimension: String,
    pub views: u64,
}

/// Outcome of mapping a taxonomy query parameter to display names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedColumn {
    Resolved(Vec<String>),
    /// Left as raw values because at least one could not be decoded.
    Unconverted { values: Vec<String>, reason: String },
}

impl ResolvedColumn {
    pub fn values(&self) -> &[String] {
        match self {
            ResolvedColumn::Resolved(values) => values,
            ResolvedColumn::Unconverted { values, .. } => values,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowseRow {
    pub url: String,
    pub visits: u64,
    /// Every query parameter except `topics` and `tags`; `text` and `currPage`
    /// hold at most one value once exploded.
    pub params: BTreeMap<String, Vec<String>>,
    pub topics: Option<ResolvedColumn>,
    pub tags: Option<ResolvedColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailViewRow {
    pub lo_cuid: String,
    pub views: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionViewRow {
    pub collection: String,
    pub views: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearningObjectViews {
    pub lo_cuid: String,
    pub views: u64,
    pub object: LearningObject,
}
