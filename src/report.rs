use std::collections::HashMap;
use std::io::Write;

use crate::models::{
    BrowseRow, CardUser, Collection, CollectionViewRow, Contributor, DetailViewRow, Download,
    LearningObject, LearningObjectViews, Organization, Rating, Resource, Submission, User,
};
use crate::shape::{browse_cell, browse_columns};

/// Inner join on `lo_cuid == cuid`. View rows with no catalog entry are dropped;
/// a cuid with several catalog records yields one row per record.
pub fn join_detail_views(
    views: &[DetailViewRow],
    catalog: &[LearningObject],
) -> Vec<LearningObjectViews> {
    let mut by_cuid: HashMap<&str, Vec<&LearningObject>> = HashMap::new();
    for object in catalog {
        by_cuid.entry(object.cuid.as_str()).or_default().push(object);
    }

    views
        .iter()
        .flat_map(|view| {
            by_cuid
                .get(view.lo_cuid.as_str())
                .into_iter()
                .flatten()
                .map(move |object| LearningObjectViews {
                    lo_cuid: view.lo_cuid.clone(),
                    views: view.views,
                    object: (*object).clone(),
                })
        })
        .collect()
}

pub trait Table {
    fn headers() -> Vec<&'static str>;
    fn record(&self) -> Vec<String>;
}

pub fn write_table<T: Table, W: Write>(writer: W, rows: &[T]) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(T::headers())?;
    for row in rows {
        csv.write_record(row.record())?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_browse_table<W: Write>(writer: W, rows: &[BrowseRow]) -> anyhow::Result<()> {
    let columns = browse_columns(rows);
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(&columns)?;
    for row in rows {
        csv.write_record(columns.iter().map(|column| browse_cell(row, column)))?;
    }
    csv.flush()?;
    Ok(())
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn list(values: &[String]) -> String {
    values.join("; ")
}

fn contributors(contributors: &[Contributor]) -> String {
    contributors
        .iter()
        .map(|c| match (&c.name, &c.organization) {
            (Some(name), Some(org)) if !org.is_empty() => format!("{name} ({org})"),
            (Some(name), _) => name.clone(),
            (None, _) => c.email.clone().unwrap_or_default(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

const LEARNING_OBJECT_COLUMNS: [&str; 13] = [
    "id",
    "name",
    "status",
    "date",
    "author_username",
    "author_email",
    "author_name",
    "contributors",
    "collection",
    "version",
    "length",
    "topics",
    "tags",
];

fn learning_object_cells(object: &LearningObject) -> Vec<String> {
    vec![
        text(&object.id),
        text(&object.name),
        text(&object.status),
        object
            .release_date()
            .map(|date| date.to_string())
            .unwrap_or_else(|| text(&object.date)),
        text(&object.author.username),
        text(&object.author.email),
        text(&object.author.name),
        contributors(&object.contributors),
        text(&object.collection),
        object.version.map(|v| v.to_string()).unwrap_or_default(),
        text(&object.length),
        list(&object.topics),
        list(&object.tags),
    ]
}

impl Table for LearningObject {
    fn headers() -> Vec<&'static str> {
        std::iter::once("cuid")
            .chain(LEARNING_OBJECT_COLUMNS)
            .collect()
    }

    fn record(&self) -> Vec<String> {
        let mut cells = vec![self.cuid.clone()];
        cells.extend(learning_object_cells(self));
        cells
    }
}

impl Table for LearningObjectViews {
    fn headers() -> Vec<&'static str> {
        ["lo_cuid", "views"]
            .into_iter()
            .chain(LEARNING_OBJECT_COLUMNS)
            .collect()
    }

    fn record(&self) -> Vec<String> {
        let mut cells = vec![self.lo_cuid.clone(), self.views.to_string()];
        cells.extend(learning_object_cells(&self.object));
        cells
    }
}

impl Table for CollectionViewRow {
    fn headers() -> Vec<&'static str> {
        vec!["collection", "views"]
    }

    fn record(&self) -> Vec<String> {
        vec![self.collection.clone(), self.views.to_string()]
    }
}

impl Table for Download {
    fn headers() -> Vec<&'static str> {
        vec!["Timestamp", "cuid", "downloadedBy"]
    }

    fn record(&self) -> Vec<String> {
        vec![text(&self.timestamp), text(&self.cuid), text(&self.downloaded_by)]
    }
}

impl Table for Submission {
    fn headers() -> Vec<&'static str> {
        vec!["lo_id", "collection", "timestamp"]
    }

    fn record(&self) -> Vec<String> {
        vec![text(&self.lo_id), text(&self.collection), text(&self.timestamp)]
    }
}

impl Table for Rating {
    fn headers() -> Vec<&'static str> {
        vec!["value", "comment", "date", "user", "source"]
    }

    fn record(&self) -> Vec<String> {
        vec![
            text(&self.value),
            text(&self.comment),
            text(&self.date),
            text(&self.user),
            text(&self.source),
        ]
    }
}

impl Table for User {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Email", "Org", "accessGroups", "createdAt"]
    }

    fn record(&self) -> Vec<String> {
        vec![
            text(&self.name),
            text(&self.email),
            text(&self.organization),
            list(&self.access_groups),
            text(&self.created_at),
        ]
    }
}

impl Table for CardUser {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Email", "Organization", "Access", "createdAt"]
    }

    fn record(&self) -> Vec<String> {
        vec![
            text(&self.name),
            text(&self.email),
            text(&self.organization),
            list(&self.access),
            self.created_at.map(|dt| dt.to_rfc3339()).unwrap_or_default(),
        ]
    }
}

impl Table for Organization {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Type"]
    }

    fn record(&self) -> Vec<String> {
        vec![text(&self.name), text(&self.kind)]
    }
}

impl Table for Collection {
    fn headers() -> Vec<&'static str> {
        vec!["name", "abvName"]
    }

    fn record(&self) -> Vec<String> {
        vec![text(&self.name), text(&self.short_name)]
    }
}

impl Table for Resource {
    fn headers() -> Vec<&'static str> {
        vec![
            "Name",
            "Status",
            "URL",
            "Notes",
            "Organizations",
            "Category",
            "Created",
        ]
    }

    fn record(&self) -> Vec<String> {
        vec![
            text(&self.name),
            text(&self.status),
            text(&self.url),
            text(&self.notes),
            list(&self.organizations),
            text(&self.category),
            self.created.map(|dt| dt.to_rfc3339()).unwrap_or_default(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Author, PageViewRow};
    use crate::resolver::sample_taxonomies;
    use crate::shape::shape_browse;

    fn object(cuid: &str, version: i32) -> LearningObject {
        LearningObject {
            cuid: cuid.to_string(),
            id: None,
            name: Some(format!("Object {cuid}")),
            status: Some("released".to_string()),
            date: None,
            author: Author {
                username: Some("alice".to_string()),
                ..Author::default()
            },
            contributors: vec![Contributor {
                name: Some("Bob".to_string()),
                organization: Some("Towson".to_string()),
                email: None,
            }],
            collection: Some("nccp".to_string()),
            version: Some(version),
            length: Some("nanomodule".to_string()),
            topics: vec!["No Topic".to_string()],
            tags: Vec::new(),
        }
    }

    fn views(cuid: &str, views: u64) -> DetailViewRow {
        DetailViewRow {
            lo_cuid: cuid.to_string(),
            views,
        }
    }

    #[test]
    fn unmatched_views_are_dropped() {
        let joined = join_detail_views(
            &[views("ABC123", 6), views("ZZZ999", 4)],
            &[object("ABC123", 1), object("DEF456", 1)],
        );
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].lo_cuid, "ABC123");
        assert_eq!(joined[0].views, 6);
        assert_eq!(joined[0].object.name.as_deref(), Some("Object ABC123"));
    }

    #[test]
    fn every_catalog_version_joins() {
        let joined = join_detail_views(
            &[views("ABC123", 6)],
            &[object("ABC123", 1), object("ABC123", 2)],
        );
        let versions: Vec<_> = joined.iter().map(|row| row.object.version).collect();
        assert_eq!(versions, vec![Some(1), Some(2)]);
    }

    #[test]
    fn joined_rows_render_as_csv() {
        let joined = join_detail_views(&[views("ABC123", 6)], &[object("ABC123", 2)]);
        let mut out = Vec::new();
        write_table(&mut out, &joined).unwrap();
        let csv = String::from_utf8(out).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("lo_cuid,views,id,name,status,date,author_username,author_email,author_name,contributors,collection,version,length,topics,tags")
        );
        assert_eq!(
            lines.next(),
            Some("ABC123,6,,Object ABC123,released,,alice,,,Bob (Towson),nccp,2,nanomodule,No Topic,")
        );
    }

    #[test]
    fn empty_table_still_has_headers() {
        let mut out = Vec::new();
        write_table::<CollectionViewRow, _>(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "collection,views\n");
    }

    #[test]
    fn browse_table_uses_dynamic_columns() {
        let rows = shape_browse(
            &[
                PageViewRow {
                    dimension: "/browse?text=foo&currPage=1".to_string(),
                    views: 5,
                },
                PageViewRow {
                    dimension: "/browse?orderBy=date".to_string(),
                    views: 2,
                },
            ],
            &sample_taxonomies(),
        );
        let mut out = Vec::new();
        write_browse_table(&mut out, &rows).unwrap();
        let csv = String::from_utf8(out).unwrap();
        assert_eq!(
            csv,
            "url,visits,currPage,orderBy,text\n\
             /browse?text=foo&currPage=1,5,1,,foo\n\
             /browse?orderBy=date,2,,date,\n"
        );
    }
}
