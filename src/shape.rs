use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};
use url::form_urlencoded;

use crate::analytics::ApiRow;
use crate::error::ShapeError;
use crate::models::{BrowseRow, CollectionViewRow, DetailViewRow, PageViewRow, ResolvedColumn};
use crate::resolver::{TaxonomyKind, Taxonomies};

const TOPICS: &str = "topics";
const TAGS: &str = "tags";
const EXPLODED_PARAMS: [&str; 2] = ["text", "currPage"];

/// Every report asks for exactly one dimension and one metric, so the first of
/// each is all a row carries.
pub fn decode_rows(rows: &[ApiRow]) -> Result<Vec<PageViewRow>, ShapeError> {
    rows.iter()
        .enumerate()
        .map(|(row, raw)| {
            let dimension = raw
                .dimension_values
                .first()
                .ok_or(ShapeError::MissingDimension { row })?;
            let metric = raw
                .metric_values
                .first()
                .ok_or(ShapeError::MissingMetric { row })?;
            let views = metric
                .value
                .trim()
                .parse::<u64>()
                .map_err(|_| ShapeError::InvalidMetric {
                    row,
                    value: metric.value.clone(),
                })?;
            Ok(PageViewRow {
                dimension: dimension.value.clone(),
                views,
            })
        })
        .collect()
}

/// Query parameters in `parse_qs` style: repeated keys collect, blank values are dropped.
pub fn parse_query(url: &str) -> BTreeMap<String, Vec<String>> {
    let query = url
        .split_once('?')
        .map(|(_, query)| query)
        .unwrap_or_default();
    let query = query.split('#').next().unwrap_or_default();

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

fn is_noise(url: &str, params: &BTreeMap<String, Vec<String>>) -> bool {
    url.contains("amp;") || params.keys().any(|key| key.starts_with("_x_"))
}

/// Any readable id resolves, unknown ones to the `Unknown <Kind> (<id>)` sentinel.
/// A value whose percent-encoding was not UTF-8 no longer holds the id that was
/// sent, so the column keeps its raw values.
fn resolve_column<F>(values: Vec<String>, kind: TaxonomyKind, map: F) -> ResolvedColumn
where
    F: Fn(&[String]) -> Vec<String>,
{
    match values.iter().find(|value| value.contains(char::REPLACEMENT_CHARACTER)) {
        None => ResolvedColumn::Resolved(map(&values)),
        Some(bad) => {
            let reason = format!("{bad:?} is not a decodable {kind} identifier");
            warn!(%reason, "leaving {} column unconverted", kind);
            ResolvedColumn::Unconverted { values, reason }
        }
    }
}

/// Splits a row into one row per value of `key`; rows without the key pass through.
fn explode(rows: Vec<BrowseRow>, key: &str) -> Vec<BrowseRow> {
    rows.into_iter()
        .flat_map(|row| {
            let values = row
                .params
                .get(key)
                .filter(|values| values.len() > 1)
                .cloned();
            match values {
                Some(values) => values
                    .into_iter()
                    .map(|value| {
                        let mut single = row.clone();
                        single.params.insert(key.to_string(), vec![value]);
                        single
                    })
                    .collect::<Vec<_>>(),
                None => vec![row],
            }
        })
        .collect()
}

pub fn shape_browse(rows: &[PageViewRow], taxonomies: &Taxonomies) -> Vec<BrowseRow> {
    let mut shaped = Vec::new();

    for row in rows {
        if !row.dimension.contains('?') {
            continue;
        }
        let mut params = parse_query(&row.dimension);
        if is_noise(&row.dimension, &params) {
            debug!(url = %row.dimension, "dropping noisy browse url");
            continue;
        }

        let topics = params.remove(TOPICS).map(|values| {
            resolve_column(values, TaxonomyKind::Topic, |ids| taxonomies.map_topics(ids))
        });
        let tags = params
            .remove(TAGS)
            .map(|values| resolve_column(values, TaxonomyKind::Tag, |ids| taxonomies.map_tags(ids)));

        shaped.push(BrowseRow {
            url: row.dimension.clone(),
            visits: row.views,
            params,
            topics,
            tags,
        });
    }

    EXPLODED_PARAMS
        .iter()
        .fold(shaped, |rows, key| explode(rows, key))
}

/// `url`, `visits`, then every query parameter seen in any row, sorted.
pub fn browse_columns(rows: &[BrowseRow]) -> Vec<String> {
    let mut keys: BTreeSet<&str> = BTreeSet::new();
    for row in rows {
        keys.extend(row.params.keys().map(String::as_str));
        if row.topics.is_some() {
            keys.insert(TOPICS);
        }
        if row.tags.is_some() {
            keys.insert(TAGS);
        }
    }

    ["url", "visits"]
        .into_iter()
        .chain(keys)
        .map(str::to_string)
        .collect()
}

pub fn browse_cell(row: &BrowseRow, column: &str) -> String {
    match column {
        "url" => row.url.clone(),
        "visits" => row.visits.to_string(),
        TOPICS => row
            .topics
            .as_ref()
            .map(|column| column.values().join("; "))
            .unwrap_or_default(),
        TAGS => row
            .tags
            .as_ref()
            .map(|column| column.values().join("; "))
            .unwrap_or_default(),
        key => row
            .params
            .get(key)
            .map(|values| values.join("; "))
            .unwrap_or_default(),
    }
}

/// The learning object id is the fourth `/`-separated segment of
/// `/details/<author>/<cuid>`; anything after it is ignored.
pub fn detail_cuid(path: &str) -> Option<&str> {
    path.split('/').nth(3).filter(|segment| !segment.is_empty())
}

pub fn shape_detail(rows: &[PageViewRow]) -> Vec<DetailViewRow> {
    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();

    for row in rows {
        if row.dimension.contains("/unauthorized") {
            continue;
        }
        match detail_cuid(&row.dimension) {
            Some(cuid) => *totals.entry(cuid).or_insert(0) += row.views,
            None => debug!(path = %row.dimension, "detail path has no object id"),
        }
    }

    totals
        .into_iter()
        .map(|(lo_cuid, views)| DetailViewRow {
            lo_cuid: lo_cuid.to_string(),
            views,
        })
        .collect()
}

pub fn shape_collection(rows: &[PageViewRow]) -> Vec<CollectionViewRow> {
    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();

    for row in rows {
        let name = row
            .dimension
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        if name.is_empty() {
            debug!(path = %row.dimension, "collection path has no short name");
            continue;
        }
        *totals.entry(name).or_insert(0) += row.views;
    }

    totals
        .into_iter()
        .map(|(collection, views)| CollectionViewRow {
            collection: collection.to_string(),
            views,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::sample_taxonomies;

    fn page(dimension: &str, views: u64) -> PageViewRow {
        PageViewRow {
            dimension: dimension.to_string(),
            views,
        }
    }

    #[test]
    fn decode_takes_first_dimension_and_metric() {
        let rows = decode_rows(&[ApiRow::new("/browse?text=a", "7")]).unwrap();
        assert_eq!(rows, vec![page("/browse?text=a", 7)]);
    }

    #[test]
    fn decode_rejects_missing_or_bad_values() {
        let no_metric = ApiRow {
            metric_values: Vec::new(),
            ..ApiRow::new("/x", "1")
        };
        assert_eq!(
            decode_rows(&[no_metric]),
            Err(ShapeError::MissingMetric { row: 0 })
        );
        assert_eq!(
            decode_rows(&[ApiRow::new("/x", "1"), ApiRow::new("/y", "-3")]),
            Err(ShapeError::InvalidMetric {
                row: 1,
                value: "-3".to_string()
            })
        );
        assert_eq!(
            decode_rows(&[ApiRow::default()]),
            Err(ShapeError::MissingDimension { row: 0 })
        );
    }

    #[test]
    fn browse_url_splits_into_columns() {
        let rows = shape_browse(
            &[page("/browse?text=foo&currPage=1", 5)],
            &sample_taxonomies(),
        );
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.url, "/browse?text=foo&currPage=1");
        assert_eq!(row.visits, 5);
        assert_eq!(browse_cell(row, "text"), "foo");
        assert_eq!(browse_cell(row, "currPage"), "1");
        assert_eq!(
            browse_columns(&rows),
            vec!["url", "visits", "currPage", "text"]
        );
    }

    #[test]
    fn urls_without_query_are_dropped() {
        let rows = shape_browse(&[page("/browse", 9)], &sample_taxonomies());
        assert!(rows.is_empty());
    }

    #[test]
    fn noisy_urls_are_dropped() {
        let rows = shape_browse(
            &[
                page("/browse?text=foo&amp;currPage=2", 3),
                page("/browse?text=foo&_x_tr_sl=auto&_x_tr_tl=es", 4),
                page("/browse?text=kept", 1),
            ],
            &sample_taxonomies(),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(browse_cell(&rows[0], "text"), "kept");
    }

    #[test]
    fn repeated_text_and_page_explode() {
        let rows = shape_browse(
            &[page("/browse?text=a&text=b&currPage=1&currPage=2", 2)],
            &sample_taxonomies(),
        );
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|row| row.visits == 2));
        let pairs: Vec<(String, String)> = rows
            .iter()
            .map(|row| (browse_cell(row, "text"), browse_cell(row, "currPage")))
            .collect();
        assert!(pairs.contains(&("a".to_string(), "1".to_string())));
        assert!(pairs.contains(&("b".to_string(), "2".to_string())));
    }

    #[test]
    fn query_parsing_decodes_and_skips_blanks() {
        let params = parse_query("/browse?text=cyber+security&level=&orderBy=date%20desc#top");
        assert_eq!(params["text"], vec!["cyber security"]);
        assert_eq!(params["orderBy"], vec!["date desc"]);
        assert!(!params.contains_key("level"));
    }

    #[test]
    fn taxonomy_params_resolve_to_names() {
        let rows = shape_browse(
            &[page(
                "/browse?topics=5f0c9b1e2a3b4c5d6e7f8091&tags=60a1b2c3d4e5f60718293a4b&tags=60a1b2c3d4e5f60718293a4c",
                1,
            )],
            &sample_taxonomies(),
        );
        assert_eq!(
            rows[0].topics,
            Some(ResolvedColumn::Resolved(vec!["Cryptography".to_string()]))
        );
        assert_eq!(
            rows[0].tags,
            Some(ResolvedColumn::Resolved(vec![
                "Lab".to_string(),
                "Unknown Tag (60a1b2c3d4e5f60718293a4c)".to_string()
            ]))
        );
        assert_eq!(browse_cell(&rows[0], "tags"), "Lab; Unknown Tag (60a1b2c3d4e5f60718293a4c)");
    }

    #[test]
    fn non_hex_taxonomy_values_still_resolve_to_sentinel() {
        let rows = shape_browse(
            &[page("/browse?topics=networking&tags=lab&text=x", 1)],
            &sample_taxonomies(),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].topics,
            Some(ResolvedColumn::Resolved(vec![
                "Unknown Topic (networking)".to_string()
            ]))
        );
        assert_eq!(
            rows[0].tags,
            Some(ResolvedColumn::Resolved(vec!["Unknown Tag (lab)".to_string()]))
        );
        assert_eq!(browse_cell(&rows[0], "text"), "x");
    }

    #[test]
    fn undecodable_taxonomy_value_stays_unconverted() {
        let rows = shape_browse(
            &[page("/browse?topics=%FF%FE&text=x", 1)],
            &sample_taxonomies(),
        );
        assert_eq!(rows.len(), 1);
        match &rows[0].topics {
            Some(ResolvedColumn::Unconverted { values, .. }) => {
                assert_eq!(values.len(), 1);
                assert!(values[0].contains(char::REPLACEMENT_CHARACTER));
            }
            other => panic!("expected unconverted topics, got {other:?}"),
        }
        assert_eq!(browse_cell(&rows[0], "text"), "x");
    }

    #[test]
    fn detail_views_sum_across_versions() {
        let rows = shape_detail(&[
            page("/details/alice/ABC123", 3),
            page("/details/alice/ABC123/2", 3),
            page("/details/bob/XYZ789", 1),
        ]);
        assert_eq!(
            rows,
            vec![
                DetailViewRow {
                    lo_cuid: "ABC123".to_string(),
                    views: 6
                },
                DetailViewRow {
                    lo_cuid: "XYZ789".to_string(),
                    views: 1
                },
            ]
        );
    }

    #[test]
    fn suffix_inside_segment_is_a_different_id() {
        let rows = shape_detail(&[
            page("/details/alice/ABC123", 3),
            page("/details/alice/ABC123-v2", 3),
        ]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn unauthorized_and_short_paths_are_excluded() {
        let rows = shape_detail(&[
            page("/details/alice/ABC123/unauthorized", 50),
            page("/unauthorized", 8),
            page("/details", 2),
        ]);
        assert!(rows.is_empty());
    }

    #[test]
    fn collection_takes_last_segment() {
        let rows = shape_collection(&[page("/collections/compsci", 10)]);
        assert_eq!(
            rows,
            vec![CollectionViewRow {
                collection: "compsci".to_string(),
                views: 10
            }]
        );
    }

    #[test]
    fn collection_trailing_slash_merges() {
        let rows = shape_collection(&[
            page("/collections/nccp", 4),
            page("/collections/nccp/", 1),
        ]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].views, 5);
    }
}
