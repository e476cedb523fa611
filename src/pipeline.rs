use anyhow::Context;
use mongodb::Client;
use tracing::info;

use crate::analytics::{AnalyticsClient, ApiRow, DateRange};
use crate::db;
use crate::models::{BrowseRow, CollectionViewRow, DetailViewRow, LearningObjectViews};
use crate::report::join_detail_views;
use crate::resolver::Taxonomies;
use crate::shape;

fn rows_or_empty(rows: Option<Vec<ApiRow>>, report: &str) -> Vec<ApiRow> {
    rows.unwrap_or_else(|| {
        info!(report, "no data returned for rejected request");
        Vec::new()
    })
}

fn browse_rows(
    rows: Option<Vec<ApiRow>>,
    taxonomies: &Taxonomies,
) -> anyhow::Result<Vec<BrowseRow>> {
    let rows = rows_or_empty(rows, "browse");
    let decoded = shape::decode_rows(&rows).context("malformed browse report")?;
    Ok(shape::shape_browse(&decoded, taxonomies))
}

fn detail_rows(rows: Option<Vec<ApiRow>>) -> anyhow::Result<Vec<DetailViewRow>> {
    let rows = rows_or_empty(rows, "details");
    let decoded = shape::decode_rows(&rows).context("malformed detail report")?;
    Ok(shape::shape_detail(&decoded))
}

fn collection_rows(rows: Option<Vec<ApiRow>>) -> anyhow::Result<Vec<CollectionViewRow>> {
    let rows = rows_or_empty(rows, "collections");
    let decoded = shape::decode_rows(&rows).context("malformed collection report")?;
    Ok(shape::shape_collection(&decoded))
}

pub async fn browse_report(
    analytics: &AnalyticsClient,
    taxonomies: &Taxonomies,
    range: DateRange,
) -> anyhow::Result<Vec<BrowseRow>> {
    browse_rows(analytics.fetch_browse_events(range).await?, taxonomies)
}

pub async fn detail_report(
    mongo: &Client,
    analytics: &AnalyticsClient,
    taxonomies: &Taxonomies,
    range: DateRange,
) -> anyhow::Result<Vec<LearningObjectViews>> {
    let paths = db::released_learning_object_paths(mongo)
        .await
        .context("failed to read released learning objects")?;
    info!(paths = paths.len(), "built detail page filter");

    let views = detail_rows(analytics.fetch_detail_views(range, &paths).await?)?;
    // nothing to join, so the catalog is not read
    if views.is_empty() {
        return Ok(Vec::new());
    }

    let catalog = db::learning_objects(mongo, taxonomies)
        .await
        .context("failed to read learning objects")?;
    let joined = join_detail_views(&views, &catalog);
    info!(
        viewed = views.len(),
        joined = joined.len(),
        "joined detail views with catalog"
    );
    Ok(joined)
}

pub async fn collection_report(
    mongo: &Client,
    analytics: &AnalyticsClient,
    range: DateRange,
) -> anyhow::Result<Vec<CollectionViewRow>> {
    let short_names = db::collection_short_names(mongo)
        .await
        .context("failed to read collections")?;
    collection_rows(analytics.fetch_collection_views(range, &short_names).await?)
}
