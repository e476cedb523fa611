//! Google Analytics 4 Data API client for the three page-view reports.
//!
//! Requests are validated locally before they are sent. A request that is
//! structurally invalid, either locally or according to the API, is logged and
//! yields `Ok(None)` instead of an error, so report callers can carry on with
//! an empty table.

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::config::{AnalyticsConfig, Credentials, ServiceAccount};
use crate::error::AnalyticsError;

pub const DEFAULT_START_DATE: (i32, u32, u32) = (2015, 8, 14);
pub const BROWSE_ROW_LIMIT: u64 = 200_000;

const PAGE_PATH: &str = "pagePath";
const PAGE_PATH_PLUS_QUERY: &str = "pagePathPlusQueryString";
const PAGE_VIEWS: &str = "screenPageViews";
const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/analytics.readonly";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Metric {
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl DateRange {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
        }
    }
}

/// First day of data collected for the property.
pub fn default_start_date() -> NaiveDate {
    let (year, month, day) = DEFAULT_START_DATE;
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Contains,
    FullRegexp,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StringFilter {
    pub match_type: MatchType,
    pub value: String,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub field_name: String,
    pub string_filter: StringFilter,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FilterExpressionList {
    pub expressions: Vec<FilterExpression>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FilterExpression {
    AndGroup(FilterExpressionList),
    OrGroup(FilterExpressionList),
    NotExpression(Box<FilterExpression>),
    Filter(Filter),
}

impl FilterExpression {
    pub fn string(field: &str, match_type: MatchType, value: impl Into<String>) -> Self {
        FilterExpression::Filter(Filter {
            field_name: field.to_string(),
            string_filter: StringFilter {
                match_type,
                value: value.into(),
                case_sensitive: true,
            },
        })
    }

    pub fn contains(field: &str, value: impl Into<String>) -> Self {
        Self::string(field, MatchType::Contains, value)
    }

    pub fn and(expressions: Vec<FilterExpression>) -> Self {
        FilterExpression::AndGroup(FilterExpressionList { expressions })
    }

    pub fn or(expressions: Vec<FilterExpression>) -> Self {
        FilterExpression::OrGroup(FilterExpressionList { expressions })
    }

    pub fn not(expression: FilterExpression) -> Self {
        FilterExpression::NotExpression(Box::new(expression))
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            FilterExpression::AndGroup(list) | FilterExpression::OrGroup(list) => {
                if list.expressions.is_empty() {
                    return Err("filter group has no expressions".to_string());
                }
                list.expressions.iter().try_for_each(FilterExpression::validate)
            }
            FilterExpression::NotExpression(inner) => inner.validate(),
            FilterExpression::Filter(filter) => {
                if filter.field_name.is_empty() {
                    Err("filter has no field name".to_string())
                } else if filter.string_filter.value.is_empty() {
                    Err(format!("filter on {} has an empty value", filter.field_name))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunReportRequest {
    pub dimensions: Vec<Dimension>,
    pub metrics: Vec<Metric>,
    pub date_ranges: Vec<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension_filter: Option<FilterExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl RunReportRequest {
    pub fn page_views(dimension: &str, range: DateRange) -> Self {
        Self {
            dimensions: vec![Dimension {
                name: dimension.to_string(),
            }],
            metrics: vec![Metric {
                name: PAGE_VIEWS.to_string(),
            }],
            date_ranges: vec![range],
            dimension_filter: None,
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterExpression) -> Self {
        self.dimension_filter = Some(filter);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Checks the request the same way the API would reject it as `INVALID_ARGUMENT`.
    pub fn validate(&self) -> Result<(), String> {
        if self.dimensions.iter().any(|d| d.name.is_empty()) || self.dimensions.is_empty() {
            return Err("request needs at least one named dimension".to_string());
        }
        if self.metrics.iter().any(|m| m.name.is_empty()) || self.metrics.is_empty() {
            return Err("request needs at least one named metric".to_string());
        }
        if self.date_ranges.is_empty() {
            return Err("request needs a date range".to_string());
        }
        if let Some(range) = self.date_ranges.iter().find(|r| r.start_date > r.end_date) {
            return Err(format!(
                "start date {} is after end date {}",
                range.start_date, range.end_date
            ));
        }
        if self.limit == Some(0) {
            return Err("limit must be positive".to_string());
        }
        match &self.dimension_filter {
            Some(filter) => filter.validate(),
            None => Ok(()),
        }
    }
}

/// Browse and search pages, minus local development traffic, double-encoded
/// ampersands and page-translation parameters.
pub fn browse_request(range: DateRange) -> RunReportRequest {
    RunReportRequest::page_views(PAGE_PATH_PLUS_QUERY, range)
        .with_filter(FilterExpression::and(vec![
            FilterExpression::contains(PAGE_PATH_PLUS_QUERY, "browse"),
            FilterExpression::not(FilterExpression::contains(PAGE_PATH_PLUS_QUERY, "localhost")),
            FilterExpression::not(FilterExpression::contains(PAGE_PATH_PLUS_QUERY, "amp;")),
            FilterExpression::not(FilterExpression::contains(PAGE_PATH_PLUS_QUERY, "_x_")),
        ]))
        .with_limit(BROWSE_ROW_LIMIT)
}

/// One term per detail page; the filter grows with the released catalog.
pub fn detail_request(range: DateRange, paths: &[String]) -> RunReportRequest {
    RunReportRequest::page_views(PAGE_PATH, range).with_filter(FilterExpression::or(
        paths
            .iter()
            .map(|path| FilterExpression::contains(PAGE_PATH, path.as_str()))
            .collect(),
    ))
}

pub fn collection_request(range: DateRange, short_names: &[String]) -> RunReportRequest {
    RunReportRequest::page_views(PAGE_PATH, range).with_filter(FilterExpression::string(
        PAGE_PATH,
        MatchType::FullRegexp,
        collection_pattern(short_names),
    ))
}

/// `/collections/(a|b|c)/?`, or an empty string when there are no collections.
pub fn collection_pattern(short_names: &[String]) -> String {
    if short_names.is_empty() {
        return String::new();
    }
    let alternation = short_names
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    format!("/collections/({alternation})/?")
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ApiValue {
    #[serde(default)]
    pub value: String,
}

/// One wire row. Values are positional and line up with the request's
/// dimensions and metrics.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiRow {
    #[serde(default)]
    pub dimension_values: Vec<ApiValue>,
    #[serde(default)]
    pub metric_values: Vec<ApiValue>,
}

#[cfg(test)]
impl ApiRow {
    pub fn new(dimension: &str, metric: &str) -> Self {
        Self {
            dimension_values: vec![ApiValue {
                value: dimension.to_string(),
            }],
            metric_values: vec![ApiValue {
                value: metric.to_string(),
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunReportResponse {
    #[serde(default)]
    rows: Option<Vec<ApiRow>>,
    #[serde(default)]
    row_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct AnalyticsClient {
    http: Client,
    config: AnalyticsConfig,
}

impl AnalyticsClient {
    pub fn new(config: AnalyticsConfig) -> Result<Self, AnalyticsError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    async fn access_token(&self) -> Result<String, AnalyticsError> {
        match &self.config.credentials {
            Credentials::AccessToken(token) => Ok(token.clone()),
            Credentials::ServiceAccount(account) => self.exchange_assertion(account).await,
        }
    }

    async fn exchange_assertion(&self, account: &ServiceAccount) -> Result<String, AnalyticsError> {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            iss: &account.client_email,
            scope: READONLY_SCOPE,
            aud: &account.token_uri,
            exp: now + 3600,
            iat: now,
        };
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];
        let response = self
            .http
            .post(&account.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyticsError::Auth(format!("{status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        debug!(client_email = %account.client_email, "obtained analytics access token");
        Ok(token.access_token)
    }

    fn report_url(&self) -> String {
        format!(
            "{}/v1beta/properties/{}:runReport",
            self.config.api_base.trim_end_matches('/'),
            self.config.property_id
        )
    }

    /// Runs one report. `Ok(None)` means the request was rejected as invalid;
    /// `Ok(Some(rows))` may be empty when nothing matched.
    #[instrument(skip(self, request))]
    pub async fn run_report(
        &self,
        report: &str,
        request: &RunReportRequest,
    ) -> Result<Option<Vec<ApiRow>>, AnalyticsError> {
        if let Err(reason) = request.validate() {
            error!(%reason, "invalid report request, returning no data");
            return Ok(None);
        }

        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.report_url())
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorBody>(&body).ok().map(|b| b.error);

            if status == StatusCode::BAD_REQUEST
                && detail.as_ref().map_or(true, |d| d.status == "INVALID_ARGUMENT")
            {
                let message = detail.map(|d| d.message).unwrap_or(body);
                error!(%message, "analytics API rejected report request, returning no data");
                return Ok(None);
            }

            return Err(AnalyticsError::Api {
                status: status.as_u16(),
                message: detail.map(|d| d.message).unwrap_or(body),
            });
        }

        let parsed: RunReportResponse = response.json().await?;
        let rows = parsed.rows.unwrap_or_default();
        info!(
            rows = rows.len(),
            row_count = parsed.row_count.unwrap_or_default(),
            "report fetched"
        );
        Ok(Some(rows))
    }

    pub async fn fetch_browse_events(
        &self,
        range: DateRange,
    ) -> Result<Option<Vec<ApiRow>>, AnalyticsError> {
        self.run_report("browse", &browse_request(range)).await
    }

    pub async fn fetch_detail_views(
        &self,
        range: DateRange,
        paths: &[String],
    ) -> Result<Option<Vec<ApiRow>>, AnalyticsError> {
        self.run_report("details", &detail_request(range, paths)).await
    }

    pub async fn fetch_collection_views(
        &self,
        range: DateRange,
        short_names: &[String],
    ) -> Result<Option<Vec<ApiRow>>, AnalyticsError> {
        self.run_report("collections", &collection_request(range, short_names))
            .await
    }
}
