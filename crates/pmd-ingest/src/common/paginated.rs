//! Generic adapter over paginated REST endpoints
//!
//! An [`ApiEndpoint`] describes one listing endpoint: where it lives, how a
//! fetch unit maps to query parameters, and how a response page decodes
//! into records. [`PaginatedApiAdapter`] adds the transport (timeout,
//! retry policy, status classification) and turns pages into positions.
//!
//! Position rules:
//!
//! - **Chained**: a page fetched with cursor `c` that reveals cursor `n`
//!   reaches `page(n)` and queues `n` next. A page without a next cursor
//!   reaches `page(c, end)`.
//! - **Offsets**: a full page at offset `o` reaches `page(o + limit)`. A
//!   short page reaches `page(o, end)` so a refresh re-reads it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::http::{check_status, read_json};
use crate::error::SourceError;
use crate::framework::record::ShardRecord;
use crate::framework::retry::RetryPolicy;
use crate::framework::source::SourceAdapter;
use crate::framework::types::{FetchOutcome, FetchUnit, Plan, Position, Schedule};

/// One decoded response page
#[derive(Debug, Clone)]
pub struct ApiPage<R> {
    pub records: Vec<R>,
    /// Items present in the page but skipped as malformed
    pub malformed: usize,
    /// Cursor for the next page; `None` or empty ends the listing
    pub next_cursor: Option<String>,
}

impl<R> ApiPage<R> {
    /// Items the upstream returned, decoded or not
    pub fn item_count(&self) -> usize {
        self.records.len() + self.malformed
    }
}

/// Decode page items one by one, skipping the ones that do not convert
pub fn decode_items<T, R, F>(
    endpoint: &str,
    items: Vec<Value>,
    next_cursor: Option<String>,
    convert: F,
) -> ApiPage<R>
where
    T: DeserializeOwned,
    F: Fn(T) -> Result<R, String>,
{
    let mut page = ApiPage {
        records: Vec::with_capacity(items.len()),
        malformed: 0,
        next_cursor,
    };

    for (index, item) in items.into_iter().enumerate() {
        let decoded = serde_json::from_value::<T>(item)
            .map_err(|e| e.to_string())
            .and_then(&convert);
        match decoded {
            Ok(record) => page.records.push(record),
            Err(reason) => {
                page.malformed += 1;
                warn!(endpoint, index, reason = %reason, "Skipping malformed item");
            }
        }
    }
    page
}

/// A single paginated listing endpoint
pub trait ApiEndpoint: Send + Sync + 'static {
    type Record: ShardRecord;

    fn name(&self) -> &str;

    /// `Chained` for cursor endpoints, `Offsets` for offset endpoints
    fn schedule(&self) -> Schedule;

    fn page_limit(&self) -> u32;

    /// Absolute URL of the listing
    fn url(&self) -> String;

    /// Query parameters for one unit
    fn query(&self, unit: &FetchUnit) -> Vec<(String, String)>;

    /// Decode a page; bad items are counted, a bad envelope is an error
    fn parse_page(&self, body: Value) -> Result<ApiPage<Self::Record>, SourceError>;
}

/// Source adapter for any [`ApiEndpoint`]
pub struct PaginatedApiAdapter<E: ApiEndpoint> {
    endpoint: E,
    client: reqwest::Client,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<E: ApiEndpoint> PaginatedApiAdapter<E> {
    pub fn new(endpoint: E, client: reqwest::Client, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            endpoint,
            client,
            retry,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Cut retry backoffs short when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// One request, no retries
    async fn request(&self, unit: &FetchUnit) -> Result<ApiPage<E::Record>, SourceError> {
        let response = self
            .client
            .get(self.endpoint.url())
            .query(&self.endpoint.query(unit))
            .timeout(self.timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body = read_json(response).await?;
        self.endpoint.parse_page(body)
    }

    fn outcome(
        &self,
        unit: &FetchUnit,
        page: ApiPage<E::Record>,
    ) -> Result<FetchOutcome<E::Record>, SourceError> {
        let ApiPage {
            records,
            malformed,
            next_cursor,
        } = page;

        match (self.endpoint.schedule(), unit) {
            (Schedule::Chained, FetchUnit::Page { cursor }) => {
                let next = next_cursor.filter(|c| !c.is_empty() && Some(c) != cursor.as_ref());
                match next {
                    Some(next) => Ok(FetchOutcome {
                        records,
                        malformed,
                        position: Position::Page {
                            cursor: Some(next.clone()),
                            exhausted: false,
                        },
                        end_of_stream: false,
                        follow_on: Some(FetchUnit::Page { cursor: Some(next) }),
                    }),
                    None => Ok(FetchOutcome {
                        records,
                        malformed,
                        position: Position::Page {
                            cursor: cursor.clone(),
                            exhausted: true,
                        },
                        end_of_stream: true,
                        follow_on: None,
                    }),
                }
            }
            (Schedule::Offsets, FetchUnit::Offset { offset, limit }) => {
                let short = records.len() + malformed < *limit as usize;
                let (cursor, exhausted) = if short {
                    (*offset, true)
                } else {
                    (offset + u64::from(*limit), false)
                };
                Ok(FetchOutcome {
                    records,
                    malformed,
                    position: Position::Page {
                        cursor: Some(cursor.to_string()),
                        exhausted,
                    },
                    end_of_stream: short,
                    follow_on: None,
                })
            }
            (schedule, unit) => Err(SourceError::Malformed(format!(
                "{} cannot fetch {} with a {:?} schedule",
                self.endpoint.name(),
                unit,
                schedule
            ))),
        }
    }
}

#[async_trait]
impl<E: ApiEndpoint> SourceAdapter for PaginatedApiAdapter<E> {
    type Record = E::Record;

    fn name(&self) -> &str {
        self.endpoint.name()
    }

    fn schedule(&self) -> Schedule {
        self.endpoint.schedule()
    }

    fn start_position(&self) -> Position {
        Position::start_of_pages()
    }

    async fn plan(&self, from: &Position) -> Result<Plan, SourceError> {
        let Position::Page { cursor, .. } = from else {
            return Err(SourceError::Malformed(format!(
                "{} cannot resume from {}",
                self.endpoint.name(),
                from
            )));
        };

        match self.endpoint.schedule() {
            Schedule::Offsets => {
                let start = match cursor {
                    Some(c) => c.parse::<u64>().map_err(|_| {
                        SourceError::Malformed(format!("offset checkpoint '{}' is not a number", c))
                    })?,
                    None => 0,
                };
                Ok(Plan::Offsets {
                    start,
                    limit: self.endpoint.page_limit(),
                })
            }
            _ => Ok(Plan::Chained(FetchUnit::Page {
                cursor: cursor.clone(),
            })),
        }
    }

    async fn fetch(&self, unit: &FetchUnit) -> Result<FetchOutcome<Self::Record>, SourceError> {
        let op = format!("{} {}", self.endpoint.name(), unit);
        let page = self.retry.run(&op, &self.cancel, || self.request(unit)).await?;
        debug!(
            endpoint = self.endpoint.name(),
            unit = %unit,
            records = page.records.len(),
            malformed = page.malformed,
            "Fetched page"
        );
        self.outcome(unit, page)
    }
}
