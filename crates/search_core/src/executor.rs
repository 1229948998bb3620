//! Fetch executors: run the query plan against a backend and normalise the response.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{EntityDetail, PageResult},
    error::FetchError,
    protocol::{
        CollectionsPayload, EntityResultsPayload, GraphQlRequest, GraphQlResponse,
        SearchResultsPayload,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    machine::SearchContext,
    query::{build_query, QueryConfig, QueryPlan, COLLECTIONS_DATA_FIELD},
};

#[async_trait]
pub trait FetchExecutor: Send + Sync {
    async fn fetch(&self, context: &SearchContext) -> Result<PageResult, FetchError>;
}

pub struct UnavailableExecutor;

#[async_trait]
impl FetchExecutor for UnavailableExecutor {
    async fn fetch(&self, _context: &SearchContext) -> Result<PageResult, FetchError> {
        Err(FetchError::unavailable("no search backend configured"))
    }
}

pub struct GraphQlExecutor {
    http: Client,
    endpoint: Url,
    config: QueryConfig,
}

impl GraphQlExecutor {
    pub fn new(endpoint: Url, config: QueryConfig, timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, endpoint, config))
    }

    pub fn with_client(http: Client, endpoint: Url, config: QueryConfig) -> Self {
        Self {
            http,
            endpoint,
            config,
        }
    }

    async fn post(&self, request: &GraphQlRequest) -> Result<Value, FetchError> {
        debug!(
            endpoint = %self.endpoint,
            operation = request.operation_name.as_deref().unwrap_or("anonymous"),
            "posting graphql query"
        );
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|err| FetchError::transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::status(status.as_u16()));
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|err| FetchError::decode(err.to_string()))?;
        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|err| err.message).collect();
            return Err(FetchError::graphql(&messages));
        }

        body.data
            .ok_or_else(|| FetchError::decode("response carried neither data nor errors"))
    }
}

#[async_trait]
impl FetchExecutor for GraphQlExecutor {
    async fn fetch(&self, context: &SearchContext) -> Result<PageResult, FetchError> {
        let plan = build_query(&self.config, context);
        debug!(
            operation = plan.operation.name,
            offset = plan.window.offset,
            size = plan.window.size,
            "executing query plan"
        );

        match &plan.companion {
            None => {
                let data = self.post(&plan.request()).await?;
                normalize_search(&plan, data)
            }
            Some(companion) => {
                let primary = plan.request();
                let (data, collections) =
                    futures::try_join!(self.post(&primary), self.post(companion))?;
                normalize_entity(&plan, data, collections)
            }
        }
    }
}

pub fn normalize_search(plan: &QueryPlan, mut data: Value) -> Result<PageResult, FetchError> {
    let payload: SearchResultsPayload = take_field(&mut data, plan.operation.data_field)?;
    Ok(PageResult {
        page: payload.page,
        total_results: payload.total_results,
        entity_detail: None,
    })
}

pub fn normalize_entity(
    plan: &QueryPlan,
    mut data: Value,
    mut collections: Value,
) -> Result<PageResult, FetchError> {
    let mut payload: EntityResultsPayload = take_field(&mut data, plan.operation.data_field)?;
    let entity_key = plan
        .operation
        .entity_key
        .ok_or_else(|| FetchError::decode("entity operation has no entity key"))?;
    let entity_match = payload
        .rest
        .remove(entity_key)
        .filter(|value| !value.is_null())
        .ok_or_else(|| {
            FetchError::decode(format!(
                "response is missing data.{}.{entity_key}",
                plan.operation.data_field
            ))
        })?;

    let curated = match collections.get_mut(COLLECTIONS_DATA_FIELD).map(Value::take) {
        None | Some(Value::Null) => CollectionsPayload::default(),
        Some(raw) => serde_json::from_value(raw).map_err(|err| {
            FetchError::decode(format!("invalid {COLLECTIONS_DATA_FIELD} payload: {err}"))
        })?,
    };

    Ok(PageResult {
        page: payload.results.page,
        total_results: payload.results.total_results,
        entity_detail: Some(EntityDetail {
            entity_match,
            buying_modalities: payload.buying_modalities,
            similar: payload.similar,
            curated_collections: curated.collections,
        }),
    })
}

fn take_field<T: DeserializeOwned>(data: &mut Value, field: &str) -> Result<T, FetchError> {
    let raw = data
        .get_mut(field)
        .map(Value::take)
        .filter(|value| !value.is_null())
        .ok_or_else(|| FetchError::decode(format!("response is missing data.{field}")))?;
    serde_json::from_value(raw)
        .map_err(|err| FetchError::decode(format!("invalid data.{field} payload: {err}")))
}

#[cfg(test)]
#[path = "tests/executor_tests.rs"]
mod tests;
