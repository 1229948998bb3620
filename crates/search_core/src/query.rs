//! Query builder: turns the machine context into GraphQL documents and variables.

use serde_json::{json, Value};
use shared::{
    domain::{ActiveFilter, EntityId, EntityKind, Filter, GeoPoint, SearchScope},
    protocol::{
        AggSize, EntityIdentifier, EntityQuery, EntityQueryArgs, GraphQlRequest, PageWindow,
        SearchQuery,
    },
};

use crate::machine::{SearchContext, SearchType};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const BEVERAGE_PAGE_SIZE: u32 = 10;
pub const COLLECTIONS_DATA_FIELD: &str = "getCollectionsForEntity";

const SEARCH_DOCUMENT: &str = "query Search($searchQuery: SearchQueryInput!) {
  search(searchQuery: $searchQuery) {
    totalResults
    page { entityUuid name }
    aggregations { field buckets { key count } }
  }
}";

const COLLECTIONS_DOCUMENT: &str = "query CollectionsForEntity($identifier: EntityIdentifierInput!) {
  getCollectionsForEntity(identifier: $identifier) {
    collections { entityUuid name }
  }
}";

macro_rules! entity_document {
    ($op:literal, $var:literal, $field:literal, $key:literal) => {
        concat!(
            "query ", $op, "($", $var, ": EntityQueryInput!) {\n",
            "  ", $field, "(", $var, ": $", $var, ") {\n",
            "    ", $key, " { entityUuid name }\n",
            "    buyingModalities\n",
            "    results { totalResults page { entityUuid name } }\n",
            "    similar { entityUuid name }\n",
            "  }\n",
            "}"
        )
    };
}

/// Static description of one backend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub document: &'static str,
    pub data_field: &'static str,
    pub variables_name: &'static str,
    pub entity_key: Option<&'static str>,
}

pub const SEARCH_OPERATION: Operation = Operation {
    name: "Search",
    document: SEARCH_DOCUMENT,
    data_field: "search",
    variables_name: "searchQuery",
    entity_key: None,
};

pub fn entity_operation(kind: EntityKind) -> Operation {
    match kind {
        EntityKind::Beverage => Operation {
            name: "BeverageDetail",
            document: entity_document!("BeverageDetail", "beverageQuery", "getBeverage", "beverage"),
            data_field: "getBeverage",
            variables_name: "beverageQuery",
            entity_key: Some("beverage"),
        },
        EntityKind::Producer => Operation {
            name: "ProducerDetail",
            document: entity_document!("ProducerDetail", "producerQuery", "getProducer", "producer"),
            data_field: "getProducer",
            variables_name: "producerQuery",
            entity_key: Some("producer"),
        },
        EntityKind::Region => Operation {
            name: "RegionDetail",
            document: entity_document!("RegionDetail", "regionQuery", "getRegion", "region"),
            data_field: "getRegion",
            variables_name: "regionQuery",
            entity_key: Some("region"),
        },
        EntityKind::Varietal => Operation {
            name: "VarietalDetail",
            document: entity_document!("VarietalDetail", "varietalQuery", "getVarietal", "varietal"),
            data_field: "getVarietal",
            variables_name: "varietalQuery",
            entity_key: Some("varietal"),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    pub page_size: u32,
    pub beverage_page_size: u32,
    pub agg_sizes: Vec<AggSize>,
    pub default_filters: Vec<Filter>,
    pub geo_point: Option<GeoPoint>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            beverage_page_size: BEVERAGE_PAGE_SIZE,
            agg_sizes: default_agg_sizes(),
            default_filters: Vec::new(),
            geo_point: None,
        }
    }
}

pub fn default_agg_sizes() -> Vec<AggSize> {
    [("varietal", 25), ("region", 25), ("producer", 25), ("price", 10)]
        .into_iter()
        .map(|(field, size)| AggSize {
            field: field.to_string(),
            size,
        })
        .collect()
}

/// Everything needed to execute one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub operation: Operation,
    pub window: PageWindow,
    pub variables: Value,
    /// Issued alongside entity queries to pick up curated collections.
    pub companion: Option<GraphQlRequest>,
}

impl QueryPlan {
    pub fn request(&self) -> GraphQlRequest {
        GraphQlRequest {
            query: self.operation.document.to_string(),
            operation_name: Some(self.operation.name.to_string()),
            variables: self.variables.clone(),
        }
    }
}

pub fn page_size(config: &QueryConfig, scope: &SearchScope) -> u32 {
    let size = match scope.kind() {
        Some(EntityKind::Beverage) => config.beverage_page_size,
        _ => config.page_size,
    };
    size.max(1)
}

/// REPLACE reloads pages `0..=page` in one request; APPEND fetches just `page`.
pub fn page_window(config: &QueryConfig, context: &SearchContext) -> PageWindow {
    let size = page_size(config, &context.scope);
    match context.search_type {
        SearchType::Replace => PageWindow {
            offset: 0,
            size: context.page.saturating_add(1).saturating_mul(size),
        },
        SearchType::Append => PageWindow {
            offset: context.page.saturating_mul(size),
            size,
        },
    }
}

/// Groups `(field, value)` toggles by field in first-seen order, dropping repeats.
pub fn group_filters(active: &[ActiveFilter]) -> Vec<Filter> {
    let mut grouped: Vec<Filter> = Vec::new();
    for filter in active {
        match grouped.iter_mut().find(|group| group.field == filter.field) {
            Some(group) => {
                if !group.values.contains(&filter.value) {
                    group.values.push(filter.value.clone());
                }
            }
            None => grouped.push(Filter {
                field: filter.field.clone(),
                values: vec![filter.value.clone()],
            }),
        }
    }
    grouped
}

pub fn resolve_filters(config: &QueryConfig, active: &[ActiveFilter]) -> Vec<Filter> {
    let mut filters = group_filters(active);
    filters.extend(config.default_filters.iter().cloned());
    filters
}

pub fn build_query(config: &QueryConfig, context: &SearchContext) -> QueryPlan {
    let window = page_window(config, context);
    let filters = resolve_filters(config, &context.active_filters);

    match &context.scope {
        SearchScope::FreeText => {
            let search_query = SearchQuery {
                search: context.search_term.clone(),
                agg_sizes: config.agg_sizes.clone(),
                filters,
                page: window,
                sort: context.sort.clone(),
                geo_point: config.geo_point,
            };
            QueryPlan {
                operation: SEARCH_OPERATION,
                window,
                variables: json!({ SEARCH_OPERATION.variables_name: search_query }),
                companion: None,
            }
        }
        SearchScope::Entity { kind, id } => {
            let operation = entity_operation(*kind);
            let args = EntityQueryArgs {
                identifier: identifier(id),
                query: EntityQuery {
                    filters,
                    page: window,
                    sort: context.sort.clone(),
                    geo_point: config.geo_point,
                },
            };
            QueryPlan {
                operation,
                window,
                variables: json!({ operation.variables_name: args }),
                companion: Some(collections_request(id)),
            }
        }
    }
}

pub fn collections_request(id: &EntityId) -> GraphQlRequest {
    GraphQlRequest {
        query: COLLECTIONS_DOCUMENT.to_string(),
        operation_name: Some("CollectionsForEntity".to_string()),
        variables: json!({ "identifier": identifier(id) }),
    }
}

fn identifier(id: &EntityId) -> EntityIdentifier {
    EntityIdentifier {
        entity_uuid: id.clone(),
    }
}

#[cfg(test)]
#[path = "tests/query_tests.rs"]
mod tests;
