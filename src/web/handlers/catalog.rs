use axum::response::Response;
use serde::Serialize;
use strum::IntoEnumIterator;

use crate::catalog::{
    CATALOG_VERSION, METER_CATALOG, MetricCategory, MetricDescriptor, StateClass, SystemMetric,
};
use crate::web::responses::ok;

#[derive(Debug, Serialize)]
pub struct SystemDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub category: MetricCategory,
    pub state_class: Option<StateClass>,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub version: u32,
    pub meter: &'static [MetricDescriptor],
    pub system: Vec<SystemDescriptor>,
}

/// Static metric metadata for presentation layers
pub async fn metric_catalog() -> Response {
    ok(CatalogResponse {
        version: CATALOG_VERSION,
        meter: METER_CATALOG,
        system: SystemMetric::iter()
            .map(|metric| SystemDescriptor {
                key: metric.into(),
                name: metric.name(),
                unit: metric.unit(),
                category: metric.category(),
                state_class: metric.state_class(),
            })
            .collect(),
    })
}
