//! Health aggregation over the registry's per-provider booleans.

use crate::model::{Provider, RequestContext};
use crate::registry::ProviderRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every enabled adapter is healthy.
    Healthy,
    /// Some enabled adapters are healthy, some are not.
    Degraded,
    /// No enabled adapter is healthy.
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        })
    }
}

/// Overall status plus the per-provider map it was lifted from.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub providers: HashMap<Provider, bool>,
}

/// Lift a per-provider boolean map to an overall status. An empty map
/// (no enabled adapters) is unhealthy.
pub fn aggregate(providers: &HashMap<Provider, bool>) -> HealthStatus {
    let healthy = providers.values().filter(|&&up| up).count();
    if providers.is_empty() || healthy == 0 {
        HealthStatus::Unhealthy
    } else if healthy == providers.len() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

/// Thin orchestration over the registry; the registry knows nothing
/// about it.
pub struct HealthService {
    registry: Arc<ProviderRegistry>,
}

impl HealthService {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Never fails; aggregation always yields a status.
    pub async fn report(&self, ctx: &RequestContext) -> HealthReport {
        let providers = self.registry.health_check_all(ctx).await;
        HealthReport {
            status: aggregate(&providers),
            providers,
        }
    }
}
