use serde::Serialize;

use crate::stage::registry::StageReadiness;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub models: StageReadiness,
    pub timestamp: String,
}

impl HealthResponse {
    pub fn from_readiness(readiness: StageReadiness, timestamp: String) -> Self {
        let status = if readiness.all_loaded() { "healthy" } else { "degraded" };

        HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            models: readiness,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::registry::StageRegistry;

    #[test]
    fn test_degraded_until_warm() {
        let registry = StageRegistry::new(0.30);
        let health = HealthResponse::from_readiness(registry.readiness(), "t".to_string());
        assert_eq!(health.status, "degraded");

        registry.warm_up();
        let health = HealthResponse::from_readiness(registry.readiness(), "t".to_string());
        assert_eq!(health.status, "healthy");
    }
}
