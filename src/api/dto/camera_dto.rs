//! Camera and stream DTOs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::service::stream::QualityTier;

/// Response body for `GET /cameras/streams`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StreamListResponse {
    /// Number of active stream sessions.
    pub active_streams: usize,
    /// Session id → camera id.
    pub streams: BTreeMap<String, String>,
}

/// Query parameters for `GET /cameras/{id}/snapshot`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SnapshotParams {
    /// `low`, `medium` or `high`. Unknown values mean `medium`.
    #[serde(default)]
    pub quality: Option<String>,
}

impl SnapshotParams {
    /// Normalized quality tier.
    #[must_use]
    pub fn tier(&self) -> QualityTier {
        self.quality
            .as_deref()
            .and_then(QualityTier::parse)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_quality_defaults_to_medium() {
        assert_eq!(SnapshotParams::default().tier(), QualityTier::Medium);
        let params = SnapshotParams {
            quality: Some("HIGH".to_string()),
        };
        assert_eq!(params.tier(), QualityTier::High);
        let params = SnapshotParams {
            quality: Some("best".to_string()),
        };
        assert_eq!(params.tier(), QualityTier::Medium);
    }
}
