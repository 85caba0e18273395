use std::collections::BTreeSet;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::api::error_response;
use crate::metrics::{MetricsSnapshot, Tool};
use crate::models::{
    CompareRequest, CompareResponse, DependenciesRequest, DependenciesResponse, ReleaseSummary,
    SearchFilters, Section,
};
use crate::rag;
use crate::search::lexical;
use crate::state::AppState;

/// Top sections reported per release in a comparison.
const SECTIONS_PER_RELEASE: usize = 3;

const TOOLS: &[&str] = &[
    "search",
    "answer",
    "suggest_update",
    "apply_update",
    "compare_releases",
    "service_dependencies",
    "refresh",
];

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub tools: Vec<String>,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub status: String,
    pub reindexed: bool,
}

async fn load_sections(state: &AppState) -> Result<Vec<Section>, (StatusCode, String)> {
    let state = state.clone();
    let index = tokio::task::spawn_blocking(move || state.doc_index(&state.config.docs_root))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Index task failed: {e}"),
            )
        })?
        .map_err(error_response)?;
    Ok(index.sections.clone())
}

/// POST /api/releases/compare - per-release section summaries for a feature.
pub async fn compare_releases(
    State(state): State<AppState>,
    Json(req): Json<CompareRequest>,
) -> Result<Json<CompareResponse>, (StatusCode, String)> {
    let start = Instant::now();
    if req.feature.trim().is_empty() {
        state
            .metrics
            .record(Tool::CompareReleases, start.elapsed(), false);
        return Err((StatusCode::BAD_REQUEST, "Feature is required".to_string()));
    }

    let sections = load_sections(&state).await?;

    let releases: Vec<String> = match &req.releases {
        Some(releases) => releases.clone(),
        None => {
            let mut all: Vec<String> = sections
                .iter()
                .map(|s| s.release.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            all.sort_by_key(|r| release_number(r));
            all
        }
    };

    let summaries = releases
        .into_iter()
        .map(|release| {
            let filters = SearchFilters {
                release: Some(release.clone()),
                ..SearchFilters::default()
            };
            let hits =
                lexical::score_sections(&sections, &req.feature, &filters, SECTIONS_PER_RELEASE);
            ReleaseSummary {
                release,
                sections: hits,
            }
        })
        .collect();

    state
        .metrics
        .record(Tool::CompareReleases, start.elapsed(), true);
    Ok(Json(CompareResponse {
        feature: req.feature,
        releases: summaries,
    }))
}

fn release_number(release: &str) -> u64 {
    release
        .strip_prefix('R')
        .and_then(|d| d.parse().ok())
        .unwrap_or(u64::MAX)
}

/// POST /api/services/dependencies - inbound/outbound services for one
/// service in one release, from the SERVICE_CONTRACTS sections.
pub async fn service_dependencies(
    State(state): State<AppState>,
    Json(req): Json<DependenciesRequest>,
) -> Result<Json<DependenciesResponse>, (StatusCode, String)> {
    let start = Instant::now();
    if req.service.trim().is_empty() {
        state
            .metrics
            .record(Tool::ServiceDependencies, start.elapsed(), false);
        return Err((StatusCode::BAD_REQUEST, "Service is required".to_string()));
    }

    let sections = load_sections(&state).await?;
    let service_lower = req.service.to_lowercase();

    let release_sections: Vec<&Section> = sections
        .iter()
        .filter(|s| s.release == req.release)
        .collect();

    // Service names come from SERVICE_CONTRACTS headings.
    let known_services: Vec<&str> = release_sections
        .iter()
        .filter(|s| s.doc_type == "SERVICE_CONTRACTS")
        .map(|s| s.heading.as_str())
        .collect();

    let mut outbound = BTreeSet::new();
    let mut inbound = BTreeSet::new();
    for section in &release_sections {
        let heading_lower = section.heading.to_lowercase();
        let content_lower = section.content.to_lowercase();

        if heading_lower.contains(&service_lower) {
            // This service's own sections: everything they mention is a
            // dependency of ours.
            for other in &known_services {
                let other_lower = other.to_lowercase();
                if other_lower != heading_lower
                    && !other_lower.contains(&service_lower)
                    && content_lower.contains(&other_lower)
                {
                    outbound.insert(other.to_string());
                }
            }
        } else if content_lower.contains(&service_lower) {
            // Another service's section mentioning us: inbound.
            if known_services
                .iter()
                .any(|k| k.to_lowercase() == heading_lower)
            {
                inbound.insert(section.heading.clone());
            }
        }
    }

    let data_flow = req.include_data_flow.then(|| {
        release_sections
            .iter()
            .flat_map(|s| s.content.lines())
            .filter(|line| {
                (line.contains("->") || line.contains('→'))
                    && line.to_lowercase().contains(&service_lower)
            })
            .map(|line| line.trim().to_string())
            .collect::<Vec<_>>()
    });

    state
        .metrics
        .record(Tool::ServiceDependencies, start.elapsed(), true);
    Ok(Json(DependenciesResponse {
        service: req.service,
        release: req.release,
        inbound: inbound.into_iter().collect(),
        outbound: outbound.into_iter().collect(),
        data_flow,
    }))
}

/// POST /api/refresh - invalidate caches and re-index in the background.
pub async fn refresh(State(state): State<AppState>) -> Json<RefreshResponse> {
    let start = Instant::now();
    let root = state.config.docs_root.clone();
    state.invalidate_root(&root);

    // Vector re-indexing happens off the request path.
    let background = state.clone();
    tokio::spawn(async move {
        if let Err(e) = rag::index_corpus(&background, &background.config.docs_root).await {
            tracing::error!("Background re-index failed: {e}");
        }
    });

    state.metrics.record(Tool::Refresh, start.elapsed(), true);
    Json(RefreshResponse {
        status: "ok".into(),
        reindexed: true,
    })
}

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        tools: TOOLS.iter().map(|t| t.to_string()).collect(),
        uptime_secs: state.metrics.uptime_secs(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
