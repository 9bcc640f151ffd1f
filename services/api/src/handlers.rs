//! REST v1 handlers: thin wrappers over the store and the build service.

use actix_web::{web, HttpResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use domain::status::BuildStatus;
use domain::DomainError;
use shared::ApiError;
use store::query::{BuildFilter, Pagination, Sort, SortDirection, SortField};

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "lifecycle-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ListBuildsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort: Option<String>,
    pub direction: Option<String>,
    /// Comma-separated status filter.
    pub status: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub search: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ListBuildsResponse {
    pub builds: Vec<domain::entities::Build>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

pub async fn list_builds(
    state: web::Data<AppState>,
    query: web::Query<ListBuildsQuery>,
) -> Result<HttpResponse, ApiError> {
    let pagination = Pagination::clamped(query.page, query.limit);

    let sort = Sort {
        field: query
            .sort
            .as_deref()
            .map(|s| SortField::parse(s).ok_or_else(|| ApiError::bad_request("unknown sort field")))
            .transpose()?
            .unwrap_or(SortField::CreatedAt),
        direction: query
            .direction
            .as_deref()
            .map(|d| {
                SortDirection::parse(d).ok_or_else(|| ApiError::bad_request("unknown direction"))
            })
            .transpose()?
            .unwrap_or(SortDirection::Desc),
    };

    let mut filter = BuildFilter {
        repository_full_name: query.repository.clone(),
        branch_name: query.branch.clone(),
        search: query.search.clone(),
        created_after: query.created_after,
        created_before: query.created_before,
        ..Default::default()
    };
    if let Some(statuses) = &query.status {
        for status in statuses.split(',').filter(|s| !s.is_empty()) {
            let parsed: BuildStatus = status
                .parse()
                .map_err(|_| ApiError::bad_request(format!("unknown status: {status}")))?;
            filter.statuses.push(parsed);
        }
    }

    let (builds, total) = store::builds::search(&state.db_pool, &filter, &pagination, &sort)
        .await
        .map_err(ApiError::from)?;

    Ok(HttpResponse::Ok().json(ListBuildsResponse {
        builds,
        total,
        page: pagination.page,
        limit: pagination.limit,
    }))
}

pub async fn get_build(
    state: web::Data<AppState>,
    uuid: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let build = store::builds::find_by_uuid(&state.db_pool, &uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Build not found"))?;
    Ok(HttpResponse::Ok().json(build))
}

/// Stored dependency graph; computed and persisted on first read.
pub async fn get_build_graph(
    state: web::Data<AppState>,
    uuid: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let graph = store::builds::load(&state.db_pool, &uuid, "pullRequest.repository")
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Build not found"))?;

    if let Some(stored) = &graph.build.dependency_graph {
        return Ok(HttpResponse::Ok().json(&stored.0));
    }

    let (Some(pull_request), Some(repository)) = (&graph.pull_request, &graph.repository) else {
        return Err(ApiError::not_found("Build has no repository"));
    };
    let sha = graph
        .build
        .sha
        .clone()
        .or_else(|| pull_request.latest_commit.clone())
        .ok_or_else(|| ApiError::not_found("Build has no commit"))?;

    let yaml = state
        .forge
        .get_yaml_file_content(repository, &sha)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("No lifecycle config at ref"))?;
    let global = state.config.get().await.map_err(ApiError::from)?;
    let resolved = resolver::resolve(&yaml, &global, None).map_err(ApiError::from)?;

    let graph_json = serde_json::json!({
        "nodes": resolved.graph.nodes(),
        "edges": resolved.graph.edges(),
        "dot": resolved.graph.to_dot(),
    });
    let mut patch = domain::entities::BuildPatch::default();
    patch.dependency_graph = Some(graph_json.clone());
    store::builds::patch(&state.db_pool, graph.build.id, patch)
        .await
        .map_err(ApiError::from)?;

    Ok(HttpResponse::Ok().json(graph_json))
}

#[derive(Debug, Serialize)]
pub struct BuildServicesResponse {
    pub deploys: Vec<domain::entities::Deploy>,
    pub deployables: Vec<domain::entities::Deployable>,
}

pub async fn get_build_services(
    state: web::Data<AppState>,
    uuid: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let graph = store::builds::load(&state.db_pool, &uuid, "deploys.deployable")
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Build not found"))?;
    Ok(HttpResponse::Ok().json(BuildServicesResponse {
        deploys: graph.deploys,
        deployables: graph.deployables,
    }))
}

pub async fn get_build_summary(
    state: web::Data<AppState>,
    uuid: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let build = store::builds::find_by_uuid(&state.db_pool, &uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Build not found"))?;
    let rows = store::summary::deploy_summary(&state.db_pool, build.id)
        .await
        .map_err(ApiError::from)?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn deploy_build(
    state: web::Data<AppState>,
    uuid: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    match state.service.enqueue_redeploy(&uuid).await {
        Ok(()) => {
            info!(build = %uuid.as_str(), "redeploy requested");
            Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "success" })))
        }
        Err(DomainError::NotFound { .. }) => Err(ApiError::not_found("Build not found")),
        Err(e) => Err(ApiError::from(e)),
    }
}

/// Tear down a non-static build. The build must exist (404 otherwise), and
/// static environments refuse this path.
pub async fn teardown_build(
    state: web::Data<AppState>,
    uuid: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let build = store::builds::find_by_uuid(&state.db_pool, &uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Build not found"))?;
    if build.is_static {
        return Err(ApiError::not_found("Static builds cannot be torn down here"));
    }

    state.service.enqueue_teardown(&uuid).await.map_err(ApiError::from)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "success" })))
}

/// Force-run webhooks for the build's current state; 204 when none match.
pub async fn invoke_webhooks(
    state: web::Data<AppState>,
    uuid: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let build = store::builds::find_by_uuid(&state.db_pool, &uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Build not found"))?;

    let count = state
        .service
        .enqueue_webhooks_for(&build, build.status)
        .await
        .map_err(ApiError::from)?;
    if count == 0 {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Ok(HttpResponse::Ok().json(serde_json::json!({ "enqueued": count })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "source")]
pub enum ValidateSchemaRequest {
    #[serde(rename = "content")]
    Content { content: String },
    #[serde(rename = "path")]
    Path { repo: String, branch: String },
}

#[derive(Debug, Serialize)]
pub struct ValidateSchemaResponse {
    pub valid: bool,
    pub error: Option<Vec<String>>,
}

pub async fn validate_schema(
    state: web::Data<AppState>,
    request: web::Json<ValidateSchemaRequest>,
) -> Result<HttpResponse, ApiError> {
    let yaml = match request.into_inner() {
        ValidateSchemaRequest::Content { content } => {
            let bytes = BASE64
                .decode(content.trim())
                .map_err(|e| ApiError::bad_request(format!("content is not base64: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|e| ApiError::bad_request(format!("content is not utf-8: {e}")))?
        }
        ValidateSchemaRequest::Path { repo, branch } => {
            let repository = store::repositories::find_by_full_name(&state.db_pool, &repo)
                .await
                .map_err(ApiError::from)?
                .ok_or_else(|| ApiError::not_found("Repository not found"))?;
            let git_ref = state
                .forge
                .get_ref_for_branch(&repository, &branch)
                .await
                .map_err(ApiError::from)?;
            state
                .forge
                .get_yaml_file_content(&repository, &git_ref.object.sha)
                .await
                .map_err(ApiError::from)?
                .ok_or_else(|| ApiError::not_found("No lifecycle config at ref"))?
        }
    };

    match resolver::schema::parse(&yaml) {
        Ok(_) => Ok(HttpResponse::Ok().json(ValidateSchemaResponse {
            valid: true,
            error: None,
        })),
        Err(e) => Ok(HttpResponse::Ok().json(ValidateSchemaResponse {
            valid: false,
            error: Some(vec![e.to_string()]),
        })),
    }
}

pub async fn get_config_cache(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let config = state.config.get().await.map_err(ApiError::from)?;
    Ok(HttpResponse::Ok().json(config))
}

pub async fn refresh_config_cache(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let config = state.config.refresh().await.map_err(ApiError::from)?;
    Ok(HttpResponse::Ok().json(config))
}
