use sqlx::types::Json;
use uuid::Uuid;

use domain::entities::{Build, BuildPatch, Deploy, Deployable, Environment, PullRequest, Repository};
use domain::{DomainError, Result};

use crate::query::{BuildFilter, Pagination, Sort};
use crate::{map_db_err, BindValue, PatchBuilder, PgPool};

pub async fn create(
    pool: &PgPool,
    uuid: &str,
    pull_request_id: Uuid,
    environment_id: Option<Uuid>,
    namespace: &str,
    is_static: bool,
    enable_full_yaml: bool,
) -> Result<Build> {
    sqlx::query_as::<_, Build>(
        r#"
        INSERT INTO builds (uuid, pull_request_id, environment_id, namespace, is_static, enable_full_yaml)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(uuid)
    .bind(pull_request_id)
    .bind(environment_id)
    .bind(namespace)
    .bind(is_static)
    .bind(enable_full_yaml)
    .fetch_one(pool)
    .await
    .map_err(map_db_err)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Build>> {
    sqlx::query_as::<_, Build>("SELECT * FROM builds WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)
}

pub async fn find_by_uuid(pool: &PgPool, uuid: &str) -> Result<Option<Build>> {
    sqlx::query_as::<_, Build>("SELECT * FROM builds WHERE uuid = $1")
        .bind(uuid)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Build> {
    find_by_id(pool, id)
        .await?
        .ok_or_else(|| DomainError::not_found("build", id))
}

pub async fn get_by_uuid(pool: &PgPool, uuid: &str) -> Result<Build> {
    find_by_uuid(pool, uuid)
        .await?
        .ok_or_else(|| DomainError::not_found("build", uuid))
}

/// Latest build for a pull request, if any.
pub async fn find_latest_for_pull_request(
    pool: &PgPool,
    pull_request_id: Uuid,
) -> Result<Option<Build>> {
    sqlx::query_as::<_, Build>(
        "SELECT * FROM builds WHERE pull_request_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(pull_request_id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_err)
}

pub async fn reload(pool: &PgPool, build: &Build) -> Result<Build> {
    get_by_id(pool, build.id).await
}

/// Atomic partial update; only populated patch fields are written.
pub async fn patch(pool: &PgPool, id: Uuid, patch: BuildPatch) -> Result<Build> {
    let mut builder = PatchBuilder::new(2);

    if let Some(status) = patch.status {
        builder.set("status", BindValue::Text(Some(status.as_str().to_string())));
    }
    if let Some(message) = patch.status_message {
        builder.set("status_message", BindValue::Text(message));
    }
    if let Some(sha) = patch.sha {
        builder.set("sha", BindValue::Text(Some(sha)));
    }
    if let Some(webhooks_yaml) = patch.webhooks_yaml {
        builder.set("webhooks_yaml", BindValue::Text(webhooks_yaml));
    }
    if let Some(graph) = patch.dependency_graph {
        builder.set("dependency_graph", BindValue::Jsonb(graph));
    }
    if let Some(links) = patch.dashboard_links {
        builder.set_json("dashboard_links", &links);
    }
    if let Some(manifest) = patch.manifest {
        builder.set("manifest", BindValue::Text(manifest));
    }
    if let Some(run_uuid) = patch.run_uuid {
        builder.set("run_uuid", BindValue::Uuid(run_uuid));
    }
    if let Some(env) = patch.comment_runtime_env {
        builder.set_json("comment_runtime_env", &env);
    }
    if let Some(features) = patch.enabled_features {
        builder.set_json("enabled_features", &features);
    }
    if let Some(environment_id) = patch.environment_id {
        builder.set("environment_id", BindValue::Uuid(environment_id));
    }
    if let Some(is_static) = patch.is_static {
        builder.set("is_static", BindValue::Bool(is_static));
    }

    if builder.is_empty() {
        return get_by_id(pool, id).await;
    }

    let sql = format!("UPDATE builds SET {} WHERE id = $1", builder.clause());
    let query = builder.bind_all(sqlx::query(&sql).bind(id));
    let result = query.execute(pool).await.map_err(map_db_err)?;
    if result.rows_affected() == 0 {
        return Err(DomainError::not_found("build", id));
    }
    get_by_id(pool, id).await
}

/// Guarded status transition: applies only when the stored status admits
/// the move, returning the refreshed row. An inadmissible move is an error
/// carrying both states.
pub async fn transition_status(
    pool: &PgPool,
    id: Uuid,
    next: domain::status::BuildStatus,
    message: Option<String>,
) -> Result<Build> {
    let current = get_by_id(pool, id).await?;
    current.status.transition_to(next)?;

    let mut update = BuildPatch::status(next);
    if message.is_some() {
        update.status_message = Some(message);
    }
    patch(pool, id, update).await
}

/// The eager-loadable relation names for [`load`].
pub const RELATIONS: [&str; 5] = [
    "deploys",
    "deploys.deployable",
    "deployables",
    "environment",
    "pullRequest.repository",
];

/// A build with its requested relations loaded.
#[derive(Debug, Clone)]
pub struct BuildGraph {
    pub build: Build,
    pub deploys: Vec<Deploy>,
    pub deployables: Vec<Deployable>,
    pub environment: Option<Environment>,
    pub pull_request: Option<PullRequest>,
    pub repository: Option<Repository>,
}

/// Fetch a build and the relations named in `spec`, a comma-separated list
/// drawn from [`RELATIONS`] (e.g. `"deploys.deployable, environment"`).
pub async fn load(pool: &PgPool, uuid: &str, spec: &str) -> Result<Option<BuildGraph>> {
    let Some(build) = find_by_uuid(pool, uuid).await? else {
        return Ok(None);
    };

    let wanted: Vec<&str> = spec
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    for relation in &wanted {
        if !RELATIONS.contains(relation) {
            return Err(DomainError::Validation(format!(
                "unknown relation: {relation}"
            )));
        }
    }
    let wants = |relation: &str| wanted.iter().any(|w| *w == relation || w.starts_with(&format!("{relation}.")));

    let deploys = if wants("deploys") {
        crate::deploys::list_for_build(pool, build.id).await?
    } else {
        Vec::new()
    };
    let deployables = if wants("deployables") || wanted.contains(&"deploys.deployable") {
        crate::deployables::list_for_build(pool, build.id).await?
    } else {
        Vec::new()
    };
    let environment = match (wants("environment"), build.environment_id) {
        (true, Some(environment_id)) => {
            crate::environments::find_by_id(pool, environment_id).await?
        }
        _ => None,
    };
    let (pull_request, repository) = if wants("pullRequest") {
        let pr = crate::pull_requests::find_by_id(pool, build.pull_request_id).await?;
        let repo = match (&pr, wanted.contains(&"pullRequest.repository")) {
            (Some(pr), true) => crate::repositories::find_by_id(pool, pr.repository_id).await?,
            _ => None,
        };
        (pr, repo)
    } else {
        (None, None)
    };

    Ok(Some(BuildGraph {
        build,
        deploys,
        deployables,
        environment,
        pull_request,
        repository,
    }))
}

/// Filtered, paginated search; returns the page plus the total count.
pub async fn search(
    pool: &PgPool,
    filter: &BuildFilter,
    pagination: &Pagination,
    sort: &Sort,
) -> Result<(Vec<Build>, i64)> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut binds: Vec<BindValue> = Vec::new();
    let mut placeholder = 1;

    if !filter.statuses.is_empty() {
        // Status values come from the enum, not user input.
        let list = filter
            .statuses
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        where_clauses.push(format!("b.status IN ({list})"));
    }
    if let Some(full_name) = &filter.repository_full_name {
        where_clauses.push(format!("r.full_name = ${placeholder}"));
        binds.push(BindValue::Text(Some(full_name.clone())));
        placeholder += 1;
    }
    if let Some(branch) = &filter.branch_name {
        where_clauses.push(format!("pr.branch_name = ${placeholder}"));
        binds.push(BindValue::Text(Some(branch.clone())));
        placeholder += 1;
    }
    if let Some(pr_status) = filter.pr_status {
        where_clauses.push(format!("pr.status = ${placeholder}"));
        binds.push(BindValue::Text(Some(pr_status.as_str().to_string())));
        placeholder += 1;
    }
    if let Some(search_term) = &filter.search {
        where_clauses.push(format!(
            "(b.uuid ILIKE ${placeholder} OR pr.branch_name ILIKE ${placeholder} OR pr.title ILIKE ${placeholder})"
        ));
        binds.push(BindValue::Text(Some(format!("%{search_term}%"))));
        placeholder += 1;
    }
    // Timestamps bind as RFC 3339 text and cast server-side.
    if let Some(after) = filter.created_after {
        where_clauses.push(format!("b.created_at >= ${placeholder}::timestamptz"));
        binds.push(BindValue::Text(Some(after.to_rfc3339())));
        placeholder += 1;
    }
    if let Some(before) = filter.created_before {
        where_clauses.push(format!("b.created_at <= ${placeholder}::timestamptz"));
        binds.push(BindValue::Text(Some(before.to_rfc3339())));
        placeholder += 1;
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };
    let from_sql = "FROM builds b \
         JOIN pull_requests pr ON pr.id = b.pull_request_id \
         JOIN repositories r ON r.id = pr.repository_id";

    let count_sql = format!("SELECT COUNT(*) {from_sql} {where_sql}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for value in &binds {
        count_query = match value {
            BindValue::Text(v) => count_query.bind(v.clone()),
            BindValue::Int(v) => count_query.bind(*v),
            BindValue::BigInt(v) => count_query.bind(*v),
            BindValue::Bool(v) => count_query.bind(*v),
            BindValue::Uuid(v) => count_query.bind(*v),
            BindValue::Jsonb(v) => count_query.bind(Json(v.clone())),
        };
    }
    let total = count_query.fetch_one(pool).await.map_err(map_db_err)?;

    let page_sql = format!(
        "SELECT b.* {from_sql} {where_sql} ORDER BY {} {} LIMIT ${} OFFSET ${}",
        sort.field.column(),
        sort.direction.keyword(),
        placeholder,
        placeholder + 1
    );
    let mut page_query = sqlx::query_as::<_, Build>(&page_sql);
    for value in binds {
        page_query = match value {
            BindValue::Text(v) => page_query.bind(v),
            BindValue::Int(v) => page_query.bind(v),
            BindValue::BigInt(v) => page_query.bind(v),
            BindValue::Bool(v) => page_query.bind(v),
            BindValue::Uuid(v) => page_query.bind(v),
            BindValue::Jsonb(v) => page_query.bind(Json(v)),
        };
    }
    let builds = page_query
        .bind(pagination.limit as i64)
        .bind(pagination.offset())
        .fetch_all(pool)
        .await
        .map_err(map_db_err)?;

    Ok((builds, total))
}
