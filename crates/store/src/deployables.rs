use sqlx::types::Json;
use uuid::Uuid;

use domain::entities::{
    CodefreshSpec, Deployable, DeploymentSpec, DockerSpec, HelmSpec, KedaScaleToZero, PortSpec,
    RestoreSpec,
};
use domain::status::DeployType;
use domain::{DomainError, Result};

use crate::{map_db_err, PgPool};

/// Everything needed to materialise one deployable row from the resolver
/// output. Upserts key on `(build_id, name)`.
#[derive(Debug, Clone)]
pub struct NewDeployable {
    pub build_id: Uuid,
    pub name: String,
    pub deploy_type: DeployType,
    pub branch_name: Option<String>,
    pub env: std::collections::BTreeMap<String, String>,
    pub init_env: std::collections::BTreeMap<String, String>,
    pub ports: Vec<PortSpec>,
    pub public: bool,
    pub grpc: bool,
    pub capacity_type: Option<String>,
    pub helm: Option<HelmSpec>,
    pub docker: Option<DockerSpec>,
    pub codefresh: Option<CodefreshSpec>,
    pub restore: Option<RestoreSpec>,
    pub deployment: Option<DeploymentSpec>,
    pub keda_scale_to_zero: Option<KedaScaleToZero>,
    pub deployment_depends_on: Vec<String>,
    pub build_uuid: String,
}

pub async fn upsert(pool: &PgPool, new: &NewDeployable) -> Result<Deployable> {
    sqlx::query_as::<_, Deployable>(
        r#"
        INSERT INTO deployables (
            build_id, name, deploy_type, branch_name, env, init_env, ports,
            public, grpc, capacity_type, helm, docker, codefresh, restore,
            deployment, keda_scale_to_zero, deployment_depends_on, build_uuid
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ON CONFLICT (build_id, name) DO UPDATE SET
            deploy_type = EXCLUDED.deploy_type,
            branch_name = EXCLUDED.branch_name,
            env = EXCLUDED.env,
            init_env = EXCLUDED.init_env,
            ports = EXCLUDED.ports,
            public = EXCLUDED.public,
            grpc = EXCLUDED.grpc,
            capacity_type = EXCLUDED.capacity_type,
            helm = EXCLUDED.helm,
            docker = EXCLUDED.docker,
            codefresh = EXCLUDED.codefresh,
            restore = EXCLUDED.restore,
            deployment = EXCLUDED.deployment,
            keda_scale_to_zero = EXCLUDED.keda_scale_to_zero,
            deployment_depends_on = EXCLUDED.deployment_depends_on,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(new.build_id)
    .bind(&new.name)
    .bind(new.deploy_type.as_str())
    .bind(&new.branch_name)
    .bind(Json(&new.env))
    .bind(Json(&new.init_env))
    .bind(Json(&new.ports))
    .bind(new.public)
    .bind(new.grpc)
    .bind(&new.capacity_type)
    .bind(new.helm.as_ref().map(Json))
    .bind(new.docker.as_ref().map(Json))
    .bind(new.codefresh.as_ref().map(Json))
    .bind(new.restore.as_ref().map(Json))
    .bind(new.deployment.as_ref().map(Json))
    .bind(new.keda_scale_to_zero.as_ref().map(Json))
    .bind(Json(&new.deployment_depends_on))
    .bind(&new.build_uuid)
    .fetch_one(pool)
    .await
    .map_err(map_db_err)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Deployable>> {
    sqlx::query_as::<_, Deployable>("SELECT * FROM deployables WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Deployable> {
    find_by_id(pool, id)
        .await?
        .ok_or_else(|| DomainError::not_found("deployable", id))
}

pub async fn find_by_name(
    pool: &PgPool,
    build_id: Uuid,
    name: &str,
) -> Result<Option<Deployable>> {
    sqlx::query_as::<_, Deployable>(
        "SELECT * FROM deployables WHERE build_id = $1 AND name = $2",
    )
    .bind(build_id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .map_err(map_db_err)
}

pub async fn list_for_build(pool: &PgPool, build_id: Uuid) -> Result<Vec<Deployable>> {
    sqlx::query_as::<_, Deployable>(
        "SELECT * FROM deployables WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_err)
}

/// Remove deployables dropped from the YAML between resolves.
pub async fn delete_absent(pool: &PgPool, build_id: Uuid, keep_names: &[String]) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM deployables
        WHERE build_id = $1 AND NOT (name = ANY($2))
          AND NOT EXISTS (SELECT 1 FROM deploys d WHERE d.deployable_id = deployables.id)
        "#,
    )
    .bind(build_id)
    .bind(keep_names)
    .execute(pool)
    .await
    .map_err(map_db_err)?;
    Ok(result.rows_affected())
}
