use uuid::Uuid;

use domain::entities::DeploySummaryRow;
use domain::Result;

use crate::{map_db_err, PgPool};

/// Aggregated per-deploy read view for the build summary endpoint. Raw SQL
/// because the row joins three tables and carries no write path.
pub async fn deploy_summary(pool: &PgPool, build_id: Uuid) -> Result<Vec<DeploySummaryRow>> {
    sqlx::query_as::<_, DeploySummaryRow>(
        r#"
        SELECT
            d.uuid AS uuid,
            da.name AS service_name,
            da.deploy_type AS deploy_type,
            d.status AS status,
            d.status_message AS status_message,
            d.active AS active,
            d.docker_image AS docker_image,
            d.internal_hostname AS internal_hostname,
            d.public_url AS public_url,
            d.branch_name AS branch_name,
            d.sha AS sha,
            d.updated_at AS updated_at
        FROM deploys d
        JOIN deployables da ON da.id = d.deployable_id
        JOIN builds b ON b.id = d.build_id
        WHERE b.id = $1
        ORDER BY da.created_at ASC
        "#,
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_err)
}
