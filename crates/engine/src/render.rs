//! Bridges store entities into the template renderer: a name-keyed index of
//! peer deploys plus the per-build defaults.

use std::collections::BTreeMap;

use domain::entities::{Build, Deploy, Deployable, GlobalConfig};
use domain::Result;
use renderer::{RenderContext, ServiceRenderData, TemplateRenderer};

/// Build the render context for one build. Inactive deploys are left out of
/// the index on purpose: references to them resolve through the
/// default-UUID fallback, pointing at the shared long-lived environment.
pub fn render_context(
    build: &Build,
    deploys: &[Deploy],
    deployables: &[Deployable],
    global: &GlobalConfig,
) -> RenderContext {
    let mut services = BTreeMap::new();

    for deploy in deploys.iter().filter(|d| d.active) {
        let Some(deployable) = deployables.iter().find(|da| da.id == deploy.deployable_id) else {
            continue;
        };
        services.insert(
            deployable.name.clone(),
            ServiceRenderData {
                branch_name: deploy.branch_name.clone(),
                public_url: deploy.public_url.clone().or_else(|| {
                    deployable.public.then(|| {
                        format!("https://{}.{}", deploy.release_name(), global.domain_defaults.http)
                    })
                }),
                uuid: Some(deploy.uuid.clone()),
                internal_hostname: Some(deploy.release_name()),
                docker_image: deploy.docker_image.clone(),
                sha: deploy.sha.clone(),
                internal_port: deployable.first_port().map(|p| p.to_string()),
                build_output: deploy.build_output.clone(),
            },
        );
    }

    RenderContext {
        services,
        build_uuid: build.uuid.clone(),
        namespace: build.namespace.clone(),
        default_uuid: global.default_uuid.clone(),
        default_namespace: global.default_namespace.clone(),
        default_public_domain: global.domain_defaults.http.clone(),
    }
}

/// Render one deployable's env and init env against its peers.
pub fn render_deploy_env(
    context: &RenderContext,
    deployable: &Deployable,
    comment_runtime_env: &BTreeMap<String, String>,
    use_default_uuid: bool,
) -> Result<(BTreeMap<String, String>, BTreeMap<String, String>)> {
    let renderer = TemplateRenderer::new(context.clone());

    let mut env = renderer.render_env(&deployable.env.0, use_default_uuid)?;
    // Comment-provided runtime env overrides the YAML, rendered the same way.
    for (key, value) in comment_runtime_env {
        env.insert(key.clone(), renderer.render(value, use_default_uuid)?);
    }
    let init_env = renderer.render_env(&deployable.init_env.0, use_default_uuid)?;
    Ok((env, init_env))
}
