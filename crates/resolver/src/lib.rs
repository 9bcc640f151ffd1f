//! YAML spec resolution: parse and validate the versioned service spec,
//! merge global defaults, fold in PR-comment selection state, and produce a
//! topologically ordered service list plus the webhook list.

pub mod comment;
pub mod graph;
pub mod merge;
pub mod schema;

use domain::entities::{GlobalConfig, Webhook};
use domain::{DomainError, Result};

use comment::CommentState;
use graph::DependencyGraph;
use schema::{ServiceSpec, ServiceSpecFile};

/// A service spec paired with its selection state for this build.
#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub spec: ServiceSpec,
    pub selected: bool,
    /// Vanity URL override from the PR comment, when present.
    pub vanity_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Topological deployment order (dependencies first); declaration order
    /// breaks ties.
    pub services: Vec<ResolvedService>,
    pub webhooks: Vec<Webhook>,
    pub graph: DependencyGraph,
}

/// Full resolve pass over a raw YAML document.
pub fn resolve(
    yaml: &str,
    global: &GlobalConfig,
    comment: Option<&CommentState>,
) -> Result<ResolvedConfig> {
    let file = schema::parse(yaml)?;
    resolve_file(file, global, comment)
}

pub fn resolve_file(
    mut file: ServiceSpecFile,
    global: &GlobalConfig,
    comment: Option<&CommentState>,
) -> Result<ResolvedConfig> {
    for service in &mut file.services {
        merge::apply_global_defaults(service, global)?;
    }

    let graph = DependencyGraph::from_services(&file.services)?;
    let order = graph.topological_order()?;

    let services = order
        .into_iter()
        .map(|name| {
            let spec = file
                .services
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .ok_or_else(|| DomainError::Internal(format!("graph node {name} not in spec")))?;
            let selection = comment.and_then(|c| c.services.get(&spec.name));
            let selected = match selection {
                Some(entry) => entry.checked,
                // Unmentioned services keep their spec default: required
                // services deploy, optional ones stay parked.
                None => !spec.optional,
            };
            let vanity_url = selection.and_then(|entry| entry.vanity_url.clone());
            Ok(ResolvedService {
                spec,
                selected,
                vanity_url,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ResolvedConfig {
        services,
        webhooks: file.webhooks,
        graph,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
version: 1.0.0
services:
  - name: db
    docker:
      dockerImage: postgres:16
  - name: api
    github:
      repository: org/api
      branchName: main
    env:
      DATABASE_HOST: "{{db_internalHostname}}"
    deploymentDependsOn:
      - db
  - name: debug-console
    optional: true
    docker:
      dockerImage: org/console:latest
webhooks:
  - name: smoke
    type: command
    state: deployed
    script: ./smoke.sh
"#;

    #[test]
    fn resolves_dependency_order_and_webhooks() {
        let resolved = resolve(YAML, &GlobalConfig::default(), None).unwrap();
        let names: Vec<_> = resolved
            .services
            .iter()
            .map(|s| s.spec.name.as_str())
            .collect();
        assert_eq!(names, vec!["db", "api", "debug-console"]);
        assert_eq!(resolved.webhooks.len(), 1);
        assert!(resolved.graph.edges().contains(&("api".into(), "db".into())));
    }

    #[test]
    fn optional_services_default_to_unselected() {
        let resolved = resolve(YAML, &GlobalConfig::default(), None).unwrap();
        let console = resolved
            .services
            .iter()
            .find(|s| s.spec.name == "debug-console")
            .unwrap();
        assert!(!console.selected);
        let api = resolved
            .services
            .iter()
            .find(|s| s.spec.name == "api")
            .unwrap();
        assert!(api.selected);
    }

    #[test]
    fn comment_selection_overrides_defaults() {
        let body = format!(
            "{}\n- [x] debug-console: main\n- [ ] api: main\n{}",
            comment::HEADER,
            comment::FOOTER
        );
        let state = comment::parse(&body);
        let resolved = resolve(YAML, &GlobalConfig::default(), Some(&state)).unwrap();
        let console = resolved
            .services
            .iter()
            .find(|s| s.spec.name == "debug-console")
            .unwrap();
        assert!(console.selected);
        let api = resolved
            .services
            .iter()
            .find(|s| s.spec.name == "api")
            .unwrap();
        assert!(!api.selected);
    }
}
