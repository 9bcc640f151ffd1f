//! Per-deploy environment rendering.
//!
//! Templates use mustache-style placeholders of the form
//! `{{<service>_<attr>}}`. The underlying engine contract forbids hyphens in
//! identifiers, so callers escape `-` as six underscores before rendering and
//! restore them afterwards; array values travel through a single string
//! joined on `%%SPLIT%%`. Both conventions are load-bearing for templates
//! persisted by earlier versions and must stay bit-exact.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use domain::DomainError;

pub const SPLIT_TOKEN: &str = "%%SPLIT%%";
pub const HYPHEN_ESCAPE: &str = "______";
const CLUSTER_SUFFIX: &str = "svc.cluster.local";

// The argument form (`buildOutput(<regex>)`) may itself contain parens, so
// the group is non-greedy up to the closing braces.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+(?:\(.*?\))?)\s*\}\}").unwrap());

/// Escape hyphens so service names survive the identifier rules.
pub fn escape_hyphens(s: &str) -> String {
    s.replace('-', HYPHEN_ESCAPE)
}

/// Restore hyphens after rendering.
pub fn unescape_hyphens(s: &str) -> String {
    s.replace(HYPHEN_ESCAPE, "-")
}

/// Recover array values from a rendered string.
pub fn split_rendered(s: &str) -> Vec<String> {
    s.split(SPLIT_TOKEN).map(str::to_string).collect()
}

/// Attributes a placeholder may reference on a peer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attr {
    BranchName,
    PublicUrl,
    Uuid,
    InternalHostname,
    DockerImage,
    Sha,
    InternalPort,
    BuildOutput,
}

impl Attr {
    const SUFFIXES: [(&'static str, Attr); 7] = [
        ("branchName", Attr::BranchName),
        ("publicUrl", Attr::PublicUrl),
        ("UUID", Attr::Uuid),
        ("internalHostname", Attr::InternalHostname),
        ("dockerImage", Attr::DockerImage),
        ("sha", Attr::Sha),
        ("internalPort", Attr::InternalPort),
    ];
}

/// Render-time view of one peer deploy, keyed by service name in
/// [`RenderContext::services`].
#[derive(Debug, Clone, Default)]
pub struct ServiceRenderData {
    pub branch_name: Option<String>,
    pub public_url: Option<String>,
    pub uuid: Option<String>,
    /// Bare hostname (no cluster domain); the renderer appends
    /// `.<namespace>.svc.cluster.local`.
    pub internal_hostname: Option<String>,
    pub docker_image: Option<String>,
    pub sha: Option<String>,
    pub internal_port: Option<String>,
    pub build_output: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub services: BTreeMap<String, ServiceRenderData>,
    pub build_uuid: String,
    pub namespace: String,
    pub default_uuid: String,
    pub default_namespace: String,
    /// `domainDefaults.http`, used by the public-url fallback.
    pub default_public_domain: String,
}

pub struct TemplateRenderer {
    context: RenderContext,
}

impl TemplateRenderer {
    pub fn new(context: RenderContext) -> Self {
        TemplateRenderer { context }
    }

    /// Render a raw template: hyphen-escape, substitute placeholders,
    /// restore hyphens. Callers split arrays with [`split_rendered`].
    pub fn render(&self, template: &str, use_default_uuid: bool) -> Result<String, DomainError> {
        let escaped = escape_hyphens(template);
        let rendered = self.render_escaped(&escaped, use_default_uuid)?;
        Ok(unescape_hyphens(&rendered))
    }

    /// Render every value of an env map.
    pub fn render_env(
        &self,
        env: &BTreeMap<String, String>,
        use_default_uuid: bool,
    ) -> Result<BTreeMap<String, String>, DomainError> {
        env.iter()
            .map(|(key, value)| Ok((key.clone(), self.render(value, use_default_uuid)?)))
            .collect()
    }

    fn render_escaped(&self, template: &str, use_default_uuid: bool) -> Result<String, DomainError> {
        let mut out = String::with_capacity(template.len());
        let mut cursor = 0;

        for caps in PLACEHOLDER.captures_iter(template) {
            let whole = caps.get(0).unwrap();
            let token = caps.get(1).unwrap().as_str();
            out.push_str(&template[cursor..whole.start()]);
            cursor = whole.end();

            let tail = &template[cursor..];
            let (value, consumed) = self.substitute(token, tail, use_default_uuid)?;
            out.push_str(&value);
            cursor += consumed;
        }
        out.push_str(&template[cursor..]);
        Ok(out)
    }

    /// Resolve one placeholder token. Returns the substitution plus how many
    /// bytes of trailing literal text were folded into it (the hostname
    /// suffix case).
    fn substitute(
        &self,
        token: &str,
        tail: &str,
        use_default_uuid: bool,
    ) -> Result<(String, usize), DomainError> {
        if token == "buildUUID" {
            // An unset build UUID renders empty rather than falling back.
            return Ok((self.context.build_uuid.clone(), 0));
        }

        let Some((name, attr, arg)) = parse_token(token) else {
            // Unknown placeholder shape: mustache semantics, empty value.
            return Ok((String::new(), 0));
        };
        let service = self.context.services.get(&name);

        match attr {
            Attr::InternalHostname => {
                let resolved = service.and_then(|s| s.internal_hostname.clone());
                match resolved {
                    Some(host) if !host.is_empty() => {
                        let (suffix, consumed) = take_hostname_suffix(tail);
                        let value = format!(
                            "{host}{suffix}.{}.{CLUSTER_SUFFIX}",
                            self.context.namespace
                        );
                        Ok((value, consumed))
                    }
                    _ if use_default_uuid => {
                        let (suffix, consumed) = take_hostname_suffix(tail);
                        let value = format!(
                            "{name}-{}{suffix}.{}.{CLUSTER_SUFFIX}",
                            self.context.default_uuid, self.context.default_namespace
                        );
                        Ok((value, consumed))
                    }
                    _ => Ok((String::new(), 0)),
                }
            }
            Attr::PublicUrl => {
                let resolved = service.and_then(|s| s.public_url.clone());
                match resolved {
                    Some(url) if !url.is_empty() => Ok((url, 0)),
                    _ if use_default_uuid => Ok((
                        format!(
                            "{name}-{}.{}",
                            self.context.default_uuid, self.context.default_public_domain
                        ),
                        0,
                    )),
                    _ => Ok((String::new(), 0)),
                }
            }
            Attr::Uuid => {
                let resolved = service.and_then(|s| s.uuid.clone());
                match resolved {
                    Some(uuid) if !uuid.is_empty() => Ok((uuid, 0)),
                    _ if use_default_uuid => Ok((self.context.default_uuid.clone(), 0)),
                    _ => Ok((String::new(), 0)),
                }
            }
            Attr::BranchName => Ok((
                service
                    .and_then(|s| s.branch_name.clone())
                    .unwrap_or_default(),
                0,
            )),
            Attr::DockerImage => Ok((
                service
                    .and_then(|s| s.docker_image.clone())
                    .unwrap_or_default(),
                0,
            )),
            Attr::Sha => Ok((service.and_then(|s| s.sha.clone()).unwrap_or_default(), 0)),
            Attr::InternalPort => Ok((
                service
                    .and_then(|s| s.internal_port.clone())
                    .unwrap_or_default(),
                0,
            )),
            Attr::BuildOutput => {
                let output = service.and_then(|s| s.build_output.as_deref()).unwrap_or("");
                let pattern = arg.unwrap_or_default();
                let re = Regex::new(&pattern).map_err(|e| {
                    DomainError::Validation(format!("buildOutput pattern {pattern:?}: {e}"))
                })?;
                let value = re
                    .captures(output)
                    .map(|caps| {
                        caps.get(1)
                            .or_else(|| caps.get(0))
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_default()
                    })
                    .unwrap_or_default();
                Ok((value, 0))
            }
        }
    }
}

/// Split `<escapedName>_<attr>` / `<escapedName>_buildOutput(<regex>)`,
/// restoring hyphens in the name.
fn parse_token(token: &str) -> Option<(String, Attr, Option<String>)> {
    if let Some(open) = token.find("_buildOutput(") {
        let arg = token[open + "_buildOutput(".len()..].strip_suffix(')')?;
        let name = unescape_hyphens(&token[..open]);
        return Some((name, Attr::BuildOutput, Some(arg.to_string())));
    }
    for (suffix, attr) in Attr::SUFFIXES {
        if let Some(name) = token.strip_suffix(&format!("_{suffix}")) {
            if !name.is_empty() {
                return Some((unescape_hyphens(name), attr, None));
            }
        }
    }
    None
}

/// A hostname placeholder may be followed by a literal `-suffix` run (e.g.
/// `-master`); the cluster domain goes after the run, ports stay untouched.
fn take_hostname_suffix(tail: &str) -> (String, usize) {
    // Hyphens in literal text are escaped at this point.
    if !tail.starts_with(HYPHEN_ESCAPE) {
        return (String::new(), 0);
    }
    let mut end = HYPHEN_ESCAPE.len();
    let bytes = tail.as_bytes();
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    if end == HYPHEN_ESCAPE.len() {
        return (String::new(), 0);
    }
    (unescape_hyphens(&tail[..end]), end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RenderContext {
        let mut services = BTreeMap::new();
        services.insert(
            "api".to_string(),
            ServiceRenderData {
                branch_name: Some("feature/login".to_string()),
                public_url: Some("https://api-tidy-otter-4f2.lifecycle.example.com".to_string()),
                uuid: Some("api-tidy-otter-4f2".to_string()),
                internal_hostname: Some("api-tidy-otter-4f2".to_string()),
                docker_image: Some("registry.example.com/api:abc123".to_string()),
                sha: Some("abc123".to_string()),
                internal_port: Some("8080".to_string()),
                build_output: Some("endpoint=https://internal/xyz token=t0k3n".to_string()),
            },
        );
        services.insert(
            "redis-cache".to_string(),
            ServiceRenderData {
                internal_hostname: Some("redis-cache-tidy-otter-4f2".to_string()),
                internal_port: Some("6379".to_string()),
                ..Default::default()
            },
        );
        RenderContext {
            services,
            build_uuid: "tidy-otter-4f2".to_string(),
            namespace: "env-tidy-otter-4f2".to_string(),
            default_uuid: "dev-0".to_string(),
            default_namespace: "default-env".to_string(),
            default_public_domain: "lifecycle.example.com".to_string(),
        }
    }

    #[test]
    fn renders_internal_hostname_with_cluster_suffix() {
        let renderer = TemplateRenderer::new(context());
        let out = renderer
            .render("{{api_internalHostname}}:{{api_internalPort}}", true)
            .unwrap();
        assert_eq!(
            out,
            "api-tidy-otter-4f2.env-tidy-otter-4f2.svc.cluster.local:8080"
        );
    }

    #[test]
    fn hyphenated_service_names_round_trip() {
        let renderer = TemplateRenderer::new(context());
        let out = renderer
            .render("redis://{{redis-cache_internalHostname}}:6379", true)
            .unwrap();
        assert_eq!(
            out,
            "redis://redis-cache-tidy-otter-4f2.env-tidy-otter-4f2.svc.cluster.local:6379"
        );
    }

    #[test]
    fn hostname_suffix_is_kept_before_cluster_domain() {
        let renderer = TemplateRenderer::new(context());
        let out = renderer
            .render("{{redis-cache_internalHostname}}-master:6379", true)
            .unwrap();
        assert_eq!(
            out,
            "redis-cache-tidy-otter-4f2-master.env-tidy-otter-4f2.svc.cluster.local:6379"
        );
    }

    #[test]
    fn default_uuid_fallback_for_absent_service() {
        let renderer = TemplateRenderer::new(context());
        assert_eq!(
            renderer.render("{{foo_publicUrl}}", true).unwrap(),
            "foo-dev-0.lifecycle.example.com"
        );
        assert_eq!(
            renderer.render("{{foo_internalHostname}}", true).unwrap(),
            "foo-dev-0.default-env.svc.cluster.local"
        );
        assert_eq!(renderer.render("{{foo_UUID}}", true).unwrap(), "dev-0");
    }

    #[test]
    fn no_fallback_when_default_uuid_disabled() {
        let renderer = TemplateRenderer::new(context());
        assert_eq!(renderer.render("{{foo_publicUrl}}", false).unwrap(), "");
        assert_eq!(
            renderer.render("{{foo_internalHostname}}", false).unwrap(),
            ""
        );
    }

    #[test]
    fn build_uuid_renders_empty_when_unset() {
        let mut ctx = context();
        ctx.build_uuid = String::new();
        let renderer = TemplateRenderer::new(ctx);
        assert_eq!(renderer.render("v-{{buildUUID}}", true).unwrap(), "v-");
    }

    #[test]
    fn build_output_extracts_first_capture() {
        let renderer = TemplateRenderer::new(context());
        let out = renderer
            .render(r"{{api_buildOutput(endpoint=(\S+))}}", true)
            .unwrap();
        assert_eq!(out, "https://internal/xyz");
    }

    #[test]
    fn split_token_recovers_arrays() {
        let renderer = TemplateRenderer::new(context());
        let out = renderer
            .render("{{api_sha}}%%SPLIT%%{{api_branchName}}", true)
            .unwrap();
        assert_eq!(split_rendered(&out), vec!["abc123", "feature/login"]);
    }

    #[test]
    fn render_is_idempotent_on_resolved_output() {
        let renderer = TemplateRenderer::new(context());
        let template = "postgres://{{api_internalHostname}}:5432/app?branch={{api_branchName}}";
        let once = renderer.render(template, true).unwrap();
        let twice = renderer.render(&once, true).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn literal_hyphens_survive_the_escape_round_trip() {
        let renderer = TemplateRenderer::new(context());
        let out = renderer
            .render("some-literal-text={{api_sha}}", true)
            .unwrap();
        assert_eq!(out, "some-literal-text=abc123");
    }

    #[test]
    fn resolved_services_never_use_the_fallback() {
        let renderer = TemplateRenderer::new(context());
        assert_eq!(
            renderer.render("{{api_UUID}}", true).unwrap(),
            "api-tidy-otter-4f2"
        );
        assert_eq!(
            renderer.render("{{api_dockerImage}}", true).unwrap(),
            "registry.example.com/api:abc123"
        );
    }

    #[test]
    fn env_maps_render_every_value() {
        let renderer = TemplateRenderer::new(context());
        let env = BTreeMap::from([
            ("API_HOST".to_string(), "{{api_internalHostname}}".to_string()),
            ("STATIC".to_string(), "unchanged".to_string()),
        ]);
        let rendered = renderer.render_env(&env, true).unwrap();
        assert_eq!(
            rendered["API_HOST"],
            "api-tidy-otter-4f2.env-tidy-otter-4f2.svc.cluster.local"
        );
        assert_eq!(rendered["STATIC"], "unchanged");
    }

    #[test]
    fn unknown_attribute_renders_empty() {
        let renderer = TemplateRenderer::new(context());
        assert_eq!(renderer.render("{{api_nonsense}}", true).unwrap(), "");
    }
}
