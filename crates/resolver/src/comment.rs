//! PR comment parsing.
//!
//! The status comment carries a user-editable block between two fixed
//! marker lines. Inside it, checkbox rows select optional services and pin
//! branches, `url:` rows set vanity URLs, and `ENV:<key>:<value>` rows feed
//! the build's comment runtime env.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

pub const HEADER: &str = "----EDIT BELOW THIS LINE----";
pub const FOOTER: &str = "----EDIT ABOVE THIS LINE----";

static SERVICE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:-\s*)?\[(?P<check>[xX ]?)\]\s*(?P<name>[A-Za-z0-9._-]+)\s*:\s*(?P<value>\S.*)$")
        .unwrap()
});

#[derive(Debug, Clone, Default)]
pub struct ServiceSelection {
    pub checked: bool,
    /// Branch name or URL following the service name.
    pub value: String,
    pub vanity_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CommentState {
    pub services: BTreeMap<String, ServiceSelection>,
    pub runtime_env: BTreeMap<String, String>,
}

/// Parse the editable block of a PR status comment. Content outside the
/// marker lines is ignored; a missing block yields an empty state.
pub fn parse(body: &str) -> CommentState {
    let mut state = CommentState::default();
    let mut in_block = false;
    let mut last_service: Option<String> = None;

    for raw_line in body.lines() {
        let line = raw_line.trim();
        if line == HEADER {
            in_block = true;
            continue;
        }
        if line == FOOTER {
            break;
        }
        if !in_block || line.is_empty() {
            continue;
        }

        if let Some(env_line) = line.strip_prefix("ENV:") {
            if let Some((key, value)) = env_line.split_once(':') {
                state
                    .runtime_env
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
            continue;
        }

        if let Some(url) = line.strip_prefix("url:") {
            if let Some(name) = &last_service {
                if let Some(selection) = state.services.get_mut(name) {
                    selection.vanity_url = Some(url.trim().to_string());
                }
            }
            continue;
        }

        if let Some(caps) = SERVICE_LINE.captures(line) {
            let name = caps["name"].to_string();
            state.services.insert(
                name.clone(),
                ServiceSelection {
                    checked: caps["check"].eq_ignore_ascii_case("x"),
                    value: caps["value"].trim().to_string(),
                    vanity_url: None,
                },
            );
            last_service = Some(name);
        }
    }

    state
}

/// Render the editable block back out; `parse(render(state))` round-trips.
pub fn render(state: &CommentState) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    for (name, selection) in &state.services {
        let mark = if selection.checked { "x" } else { " " };
        out.push_str(&format!("- [{mark}] {name}: {}\n", selection.value));
        if let Some(url) = &selection.vanity_url {
            out.push_str(&format!("url: {url}\n"));
        }
    }
    for (key, value) in &state.runtime_env {
        out.push_str(&format!("ENV:{key}:{value}\n"));
    }
    out.push_str(FOOTER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_checkboxes_urls_and_env() {
        let body = format!(
            "intro text\n{HEADER}\n\
             - [x] api: feature/login\n\
             url: https://demo.example.com\n\
             - [ ] debug-console: main\n\
             ENV:LOG_LEVEL:debug\n\
             {FOOTER}\n\
             trailing text [x] ghost: ignored\n"
        );
        let state = parse(&body);

        assert!(state.services["api"].checked);
        assert_eq!(state.services["api"].value, "feature/login");
        assert_eq!(
            state.services["api"].vanity_url.as_deref(),
            Some("https://demo.example.com")
        );
        assert!(!state.services["debug-console"].checked);
        assert_eq!(state.runtime_env["LOG_LEVEL"], "debug");
        assert!(!state.services.contains_key("ghost"));
    }

    #[test]
    fn env_values_may_contain_colons() {
        let body = format!("{HEADER}\nENV:DATABASE_URL:postgres://db:5432/app\n{FOOTER}");
        let state = parse(&body);
        assert_eq!(state.runtime_env["DATABASE_URL"], "postgres://db:5432/app");
    }

    #[test]
    fn checkbox_without_leading_dash_is_accepted() {
        let body = format!("{HEADER}\n[X] api: main\n{FOOTER}");
        let state = parse(&body);
        assert!(state.services["api"].checked);
    }

    #[test]
    fn missing_footer_reads_to_end_of_body() {
        let body = format!("{HEADER}\n- [x] api: main");
        let state = parse(&body);
        assert!(state.services["api"].checked);
    }

    #[test]
    fn missing_block_yields_empty_state() {
        let state = parse("just a regular comment");
        assert!(state.services.is_empty());
        assert!(state.runtime_env.is_empty());
    }

    #[test]
    fn render_parse_round_trips() {
        let body = format!(
            "{HEADER}\n- [x] api: main\n- [ ] worker: main\nENV:FOO:bar\n{FOOTER}"
        );
        let state = parse(&body);
        let rendered = render(&state);
        let reparsed = parse(&rendered);
        assert_eq!(
            state.services.keys().collect::<Vec<_>>(),
            reparsed.services.keys().collect::<Vec<_>>()
        );
        assert_eq!(state.runtime_env, reparsed.runtime_env);
        assert_eq!(
            state.services["api"].checked,
            reparsed.services["api"].checked
        );
    }
}
