//! Defaults merging.
//!
//! Global chart defaults and `lifecycleDefaults` fold into each service
//! entry with a recursive merge: inner maps merge, scalars take the second
//! operand, and arrays of `key=value` strings merge by key with the second
//! operand winning.

use serde_json::Value;

use domain::entities::GlobalConfig;
use domain::Result;

use crate::schema::ServiceSpec;

/// Recursive JSON merge; `override_value` wins on scalars and arrays that
/// are not key=value lists.
pub fn merge_json(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in override_map {
                let entry = match merged.get(key) {
                    Some(existing) => merge_json(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        (Value::Array(base_items), Value::Array(override_items))
            if is_key_value_list(base_items) && is_key_value_list(override_items) =>
        {
            let base_strings: Vec<String> = base_items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            let override_strings: Vec<String> = override_items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            Value::Array(
                merge_key_value_arrays(&base_strings, &override_strings, '=')
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            )
        }
        (_, override_value) => override_value.clone(),
    }
}

fn is_key_value_list(items: &[Value]) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|v| v.as_str().map(|s| s.contains('=')).unwrap_or(false))
}

/// Merge two `key<sep>value` string lists by key; `override_values` wins per
/// key, base order is preserved, new keys append in override order.
pub fn merge_key_value_arrays(
    base: &[String],
    override_values: &[String],
    separator: char,
) -> Vec<String> {
    let key_of = |entry: &str| -> String {
        entry
            .split_once(separator)
            .map(|(key, _)| key.to_string())
            .unwrap_or_else(|| entry.to_string())
    };

    let mut merged: Vec<String> = Vec::with_capacity(base.len() + override_values.len());
    for entry in base {
        let key = key_of(entry);
        let winner = override_values
            .iter()
            .find(|candidate| key_of(candidate) == key);
        merged.push(winner.unwrap_or(entry).clone());
    }
    for entry in override_values {
        let key = key_of(entry);
        if !base.iter().any(|existing| key_of(existing) == key) {
            merged.push(entry.clone());
        }
    }
    merged
}

/// Fold global defaults into one service entry: `lifecycleDefaults` first,
/// then the per-chart override block, then the service's own settings.
pub fn apply_global_defaults(service: &mut ServiceSpec, global: &GlobalConfig) -> Result<()> {
    let Some(helm) = service.helm.as_mut() else {
        return Ok(());
    };

    let mut default_values: Vec<String> = Vec::new();
    for source in [
        Some(&global.lifecycle_defaults),
        global.chart_defaults.get(&helm.chart.name),
    ]
    .into_iter()
    .flatten()
    {
        if let Some(values) = source.get("values").and_then(Value::as_array) {
            default_values.extend(
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string)),
            );
        }
        if helm.chart.repo_url.is_none() {
            if let Some(repo) = source.get("repoUrl").and_then(Value::as_str) {
                helm.chart.repo_url = Some(repo.to_string());
            }
        }
        if helm.chart.version.is_none() {
            if let Some(version) = source.get("version").and_then(Value::as_str) {
                helm.chart.version = Some(version.to_string());
            }
        }
    }

    helm.chart.values = merge_key_value_arrays(&default_values, &helm.chart.values, '=');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn override_wins_per_key_and_preserves_base_order() {
        let merged = merge_key_value_arrays(
            &strings(&["a=1", "b=2", "c=3"]),
            &strings(&["b=20", "d=4"]),
            '=',
        );
        assert_eq!(merged, strings(&["a=1", "b=20", "c=3", "d=4"]));
    }

    #[test]
    fn key_value_merge_is_associative_for_unique_keys() {
        let a = strings(&["a=1", "b=2"]);
        let b = strings(&["b=20", "c=3"]);
        let c = strings(&["c=30", "d=4"]);

        let left = merge_key_value_arrays(&merge_key_value_arrays(&a, &b, '='), &c, '=');
        let right = merge_key_value_arrays(&a, &merge_key_value_arrays(&b, &c, '='), '=');
        assert_eq!(left, right);
    }

    #[test]
    fn json_merge_recurses_into_maps() {
        let base = json!({"resources": {"cpu": "100m", "memory": "128Mi"}, "replicas": 1});
        let override_value = json!({"resources": {"memory": "256Mi"}});
        let merged = merge_json(&base, &override_value);
        assert_eq!(
            merged,
            json!({"resources": {"cpu": "100m", "memory": "256Mi"}, "replicas": 1})
        );
    }

    #[test]
    fn json_merge_joins_key_value_arrays_by_key() {
        let base = json!({"values": ["a=1", "b=2"]});
        let override_value = json!({"values": ["b=20"]});
        let merged = merge_json(&base, &override_value);
        assert_eq!(merged, json!({"values": ["a=1", "b=20"]}));
    }

    #[test]
    fn chart_defaults_fill_unset_chart_fields() {
        use domain::status::DeployType;
        let mut global = GlobalConfig::default();
        global.chart_defaults.insert(
            "redis".to_string(),
            json!({"repoUrl": "https://charts.example.com", "values": ["architecture=standalone"]}),
        );

        let mut service = crate::schema::ServiceSpec::new("cache", DeployType::Helm);
        service.helm = Some(domain::entities::HelmSpec {
            chart: domain::entities::ChartSpec {
                name: "redis".to_string(),
                values: strings(&["architecture=replication"]),
                ..Default::default()
            },
            ..Default::default()
        });

        apply_global_defaults(&mut service, &global).unwrap();
        let helm = service.helm.unwrap();
        assert_eq!(
            helm.chart.repo_url.as_deref(),
            Some("https://charts.example.com")
        );
        // Service's own value wins over the chart default.
        assert_eq!(helm.chart.values, strings(&["architecture=replication"]));
    }
}
