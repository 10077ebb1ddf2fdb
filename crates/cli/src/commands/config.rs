use std::fs;
use std::path::Path;

use markup_core::config::{read_env, resolve_config_path, AppConfig, ConfigOverrides, LoadOptions};
use toml::Value;

/// Renders `config`, which was loaded from `options`, one attributed line per key.
pub fn run(config: &AppConfig, options: &LoadOptions) -> String {
    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        if let Some(flag) = override_flag(key_path, &options.overrides) {
            return format!("override ({flag})");
        }
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let brackets = config
        .resolver
        .brackets
        .iter()
        .map(|bracket| format!("> {} => {}", bracket.above, bracket.multiplier))
        .collect::<Vec<_>>()
        .join("; ");
    let tax_branches = config
        .tax
        .branches
        .iter()
        .map(|branch| match branch.statutory_rate {
            Some(rate) => format!("{}={rate}", branch.pattern),
            None => branch.pattern.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    let statuses = if config.batch.statuses.is_empty() {
        "<all>".to_string()
    } else {
        config.batch.statuses.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    };

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];

    lines.push(render_line("resolver.brackets", &brackets, source("resolver.brackets", &[])));
    lines.push(render_line(
        "resolver.subcontracted_rule",
        &format!("{:?}", config.resolver.subcontracted_rule),
        source("resolver.subcontracted_rule", &["MARKUP_RESOLVER_SUBCONTRACTED_RULE"]),
    ));
    lines.push(render_line(
        "resolver.fallback_cost_basis",
        &format!("{:?}", config.resolver.fallback_cost_basis),
        source("resolver.fallback_cost_basis", &["MARKUP_RESOLVER_FALLBACK_COST_BASIS"]),
    ));

    lines.push(render_line(
        "tax.default_rate",
        &config.tax.default_rate.to_string(),
        source("tax.default_rate", &["MARKUP_TAX_DEFAULT_RATE"]),
    ));
    lines.push(render_line(
        "tax.branches",
        &tax_branches,
        source("tax.branches", &["MARKUP_TAX_BRANCHES"]),
    ));

    lines.push(render_line(
        "reconciliation.low_max_pct",
        &config.reconciliation.low_max_pct.to_string(),
        source("reconciliation.low_max_pct", &["MARKUP_RECONCILIATION_LOW_MAX_PCT"]),
    ));
    lines.push(render_line(
        "reconciliation.medium_max_pct",
        &config.reconciliation.medium_max_pct.to_string(),
        source("reconciliation.medium_max_pct", &["MARKUP_RECONCILIATION_MEDIUM_MAX_PCT"]),
    ));
    lines.push(render_line(
        "reconciliation.price_basis",
        &format!("{:?}", config.reconciliation.price_basis),
        source("reconciliation.price_basis", &["MARKUP_RECONCILIATION_PRICE_BASIS"]),
    ));

    lines.push(render_line(
        "batch.statuses",
        &statuses,
        source("batch.statuses", &["MARKUP_BATCH_STATUSES"]),
    ));
    lines.push(render_line(
        "batch.unknown_branch_label",
        &config.batch.unknown_branch_label,
        source("batch.unknown_branch_label", &["MARKUP_BATCH_UNKNOWN_BRANCH_LABEL"]),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", &["MARKUP_LOGGING_LEVEL", "MARKUP_LOG_LEVEL"]),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", &["MARKUP_LOGGING_FORMAT", "MARKUP_LOG_FORMAT"]),
    ));

    lines.join("\n")
}

fn override_flag(key_path: &str, overrides: &ConfigOverrides) -> Option<&'static str> {
    match key_path {
        "logging.level" if overrides.log_level.is_some() => Some("--log-level"),
        "batch.statuses" if overrides.statuses.is_some() => Some("--status"),
        "reconciliation.price_basis" if overrides.price_basis.is_some() => Some("--price-basis"),
        _ => None,
    }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| read_env(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
