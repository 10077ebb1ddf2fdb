use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use markup_cli::commands::explain::{self, ExplainArgs};
use markup_cli::commands::reconcile::{self, ReconcileArgs};
use markup_cli::commands::{config, load_config, CommandResult};
use markup_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use markup_core::domain::estimate::EstimateStatus;
use markup_core::pricing::reconcile::PriceBasis;
use serde_json::{json, Value};
use tempfile::TempDir;

const EXPORT: &str = r#"{
  "data": [
    {"id": "E-1", "name": "Deck rebuild", "status": "Sold", "branch": {"name": "Tacoma"},
     "true_cost": 5000, "final_price": 12500},
    {"id": 2, "status": "sold", "branch": "Kent -WA",
     "true_cost": "1000", "final_price": 2750,
     "tax_details": {"final_price_after_taxes": 3027.75}},
    {"id": "E-3", "status": "Lost", "branch": {"name": "Tacoma"},
     "true_cost": 1000, "final_price": 2000},
    {"id": "E-4", "status": "Sold", "true_cost": 500, "sub_services_retail_cost": 500,
     "multiplierOverride": 3, "final_price": 1500},
    "not an estimate"
  ]
}"#;

#[test]
fn reconcile_json_groups_estimates_by_branch() {
    with_env(&[], || {
        let (_dir, input) = write_export(EXPORT);
        let result = reconcile::run(&json_args(&input), &default_config());
        assert_eq!(result.exit_code, 0, "expected successful reconcile: {}", result.output);

        let payload = parse_payload(&result.output);
        let branches: Vec<&str> = payload["groups"]
            .as_array()
            .expect("groups array")
            .iter()
            .filter_map(|group| group["branch_name"].as_str())
            .collect();
        assert_eq!(branches, ["Kent -WA", "Tacoma", "Unknown Branch"]);
        assert_eq!(payload["input_count"], 4);
        assert_eq!(payload["resolved_count"], 3);
        assert_eq!(payload["unresolved_count"], 1);
        assert_eq!(payload["skipped_records"][0]["position"], 4);
        assert_eq!(payload["summaries"].as_array().map(Vec::len), Some(3));
    });
}

#[test]
fn reconcile_human_output_lists_branches_and_flagged_estimates() {
    with_env(&[], || {
        let (_dir, input) = write_export(EXPORT);
        let args = ReconcileArgs { json: false, ..json_args(&input) };
        let result = reconcile::run(&args, &default_config());
        assert_eq!(result.exit_code, 0);

        let first = result.output.lines().next().unwrap_or_default();
        assert!(first.starts_with("reconcile: 4 estimates across 3 branches"), "{first}");
        assert!(result.output.contains("- Tacoma: 2 estimates, 2 resolved"));
        assert!(result.output.contains("flagged estimates (2):"));
        assert!(result.output.contains("E-4"));
        assert!(last_line(&result.output).starts_with("- ["));
    });
}

#[test]
fn reconcile_honors_status_filter_from_env() {
    with_env(&[("MARKUP_BATCH_STATUSES", "sold")], || {
        let (_dir, input) = write_export(EXPORT);
        let result = reconcile::run(&json_args(&input), &default_config());
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["filtered_out"], 1);
        assert!(payload["groups"]
            .as_array()
            .expect("groups array")
            .iter()
            .flat_map(|group| group["estimates"].as_array().cloned().unwrap_or_default())
            .all(|resolved| resolved["estimate"]["status"] == "sold"));
    });
}

#[test]
fn reconcile_branch_filter_and_price_basis_override() {
    with_env(&[], || {
        let (_dir, input) = write_export(EXPORT);
        let args = ReconcileArgs { branch: Some("kent".to_string()), ..json_args(&input) };
        let options = LoadOptions {
            overrides: ConfigOverrides {
                price_basis: Some(PriceBasis::AdjustedPrice),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        };
        let result = reconcile::run(&args, &loaded("reconcile", options));
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["groups"].as_array().map(Vec::len), Some(1));
        let resolved = &payload["groups"][0]["estimates"][0];
        assert_eq!(resolved["estimate"]["id"], "2");
        assert_eq!(resolved["reconciliation"]["price_basis"], "adjusted_price");
        assert_eq!(resolved["tax"]["matched_pattern"], "kent");
    });
}

#[test]
fn reconcile_missing_input_reports_ingest_failure() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let args = json_args(&dir.path().join("missing.json"));
        let result = reconcile::run(&args, &default_config());
        assert_eq!(result.exit_code, 3, "expected ingest failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "reconcile");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "ingest");
        assert!(payload["hint"].as_str().is_some_and(|hint| !hint.is_empty()));
    });
}

#[test]
fn reconcile_rejects_export_without_estimate_list() {
    with_env(&[], || {
        let (_dir, input) = write_export(&json!({"meta": {"page": 1}}).to_string());
        let result = reconcile::run(&json_args(&input), &default_config());
        assert_eq!(result.exit_code, 3);
        assert_eq!(parse_payload(&result.output)["error_class"], "ingest");
    });
}

#[test]
fn reconcile_returns_config_failure_for_invalid_log_level() {
    with_env(&[("MARKUP_LOG_LEVEL", "verbose")], || {
        let result = load_failure("reconcile", LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "reconcile");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().is_some_and(|msg| msg.contains("logging.level")));
    });
}

#[test]
fn explain_returns_trace_for_single_estimate() {
    with_env(&[], || {
        let (_dir, input) = write_export(EXPORT);
        let args = ExplainArgs { input, id: " E-1 ".to_string() };
        let result = explain::run(&args, &default_config());
        assert_eq!(result.exit_code, 0, "expected explain success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["estimate"]["id"], "E-1");
        assert_eq!(payload["resolution"]["source"], "standard_bracket");
        assert_eq!(payload["reconciliation"]["error_severity"], "low");
        assert_eq!(payload["reconciliation"]["error_percentage"].as_f64(), Some(0.0));
        assert_eq!(payload["resolution"]["multiplier"].as_f64(), Some(2.5));
        assert_eq!(payload["fingerprint"].as_str().map(str::len), Some(64));
        assert_eq!(payload["rule_order"][0], "subcontracted_standard_bracket");
        assert!(payload["resolution"]["trace"].as_array().is_some_and(|trace| !trace.is_empty()));
    });
}

#[test]
fn explain_ignores_batch_status_filter() {
    with_env(&[("MARKUP_BATCH_STATUSES", "sold")], || {
        let (_dir, input) = write_export(EXPORT);
        let args = ExplainArgs { input, id: "E-3".to_string() };
        let result = explain::run(&args, &default_config());
        assert_eq!(result.exit_code, 0);
        assert_eq!(parse_payload(&result.output)["estimate"]["status"], "lost");
    });
}

#[test]
fn explain_unknown_id_returns_not_found() {
    with_env(&[], || {
        let (_dir, input) = write_export(EXPORT);
        let args = ExplainArgs { input, id: "E-404".to_string() };
        let result = explain::run(&args, &default_config());
        assert_eq!(result.exit_code, 4, "expected not-found exit code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "explain");
        assert_eq!(payload["error_class"], "not_found");
        assert!(payload["message"].as_str().is_some_and(|msg| msg.contains("E-404")));
    });
}

#[test]
fn config_reports_env_and_default_sources() {
    with_env(&[("MARKUP_TAX_DEFAULT_RATE", "0.09")], || {
        let output = render_config(LoadOptions::default());

        assert!(output.starts_with("effective config"));
        assert!(output
            .contains("- tax.default_rate = 0.09 (source: env (MARKUP_TAX_DEFAULT_RATE))"));
        assert!(output.contains("- logging.level = info (source: default)"));
        assert!(output.contains("- batch.statuses = <all> (source: default)"));
    });
}

#[test]
fn config_reports_file_sources() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("markup.toml");
        fs::write(&path, "[batch]\nstatuses = [\"sold\", \"pending\"]\n").expect("write config");

        let output = render_config(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        });

        let expected = format!("- batch.statuses = sold, pending (source: file ({}))", path.display());
        assert!(output.contains(&expected), "{output}");
        assert!(output.contains("- reconciliation.price_basis = FinalPrice (source: default)"));
    });
}

#[test]
fn config_reports_validation_failure_as_error_payload() {
    with_env(&[("MARKUP_RECONCILIATION_LOW_MAX_PCT", "40")], || {
        let result = load_failure("config", LoadOptions::default());
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["hint"].as_str().is_some_and(|hint| !hint.is_empty()));
    });
}

#[test]
fn config_attributes_command_line_overrides() {
    with_env(&[("MARKUP_LOG_LEVEL", "warn"), ("MARKUP_BATCH_STATUSES", "lost")], || {
        let output = render_config(LoadOptions {
            overrides: ConfigOverrides {
                log_level: Some("debug".to_string()),
                statuses: Some(vec![EstimateStatus::Sold]),
                price_basis: Some(PriceBasis::AdjustedPrice),
            },
            ..LoadOptions::default()
        });

        assert!(output.starts_with(
            "effective config (source precedence: override > env > file > default):"
        ));
        assert!(
            output.contains("- logging.level = debug (source: override (--log-level))"),
            "{output}"
        );
        assert!(output.contains("- batch.statuses = sold (source: override (--status))"));
        assert!(output.contains(
            "- reconciliation.price_basis = AdjustedPrice (source: override (--price-basis))"
        ));
        assert!(output.contains("- logging.format = Compact (source: default)"), "{output}");
    });
}

#[test]
fn config_treats_blank_env_values_as_unset() {
    with_env(&[("MARKUP_TAX_DEFAULT_RATE", "  "), ("MARKUP_LOGGING_LEVEL", "")], || {
        let output = render_config(LoadOptions::default());

        assert!(
            output.lines().any(|line| line.starts_with("- tax.default_rate = ")
                && line.ends_with("(source: default)")),
            "{output}"
        );
        assert!(output.contains("- logging.level = info (source: default)"), "{output}");
    });
}

fn default_config() -> AppConfig {
    loaded("test", LoadOptions::default())
}

fn loaded(command: &str, options: LoadOptions) -> AppConfig {
    match load_config(command, options) {
        Ok(config) => config,
        Err(failure) => panic!("config should load: {}", failure.output),
    }
}

fn load_failure(command: &str, options: LoadOptions) -> CommandResult {
    match load_config(command, options) {
        Ok(_) => panic!("config load should fail"),
        Err(failure) => failure,
    }
}

fn render_config(options: LoadOptions) -> String {
    let config = loaded("config", options.clone());
    config::run(&config, &options)
}

fn json_args(input: &Path) -> ReconcileArgs {
    ReconcileArgs { input: input.to_path_buf(), json: true, branch: None }
}

fn write_export(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("estimates.json");
    fs::write(&path, contents).expect("write export");
    (dir, path)
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid json")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("lock env");

    let keys = [
        "MARKUP_RESOLVER_SUBCONTRACTED_RULE",
        "MARKUP_RESOLVER_FALLBACK_COST_BASIS",
        "MARKUP_TAX_DEFAULT_RATE",
        "MARKUP_TAX_BRANCHES",
        "MARKUP_RECONCILIATION_LOW_MAX_PCT",
        "MARKUP_RECONCILIATION_MEDIUM_MAX_PCT",
        "MARKUP_RECONCILIATION_PRICE_BASIS",
        "MARKUP_BATCH_STATUSES",
        "MARKUP_BATCH_UNKNOWN_BRANCH_LABEL",
        "MARKUP_LOGGING_LEVEL",
        "MARKUP_LOGGING_FORMAT",
        "MARKUP_LOG_LEVEL",
        "MARKUP_LOG_FORMAT",
    ];

    let previous: Vec<(String, Option<String>)> =
        keys.iter().map(|key| ((*key).to_string(), env::var(key).ok())).collect();

    for key in keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test();

    for (key, value) in previous {
        match value {
            Some(value) => env::set_var(&key, value),
            None => env::remove_var(&key),
        }
    }
}
