use super::{BenchConfig, ConfigErrors};
use std::path::PathBuf;

const CONFIG: &str = "
benchmark:
  dataset_size: 1000
databases:
  sqlite:
    kind: sqlite
    parameter:
      path: results/bench.sqlite
  documents:
    kind: document
    parameter:
      temporary: true
  duckdb:
    kind: duckdb
";

const KINDS: [&str; 3] = ["sqlite", "duckdb", "document"];

#[test]
pub fn parse_keeps_database_order() {
    let config = BenchConfig::from_yaml(CONFIG).unwrap();
    let names: Vec<&str> = config.databases.keys().map(String::as_str).collect();

    assert_eq!(names, ["sqlite", "documents", "duckdb"]);
    assert_eq!(
        config.databases["sqlite"].get_str("path"),
        Some("results/bench.sqlite")
    );
    assert_eq!(config.databases["documents"].get_bool("temporary"), Some(true));
}

#[test]
pub fn parse_applies_defaults() {
    let config = BenchConfig::from_yaml(CONFIG).unwrap();

    assert_eq!(config.benchmark.iterations, 1);
    assert_eq!(config.benchmark.settle_millis, 1000);
    assert_eq!(config.benchmark.seed, None);
    assert_eq!(
        config.output.json_results,
        PathBuf::from("results/benchmark_results.json")
    );
    assert!(config.preflight_checks(&KINDS).is_ok());
}

#[test]
pub fn unknown_fields_are_rejected() {
    let source = "
benchmark:
  dataset_size: 10
  warmup: 3
databases: {}
";

    assert!(matches!(
        BenchConfig::from_yaml(source),
        Err(ConfigErrors::Yaml(_))
    ));
}

#[test]
pub fn preflight_reports_every_problem() {
    let source = "
benchmark:
  dataset_size: 0
  iterations: 0
databases:
  postgres:
    kind: postgres
";
    let config = BenchConfig::from_yaml(source).unwrap();

    match config.preflight_checks(&KINDS) {
        Err(ConfigErrors::InvalidConfiguration(message)) => {
            assert!(message.contains("dataset_size"));
            assert!(message.contains("iterations"));
            assert!(message.contains("postgres"));
        }
        other => panic!("expected invalid configuration, got {other:?}"),
    }
}

#[test]
pub fn preflight_rejects_empty_database_set() {
    let config = BenchConfig::from_yaml("benchmark: {dataset_size: 5}\ndatabases: {}\n").unwrap();

    assert!(matches!(
        config.preflight_checks(&KINDS),
        Err(ConfigErrors::InvalidConfiguration(_))
    ));
}

#[test]
pub fn retain_databases_filters_in_order() {
    let mut config = BenchConfig::from_yaml(CONFIG).unwrap();

    config
        .retain_databases(&["duckdb".to_owned(), "sqlite".to_owned()])
        .unwrap();
    let names: Vec<&str> = config.databases.keys().map(String::as_str).collect();

    assert_eq!(names, ["sqlite", "duckdb"]);
    assert!(config.retain_databases(&["mongodb".to_owned()]).is_err());
}
