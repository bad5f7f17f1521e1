use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use databind::binder::{self, DEFAULT_DISCOVERY_TTL, DEFAULT_VARIABLES_TTL};
use databind::config::Config;
use databind::DatabindError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_ttls_from_yaml_config() {
    let config = Config::from_yaml(
        r#"
variables:
  defaulted:
    test: { ttl: 1432s }
  configured:
    ttl: 345s
    test: { ttl: 1432s }
  myData:
    ttl: 345s
    payload_ttl: true
    test: { data: hello, ttl: 1432s }
"#,
    )
    .unwrap();
    let sources = config.build_sources().unwrap();

    // Before the first fetch only configured TTLs apply
    assert_eq!(sources.variable_ttl("defaulted"), Some(DEFAULT_VARIABLES_TTL));
    assert_eq!(sources.variable_ttl("myData"), Some(Duration::from_secs(345)));

    let values = binder::fetch(&sources).unwrap();
    assert_eq!(sources.variable_ttl("defaulted"), Some(DEFAULT_VARIABLES_TTL));
    assert_eq!(sources.variable_ttl("configured"), Some(Duration::from_secs(345)));
    assert_eq!(sources.variable_ttl("myData"), Some(Duration::from_secs(1432)));
    assert_eq!(values.shared()["myData.data"], "hello");
    assert_eq!(values.shared()["myData.ttl"], "1432s");
    assert_eq!(sources.discovery_ttl(), None);
}

#[test]
fn test_declared_ttl_from_file_governs_refresh() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("my_data.json");
    std::fs::write(&data, r#"{"data": "some_value", "ttl": "1432s"}"#).unwrap();

    let config = Config::from_yaml(&format!(
        "variables:\n  myData:\n    ttl: 345s\n    payload_ttl: true\n    file: {{ path: '{}' }}\n",
        data.display()
    ))
    .unwrap();
    let now: Arc<Mutex<DateTime<Utc>>> =
        Arc::new(Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let clock_now = now.clone();
    let sources = config
        .build_sources_with_clock(Arc::new(move || *clock_now.lock().unwrap()))
        .unwrap();
    let advance = |secs: i64| *now.lock().unwrap() += ChronoDuration::seconds(secs);

    let values = binder::fetch(&sources).unwrap();
    assert_eq!(values.shared()["myData.data"], "some_value");
    assert_eq!(sources.variable_ttl("myData"), Some(Duration::from_secs(1432)));

    std::fs::write(&data, r#"{"data": "new_value", "ttl": "1432s"}"#).unwrap();
    advance(400);
    let values = binder::fetch(&sources).unwrap();
    assert_eq!(values.shared()["myData.data"], "some_value");

    advance(1033);
    let values = binder::fetch(&sources).unwrap();
    assert_eq!(values.shared()["myData.data"], "new_value");
}

#[test]
fn test_load_from_file_with_env_style_overrides() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("databind.toml");
    std::fs::write(
        &path,
        r#"
[discovery]
test = [{ variables = { ip = "10.0.0.1" } }]

[variables.region]
test = "eu-west-1"
"#,
    )
    .unwrap();

    let mut config = Config::load(&path).unwrap();
    assert_eq!(config.variables.len(), 1);

    config.apply_overrides(vec![
        ("DATABIND_DISCOVERY__TTL".to_string(), "2m".to_string()),
        ("DATABIND_VARIABLES__REGION__TTL".to_string(), "90s".to_string()),
        ("DATABIND_VARIABLES__MISSING__TTL".to_string(), "1s".to_string()),
        ("OTHER_VARIABLE".to_string(), "ignored".to_string()),
    ]);
    let sources = config.build_sources().unwrap();
    assert_eq!(sources.discovery_ttl(), Some(Duration::from_secs(120)));
    assert_eq!(sources.variable_ttl("region"), Some(Duration::from_secs(90)));
}

#[test]
fn test_load_missing_and_invalid_files() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        Config::load(&dir.path().join("absent.yaml")),
        Err(DatabindError::ConfigNotFound { .. })
    ));

    let path = dir.path().join("bad.yaml");
    std::fs::write(&path, "variables:\n  a: { ttl: whenever, test: x }\n").unwrap();
    match Config::load(&path) {
        Err(DatabindError::ConfigValidation { errors }) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].path, "variables.a.ttl");
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_file_backend_rereads_after_expiry() {
    let dir = TempDir::new().unwrap();
    let creds = dir.path().join("creds.json");
    std::fs::write(&creds, r#"{"user": "admin", "password": "s3cret"}"#).unwrap();

    let config = Config::from_yaml(&format!(
        "variables:\n  creds:\n    file: {{ path: '{}' }}\n",
        creds.display()
    ))
    .unwrap();
    let sources = config.build_sources().unwrap();
    let template = serde_json::json!({
        "connection": "postgres://${creds.user}:${creds.password}@db:5432",
        "port": 5432,
    });

    let values = binder::fetch(&sources).unwrap();
    let out = binder::replace(&values, &template).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0].variables["connection"],
        "postgres://admin:s3cret@db:5432"
    );
    assert_eq!(out[0].variables["port"], 5432);

    // Fresh cache: file changes are not visible until the TTL expires
    std::fs::write(&creds, r#"{"user": "root", "password": "x"}"#).unwrap();
    let values = binder::fetch(&sources).unwrap();
    assert_eq!(values.shared()["creds.user"], "admin");
}

#[test]
fn test_discovery_match_filters_records() {
    let config = Config::from_yaml(
        r#"
discovery:
  match:
    image: /^nginx:/
  test:
    - variables: { ip: 10.0.0.1, image: "nginx:1.25" }
      metricAnnotations: { container: { name: web } }
    - variables: { ip: 10.0.0.2, image: "redis:7" }
    - variables: { ip: 10.0.0.3, image: "nginx:1.27" }
"#,
    )
    .unwrap();
    let sources = config.build_sources().unwrap();
    assert_eq!(sources.discovery_ttl(), Some(DEFAULT_DISCOVERY_TTL));

    let values = binder::fetch(&sources).unwrap();
    let ips: Vec<_> = values
        .matches()
        .iter()
        .map(|m| m.namespace["ip"].as_str())
        .collect();
    assert_eq!(ips, vec!["10.0.0.1", "10.0.0.3"]);
    assert_eq!(values.matches()[0].annotations["container.name"], "web");
}

#[cfg(unix)]
#[test]
fn test_command_backends() {
    let config = Config::from_yaml(
        r#"
discovery:
  command:
    exec: [sh, -c, 'echo "[{\"variables\":{\"host\":\"$TARGET\"},\"entityRewrites\":[{\"action\":\"replace\",\"match\":\"\${host}\",\"replaceField\":\"web-01\"}]}]"']
    env: { TARGET: 192.168.0.9 }
variables:
  version:
    command:
      exec: [echo, '"2.4.1"']
      timeout: 5s
"#,
    )
    .unwrap();
    let sources = config.build_sources().unwrap();
    let template = serde_json::json!({ "url": "http://${host}/v${version}" });

    let values = binder::fetch(&sources).unwrap();
    let out = binder::replace(&values, &template).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].variables["url"], "http://192.168.0.9/v2.4.1");
    assert_eq!(out[0].entity_rewrites.apply("host:${host}"), "host:web-01");
}

#[cfg(unix)]
#[test]
fn test_failing_command_aborts_cycle() {
    let config = Config::from_yaml(
        "variables:\n  broken:\n    command: { exec: [sh, -c, 'echo boom >&2; exit 3'] }\n",
    )
    .unwrap();
    let sources = config.build_sources().unwrap();

    match binder::fetch(&sources) {
        Err(DatabindError::FetchFailed { source_name, source }) => {
            assert_eq!(source_name, "broken");
            assert!(format!("{:#}", source).contains("boom"));
        }
        other => panic!("unexpected result: {:?}", other.map(|v| v.len())),
    }
}
