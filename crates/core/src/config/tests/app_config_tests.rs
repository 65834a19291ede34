use crate::config::models::AppConfig;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.registry.heartbeat_timeout_seconds, 90);
    assert_eq!(config.registry.health_check_interval_seconds, 30);
    assert_eq!(config.router.pending_retry_interval_seconds, 5);
    assert_eq!(config.router.completed_history_limit, 100);
    assert_eq!(config.scheduler.health_check_interval_seconds, 60);
    assert_eq!(config.resilience.retry.max_attempts, 3);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, "pretty");
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[registry]
heartbeat_timeout_seconds = 45

[router]
completed_history_limit = 50
pending_warn_threshold = 10

[resilience.circuit_breaker]
failure_threshold = 3
call_timeout_seconds = 5

[resilience.circuit_breaker.rate_limit]
max_requests_per_second = 100

[resilience.retry]
max_attempts = 5

[logging]
level = "debug"
format = "json"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.registry.heartbeat_timeout_seconds, 45);
    // 未出现的字段保持默认值
    assert_eq!(config.registry.health_check_interval_seconds, 30);
    assert_eq!(config.router.completed_history_limit, 50);
    assert_eq!(config.router.pending_warn_threshold, 10);
    assert_eq!(config.resilience.circuit_breaker.failure_threshold, 3);
    assert_eq!(config.resilience.circuit_breaker.success_threshold, 2);
    assert_eq!(config.resilience.circuit_breaker.call_timeout_seconds, Some(5));
    assert_eq!(
        config.resilience.circuit_breaker.rate_limit.max_requests_per_second,
        100
    );
    assert_eq!(config.resilience.circuit_breaker.rate_limit.burst_size, 20);
    assert_eq!(config.resilience.retry.max_attempts, 5);
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_config_to_toml() {
    let config = AppConfig::default();
    let toml_str = config.to_toml().unwrap();
    assert!(toml_str.contains("[registry]"));
    assert!(toml_str.contains("heartbeat_timeout_seconds = 90"));

    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_invalid_toml_format() {
    let result = AppConfig::from_toml("[router\ncompleted_history_limit = ");
    assert!(result.is_err());
}
