use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use orchestrator_core::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, DeadLetterRegistry,
    OrchestratorError, OrchestratorResult,
};

fn fast_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        open_timeout_seconds: 30,
        ..Default::default()
    }
}

async fn failing() -> OrchestratorResult<u32> {
    Err(OrchestratorError::operation_failed("crm down"))
}

async fn succeeding() -> OrchestratorResult<u32> {
    Ok(7)
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_and_failures_are_dead_lettered() {
    let breakers = CircuitBreakerRegistry::new(fast_config());
    let dead_letters = DeadLetterRegistry::new(2);
    let breaker = breakers.get_or_create("crm", None).await;
    let queue = dead_letters.get_or_create("crm-sync", None).await;

    for attempt in 0..4 {
        if let Err(e) = breaker.call(failing).await {
            let context = HashMap::from([("attempt".to_string(), json!(attempt))]);
            queue.add("crm:sync", &e, context).await;
        }
    }
    assert_eq!(breaker.state().await, CircuitState::Open);

    // 容量为2，只保留最近的两条
    let entries = queue.get_all().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].context["attempt"], json!(2));
    assert_eq!(entries[1].error_kind, "circuit_open");

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(breaker.call(succeeding).await.unwrap(), 7);
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    assert_eq!(breaker.call(succeeding).await.unwrap(), 7);
    assert_eq!(breaker.state().await, CircuitState::Closed);

    let metrics = breakers.all_metrics().await;
    assert_eq!(metrics["crm"].rejected_calls, 1);
    assert_eq!(metrics["crm"].failed_calls, 3);
    assert_eq!(dead_letters.sizes().await["crm-sync"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_rejects_without_waiting_for_tokens() {
    let mut config = fast_config();
    config.rate_limit.max_requests_per_second = 1;
    config.rate_limit.burst_size = 1;
    let breakers = CircuitBreakerRegistry::new(config);
    let breaker = breakers.get_or_create("slow", None).await;
    breaker.force_open().await;

    let started = tokio::time::Instant::now();
    for _ in 0..5 {
        let err = breaker.call(succeeding).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CircuitOpen { .. }));
    }
    assert_eq!(started.elapsed(), Duration::ZERO);
}
