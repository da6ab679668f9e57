mod common;

use common::{MockBrowser, MockReasoner, SlowBrowser};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tandem_common::category::ErrorCategory;
use tandem_common::protocol::{BrowserError, Locator, Primitive};
use tandem_common::report::RecoveryStatus;
use tandem_common::spec::{
    ExecutionPath, FallbackPath, IntentSpec, ParamSpec, StepSpec, ValidationError,
};
use tandem_core::categorize::categorize;
use tandem_core::orchestrator::OrchestratorError;
use tandem_core::{Orchestrator, TandemConfig};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> TandemConfig {
    let mut config = TandemConfig::default();
    config.library.path = dir.path().join("solutions.json");
    config.execution.screenshot_dir = dir.path().join("screenshots");
    config
}

fn click_step(name: &str, selector: &str) -> StepSpec {
    StepSpec {
        name: name.to_string(),
        instruction: format!("click {}", name),
        snippet: vec![Primitive::Click {
            locator: Locator::Css(selector.to_string()),
        }],
        preferred: None,
        fallback: FallbackPath::None,
        locator: None,
        value: None,
    }
}

fn spec_with(steps: Vec<StepSpec>) -> IntentSpec {
    IntentSpec {
        name: "demo".to_string(),
        url: "https://example.com".to_string(),
        params: Vec::new(),
        default_path: ExecutionPath::Deterministic,
        steps,
    }
}

#[tokio::test]
async fn test_all_deterministic_steps_succeed() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        test_config(&dir),
        Arc::new(MockReasoner::performed()),
    )
    .await;
    let spec = spec_with(vec![
        click_step("open_menu", "#menu"),
        click_step("pick_item", "#item"),
        StepSpec {
            preferred: Some(ExecutionPath::Semantic),
            ..click_step("accept_terms", "#terms")
        },
        click_step("enter_address", "#address"),
        click_step("checkout", "#checkout"),
    ]);
    let mut browser = MockBrowser::new();

    let report = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await
        .unwrap();

    assert!(report.overall_success);
    assert_eq!(report.success_count(), 5);
    assert_eq!(report.snippet_usage_count + report.ai_usage_count, 5);
    assert_eq!(report.ai_usage_count, 1);
    assert_eq!(report.fallback_count, 0);
    assert_eq!(browser.calls_matching("goto"), 1);
}

#[tokio::test]
async fn test_cancellation_skips_remaining_steps() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        test_config(&dir),
        Arc::new(MockReasoner::performed()),
    )
    .await;
    let spec = spec_with(vec![
        click_step("open_menu", "#menu"),
        click_step("checkout", "#checkout"),
    ]);
    let mut browser = MockBrowser::new();

    orchestrator.cancel_token().cancel();
    let report = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await
        .unwrap();

    assert!(!report.overall_success);
    assert!(report
        .steps
        .iter()
        .all(|s| s.recovery == RecoveryStatus::Skipped));
    assert_eq!(report.executed_steps().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_the_step_in_flight() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        test_config(&dir),
        Arc::new(MockReasoner::performed()),
    )
    .await;
    let spec = spec_with(vec![
        click_step("open_menu", "#menu"),
        click_step("checkout", "#checkout"),
    ]);
    let mut browser = SlowBrowser::new(Duration::from_secs(3));

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });
    let report = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await
        .unwrap();

    assert!(!report.overall_success);
    assert!(report
        .steps
        .iter()
        .all(|s| s.recovery == RecoveryStatus::Skipped));
    // The stalled click was abandoned at its suspension point, not driven
    // to completion.
    assert!(browser.completed.iter().all(|c| !c.starts_with("click")));
}

#[tokio::test(start_paused = true)]
async fn test_slow_step_yields_timeout_failure() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.execution.action_timeout_ms = 60_000;
    config.execution.step_timeout_ms = 500;
    let orchestrator = Orchestrator::new(config, Arc::new(MockReasoner::performed())).await;
    let spec = spec_with(vec![click_step("open_menu", "#menu")]);
    let mut browser = SlowBrowser::new(Duration::from_secs(120));

    let report = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await
        .unwrap();

    let step = &report.steps[0];
    assert!(!step.success);
    let error = step.error.as_deref().unwrap();
    assert!(error.contains("timed out"), "got: {}", error);
    assert_eq!(categorize(error).category, ErrorCategory::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_run_budget_caps_slow_steps_and_skips_the_rest() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.execution.action_timeout_ms = 60_000;
    config.execution.step_timeout_ms = 60_000;
    config.execution.run_timeout_ms = 200;
    let orchestrator = Orchestrator::new(config, Arc::new(MockReasoner::performed())).await;
    let spec = spec_with(vec![
        click_step("open_menu", "#menu"),
        click_step("pick_item", "#item"),
        click_step("checkout", "#checkout"),
    ]);
    let mut browser = SlowBrowser::new(Duration::from_secs(10));

    let report = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await
        .unwrap();

    assert!(!report.overall_success);
    let first = &report.steps[0];
    assert!(!first.success);
    let error = first.error.as_deref().unwrap();
    assert!(error.contains("timed out"), "got: {}", error);
    assert_eq!(categorize(error).category, ErrorCategory::Timeout);
    assert_eq!(report.steps[1].recovery, RecoveryStatus::Skipped);
    assert_eq!(report.steps[2].recovery, RecoveryStatus::Skipped);
}

#[tokio::test]
async fn test_missing_required_parameter_runs_nothing() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        test_config(&dir),
        Arc::new(MockReasoner::performed()),
    )
    .await;
    let mut spec = spec_with(vec![StepSpec {
        value: Some("{{USERNAME}}".to_string()),
        ..click_step("login", "#login")
    }]);
    spec.params.push(ParamSpec {
        name: "USERNAME".to_string(),
        required: true,
        default: None,
        description: None,
    });
    let mut browser = MockBrowser::new();

    let result = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::Validation(
            ValidationError::MissingParameter(ref name)
        )) if name == "USERNAME"
    ));
    // Fails before any browser traffic, navigation included.
    assert!(browser.calls.is_empty());
}

#[tokio::test]
async fn test_unreachable_url_is_fatal() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        test_config(&dir),
        Arc::new(MockReasoner::performed()),
    )
    .await;
    let spec = spec_with(vec![click_step("open_menu", "#menu")]);
    let mut browser = MockBrowser::new().fail_on(
        "https://example.com",
        BrowserError::NavigationFailed("connection refused".to_string()),
        u32::MAX,
    );

    let result = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await;
    assert!(matches!(result, Err(OrchestratorError::Navigation { .. })));
}

#[tokio::test]
async fn test_failed_snippet_falls_back_to_semantic_path() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        test_config(&dir),
        Arc::new(MockReasoner::performed()),
    )
    .await;
    let spec = spec_with(vec![
        click_step("open_menu", "#menu"),
        StepSpec {
            fallback: FallbackPath::Semantic,
            ..click_step("checkout", "#checkout")
        },
    ]);
    // A script error has no built-in remedy and stays below the escalation
    // threshold, so recovery exhausts and the path switch happens.
    let mut browser = MockBrowser::new().fail_on(
        "#checkout",
        BrowserError::Script("boom".to_string()),
        u32::MAX,
    );

    let report = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await
        .unwrap();

    assert!(report.overall_success);
    let step = &report.steps[1];
    assert!(step.success);
    assert_eq!(step.path_used, ExecutionPath::Semantic);
    assert!(step.fallback_occurred);
    assert_eq!(step.recovery, RecoveryStatus::RecoveredViaFallback);
    assert!(!report.steps[0].fallback_occurred);
    assert_eq!(report.fallback_count, 1);
    assert_eq!(report.ai_usage_count, 1);
    assert_eq!(report.snippet_usage_count, 1);
}

#[tokio::test]
async fn test_recovery_on_preferred_path_is_not_a_fallback() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        test_config(&dir),
        Arc::new(MockReasoner::performed()),
    )
    .await;
    let spec = spec_with(vec![StepSpec {
        fallback: FallbackPath::Semantic,
        locator: Some(Locator::Text("Checkout".to_string())),
        ..click_step("checkout", "#checkout")
    }]);
    // The original selector is gone, but the alternate-locator strategy
    // finds the element by visible text.
    let mut browser = MockBrowser::new().fail_on(
        "#checkout",
        BrowserError::ElementNotFound {
            locator: "css=#checkout".to_string(),
        },
        u32::MAX,
    );

    let report = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await
        .unwrap();

    let step = &report.steps[0];
    assert!(step.success);
    assert_eq!(step.path_used, ExecutionPath::Deterministic);
    assert!(!step.fallback_occurred);
    assert_eq!(step.recovery, RecoveryStatus::RecoveredInPath);
    assert_eq!(report.fallback_count, 0);
}

#[tokio::test]
async fn test_halt_on_failure_skips_remaining_steps() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.execution.halt_on_failure = true;
    let orchestrator = Orchestrator::new(config, Arc::new(MockReasoner::performed())).await;
    let spec = spec_with(vec![
        click_step("open_menu", "#menu"),
        click_step("pick_item", "#item"),
        click_step("checkout", "#checkout"),
    ]);
    let mut browser = MockBrowser::new().fail_on(
        "#menu",
        BrowserError::Script("boom".to_string()),
        u32::MAX,
    );

    let report = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await
        .unwrap();

    assert!(!report.overall_success);
    assert!(!report.steps[0].success);
    assert_eq!(report.steps[1].recovery, RecoveryStatus::Skipped);
    assert_eq!(report.steps[2].recovery, RecoveryStatus::Skipped);
    // Skipped steps do not count toward path usage.
    assert_eq!(report.snippet_usage_count, 1);
    // The failed step is named in the suggestions.
    assert!(report
        .suggestions
        .iter()
        .any(|s| s.contains("open_menu")));
}

#[tokio::test]
async fn test_failure_without_fallback_does_not_stop_later_steps() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        test_config(&dir),
        Arc::new(MockReasoner::performed()),
    )
    .await;
    let spec = spec_with(vec![
        click_step("open_menu", "#menu"),
        click_step("checkout", "#checkout"),
    ]);
    let mut browser = MockBrowser::new().fail_on(
        "#menu",
        BrowserError::Script("boom".to_string()),
        u32::MAX,
    );

    let report = orchestrator
        .execute(&spec, &HashMap::new(), &mut browser)
        .await
        .unwrap();

    assert!(!report.overall_success);
    assert_eq!(report.steps[0].recovery, RecoveryStatus::NotAttempted);
    assert!(report.steps[1].success);
    assert_eq!(report.success_count(), 1);
}
