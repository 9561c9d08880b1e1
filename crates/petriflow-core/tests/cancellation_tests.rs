// Cancelling a case while another command on the same engine is still
// cascading through it.

use assert_matches::assert_matches;
use petriflow_core::{
    CaseId, CaseStatus, CoreError, DataPacket, JmesPathEvaluator, PredicateEvaluator,
    StatelessEngine,
};
use petriflow_state_inmemory::InMemoryStoreProvider;
use petriflow_test_utils::builders::enabled_in;
use petriflow_test_utils::fixtures;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

/// Holds the first armed evaluation until the test releases it
struct GatedEvaluator {
    armed: AtomicBool,
    entered: Barrier,
    release: Barrier,
}

impl GatedEvaluator {
    fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        }
    }
}

impl PredicateEvaluator for GatedEvaluator {
    fn evaluate(&self, expression: &str, data: &DataPacket) -> Result<bool, CoreError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.wait();
            self.release.wait();
        }
        JmesPathEvaluator.evaluate(expression, data)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_case_aborts_command_in_flight() -> anyhow::Result<()> {
    let provider = InMemoryStoreProvider::new();
    let key = provider
        .specification_loader()
        .register(fixtures::rework_loop()?)
        .await;
    let (events, _, loader) = provider.create_repositories();
    let gate = Arc::new(GatedEvaluator::new());
    let engine = Arc::new(StatelessEngine::new(events, loader).with_predicates(gate.clone()));

    let case = CaseId::from("x-1");
    let launched = engine
        .launch_case_with_id(case.clone(), &key, DataPacket::new(json!({})))
        .await?;
    let review = enabled_in(&launched, "review").remove(0);
    engine.checkout_work_item(&case, &review.id).await?;

    gate.armed.store(true, Ordering::SeqCst);
    let running = {
        let engine = engine.clone();
        let case = case.clone();
        let id = review.id.clone();
        tokio::spawn(async move {
            engine
                .complete_work_item(&case, &id, DataPacket::new(json!({"rework": true})))
                .await
        })
    };

    let entered = gate.clone();
    tokio::task::spawn_blocking(move || entered.entered.wait()).await?;
    assert_eq!(engine.in_flight_cases(), 1);

    let cancelled = engine.cancel_case(&case).await?;
    assert_eq!(cancelled.status, CaseStatus::Cancelled);
    assert_eq!(cancelled.sequence, 3);

    let release = gate.clone();
    tokio::task::spawn_blocking(move || release.release.wait()).await?;
    let result = running.await?;
    assert_matches!(result, Err(CoreError::Aborted(_)));

    let state = engine.get_case_state(&case).await?;
    assert_eq!(state.status, CaseStatus::Cancelled);
    assert_eq!(state.sequence, 3);
    assert_eq!(engine.in_flight_cases(), 0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_without_running_commands_registers_nothing() -> anyhow::Result<()> {
    let provider = InMemoryStoreProvider::new();
    let key = provider
        .specification_loader()
        .register(fixtures::rework_loop()?)
        .await;
    let (events, _, loader) = provider.create_repositories();
    let engine = StatelessEngine::new(events, loader);

    let case = CaseId::from("x-2");
    engine
        .launch_case_with_id(case.clone(), &key, DataPacket::new(json!({})))
        .await?;
    engine.cancel_case(&case).await?;
    assert_eq!(engine.in_flight_cases(), 0);

    let again = engine.cancel_case(&case).await;
    assert_matches!(again, Err(CoreError::CaseNotRunning(_)));
    assert_eq!(engine.in_flight_cases(), 0);
    Ok(())
}
