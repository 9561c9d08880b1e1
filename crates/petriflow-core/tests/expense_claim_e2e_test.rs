// End-to-end run of a specification loaded from its YAML document.

use assert_matches::assert_matches;
use petriflow_core::{CaseStatus, CoreError, SpecificationKey, SpecificationModel, WorkItemStatus};
use petriflow_state_inmemory::InMemoryStoreProvider;
use petriflow_test_utils::assertions::{assert_tokens, assert_work_items};
use petriflow_test_utils::builders::enabled_in;
use petriflow_test_utils::fixtures::{EXPENSE_CLAIM, EXPENSE_CLAIM_YAML};
use petriflow_test_utils::TestEngine;
use serde_json::json;
use std::sync::Arc;

async fn expense_engine() -> anyhow::Result<(TestEngine, SpecificationKey)> {
    let provider = Arc::new(InMemoryStoreProvider::new());
    let key = provider
        .specification_loader()
        .register_yaml(EXPENSE_CLAIM_YAML)
        .await?;
    let env = TestEngine::builder().with_provider(provider).build().await;
    Ok((env, key))
}

#[test]
fn test_document_compiles() -> anyhow::Result<()> {
    let model = SpecificationModel::from_yaml(EXPENSE_CLAIM_YAML)?;
    assert_eq!(model.key(), &SpecificationKey::new(EXPENSE_CLAIM, "1"));
    Ok(())
}

#[tokio::test]
async fn test_small_claim_is_paid_automatically() -> anyhow::Result<()> {
    let (env, key) = expense_engine().await?;
    let outcome = env.launch("claim-1", &key, json!({"claimant": "kim"})).await?;
    let case = outcome.case_id.clone();
    assert_eq!(enabled_in(&outcome, "assess").len(), 1);

    let done = env.perform(&case, "assess", json!({"amount": 200})).await?;
    assert_eq!(done.status, CaseStatus::Completed);

    let state = env.state(&case).await?;
    assert_tokens(&state, "settled", 1)?;
    assert_work_items(&state, "notify", WorkItemStatus::Enabled, 0)?;
    let data = &state.root()?.data;
    assert_eq!(data.get("claimant"), Some(&json!("kim")));
    assert_eq!(data.get("amount"), Some(&json!(200)));
    assert_eq!(env.listener.count("case.completed"), 1);
    Ok(())
}

#[tokio::test]
async fn test_large_claim_is_rejected_with_notice() -> anyhow::Result<()> {
    let (env, key) = expense_engine().await?;
    let outcome = env.launch("claim-2", &key, json!({"claimant": "lee"})).await?;
    let case = outcome.case_id.clone();

    let assessed = env.perform(&case, "assess", json!({"amount": 900})).await?;
    assert_eq!(assessed.status, CaseStatus::Running);
    assert_eq!(enabled_in(&assessed, "notify").len(), 1);

    let state = env.state(&case).await?;
    assert_tokens(&state, "approved", 0)?;
    assert_tokens(&state, "rejected", 1)?;

    let done = env.perform(&case, "notify", json!({})).await?;
    assert_eq!(done.status, CaseStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn test_assessment_needs_numeric_amount() -> anyhow::Result<()> {
    let (env, key) = expense_engine().await?;
    let outcome = env.launch("claim-3", &key, json!({})).await?;
    let case = outcome.case_id.clone();

    let result = env.perform(&case, "assess", json!({"amount": "lots"})).await;
    assert_matches!(result, Err(CoreError::ValidationError(_)));

    let state = env.state(&case).await?;
    assert_work_items(&state, "assess", WorkItemStatus::Executing, 1)?;
    Ok(())
}
