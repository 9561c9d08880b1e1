use crate::InMemoryStoreProvider;
use chrono::Utc;
use petriflow_core::{
    CaseCommand, CaseEvent, CaseId, CaseSnapshot, CaseState, CoreError, DataPacket, EventStore,
    NetDefinition, SnapshotStore, SpecificationDefinition, SpecificationId, SpecificationKey,
    SpecificationLoader, TaskDefinition,
};

fn launch(case: &str, spec: &str) -> CaseEvent {
    CaseEvent {
        case_id: CaseId::from(case),
        sequence: 1,
        timestamp: Utc::now(),
        command: CaseCommand::Launch {
            specification: SpecificationKey::new(spec, "1"),
            data: DataPacket::empty(),
        },
    }
}

fn follow_up(case: &str, sequence: u64) -> CaseEvent {
    CaseEvent {
        case_id: CaseId::from(case),
        sequence,
        timestamp: Utc::now(),
        command: CaseCommand::SuspendCase,
    }
}

#[tokio::test]
async fn test_event_log_appends_in_order() -> Result<(), CoreError> {
    let provider = InMemoryStoreProvider::new();
    let (events, _, _) = provider.create_repositories();
    let case = CaseId::from("c1");

    assert_eq!(events.append(&case, 0, launch("c1", "order")).await?, 1);
    assert_eq!(events.append(&case, 1, follow_up("c1", 2)).await?, 2);

    let all = events.load_events(&case, 0).await?;
    assert_eq!(all.len(), 2);
    let tail = events.load_events(&case, 1).await?;
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].sequence, 2);
    Ok(())
}

#[tokio::test]
async fn test_stale_writer_gets_conflict() -> Result<(), CoreError> {
    let provider = InMemoryStoreProvider::new();
    let events = provider.event_store();
    let case = CaseId::from("c1");
    events.append(&case, 0, launch("c1", "order")).await?;
    events.append(&case, 1, follow_up("c1", 2)).await?;

    let result = events.append(&case, 1, follow_up("c1", 2)).await;
    assert_eq!(
        result,
        Err(CoreError::ConcurrencyConflict {
            case_id: "c1".to_string(),
            expected: 1,
            actual: 2,
        })
    );
    assert_eq!(events.last_sequence(&case).await, 2);
    Ok(())
}

#[tokio::test]
async fn test_log_must_start_with_launch() {
    let provider = InMemoryStoreProvider::new();
    let events = provider.event_store();
    let result = events
        .append(&CaseId::from("c1"), 0, follow_up("c1", 1))
        .await;
    assert!(matches!(result, Err(CoreError::StoreError(_))));
    assert_eq!(events.case_count().await, 0);
}

#[tokio::test]
async fn test_out_of_sequence_event_rejected() -> Result<(), CoreError> {
    let provider = InMemoryStoreProvider::new();
    let events = provider.event_store();
    let case = CaseId::from("c1");
    events.append(&case, 0, launch("c1", "order")).await?;

    let result = events.append(&case, 1, follow_up("c1", 5)).await;
    assert!(matches!(result, Err(CoreError::StoreError(_))));

    let wrong_case = events.append(&case, 1, follow_up("c2", 2)).await;
    assert!(matches!(wrong_case, Err(CoreError::StoreError(_))));
    Ok(())
}

#[tokio::test]
async fn test_case_ids_by_specification() -> Result<(), CoreError> {
    let provider = InMemoryStoreProvider::new();
    let events = provider.event_store();
    events.append(&CaseId::from("b"), 0, launch("b", "order")).await?;
    events.append(&CaseId::from("a"), 0, launch("a", "order")).await?;
    events.append(&CaseId::from("x"), 0, launch("x", "invoice")).await?;

    let ids = events.load_case_ids(&SpecificationId::from("order")).await?;
    assert_eq!(ids, vec![CaseId::from("a"), CaseId::from("b")]);
    Ok(())
}

#[tokio::test]
async fn test_export_is_json_lines() -> Result<(), CoreError> {
    let provider = InMemoryStoreProvider::new();
    let events = provider.event_store();
    let case = CaseId::from("c1");
    events.append(&case, 0, launch("c1", "order")).await?;
    events.append(&case, 1, follow_up("c1", 2)).await?;

    let exported = events.export(&case).await?;
    let decoded: Vec<CaseEvent> = exported
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(decoded, events.load_events(&case, 0).await?);
    Ok(())
}

#[tokio::test]
async fn test_snapshot_store_keeps_latest() -> Result<(), CoreError> {
    let provider = InMemoryStoreProvider::new();
    let (_, snapshots, _) = provider.create_repositories();
    let case = CaseId::from("c1");
    let state = CaseState::new(case.clone(), SpecificationKey::new("order", "1"), Utc::now());

    let newer = CaseSnapshot {
        case_id: case.clone(),
        sequence: 10,
        state: state.clone(),
    };
    let older = CaseSnapshot {
        case_id: case.clone(),
        sequence: 5,
        state,
    };
    snapshots.save(&newer).await?;
    snapshots.save(&older).await?;
    assert_eq!(snapshots.load_latest(&case).await?.map(|s| s.sequence), Some(10));

    snapshots.delete(&case).await?;
    assert!(snapshots.load_latest(&case).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_specification_loader() -> Result<(), CoreError> {
    let provider = InMemoryStoreProvider::new();
    let loader = provider.specification_loader();
    let model = SpecificationDefinition::new(
        "order",
        "1",
        NetDefinition::new("main", "i", "o")
            .task(TaskDefinition::automatic("t"))
            .flow("i", "t")
            .flow("t", "o"),
    )
    .compile()?;
    let key = loader.register(model).await;

    let (_, _, shared) = provider.create_repositories();
    assert_eq!(shared.load(&key).await?.key(), &key);

    let missing = shared.load(&SpecificationKey::new("order", "2")).await;
    assert!(matches!(missing, Err(CoreError::SpecificationNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_register_yaml_rejects_broken_document() {
    let provider = InMemoryStoreProvider::new();
    let loader = provider.specification_loader();
    assert!(loader.register_yaml("id: [unterminated").await.is_err());
    assert!(loader.keys().await.is_empty());
}
