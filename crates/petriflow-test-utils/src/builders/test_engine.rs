//! Stateless engine wired to the in-memory stores.

use serde_json::Value;
use std::sync::Arc;

use petriflow_core::{
    CaseId, CaseOutcome, CaseState, CoreError, DataPacket, EngineConfig, EventAnnouncer,
    EventStore, SpecificationKey, SpecificationModel, StatelessEngine, WorkItem, WorkItemStatus,
};
use petriflow_state_inmemory::InMemoryStoreProvider;

use crate::assertions::items_of;
use crate::implementations::RecordingListener;

/// Engine plus the stores and listener behind it
pub struct TestEngine {
    /// The engine under test
    pub engine: StatelessEngine,
    /// Storage shared by every engine built over it
    pub provider: Arc<InMemoryStoreProvider>,
    /// Listener registered on the engine's announcer
    pub listener: Arc<RecordingListener>,
}

impl TestEngine {
    /// Start building a test engine
    pub fn builder() -> TestEngineBuilder {
        TestEngineBuilder::default()
    }

    /// A second engine over the same storage, as another worker would see it
    pub fn sibling(&self) -> StatelessEngine {
        let (events, snapshots, loader) = self.provider.create_repositories();
        StatelessEngine::new(events, loader)
            .with_snapshots(snapshots)
            .with_config(self.engine.config().clone())
    }

    /// Launch a case of a fixture specification under a chosen id
    pub async fn launch(
        &self,
        case_id: &str,
        specification: &SpecificationKey,
        data: Value,
    ) -> Result<CaseOutcome, CoreError> {
        self.engine
            .launch_case_with_id(CaseId::from(case_id), specification, DataPacket::new(data))
            .await
    }

    /// The first live work item of `task` with `status`
    pub async fn item(
        &self,
        case_id: &CaseId,
        task: &str,
        status: WorkItemStatus,
    ) -> Result<WorkItem, CoreError> {
        let state = self.engine.get_case_state(case_id).await?;
        items_of(&state, task, status)
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::WorkItemNotFound(format!("{} ({:?})", task, status)))
    }

    /// Check out and complete the first enabled item of `task`
    pub async fn perform(
        &self,
        case_id: &CaseId,
        task: &str,
        output: Value,
    ) -> Result<CaseOutcome, CoreError> {
        let item = self.item(case_id, task, WorkItemStatus::Enabled).await?;
        self.engine.checkout_work_item(case_id, &item.id).await?;
        self.engine
            .complete_work_item(case_id, &item.id, DataPacket::new(output))
            .await
    }

    /// Current state of a case
    pub async fn state(&self, case_id: &CaseId) -> Result<CaseState, CoreError> {
        self.engine.get_case_state(case_id).await
    }
}

/// Builder for [`TestEngine`]
#[derive(Default)]
pub struct TestEngineBuilder {
    config: Option<EngineConfig>,
    specifications: Vec<SpecificationModel>,
    without_snapshots: bool,
    event_store: Option<Arc<dyn EventStore>>,
    provider: Option<Arc<InMemoryStoreProvider>>,
}

impl TestEngineBuilder {
    /// Use a specific engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register a specification with the loader
    pub fn with_specification(mut self, model: SpecificationModel) -> Self {
        self.specifications.push(model);
        self
    }

    /// Register several specifications with the loader
    pub fn with_specifications(mut self, models: Vec<SpecificationModel>) -> Self {
        self.specifications.extend(models);
        self
    }

    /// Replay every case from its full log
    pub fn without_snapshots(mut self) -> Self {
        self.without_snapshots = true;
        self
    }

    /// Put another event store in front of the in-memory one
    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Reuse existing storage
    pub fn with_provider(mut self, provider: Arc<InMemoryStoreProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Register the specifications and wire the engine
    pub async fn build(self) -> TestEngine {
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(InMemoryStoreProvider::new()));
        let loader = provider.specification_loader();
        for model in self.specifications {
            loader.register(model).await;
        }

        let (events, snapshots, loader) = provider.create_repositories();
        let events = self.event_store.unwrap_or(events);
        let listener = Arc::new(RecordingListener::new());
        let announcer = Arc::new(EventAnnouncer::new());
        announcer.add_listener(listener.clone());

        let mut engine = StatelessEngine::new(events, loader)
            .with_announcer(announcer)
            .with_config(self.config.unwrap_or_default());
        if !self.without_snapshots {
            engine = engine.with_snapshots(snapshots);
        }

        TestEngine {
            engine,
            provider,
            listener,
        }
    }
}

/// Work items of `task` with `status` in an outcome's enabled list
pub fn enabled_in(outcome: &CaseOutcome, task: &str) -> Vec<WorkItem> {
    outcome
        .enabled
        .iter()
        .filter(|wi| wi.task_id.as_str() == task && wi.status == WorkItemStatus::Enabled)
        .cloned()
        .collect()
}
