//! Net fixtures built with the specification builders.

use petriflow_core::{
    CoreError, CreationMode, Flow, JoinKind, MultiInstance, NetDefinition, OutputParam,
    ParamType, SpecificationDefinition, SpecificationModel, SplitKind, TaskDefinition,
    TimerParams, TimerTrigger,
};

/// AND-split/AND-join: `A` fans out to `B` and `C`, `D` waits for both
pub const SCENARIO_A: &str = "scenario-a";
/// XOR-split choosing one branch, both branches meeting at an OR-join
pub const SCENARIO_B: &str = "scenario-b";
/// Review repeated while the reviewer asks for rework
pub const REWORK_LOOP: &str = "rework-loop";
/// Static multi-instance review, max 5 and threshold 3
pub const THRESHOLD_REVIEW: &str = "threshold-review";
/// Dynamic multi-instance review, max 3 and threshold 2
pub const DYNAMIC_REVIEW: &str = "dynamic-review";
/// `withdraw` cancels the parallel `work` branch
pub const CANCELLATION_REGION: &str = "cancellation-region";
/// `accept` and `reject` race for the same token
pub const DEFERRED_CHOICE: &str = "deferred-choice";
/// Composite task running a picking sub-net
pub const NESTED_SUBNET: &str = "nested-subnet";
/// Two OR-joins each waiting on the other
pub const VICIOUS_CIRCLE: &str = "vicious-circle";
/// Approval with a 30 second timer from the moment it is offered
pub const TIMED_APPROVAL: &str = "timed-approval";
/// Approval whose output must carry a boolean `approved`
pub const VALIDATED_APPROVAL: &str = "validated-approval";

/// Timer duration of [`timed_approval`]
pub const APPROVAL_TIMEOUT_MS: u64 = 30_000;

fn manual_step() -> Vec<OutputParam> {
    Vec::new()
}

/// c0 -> A (automatic, AND-split) -> B, C -> D (AND-join) -> c1
pub fn and_split_join() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        SCENARIO_A,
        "1",
        NetDefinition::new("main", "c0", "c1")
            .task(TaskDefinition::automatic("A"))
            .task(TaskDefinition::atomic("B", "manual"))
            .task(TaskDefinition::atomic("C", "manual"))
            .task(TaskDefinition::atomic("D", "manual"))
            .flow("c0", "A")
            .flow("A", "B")
            .flow("A", "C")
            .flow("B", "D")
            .flow("C", "D")
            .flow("D", "c1"),
    )
    .manual("manual", manual_step())
    .compile()
}

/// c0 -> A (XOR on `branch`) -> branch1 | branch2 -> merge (OR-join) -> c1
pub fn xor_then_or_join() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        SCENARIO_B,
        "1",
        NetDefinition::new("main", "c0", "c1")
            .condition("b1")
            .condition("b2")
            .task(TaskDefinition::automatic("A").split(SplitKind::Xor))
            .task(TaskDefinition::atomic("branch1", "manual"))
            .task(TaskDefinition::atomic("branch2", "manual"))
            .task(TaskDefinition::atomic("merge", "manual").join(JoinKind::Or))
            .flow("c0", "A")
            .with_flow(Flow::guarded("A", "b1", "branch == 'one'", 0))
            .with_flow(Flow::default_branch("A", "b2", 1))
            .flow("b1", "branch1")
            .flow("b2", "branch2")
            .flow("branch1", "merge")
            .flow("branch2", "merge")
            .flow("merge", "c1"),
    )
    .manual("manual", manual_step())
    .compile()
}

/// draft -> review, looping back while the output sets `rework`
pub fn rework_loop() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        REWORK_LOOP,
        "1",
        NetDefinition::new("main", "i", "o")
            .condition("drafted")
            .task(TaskDefinition::automatic("draft"))
            .task(
                TaskDefinition::atomic("review", "manual")
                    .join(JoinKind::Xor)
                    .split(SplitKind::Xor),
            )
            .flow("i", "draft")
            .flow("draft", "drafted")
            .flow("drafted", "review")
            .with_flow(Flow::guarded("review", "drafted", "rework", 0))
            .with_flow(Flow::default_branch("review", "o", 1)),
    )
    .manual("manual", manual_step())
    .compile()
}

/// One review child per element of `reviewers`, then `decide`
pub fn threshold_review() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        THRESHOLD_REVIEW,
        "1",
        NetDefinition::new("main", "i", "o")
            .task(
                TaskDefinition::atomic("review", "manual").multi_instance(MultiInstance {
                    min: 1,
                    max: 5,
                    threshold: 3,
                    creation: CreationMode::Static,
                    splitter: Some("reviewers".to_string()),
                }),
            )
            .task(TaskDefinition::atomic("decide", "manual"))
            .flow("i", "review")
            .flow("review", "decide")
            .flow("decide", "o"),
    )
    .manual("manual", manual_step())
    .compile()
}

/// One review child at launch; up to three may be added while it runs
pub fn dynamic_review() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        DYNAMIC_REVIEW,
        "1",
        NetDefinition::new("main", "i", "o")
            .task(
                TaskDefinition::atomic("review", "manual").multi_instance(MultiInstance {
                    min: 1,
                    max: 3,
                    threshold: 2,
                    creation: CreationMode::Dynamic,
                    splitter: None,
                }),
            )
            .flow("i", "review")
            .flow("review", "o"),
    )
    .manual("manual", manual_step())
    .compile()
}

/// fork -> work | withdraw -> close; completing withdraw clears work
pub fn cancellation_region() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        CANCELLATION_REGION,
        "1",
        NetDefinition::new("main", "i", "o")
            .condition("to_work")
            .condition("to_guard")
            .condition("done")
            .task(TaskDefinition::automatic("fork"))
            .task(TaskDefinition::atomic("work", "manual"))
            .task(TaskDefinition::atomic("withdraw", "manual").cancels(&["work", "to_work"]))
            .task(TaskDefinition::atomic("close", "manual").join(JoinKind::Xor))
            .flow("i", "fork")
            .flow("fork", "to_work")
            .flow("fork", "to_guard")
            .flow("to_work", "work")
            .flow("to_guard", "withdraw")
            .flow("work", "done")
            .flow("withdraw", "done")
            .flow("done", "close")
            .flow("close", "o"),
    )
    .manual("manual", manual_step())
    .compile()
}

/// `accept` and `reject` are both offered; starting one withdraws the other
pub fn deferred_choice() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        DEFERRED_CHOICE,
        "1",
        NetDefinition::new("main", "i", "o")
            .task(TaskDefinition::atomic("accept", "manual"))
            .task(TaskDefinition::atomic("reject", "manual"))
            .flow("i", "accept")
            .flow("i", "reject")
            .flow("accept", "o")
            .flow("reject", "o"),
    )
    .manual("manual", manual_step())
    .compile()
}

/// `fulfil` runs the `picking` sub-net: pick -> pack
pub fn nested_subnet() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        NESTED_SUBNET,
        "1",
        NetDefinition::new("main", "i", "o")
            .task(TaskDefinition::composite("fulfil", "fulfilment"))
            .task(TaskDefinition::atomic("invoice", "manual"))
            .flow("i", "fulfil")
            .flow("fulfil", "invoice")
            .flow("invoice", "o"),
    )
    .net(
        NetDefinition::new("picking", "pi", "po")
            .task(TaskDefinition::atomic("pick", "manual"))
            .task(TaskDefinition::automatic("pack"))
            .flow("pi", "pick")
            .flow("pick", "pack")
            .flow("pack", "po"),
    )
    .manual("manual", manual_step())
    .subnet("fulfilment", "picking")
    .compile()
}

/// Two OR-joins whose only other input is fed by the other join
pub fn or_join_vicious_circle() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        VICIOUS_CIRCLE,
        "1",
        NetDefinition::new("main", "i", "o")
            .condition("p1")
            .condition("p2")
            .condition("q1")
            .condition("q2")
            .task(TaskDefinition::automatic("start"))
            .task(
                TaskDefinition::automatic("j1")
                    .join(JoinKind::Or)
                    .split(SplitKind::Xor),
            )
            .task(
                TaskDefinition::automatic("j2")
                    .join(JoinKind::Or)
                    .split(SplitKind::Xor),
            )
            .task(TaskDefinition::automatic("end").join(JoinKind::Xor))
            .flow("i", "start")
            .flow("start", "p1")
            .flow("start", "p2")
            .flow("p1", "j1")
            .flow("q1", "j1")
            .flow("p2", "j2")
            .flow("q2", "j2")
            .with_flow(Flow::guarded("j1", "q2", "again", 0))
            .with_flow(Flow::default_branch("j1", "end", 1))
            .with_flow(Flow::guarded("j2", "q1", "again", 0))
            .with_flow(Flow::default_branch("j2", "end", 1))
            .flow("end", "o"),
    )
    .compile()
}

/// Approval that times out [`APPROVAL_TIMEOUT_MS`] after it is offered
pub fn timed_approval() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        TIMED_APPROVAL,
        "1",
        NetDefinition::new("main", "i", "o")
            .task(TaskDefinition::atomic("approve", "manual").timer(TimerParams {
                trigger: TimerTrigger::OnEnabled,
                duration_ms: APPROVAL_TIMEOUT_MS,
            }))
            .flow("i", "approve")
            .flow("approve", "o"),
    )
    .manual("manual", manual_step())
    .compile()
}

/// Approval requiring `approved: boolean`, optionally `comment: string`
pub fn validated_approval() -> Result<SpecificationModel, CoreError> {
    SpecificationDefinition::new(
        VALIDATED_APPROVAL,
        "1",
        NetDefinition::new("main", "i", "o")
            .task(TaskDefinition::atomic("approve", "approval"))
            .flow("i", "approve")
            .flow("approve", "o"),
    )
    .manual(
        "approval",
        vec![
            OutputParam {
                name: "approved".to_string(),
                param_type: ParamType::Boolean,
                required: true,
            },
            OutputParam {
                name: "comment".to_string(),
                param_type: ParamType::String,
                required: false,
            },
        ],
    )
    .compile()
}
