//! Specification model
//!
//! A specification arrives as a serde-friendly [`SpecificationDefinition`]
//! and is compiled once into an immutable [`SpecificationModel`]. Compilation
//! performs the structural checks the engine relies on and precomputes
//! presets, ordered postsets and loop-back edges for every net.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::identifier::{
    ConditionId, DecompositionId, NetId, SpecificationId, SpecificationKey, TaskId,
};
use crate::CoreError;

/// Split behaviour of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SplitKind {
    /// Every outgoing flow
    #[default]
    And,
    /// Exactly one outgoing flow
    Xor,
    /// One or more outgoing flows
    Or,
}

/// Join behaviour of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// Every incoming condition
    #[default]
    And,
    /// Any incoming condition
    Xor,
    /// Incoming conditions that can still receive a token
    Or,
}

/// What happens when a task fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// No decomposition: fires and completes inside the cascade
    #[default]
    Automatic,
    /// Offered to the outside world as work items
    Atomic {
        /// Manual decomposition describing the expected output
        decomposition: DecompositionId,
    },
    /// Runs a sub-net
    Composite {
        /// Net decomposition to run
        decomposition: DecompositionId,
    },
}

/// How multi-instance children are created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CreationMode {
    /// Instance count fixed when the task fires
    #[default]
    Static,
    /// Further instances may be added while the task runs
    Dynamic,
}

/// Multi-instance parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiInstance {
    /// Minimum instance count
    pub min: u32,
    /// Maximum instance count
    pub max: u32,
    /// Completed children needed before the task exits
    pub threshold: u32,
    /// Static or dynamic instance creation
    #[serde(default)]
    pub creation: CreationMode,
    /// Net data key holding an array, one child per element
    #[serde(default)]
    pub splitter: Option<String>,
}

/// When a task timer starts counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerTrigger {
    /// When the work item is offered
    #[default]
    OnEnabled,
    /// When the work item is checked out
    OnStarted,
}

/// Timer attached to an atomic task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerParams {
    /// Trigger point
    #[serde(default)]
    pub trigger: TimerTrigger,
    /// Milliseconds until expiry
    pub duration_ms: u64,
}

/// Declared type of an output parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// No type check
    #[default]
    Any,
    /// JSON string
    String,
    /// JSON number
    Number,
    /// JSON integer
    Integer,
    /// JSON boolean
    Boolean,
    /// JSON object
    Object,
    /// JSON array
    Array,
}

/// Output parameter of a decomposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputParam {
    /// Field name in the output object
    pub name: String,
    /// Expected type
    #[serde(default, rename = "type")]
    pub param_type: ParamType,
    /// Whether the field must be present
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Decomposition body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecompositionKind {
    /// Completed by an external participant
    Manual,
    /// Implemented by a sub-net
    Net {
        /// Net to run
        net: NetId,
    },
}

/// Decomposition of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposition {
    /// Decomposition id
    pub id: DecompositionId,
    /// Body
    pub kind: DecompositionKind,
    /// Expected output parameters
    #[serde(default)]
    pub output_params: Vec<OutputParam>,
}

/// Task as written in a specification document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task id
    pub id: TaskId,
    /// Split kind
    #[serde(default)]
    pub split: SplitKind,
    /// Join kind
    #[serde(default)]
    pub join: JoinKind,
    /// Decomposition reference
    #[serde(default)]
    pub kind: TaskKind,
    /// Multi-instance parameters
    #[serde(default)]
    pub multi_instance: Option<MultiInstance>,
    /// Conditions and tasks cleared when this task completes
    #[serde(default)]
    pub cancellation_set: Vec<String>,
    /// Timer parameters
    #[serde(default)]
    pub timer: Option<TimerParams>,
}

impl TaskDefinition {
    /// Automatic task with AND split and join
    pub fn automatic(id: &str) -> Self {
        Self {
            id: TaskId::from(id),
            split: SplitKind::And,
            join: JoinKind::And,
            kind: TaskKind::Automatic,
            multi_instance: None,
            cancellation_set: Vec::new(),
            timer: None,
        }
    }

    /// Atomic task backed by a manual decomposition
    pub fn atomic(id: &str, decomposition: &str) -> Self {
        Self {
            kind: TaskKind::Atomic {
                decomposition: DecompositionId::from(decomposition),
            },
            ..Self::automatic(id)
        }
    }

    /// Composite task backed by a net decomposition
    pub fn composite(id: &str, decomposition: &str) -> Self {
        Self {
            kind: TaskKind::Composite {
                decomposition: DecompositionId::from(decomposition),
            },
            ..Self::automatic(id)
        }
    }

    /// Set the split kind
    pub fn split(mut self, split: SplitKind) -> Self {
        self.split = split;
        self
    }

    /// Set the join kind
    pub fn join(mut self, join: JoinKind) -> Self {
        self.join = join;
        self
    }

    /// Attach multi-instance parameters
    pub fn multi_instance(mut self, mi: MultiInstance) -> Self {
        self.multi_instance = Some(mi);
        self
    }

    /// Set the cancellation set
    pub fn cancels(mut self, elements: &[&str]) -> Self {
        self.cancellation_set = elements.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Attach a timer
    pub fn timer(mut self, timer: TimerParams) -> Self {
        self.timer = Some(timer);
        self
    }
}

/// Directed arc between a condition and a task (or two tasks)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    /// Source element id
    pub source: String,
    /// Target element id
    pub target: String,
    /// JMESPath predicate evaluated for XOR and OR splits
    #[serde(default)]
    pub predicate: Option<String>,
    /// Evaluation order for XOR and OR splits
    #[serde(default)]
    pub ordinal: u32,
    /// Taken when no predicate holds
    #[serde(default)]
    pub is_default: bool,
}

impl Flow {
    /// Unguarded flow
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            predicate: None,
            ordinal: 0,
            is_default: false,
        }
    }

    /// Flow guarded by a predicate
    pub fn guarded(source: &str, target: &str, predicate: &str, ordinal: u32) -> Self {
        Self {
            predicate: Some(predicate.to_string()),
            ordinal,
            ..Self::new(source, target)
        }
    }

    /// Default flow of a split
    pub fn default_branch(source: &str, target: &str, ordinal: u32) -> Self {
        Self {
            ordinal,
            is_default: true,
            ..Self::new(source, target)
        }
    }
}

/// Net as written in a specification document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetDefinition {
    /// Net id
    pub id: NetId,
    /// Unique input condition
    pub input_condition: ConditionId,
    /// Unique output condition
    pub output_condition: ConditionId,
    /// Intermediate conditions
    #[serde(default)]
    pub conditions: Vec<ConditionId>,
    /// Tasks
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    /// Flows
    #[serde(default)]
    pub flows: Vec<Flow>,
}

impl NetDefinition {
    /// Start a net with the given input and output conditions
    pub fn new(id: &str, input: &str, output: &str) -> Self {
        Self {
            id: NetId::from(id),
            input_condition: ConditionId::from(input),
            output_condition: ConditionId::from(output),
            conditions: Vec::new(),
            tasks: Vec::new(),
            flows: Vec::new(),
        }
    }

    /// Add an intermediate condition
    pub fn condition(mut self, id: &str) -> Self {
        self.conditions.push(ConditionId::from(id));
        self
    }

    /// Add a task
    pub fn task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    /// Add an unguarded flow
    pub fn flow(mut self, source: &str, target: &str) -> Self {
        self.flows.push(Flow::new(source, target));
        self
    }

    /// Add an arbitrary flow
    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flows.push(flow);
        self
    }
}

/// Specification as written in a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecificationDefinition {
    /// Specification id
    pub id: SpecificationId,
    /// Version
    pub version: String,
    /// Net launched for each case
    pub root_net: NetId,
    /// All nets
    pub nets: Vec<NetDefinition>,
    /// All decompositions
    #[serde(default)]
    pub decompositions: Vec<Decomposition>,
}

impl SpecificationDefinition {
    /// Start a specification with its root net
    pub fn new(id: &str, version: &str, root: NetDefinition) -> Self {
        Self {
            id: SpecificationId::from(id),
            version: version.to_string(),
            root_net: root.id.clone(),
            nets: vec![root],
            decompositions: Vec::new(),
        }
    }

    /// Add a sub-net
    pub fn net(mut self, net: NetDefinition) -> Self {
        self.nets.push(net);
        self
    }

    /// Add a manual decomposition
    pub fn manual(mut self, id: &str, output_params: Vec<OutputParam>) -> Self {
        self.decompositions.push(Decomposition {
            id: DecompositionId::from(id),
            kind: DecompositionKind::Manual,
            output_params,
        });
        self
    }

    /// Add a net decomposition
    pub fn subnet(mut self, id: &str, net: &str) -> Self {
        self.decompositions.push(Decomposition {
            id: DecompositionId::from(id),
            kind: DecompositionKind::Net {
                net: NetId::from(net),
            },
            output_params: Vec::new(),
        });
        self
    }

    /// Compile into an immutable model
    pub fn compile(self) -> Result<SpecificationModel, CoreError> {
        SpecificationModel::compile(self)
    }
}

/// Outgoing arc of a compiled task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutFlow {
    /// Target condition
    pub target: ConditionId,
    /// Split predicate
    pub predicate: Option<String>,
    /// Evaluation order
    pub ordinal: u32,
    /// Default branch marker
    pub is_default: bool,
}

/// Elements cleared when a task completes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CancellationSet {
    /// Conditions emptied
    pub conditions: Vec<ConditionId>,
    /// Tasks whose live instances are cancelled
    pub tasks: Vec<TaskId>,
}

impl CancellationSet {
    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.tasks.is_empty()
    }
}

/// Compiled task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Task id
    pub id: TaskId,
    /// Split kind
    pub split: SplitKind,
    /// Join kind
    pub join: JoinKind,
    /// Decomposition reference
    pub kind: TaskKind,
    /// Multi-instance parameters
    pub multi_instance: Option<MultiInstance>,
    /// Cancellation region
    pub cancellation: CancellationSet,
    /// Timer parameters
    pub timer: Option<TimerParams>,
    /// Input conditions in declaration order
    pub preset: Vec<ConditionId>,
    /// Output flows ordered by ordinal
    pub postset: Vec<OutFlow>,
}

impl Task {
    /// Whether the task spawns multiple instances
    pub fn is_multi_instance(&self) -> bool {
        self.multi_instance.is_some()
    }

    /// Whether the task is offered as a work item
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, TaskKind::Atomic { .. })
    }
}

/// Compiled net
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Net {
    /// Net id
    pub id: NetId,
    /// Input condition
    pub input_condition: ConditionId,
    /// Output condition
    pub output_condition: ConditionId,
    /// All conditions, including implicit ones
    pub conditions: BTreeSet<ConditionId>,
    /// Tasks keyed by id
    pub tasks: BTreeMap<TaskId, Task>,
    consumers: BTreeMap<ConditionId, Vec<TaskId>>,
    producers: BTreeMap<ConditionId, Vec<TaskId>>,
    loop_back_edges: BTreeSet<(String, String)>,
}

impl Net {
    /// Look up a task
    pub fn task(&self, id: &TaskId) -> Result<&Task, CoreError> {
        self.tasks.get(id).ok_or_else(|| {
            CoreError::StructuralError(format!("Task {} not found in net {}", id, self.id))
        })
    }

    /// Tasks that consume from `condition`
    pub fn consumers(&self, condition: &ConditionId) -> &[TaskId] {
        self.consumers
            .get(condition)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Tasks that produce into `condition`
    pub fn producers(&self, condition: &ConditionId) -> &[TaskId] {
        self.producers
            .get(condition)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether the arc `source -> target` closes a cycle
    pub fn is_loop_back(&self, source: &str, target: &str) -> bool {
        self.loop_back_edges
            .contains(&(source.to_string(), target.to_string()))
    }

    /// All loop-back arcs
    pub fn loop_back_edges(&self) -> impl Iterator<Item = &(String, String)> {
        self.loop_back_edges.iter()
    }

    fn compile(def: NetDefinition) -> Result<Net, CoreError> {
        let mut conditions: BTreeSet<ConditionId> = BTreeSet::new();
        let mut task_defs: BTreeMap<TaskId, TaskDefinition> = BTreeMap::new();

        for id in std::iter::once(&def.input_condition)
            .chain(std::iter::once(&def.output_condition))
            .chain(def.conditions.iter())
        {
            if !conditions.insert(id.clone()) {
                return Err(CoreError::StructuralError(format!(
                    "Duplicate condition {} in net {}",
                    id, def.id
                )));
            }
        }
        for task in &def.tasks {
            if conditions.contains(task.id.as_str())
                || task_defs.insert(task.id.clone(), task.clone()).is_some()
            {
                return Err(CoreError::StructuralError(format!(
                    "Duplicate element {} in net {}",
                    task.id, def.id
                )));
            }
        }

        let mut presets: BTreeMap<TaskId, Vec<ConditionId>> = BTreeMap::new();
        let mut postsets: BTreeMap<TaskId, Vec<OutFlow>> = BTreeMap::new();

        for flow in &def.flows {
            let source_task = task_defs.contains_key(flow.source.as_str());
            let target_task = task_defs.contains_key(flow.target.as_str());
            let source_cond = conditions.contains(flow.source.as_str());
            let target_cond = conditions.contains(flow.target.as_str());

            match (source_task, source_cond, target_task, target_cond) {
                (true, _, true, _) => {
                    // task -> task: insert an implicit condition between them
                    let implicit = ConditionId(format!("{}__{}", flow.source, flow.target));
                    if !conditions.insert(implicit.clone()) {
                        return Err(CoreError::StructuralError(format!(
                            "Implicit condition {} collides with an existing element",
                            implicit
                        )));
                    }
                    postsets
                        .entry(TaskId(flow.source.clone()))
                        .or_default()
                        .push(out_flow(flow, implicit.clone()));
                    presets
                        .entry(TaskId(flow.target.clone()))
                        .or_default()
                        .push(implicit);
                }
                (true, _, false, true) => {
                    postsets
                        .entry(TaskId(flow.source.clone()))
                        .or_default()
                        .push(out_flow(flow, ConditionId(flow.target.clone())));
                }
                (false, true, true, _) => {
                    presets
                        .entry(TaskId(flow.target.clone()))
                        .or_default()
                        .push(ConditionId(flow.source.clone()));
                }
                (false, true, false, true) => {
                    return Err(CoreError::StructuralError(format!(
                        "Flow {} -> {} connects two conditions",
                        flow.source, flow.target
                    )));
                }
                _ => {
                    return Err(CoreError::StructuralError(format!(
                        "Flow {} -> {} references an unknown element in net {}",
                        flow.source, flow.target, def.id
                    )));
                }
            }
        }

        let mut consumers: BTreeMap<ConditionId, Vec<TaskId>> = BTreeMap::new();
        let mut producers: BTreeMap<ConditionId, Vec<TaskId>> = BTreeMap::new();
        let mut tasks = BTreeMap::new();

        for (id, task_def) in task_defs {
            let preset = presets.remove(&id).unwrap_or_default();
            let mut postset = postsets.remove(&id).unwrap_or_default();
            if preset.is_empty() || postset.is_empty() {
                return Err(CoreError::StructuralError(format!(
                    "Task {} in net {} needs at least one input and one output",
                    id, def.id
                )));
            }
            if postset.iter().filter(|f| f.is_default).count() > 1 {
                return Err(CoreError::StructuralError(format!(
                    "Task {} declares more than one default flow",
                    id
                )));
            }
            postset.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then(a.target.cmp(&b.target)));

            for c in &preset {
                if *c == def.output_condition {
                    return Err(CoreError::StructuralError(format!(
                        "Output condition {} has outgoing flows",
                        c
                    )));
                }
                consumers.entry(c.clone()).or_default().push(id.clone());
            }
            for f in &postset {
                if f.target == def.input_condition {
                    return Err(CoreError::StructuralError(format!(
                        "Input condition {} has incoming flows",
                        f.target
                    )));
                }
                producers.entry(f.target.clone()).or_default().push(id.clone());
            }

            let mut cancellation = CancellationSet::default();
            for element in &task_def.cancellation_set {
                if conditions.contains(element.as_str()) {
                    cancellation.conditions.push(ConditionId(element.clone()));
                } else if declares_task(&def, element) {
                    cancellation.tasks.push(TaskId(element.clone()));
                } else {
                    return Err(CoreError::StructuralError(format!(
                        "Cancellation set of {} references unknown element {}",
                        id, element
                    )));
                }
            }

            if let Some(mi) = &task_def.multi_instance {
                if mi.min == 0 || mi.min > mi.max || mi.threshold == 0 || mi.threshold > mi.max {
                    return Err(CoreError::StructuralError(format!(
                        "Task {} has inconsistent multi-instance bounds (min {}, max {}, threshold {})",
                        id, mi.min, mi.max, mi.threshold
                    )));
                }
                if !matches!(task_def.kind, TaskKind::Atomic { .. }) {
                    return Err(CoreError::StructuralError(format!(
                        "Multi-instance task {} must be atomic",
                        id
                    )));
                }
            }
            if task_def.timer.is_some() && !matches!(task_def.kind, TaskKind::Atomic { .. }) {
                return Err(CoreError::StructuralError(format!(
                    "Timer on task {} requires an atomic task",
                    id
                )));
            }

            tasks.insert(
                id.clone(),
                Task {
                    id,
                    split: task_def.split,
                    join: task_def.join,
                    kind: task_def.kind,
                    multi_instance: task_def.multi_instance,
                    cancellation,
                    timer: task_def.timer,
                    preset,
                    postset,
                },
            );
        }

        let mut net = Net {
            id: def.id,
            input_condition: def.input_condition,
            output_condition: def.output_condition,
            conditions,
            tasks,
            consumers,
            producers,
            loop_back_edges: BTreeSet::new(),
        };
        net.check_connectivity()?;
        net.loop_back_edges = net.find_loop_back_edges();
        Ok(net)
    }

    fn successors(&self, element: &str) -> Vec<String> {
        if let Some(task) = self.tasks.get(element) {
            task.postset.iter().map(|f| f.target.0.clone()).collect()
        } else {
            self.consumers(&ConditionId(element.to_string()))
                .iter()
                .map(|t| t.0.clone())
                .collect()
        }
    }

    fn predecessors(&self, element: &str) -> Vec<String> {
        if let Some(task) = self.tasks.get(element) {
            task.preset.iter().map(|c| c.0.clone()).collect()
        } else {
            self.producers(&ConditionId(element.to_string()))
                .iter()
                .map(|t| t.0.clone())
                .collect()
        }
    }

    /// Every element must lie on a path from input to output
    fn check_connectivity(&self) -> Result<(), CoreError> {
        let forward = self.reach(self.input_condition.as_str(), |n| self.successors(n));
        let backward = self.reach(self.output_condition.as_str(), |n| self.predecessors(n));

        let elements = self
            .conditions
            .iter()
            .map(|c| c.0.as_str())
            .chain(self.tasks.keys().map(|t| t.0.as_str()));
        for element in elements {
            if !forward.contains(element) || !backward.contains(element) {
                return Err(CoreError::StructuralError(format!(
                    "Element {} in net {} is not on a path from {} to {}",
                    element, self.id, self.input_condition, self.output_condition
                )));
            }
        }
        Ok(())
    }

    fn reach<F>(&self, start: &str, next: F) -> BTreeSet<String>
    where
        F: Fn(&str) -> Vec<String>,
    {
        let mut seen = BTreeSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(node) = stack.pop() {
            if seen.insert(node.clone()) {
                stack.extend(next(&node));
            }
        }
        seen
    }

    /// Arcs whose target is still on the depth-first stack when walking from
    /// the input condition
    fn find_loop_back_edges(&self) -> BTreeSet<(String, String)> {
        let mut back_edges = BTreeSet::new();
        let mut finished: BTreeSet<String> = BTreeSet::new();
        let mut on_stack: BTreeSet<String> = BTreeSet::new();
        let root = self.input_condition.0.clone();
        let mut stack: Vec<(String, Vec<String>, usize)> =
            vec![(root.clone(), self.successors(&root), 0)];
        on_stack.insert(root);

        while let Some((node, children, idx)) = stack.last_mut() {
            if *idx < children.len() {
                let child = children[*idx].clone();
                *idx += 1;
                if on_stack.contains(&child) {
                    back_edges.insert((node.clone(), child));
                } else if !finished.contains(&child) {
                    let grandchildren = self.successors(&child);
                    on_stack.insert(child.clone());
                    stack.push((child, grandchildren, 0));
                }
            } else {
                let node = node.clone();
                on_stack.remove(&node);
                finished.insert(node);
                stack.pop();
            }
        }
        back_edges
    }
}

fn out_flow(flow: &Flow, target: ConditionId) -> OutFlow {
    OutFlow {
        target,
        predicate: flow.predicate.clone(),
        ordinal: flow.ordinal,
        is_default: flow.is_default,
    }
}

fn declares_task(def: &NetDefinition, element: &str) -> bool {
    def.tasks.iter().any(|t| t.id.as_str() == element)
}

/// Immutable, validated specification shared by every case that uses it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecificationModel {
    key: SpecificationKey,
    root_net: NetId,
    nets: BTreeMap<NetId, Net>,
    decompositions: BTreeMap<DecompositionId, Decomposition>,
    definition: SpecificationDefinition,
}

impl SpecificationModel {
    /// Validate and compile a definition
    pub fn compile(definition: SpecificationDefinition) -> Result<Self, CoreError> {
        let mut decompositions = BTreeMap::new();
        for d in &definition.decompositions {
            if decompositions.insert(d.id.clone(), d.clone()).is_some() {
                return Err(CoreError::StructuralError(format!(
                    "Duplicate decomposition {}",
                    d.id
                )));
            }
        }

        let mut nets = BTreeMap::new();
        for net_def in &definition.nets {
            let net = Net::compile(net_def.clone())?;
            if nets.insert(net.id.clone(), net).is_some() {
                return Err(CoreError::StructuralError(format!(
                    "Duplicate net {}",
                    net_def.id
                )));
            }
        }

        if !nets.contains_key(&definition.root_net) {
            return Err(CoreError::StructuralError(format!(
                "Root net {} is not defined",
                definition.root_net
            )));
        }

        let model = Self {
            key: SpecificationKey {
                id: definition.id.clone(),
                version: definition.version.clone(),
            },
            root_net: definition.root_net.clone(),
            nets,
            decompositions,
            definition,
        };
        model.check_decompositions()?;
        Ok(model)
    }

    /// Parse and compile a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        let definition: SpecificationDefinition = serde_yaml::from_str(yaml)?;
        Self::compile(definition)
    }

    /// Parse and compile a JSON document
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let definition: SpecificationDefinition = serde_json::from_str(json)?;
        Self::compile(definition)
    }

    fn check_decompositions(&self) -> Result<(), CoreError> {
        // composite task -> sub-net edges, checked for recursion below
        let mut nesting: BTreeMap<&NetId, Vec<&NetId>> = BTreeMap::new();

        for net in self.nets.values() {
            for task in net.tasks.values() {
                match &task.kind {
                    TaskKind::Automatic => {}
                    TaskKind::Atomic { decomposition } => {
                        let d = self.decomposition(decomposition)?;
                        if d.kind != DecompositionKind::Manual {
                            return Err(CoreError::StructuralError(format!(
                                "Atomic task {} references net decomposition {}",
                                task.id, decomposition
                            )));
                        }
                    }
                    TaskKind::Composite { decomposition } => {
                        let d = self.decomposition(decomposition)?;
                        let DecompositionKind::Net { net: sub } = &d.kind else {
                            return Err(CoreError::StructuralError(format!(
                                "Composite task {} references manual decomposition {}",
                                task.id, decomposition
                            )));
                        };
                        let sub = self.nets.get(sub).map(|n| &n.id).ok_or_else(|| {
                            CoreError::StructuralError(format!(
                                "Decomposition {} references unknown net {}",
                                decomposition, sub
                            ))
                        })?;
                        nesting.entry(&net.id).or_default().push(sub);
                    }
                }
            }
        }

        // a net may not (transitively) contain itself
        for start in nesting.keys() {
            let mut stack: Vec<&NetId> = nesting.get(start).cloned().unwrap_or_default();
            let mut seen = BTreeSet::new();
            while let Some(n) = stack.pop() {
                if n == *start {
                    return Err(CoreError::StructuralError(format!(
                        "Net {} recursively decomposes into itself",
                        start
                    )));
                }
                if seen.insert(n) {
                    if let Some(children) = nesting.get(n) {
                        stack.extend(children.iter().copied());
                    }
                }
            }
        }
        Ok(())
    }

    /// Specification id and version
    pub fn key(&self) -> &SpecificationKey {
        &self.key
    }

    /// Root net
    pub fn root_net(&self) -> &Net {
        // compile() guarantees the root net exists
        &self.nets[&self.root_net]
    }

    /// Look up a net
    pub fn net(&self, id: &NetId) -> Result<&Net, CoreError> {
        self.nets
            .get(id)
            .ok_or_else(|| CoreError::StructuralError(format!("Net {} not found", id)))
    }

    /// All nets
    pub fn nets(&self) -> impl Iterator<Item = &Net> {
        self.nets.values()
    }

    /// Look up a decomposition
    pub fn decomposition(&self, id: &DecompositionId) -> Result<&Decomposition, CoreError> {
        self.decompositions.get(id).ok_or_else(|| {
            CoreError::StructuralError(format!("Decomposition {} not found", id))
        })
    }

    /// Net run by a composite task
    pub fn subnet_of(&self, task: &Task) -> Result<&Net, CoreError> {
        let TaskKind::Composite { decomposition } = &task.kind else {
            return Err(CoreError::StructuralError(format!(
                "Task {} is not composite",
                task.id
            )));
        };
        match &self.decomposition(decomposition)?.kind {
            DecompositionKind::Net { net } => self.net(net),
            DecompositionKind::Manual => Err(CoreError::StructuralError(format!(
                "Decomposition {} is not a net",
                decomposition
            ))),
        }
    }

    /// Source document
    pub fn definition(&self) -> &SpecificationDefinition {
        &self.definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence_spec() -> SpecificationDefinition {
        SpecificationDefinition::new(
            "seq",
            "1",
            NetDefinition::new("main", "i", "o")
                .task(TaskDefinition::atomic("a", "manual"))
                .task(TaskDefinition::automatic("b"))
                .flow("i", "a")
                .flow("a", "b")
                .flow("b", "o"),
        )
        .manual("manual", vec![])
    }

    #[test]
    fn test_implicit_condition_between_tasks() {
        let model = sequence_spec().compile().unwrap();
        let net = model.root_net();
        let implicit = ConditionId::from("a__b");

        assert!(net.conditions.contains(&implicit));
        assert_eq!(net.consumers(&implicit), &[TaskId::from("b")]);
        assert_eq!(net.producers(&implicit), &[TaskId::from("a")]);
        assert_eq!(net.task(&TaskId::from("b")).unwrap().preset, vec![implicit]);
    }

    #[test]
    fn test_unknown_decomposition_is_structural() {
        let mut def = sequence_spec();
        def.decompositions.clear();
        let result = def.compile();
        assert!(matches!(result, Err(CoreError::StructuralError(_))));
    }

    #[test]
    fn test_dangling_flow_rejected() {
        let def = SpecificationDefinition::new(
            "bad",
            "1",
            NetDefinition::new("main", "i", "o")
                .task(TaskDefinition::automatic("a"))
                .flow("i", "a")
                .flow("a", "nowhere"),
        );
        assert!(matches!(def.compile(), Err(CoreError::StructuralError(_))));
    }

    #[test]
    fn test_condition_to_condition_rejected() {
        let def = SpecificationDefinition::new(
            "bad",
            "1",
            NetDefinition::new("main", "i", "o").flow("i", "o"),
        );
        assert!(matches!(def.compile(), Err(CoreError::StructuralError(_))));
    }

    #[test]
    fn test_unreachable_task_rejected() {
        let def = SpecificationDefinition::new(
            "bad",
            "1",
            NetDefinition::new("main", "i", "o")
                .condition("island")
                .task(TaskDefinition::automatic("a"))
                .task(TaskDefinition::automatic("b"))
                .flow("i", "a")
                .flow("a", "o")
                .flow("island", "b")
                .flow("b", "o"),
        );
        assert!(matches!(def.compile(), Err(CoreError::StructuralError(_))));
    }

    #[test]
    fn test_loop_back_edge_detected() {
        let def = SpecificationDefinition::new(
            "loop",
            "1",
            NetDefinition::new("main", "i", "o")
                .condition("c")
                .task(TaskDefinition::automatic("start"))
                .task(TaskDefinition::automatic("work").split(SplitKind::Xor))
                .flow("i", "start")
                .flow("start", "c")
                .flow("c", "work")
                .with_flow(Flow::guarded("work", "c", "again", 0))
                .with_flow(Flow::default_branch("work", "o", 1)),
        );
        let model = def.compile().unwrap();
        let net = model.root_net();

        assert!(net.is_loop_back("work", "c"));
        assert!(!net.is_loop_back("c", "work"));
        assert_eq!(net.loop_back_edges().count(), 1);
    }

    #[test]
    fn test_parallel_task_arcs_rejected() {
        let def = SpecificationDefinition::new(
            "xor",
            "1",
            NetDefinition::new("main", "i", "o")
                .task(TaskDefinition::automatic("pick").split(SplitKind::Xor))
                .task(TaskDefinition::automatic("x").join(JoinKind::Xor))
                .with_flow(Flow::default_branch("pick", "x", 5))
                .with_flow(Flow::guarded("pick", "x", "fast", 1))
                .flow("i", "pick")
                .flow("x", "o"),
        );
        // two flows pick -> x would create the same implicit condition twice
        assert!(matches!(def.compile(), Err(CoreError::StructuralError(_))));
    }

    #[test]
    fn test_multi_instance_bounds_checked() {
        let def = SpecificationDefinition::new(
            "mi",
            "1",
            NetDefinition::new("main", "i", "o")
                .task(TaskDefinition::atomic("review", "manual").multi_instance(MultiInstance {
                    min: 3,
                    max: 2,
                    threshold: 1,
                    creation: CreationMode::Static,
                    splitter: None,
                }))
                .flow("i", "review")
                .flow("review", "o"),
        )
        .manual("manual", vec![]);
        assert!(matches!(def.compile(), Err(CoreError::StructuralError(_))));
    }

    #[test]
    fn test_recursive_subnet_rejected() {
        let def = SpecificationDefinition::new(
            "rec",
            "1",
            NetDefinition::new("main", "i", "o")
                .task(TaskDefinition::composite("sub", "self"))
                .flow("i", "sub")
                .flow("sub", "o"),
        )
        .subnet("self", "main");
        assert!(matches!(def.compile(), Err(CoreError::StructuralError(_))));
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
id: orders
version: "2"
root_net: main
nets:
  - id: main
    input_condition: i
    output_condition: o
    tasks:
      - id: approve
        kind: { type: atomic, decomposition: approval }
    flows:
      - { source: i, target: approve }
      - { source: approve, target: o }
decompositions:
  - id: approval
    kind: { type: manual }
    output_params:
      - { name: approved, type: boolean }
"#;
        let model = SpecificationModel::from_yaml(yaml).unwrap();
        assert_eq!(model.key().to_string(), "orders@2");
        let task = model.root_net().task(&TaskId::from("approve")).unwrap();
        assert!(task.is_atomic());
        assert_eq!(task.split, SplitKind::And);
    }
}
