//! Model input records.
//!
//! An external model compiler (or hand-written setup code) describes a
//! machine with these records and hands them to [`ModelData::build`]:
//!
//! ```
//! use statechart_core::{ModelData, StateData, TransitionData};
//!
//! let model = ModelData::new()
//!     .state(StateData::new("S1").initial())
//!     .state(StateData::new("S2"))
//!     .transition(TransitionData::external("S1", "S2").event("E1"))
//!     .build()
//!     .unwrap();
//! assert_eq!(model.state_count(), 2);
//! ```

use crate::action::{Action, DoActivity, Guard};
use crate::error::CoreError;
use crate::model::Model;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Name of the region used when a state does not name one.
pub const DEFAULT_REGION: &str = "default";

/// Identity of a state or pseudostate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub String);

impl StateId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for StateId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Marker kinds. `Initial` and `End` tag ordinary states that can be
/// active; every other kind is a transient pseudostate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PseudoStateKind {
    Initial,
    End,
    Choice,
    Junction,
    Fork,
    Join,
    HistoryShallow,
    HistoryDeep,
    Entry,
    Exit,
}

impl PseudoStateKind {
    /// Whether a node of this kind can never be an active state.
    pub fn is_transient(&self) -> bool {
        !matches!(self, PseudoStateKind::Initial | PseudoStateKind::End)
    }

    pub fn is_history(&self) -> bool {
        matches!(
            self,
            PseudoStateKind::HistoryShallow | PseudoStateKind::HistoryDeep
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    #[default]
    External,
    Local,
    Internal,
}

/// A state, pseudostate or composite.
#[derive(Clone)]
pub struct StateData {
    pub state: StateId,
    pub parent: Option<StateId>,
    /// Region of the parent this state belongs to; states without one share
    /// [`DEFAULT_REGION`].
    pub region: Option<String>,
    pub kind: Option<PseudoStateKind>,
    pub deferred: BTreeSet<String>,
    pub entry_actions: Vec<Action>,
    pub exit_actions: Vec<Action>,
    pub do_activities: Vec<DoActivity>,
    /// Runs when the owning region is default-entered into this state.
    pub initial_action: Option<Action>,
}

impl StateData {
    pub fn new(state: impl Into<StateId>) -> Self {
        Self {
            state: state.into(),
            parent: None,
            region: None,
            kind: None,
            deferred: BTreeSet::new(),
            entry_actions: Vec::new(),
            exit_actions: Vec::new(),
            do_activities: Vec::new(),
            initial_action: None,
        }
    }

    pub fn parent(mut self, parent: impl Into<StateId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn kind(mut self, kind: PseudoStateKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn initial(self) -> Self {
        self.kind(PseudoStateKind::Initial)
    }

    pub fn end(self) -> Self {
        self.kind(PseudoStateKind::End)
    }

    pub fn initial_action(mut self, action: Action) -> Self {
        self.initial_action = Some(action);
        self
    }

    pub fn defer(mut self, event: impl Into<String>) -> Self {
        self.deferred.insert(event.into());
        self
    }

    pub fn entry(mut self, action: Action) -> Self {
        self.entry_actions.push(action);
        self
    }

    pub fn exit(mut self, action: Action) -> Self {
        self.exit_actions.push(action);
        self
    }

    pub fn activity(mut self, activity: DoActivity) -> Self {
        self.do_activities.push(activity);
        self
    }
}

/// A transition between two states.
#[derive(Clone)]
pub struct TransitionData {
    pub name: Option<String>,
    pub source: StateId,
    pub target: StateId,
    /// `None` makes the transition triggerless (or timer driven).
    pub event: Option<String>,
    pub period: Option<Duration>,
    /// Timer firings; 0 repeats while the source stays active.
    pub count: u32,
    pub initial_delay: Option<Duration>,
    pub kind: TransitionKind,
    pub actions: Vec<Action>,
    pub guard: Option<Guard>,
    /// Opaque rule handed to the transition authorizer.
    pub security_rule: Option<String>,
}

impl TransitionData {
    fn with_kind(
        source: impl Into<StateId>,
        target: impl Into<StateId>,
        kind: TransitionKind,
    ) -> Self {
        Self {
            name: None,
            source: source.into(),
            target: target.into(),
            event: None,
            period: None,
            count: 0,
            initial_delay: None,
            kind,
            actions: Vec::new(),
            guard: None,
            security_rule: None,
        }
    }

    pub fn external(source: impl Into<StateId>, target: impl Into<StateId>) -> Self {
        Self::with_kind(source, target, TransitionKind::External)
    }

    pub fn local(source: impl Into<StateId>, target: impl Into<StateId>) -> Self {
        Self::with_kind(source, target, TransitionKind::Local)
    }

    pub fn internal(state: impl Into<StateId>) -> Self {
        let state = state.into();
        Self::with_kind(state.clone(), state, TransitionKind::Internal)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Fires every `period` while the source state is active.
    pub fn timer(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self.count = 0;
        self
    }

    /// Fires once, `period` after the source state is entered.
    pub fn timer_once(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self.count = 1;
        self
    }

    pub fn timer_count(mut self, period: Duration, count: u32) -> Self {
        self.period = Some(period);
        self.count = count;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    pub fn security_rule(mut self, rule: impl Into<String>) -> Self {
        self.security_rule = Some(rule.into());
        self
    }
}

/// One entry of a choice or junction branch list.
#[derive(Clone)]
pub struct BranchData {
    pub target: StateId,
    pub guard: Option<Guard>,
    pub actions: Vec<Action>,
}

impl BranchData {
    pub fn new(target: impl Into<StateId>) -> Self {
        Self {
            target: target.into(),
            guard: None,
            actions: Vec::new(),
        }
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

/// Complete machine description.
#[derive(Clone, Default)]
pub struct ModelData {
    pub states: Vec<StateData>,
    pub transitions: Vec<TransitionData>,
    pub choices: BTreeMap<StateId, Vec<BranchData>>,
    pub junctions: BTreeMap<StateId, Vec<BranchData>>,
    pub forks: BTreeMap<StateId, Vec<StateId>>,
    pub joins: BTreeMap<StateId, Vec<StateId>>,
    pub entries: Vec<(StateId, StateId)>,
    pub exits: Vec<(StateId, StateId)>,
    pub history_defaults: BTreeMap<StateId, StateId>,
}

impl ModelData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: StateData) -> Self {
        self.states.push(state);
        self
    }

    pub fn transition(mut self, transition: TransitionData) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn choice(mut self, choice: impl Into<StateId>, branches: Vec<BranchData>) -> Self {
        self.choices.insert(choice.into(), branches);
        self
    }

    pub fn junction(mut self, junction: impl Into<StateId>, branches: Vec<BranchData>) -> Self {
        self.junctions.insert(junction.into(), branches);
        self
    }

    pub fn fork<I, S>(mut self, fork: impl Into<StateId>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        self.forks
            .insert(fork.into(), targets.into_iter().map(Into::into).collect());
        self
    }

    pub fn join<I, S>(mut self, join: impl Into<StateId>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        self.joins
            .insert(join.into(), sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn entry(mut self, point: impl Into<StateId>, target: impl Into<StateId>) -> Self {
        self.entries.push((point.into(), target.into()));
        self
    }

    pub fn exit(mut self, point: impl Into<StateId>, target: impl Into<StateId>) -> Self {
        self.exits.push((point.into(), target.into()));
        self
    }

    pub fn history_default(
        mut self,
        history: impl Into<StateId>,
        target: impl Into<StateId>,
    ) -> Self {
        self.history_defaults.insert(history.into(), target.into());
        self
    }

    /// Validates and indexes the description.
    pub fn build(self) -> Result<Model, CoreError> {
        Model::from_data(self)
    }
}
