//! Serializable machine snapshots.

use crate::data::StateId;
use crate::dispatcher::Runtime;
use crate::extended::ExtendedState;
use crate::model::{Model, RegionIdx};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Snapshot of a machine, mirroring its active region tree.
///
/// The top-level context describes the root region; `childs` holds one
/// context per region of the active state, in declaration order, and
/// `child_refs` names those regions (`<owner>/<region>`). Contexts written
/// before `child_refs` existed are matched by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineContext {
    /// Machine id, only set on the top-level context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub state: Option<StateId>,
    /// Last processed event.
    pub event: Option<String>,
    pub event_headers: BTreeMap<String, Value>,
    pub extended_state: BTreeMap<String, Value>,
    /// Region key to last exited child, only set on the top-level context.
    pub history_states: BTreeMap<String, StateId>,
    pub childs: Vec<StateMachineContext>,
    pub child_refs: Vec<String>,
}

impl StateMachineContext {
    pub fn new(state: Option<StateId>) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Active ids, outer states before the states nested in them.
    pub fn active_ids(&self) -> Vec<StateId> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<StateId>) {
        if let Some(state) = &self.state {
            ids.push(state.clone());
        }
        for child in &self.childs {
            child.collect_ids(ids);
        }
    }

    /// Captures the live configuration.
    pub(crate) fn capture(model: &Model, rt: &Runtime, extended: &ExtendedState) -> Self {
        let mut ctx = Self::region(model, rt, model.root);
        ctx.id = rt.machine_id.clone();
        if let Some(message) = &rt.last_message {
            ctx.event = Some(message.payload.clone());
            ctx.event_headers = message.headers.clone();
        }
        ctx.extended_state = extended.variables();
        ctx.history_states = rt
            .history
            .iter()
            .map(|(r, s)| (model.region_key(*r), model.states[*s].id.clone()))
            .collect();
        ctx
    }

    fn region(model: &Model, rt: &Runtime, r: RegionIdx) -> Self {
        let Some(s) = rt.active[r] else {
            return Self::default();
        };
        let regions = &model.states[s].regions;
        Self {
            state: Some(model.states[s].id.clone()),
            childs: regions.iter().map(|c| Self::region(model, rt, *c)).collect(),
            child_refs: regions.iter().map(|c| model.region_key(*c)).collect(),
            ..Self::default()
        }
    }
}
