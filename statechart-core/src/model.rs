//! Compiled, immutable machine model.
//!
//! States and regions live in flat arenas and refer to each other by index,
//! so the ownership tree (state -> regions -> states) has no pointer cycles.
//! [`Model::from_data`] rejects malformed descriptions up front; nothing in
//! the dispatcher has to re-check them.

use crate::action::{Action, DoActivity, Guard};
use crate::data::{
    BranchData, ModelData, PseudoStateKind, StateId, TransitionKind, DEFAULT_REGION,
};
use crate::error::CoreError;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

pub(crate) type StateIdx = usize;
pub(crate) type RegionIdx = usize;
pub(crate) type TransitionIdx = usize;

/// Public description of a transition, handed to listeners and hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionInfo {
    pub name: Option<String>,
    pub source: StateId,
    pub target: StateId,
    pub event: Option<String>,
    pub kind: TransitionKind,
    pub timer: bool,
    pub security_rule: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerSpec {
    pub period: Duration,
    pub count: u32,
    pub initial_delay: Option<Duration>,
}

pub(crate) struct StateNode {
    pub id: StateId,
    pub kind: Option<PseudoStateKind>,
    pub region: RegionIdx,
    pub regions: Vec<RegionIdx>,
    pub depth: usize,
    pub deferred: BTreeSet<String>,
    pub entry_actions: Vec<Action>,
    pub exit_actions: Vec<Action>,
    pub do_activities: Vec<DoActivity>,
    pub initial_action: Option<Action>,
    /// Event and triggerless transitions, in declaration order.
    pub outgoing: Vec<TransitionIdx>,
    pub timers: Vec<TransitionIdx>,
}

pub(crate) struct RegionNode {
    pub name: String,
    pub owner: Option<StateIdx>,
    pub states: Vec<StateIdx>,
    pub initial: StateIdx,
}

pub(crate) struct TransitionNode {
    pub info: TransitionInfo,
    pub source: StateIdx,
    pub target: StateIdx,
    pub event: Option<String>,
    pub timer: Option<TimerSpec>,
    pub kind: TransitionKind,
    pub actions: Vec<Action>,
    pub guard: Option<Guard>,
}

pub(crate) struct Branch {
    pub target: StateIdx,
    pub guard: Option<Guard>,
    pub actions: Vec<Action>,
}

pub(crate) struct ForkNode {
    pub owner: Option<StateIdx>,
    pub targets: Vec<StateIdx>,
}

pub(crate) struct JoinNode {
    pub join: StateIdx,
    pub owner: StateIdx,
    pub sources: Vec<StateIdx>,
}

/// Validated statechart.
pub struct Model {
    pub(crate) states: Vec<StateNode>,
    pub(crate) regions: Vec<RegionNode>,
    pub(crate) transitions: Vec<TransitionNode>,
    pub(crate) root: RegionIdx,
    index: HashMap<StateId, StateIdx>,
    pub(crate) branches: HashMap<StateIdx, Vec<Branch>>,
    pub(crate) forks: HashMap<StateIdx, ForkNode>,
    pub(crate) joins: Vec<JoinNode>,
    /// Entry and exit point continuations.
    pub(crate) continuations: HashMap<StateIdx, StateIdx>,
    pub(crate) history_defaults: HashMap<StateIdx, StateIdx>,
}

impl Model {
    pub fn from_data(data: ModelData) -> Result<Self, CoreError> {
        if data.states.is_empty() {
            return Err(CoreError::model("model has no states"));
        }

        // =========================================================================
        // States
        // =========================================================================

        let mut index = HashMap::new();
        for (i, s) in data.states.iter().enumerate() {
            if s.state.as_str().is_empty() {
                return Err(CoreError::model("state id must not be empty"));
            }
            if index.insert(s.state.clone(), i).is_some() {
                return Err(CoreError::model(format!("duplicate state '{}'", s.state)));
            }
        }

        let mut parents = Vec::with_capacity(data.states.len());
        for s in &data.states {
            let parent = match &s.parent {
                Some(p) => {
                    let pi = *index.get(p).ok_or_else(|| {
                        CoreError::model(format!(
                            "state '{}' references unknown parent '{}'",
                            s.state, p
                        ))
                    })?;
                    if data.states[pi].kind.is_some_and(|k| k.is_transient()) {
                        return Err(CoreError::model(format!(
                            "pseudostate '{}' cannot own states",
                            p
                        )));
                    }
                    Some(pi)
                }
                None => None,
            };
            parents.push(parent);
        }

        let mut depths = Vec::with_capacity(parents.len());
        for (i, s) in data.states.iter().enumerate() {
            let mut depth = 0;
            let mut current = parents[i];
            while let Some(p) = current {
                depth += 1;
                if depth > parents.len() {
                    return Err(CoreError::model(format!(
                        "parent cycle through state '{}'",
                        s.state
                    )));
                }
                current = parents[p];
            }
            depths.push(depth);
        }

        // =========================================================================
        // Regions
        // =========================================================================

        let mut regions: Vec<RegionNode> = Vec::new();
        let mut region_keys: HashMap<(Option<StateIdx>, String), RegionIdx> = HashMap::new();
        let mut owned: Vec<Vec<RegionIdx>> = vec![Vec::new(); data.states.len()];
        let mut state_region = Vec::with_capacity(data.states.len());
        for (i, s) in data.states.iter().enumerate() {
            let name = s
                .region
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string());
            let key = (parents[i], name.clone());
            let r = *region_keys.entry(key).or_insert_with(|| {
                regions.push(RegionNode {
                    name,
                    owner: parents[i],
                    states: Vec::new(),
                    initial: usize::MAX,
                });
                let r = regions.len() - 1;
                if let Some(p) = parents[i] {
                    owned[p].push(r);
                }
                r
            });
            regions[r].states.push(i);
            state_region.push(r);
        }

        let roots: Vec<RegionIdx> = (0..regions.len())
            .filter(|r| regions[*r].owner.is_none())
            .collect();
        if roots.len() != 1 {
            return Err(CoreError::model(
                "top-level states must share one region; wrap orthogonal regions in a composite state",
            ));
        }
        let root = roots[0];

        for region in regions.iter_mut() {
            let initials: Vec<StateIdx> = region
                .states
                .iter()
                .copied()
                .filter(|s| data.states[*s].kind == Some(PseudoStateKind::Initial))
                .collect();
            let label = region_label(&data.states, region.owner, &region.name);
            match initials.as_slice() {
                [single] => region.initial = *single,
                [] => {
                    return Err(CoreError::model(format!(
                        "region '{}' has no initial state",
                        label
                    )))
                }
                _ => {
                    return Err(CoreError::model(format!(
                        "region '{}' has more than one initial state",
                        label
                    )))
                }
            }
        }

        let mut states: Vec<StateNode> = data
            .states
            .into_iter()
            .enumerate()
            .map(|(i, s)| StateNode {
                id: s.state,
                kind: s.kind,
                region: state_region[i],
                regions: std::mem::take(&mut owned[i]),
                depth: depths[i],
                deferred: s.deferred,
                entry_actions: s.entry_actions,
                exit_actions: s.exit_actions,
                do_activities: s.do_activities,
                initial_action: s.initial_action,
                outgoing: Vec::new(),
                timers: Vec::new(),
            })
            .collect();

        for s in &states {
            if matches!(
                s.kind,
                Some(PseudoStateKind::Entry) | Some(PseudoStateKind::Exit)
            ) && regions[s.region].owner.is_none()
            {
                return Err(CoreError::model(format!(
                    "connection point '{}' must belong to a composite state",
                    s.id
                )));
            }
        }

        let mut model = Model {
            states: Vec::new(),
            regions,
            transitions: Vec::new(),
            root,
            index,
            branches: HashMap::new(),
            forks: HashMap::new(),
            joins: Vec::new(),
            continuations: HashMap::new(),
            history_defaults: HashMap::new(),
        };
        std::mem::swap(&mut model.states, &mut states);

        // =========================================================================
        // Transitions
        // =========================================================================

        for td in data.transitions {
            let source = model.lookup(&td.source, "transition source")?;
            let target = model.lookup(&td.target, "transition target")?;
            let label = format!("transition {} -> {}", td.source, td.target);

            match model.states[source].kind {
                Some(PseudoStateKind::Fork) if td.event.is_some() => {
                    return Err(CoreError::model(format!(
                        "{}: transition from fork pseudostate cannot carry an event trigger",
                        label
                    )))
                }
                Some(PseudoStateKind::Fork) => {
                    return Err(CoreError::model(format!(
                        "{}: fork targets are declared through the fork map",
                        label
                    )))
                }
                Some(PseudoStateKind::Join) if td.event.is_some() || td.period.is_some() => {
                    return Err(CoreError::model(format!(
                        "{}: transition from join pseudostate must be triggerless",
                        label
                    )))
                }
                Some(kind) if kind.is_transient() && kind != PseudoStateKind::Join => {
                    return Err(CoreError::model(format!(
                        "{}: transitions cannot originate at {:?} pseudostate",
                        label, kind
                    )))
                }
                _ => {}
            }
            if model.states[target].kind == Some(PseudoStateKind::Join) {
                return Err(CoreError::model(format!(
                    "{}: join sources are declared through the join map",
                    label
                )));
            }
            if td.kind == TransitionKind::Internal && source != target {
                return Err(CoreError::model(format!(
                    "{}: internal transition must stay in its state",
                    label
                )));
            }

            let timer = match td.period {
                Some(period) if period.is_zero() => {
                    return Err(CoreError::model(format!("{}: timer period is zero", label)))
                }
                Some(_) if td.event.is_some() => {
                    return Err(CoreError::model(format!(
                        "{}: timer transition cannot also carry an event",
                        label
                    )))
                }
                Some(period) => Some(TimerSpec {
                    period,
                    count: td.count,
                    initial_delay: td.initial_delay,
                }),
                None => None,
            };

            let t = model.transitions.len();
            model.transitions.push(TransitionNode {
                info: TransitionInfo {
                    name: td.name,
                    source: td.source,
                    target: td.target,
                    event: td.event.clone(),
                    kind: td.kind,
                    timer: timer.is_some(),
                    security_rule: td.security_rule,
                },
                source,
                target,
                event: td.event,
                timer,
                kind: td.kind,
                actions: td.actions,
                guard: td.guard,
            });
            if timer.is_some() {
                model.states[source].timers.push(t);
            } else {
                model.states[source].outgoing.push(t);
            }
        }

        // =========================================================================
        // Pseudostates
        // =========================================================================

        for (kind, table) in [
            (PseudoStateKind::Choice, data.choices),
            (PseudoStateKind::Junction, data.junctions),
        ] {
            for (id, branches) in table {
                let s = model.expect_kind(&id, kind)?;
                let compiled = model.compile_branches(&id, branches)?;
                model.branches.insert(s, compiled);
            }
        }

        for (id, targets) in data.forks {
            let fork = model.expect_kind(&id, PseudoStateKind::Fork)?;
            let targets = model.lookup_all(&targets, &id)?;
            if targets.is_empty() {
                return Err(CoreError::model(format!("fork '{}' has no targets", id)));
            }
            let owner = model.common_owner(&targets);
            model.distinct_regions(&id, owner, &targets)?;
            model.forks.insert(fork, ForkNode { owner, targets });
        }

        for (id, sources) in data.joins {
            let join = model.expect_kind(&id, PseudoStateKind::Join)?;
            let sources = model.lookup_all(&sources, &id)?;
            let owner = model.common_owner(&sources).ok_or_else(|| {
                CoreError::model(format!(
                    "join '{}' sources must lie in the regions of one composite state",
                    id
                ))
            })?;
            let covered = model.distinct_regions(&id, Some(owner), &sources)?;
            for r in &model.states[owner].regions {
                if !covered.contains(r) {
                    return Err(CoreError::model(format!(
                        "join '{}' is missing a source for region '{}'",
                        id,
                        model.region_key(*r)
                    )));
                }
            }
            if model.states[join].outgoing.is_empty() {
                return Err(CoreError::model(format!(
                    "join '{}' has no outgoing transition",
                    id
                )));
            }
            model.joins.push(JoinNode {
                join,
                owner,
                sources,
            });
        }

        for (kind, pairs) in [
            (PseudoStateKind::Entry, data.entries),
            (PseudoStateKind::Exit, data.exits),
        ] {
            for (point, target) in pairs {
                let p = model.expect_kind(&point, kind)?;
                let t = model.lookup(&target, "connection point target")?;
                let owner = model.parent(p).ok_or_else(|| {
                    CoreError::model(format!("connection point '{}' has no owner", point))
                })?;
                let inside = model.is_ancestor(owner, t);
                if kind == PseudoStateKind::Entry && !inside {
                    return Err(CoreError::model(format!(
                        "entry point '{}' must lead into '{}'",
                        point, model.states[owner].id
                    )));
                }
                if kind == PseudoStateKind::Exit && (inside || t == owner) {
                    return Err(CoreError::model(format!(
                        "exit point '{}' must lead out of '{}'",
                        point, model.states[owner].id
                    )));
                }
                if model.continuations.insert(p, t).is_some() {
                    return Err(CoreError::model(format!(
                        "connection point '{}' declared twice",
                        point
                    )));
                }
            }
        }

        for (history, target) in data.history_defaults {
            let h = model.lookup(&history, "history pseudostate")?;
            if !model.states[h].kind.is_some_and(|k| k.is_history()) {
                return Err(CoreError::model(format!(
                    "'{}' is not a history pseudostate",
                    history
                )));
            }
            let t = model.lookup(&target, "history default target")?;
            if model.child_in_region(t, model.states[h].region).is_none() {
                return Err(CoreError::model(format!(
                    "history default '{}' of '{}' lies outside its region",
                    target, history
                )));
            }
            model.history_defaults.insert(h, t);
        }

        model.check_pseudostates_declared()?;
        model.check_acyclic()?;
        Ok(model)
    }

    // =========================================================================
    // Public queries
    // =========================================================================

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn contains(&self, id: &StateId) -> bool {
        self.index.contains_key(id)
    }

    pub fn state_ids(&self) -> impl Iterator<Item = &StateId> {
        self.states.iter().map(|s| &s.id)
    }

    pub fn kind(&self, id: &StateId) -> Option<PseudoStateKind> {
        self.index_of(id).and_then(|s| self.states[s].kind)
    }

    pub fn parent_of(&self, id: &StateId) -> Option<&StateId> {
        self.index_of(id)
            .and_then(|s| self.parent(s))
            .map(|p| &self.states[p].id)
    }

    /// Whether the state owns at least one region.
    pub fn is_composite(&self, id: &StateId) -> bool {
        self.index_of(id)
            .is_some_and(|s| !self.states[s].regions.is_empty())
    }

    pub fn transitions(&self) -> impl Iterator<Item = &TransitionInfo> {
        self.transitions.iter().map(|t| &t.info)
    }

    /// Events that have at least one transition, sorted.
    pub fn events(&self) -> BTreeSet<&str> {
        self.transitions
            .iter()
            .filter_map(|t| t.event.as_deref())
            .collect()
    }

    // =========================================================================
    // Tree navigation
    // =========================================================================

    pub(crate) fn index_of(&self, id: &StateId) -> Option<StateIdx> {
        self.index.get(id).copied()
    }

    pub(crate) fn parent(&self, s: StateIdx) -> Option<StateIdx> {
        self.regions[self.states[s].region].owner
    }

    pub(crate) fn is_transient(&self, s: StateIdx) -> bool {
        self.states[s].kind.is_some_and(|k| k.is_transient())
    }

    /// Whether `ancestor` lies strictly above `s`.
    pub(crate) fn is_ancestor(&self, ancestor: StateIdx, s: StateIdx) -> bool {
        let mut current = self.parent(s);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }

    /// Regions enclosing `s`, innermost first.
    pub(crate) fn region_chain(&self, s: StateIdx) -> Vec<RegionIdx> {
        let mut chain = vec![self.states[s].region];
        let mut current = self.parent(s);
        while let Some(p) = current {
            chain.push(self.states[p].region);
            current = self.parent(p);
        }
        chain
    }

    /// `r` followed by every region enclosing it, innermost first.
    pub(crate) fn region_ancestors(&self, r: RegionIdx) -> Vec<RegionIdx> {
        match self.regions[r].owner {
            Some(owner) => {
                let mut chain = vec![r];
                chain.extend(self.region_chain(owner));
                chain
            }
            None => vec![r],
        }
    }

    /// Ancestor-or-self of `s` that is a direct child of region `r`.
    pub(crate) fn child_in_region(&self, s: StateIdx, r: RegionIdx) -> Option<StateIdx> {
        let mut current = Some(s);
        while let Some(c) = current {
            if self.states[c].region == r {
                return Some(c);
            }
            current = self.parent(c);
        }
        None
    }

    /// Innermost region strictly enclosing both states.
    pub(crate) fn lca_region(&self, a: StateIdx, b: StateIdx) -> RegionIdx {
        let chain_b: HashSet<RegionIdx> = self.region_chain(b).into_iter().collect();
        self.region_chain(a)
            .into_iter()
            .find(|r| chain_b.contains(r))
            .unwrap_or(self.root)
    }

    /// Stable textual region key, `<owner>/<name>`; the root region has an
    /// empty owner.
    pub(crate) fn region_key(&self, r: RegionIdx) -> String {
        let region = &self.regions[r];
        let owner = region
            .owner
            .map(|o| self.states[o].id.as_str())
            .unwrap_or("");
        format!("{}/{}", owner, region.name)
    }

    pub(crate) fn region_by_key(&self, key: &str) -> Option<RegionIdx> {
        (0..self.regions.len()).find(|r| self.region_key(*r) == key)
    }

    // =========================================================================
    // Validation helpers
    // =========================================================================

    fn lookup(&self, id: &StateId, what: &str) -> Result<StateIdx, CoreError> {
        self.index_of(id)
            .ok_or_else(|| CoreError::model(format!("{} references unknown state '{}'", what, id)))
    }

    fn lookup_all(&self, ids: &[StateId], owner: &StateId) -> Result<Vec<StateIdx>, CoreError> {
        ids.iter()
            .map(|id| {
                let s = self.lookup(id, &format!("'{}'", owner))?;
                if self.is_transient(s) {
                    return Err(CoreError::model(format!(
                        "'{}' cannot reference pseudostate '{}'",
                        owner, id
                    )));
                }
                Ok(s)
            })
            .collect()
    }

    fn expect_kind(&self, id: &StateId, kind: PseudoStateKind) -> Result<StateIdx, CoreError> {
        let s = self.lookup(id, &format!("{:?} declaration", kind))?;
        if self.states[s].kind != Some(kind) {
            return Err(CoreError::model(format!(
                "'{}' is not a {:?} pseudostate",
                id, kind
            )));
        }
        Ok(s)
    }

    fn compile_branches(
        &self,
        id: &StateId,
        branches: Vec<BranchData>,
    ) -> Result<Vec<Branch>, CoreError> {
        let count = branches.len();
        match branches.last() {
            None => {
                return Err(CoreError::model(format!("'{}' has no branches", id)));
            }
            Some(last) if last.guard.is_some() => {
                return Err(CoreError::model(format!(
                    "'{}' has no unguarded default branch",
                    id
                )));
            }
            Some(_) => {}
        }
        branches
            .into_iter()
            .enumerate()
            .map(|(i, b)| {
                if b.guard.is_none() && i + 1 != count {
                    return Err(CoreError::model(format!(
                        "'{}' has an ambiguous unguarded branch before its default",
                        id
                    )));
                }
                let target = self.lookup(&b.target, &format!("branch of '{}'", id))?;
                if self.states[target].kind == Some(PseudoStateKind::Join) {
                    return Err(CoreError::model(format!(
                        "branch of '{}' cannot target join '{}'",
                        id, b.target
                    )));
                }
                Ok(Branch {
                    target,
                    guard: b.guard,
                    actions: b.actions,
                })
            })
            .collect()
    }

    /// Innermost state strictly above every member, if any.
    fn common_owner(&self, members: &[StateIdx]) -> Option<StateIdx> {
        let first = *members.first()?;
        let mut current = self.parent(first);
        while let Some(candidate) = current {
            if members.iter().all(|m| self.is_ancestor(candidate, *m)) {
                return Some(candidate);
            }
            current = self.parent(candidate);
        }
        None
    }

    /// Checks that each member sits in a different region of `owner` and
    /// returns those regions.
    fn distinct_regions(
        &self,
        id: &StateId,
        owner: Option<StateIdx>,
        members: &[StateIdx],
    ) -> Result<HashSet<RegionIdx>, CoreError> {
        let mut seen = HashSet::new();
        for m in members {
            let region = self
                .region_chain(*m)
                .into_iter()
                .find(|r| self.regions[*r].owner == owner)
                .unwrap_or(self.root);
            if !seen.insert(region) {
                return Err(CoreError::model(format!(
                    "'{}' has two members in region '{}'",
                    id,
                    self.region_key(region)
                )));
            }
        }
        Ok(seen)
    }

    fn check_pseudostates_declared(&self) -> Result<(), CoreError> {
        for (s, node) in self.states.iter().enumerate() {
            let Some(kind) = node.kind else { continue };
            let declared = match kind {
                PseudoStateKind::Choice | PseudoStateKind::Junction => {
                    self.branches.contains_key(&s)
                }
                PseudoStateKind::Fork => self.forks.contains_key(&s),
                PseudoStateKind::Join => self.joins.iter().any(|j| j.join == s),
                PseudoStateKind::Entry | PseudoStateKind::Exit => {
                    self.continuations.contains_key(&s)
                }
                _ => true,
            };
            if !declared {
                return Err(CoreError::model(format!(
                    "pseudostate '{}' has no {:?} declaration",
                    node.id, kind
                )));
            }
        }
        Ok(())
    }

    fn pseudo_edges(&self, s: StateIdx) -> Vec<StateIdx> {
        let mut edges: Vec<StateIdx> = Vec::new();
        if let Some(branches) = self.branches.get(&s) {
            edges.extend(branches.iter().map(|b| b.target));
        }
        edges.extend(self.continuations.get(&s));
        edges.extend(self.history_defaults.get(&s));
        edges.retain(|t| self.is_transient(*t));
        edges
    }

    /// Pseudostate chains must terminate in a real state.
    fn check_acyclic(&self) -> Result<(), CoreError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Visiting,
            Done,
        }
        fn visit(model: &Model, s: StateIdx, marks: &mut [Mark]) -> Result<(), CoreError> {
            match marks[s] {
                Mark::Done => return Ok(()),
                Mark::Visiting => {
                    let what = if model.states[s].kind.is_some_and(|k| k.is_history()) {
                        "cyclic history default"
                    } else {
                        "cyclic pseudostate chain"
                    };
                    return Err(CoreError::model(format!(
                        "{} through '{}'",
                        what, model.states[s].id
                    )));
                }
                Mark::New => {}
            }
            marks[s] = Mark::Visiting;
            for next in model.pseudo_edges(s) {
                visit(model, next, marks)?;
            }
            marks[s] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::New; self.states.len()];
        for s in 0..self.states.len() {
            if self.is_transient(s) {
                visit(self, s, &mut marks)?;
            }
        }
        Ok(())
    }
}

fn region_label(
    states: &[crate::data::StateData],
    owner: Option<StateIdx>,
    name: &str,
) -> String {
    let owner = owner.map(|o| states[o].state.as_str()).unwrap_or("");
    format!("{}/{}", owner, name)
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("states", &self.states.len())
            .field("regions", &self.regions.len())
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Guard;
    use crate::data::{StateData, TransitionData};

    fn error_of(data: ModelData) -> String {
        match Model::from_data(data) {
            Ok(_) => panic!("model should be rejected"),
            Err(e) => {
                assert!(e.is_model_error());
                e.to_string()
            }
        }
    }

    fn orthogonal() -> ModelData {
        ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S3"))
            .state(StateData::new("S21").parent("S2").region("R1").initial())
            .state(StateData::new("S22").parent("S2").region("R1"))
            .state(StateData::new("S31").parent("S2").region("R2").initial())
            .state(StateData::new("S32").parent("S2").region("R2"))
            .state(StateData::new("FORK").kind(PseudoStateKind::Fork))
            .state(StateData::new("JOIN").kind(PseudoStateKind::Join))
            .transition(TransitionData::external("S1", "FORK").event("E1"))
            .transition(TransitionData::external("JOIN", "S3"))
            .fork("FORK", ["S22", "S32"])
            .join("JOIN", ["S22", "S32"])
    }

    #[test]
    fn test_regions_and_depths() {
        let model = orthogonal().build().unwrap();
        assert_eq!(model.state_count(), 9);
        assert_eq!(model.regions.len(), 3);

        let s2 = model.index_of(&"S2".into()).unwrap();
        let s22 = model.index_of(&"S22".into()).unwrap();
        let s32 = model.index_of(&"S32".into()).unwrap();
        assert_eq!(model.states[s2].regions.len(), 2);
        assert_eq!(model.states[s22].depth, 1);
        assert!(model.is_ancestor(s2, s22));
        assert!(!model.is_ancestor(s22, s2));
        assert_eq!(model.lca_region(s22, s32), model.root);
        assert_eq!(model.region_key(model.states[s22].region), "S2/R1");
        assert_eq!(model.region_key(model.root), "/default");
        assert_eq!(model.region_by_key("S2/R2"), Some(model.states[s32].region));
        assert!(model.is_composite(&"S2".into()));
        assert_eq!(model.parent_of(&"S31".into()), Some(&StateId::from("S2")));
        assert_eq!(model.joins[0].owner, s2);
        assert_eq!(model.forks[&model.index_of(&"FORK".into()).unwrap()].owner, Some(s2));
    }

    #[test]
    fn test_events() {
        let model = orthogonal().build().unwrap();
        assert_eq!(model.events().into_iter().collect::<Vec<_>>(), vec!["E1"]);
        assert_eq!(model.transitions().count(), 2);
    }

    #[test]
    fn test_reject_duplicate_state() {
        let err = error_of(
            ModelData::new()
                .state(StateData::new("S1").initial())
                .state(StateData::new("S1")),
        );
        assert!(err.contains("duplicate state 'S1'"));
    }

    #[test]
    fn test_reject_dangling_transition() {
        let err = error_of(
            ModelData::new()
                .state(StateData::new("S1").initial())
                .transition(TransitionData::external("S1", "S9").event("E1")),
        );
        assert!(err.contains("unknown state 'S9'"));
    }

    #[test]
    fn test_reject_region_without_initial() {
        let err = error_of(
            ModelData::new()
                .state(StateData::new("S1").initial())
                .state(StateData::new("S11").parent("S1")),
        );
        assert!(err.contains("region 'S1/default' has no initial state"));
    }

    #[test]
    fn test_reject_two_top_level_regions() {
        let err = error_of(
            ModelData::new()
                .state(StateData::new("S1").initial())
                .state(StateData::new("S2").region("other").initial()),
        );
        assert!(err.contains("top-level states must share one region"));
    }

    #[test]
    fn test_reject_parent_cycle() {
        let err = error_of(
            ModelData::new()
                .state(StateData::new("S0").initial())
                .state(StateData::new("S1").parent("S2").initial())
                .state(StateData::new("S2").parent("S1").initial()),
        );
        assert!(err.contains("parent cycle"));
    }

    #[test]
    fn test_reject_join_missing_region() {
        let data = orthogonal().join("JOIN", ["S22"]);
        let err = error_of(data);
        assert!(err.contains("join 'JOIN'"));
    }

    #[test]
    fn test_reject_join_sources_in_same_region() {
        let err = error_of(orthogonal().join("JOIN", ["S21", "S22", "S32"]));
        assert!(err.contains("two members in region 'S2/R1'"));
    }

    #[test]
    fn test_reject_triggered_join_transition() {
        let err = error_of(orthogonal().transition(TransitionData::external("JOIN", "S1").event("E9")));
        assert!(err.contains("must be triggerless"));
    }

    #[test]
    fn test_reject_event_on_fork_source() {
        let err = error_of(orthogonal().transition(TransitionData::external("FORK", "S3").event("E9")));
        assert!(err.contains("cannot carry an event trigger"));
    }

    #[test]
    fn test_reject_transition_into_join() {
        let err = error_of(orthogonal().transition(TransitionData::external("S1", "JOIN").event("E9")));
        assert!(err.contains("join sources are declared through the join map"));
    }

    fn choice_model(branches: Vec<BranchData>) -> ModelData {
        ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S3"))
            .state(StateData::new("C").kind(PseudoStateKind::Choice))
            .transition(TransitionData::external("S1", "C").event("E1"))
            .choice("C", branches)
    }

    #[test]
    fn test_reject_ambiguous_choice() {
        let err = error_of(choice_model(vec![BranchData::new("S2"), BranchData::new("S3")]));
        assert!(err.contains("ambiguous unguarded branch"));

        let err = error_of(choice_model(vec![
            BranchData::new("S2").guard(Guard::always(true))
        ]));
        assert!(err.contains("no unguarded default branch"));

        let err = error_of(choice_model(vec![]));
        assert!(err.contains("has no branches"));
    }

    #[test]
    fn test_accept_choice() {
        let model = choice_model(vec![
            BranchData::new("S2").guard(Guard::always(false)),
            BranchData::new("S3"),
        ])
        .build()
        .unwrap();
        let c = model.index_of(&"C".into()).unwrap();
        assert_eq!(model.branches[&c].len(), 2);
    }

    #[test]
    fn test_reject_undeclared_choice() {
        let data = ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("C").kind(PseudoStateKind::Choice));
        assert!(error_of(data).contains("has no Choice declaration"));
    }

    #[test]
    fn test_reject_cyclic_history_default() {
        let data = ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S21").parent("S2").initial())
            .state(StateData::new("H1").parent("S2").kind(PseudoStateKind::HistoryShallow))
            .state(StateData::new("H2").parent("S2").kind(PseudoStateKind::HistoryDeep))
            .history_default("H1", "H2")
            .history_default("H2", "H1");
        assert!(error_of(data).contains("cyclic history default"));
    }

    #[test]
    fn test_reject_history_default_outside_region() {
        let data = ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S21").parent("S2").initial())
            .state(StateData::new("H").parent("S2").kind(PseudoStateKind::HistoryShallow))
            .history_default("H", "S1");
        assert!(error_of(data).contains("lies outside its region"));
    }

    #[test]
    fn test_reject_misdirected_connection_points() {
        let base = || {
            ModelData::new()
                .state(StateData::new("S1").initial())
                .state(StateData::new("S2"))
                .state(StateData::new("S21").parent("S2").initial())
                .state(StateData::new("EN").parent("S2").kind(PseudoStateKind::Entry))
                .state(StateData::new("EX").parent("S2").kind(PseudoStateKind::Exit))
        };
        assert!(error_of(base().entry("EN", "S1").exit("EX", "S1")).contains("must lead into 'S2'"));
        assert!(error_of(base().entry("EN", "S21").exit("EX", "S21")).contains("must lead out of 'S2'"));
        assert!(base().entry("EN", "S21").exit("EX", "S1").build().is_ok());
    }

    #[test]
    fn test_reject_bad_timers() {
        let base = || {
            ModelData::new()
                .state(StateData::new("S1").initial())
                .state(StateData::new("S2"))
        };
        let err = error_of(base().transition(TransitionData::external("S1", "S2").timer(Duration::ZERO)));
        assert!(err.contains("timer period is zero"));

        let err = error_of(base().transition(
            TransitionData::external("S1", "S2")
                .event("E1")
                .timer_once(Duration::from_millis(5)),
        ));
        assert!(err.contains("cannot also carry an event"));
    }

    #[test]
    fn test_reject_internal_between_states() {
        let mut t = TransitionData::external("S1", "S2").event("E1");
        t.kind = TransitionKind::Internal;
        let err = error_of(
            ModelData::new()
                .state(StateData::new("S1").initial())
                .state(StateData::new("S2"))
                .transition(t),
        );
        assert!(err.contains("internal transition must stay in its state"));
    }

    #[test]
    fn test_timer_transitions_are_not_event_candidates() {
        let model = ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .transition(TransitionData::external("S1", "S2").timer_once(Duration::from_millis(5)))
            .transition(TransitionData::external("S1", "S2").event("E1"))
            .build()
            .unwrap();
        let s1 = model.index_of(&"S1".into()).unwrap();
        assert_eq!(model.states[s1].timers, vec![0]);
        assert_eq!(model.states[s1].outgoing, vec![1]);
    }
}
