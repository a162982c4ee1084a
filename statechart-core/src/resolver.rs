//! Transition selection and execution.
//!
//! A committed transition works on a *domain*: the region whose active
//! subtree is exited before the transition actions run and re-entered
//! afterwards. External transitions use the innermost region enclosing
//! both ends, local transitions between a composite and its descendant use
//! the composite's own region on that path, and internal transitions have
//! no domain at all. Pseudostate chains widen the domain one step at a time
//! when a continuation leaves it.

use crate::action::{Action, ActionExecutor, Stage};
use crate::activity::{ActivityContext, CancellationToken, RunningActivity};
use crate::config::ConflictPolicy;
use crate::data::{PseudoStateKind, StateId, TransitionKind};
use crate::dispatcher::{Outcome, Pass};
use crate::message::Message;
use crate::model::{Branch, RegionIdx, StateIdx, TransitionIdx, TransitionInfo};
use std::cmp::Reverse;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryMode {
    Normal,
    /// Restore recorded children all the way down.
    Deep,
}

impl<'a> Pass<'a> {
    // =========================================================================
    // Selection
    // =========================================================================

    /// Fires the first enabled transition for `event` (`None` selects
    /// triggerless transitions).
    pub(crate) fn resolve(&mut self, event: Option<&str>) -> Outcome {
        let model = self.model;
        let mut candidates: Vec<TransitionIdx> = self
            .rt
            .active_states(model)
            .into_iter()
            .flat_map(|s| model.states[s].outgoing.iter().copied())
            .filter(|t| model.transitions[*t].event.as_deref() == event)
            .collect();
        candidates.sort_unstable();

        let depth = |t: &TransitionIdx| model.states[model.transitions[*t].source].depth;
        match self.shared.config.machine.conflict_policy {
            ConflictPolicy::Child => candidates.sort_by_key(|t| Reverse(depth(t))),
            ConflictPolicy::Parent => candidates.sort_by_key(depth),
        }

        for t in candidates {
            if self.guard_passes(t) {
                return self.fire(t, None);
            }
            tracing::trace!(
                "Guard rejected transition {} -> {}",
                model.transitions[t].info.source,
                model.transitions[t].info.target
            );
        }
        Outcome::NotAccepted
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Runs a selected transition. `domain` overrides the computed exit
    /// domain (joins exit their whole composite).
    pub(crate) fn fire(&mut self, t: TransitionIdx, domain: Option<RegionIdx>) -> Outcome {
        let model = self.model;
        let transition = &model.transitions[t];
        let info = &transition.info;

        let authorizer = self.shared.authorizer.read().clone();
        if let Some(authorizer) = authorizer {
            let principal = self.message.as_ref().and_then(Message::principal);
            if !authorizer.is_authorized(info, principal) {
                tracing::info!("Transition {} -> {} denied", info.source, info.target);
                self.shared.listeners.notify(|l| l.transition_denied(info));
                return Outcome::Denied;
            }
        }
        if !self
            .shared
            .interceptors
            .pre_transition(info, self.message.as_ref())
        {
            tracing::debug!(
                "Transition {} -> {} vetoed by interceptor",
                info.source,
                info.target
            );
            return Outcome::Denied;
        }

        tracing::debug!(
            "Firing transition {} -> {} ({:?})",
            info.source,
            info.target,
            transition.kind
        );
        self.shared.listeners.notify(|l| l.transition_started(info));
        if let Some(message) = &self.message {
            self.rt.last_message = Some(message.clone());
        }
        self.landed = None;

        if transition.kind == TransitionKind::Internal {
            self.run_transition_actions(t);
        } else {
            self.shared.interceptors.pre_state_change(&info.target, info);
            let domain = domain.unwrap_or_else(|| self.domain_of(t));
            self.exit_region(domain);
            self.run_transition_actions(t);
            self.land(transition.target, domain);
        }

        self.shared.listeners.notify(|l| l.transition(info));
        self.shared.listeners.notify(|l| l.transition_ended(info));
        self.shared
            .interceptors
            .post_transition(info, self.message.as_ref());

        if transition.kind != TransitionKind::Internal {
            let to = self.landed.map(|s| &model.states[s].id);
            self.shared
                .listeners
                .notify(|l| l.state_changed(Some(&info.source), to));
            self.publish();
            self.after_state_change(info);
        }
        Outcome::Fired
    }

    fn domain_of(&self, t: TransitionIdx) -> RegionIdx {
        let model = self.model;
        let transition = &model.transitions[t];
        let (source, target) = (transition.source, transition.target);
        let owned_by = |owner: StateIdx, inner: StateIdx| {
            model
                .region_chain(inner)
                .into_iter()
                .find(|r| model.regions[*r].owner == Some(owner))
        };
        let local = match transition.kind {
            TransitionKind::Local if model.is_ancestor(source, target) => owned_by(source, target),
            TransitionKind::Local if model.is_ancestor(target, source) => owned_by(target, source),
            _ => None,
        };
        local.unwrap_or_else(|| model.lca_region(source, target))
    }

    fn run_transition_actions(&mut self, t: TransitionIdx) {
        let transition = &self.model.transitions[t];
        self.run_actions(
            Stage::Transition,
            &transition.actions,
            Some(&transition.info.source),
            Some(&transition.info.target),
            None,
        );
    }

    fn after_state_change(&self, info: &TransitionInfo) {
        let ensemble = self.shared.ensemble.read().clone();
        if self.shared.interceptors.is_empty() && ensemble.is_none() {
            return;
        }
        let ctx = self.snapshot();
        self.shared.interceptors.post_state_change(info, &ctx);
        if let Some(ensemble) = ensemble {
            ensemble.state_changed(&ctx);
        }
    }

    // =========================================================================
    // Pseudostate landing
    // =========================================================================

    /// Resolves `target` to real states and enters them below `domain`.
    fn land(&mut self, target: StateIdx, domain: RegionIdx) {
        let model = self.model;
        match model.states[target].kind {
            Some(PseudoStateKind::Choice) | Some(PseudoStateKind::Junction) => {
                let Some(branch) = self.select_branch(target) else {
                    tracing::error!("No branch of {} selected", model.states[target].id);
                    return;
                };
                self.run_actions(
                    Stage::Transition,
                    &branch.actions,
                    Some(&model.states[target].id),
                    Some(&model.states[branch.target].id),
                    None,
                );
                let domain = self.widen(domain, branch.target);
                self.land(branch.target, domain);
            }
            Some(PseudoStateKind::Entry) | Some(PseudoStateKind::Exit) => {
                let Some(next) = model.continuations.get(&target).copied() else {
                    tracing::error!("Connection point {} has no target", model.states[target].id);
                    return;
                };
                let domain = self.widen(domain, next);
                self.land(next, domain);
            }
            Some(PseudoStateKind::HistoryShallow) | Some(PseudoStateKind::HistoryDeep) => {
                self.land_history(target, domain)
            }
            Some(PseudoStateKind::Fork) => {
                let Some(fork) = model.forks.get(&target) else {
                    tracing::error!("Fork {} has no targets", model.states[target].id);
                    return;
                };
                let mut domain = domain;
                for t in &fork.targets {
                    domain = self.widen(domain, *t);
                }
                self.landed = fork.owner.or(fork.targets.first().copied());
                let targets: Vec<(StateIdx, EntryMode)> = fork
                    .targets
                    .iter()
                    .map(|t| (*t, EntryMode::Normal))
                    .collect();
                self.enter_region_with(domain, &targets);
            }
            Some(PseudoStateKind::Join) => {
                tracing::error!("Join {} cannot be a target", model.states[target].id);
            }
            _ => {
                self.landed = Some(target);
                self.enter_region_with(domain, &[(target, EntryMode::Normal)]);
            }
        }
    }

    /// First branch whose guard passes; the unguarded default is last.
    fn select_branch(&self, choice: StateIdx) -> Option<&'a Branch> {
        let model = self.model;
        let branches = model.branches.get(&choice)?;
        let id = &model.states[choice].id;
        branches
            .iter()
            .find(|b| {
                let ctx = self.state_context(
                    Stage::Guard,
                    Some(id),
                    Some(&model.states[b.target].id),
                    None,
                );
                self.guard_outcome(ActionExecutor::evaluate(b.guard.as_ref(), &ctx))
            })
            .or_else(|| branches.last())
    }

    fn land_history(&mut self, history: StateIdx, domain: RegionIdx) {
        let model = self.model;
        let r = model.states[history].region;
        let mode = match model.states[history].kind {
            Some(PseudoStateKind::HistoryDeep) => EntryMode::Deep,
            _ => EntryMode::Normal,
        };

        if let Some(recorded) = self.rt.history.get(&r).copied() {
            tracing::debug!("Restoring history {}", model.states[recorded].id);
            self.landed = Some(recorded);
            self.enter_region_with(domain, &[(recorded, mode)]);
        } else if let Some(default) = model.history_defaults.get(&history).copied() {
            let domain = self.widen(domain, default);
            self.land(default, domain);
        } else {
            match model.regions[r].owner {
                Some(owner) if domain != r => {
                    self.landed = Some(owner);
                    self.enter_region_with(domain, &[(owner, EntryMode::Normal)]);
                }
                _ => self.default_enter(r),
            }
        }
    }

    /// Grows `domain` until it encloses `next`, exiting what it gains.
    fn widen(&mut self, domain: RegionIdx, next: StateIdx) -> RegionIdx {
        let model = self.model;
        let chain = model.region_chain(next);
        let widened = model
            .region_ancestors(domain)
            .into_iter()
            .find(|r| chain.contains(r))
            .unwrap_or(model.root);
        if widened != domain {
            self.exit_region(widened);
        }
        widened
    }

    // =========================================================================
    // Exit
    // =========================================================================

    /// Exits the active subtree of `r`, innermost first.
    pub(crate) fn exit_region(&mut self, r: RegionIdx) {
        if let Some(s) = self.rt.active[r] {
            self.exit_state(s);
        }
    }

    fn exit_state(&mut self, s: StateIdx) {
        let model = self.model;
        let node = &model.states[s];
        for r in node.regions.iter().rev() {
            self.exit_region(*r);
        }

        for t in &node.timers {
            self.rt.timers.cancel(*t);
        }
        if let Some(running) = self.rt.activities.remove(&s) {
            let policy = self.shared.config.activity.policy;
            for activity in running {
                activity.stop(policy, &self.shared.executor);
            }
        }

        self.run_actions(Stage::StateExit, &node.exit_actions, None, None, Some(&node.id));
        self.rt.history.insert(node.region, s);
        self.rt.active[node.region] = None;
        self.exited_any = true;
        tracing::trace!("Exited {}", node.id);
        self.shared.listeners.notify(|l| l.state_exited(&node.id));
    }

    // =========================================================================
    // Entry
    // =========================================================================

    /// Enters region `r` along the paths to `targets`; a region no target
    /// lies in is entered through its initial state.
    fn enter_region_with(&mut self, r: RegionIdx, targets: &[(StateIdx, EntryMode)]) {
        let model = self.model;
        let inside: Vec<(StateIdx, EntryMode)> = targets
            .iter()
            .copied()
            .filter(|(t, _)| model.child_in_region(*t, r).is_some())
            .collect();
        let Some(child) = inside
            .first()
            .and_then(|(t, _)| model.child_in_region(*t, r))
        else {
            self.default_enter(r);
            return;
        };

        if let Some((_, mode)) = inside.iter().find(|(t, _)| *t == child) {
            self.enter_state(child, *mode);
            return;
        }
        self.activate(child);
        for sub in &model.states[child].regions {
            self.enter_region_with(*sub, &inside);
        }
    }

    fn enter_state(&mut self, s: StateIdx, mode: EntryMode) {
        let model = self.model;
        self.activate(s);
        for r in &model.states[s].regions {
            match (mode, self.rt.history.get(r).copied()) {
                (EntryMode::Deep, Some(recorded)) => self.enter_state(recorded, EntryMode::Deep),
                _ => self.default_enter(*r),
            }
        }
    }

    pub(crate) fn default_enter(&mut self, r: RegionIdx) {
        let model = self.model;
        let initial = model.regions[r].initial;
        let node = &model.states[initial];
        if let Some(action) = &node.initial_action {
            self.run_actions(
                Stage::InitialAction,
                std::slice::from_ref(action),
                None,
                Some(&node.id),
                Some(&node.id),
            );
        }
        self.enter_state(initial, EntryMode::Normal);
    }

    /// Makes `s` the active state of its region.
    fn activate(&mut self, s: StateIdx) {
        let model = self.model;
        let node = &model.states[s];
        match self.rt.active[node.region] {
            Some(current) if current == s => return,
            Some(current) => self.exit_state(current),
            None => {}
        }

        self.rt.active[node.region] = Some(s);
        self.run_actions(Stage::StateEntry, &node.entry_actions, None, None, Some(&node.id));
        tracing::trace!("Entered {}", node.id);
        self.shared.listeners.notify(|l| l.state_entered(&node.id));
        self.start_activities(s);
        self.start_timers(s);
    }

    pub(crate) fn start_timers(&mut self, s: StateIdx) {
        let model = self.model;
        let node = &model.states[s];
        if node.timers.is_empty() {
            return;
        }
        let fire = self.timer_fire();
        for t in &node.timers {
            if let Some(spec) = model.transitions[*t].timer {
                self.rt
                    .timers
                    .schedule(&self.shared.executor, *t, spec, fire.clone());
            }
        }
    }

    /// Starts do-activities; the grace period comes from the entering
    /// event's header when present.
    pub(crate) fn start_activities(&mut self, s: StateIdx) {
        let model = self.model;
        let node = &model.states[s];
        if node.do_activities.is_empty() {
            return;
        }
        let timeout = self
            .message
            .as_ref()
            .and_then(Message::do_action_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.shared.config.activity.timeout());
        let sink = self.activity_failure_sink();

        let running = node
            .do_activities
            .iter()
            .map(|activity| {
                let ctx = ActivityContext {
                    state: node.id.clone(),
                    machine_id: self.rt.machine_id.clone(),
                    message: self.message.clone(),
                    extended_state: self.shared.extended_state.clone(),
                    token: CancellationToken::new(),
                };
                RunningActivity::spawn(
                    &self.shared.executor,
                    activity.clone(),
                    ctx,
                    timeout,
                    sink.clone(),
                )
            })
            .collect();
        if let Some(previous) = self.rt.activities.insert(s, running) {
            for activity in previous {
                activity.cancel();
            }
        }
    }

    pub(crate) fn run_actions(
        &self,
        stage: Stage,
        actions: &[Action],
        source: Option<&StateId>,
        target: Option<&StateId>,
        state: Option<&StateId>,
    ) {
        if actions.is_empty() {
            return;
        }
        let failures = {
            let ctx = self.state_context(stage, source, target, state);
            ActionExecutor::execute(actions, &ctx)
        };
        self.report(failures);
    }
}

#[cfg(test)]
mod tests {
    use crate::action::{Action, Guard, Stage};
    use crate::config::{ConflictPolicy, StateMachineConfig};
    use crate::data::{BranchData, ModelData, PseudoStateKind, StateData, StateId, TransitionData};
    use crate::message::EventResult;
    use crate::testing::{ids, machine, machine_with};
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn fork_join() -> ModelData {
        ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S3"))
            .state(StateData::new("FORK").kind(PseudoStateKind::Fork))
            .state(StateData::new("JOIN").kind(PseudoStateKind::Join))
            .state(StateData::new("S20").parent("S2").region("R1").initial())
            .state(StateData::new("S210").parent("S2").region("R1"))
            .state(StateData::new("S211").parent("S2").region("R1"))
            .state(StateData::new("S21I").parent("S2").region("R2").initial())
            .state(StateData::new("S220").parent("S2").region("R2"))
            .state(StateData::new("S221").parent("S2").region("R2"))
            .transition(TransitionData::external("S1", "FORK").event("E1"))
            .transition(TransitionData::external("S210", "S211").event("E2"))
            .transition(TransitionData::external("S220", "S221").event("E3"))
            .transition(TransitionData::external("JOIN", "S3"))
            .fork("FORK", ["S210", "S220"])
            .join("JOIN", ["S211", "S221"])
    }

    #[test]
    fn test_fork_enters_all_regions() {
        let (machine, recorder) = machine(fork_join().build().unwrap());
        machine.start();
        assert_eq!(ids(&machine), vec!["S1"]);
        recorder.clear();

        assert!(machine.send_event("E1"));
        assert_eq!(ids(&machine), vec!["S2", "S210", "S220"]);
        assert_eq!(recorder.entered(), vec!["S2", "S210", "S220"]);
        assert_eq!(recorder.exited(), vec!["S1"]);
    }

    #[test]
    fn test_join_waits_for_all_sources() {
        let (machine, recorder) = machine(fork_join().build().unwrap());
        machine.start();
        machine.send_event("E1");
        recorder.clear();

        machine.send_event("E2");
        assert_eq!(ids(&machine), vec!["S2", "S211", "S220"]);
        assert_eq!(recorder.entered().len(), 1);
        assert_eq!(recorder.exited().len(), 1);
        recorder.clear();

        machine.send_event("E3");
        assert_eq!(ids(&machine), vec!["S3"]);
        assert_eq!(recorder.exited(), vec!["S220", "S221", "S211", "S2"]);
        assert_eq!(recorder.entered(), vec!["S221", "S3"]);
    }

    #[test]
    fn test_fork_via_choice() {
        let data = fork_join()
            .state(StateData::new("C").kind(PseudoStateKind::Choice))
            .transition(TransitionData::external("S1", "C").event("E9"))
            .choice(
                "C",
                vec![
                    BranchData::new("S3").guard(Guard::always(false)),
                    BranchData::new("FORK"),
                ],
            );
        let (machine, recorder) = machine(data.build().unwrap());
        machine.start();
        recorder.clear();

        machine.send_event("E9");
        assert_eq!(ids(&machine), vec!["S2", "S210", "S220"]);
        assert_eq!(recorder.entered().len(), 3);
    }

    fn choice(go: &str) -> ModelData {
        ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S3"))
            .state(StateData::new("S4"))
            .state(StateData::new("C").kind(PseudoStateKind::Choice))
            .transition(TransitionData::external("S1", "C").event("E1"))
            .transition(TransitionData::external("S4", "S1").event("E2"))
            .choice(
                "C",
                vec![
                    BranchData::new("S2").guard(Guard::expression(go).unwrap()),
                    BranchData::new("S3").action(Action::set_variable("branch", "default")),
                ],
            )
    }

    #[test]
    fn test_choice_falls_back_to_default() {
        let (machine, recorder) = machine(choice("vars.go == true").build().unwrap());
        machine.start();
        assert!(machine.send_event("E1"));
        assert_eq!(ids(&machine), vec!["S3"]);
        assert_eq!(machine.extended_state().get("branch"), Some(json!("default")));
        assert_eq!(recorder.transitions(), 1);
    }

    #[test]
    fn test_choice_reroutes_when_guard_passes() {
        let (machine, recorder) = machine(choice("vars.go == true").build().unwrap());
        machine.extended_state().insert("go", true);
        machine.start();
        assert!(machine.send_event("E1"));
        assert_eq!(ids(&machine), vec!["S2"]);
        assert_eq!(machine.extended_state().get("branch"), None);
        assert_eq!(recorder.transitions(), 1);
    }

    #[test]
    fn test_choice_junction_chain() {
        let data = choice("vars.go")
            .state(StateData::new("J").kind(PseudoStateKind::Junction))
            .transition(TransitionData::external("S2", "J").event("E3"))
            .junction(
                "J",
                vec![
                    BranchData::new("S1").guard(Guard::expression("vars.back").unwrap()),
                    BranchData::new("S4"),
                ],
            );
        let (machine, _) = machine(data.build().unwrap());
        machine.extended_state().insert("go", 1);
        machine.start();
        machine.send_event("E1");
        machine.send_event("E3");
        assert_eq!(ids(&machine), vec!["S4"]);
    }

    fn local_external() -> ModelData {
        ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S21").parent("S2").initial())
            .state(StateData::new("S22").parent("S2"))
            .transition(TransitionData::external("S1", "S2").event("E1"))
            .transition(TransitionData::local("S2", "S21").event("LOCAL"))
            .transition(TransitionData::external("S2", "S21").event("EXTERNAL"))
            .transition(TransitionData::local("S2", "S22").event("LOCAL22"))
            .transition(TransitionData::local("S22", "S2").event("UP"))
    }

    #[test]
    fn test_local_transition_keeps_composite() {
        let (machine, recorder) = machine(local_external().build().unwrap());
        machine.start();
        machine.send_event("E1");
        recorder.clear();

        machine.send_event("LOCAL");
        assert_eq!(recorder.exited(), vec!["S21"]);
        assert_eq!(recorder.entered(), vec!["S21"]);
        recorder.clear();

        machine.send_event("LOCAL22");
        assert_eq!(recorder.exited(), vec!["S21"]);
        assert_eq!(recorder.entered(), vec!["S22"]);
        assert_eq!(ids(&machine), vec!["S2", "S22"]);
        recorder.clear();

        machine.send_event("UP");
        assert_eq!(recorder.exited(), vec!["S22"]);
        assert_eq!(recorder.entered(), vec!["S21"]);
        assert_eq!(ids(&machine), vec!["S2", "S21"]);
    }

    #[test]
    fn test_external_transition_reenters_composite() {
        let (machine, recorder) = machine(local_external().build().unwrap());
        machine.start();
        machine.send_event("E1");
        recorder.clear();

        machine.send_event("EXTERNAL");
        assert_eq!(recorder.exited(), vec!["S21", "S2"]);
        assert_eq!(recorder.entered(), vec!["S2", "S21"]);
    }

    #[test]
    fn test_internal_transition_runs_actions_only() {
        let data = ModelData::new()
            .state(StateData::new("S1").initial())
            .transition(
                TransitionData::internal("S1")
                    .event("TICK")
                    .action(Action::new(|ctx| {
                        ctx.extended_state()
                            .update("ticks", |v| json!(v.and_then(|v| v.as_i64()).unwrap_or(0) + 1));
                    })),
            );
        let (machine, recorder) = machine(data.build().unwrap());
        machine.start();
        recorder.clear();

        assert!(machine.send_event("TICK"));
        assert!(machine.send_event("TICK"));
        assert!(recorder.entered().is_empty());
        assert!(recorder.exited().is_empty());
        assert_eq!(machine.extended_state().get("ticks"), Some(json!(2)));
    }

    fn history(kind: PseudoStateKind) -> ModelData {
        ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S21").parent("S2").initial())
            .state(StateData::new("S22").parent("S2"))
            .state(StateData::new("S221").parent("S22").initial())
            .state(StateData::new("S222").parent("S22"))
            .state(StateData::new("H").parent("S2").kind(kind))
            .transition(TransitionData::external("S1", "S2").event("E1"))
            .transition(TransitionData::external("S21", "S22").event("E2"))
            .transition(TransitionData::external("S221", "S222").event("E3"))
            .transition(TransitionData::external("S2", "S1").event("E4"))
            .transition(TransitionData::external("S1", "H").event("E5"))
    }

    #[test]
    fn test_shallow_history_restores_child() {
        let (machine, _) = machine(history(PseudoStateKind::HistoryShallow).build().unwrap());
        machine.start();
        machine.send_event("E1");
        machine.send_event("E2");
        machine.send_event("E3");
        assert_eq!(ids(&machine), vec!["S2", "S22", "S222"]);

        machine.send_event("E4");
        assert_eq!(ids(&machine), vec!["S1"]);
        machine.send_event("E5");
        assert_eq!(ids(&machine), vec!["S2", "S22", "S221"]);
    }

    #[test]
    fn test_deep_history_restores_leaf() {
        let (machine, _) = machine(history(PseudoStateKind::HistoryDeep).build().unwrap());
        machine.start();
        for event in ["E1", "E2", "E3", "E4", "E5"] {
            machine.send_event(event);
        }
        assert_eq!(ids(&machine), vec!["S2", "S22", "S222"]);
    }

    #[test]
    fn test_history_without_record_uses_default() {
        let data = history(PseudoStateKind::HistoryShallow).history_default("H", "S22");
        let (machine, _) = machine(data.build().unwrap());
        machine.start();
        machine.send_event("E5");
        assert_eq!(ids(&machine), vec!["S2", "S22", "S221"]);

        let (machine, _) = crate::testing::machine(history(PseudoStateKind::HistoryShallow).build().unwrap());
        machine.start();
        machine.send_event("E5");
        assert_eq!(ids(&machine), vec!["S2", "S21"]);
    }

    #[test]
    fn test_entry_and_exit_points() {
        let data = ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S3"))
            .state(StateData::new("S21").parent("S2").initial())
            .state(StateData::new("S22").parent("S2"))
            .state(StateData::new("ENTRY").parent("S2").kind(PseudoStateKind::Entry))
            .state(StateData::new("EXIT").parent("S2").kind(PseudoStateKind::Exit))
            .transition(TransitionData::external("S1", "ENTRY").event("E1"))
            .transition(TransitionData::external("S22", "EXIT").event("E2"))
            .entry("ENTRY", "S22")
            .exit("EXIT", "S3");
        let (machine, recorder) = machine(data.build().unwrap());
        machine.start();
        recorder.clear();

        machine.send_event("E1");
        assert_eq!(ids(&machine), vec!["S2", "S22"]);
        assert_eq!(recorder.entered(), vec!["S2", "S22"]);
        recorder.clear();

        machine.send_event("E2");
        assert_eq!(ids(&machine), vec!["S3"]);
        assert_eq!(recorder.exited(), vec!["S22", "S2"]);
        assert_eq!(recorder.entered(), vec!["S3"]);
    }

    fn conflict(parent_guard: bool) -> ModelData {
        ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S3"))
            .state(StateData::new("S11").parent("S1").initial())
            .transition(
                TransitionData::external("S1", "S2")
                    .event("E1")
                    .guard(Guard::always(parent_guard)),
            )
            .transition(TransitionData::external("S11", "S3").event("E1"))
    }

    fn with_policy(policy: ConflictPolicy) -> StateMachineConfig {
        let mut config = StateMachineConfig::default();
        config.machine.conflict_policy = policy;
        config
    }

    #[test]
    fn test_conflict_child_wins_by_default() {
        let (machine, _) = machine(conflict(true).build().unwrap());
        machine.start();
        machine.send_event("E1");
        assert_eq!(ids(&machine), vec!["S3"]);
    }

    #[test]
    fn test_conflict_parent_policy() {
        let (machine, _) = machine_with(
            conflict(true).build().unwrap(),
            with_policy(ConflictPolicy::Parent),
        );
        machine.start();
        machine.send_event("E1");
        assert_eq!(ids(&machine), vec!["S2"]);
    }

    #[test]
    fn test_conflict_falls_through_rejected_guard() {
        let (machine, _) = machine_with(
            conflict(false).build().unwrap(),
            with_policy(ConflictPolicy::Parent),
        );
        machine.start();
        machine.send_event("E1");
        assert_eq!(ids(&machine), vec!["S3"]);
    }

    #[test]
    fn test_failing_guard_skips_candidate() {
        let data = ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .state(StateData::new("S3"))
            .transition(
                TransitionData::external("S1", "S2")
                    .event("E1")
                    .guard(Guard::fallible(|_| Err::<bool, _>("boom"))),
            )
            .transition(TransitionData::external("S1", "S3").event("E1"));
        let (machine, recorder) = machine(data.build().unwrap());
        machine.start();
        assert_eq!(machine.send("E1"), EventResult::Accepted);
        assert_eq!(ids(&machine), vec!["S3"]);
        assert!(machine.has_state_machine_error());

        let errors = recorder.errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, Stage::Guard);
        assert_eq!(errors[0].source, Some(StateId::from("S1")));
        assert_eq!(errors[0].target, Some(StateId::from("S2")));
        assert_eq!(errors[0].event.as_deref(), Some("E1"));
        assert_eq!(errors[0].error.message(), "boom");
    }

    #[test]
    fn test_failing_choice_guard_takes_default_branch() {
        let data = ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("C").kind(PseudoStateKind::Choice))
            .state(StateData::new("S2"))
            .state(StateData::new("S3"))
            .transition(TransitionData::external("S1", "C").event("E1"))
            .choice(
                "C",
                vec![
                    BranchData::new("S2").guard(Guard::new(|_| panic!("bad guard"))),
                    BranchData::new("S3"),
                ],
            );
        let (machine, recorder) = machine(data.build().unwrap());
        machine.start();
        assert!(machine.send_event("E1"));
        assert_eq!(ids(&machine), vec!["S3"]);

        let errors = recorder.errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, Stage::Guard);
        assert_eq!(errors[0].source, Some(StateId::from("C")));
    }

    #[test]
    fn test_unknown_event_not_accepted() {
        let (machine, recorder) = machine(local_external().build().unwrap());
        machine.start();
        assert!(!machine.send_event("NOPE"));
        assert_eq!(*recorder.not_accepted.lock(), vec!["NOPE"]);
        assert_eq!(ids(&machine), vec!["S1"]);
    }

    #[test]
    fn test_self_transition_exits_and_reenters() {
        let data = ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S11").parent("S1").initial())
            .transition(TransitionData::external("S1", "S1").event("E1"));
        let (machine, recorder) = machine(data.build().unwrap());
        machine.start();
        recorder.clear();
        machine.send_event("E1");
        assert_eq!(recorder.exited(), vec!["S11", "S1"]);
        assert_eq!(recorder.entered(), vec!["S1", "S11"]);
    }

    const EVENTS: [&str; 7] = ["E1", "E2", "E3", "E4", "E5", "LOCAL", "NOPE"];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_one_active_state_per_region(events in proptest::collection::vec(0..EVENTS.len(), 0..24)) {
            let (machine, _) = machine(history(PseudoStateKind::HistoryDeep).build().unwrap());
            machine.start();
            let model = machine.model();
            for e in events {
                machine.send_event(EVENTS[e]);
                let active = machine.state();
                let mut regions = HashSet::new();
                for id in &active {
                    let s = model.index_of(id).unwrap();
                    prop_assert!(!model.is_transient(s));
                    prop_assert!(regions.insert(model.states[s].region));
                    if let Some(parent) = model.parent(s) {
                        prop_assert!(active.contains(&model.states[parent].id));
                    }
                }
                for id in &active {
                    let s = model.index_of(id).unwrap();
                    for r in &model.states[s].regions {
                        prop_assert!(regions.contains(r));
                    }
                }
            }
        }
    }
}
