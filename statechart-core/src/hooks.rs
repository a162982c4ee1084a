//! Optional integration hooks.

use crate::context::StateMachineContext;
use crate::message::Message;
use crate::model::TransitionInfo;

/// Decides whether a transition may fire.
///
/// `principal` is taken from the `statechart.principal` header of the
/// triggering event. A denied transition is reported through
/// `transition_denied` and makes the event result `Denied`.
pub trait TransitionAuthorizer: Send + Sync {
    fn is_authorized(&self, transition: &TransitionInfo, principal: Option<&str>) -> bool;
}

/// Allows transitions whose security rule names the principal.
///
/// Rules are comma separated principal names; `*` allows everyone and a
/// transition without a rule is always allowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleAuthorizer;

impl TransitionAuthorizer for RuleAuthorizer {
    fn is_authorized(&self, transition: &TransitionInfo, principal: Option<&str>) -> bool {
        let Some(rule) = transition.security_rule.as_deref() else {
            return true;
        };
        rule.split(',')
            .map(str::trim)
            .any(|allowed| allowed == "*" || Some(allowed) == principal)
    }
}

/// Coordination with other machine instances.
pub trait EnsembleHook: Send + Sync {
    /// Only the leader processes events; followers drop them.
    fn is_leader(&self, _message: &Message) -> bool {
        true
    }

    /// Called with the settled context after every committed transition.
    fn state_changed(&self, context: &StateMachineContext);
}
