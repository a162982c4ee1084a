//! The bundled showcase machine.
//!
//! ```text
//! S0
//! +-- S1
//! |   +-- S11 (initial)
//! |   +-- S12
//! +-- S2
//!     +-- S21
//!         +-- S211
//! ```
//!
//! Events `A` to `I` move between the nested states; `A` sets `foo` to 1
//! and `H` only fires from S21 once `foo == 1`.

use statechart_core::{
    Action, CoreError, Guard, Model, ModelData, StateData, TransitionData,
};

pub const EVENTS: [&str; 9] = ["A", "B", "C", "D", "E", "F", "G", "H", "I"];

pub fn model() -> Result<Model, CoreError> {
    let foo_guard = Guard::expression("vars.foo == 1")?;
    ModelData::new()
        .state(StateData::new("S0").initial())
        .state(StateData::new("S1").parent("S0").initial())
        .state(StateData::new("S11").parent("S1").initial())
        .state(StateData::new("S12").parent("S1"))
        .state(StateData::new("S2").parent("S0"))
        .state(StateData::new("S21").parent("S2").initial())
        .state(StateData::new("S211").parent("S21").initial())
        .transition(
            TransitionData::external("S1", "S1")
                .event("A")
                .action(Action::set_variable("foo", 1)),
        )
        .transition(TransitionData::external("S1", "S11").event("B"))
        .transition(TransitionData::external("S21", "S211").event("B"))
        .transition(TransitionData::external("S1", "S2").event("C"))
        .transition(TransitionData::external("S2", "S1").event("C"))
        .transition(TransitionData::external("S1", "S0").event("D"))
        .transition(TransitionData::external("S211", "S21").event("D"))
        .transition(TransitionData::external("S0", "S211").event("E"))
        .transition(TransitionData::external("S1", "S211").event("F"))
        .transition(TransitionData::external("S2", "S11").event("F"))
        .transition(TransitionData::external("S11", "S211").event("G"))
        .transition(TransitionData::external("S211", "S0").event("G"))
        .transition(
            TransitionData::external("S21", "S21")
                .event("H")
                .guard(foo_guard),
        )
        .transition(TransitionData::external("S11", "S12").event("I"))
        .build()
}
