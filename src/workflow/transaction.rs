//! Scoped detection of stage transitions.
//!
//! A transaction remembers the stage pointer on entry and, once the body has
//! run, reports whether the pointer moved. The host uses that signal to
//! re-evaluate so the newly unlocked stage gets presented.
use super::current_stage;
use crate::stage::Stage;
use crate::state::SessionState;

/// The body's value plus what the guard observed around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guarded<R> {
    pub value: R,
    pub before: Stage,
    pub after: Stage,
}

impl<R> Guarded<R> {
    /// True iff the stage pointer differs between entry and exit.
    pub fn rerender(&self) -> bool {
        self.before != self.after
    }
}

/// Run `body` against the state and record the stage on both sides.
///
/// The signal is computed whatever the body returns, so a failing body that
/// still moved the pointer is reported too.
pub fn transaction<R>(
    state: &mut SessionState,
    body: impl FnOnce(&mut SessionState) -> R,
) -> Guarded<R> {
    let before = current_stage(state);
    let value = body(state);
    let after = current_stage(state);
    if before != after {
        tracing::debug!(%before, %after, "stage transition");
    }
    Guarded {
        value,
        before,
        after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::keys::CurrentStage;

    fn at(stage: Stage) -> SessionState {
        let mut state = SessionState::new();
        state.set(CurrentStage, stage);
        state
    }

    #[test]
    fn signals_when_the_pointer_moves() {
        let mut state = at(Stage::GenerateRule);
        let guarded = transaction(&mut state, |state| {
            state.set(CurrentStage, Stage::DevelopGuide);
            7
        });
        assert_eq!(guarded.value, 7);
        assert!(guarded.rerender());
        assert_eq!(guarded.before, Stage::GenerateRule);
        assert_eq!(guarded.after, Stage::DevelopGuide);
    }

    #[test]
    fn silent_when_the_pointer_stays() {
        let mut state = at(Stage::QaReview);
        let guarded = transaction(&mut state, |state| {
            state.set(CurrentStage, Stage::QaReview);
        });
        assert!(!guarded.rerender());
    }

    #[test]
    fn signals_even_when_the_body_fails() {
        let mut state = at(Stage::Init);
        let guarded = transaction(&mut state, |state| -> Result<(), &str> {
            state.set(CurrentStage, Stage::SuggestFromIntel);
            Err("late failure")
        });
        assert!(guarded.value.is_err());
        assert!(guarded.rerender());
    }

    #[test]
    fn missing_pointer_reads_as_initial_stage() {
        let mut state = SessionState::new();
        let guarded = transaction(&mut state, |_| ());
        assert_eq!(guarded.before, Stage::INITIAL);
        assert!(!guarded.rerender());
    }
}
