//! Decision engine for executing triage protocols.
//!
//! Every operation takes the previous [`Run`] by reference and returns a new
//! one; the input is never mutated. Rules:
//! - RedFlag selections are aggregated across the whole run and drive the
//!   Initial step's "Yes" branch
//! - Choice/Count steps derive their outcome from the number of selected flags
//! - Any outcome change cascades a reset over every later non-RedFlag step
//!   and reveals the new outcome's successors

use crate::{Disposition, Next, Protocol, Run, StepKind, StepState};

/// Start a fresh run of a protocol
///
/// Every step up to and including the Initial step is visible.
pub fn start(protocol: &Protocol) -> Run {
    let initial = protocol.initial_index();
    let step_states = (0..protocol.steps.len())
        .map(|index| StepState {
            visible: index <= initial,
            ..StepState::default()
        })
        .collect();

    tracing::debug!("Started run of protocol {}", protocol.id);

    Run {
        protocol_id: protocol.id.clone(),
        step_states,
        active_disposition: None,
    }
}

/// Flip one flag on a step and re-derive the affected outcome
pub fn toggle_flag(protocol: &Protocol, run: &Run, step_index: usize, flag_index: usize) -> Run {
    check_step(protocol, run, step_index);
    let step = &protocol.steps[step_index];
    assert!(
        flag_index < step.flag_options.len(),
        "flag index {} out of range for step {} of protocol {}",
        flag_index,
        step_index,
        protocol.id
    );

    let mut next = run.clone();
    let flags = &mut next.step_states[step_index].selected_flags;
    if !flags.remove(&flag_index) {
        flags.insert(flag_index);
    }

    match step.kind {
        StepKind::RedFlag => {
            sync_red_flag_mirror(protocol, &mut next);
            derive_initial(protocol, &mut next);
        }
        StepKind::Initial => {
            derive_initial(protocol, &mut next);
        }
        StepKind::Choice => {
            let outcome = if next.step_states[step_index].selected_flags.is_empty() {
                1
            } else {
                0
            };
            apply_derived_outcome(protocol, &mut next, step_index, outcome);
        }
        StepKind::Count => {
            let outcome =
                if next.step_states[step_index].selected_flags.len() >= step.count_threshold() {
                    0
                } else {
                    1
                };
            apply_derived_outcome(protocol, &mut next, step_index, outcome);
        }
        StepKind::Action => {}
    }

    next
}

/// Answer a step explicitly with one of its outcomes
pub fn choose_outcome(
    protocol: &Protocol,
    run: &Run,
    step_index: usize,
    outcome_index: usize,
) -> Run {
    check_step(protocol, run, step_index);
    let step = &protocol.steps[step_index];
    assert!(
        outcome_index < step.outcomes.len(),
        "outcome index {} out of range for step {} of protocol {}",
        outcome_index,
        step_index,
        protocol.id
    );
    let outcome = &step.outcomes[outcome_index];

    let mut next = run.clone();
    next.step_states[step_index].chosen_outcome = Some(outcome_index);

    if step_index == protocol.initial_index() {
        let is_yes = outcome_index == 0;
        if is_yes && outcome.select_all_flags {
            select_all(protocol, &mut next, step_index);
            for rf in protocol.red_flag_indices() {
                select_all(protocol, &mut next, rf);
            }
        } else if !is_yes {
            next.step_states[step_index].selected_flags.clear();
            for rf in protocol.red_flag_indices() {
                next.step_states[rf].selected_flags.clear();
            }
        }
    } else if !step.flag_options.is_empty() {
        if outcome.select_all_flags {
            select_all(protocol, &mut next, step_index);
        } else {
            next.step_states[step_index].selected_flags.clear();
        }
    }

    cascade_reset(protocol, &mut next, step_index);
    reveal(&mut next, &outcome.next);
    next.active_disposition = outcome.primary_disposition().cloned();

    tracing::debug!(
        "Step {} of {} answered with outcome {} ({})",
        step_index,
        protocol.id,
        outcome_index,
        outcome.label
    );

    next
}

/// Withdraw the most recent answer
///
/// The highest-indexed answered non-RedFlag step is cleared together with
/// everything below it. Undoing the Initial step also clears every RedFlag
/// selection.
pub fn undo(protocol: &Protocol, run: &Run) -> Run {
    let last_answered = run
        .step_states
        .iter()
        .enumerate()
        .rev()
        .find(|(index, state)| {
            protocol.steps[*index].kind != StepKind::RedFlag && state.chosen_outcome.is_some()
        })
        .map(|(index, _)| index);

    let Some(step_index) = last_answered else {
        tracing::debug!("Nothing to undo in protocol {}", protocol.id);
        return run.clone();
    };

    let mut next = run.clone();
    let state = &mut next.step_states[step_index];
    state.chosen_outcome = None;
    state.selected_flags.clear();

    if step_index == protocol.initial_index() {
        for rf in protocol.red_flag_indices() {
            next.step_states[rf].selected_flags.clear();
        }
        cascade_reset(protocol, &mut next, step_index);
        next.active_disposition = None;
    } else {
        cascade_reset(protocol, &mut next, step_index);
        next.active_disposition = nearest_disposition_before(protocol, &next, step_index);
    }

    tracing::debug!("Undid step {} of protocol {}", step_index, protocol.id);
    next
}

/// Indices of all visible steps, in order
pub fn visible_steps(run: &Run) -> Vec<usize> {
    run.step_states
        .iter()
        .enumerate()
        .filter(|(_, state)| state.visible)
        .map(|(index, _)| index)
        .collect()
}

/// Total number of selected flags over every RedFlag step
pub fn total_red_flags_selected(protocol: &Protocol, run: &Run) -> usize {
    protocol
        .red_flag_indices()
        .into_iter()
        .map(|rf| run.step_states[rf].selected_flags.len())
        .sum()
}

fn check_step(protocol: &Protocol, run: &Run, step_index: usize) {
    assert_eq!(
        run.step_states.len(),
        protocol.steps.len(),
        "run of {} does not match protocol {}",
        run.protocol_id,
        protocol.id
    );
    assert!(
        step_index < protocol.steps.len(),
        "step index {} out of range for protocol {}",
        step_index,
        protocol.id
    );
}

fn select_all(protocol: &Protocol, run: &mut Run, step_index: usize) {
    let count = protocol.steps[step_index].flag_options.len();
    run.step_states[step_index].selected_flags = (0..count).collect();
}

/// Keep the Initial step's "red flag" option in line with the RF total
fn sync_red_flag_mirror(protocol: &Protocol, run: &mut Run) {
    let initial = protocol.initial_index();
    let mirror = protocol.steps[initial]
        .flag_options
        .iter()
        .position(|option| option.to_lowercase().contains("red flag"));

    if let Some(mirror) = mirror {
        let any_selected = total_red_flags_selected(protocol, run) > 0;
        let flags = &mut run.step_states[initial].selected_flags;
        if any_selected {
            flags.insert(mirror);
        } else {
            flags.remove(&mirror);
        }
    }
}

fn derive_initial(protocol: &Protocol, run: &mut Run) {
    let initial = protocol.initial_index();
    if protocol.steps[initial].outcomes.is_empty() {
        return;
    }

    let selected =
        total_red_flags_selected(protocol, run) + run.step_states[initial].selected_flags.len();
    let previous = run.step_states[initial].chosen_outcome;
    let derived = if selected > 0 {
        Some(0)
    } else if previous == Some(0) {
        None
    } else {
        previous
    };

    if derived != previous {
        set_outcome(protocol, run, initial, derived);
    }
}

fn apply_derived_outcome(protocol: &Protocol, run: &mut Run, step_index: usize, outcome: usize) {
    if outcome >= protocol.steps[step_index].outcomes.len() {
        return;
    }
    if run.step_states[step_index].chosen_outcome != Some(outcome) {
        set_outcome(protocol, run, step_index, Some(outcome));
    }
}

fn set_outcome(protocol: &Protocol, run: &mut Run, step_index: usize, outcome: Option<usize>) {
    run.step_states[step_index].chosen_outcome = outcome;
    cascade_reset(protocol, run, step_index);

    let outcome = outcome.map(|o| &protocol.steps[step_index].outcomes[o]);
    if let Some(outcome) = outcome {
        reveal(run, &outcome.next);
    }
    run.active_disposition = outcome.and_then(|o| o.primary_disposition().cloned());

    tracing::debug!(
        "Step {} of {} derived outcome {:?}",
        step_index,
        protocol.id,
        outcome.map(|o| o.label.as_str())
    );
}

/// Blank every non-RedFlag step after `from_index`
fn cascade_reset(protocol: &Protocol, run: &mut Run, from_index: usize) {
    for (index, state) in run.step_states.iter_mut().enumerate().skip(from_index + 1) {
        if protocol.steps[index].kind != StepKind::RedFlag {
            state.clear();
        }
    }
}

fn reveal(run: &mut Run, next: &Next) {
    for index in next.indices() {
        if let Some(state) = run.step_states.get_mut(index) {
            state.visible = true;
        }
    }
}

fn nearest_disposition_before(
    protocol: &Protocol,
    run: &Run,
    step_index: usize,
) -> Option<Disposition> {
    (0..step_index).rev().find_map(|index| {
        if protocol.steps[index].kind == StepKind::RedFlag {
            return None;
        }
        let outcome = run.step_states[index].chosen_outcome?;
        protocol.steps[index].outcomes[outcome]
            .primary_disposition()
            .cloned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::build_default_catalog;

    fn sore_throat() -> Protocol {
        build_default_catalog().protocols["A-1"].clone()
    }

    fn headache() -> Protocol {
        build_default_catalog().protocols["C-1"].clone()
    }

    // A-1 layout: 0 RedFlag, 1 Initial, 2 Count, 3 Choice, 4 Action, 5 Choice
    const RF: usize = 0;
    const INITIAL: usize = 1;
    const CENTOR: usize = 2;
    const STREP: usize = 3;
    const SELF_CARE: usize = 4;
    const DURATION: usize = 5;

    #[test]
    fn test_start_visibility_up_to_initial() {
        for protocol in [sore_throat(), headache()] {
            let run = start(&protocol);
            let initial = protocol.initial_index();
            for (index, state) in run.step_states.iter().enumerate() {
                assert_eq!(state.visible, index <= initial, "step {}", index);
                assert!(state.selected_flags.is_empty());
                assert!(state.chosen_outcome.is_none());
            }
            assert!(run.active_disposition.is_none());
        }
    }

    #[test]
    fn test_red_flag_auto_answers_initial() {
        crate::logging::init_test();
        let protocol = sore_throat();
        let run = start(&protocol);

        let flagged = toggle_flag(&protocol, &run, RF, 0);
        assert_eq!(flagged.step_states[INITIAL].chosen_outcome, Some(0));
        assert_eq!(
            flagged.active_disposition.as_ref().unwrap().category,
            "CAT I"
        );
        // mirror option "Red flag present" follows the RF total
        assert!(flagged.step_states[INITIAL].selected_flags.contains(&0));

        let cleared = toggle_flag(&protocol, &flagged, RF, 0);
        assert!(cleared.step_states[INITIAL].chosen_outcome.is_none());
        assert!(cleared.active_disposition.is_none());
        assert!(cleared.step_states[INITIAL].selected_flags.is_empty());
    }

    #[test]
    fn test_red_flags_aggregate_across_steps() {
        let protocol = headache();
        let initial = protocol.initial_index();
        let run = start(&protocol);

        let run = toggle_flag(&protocol, &run, 0, 1);
        let run = toggle_flag(&protocol, &run, 1, 0);
        assert_eq!(total_red_flags_selected(&protocol, &run), 2);
        assert_eq!(run.step_states[initial].chosen_outcome, Some(0));

        // one RF step still selected keeps the Yes branch
        let run = toggle_flag(&protocol, &run, 0, 1);
        assert_eq!(run.step_states[initial].chosen_outcome, Some(0));

        let run = toggle_flag(&protocol, &run, 1, 0);
        assert!(run.step_states[initial].chosen_outcome.is_none());
        assert!(run.active_disposition.is_none());
    }

    #[test]
    fn test_input_run_is_not_mutated() {
        let protocol = sore_throat();
        let run = start(&protocol);
        let snapshot = run.clone();

        let _ = toggle_flag(&protocol, &run, RF, 0);
        let _ = choose_outcome(&protocol, &run, INITIAL, 1);
        assert_eq!(run, snapshot);
    }

    #[test]
    fn test_initial_no_reveals_next() {
        let protocol = sore_throat();
        let run = choose_outcome(&protocol, &start(&protocol), INITIAL, 1);

        assert_eq!(visible_steps(&run), vec![RF, INITIAL, CENTOR]);
        assert!(run.active_disposition.is_none());
    }

    #[test]
    fn test_initial_no_clears_red_flags() {
        let protocol = sore_throat();
        let run = toggle_flag(&protocol, &start(&protocol), RF, 2);
        let run = choose_outcome(&protocol, &run, INITIAL, 1);

        assert!(run.step_states[RF].selected_flags.is_empty());
        assert!(run.step_states[INITIAL].selected_flags.is_empty());
        assert_eq!(run.step_states[INITIAL].chosen_outcome, Some(1));
    }

    #[test]
    fn test_initial_yes_with_select_all_mirrors_every_red_flag() {
        let protocol = headache();
        let initial = protocol.initial_index();
        let run = choose_outcome(&protocol, &start(&protocol), initial, 0);

        for rf in protocol.red_flag_indices() {
            assert_eq!(
                run.step_states[rf].selected_flags.len(),
                protocol.steps[rf].flag_options.len()
            );
        }
        assert_eq!(
            run.step_states[initial].selected_flags.len(),
            protocol.steps[initial].flag_options.len()
        );
        assert_eq!(run.active_disposition.unwrap().category, "CAT I");
    }

    #[test]
    fn test_count_threshold_boundary() {
        let protocol = sore_throat();
        let run = choose_outcome(&protocol, &start(&protocol), INITIAL, 1);

        let two = toggle_flag(&protocol, &run, CENTOR, 0);
        let two = toggle_flag(&protocol, &two, CENTOR, 1);
        assert_eq!(two.step_states[CENTOR].chosen_outcome, Some(1));

        let three = toggle_flag(&protocol, &two, CENTOR, 2);
        assert_eq!(three.step_states[CENTOR].chosen_outcome, Some(0));
        assert!(three.step_states[STREP].visible);
        assert!(!three.step_states[SELF_CARE].visible);
    }

    #[test]
    fn test_count_threshold_override() {
        let mut protocol = sore_throat();
        protocol.steps[CENTOR].count_threshold = Some(1);
        let run = choose_outcome(&protocol, &start(&protocol), INITIAL, 1);

        let one = toggle_flag(&protocol, &run, CENTOR, 3);
        assert_eq!(one.step_states[CENTOR].chosen_outcome, Some(0));
    }

    #[test]
    fn test_choice_fan_out_reveals_branches() {
        let protocol = sore_throat();
        let run = choose_outcome(&protocol, &start(&protocol), INITIAL, 1);
        let run = toggle_flag(&protocol, &run, CENTOR, 0);

        // one Centor criterion selects the low-risk branch, which fans out
        assert_eq!(run.step_states[CENTOR].chosen_outcome, Some(1));
        assert!(run.step_states[SELF_CARE].visible);
        assert!(run.step_states[DURATION].visible);
        assert_eq!(run.active_disposition.as_ref().unwrap().category, "CAT IV");
    }

    #[test]
    fn test_choice_derives_from_selection() {
        let protocol = sore_throat();
        let run = choose_outcome(&protocol, &start(&protocol), INITIAL, 1);
        let run = toggle_flag(&protocol, &run, CENTOR, 0);

        let yes = toggle_flag(&protocol, &run, DURATION, 0);
        assert_eq!(yes.step_states[DURATION].chosen_outcome, Some(0));
        assert_eq!(yes.active_disposition.as_ref().unwrap().category, "CAT II");

        let no = toggle_flag(&protocol, &yes, DURATION, 0);
        assert_eq!(no.step_states[DURATION].chosen_outcome, Some(1));
    }

    #[test]
    fn test_cascade_reset_preserves_red_flags() {
        let protocol = sore_throat();
        let run = choose_outcome(&protocol, &start(&protocol), INITIAL, 1);
        let run = toggle_flag(&protocol, &run, CENTOR, 0);
        let run = toggle_flag(&protocol, &run, DURATION, 0);
        let before_rf = run.step_states[RF].clone();

        let changed = choose_outcome(&protocol, &run, CENTOR, 0);
        for index in (CENTOR + 1)..protocol.steps.len() {
            let state = &changed.step_states[index];
            if index == STREP {
                assert!(state.visible);
                assert!(state.chosen_outcome.is_none());
                continue;
            }
            assert!(!state.visible, "step {} still visible", index);
            assert!(state.chosen_outcome.is_none());
            assert!(state.selected_flags.is_empty());
        }
        assert_eq!(changed.step_states[RF], before_rf);
    }

    #[test]
    fn test_undo_restores_previous_view() {
        let protocol = sore_throat();
        let run = choose_outcome(&protocol, &start(&protocol), INITIAL, 1);
        let run = choose_outcome(&protocol, &run, CENTOR, 0);

        let answered = choose_outcome(&protocol, &run, STREP, 1);
        let undone = undo(&protocol, &answered);

        assert_eq!(visible_steps(&undone), visible_steps(&run));
        assert_eq!(undone.active_disposition, run.active_disposition);
        assert!(undone.step_states[STREP].chosen_outcome.is_none());
    }

    #[test]
    fn test_undo_initial_clears_red_flags() {
        let protocol = sore_throat();
        let run = toggle_flag(&protocol, &start(&protocol), RF, 1);

        let undone = undo(&protocol, &run);
        assert!(undone.step_states[RF].selected_flags.is_empty());
        assert!(undone.step_states[INITIAL].chosen_outcome.is_none());
        assert!(undone.active_disposition.is_none());
        assert_eq!(visible_steps(&undone), vec![RF, INITIAL]);
    }

    #[test]
    fn test_undo_on_fresh_run_is_noop() {
        let protocol = sore_throat();
        let run = start(&protocol);
        assert_eq!(undo(&protocol, &run), run);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_step_panics() {
        let protocol = sore_throat();
        let run = start(&protocol);
        let _ = toggle_flag(&protocol, &run, 99, 0);
    }

    #[test]
    #[should_panic(expected = "outcome index")]
    fn test_out_of_range_outcome_panics() {
        let protocol = sore_throat();
        let run = start(&protocol);
        let _ = choose_outcome(&protocol, &run, INITIAL, 7);
    }
}
