//! Screener engine for standardized scored questionnaires.
//!
//! Responses are addressed in "active" question space: once a conditional
//! extension triggers, indices refer to the extension's questions, whose
//! leading `carry_over_questions` answers are shared with the base run.

use crate::{
    DynamicContent, Error, QuestionKind, Result, ScaleOption, ScreenerDefinition, ScreenerGate,
    ScreenerQuestion, ScreenerResult, ScreenerRun,
};
use rand::Rng;

/// Start a screener, drawing its word list from the thread RNG
pub fn start(definition: &ScreenerDefinition) -> ScreenerRun {
    start_with_rng(definition, &mut rand::thread_rng())
}

/// Start a screener with an explicit RNG for the word-list draw
pub fn start_with_rng<R: Rng>(definition: &ScreenerDefinition, rng: &mut R) -> ScreenerRun {
    let chosen_word_list_index = if definition.word_lists.is_empty() {
        0
    } else {
        rng.gen_range(0..definition.word_lists.len())
    };

    tracing::debug!(
        "Started screener {} with word list {}",
        definition.id,
        chosen_word_list_index
    );

    ScreenerRun {
        definition_id: definition.id.clone(),
        responses: vec![None; definition.questions.len()],
        extension_triggered: false,
        extension_responses: Vec::new(),
        follow_up_choice: None,
        chosen_word_list_index,
    }
}

/// Whether a question contributes to the score
pub fn is_scored(question: &ScreenerQuestion) -> bool {
    question.scored.unwrap_or(match question.kind {
        QuestionKind::Scale => true,
        QuestionKind::Check | QuestionKind::Info => false,
    })
}

/// Scale used by a question: its own override or the definition default
pub fn question_scale<'a>(
    definition: &'a ScreenerDefinition,
    question: &'a ScreenerQuestion,
) -> &'a [ScaleOption] {
    question
        .scale
        .as_deref()
        .unwrap_or(&definition.scale_options)
}

pub fn max_score(definition: &ScreenerDefinition) -> u32 {
    definition
        .questions
        .iter()
        .filter(|q| is_scored(q))
        .map(|q| {
            question_scale(definition, q)
                .iter()
                .map(|o| o.value)
                .max()
                .unwrap_or(0)
        })
        .sum()
}

/// Sum of the scored responses; unanswered questions count as zero
pub fn score(definition: &ScreenerDefinition, responses: &[Option<u32>]) -> u32 {
    definition
        .questions
        .iter()
        .enumerate()
        .filter(|(_, q)| is_scored(q))
        .map(|(i, _)| responses.get(i).copied().flatten().unwrap_or(0))
        .sum()
}

/// Gate state for a response vector; no gate means open
pub fn gate_open(gate: Option<&ScreenerGate>, responses: &[Option<u32>]) -> bool {
    let Some(gate) = gate else {
        return true;
    };
    let is_yes = |i: usize| responses.get(i).copied().flatten() == Some(1);
    is_yes(gate.required_index) && gate.any_of_indices.iter().any(|&i| is_yes(i))
}

/// The definition in effect for a base score
pub fn active_definition(definition: &ScreenerDefinition, base_score: u32) -> &ScreenerDefinition {
    match &definition.conditional_extension {
        Some(extension) if base_score >= extension.threshold => extension.target.as_ref(),
        _ => definition,
    }
}

fn run_definition<'a>(definition: &'a ScreenerDefinition, run: &ScreenerRun) -> &'a ScreenerDefinition {
    match &definition.conditional_extension {
        Some(extension) if run.extension_triggered => extension.target.as_ref(),
        _ => definition,
    }
}

fn carry_over(definition: &ScreenerDefinition) -> usize {
    definition
        .conditional_extension
        .as_ref()
        .map(|e| e.carry_over_questions)
        .unwrap_or(0)
}

/// Response vector of the active definition
pub fn active_responses(definition: &ScreenerDefinition, run: &ScreenerRun) -> Vec<Option<u32>> {
    if !run.extension_triggered {
        return run.responses.clone();
    }
    let carry = carry_over(definition);
    run.responses
        .iter()
        .take(carry)
        .chain(run.extension_responses.iter())
        .copied()
        .collect()
}

pub fn active_score(definition: &ScreenerDefinition, run: &ScreenerRun) -> u32 {
    if run.extension_triggered {
        score(run_definition(definition, run), &active_responses(definition, run))
    } else {
        score(definition, &run.responses)
    }
}

/// Label of the first band containing the score, or empty
pub fn interpretation(definition: &ScreenerDefinition, active_score: u32) -> String {
    definition
        .interpretation_bands
        .iter()
        .find(|b| b.min <= active_score && active_score <= b.max)
        .map(|b| b.label.clone())
        .unwrap_or_default()
}

/// Whether a score crosses the definition's threshold
pub fn is_positive(definition: &ScreenerDefinition, score: u32) -> bool {
    if definition.invert_threshold {
        score <= definition.score_threshold
    } else {
        score >= definition.score_threshold
    }
}

/// Number of questions in the active definition
pub fn active_question_count(definition: &ScreenerDefinition, run: &ScreenerRun) -> usize {
    run_definition(definition, run).questions.len()
}

/// Record (or clear) a response, addressed in active question space
pub fn set_response(
    definition: &ScreenerDefinition,
    run: &ScreenerRun,
    index: usize,
    value: Option<u32>,
) -> ScreenerRun {
    let active = run_definition(definition, run);
    assert!(
        index < active.questions.len(),
        "question index {} out of range for screener {}",
        index,
        active.id
    );
    let question = &active.questions[index];
    assert!(
        question.kind != QuestionKind::Info,
        "question {} of screener {} is informational",
        index,
        active.id
    );
    if let (QuestionKind::Scale, Some(v)) = (question.kind, value) {
        assert!(
            question_scale(active, question).iter().any(|o| o.value == v),
            "value {} is not on the scale of question {} of screener {}",
            v,
            index,
            active.id
        );
    }

    let mut next = run.clone();
    write_response(definition, &mut next, index, value);
    refresh_extension(definition, &mut next);
    next
}

/// Flip one option of a Check question's bitmask
pub fn toggle_check(
    definition: &ScreenerDefinition,
    run: &ScreenerRun,
    index: usize,
    option: usize,
) -> ScreenerRun {
    let active = run_definition(definition, run);
    assert!(
        index < active.questions.len() && active.questions[index].kind == QuestionKind::Check,
        "question {} of screener {} is not a check question",
        index,
        active.id
    );
    assert!(option < 32, "check option {} exceeds the bitmask", option);

    let current = active_responses(definition, run)[index];
    let toggled = current.unwrap_or(0) ^ (1u32 << option);

    let mut next = run.clone();
    write_response(definition, &mut next, index, Some(toggled));
    refresh_extension(definition, &mut next);
    next
}

pub fn set_follow_up(
    definition: &ScreenerDefinition,
    run: &ScreenerRun,
    choice: Option<usize>,
) -> ScreenerRun {
    let active = run_definition(definition, run);
    if let Some(choice) = choice {
        let options = active.follow_up.as_ref().map(|f| f.options.len()).unwrap_or(0);
        assert!(
            choice < options,
            "follow-up choice {} out of range for screener {}",
            choice,
            active.id
        );
    }
    let mut next = run.clone();
    next.follow_up_choice = choice;
    next
}

fn write_response(
    definition: &ScreenerDefinition,
    run: &mut ScreenerRun,
    index: usize,
    value: Option<u32>,
) {
    let carry = carry_over(definition);
    if run.extension_triggered && index >= carry {
        run.extension_responses[index - carry] = value;
    } else {
        run.responses[index] = value;
    }
}

/// Trigger or withdraw the extension after a base response changed
///
/// Withdrawing drops the extension answers; a later re-trigger starts blank.
fn refresh_extension(definition: &ScreenerDefinition, run: &mut ScreenerRun) {
    let Some(extension) = &definition.conditional_extension else {
        return;
    };
    let triggered = score(definition, &run.responses) >= extension.threshold;
    if triggered == run.extension_triggered {
        return;
    }

    run.extension_triggered = triggered;
    run.follow_up_choice = None;
    if triggered {
        let tail = extension
            .target
            .questions
            .len()
            .saturating_sub(extension.carry_over_questions);
        run.extension_responses = vec![None; tail];
        tracing::debug!(
            "Screener {} extended to {}",
            definition.id,
            extension.target.id
        );
    } else {
        run.extension_responses.clear();
        tracing::debug!("Screener {} extension withdrawn", definition.id);
    }
}

/// Whether every required question (and the follow-up) is answered
pub fn is_complete(definition: &ScreenerDefinition, run: &ScreenerRun) -> bool {
    let active = run_definition(definition, run);
    let responses = active_responses(definition, run);
    let gate = active.gate.as_ref();
    let open = gate_open(gate, &responses);

    let questions_done = active.questions.iter().enumerate().all(|(i, q)| match q.kind {
        QuestionKind::Check | QuestionKind::Info => true,
        QuestionKind::Scale => {
            let gated = gate.map(|g| i >= g.gated_from_index).unwrap_or(false);
            (gated && !open) || responses.get(i).copied().flatten().is_some()
        }
    });

    let follow_up_done = active.follow_up.is_none() || run.follow_up_choice.is_some();
    questions_done && follow_up_done
}

/// Gate message for the current responses, if a gate is configured
pub fn gate_message<'a>(definition: &'a ScreenerDefinition, run: &ScreenerRun) -> Option<&'a str> {
    let active = run_definition(definition, run);
    let gate = active.gate.as_ref()?;
    let responses = active_responses(definition, run);
    Some(if gate_open(Some(gate), &responses) {
        gate.open_message.as_str()
    } else {
        gate.closed_message.as_str()
    })
}

/// Question text with the run's word list substituted in
pub fn render_prompt(definition: &ScreenerDefinition, run: &ScreenerRun, index: usize) -> String {
    let active = run_definition(definition, run);
    let question = &active.questions[index];
    let Some(dynamic) = &question.dynamic else {
        return question.text.clone();
    };

    let lists = if active.word_lists.is_empty() {
        &definition.word_lists
    } else {
        &active.word_lists
    };
    let Some(list) = lists.get(run.chosen_word_list_index) else {
        return question.text.clone();
    };

    match dynamic {
        DynamicContent::Words => question.text.replace("{words}", &list.words.join(", ")),
        DynamicContent::Digits(d) => question.text.replace(
            "{digits}",
            list.digit_strings.get(*d).map(String::as_str).unwrap_or(""),
        ),
    }
}

/// Finish a screener, emitting the active definition's id and responses
pub fn complete(definition: &ScreenerDefinition, run: &ScreenerRun) -> Result<ScreenerResult> {
    if !is_complete(definition, run) {
        return Err(Error::IncompleteScreener(definition.id.clone()));
    }

    let active = run_definition(definition, run);
    let score = active_score(definition, run);
    let result = ScreenerResult {
        screener_id: active.id.clone(),
        responses: active_responses(definition, run),
        follow_up_choice: run.follow_up_choice,
        score,
        interpretation: interpretation(active, score),
        positive: is_positive(active, score),
    };

    tracing::info!(
        "Completed screener {} with score {} ({})",
        result.screener_id,
        result.score,
        result.interpretation
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::{gad2, mace, phq2, phq9};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn answer(def: &ScreenerDefinition, run: &ScreenerRun, values: &[u32]) -> ScreenerRun {
        values
            .iter()
            .enumerate()
            .fold(run.clone(), |run, (i, v)| set_response(def, &run, i, Some(*v)))
    }

    #[test]
    fn test_start_blank() {
        let def = phq9();
        let run = start(&def);
        assert_eq!(run.responses, vec![None; 9]);
        assert!(!run.extension_triggered);
        assert_eq!(run.chosen_word_list_index, 0);
    }

    #[test]
    fn test_word_list_drawn_once() {
        let def = mace();
        let mut rng = StdRng::seed_from_u64(7);
        let run = start_with_rng(&def, &mut rng);
        assert!(run.chosen_word_list_index < def.word_lists.len());

        let mut again = StdRng::seed_from_u64(7);
        assert_eq!(
            start_with_rng(&def, &mut again).chosen_word_list_index,
            run.chosen_word_list_index
        );

        // responses never re-sample the list
        let answered = set_response(&def, &run, 0, Some(1));
        assert_eq!(answered.chosen_word_list_index, run.chosen_word_list_index);
    }

    #[test]
    fn test_scored_defaults_and_override() {
        let def = mace();
        assert!(!is_scored(&def.questions[0])); // explicit override
        assert!(!is_scored(&def.questions[4])); // check
        assert!(!is_scored(&def.questions[6])); // info
        assert!(is_scored(&def.questions[5]));
    }

    #[test]
    fn test_max_scores() {
        assert_eq!(max_score(&phq9()), 27);
        assert_eq!(max_score(&phq2()), 6);
        assert_eq!(max_score(&mace()), 30);
    }

    #[test]
    fn test_score_treats_unanswered_as_zero() {
        let def = phq9();
        let mut responses = vec![None; 9];
        responses[0] = Some(3);
        responses[8] = Some(2);
        assert_eq!(score(&def, &responses), 5);
    }

    #[test]
    fn test_phq2_negative_no_extension() {
        let def = phq2();
        let run = answer(&def, &start(&def), &[1, 1]);

        assert!(!run.extension_triggered);
        assert_eq!(active_score(&def, &run), 2);
        assert_eq!(interpretation(&def, 2), "Negative Screen");
        assert_eq!(active_question_count(&def, &run), 2);
        assert!(is_complete(&def, &run));

        let result = complete(&def, &run).unwrap();
        assert_eq!(result.screener_id, "phq-2");
        assert!(!result.positive);
    }

    #[test]
    fn test_phq2_extends_to_phq9() {
        let def = phq2();
        let run = answer(&def, &start(&def), &[2, 1]);

        assert!(run.extension_triggered);
        assert_eq!(active_definition(&def, 3).id, "phq-9");
        assert_eq!(active_question_count(&def, &run), 9);

        let responses = active_responses(&def, &run);
        assert_eq!(responses.len(), 9);
        assert_eq!(&responses[..2], &[Some(2), Some(1)]);
        assert!(responses[2..].iter().all(|r| r.is_none()));
        assert!(!is_complete(&def, &run));
    }

    #[test]
    fn test_extension_completes_with_full_vector() {
        let def = phq2();
        let run = answer(&def, &start(&def), &[2, 1, 1, 1, 2, 0, 0, 1, 0]);
        assert!(!is_complete(&def, &run)); // follow-up pending

        let run = set_follow_up(&def, &run, Some(1));
        let result = complete(&def, &run).unwrap();
        assert_eq!(result.screener_id, "phq-9");
        assert_eq!(result.responses.len(), 9);
        assert_eq!(result.score, 8);
        assert_eq!(result.interpretation, "Mild depression");
        assert_eq!(result.follow_up_choice, Some(1));
    }

    #[test]
    fn test_extension_withdrawn_when_base_drops() {
        let def = gad2();
        let run = answer(&def, &start(&def), &[3, 0]);
        assert!(run.extension_triggered);

        let run = set_response(&def, &run, 0, Some(1));
        assert!(!run.extension_triggered);
        assert!(run.extension_responses.is_empty());
        assert_eq!(active_question_count(&def, &run), 2);
    }

    #[test]
    fn test_withdrawn_extension_answers_are_not_recovered() {
        let def = phq2();
        let run = answer(&def, &start(&def), &[2, 1, 3, 3]);
        assert_eq!(&active_responses(&def, &run)[2..4], &[Some(3), Some(3)]);

        let run = set_response(&def, &run, 0, Some(0));
        assert!(!run.extension_triggered);

        let run = set_response(&def, &run, 0, Some(2));
        assert!(run.extension_triggered);
        let responses = active_responses(&def, &run);
        assert_eq!(&responses[..2], &[Some(2), Some(1)]);
        assert!(responses[2..].iter().all(|r| r.is_none()));
    }

    #[test]
    fn test_interpretation_outside_bands_is_empty() {
        assert_eq!(interpretation(&phq2(), 99), "");
    }

    #[test]
    fn test_gate_requires_event() {
        let def = mace();
        let gate = def.gate.as_ref();
        let mut responses = vec![None; def.questions.len()];
        responses[0] = Some(0);
        responses[1] = Some(1);
        responses[2] = Some(1);
        assert!(!gate_open(gate, &responses));

        responses[0] = Some(1);
        responses[1] = Some(0);
        responses[2] = Some(0);
        responses[3] = Some(1);
        assert!(gate_open(gate, &responses));
        assert!(gate_open(None, &responses));
    }

    #[test]
    fn test_closed_gate_completes_without_cognitive_exam() {
        let def = mace();
        let run = answer(&def, &start(&def), &[0, 0, 0, 0]);
        assert!(is_complete(&def, &run));
        assert_eq!(
            gate_message(&def, &run),
            Some("Concussion screen negative: stop and document")
        );
    }

    #[test]
    fn test_open_gate_requires_cognitive_exam() {
        let def = mace();
        let run = answer(&def, &start(&def), &[1, 1, 0, 0]);
        assert!(!is_complete(&def, &run));

        // 5: orientation, 7..=9 trials, 10..=13 digits, 14 months, 15 delayed
        let run = set_response(&def, &run, 5, Some(5));
        let run = [7, 8, 9]
            .iter()
            .fold(run, |r, &i| set_response(&def, &r, i, Some(4)));
        let run = (10..=14).fold(run, |r, i| set_response(&def, &r, i, Some(1)));
        let run = set_response(&def, &run, 15, Some(3));

        assert!(is_complete(&def, &run));
        let result = complete(&def, &run).unwrap();
        assert_eq!(result.score, 5 + 12 + 5 + 3);
        assert!(result.positive); // inverted threshold: 25 or below
    }

    #[test]
    fn test_toggle_check_bitmask() {
        let def = mace();
        let run = start(&def);
        let run = toggle_check(&def, &run, 4, 0);
        let run = toggle_check(&def, &run, 4, 3);
        assert_eq!(run.responses[4], Some(0b1001));

        let run = toggle_check(&def, &run, 4, 0);
        assert_eq!(run.responses[4], Some(0b1000));
    }

    #[test]
    fn test_render_prompt_uses_chosen_list() {
        let def = mace();
        let mut rng = StdRng::seed_from_u64(3);
        let run = start_with_rng(&def, &mut rng);
        let list = &def.word_lists[run.chosen_word_list_index];

        let words = render_prompt(&def, &run, 6);
        assert!(words.contains(&list.words.join(", ")));
        assert!(!words.contains("{words}"));

        let digits = render_prompt(&def, &run, 11);
        assert!(digits.ends_with(&list.digit_strings[1]));
        assert_eq!(render_prompt(&def, &run, 0), def.questions[0].text);
    }

    #[test]
    fn test_complete_rejects_incomplete() {
        let def = phq9();
        let run = start(&def);
        assert!(matches!(
            complete(&def, &run),
            Err(Error::IncompleteScreener(_))
        ));
    }

    #[test]
    #[should_panic(expected = "not on the scale")]
    fn test_off_scale_value_panics() {
        let def = phq9();
        let _ = set_response(&def, &start(&def), 0, Some(9));
    }
}
