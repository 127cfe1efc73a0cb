//! Built-in screening instruments.
//!
//! PHQ-2/PHQ-9 (depression), GAD-2/GAD-7 (anxiety) and a MACE-style
//! concussion evaluation.

use crate::types::*;

fn frequency_scale() -> Vec<ScaleOption> {
    vec![
        ScaleOption::new("Not at all", 0),
        ScaleOption::new("Several days", 1),
        ScaleOption::new("More than half the days", 2),
        ScaleOption::new("Nearly every day", 3),
    ]
}

fn yes_no() -> Vec<ScaleOption> {
    vec![ScaleOption::new("No", 0), ScaleOption::new("Yes", 1)]
}

/// `0..=max` with numeric labels
fn points(max: u32) -> Vec<ScaleOption> {
    (0..=max).map(|v| ScaleOption::new(v.to_string(), v)).collect()
}

fn difficulty_follow_up() -> FollowUp {
    FollowUp {
        prompt: "If you checked off any problems, how difficult have these problems made it \
                 for you to do your work, take care of things at home, or get along with other people?"
            .into(),
        options: vec![
            "Not difficult at all".into(),
            "Somewhat difficult".into(),
            "Very difficult".into(),
            "Extremely difficult".into(),
        ],
    }
}

fn screen_bands() -> Vec<InterpretationBand> {
    vec![
        InterpretationBand::new(0, 2, "Negative Screen"),
        InterpretationBand::new(3, 6, "Positive Screen"),
    ]
}

const PHQ9_ITEMS: [&str; 9] = [
    "Little interest or pleasure in doing things",
    "Feeling down, depressed, or hopeless",
    "Trouble falling or staying asleep, or sleeping too much",
    "Feeling tired or having little energy",
    "Poor appetite or overeating",
    "Feeling bad about yourself, or that you are a failure or have let yourself or your family down",
    "Trouble concentrating on things, such as reading the newspaper or watching television",
    "Moving or speaking so slowly that other people could have noticed, or the opposite, being so fidgety or restless that you have been moving around a lot more than usual",
    "Thoughts that you would be better off dead, or of hurting yourself in some way",
];

const GAD7_ITEMS: [&str; 7] = [
    "Feeling nervous, anxious, or on edge",
    "Not being able to stop or control worrying",
    "Worrying too much about different things",
    "Trouble relaxing",
    "Being so restless that it is hard to sit still",
    "Becoming easily annoyed or irritable",
    "Feeling afraid, as if something awful might happen",
];

fn frequency_questions(items: &[&str]) -> Vec<ScreenerQuestion> {
    items.iter().map(|text| ScreenerQuestion::scale(*text)).collect()
}

pub fn phq9() -> ScreenerDefinition {
    ScreenerDefinition {
        id: "phq-9".into(),
        name: "Patient Health Questionnaire (PHQ-9)".into(),
        questions: frequency_questions(&PHQ9_ITEMS),
        scale_options: frequency_scale(),
        interpretation_bands: vec![
            InterpretationBand::new(0, 4, "Minimal depression"),
            InterpretationBand::new(5, 9, "Mild depression"),
            InterpretationBand::new(10, 14, "Moderate depression"),
            InterpretationBand::new(15, 19, "Moderately severe depression"),
            InterpretationBand::new(20, 27, "Severe depression"),
        ],
        score_threshold: 10,
        invert_threshold: false,
        gate: None,
        follow_up: Some(difficulty_follow_up()),
        conditional_extension: None,
        word_lists: vec![],
    }
}

pub fn phq2() -> ScreenerDefinition {
    ScreenerDefinition {
        id: "phq-2".into(),
        name: "Patient Health Questionnaire (PHQ-2)".into(),
        questions: frequency_questions(&PHQ9_ITEMS[..2]),
        scale_options: frequency_scale(),
        interpretation_bands: screen_bands(),
        score_threshold: 3,
        invert_threshold: false,
        gate: None,
        follow_up: None,
        conditional_extension: Some(ConditionalExtension {
            target: Box::new(phq9()),
            threshold: 3,
            carry_over_questions: 2,
        }),
        word_lists: vec![],
    }
}

pub fn gad7() -> ScreenerDefinition {
    ScreenerDefinition {
        id: "gad-7".into(),
        name: "Generalized Anxiety Disorder (GAD-7)".into(),
        questions: frequency_questions(&GAD7_ITEMS),
        scale_options: frequency_scale(),
        interpretation_bands: vec![
            InterpretationBand::new(0, 4, "Minimal anxiety"),
            InterpretationBand::new(5, 9, "Mild anxiety"),
            InterpretationBand::new(10, 14, "Moderate anxiety"),
            InterpretationBand::new(15, 21, "Severe anxiety"),
        ],
        score_threshold: 10,
        invert_threshold: false,
        gate: None,
        follow_up: Some(difficulty_follow_up()),
        conditional_extension: None,
        word_lists: vec![],
    }
}

pub fn gad2() -> ScreenerDefinition {
    ScreenerDefinition {
        id: "gad-2".into(),
        name: "Generalized Anxiety Disorder (GAD-2)".into(),
        questions: frequency_questions(&GAD7_ITEMS[..2]),
        scale_options: frequency_scale(),
        interpretation_bands: screen_bands(),
        score_threshold: 3,
        invert_threshold: false,
        gate: None,
        follow_up: None,
        conditional_extension: Some(ConditionalExtension {
            target: Box::new(gad7()),
            threshold: 3,
            carry_over_questions: 2,
        }),
        word_lists: vec![],
    }
}

fn word_list(name: &str, words: [&str; 5], digits: [&str; 4]) -> WordList {
    WordList {
        name: name.into(),
        words: words.iter().map(|w| w.to_string()).collect(),
        digit_strings: digits.iter().map(|d| d.to_string()).collect(),
    }
}

/// Concussion evaluation
///
/// Layout:
/// - 0..=3: screening history (gate inputs, unscored)
/// - 4: symptom checklist
/// - 5..=15: cognitive exam, max 30, hidden while the gate is closed
pub fn mace() -> ScreenerDefinition {
    const SCREENING: &str = "Concussion Screening";
    const COGNITIVE: &str = "Cognitive Exam";

    let mut questions = vec![
        ScreenerQuestion::scale("Was there an event that could have caused a concussion?")
            .with_scored(false)
            .with_section(SCREENING),
        ScreenerQuestion::scale("Loss of consciousness?").with_scored(false),
        ScreenerQuestion::scale("Alteration of consciousness (dazed, confused, seeing stars)?")
            .with_scored(false),
        ScreenerQuestion::scale("Memory problems (lapse in memory before or after the event)?")
            .with_scored(false),
        ScreenerQuestion::check(
            "Symptoms (select all that apply)",
            [
                "Headache",
                "Dizziness",
                "Memory problems",
                "Balance problems",
                "Nausea or vomiting",
                "Difficulty concentrating",
                "Irritability",
                "Visual disturbances",
                "Ringing in the ears",
            ]
            .iter()
            .enumerate()
            .map(|(i, label)| ScaleOption::new(*label, i as u32))
            .collect(),
        ),
        ScreenerQuestion::scale("Orientation: month, date, day of week, year, time")
            .with_scale(points(5))
            .with_section(COGNITIVE),
        ScreenerQuestion::info("Read the following words to the patient: {words}")
            .with_dynamic(DynamicContent::Words),
    ];

    for trial in 1..=3 {
        questions.push(
            ScreenerQuestion::scale(format!("Immediate memory trial {}: words recalled", trial))
                .with_scale(points(5)),
        );
    }

    for d in 0..4 {
        questions.push(
            ScreenerQuestion::scale("Concentration: repeat in reverse order {digits}")
                .with_scale(yes_no())
                .with_dynamic(DynamicContent::Digits(d)),
        );
    }

    questions.push(
        ScreenerQuestion::scale("Recite the months of the year in reverse order")
            .with_scale(yes_no()),
    );
    questions.push(
        ScreenerQuestion::scale("Delayed recall: words recalled").with_scale(points(5)),
    );

    ScreenerDefinition {
        id: "mace".into(),
        name: "Military Acute Concussion Evaluation".into(),
        questions,
        scale_options: yes_no(),
        interpretation_bands: vec![
            InterpretationBand::new(0, 25, "Positive: cognitive deficit, refer to provider"),
            InterpretationBand::new(26, 30, "Negative"),
        ],
        score_threshold: 25,
        invert_threshold: true,
        gate: Some(ScreenerGate {
            required_index: 0,
            any_of_indices: vec![1, 2, 3],
            gated_from_index: 4,
            open_message: "Concussion screen positive: continue to the cognitive exam".into(),
            closed_message: "Concussion screen negative: stop and document".into(),
        }),
        follow_up: None,
        conditional_extension: None,
        word_lists: vec![
            word_list(
                "A",
                ["Jacket", "Arrow", "Pepper", "Cotton", "Movie"],
                ["4-9-3", "3-8-1-4", "6-2-9-7-1", "7-1-8-4-6-2"],
            ),
            word_list(
                "B",
                ["Dollar", "Honey", "Mirror", "Saddle", "Anchor"],
                ["5-2-6", "1-7-9-5", "4-8-5-2-7", "8-3-1-9-6-4"],
            ),
            word_list(
                "C",
                ["Finger", "Penny", "Blanket", "Lemon", "Insect"],
                ["1-4-2", "6-5-8-3", "3-7-2-9-6", "2-9-5-1-8-7"],
            ),
        ],
    }
}

/// All built-in screeners that can be started directly
pub fn build_default_screeners() -> Vec<ScreenerDefinition> {
    vec![phq2(), phq9(), gad2(), gad7(), mace()]
}
