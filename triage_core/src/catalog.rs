//! Protocol and screener catalog.
//!
//! This module provides the built-in triage protocols, catalog loading from
//! JSON files and load-time validation of step graphs and instruments.

use crate::instruments::build_default_screeners;
use crate::types::*;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Cached default catalog - built once and reused across all operations
static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(build_default_catalog_internal);

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static Catalog {
    &DEFAULT_CATALOG
}

/// Builds the default catalog with built-in protocols and screeners
///
/// **Note**: For production use, prefer `get_default_catalog()` which returns a
/// cached reference. This function is retained for testing and custom catalog creation.
pub fn build_default_catalog() -> Catalog {
    build_default_catalog_internal()
}

fn build_default_catalog_internal() -> Catalog {
    let mut protocols = HashMap::new();

    for protocol in [sore_throat(), headache()] {
        protocols.insert(protocol.id.clone(), protocol);
    }

    let screeners = build_default_screeners()
        .into_iter()
        .map(|s| (s.id.clone(), s))
        .collect();

    Catalog {
        protocols,
        screeners,
    }
}

// ============================================================================
// Built-in Protocols
// ============================================================================

fn outcome(label: &str, dispositions: Vec<Disposition>, next: Next) -> Outcome {
    Outcome {
        label: label.into(),
        disposition_stack: dispositions,
        next,
        select_all_flags: false,
    }
}

fn step(kind: StepKind, prompt: &str, flags: &[&str], outcomes: Vec<Outcome>) -> StepDefinition {
    StepDefinition {
        kind,
        prompt: prompt.into(),
        flag_options: flags.iter().map(|f| f.to_string()).collect(),
        outcomes,
        count_threshold: None,
    }
}

fn provider_now() -> Disposition {
    Disposition::new("CAT I", "Provider Now").with_modifier("Emergent")
}

fn provider_same_day() -> Disposition {
    Disposition::new("CAT II", "Provider Same Day")
}

fn treatment_protocol(text: &str) -> Disposition {
    Disposition::new("CAT III", text)
}

fn self_care(text: &str) -> Disposition {
    Disposition::new("CAT IV", text)
}

/// A-1: Sore throat
fn sore_throat() -> Protocol {
    let steps = vec![
        // 0
        step(
            StepKind::RedFlag,
            "Red flags",
            &[
                "Airway compromise or stridor",
                "Drooling or unable to swallow",
                "Stiff neck",
            ],
            vec![],
        ),
        // 1
        step(
            StepKind::Initial,
            "Any red flag or danger sign present?",
            &["Red flag present", "Temperature above 104F"],
            vec![
                outcome("Yes", vec![provider_now()], Next::None),
                outcome("No", vec![], Next::One(2)),
            ],
        ),
        // 2
        step(
            StepKind::Count,
            "Centor criteria (3 or more?)",
            &[
                "Fever above 100.4F",
                "Tonsillar exudate",
                "Tender anterior cervical nodes",
                "Absence of cough",
            ],
            vec![
                outcome(
                    "3 or more criteria",
                    vec![treatment_protocol("Rapid strep test, treat per protocol")],
                    Next::One(3),
                ),
                outcome(
                    "Fewer than 3 criteria",
                    vec![self_care("Self-care and return to duty")],
                    Next::Many(vec![4, 5]),
                ),
            ],
        ),
        // 3
        step(
            StepKind::Choice,
            "Rapid strep test result",
            &["Positive result"],
            vec![
                outcome(
                    "Positive",
                    vec![provider_same_day().with_modifier("Antibiotics")],
                    Next::None,
                ),
                outcome(
                    "Negative",
                    vec![self_care("Self-care, salt water gargles")],
                    Next::None,
                ),
            ],
        ),
        // 4
        step(
            StepKind::Action,
            "Provide self-care instructions: fluids, lozenges, acetaminophen",
            &[],
            vec![outcome("Instructions given", vec![], Next::None)],
        ),
        // 5
        step(
            StepKind::Choice,
            "Symptoms present for more than 7 days?",
            &["Symptoms longer than 7 days"],
            vec![
                outcome("Yes", vec![provider_same_day()], Next::None),
                outcome(
                    "No",
                    vec![self_care("Self-care and return to duty")],
                    Next::None,
                ),
            ],
        ),
    ];

    Protocol {
        id: "A-1".into(),
        name: "Sore Throat".into(),
        steps,
    }
}

/// C-1: Headache
fn headache() -> Protocol {
    let mut initial = step(
        StepKind::Initial,
        "Any red flag present?",
        &["Red flag present", "Recent head trauma"],
        vec![
            outcome("Yes", vec![provider_now()], Next::None),
            outcome("No", vec![], Next::One(4)),
        ],
    );
    initial.outcomes[0].select_all_flags = true;

    let mut tension = step(
        StepKind::Count,
        "Tension-type features (2 or more?)",
        &[
            "Bilateral location",
            "Pressing or tightening quality",
            "Not aggravated by activity",
        ],
        vec![
            outcome(
                "Tension-type headache",
                vec![self_care("Self-care, analgesics and rest")],
                Next::None,
            ),
            outcome("Atypical headache", vec![provider_same_day()], Next::None),
        ],
    );
    tension.count_threshold = Some(2);

    let steps = vec![
        // 0
        step(
            StepKind::RedFlag,
            "Neurological red flags",
            &[
                "Sudden worst headache of life",
                "Focal weakness or numbness",
                "Confusion or altered mental status",
            ],
            vec![],
        ),
        // 1
        step(
            StepKind::RedFlag,
            "Vital sign red flags",
            &["Blood pressure above 180/110", "Fever with stiff neck"],
            vec![],
        ),
        // 2
        step(
            StepKind::Action,
            "Obtain a full set of vital signs",
            &[],
            vec![outcome("Vitals obtained", vec![], Next::None)],
        ),
        // 3
        initial,
        // 4
        step(
            StepKind::Choice,
            "Migraine features present?",
            &["Photophobia", "Nausea", "Prior similar headaches"],
            vec![
                outcome(
                    "Yes",
                    vec![treatment_protocol("Treatment protocol: migraine")],
                    Next::One(5),
                ),
                outcome("No", vec![], Next::One(6)),
            ],
        ),
        // 5
        step(
            StepKind::Action,
            "Administer medication per protocol and reassess in 1 hour",
            &[],
            vec![
                outcome(
                    "Improved",
                    vec![treatment_protocol("Return to duty with follow-up")],
                    Next::None,
                ),
                outcome("Not improved", vec![provider_same_day()], Next::None),
            ],
        ),
        // 6
        tension,
    ];

    Protocol {
        id: "C-1".into(),
        name: "Headache".into(),
        steps,
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Catalog {
    /// Load a catalog from a JSON file and validate it
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let catalog: Catalog = serde_json::from_str(&contents)?;
        tracing::info!(
            "Loaded {} protocols and {} screeners from {:?}",
            catalog.protocols.len(),
            catalog.screeners.len(),
            path
        );
        catalog.into_validated()
    }

    /// Overlay another catalog's entries by id
    pub fn merge(&mut self, other: Catalog) {
        self.protocols.extend(other.protocols);
        self.screeners.extend(other.screeners);
    }

    /// Return the catalog if valid, or every validation problem joined
    pub fn into_validated(self) -> Result<Self> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(Error::CatalogValidation(errors.join("; ")))
        }
    }

    pub fn protocol(&self, id: &str) -> Result<&Protocol> {
        self.protocols
            .get(id)
            .ok_or_else(|| Error::UnknownProtocol(id.to_string()))
    }

    pub fn screener(&self, id: &str) -> Result<&ScreenerDefinition> {
        self.screeners
            .get(id)
            .ok_or_else(|| Error::UnknownScreener(id.to_string()))
    }

    /// Validate the catalog for consistency and completeness
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (id, protocol) in &self.protocols {
            if id != &protocol.id {
                errors.push(format!(
                    "Protocol key '{}' doesn't match protocol.id '{}'",
                    id, protocol.id
                ));
            }
            validate_protocol(protocol, &mut errors);
        }

        for (id, screener) in &self.screeners {
            if id != &screener.id {
                errors.push(format!(
                    "Screener key '{}' doesn't match definition.id '{}'",
                    id, screener.id
                ));
            }
            validate_screener(screener, &mut errors);
        }

        errors
    }
}

fn validate_protocol(protocol: &Protocol, errors: &mut Vec<String>) {
    let id = &protocol.id;
    if id.is_empty() || id.contains('|') {
        errors.push(format!("Protocol id '{}' is empty or contains '|'", id));
    }
    if protocol.steps.is_empty() {
        errors.push(format!("Protocol '{}' has no steps", id));
        return;
    }
    if !protocol.steps.iter().any(|s| s.kind == StepKind::Initial) {
        errors.push(format!("Protocol '{}' has no Initial step", id));
    }

    let len = protocol.steps.len();
    for (index, step) in protocol.steps.iter().enumerate() {
        if step.flag_options.len() > MAX_FLAG_OPTIONS {
            errors.push(format!(
                "Protocol '{}' step {}: {} flag options exceed the {}-flag limit",
                id,
                index,
                step.flag_options.len(),
                MAX_FLAG_OPTIONS
            ));
        }

        match step.kind {
            StepKind::Choice | StepKind::Count if step.outcomes.len() < 2 => {
                errors.push(format!(
                    "Protocol '{}' step {}: {:?} step needs at least two outcomes",
                    id, index, step.kind
                ));
            }
            StepKind::Initial if step.outcomes.is_empty() => {
                errors.push(format!(
                    "Protocol '{}' step {}: Initial step has no outcomes",
                    id, index
                ));
            }
            _ => {}
        }

        for (o, outcome) in step.outcomes.iter().enumerate() {
            for target in outcome.next.indices() {
                if target >= len {
                    errors.push(format!(
                        "Protocol '{}' step {} outcome {}: next {} is outside the protocol",
                        id, index, o, target
                    ));
                } else if target <= index {
                    errors.push(format!(
                        "Protocol '{}' step {} outcome {}: next {} does not point forward",
                        id, index, o, target
                    ));
                }
            }
        }
    }
}

fn validate_screener(screener: &ScreenerDefinition, errors: &mut Vec<String>) {
    let id = &screener.id;
    let count = screener.questions.len();

    if count == 0 {
        errors.push(format!("Screener '{}' has no questions", id));
    }

    for (index, question) in screener.questions.iter().enumerate() {
        let scale = question
            .scale
            .as_deref()
            .unwrap_or(&screener.scale_options);
        match question.kind {
            QuestionKind::Scale if scale.is_empty() => {
                errors.push(format!(
                    "Screener '{}' question {}: scale question has no options",
                    id, index
                ));
            }
            QuestionKind::Check if scale.len() > MAX_FLAG_OPTIONS => {
                errors.push(format!(
                    "Screener '{}' question {}: too many check options",
                    id, index
                ));
            }
            _ => {}
        }

        if let Some(DynamicContent::Digits(d)) = question.dynamic {
            if screener
                .word_lists
                .iter()
                .any(|list| d >= list.digit_strings.len())
            {
                errors.push(format!(
                    "Screener '{}' question {}: digit string {} missing from a word list",
                    id, index, d
                ));
            }
        }
        if question.dynamic.is_some() && screener.word_lists.is_empty() {
            errors.push(format!(
                "Screener '{}' question {}: dynamic content without word lists",
                id, index
            ));
        }
    }

    if let Some(gate) = &screener.gate {
        let indices = std::iter::once(gate.required_index)
            .chain(gate.any_of_indices.iter().copied())
            .chain(std::iter::once(gate.gated_from_index));
        for index in indices {
            if index >= count {
                errors.push(format!(
                    "Screener '{}': gate index {} out of range",
                    id, index
                ));
            }
        }
        if gate.any_of_indices.is_empty() {
            errors.push(format!("Screener '{}': gate has no any-of indices", id));
        }
    }

    let mut bands: Vec<&InterpretationBand> = screener.interpretation_bands.iter().collect();
    bands.sort_by_key(|b| b.min);
    for band in &bands {
        if band.min > band.max {
            errors.push(format!(
                "Screener '{}': band '{}' has min {} > max {}",
                id, band.label, band.min, band.max
            ));
        }
    }
    for pair in bands.windows(2) {
        if pair[1].min <= pair[0].max {
            errors.push(format!(
                "Screener '{}': bands '{}' and '{}' overlap",
                id, pair[0].label, pair[1].label
            ));
        }
    }

    if let Some(follow_up) = &screener.follow_up {
        if follow_up.options.is_empty() {
            errors.push(format!("Screener '{}': follow-up has no options", id));
        }
    }

    if let Some(extension) = &screener.conditional_extension {
        if extension.carry_over_questions > extension.target.questions.len() {
            errors.push(format!(
                "Screener '{}': carry-over {} exceeds extension '{}' question count",
                id, extension.carry_over_questions, extension.target.id
            ));
        }
        if extension.carry_over_questions > count {
            errors.push(format!(
                "Screener '{}': carry-over {} exceeds its own question count",
                id, extension.carry_over_questions
            ));
        }
        validate_screener(&extension.target, errors);
    }

    let names: HashSet<&str> = screener.word_lists.iter().map(|l| l.name.as_str()).collect();
    if names.len() != screener.word_lists.len() {
        errors.push(format!("Screener '{}': duplicate word list names", id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_loads() {
        let catalog = build_default_catalog();
        assert_eq!(catalog.protocols.len(), 2);
        assert!(catalog.protocols.contains_key("A-1"));
        assert!(catalog.screeners.contains_key("phq-2"));
        assert!(catalog.screeners.contains_key("mace"));
    }

    #[test]
    fn test_default_catalog_validates() {
        let catalog = build_default_catalog();
        let errors = catalog.validate();
        assert!(
            errors.is_empty(),
            "Default catalog has validation errors: {:?}",
            errors
        );
    }

    #[test]
    fn test_cached_catalog_matches_fresh_build() {
        let cached = get_default_catalog();
        let fresh = build_default_catalog();
        assert_eq!(cached.protocols["A-1"], fresh.protocols["A-1"]);
    }

    #[test]
    fn test_next_outside_protocol_rejected() {
        let mut catalog = build_default_catalog();
        let protocol = catalog.protocols.get_mut("A-1").unwrap();
        protocol.steps[1].outcomes[1].next = Next::One(42);

        let errors = catalog.validate();
        assert!(errors.iter().any(|e| e.contains("outside the protocol")));
        assert!(catalog.into_validated().is_err());
    }

    #[test]
    fn test_backward_next_rejected() {
        let mut catalog = build_default_catalog();
        let protocol = catalog.protocols.get_mut("A-1").unwrap();
        protocol.steps[2].outcomes[0].next = Next::Many(vec![3, 1]);

        let errors = catalog.validate();
        assert!(errors.iter().any(|e| e.contains("does not point forward")));
    }

    #[test]
    fn test_missing_initial_rejected() {
        let mut catalog = build_default_catalog();
        let protocol = catalog.protocols.get_mut("A-1").unwrap();
        protocol.steps[1].kind = StepKind::Action;

        let errors = catalog.validate();
        assert!(errors.iter().any(|e| e.contains("no Initial step")));
    }

    #[test]
    fn test_gate_out_of_range_rejected() {
        let mut catalog = build_default_catalog();
        let mace = catalog.screeners.get_mut("mace").unwrap();
        if let Some(gate) = mace.gate.as_mut() {
            gate.any_of_indices.push(500);
        }

        let errors = catalog.validate();
        assert!(errors.iter().any(|e| e.contains("gate index 500")));
    }

    #[test]
    fn test_overlapping_bands_rejected() {
        let mut catalog = build_default_catalog();
        let phq2 = catalog.screeners.get_mut("phq-2").unwrap();
        phq2.interpretation_bands
            .push(InterpretationBand::new(1, 4, "Overlap"));

        let errors = catalog.validate();
        assert!(errors.iter().any(|e| e.contains("overlap")));
    }

    #[test]
    fn test_too_many_flags_rejected() {
        let mut catalog = build_default_catalog();
        let protocol = catalog.protocols.get_mut("A-1").unwrap();
        protocol.steps[2].flag_options = (0..33).map(|i| format!("flag {}", i)).collect();

        let errors = catalog.validate();
        assert!(errors.iter().any(|e| e.contains("32-flag limit")));
    }

    #[test]
    fn test_load_from_json_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("catalog.json");

        let mut extra = Catalog::default();
        let mut protocol = build_default_catalog().protocols["A-1"].clone();
        protocol.id = "A-9".into();
        extra.protocols.insert("A-9".into(), protocol);
        std::fs::write(&path, serde_json::to_string(&extra).unwrap()).unwrap();

        let loaded = Catalog::load_from(&path).unwrap();
        let mut catalog = build_default_catalog();
        catalog.merge(loaded);
        assert!(catalog.protocol("A-9").is_ok());
        assert!(catalog.protocol("A-1").is_ok());
    }

    #[test]
    fn test_load_invalid_json_file_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"protocols": {"X-1": {"id": "X-1", "name": "Broken", "steps": []}}}"#,
        )
        .unwrap();

        let result = Catalog::load_from(&path);
        assert!(matches!(result, Err(Error::CatalogValidation(_))));
    }

    #[test]
    fn test_unknown_lookups() {
        let catalog = build_default_catalog();
        assert!(matches!(
            catalog.protocol("Z-0"),
            Err(Error::UnknownProtocol(_))
        ));
        assert!(matches!(
            catalog.screener("nope"),
            Err(Error::UnknownScreener(_))
        ));
    }
}
