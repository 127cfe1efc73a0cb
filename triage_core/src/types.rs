//! Core domain types for the triage system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Protocol steps, outcomes and dispositions
//! - Per-run decision state
//! - Screener instruments and their runs

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Count steps select their first outcome once this many flags are selected,
/// unless the step carries its own threshold.
pub const DEFAULT_COUNT_THRESHOLD: usize = 3;

/// Selection bitmasks are 32 bits wide, so no step may carry more flags.
pub const MAX_FLAG_OPTIONS: usize = 32;

// ============================================================================
// Protocol Types
// ============================================================================

/// Kind of a protocol step
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Globally aggregated red-flag inputs
    RedFlag,
    /// The entry question whose "Yes" branch is driven by red flags
    Initial,
    /// Any selected flag picks the first outcome
    Choice,
    /// Selecting at least a threshold of flags picks the first outcome
    Count,
    /// Instruction step answered only by explicit outcome choice
    Action,
}

/// Terminal clinical categorization
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Disposition {
    pub category: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<String>,
}

impl Disposition {
    pub fn new(category: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            text: text.into(),
            modifier: None,
        }
    }

    pub fn with_modifier(mut self, modifier: impl Into<String>) -> Self {
        self.modifier = Some(modifier.into());
        self
    }
}

/// Successor pointer(s) of an outcome
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Next {
    /// Leaf: nothing is revealed
    #[default]
    None,
    One(usize),
    /// Parallel fan-out to several simultaneously visible branches
    Many(Vec<usize>),
}

impl Next {
    /// Step indices named by this pointer
    pub fn indices(&self) -> Vec<usize> {
        match self {
            Next::None => Vec::new(),
            Next::One(index) => vec![*index],
            Next::Many(indices) => indices.clone(),
        }
    }
}

/// One answer branch of a step
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    pub label: String,
    #[serde(default)]
    pub disposition_stack: Vec<Disposition>,
    #[serde(default)]
    pub next: Next,
    #[serde(default)]
    pub select_all_flags: bool,
}

impl Outcome {
    /// First disposition of the stack, if any
    pub fn primary_disposition(&self) -> Option<&Disposition> {
        self.disposition_stack.first()
    }
}

/// One node of a protocol
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    pub kind: StepKind,
    pub prompt: String,
    #[serde(default)]
    pub flag_options: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
    /// Only meaningful for Count steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_threshold: Option<usize>,
}

impl StepDefinition {
    /// Effective threshold for a Count step
    pub fn count_threshold(&self) -> usize {
        self.count_threshold.unwrap_or(DEFAULT_COUNT_THRESHOLD)
    }
}

/// A named ordered sequence of steps
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Protocol {
    pub id: String,
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl Protocol {
    /// Index of the first Initial step.
    ///
    /// Validated catalogs always contain one; an unvalidated protocol without
    /// an Initial step behaves as if step 0 were the entry point.
    pub fn initial_index(&self) -> usize {
        self.steps
            .iter()
            .position(|s| s.kind == StepKind::Initial)
            .unwrap_or(0)
    }

    /// Indices of all RedFlag steps in protocol order
    pub fn red_flag_indices(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == StepKind::RedFlag)
            .map(|(i, _)| i)
            .collect()
    }
}

// ============================================================================
// Run State Types
// ============================================================================

/// Mutable per-run state of one step
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StepState {
    pub visible: bool,
    pub selected_flags: BTreeSet<usize>,
    /// Index into the step's outcome list
    pub chosen_outcome: Option<usize>,
}

impl StepState {
    /// Reset selections and answer, hiding the step
    pub fn clear(&mut self) {
        self.visible = false;
        self.selected_flags.clear();
        self.chosen_outcome = None;
    }
}

/// One execution of a protocol
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub protocol_id: String,
    pub step_states: Vec<StepState>,
    pub active_disposition: Option<Disposition>,
}

// ============================================================================
// Screener Types
// ============================================================================

/// Kind of a screener question
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Single choice from a numeric scale
    Scale,
    /// Multi-select stored as a bitmask
    Check,
    /// Read-only text, never answered
    Info,
}

/// One labelled point on a numeric scale
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScaleOption {
    pub label: String,
    pub value: u32,
}

impl ScaleOption {
    pub fn new(label: impl Into<String>, value: u32) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Prompt content filled in from the run's chosen word list
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DynamicContent {
    /// Replaces `{words}` with the word list
    Words,
    /// Replaces `{digits}` with the digit string at this index
    Digits(usize),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScreenerQuestion {
    pub text: String,
    pub kind: QuestionKind,
    /// Overrides the definition's default scale (or lists Check options)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec<ScaleOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scored: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicContent>,
}

impl ScreenerQuestion {
    pub fn scale(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: QuestionKind::Scale,
            scale: None,
            scored: None,
            section: None,
            dynamic: None,
        }
    }

    pub fn check(text: impl Into<String>, options: Vec<ScaleOption>) -> Self {
        Self {
            kind: QuestionKind::Check,
            scale: Some(options),
            ..Self::scale(text)
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: QuestionKind::Info,
            ..Self::scale(text)
        }
    }

    pub fn with_scale(mut self, scale: Vec<ScaleOption>) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_scored(mut self, scored: bool) -> Self {
        self.scored = Some(scored);
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_dynamic(mut self, dynamic: DynamicContent) -> Self {
        self.dynamic = Some(dynamic);
        self
    }
}

/// Disjoint `[min, max]` score range with its label
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterpretationBand {
    pub min: u32,
    pub max: u32,
    pub label: String,
}

impl InterpretationBand {
    pub fn new(min: u32, max: u32, label: impl Into<String>) -> Self {
        Self {
            min,
            max,
            label: label.into(),
        }
    }
}

/// Hides later questions until a precondition response pattern is met
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenerGate {
    pub required_index: usize,
    pub any_of_indices: Vec<usize>,
    pub gated_from_index: usize,
    pub open_message: String,
    pub closed_message: String,
}

/// Unscored closing question (e.g. functional difficulty)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowUp {
    pub prompt: String,
    pub options: Vec<String>,
}

/// Score-triggered upgrade to a longer instrument
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConditionalExtension {
    pub target: Box<ScreenerDefinition>,
    pub threshold: u32,
    /// Leading target questions answered by the base instrument
    pub carry_over_questions: usize,
}

/// Word and digit-string set for dynamic prompts
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordList {
    pub name: String,
    pub words: Vec<String>,
    #[serde(default)]
    pub digit_strings: Vec<String>,
}

/// A standardized scored questionnaire
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScreenerDefinition {
    pub id: String,
    pub name: String,
    pub questions: Vec<ScreenerQuestion>,
    #[serde(default)]
    pub scale_options: Vec<ScaleOption>,
    #[serde(default)]
    pub interpretation_bands: Vec<InterpretationBand>,
    pub score_threshold: u32,
    #[serde(default)]
    pub invert_threshold: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<ScreenerGate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_extension: Option<ConditionalExtension>,
    #[serde(default)]
    pub word_lists: Vec<WordList>,
}

/// In-progress execution of one screener
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenerRun {
    pub definition_id: String,
    /// Responses to the base definition's questions
    pub responses: Vec<Option<u32>>,
    pub extension_triggered: bool,
    /// Responses to the extension questions past the carried-over prefix
    pub extension_responses: Vec<Option<u32>>,
    pub follow_up_choice: Option<usize>,
    /// Drawn once at start and held fixed
    pub chosen_word_list_index: usize,
}

/// Output of a completed screener
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenerResult {
    pub screener_id: String,
    pub responses: Vec<Option<u32>>,
    pub follow_up_choice: Option<usize>,
    pub score: u32,
    pub interpretation: String,
    pub positive: bool,
}

// ============================================================================
// Catalog Type
// ============================================================================

/// The complete catalog of protocols and screeners
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub protocols: HashMap<String, Protocol>,
    #[serde(default)]
    pub screeners: HashMap<String, ScreenerDefinition>,
}
