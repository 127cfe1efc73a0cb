use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::str::FromStr;
use triage_core::*;

#[derive(Parser)]
#[command(name = "triage")]
#[command(about = "Field triage protocol and screening system", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log engine transitions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available protocols and screeners
    Protocols,

    /// Run a protocol by applying operations in order
    Run {
        /// Protocol id (e.g. A-1)
        protocol: String,

        /// Operation: flag:STEP:FLAG, choose:STEP:OUTCOME or undo
        #[arg(long = "op")]
        ops: Vec<Op>,

        /// History of present illness free text
        #[arg(long, default_value = "")]
        hpi: String,

        /// Append the encounter to the log
        #[arg(long)]
        save: bool,
    },

    /// Decode a note string and show the restored run
    Decode {
        note: String,
    },

    /// Score a screener from comma-separated responses
    Screen {
        /// Screener id (e.g. phq-2)
        screener: String,

        /// Responses in active question order; "-" leaves one unanswered
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        responses: Vec<String>,

        /// Follow-up choice index
        #[arg(long)]
        follow_up: Option<usize>,

        /// Seed for the word-list draw
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List logged encounters
    History,
}

#[derive(Clone, Debug)]
enum Op {
    Flag(usize, usize),
    Choose(usize, usize),
    Undo,
}

impl FromStr for Op {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let index = |i: usize| -> std::result::Result<usize, String> {
            parts
                .get(i)
                .ok_or_else(|| format!("missing index in '{}'", s))?
                .parse()
                .map_err(|_| format!("invalid index in '{}'", s))
        };
        match parts[0] {
            "undo" if parts.len() == 1 => Ok(Op::Undo),
            "flag" if parts.len() == 3 => Ok(Op::Flag(index(1)?, index(2)?)),
            "choose" if parts.len() == 3 => Ok(Op::Choose(index(1)?, index(2)?)),
            _ => Err(format!(
                "unknown operation '{}' (expected flag:S:F, choose:S:O or undo)",
                s
            )),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        triage_core::logging::init_with_level("debug");
    } else {
        triage_core::logging::init();
    }

    let mut config = Config::load()?;
    if let Some(data_dir) = cli.data_dir.clone() {
        config.data.data_dir = data_dir;
    }
    let log_path = config.encounter_log_path();

    let catalog = load_catalog(&config)?;

    match cli.command {
        Commands::Protocols => cmd_protocols(&catalog),
        Commands::Run {
            protocol,
            ops,
            hpi,
            save,
        } => cmd_run(&catalog, &config, &log_path, &protocol, &ops, &hpi, save),
        Commands::Decode { note } => cmd_decode(&catalog, &note),
        Commands::Screen {
            screener,
            responses,
            follow_up,
            seed,
        } => cmd_screen(&catalog, &screener, &responses, follow_up, seed),
        Commands::History => cmd_history(&log_path),
    }
}

fn load_catalog(config: &Config) -> Result<Catalog> {
    let mut catalog = get_default_catalog().clone();
    if let Some(path) = &config.catalog.protocol_file {
        catalog.merge(Catalog::load_from(path)?);
    }

    let errors = catalog.validate();
    if !errors.is_empty() {
        eprintln!("Catalog validation errors:");
        for error in errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::CatalogValidation("Invalid catalog".into()));
    }
    Ok(catalog)
}

fn cmd_protocols(catalog: &Catalog) -> Result<()> {
    let mut protocols: Vec<_> = catalog.protocols.values().collect();
    protocols.sort_by_key(|p| &p.id);
    println!("Protocols:");
    for protocol in protocols {
        println!("  {:<6} {} ({} steps)", protocol.id, protocol.name, protocol.steps.len());
    }

    let mut screeners: Vec<_> = catalog.screeners.values().collect();
    screeners.sort_by_key(|s| &s.id);
    println!("Screeners:");
    for screener in screeners {
        println!(
            "  {:<6} {} ({} questions)",
            screener.id,
            screener.name,
            screener.questions.len()
        );
    }
    Ok(())
}

fn cmd_run(
    catalog: &Catalog,
    config: &Config,
    log_path: &std::path::Path,
    protocol_id: &str,
    ops: &[Op],
    hpi: &str,
    save: bool,
) -> Result<()> {
    let protocol = catalog.protocol(protocol_id)?;
    let mut run = engine::start(protocol);

    for op in ops {
        check_op(protocol, op)?;
        run = match *op {
            Op::Flag(step, flag) => engine::toggle_flag(protocol, &run, step, flag),
            Op::Choose(step, outcome) => engine::choose_outcome(protocol, &run, step, outcome),
            Op::Undo => engine::undo(protocol, &run),
        };
    }

    display_run(protocol, &run);

    let note = encode(
        protocol,
        &run,
        hpi,
        config.note.inclusion_flags(),
        &protocol.id,
    );
    println!();
    println!("Note: {}", note);

    if save {
        let record = EncounterRecord::new(&protocol.id, &note, run.active_disposition.clone());
        let mut sink = JsonlSink::new(log_path);
        sink.append(&record)?;
        println!("\n✓ Encounter logged!");
    }

    Ok(())
}

/// Reject indices the engine would treat as programmer errors
fn check_op(protocol: &Protocol, op: &Op) -> Result<()> {
    let (step_index, inner, what) = match *op {
        Op::Flag(s, f) => (s, f, "flag"),
        Op::Choose(s, o) => (s, o, "outcome"),
        Op::Undo => return Ok(()),
    };
    let step = protocol.steps.get(step_index).ok_or_else(|| {
        Error::Other(format!(
            "Protocol {} has no step {}",
            protocol.id, step_index
        ))
    })?;
    let limit = match *op {
        Op::Flag(..) => step.flag_options.len(),
        _ => step.outcomes.len(),
    };
    if inner >= limit {
        return Err(Error::Other(format!(
            "Step {} of {} has no {} {}",
            step_index, protocol.id, what, inner
        )));
    }
    Ok(())
}

fn cmd_decode(catalog: &Catalog, text: &str) -> Result<()> {
    let Some(note) = decode(text) else {
        println!("Nothing to restore");
        return Ok(());
    };
    let Ok(protocol) = catalog.protocol(&note.protocol_code) else {
        tracing::warn!("Note references unknown protocol {}", note.protocol_code);
        println!("Nothing to restore");
        return Ok(());
    };

    let run = restore(protocol, &note);
    display_run(protocol, &run);

    println!();
    let flags = note.inclusion_flags;
    println!(
        "Sections: algorithm={} decision-making={} hpi={}",
        flags.algorithm, flags.decision_making, flags.hpi
    );
    if !note.hpi_text.is_empty() {
        println!("HPI: {}", note.hpi_text);
    }
    Ok(())
}

fn cmd_screen(
    catalog: &Catalog,
    screener_id: &str,
    responses: &[String],
    follow_up: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    let definition = catalog.screener(screener_id)?;
    let mut run = match seed {
        Some(seed) => screener::start_with_rng(definition, &mut StdRng::seed_from_u64(seed)),
        None => screener::start(definition),
    };

    for (index, raw) in responses.iter().enumerate() {
        if raw == "-" {
            continue;
        }
        let value: u32 = raw
            .trim()
            .parse()
            .map_err(|_| Error::Other(format!("Invalid response '{}'", raw)))?;
        check_response(definition, &run, index, value)?;
        run = screener::set_response(definition, &run, index, Some(value));
    }
    if let Some(choice) = follow_up {
        let active = screener::active_definition(definition, screener::score(definition, &run.responses));
        let options = active.follow_up.as_ref().map(|f| f.options.len()).unwrap_or(0);
        if choice >= options {
            return Err(Error::Other(format!(
                "{} has no follow-up choice {}",
                active.id, choice
            )));
        }
        run = screener::set_follow_up(definition, &run, follow_up);
    }

    let score = screener::active_score(definition, &run);
    let active = screener::active_definition(definition, screener::score(definition, &run.responses));

    println!("\n╭─────────────────────────────────────────╮");
    println!("│  {}", active.name);
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  Score: {} / {}", score, screener::max_score(active));
    let label = screener::interpretation(active, score);
    if !label.is_empty() {
        println!("  Interpretation: {}", label);
    }
    if run.extension_triggered {
        println!(
            "  Extended to {} ({} questions)",
            active.id,
            screener::active_question_count(definition, &run)
        );
    }
    if let Some(list) = active.word_lists.get(run.chosen_word_list_index) {
        println!("  Word list: {}", list.name);
    }
    if let Some(message) = screener::gate_message(definition, &run) {
        println!("  {}", message);
    }

    match screener::complete(definition, &run) {
        Ok(result) => println!(
            "  Complete: {} ({})",
            result.screener_id,
            if result.positive { "positive" } else { "negative" }
        ),
        Err(_) => println!("  Incomplete"),
    }
    Ok(())
}

fn check_response(
    definition: &ScreenerDefinition,
    run: &ScreenerRun,
    index: usize,
    value: u32,
) -> Result<()> {
    let active = screener::active_definition(definition, screener::score(definition, &run.responses));
    let question = active
        .questions
        .get(index)
        .ok_or_else(|| Error::Other(format!("{} has no question {}", active.id, index)))?;
    let valid = match question.kind {
        QuestionKind::Scale => screener::question_scale(active, question)
            .iter()
            .any(|o| o.value == value),
        QuestionKind::Check => true,
        QuestionKind::Info => false,
    };
    if !valid {
        return Err(Error::Other(format!(
            "Response {} is not valid for question {} of {}",
            value, index, active.id
        )));
    }
    Ok(())
}

fn cmd_history(log_path: &std::path::Path) -> Result<()> {
    let records = read_encounters(log_path)?;
    if records.is_empty() {
        println!("No encounters logged.");
        return Ok(());
    }
    for record in records {
        let disposition = record
            .disposition
            .map(|d| format!("{} {}", d.category, d.text))
            .unwrap_or_else(|| "no disposition".into());
        println!(
            "{}  {:<6} {}  {}",
            record.recorded_at.format("%Y-%m-%d %H:%M"),
            record.protocol_id,
            disposition,
            record.note
        );
    }
    Ok(())
}

fn display_run(protocol: &Protocol, run: &Run) {
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  {} {}", protocol.id, protocol.name);
    println!("╰─────────────────────────────────────────╯");
    println!();

    for index in engine::visible_steps(run) {
        let step = &protocol.steps[index];
        let state = &run.step_states[index];
        println!("  [{}] {:?}: {}", index, step.kind, step.prompt);
        for (f, option) in step.flag_options.iter().enumerate() {
            let mark = if state.selected_flags.contains(&f) { "x" } else { " " };
            println!("      [{}] {}", mark, option);
        }
        if let Some(o) = state.chosen_outcome {
            println!("      → {}", step.outcomes[o].label);
        }
    }

    println!();
    match &run.active_disposition {
        Some(d) => {
            print!("  Disposition: {} - {}", d.category, d.text);
            if let Some(modifier) = &d.modifier {
                print!(" ({})", modifier);
            }
            println!();
        }
        None => println!("  Disposition: pending"),
    }
}
