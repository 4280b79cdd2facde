//! Working-page parser: groups lines under mode-labeled headings and turns
//! each qualifying line into a typed [`Instruction`].

use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;
use tracing::{debug, error};

use crate::discussion::DiscussionPage;
use crate::instruction::{Instruction, Mode};
use crate::line::parse_line;
use crate::registry::TemplateRegistry;
use crate::store::PageStore;
use crate::title::{NS_PROJECT, Title};
use crate::wikicode::{Wikicode, remove_disabled_parts};

static NO_CONSENSUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(no consensus) (?:for|to) (\w+)\b").expect("no-consensus regex")
});
static NOT_DONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(not )(\w+)\b").expect("not-done regex"));

/// A working page listing resolved discussion outcomes to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingPage {
    title: Title,
}

impl WorkingPage {
    pub fn new(title: Title, working_prefix: &str) -> Result<Self> {
        if title.namespace() != NS_PROJECT || !title.name().starts_with(working_prefix) {
            bail!("{title} is not a working page");
        }
        Ok(Self { title })
    }

    pub fn title(&self) -> &Title {
        &self.title
    }
}

/// Outcome of parsing one working page. Section-level failures are
/// collected here; they never abort the page.
#[derive(Debug, Default)]
pub struct ParseReport {
    pub instructions: Vec<Instruction>,
    pub errors: Vec<String>,
}

/// Parse every mode-labeled section of a working page into instructions.
/// Headings matching no mode are skipped; a malformed section is reported
/// and parsing continues with the next one.
pub fn parse_working_page<S: PageStore>(
    store: &mut S,
    registry: &TemplateRegistry,
    page: &WorkingPage,
) -> Result<ParseReport> {
    let mut report = ParseReport::default();
    let text = remove_disabled_parts(&store.get_text(page.title())?);
    let code = Wikicode::parse(&text);
    for range in code.sections_flat() {
        let Some(heading) = code.section_heading(&range) else {
            continue;
        };
        let Some(mode) = Mode::from_heading(heading.title()) else {
            debug!(heading = heading.title(), "section matches no mode");
            continue;
        };
        let section_text = code.section_text(&range);
        match parse_section(store, registry, mode, &section_text) {
            Ok(instructions) => report.instructions.extend(instructions),
            Err(source) => {
                let message = format!(
                    "{}: failed to parse {mode} section: {source:#}",
                    page.title()
                );
                error!("{message}");
                report.errors.push(message);
            }
        }
    }
    Ok(report)
}

fn parse_section<S: PageStore>(
    store: &mut S,
    registry: &TemplateRegistry,
    mode: Mode,
    section: &str,
) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    // A discussion reference sticks, with its prefix and suffix, until a
    // later line carries its own.
    let mut cfd_page: Option<DiscussionPage> = None;
    let mut cfd_prefix = String::new();
    let mut cfd_suffix = String::new();
    for line in section.lines() {
        let results = parse_line(line, registry)?;
        if let Some(discussion) = results.discussion {
            cfd_prefix = results.prefix.clone();
            cfd_suffix = results.suffix.clone();
            cfd_page = Some(discussion);
        }
        let (Some(cfd), Some(old_cat)) = (cfd_page.as_ref(), results.old_cat) else {
            continue;
        };
        let prefix = format!("{} {cfd_prefix}", results.prefix);
        let suffix = if results.suffix.is_empty() {
            cfd_suffix.clone()
        } else {
            results.suffix.clone()
        };
        if prefix.contains("NO BOT") {
            debug!(line, "bot disabled for line");
            continue;
        }
        let discussion = cfd.find_discussion(store, registry, &old_cat)?;
        let mut instruction = Instruction::new(mode, old_cat, discussion);
        instruction.new_cats = results.new_cats;
        match mode {
            Mode::Merge => {
                instruction.redirect = prefix.contains("REDIRECT");
                instruction.result = mode.keyword().to_string();
                let (_, action) = instruction.discussion.result_action(
                    store,
                    registry,
                    &instruction.old_cat,
                )?;
                instruction.action = if action.is_empty() {
                    "merging".to_string()
                } else {
                    action
                };
            }
            Mode::Move => {
                instruction.noredirect = !prefix.contains("REDIRECT");
            }
            Mode::Retain => {
                let (result, action) = retain_result_action(
                    store,
                    registry,
                    &instruction,
                    &suffix,
                )?;
                instruction.result = result;
                instruction.action = action;
            }
            Mode::Empty => {}
        }
        instructions.push(instruction);
    }
    Ok(instructions)
}

/// Result/action for a retained category, in priority order: a "no
/// consensus" phrase in the suffix, a "not <verb>ed" phrase, a bare
/// "keep", then whatever the discussion itself recorded.
fn retain_result_action<S: PageStore>(
    store: &mut S,
    registry: &TemplateRegistry,
    instruction: &Instruction,
    suffix: &str,
) -> Result<(String, String)> {
    if let Some(captures) = NO_CONSENSUS_RE.captures(suffix) {
        return Ok((captures[1].to_string(), captures[2].to_string()));
    }
    if let Some(captures) = NOT_DONE_RE.captures(suffix) {
        let result = format!("{}{}", &captures[1], &captures[2]);
        let word = &captures[2];
        let action = match word.strip_suffix("ed") {
            Some(stem) => format!("{stem}e"),
            None => word.to_string(),
        };
        return Ok((result, action));
    }
    if suffix.to_lowercase().contains("keep") {
        return Ok(("keep".to_string(), "delete".to_string()));
    }
    instruction
        .discussion
        .result_action(store, registry, &instruction.old_cat)
}
