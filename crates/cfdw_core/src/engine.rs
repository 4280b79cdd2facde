//! Execution engine: drives working pages end to end, dispatching each
//! validated instruction to its category-level operation and coordinating
//! deletion, redirect conversion, and talk-page annotation.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use tracing::{error, info, warn};

use crate::check;
use crate::discussion::DiscussionPage;
use crate::instruction::{Instruction, Mode};
use crate::registry::TemplateRegistry;
use crate::rewrite::Substitution;
use crate::store::PageStore;
use crate::title::{
    Category, NS_PROJECT, NS_TEMPLATE, TEXTLINK_NAMESPACES, Title, namespace_has_subpages,
};
use crate::wikicode::{Node, Template, Wikicode};
use crate::workpage::{WorkingPage, parse_working_page};

static CFD_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<!--\s*BEGIN CFD TEMPLATE\s*-->.*?<!--\s*END CFD TEMPLATE\s*-->\n*")
        .expect("cfd block regex")
});

/// Outcome of one run, in the shape the CLI prints.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Working pages that were processed.
    pub pages: Vec<String>,
    /// Working pages skipped with the reason.
    pub skipped_pages: Vec<String>,
    /// Instructions that executed (or, in dry runs, passed validation).
    pub executed: Vec<String>,
    /// Instructions skipped by validation, with the reason.
    pub skipped: Vec<String>,
    /// Per-section and per-page failures; the run continued past each.
    pub errors: Vec<String>,
}

pub struct Engine<'a, S: PageStore> {
    store: &'a mut S,
    registry: &'a TemplateRegistry,
    /// Delay between a rewrite fan-out and the emptiness check; the
    /// membership index lags fresh edits.
    put_throttle: Duration,
    dry_run: bool,
}

impl<'a, S: PageStore> Engine<'a, S> {
    pub fn new(
        store: &'a mut S,
        registry: &'a TemplateRegistry,
        put_throttle: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            put_throttle,
            dry_run: false,
        }
    }

    /// Parse and validate only; nothing is written to the wiki.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Process working pages: the named ones, or every page under the
    /// working prefix when `pages` is empty. Only sysop-protected working
    /// pages are processed.
    pub fn run(&mut self, working_prefix: &str, pages: &[String]) -> Result<RunReport> {
        let mut report = RunReport::default();
        let titles: Vec<Title> = if pages.is_empty() {
            self.store.list_prefix(NS_PROJECT, working_prefix)?
        } else {
            let mut titles = Vec::new();
            for raw in pages {
                match Title::parse(raw, NS_PROJECT) {
                    Ok(title) => titles.push(title),
                    Err(source) => report
                        .skipped_pages
                        .push(format!("{raw}: {source:#}")),
                }
            }
            titles
        };
        for title in titles {
            let page = match WorkingPage::new(title.clone(), working_prefix) {
                Ok(page) => page,
                Err(source) => {
                    report.skipped_pages.push(format!("{title}: {source:#}"));
                    continue;
                }
            };
            let protection = self.store.page_info(page.title())?.edit_protection;
            if protection.as_deref() != Some("sysop") {
                report
                    .skipped_pages
                    .push(format!("{title}: not sysop-protected"));
                continue;
            }
            report.pages.push(title.full_name());
            self.process_page(&page, &mut report)?;
        }
        Ok(report)
    }

    /// Parse one working page and act on its surviving instructions, in
    /// original order, executing each immediately after validation so that
    /// later instructions see earlier effects.
    pub fn process_page(&mut self, page: &WorkingPage, report: &mut RunReport) -> Result<()> {
        let parsed = parse_working_page(self.store, self.registry, page)?;
        report.errors.extend(parsed.errors);
        let (instructions, contested) = check::collect(parsed.instructions);
        for instruction in &instructions {
            match check::skip_reason(self.store, instruction, &contested)? {
                Some(reason) => {
                    error!("skipping {instruction}: {reason}");
                    report.skipped.push(format!("{instruction}: {reason}"));
                }
                None if self.dry_run => {
                    report.executed.push(instruction.to_string());
                }
                None => {
                    info!("executing {instruction}");
                    match self.execute(instruction, report) {
                        Ok(()) => report.executed.push(instruction.to_string()),
                        Err(source) => report
                            .errors
                            .push(format!("{instruction}: {source:#}")),
                    }
                }
            }
        }
        Ok(())
    }

    fn execute(&mut self, instruction: &Instruction, report: &mut RunReport) -> Result<()> {
        let old_cat = &instruction.old_cat;
        let cfd_link = instruction.discussion.as_link();
        match instruction.mode {
            Mode::Empty => {
                let summary = format!("Removing {} per {cfd_link}", old_cat.as_link(true));
                self.rewrite_fan_out(instruction, &summary, report)?;
                self.wait_for_index();
                if self.store.exists(old_cat.title())?
                    && self.store.is_empty_category(old_cat)?
                {
                    self.delete_with_redirects(old_cat.title(), &cfd_link)?;
                }
            }
            Mode::Merge => {
                let targets = describe_targets(&instruction.new_cats);
                let redirect = instruction.new_cats.len() == 1 && instruction.redirect;
                let summary = format!(
                    "Merging {} to {targets} per {cfd_link}",
                    old_cat.as_link(true)
                );
                self.rewrite_fan_out(instruction, &summary, report)?;
                self.wait_for_index();
                if self.store.exists(old_cat.title())?
                    && self.store.is_empty_category(old_cat)?
                    && !self.store.is_category_redirect(old_cat.title())?
                {
                    if redirect {
                        self.redirect_cat(
                            old_cat,
                            &instruction.new_cats[0],
                            &format!("Merged to {targets} per {cfd_link}"),
                        )?;
                        self.add_old_cfd(
                            &old_cat.title().toggle_talk(),
                            &instruction.discussion,
                            &instruction.action,
                            &instruction.result,
                            &format!("{cfd_link} closed as {}", instruction.result),
                        )?;
                    } else {
                        self.delete_with_redirects(old_cat.title(), &cfd_link)?;
                    }
                }
            }
            Mode::Move => {
                let new_cat = instruction.new_cats[0].clone();
                // The rename is best-effort; member rewriting proceeds
                // whether or not it succeeded.
                match self.store.move_page(
                    old_cat.title(),
                    new_cat.title(),
                    &cfd_link,
                    instruction.noredirect,
                ) {
                    Ok(()) => {
                        if let Err(source) =
                            self.remove_cfd_tpl(new_cat.title(), "Category moved")
                        {
                            warn!("failed to strip tag from {new_cat}: {source:#}");
                        }
                    }
                    Err(source) => {
                        warn!("failed to move {old_cat} to {new_cat}: {source:#}");
                    }
                }
                let summary = format!(
                    "Moving {} to {} per {cfd_link}",
                    old_cat.as_link(true),
                    new_cat.as_link(true)
                );
                self.rewrite_fan_out(instruction, &summary, report)?;
                if !instruction.noredirect {
                    self.wait_for_index();
                    self.redirect_cat(
                        old_cat,
                        &new_cat,
                        "This category redirect should be kept",
                    )?;
                }
            }
            Mode::Retain => {
                let summary = format!("{cfd_link} closed as {}", instruction.result);
                self.remove_cfd_tpl(old_cat.title(), &summary)?;
                self.add_old_cfd(
                    &old_cat.title().toggle_talk(),
                    &instruction.discussion,
                    &instruction.action,
                    &instruction.result,
                    &summary,
                )?;
            }
        }
        Ok(())
    }

    /// The pages to rewrite for an instruction: every direct member of the
    /// old category, every backlink from text-link namespaces, and the
    /// existing `/doc` subpages of any of those.
    fn fan_out(&mut self, old_cat: &Category) -> Result<Vec<Title>> {
        let mut pages = self.store.category_members(old_cat)?;
        pages.extend(
            self.store
                .backlinks(old_cat.title(), TEXTLINK_NAMESPACES)?,
        );
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for page in pages {
            if !seen.insert(page.full_name()) {
                continue;
            }
            let doc = if namespace_has_subpages(page.namespace()) {
                Title::new(page.namespace(), &format!("{}/doc", page.name())).ok()
            } else {
                None
            };
            out.push(page);
            if let Some(doc) = doc
                && self.store.exists(&doc)?
                && seen.insert(doc.full_name())
            {
                out.push(doc);
            }
        }
        Ok(out)
    }

    fn rewrite_fan_out(
        &mut self,
        instruction: &Instruction,
        summary: &str,
        report: &mut RunReport,
    ) -> Result<()> {
        let substitution = Substitution::new(
            instruction.old_cat.clone(),
            &instruction.new_cats,
            summary,
        );
        for page in self.fan_out(&instruction.old_cat)? {
            if let Err(source) = substitution.apply(self.store, self.registry, &page) {
                warn!("failed to rewrite {page}: {source:#}");
                report.errors.push(format!("{page}: {source:#}"));
            }
        }
        Ok(())
    }

    fn wait_for_index(&self) {
        if !self.put_throttle.is_zero() {
            thread::sleep(self.put_throttle);
        }
    }

    /// Delete a page (with its talk page when present), then cascade to
    /// every redirect pointing at it.
    fn delete_with_redirects(&mut self, title: &Title, reason: &str) -> Result<()> {
        let delete_talk = self.store.exists(&title.toggle_talk())?;
        self.store.delete_page(title, reason, delete_talk)?;
        if self.store.exists(title)? {
            return Ok(());
        }
        for redirect in self.store.redirects_to(title)? {
            let delete_talk = self.store.exists(&redirect.toggle_talk())?;
            self.store.delete_page(
                &redirect,
                &format!(
                    "[[WP:G8|G8]]: Redirect to deleted page {}",
                    title.as_link(true)
                ),
                delete_talk,
            )?;
        }
        Ok(())
    }

    /// Replace the category's text with a soft-redirect template.
    fn redirect_cat(
        &mut self,
        cat: &Category,
        target: &Category,
        summary: &str,
    ) -> Result<()> {
        let mut template = Template::new("Category redirect");
        template.params.push(crate::wikicode::Param {
            name: None,
            value: target.full_name(),
        });
        template.add("keep", "yes");
        let text = Node::Template(template).to_string();
        self.store.save_text(cat.title(), &text, summary, false, false)
    }

    /// Strip the CFD closure markup block and any bare closure templates
    /// from a category page.
    fn remove_cfd_tpl(&mut self, title: &Title, summary: &str) -> Result<()> {
        let text = self.store.get_text(title)?;
        let text = CFD_BLOCK_RE.replace_all(&text, "").into_owned();
        let mut code = Wikicode::parse(&text);
        let registry = self.registry;
        code.retain(|node| match node {
            Node::Template(template) => match Title::parse(&template.name, NS_TEMPLATE) {
                Ok(name) => !registry.is_cfd_tag(&name),
                Err(_) => true,
            },
            _ => true,
        });
        let stripped = code.to_string().trim().to_string();
        self.store.save_text(title, &stripped, summary, true, true)
    }

    /// Prepend an `Old CfD` annotation to a talk page unless one with the
    /// same date is already present.
    fn add_old_cfd(
        &mut self,
        talk: &Title,
        discussion: &DiscussionPage,
        action: &str,
        result: &str,
        summary: &str,
    ) -> Result<()> {
        let date = discussion.date();
        let text = self.store.get_text(talk)?;
        let mut code = Wikicode::parse(&text);
        for (_, template) in code.templates() {
            let Ok(name) = Title::parse(&template.name, NS_TEMPLATE) else {
                continue;
            };
            if self.registry.is_old_cfd(&name) && template.get("date") == Some(date) {
                return Ok(());
            }
        }
        let mut template = Template::new("Old CfD");
        template.add("action", action);
        template.add("date", date);
        template.add("section", discussion.section().unwrap_or_default());
        template.add("result", result);
        code.prepend(Node::Text("\n".to_string()));
        code.prepend(Node::Template(template));
        self.store.save_text(talk, &code.to_string(), summary, true, false)
    }
}

/// Human-readable description of the merge targets, in listed order.
fn describe_targets(new_cats: &[Category]) -> String {
    match new_cats {
        [single] => single.as_link(true),
        [first, second] => format!("{} and {}", first.as_link(true), second.as_link(true)),
        _ => format!("{} categories", new_cats.len()),
    }
}
