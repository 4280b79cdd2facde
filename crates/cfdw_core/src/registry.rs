//! Template registry: which templates denote a category-discussion
//! proposal (`cfd`), which carry category-valued parameters to keep in
//! sync (`update`), and the fixed closure/annotation template sets.
//!
//! Loaded once per run from an on-wiki JSON document and treated as
//! immutable; identity comparisons go through each entry's alias set so
//! that template redirects compare equal to their target.

use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;

use crate::store::PageStore;
use crate::title::{NS_TEMPLATE, Title};

/// Templates removed from a category page when its discussion closes.
pub const CFD_TAG_TEMPLATES: &[&str] = &[
    "Cfd full",
    "Cfm full",
    "Cfm-speedy full",
    "Cfr full",
    "Cfr-speedy full",
];

/// Talk-page annotation template recording a closed discussion.
pub const OLD_CFD_TEMPLATES: &[&str] = &["Old CfD"];

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RegistryDoc {
    #[serde(default)]
    pub cfd: Vec<RawEntry>,
    #[serde(default)]
    pub update: Vec<RawEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEntry {
    pub title: String,
    #[serde(default)]
    pub params: Option<String>,
}

#[derive(Debug)]
pub struct TemplateEntry {
    title: Title,
    params_re: Option<Regex>,
    aliases: BTreeSet<String>,
}

impl TemplateEntry {
    fn new(title: Title, params: Option<&str>) -> Result<Self> {
        let params_re = match params {
            // Anchored so the configured pattern must match the whole
            // parameter name, like a fullmatch.
            Some(pattern) => Some(
                Regex::new(&format!("^(?:{pattern})$"))
                    .with_context(|| format!("invalid params pattern {pattern:?}"))?,
            ),
            None => None,
        };
        let mut aliases = BTreeSet::new();
        aliases.insert(title.full_name());
        Ok(Self {
            title,
            params_re,
            aliases,
        })
    }

    pub fn title(&self) -> &Title {
        &self.title
    }

    pub fn matches(&self, template: &Title) -> bool {
        self.aliases.contains(&template.full_name())
    }

    /// Whether a template parameter name is covered by this entry; entries
    /// without a configured pattern cover every parameter.
    pub fn param_matches(&self, name: &str) -> bool {
        match &self.params_re {
            Some(pattern) => pattern.is_match(name.trim()),
            None => true,
        }
    }

    fn add_alias(&mut self, title: &Title) {
        self.aliases.insert(title.full_name());
    }
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    cfd: Vec<TemplateEntry>,
    update: Vec<TemplateEntry>,
    cfd_tags: Vec<TemplateEntry>,
    old_cfd: Vec<TemplateEntry>,
}

impl TemplateRegistry {
    /// Build the registry from the on-wiki JSON document, expanding each
    /// entry with the redirects that point at it.
    pub fn load<S: PageStore>(store: &mut S, registry_page: &Title) -> Result<Self> {
        let text = store.get_text(registry_page)?;
        if text.trim().is_empty() {
            bail!("template registry page {registry_page} is empty or missing");
        }
        let doc: RegistryDoc = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse template registry {registry_page}"))?;
        let mut registry = Self::from_doc(&doc)?;
        for entry in registry
            .cfd
            .iter_mut()
            .chain(registry.update.iter_mut())
            .chain(registry.cfd_tags.iter_mut())
            .chain(registry.old_cfd.iter_mut())
        {
            expand_aliases(store, entry)?;
        }
        Ok(registry)
    }

    /// Build from a parsed document without alias expansion. Used by tests
    /// and dry runs that have no store access.
    pub fn from_doc(doc: &RegistryDoc) -> Result<Self> {
        Ok(Self {
            cfd: build_entries(&doc.cfd)?,
            update: build_entries(&doc.update)?,
            cfd_tags: builtin_entries(CFD_TAG_TEMPLATES)?,
            old_cfd: builtin_entries(OLD_CFD_TEMPLATES)?,
        })
    }

    pub fn is_cfd_template(&self, template: &Title) -> bool {
        self.cfd.iter().any(|entry| entry.matches(template))
    }

    pub fn update_entry(&self, template: &Title) -> Option<&TemplateEntry> {
        self.update.iter().find(|entry| entry.matches(template))
    }

    pub fn has_update_templates(&self) -> bool {
        !self.update.is_empty()
    }

    pub fn is_cfd_tag(&self, template: &Title) -> bool {
        self.cfd_tags.iter().any(|entry| entry.matches(template))
    }

    pub fn is_old_cfd(&self, template: &Title) -> bool {
        self.old_cfd.iter().any(|entry| entry.matches(template))
    }

    /// Canonical titles of the configured proposal templates.
    pub fn cfd_titles(&self) -> Vec<String> {
        self.cfd
            .iter()
            .map(|entry| entry.title().full_name())
            .collect()
    }

    /// Canonical titles of the configured parameter-sync templates.
    pub fn update_titles(&self) -> Vec<String> {
        self.update
            .iter()
            .map(|entry| entry.title().full_name())
            .collect()
    }
}

fn build_entries(raw: &[RawEntry]) -> Result<Vec<TemplateEntry>> {
    raw.iter()
        .map(|entry| {
            let title = Title::parse(&entry.title, NS_TEMPLATE)
                .with_context(|| format!("invalid template title {:?}", entry.title))?;
            TemplateEntry::new(title, entry.params.as_deref())
        })
        .collect()
}

fn builtin_entries(names: &[&str]) -> Result<Vec<TemplateEntry>> {
    names
        .iter()
        .map(|name| TemplateEntry::new(Title::parse(name, NS_TEMPLATE)?, None))
        .collect()
}

/// Follow a redirect entry to its canonical target, then collect every
/// redirect that points at the canonical page.
fn expand_aliases<S: PageStore>(store: &mut S, entry: &mut TemplateEntry) -> Result<()> {
    let info = store.page_info(&entry.title)?;
    let canonical = if info.is_redirect {
        match info
            .redirect_target
            .as_deref()
            .and_then(|target| Title::parse(target, NS_TEMPLATE).ok())
        {
            Some(target) => {
                entry.add_alias(&target);
                target
            }
            None => entry.title.clone(),
        }
    } else {
        entry.title.clone()
    };
    for redirect in store.redirects_to(&canonical)? {
        entry.add_alias(&redirect);
    }
    Ok(())
}
