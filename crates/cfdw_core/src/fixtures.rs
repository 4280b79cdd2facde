//! In-memory `PageStore` used by unit tests. Category membership and
//! backlinks are derived from the stored page texts so that rewrites are
//! observable the same way they would be through the live index.

use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::store::{PageInfo, PageStore};
use crate::title::{Category, NS_CATEGORY, NS_MAIN, Title};
use crate::wikicode::Wikicode;

#[derive(Debug, Clone, Default)]
pub(crate) struct MemPage {
    pub text: String,
    pub namespace: i32,
    pub is_disambiguation: bool,
    pub edit_protection: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct SaveRecord {
    pub title: String,
    pub summary: String,
    pub minor: bool,
    pub nocreate: bool,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    pages: BTreeMap<String, MemPage>,
    pub saves: Vec<SaveRecord>,
    pub deletes: Vec<(String, String)>,
    pub moves: Vec<(String, String)>,
    pub purged: Vec<String>,
    pub fail_saves_for: Vec<String>,
}

impl MemoryStore {
    pub fn put(&mut self, title: &str, text: &str) {
        let parsed = Title::parse(title, NS_MAIN).expect("fixture title");
        self.pages.insert(
            parsed.full_name(),
            MemPage {
                text: text.to_string(),
                namespace: parsed.namespace(),
                ..MemPage::default()
            },
        );
    }

    pub fn set_disambiguation(&mut self, title: &str) {
        let key = Title::parse(title, NS_MAIN).expect("fixture title").full_name();
        self.pages.entry(key).or_default().is_disambiguation = true;
    }

    pub fn set_protection(&mut self, title: &str, level: &str) {
        let key = Title::parse(title, NS_MAIN).expect("fixture title").full_name();
        if let Some(page) = self.pages.get_mut(&key) {
            page.edit_protection = Some(level.to_string());
        }
    }

    pub fn text_of(&self, title: &str) -> Option<&str> {
        let key = Title::parse(title, NS_MAIN).expect("fixture title").full_name();
        self.pages.get(&key).map(|page| page.text.as_str())
    }

    pub fn contains(&self, title: &str) -> bool {
        self.text_of(title).is_some()
    }

    fn page(&self, title: &Title) -> Option<&MemPage> {
        self.pages.get(&title.full_name())
    }

    fn redirect_target_of(page: &MemPage) -> Option<String> {
        let trimmed = page.text.trim_start();
        let lowered = trimmed.to_lowercase();
        if !lowered.starts_with("#redirect") {
            return None;
        }
        let code = Wikicode::parse(trimmed);
        code.links()
            .next()
            .and_then(|(_, link)| Title::parse(&link.target, NS_MAIN).ok())
            .map(|title| title.full_name())
    }

    fn links_in(text: &str) -> Vec<(bool, Title)> {
        let mut out = Vec::new();
        let code = Wikicode::parse(text);
        for (_, link) in code.links() {
            let raw = link.target.trim();
            let textlink = raw.starts_with(':');
            if let Ok(title) = Title::parse(raw, NS_MAIN) {
                out.push((textlink, title));
            }
        }
        out
    }
}

impl PageStore for MemoryStore {
    fn page_info(&mut self, title: &Title) -> Result<PageInfo> {
        match self.page(title) {
            Some(page) => Ok(PageInfo {
                exists: true,
                namespace: page.namespace,
                is_redirect: Self::redirect_target_of(page).is_some(),
                redirect_target: Self::redirect_target_of(page),
                is_disambiguation: page.is_disambiguation,
                edit_protection: page.edit_protection.clone(),
            }),
            None => Ok(PageInfo {
                exists: false,
                namespace: title.namespace(),
                ..PageInfo::default()
            }),
        }
    }

    fn get_text(&mut self, title: &Title) -> Result<String> {
        Ok(self
            .page(title)
            .map(|page| page.text.clone())
            .unwrap_or_default())
    }

    fn save_text(
        &mut self,
        title: &Title,
        text: &str,
        summary: &str,
        minor: bool,
        nocreate: bool,
    ) -> Result<()> {
        let key = title.full_name();
        if self.fail_saves_for.contains(&key) {
            bail!("edit conflict on {key}");
        }
        if nocreate && !self.pages.contains_key(&key) {
            bail!("nocreate: {key} does not exist");
        }
        let namespace = title.namespace();
        let page = self.pages.entry(key.clone()).or_default();
        page.text = text.to_string();
        page.namespace = namespace;
        self.saves.push(SaveRecord {
            title: key,
            summary: summary.to_string(),
            minor,
            nocreate,
        });
        Ok(())
    }

    fn delete_page(&mut self, title: &Title, reason: &str, _delete_talk: bool) -> Result<()> {
        let key = title.full_name();
        self.pages.remove(&key);
        self.deletes.push((key, reason.to_string()));
        Ok(())
    }

    fn move_page(
        &mut self,
        from: &Title,
        to: &Title,
        _reason: &str,
        noredirect: bool,
    ) -> Result<()> {
        let from_key = from.full_name();
        let to_key = to.full_name();
        let Some(page) = self.pages.remove(&from_key) else {
            bail!("cannot move missing page {from_key}");
        };
        if self.pages.contains_key(&to_key) {
            self.pages.insert(from_key.clone(), page);
            bail!("move target {to_key} already exists");
        }
        let mut moved = page;
        moved.namespace = to.namespace();
        self.pages.insert(to_key.clone(), moved);
        if !noredirect {
            self.pages.insert(
                from_key.clone(),
                MemPage {
                    text: format!("#REDIRECT [[{to_key}]]"),
                    namespace: from.namespace(),
                    ..MemPage::default()
                },
            );
        }
        self.moves.push((from_key, to_key));
        Ok(())
    }

    fn purge(&mut self, title: &Title) -> Result<()> {
        self.purged.push(title.full_name());
        Ok(())
    }

    fn category_members(&mut self, category: &Category) -> Result<Vec<Title>> {
        let mut out = Vec::new();
        for (key, page) in &self.pages {
            let member = Self::links_in(&page.text).into_iter().any(|(textlink, title)| {
                !textlink
                    && title.namespace() == NS_CATEGORY
                    && title.same_page(category.title())
            });
            if member && let Ok(title) = Title::parse(key, NS_MAIN) {
                out.push(title);
            }
        }
        Ok(out)
    }

    fn backlinks(&mut self, title: &Title, namespaces: &[i32]) -> Result<Vec<Title>> {
        let mut out = Vec::new();
        for (key, page) in &self.pages {
            if !namespaces.contains(&page.namespace) {
                continue;
            }
            let linked = Self::links_in(&page.text)
                .into_iter()
                .any(|(_, linked)| linked.same_page(title));
            if linked && let Ok(parsed) = Title::parse(key, NS_MAIN) {
                out.push(parsed);
            }
        }
        Ok(out)
    }

    fn redirects_to(&mut self, title: &Title) -> Result<Vec<Title>> {
        let target = title.full_name();
        let mut out = Vec::new();
        for (key, page) in &self.pages {
            if Self::redirect_target_of(page).as_deref() == Some(target.as_str())
                && let Ok(parsed) = Title::parse(key, NS_MAIN)
            {
                out.push(parsed);
            }
        }
        Ok(out)
    }

    fn is_empty_category(&mut self, category: &Category) -> Result<bool> {
        Ok(self.category_members(category)?.is_empty())
    }

    fn list_prefix(&mut self, namespace: i32, prefix: &str) -> Result<Vec<Title>> {
        let mut out = Vec::new();
        for (key, page) in &self.pages {
            if page.namespace != namespace {
                continue;
            }
            if let Ok(parsed) = Title::parse(key, NS_MAIN)
                && parsed.name().starts_with(prefix)
            {
                out.push(parsed);
            }
        }
        Ok(out)
    }
}
