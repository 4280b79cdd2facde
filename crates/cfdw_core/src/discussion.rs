//! Discussion pages and the resolver that matches a category back to the
//! specific subsection where its disposition was decided.

use std::fmt;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;
use tracing::debug;

use crate::extract::category_from_node;
use crate::registry::TemplateRegistry;
use crate::store::PageStore;
use crate::title::{Category, NS_PROJECT, Title};
use crate::wikicode::{Wikicode, remove_disabled_parts};

/// Title prefix (within the project namespace) all discussion pages share.
pub const DISCUSSION_PREFIX: &str = "Categories for discussion/";

static RESULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"''The result of the discussion was:''\s+'''(.+?)'''").expect("result regex")
});
static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'''Propose (.+?)'''").expect("action regex"));

/// A page (optionally narrowed to a section) under the discussion prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscussionPage {
    title: Title,
}

impl DiscussionPage {
    pub fn new(title: Title) -> Result<Self> {
        if title.namespace() != NS_PROJECT || !title.name().starts_with(DISCUSSION_PREFIX) {
            bail!("{title} is not a category-discussion page");
        }
        Ok(Self { title })
    }

    /// Parse a wikilink target into a discussion page reference.
    pub fn from_link_target(raw: &str) -> Result<Self> {
        Self::new(Title::parse(raw, NS_PROJECT)?)
    }

    pub fn title(&self) -> &Title {
        &self.title
    }

    pub fn section(&self) -> Option<&str> {
        self.title.section()
    }

    pub fn as_link(&self) -> String {
        self.title.as_link(false)
    }

    /// The log date, taken from the final slash segment of the page name.
    pub fn date(&self) -> &str {
        self.title
            .name()
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    fn with_section(&self, section: &str) -> Self {
        Self {
            title: self.title.with_section(section),
        }
    }

    /// Narrow this reference to the level-4 section that discussed
    /// `category`. A reference that already names a section is used as-is;
    /// an unresolvable reference falls back to the whole page.
    pub fn find_discussion<S: PageStore>(
        &self,
        store: &mut S,
        registry: &TemplateRegistry,
        category: &Category,
    ) -> Result<Self> {
        if self.section().is_some() {
            return Ok(self.clone());
        }
        let text = remove_disabled_parts(&store.get_text(&self.title)?);
        let code = Wikicode::parse(&text);
        for range in code.sections(4) {
            let Some(heading) = code.section_heading(&range) else {
                continue;
            };
            // Headings with markup cannot become section fragments.
            let discussion = if heading.is_plain_text() {
                let heading_title = heading.title();
                if category.full_name() == heading_title {
                    return Ok(self.with_section(heading_title));
                }
                self.with_section(heading_title)
            } else {
                self.clone()
            };
            // Split approximately into close, nomination, and follow-up.
            let section_text = code.section_text(&range);
            let parts: Vec<&str> = section_text.split("(UTC)").collect();
            if parts.len() < 3 {
                continue;
            }
            let nomination = Wikicode::parse(parts[1]);
            for node in nomination.nodes() {
                if category_from_node(node, registry).as_ref() == Some(category) {
                    return Ok(discussion);
                }
            }
        }
        debug!(category = %category, page = %self.title, "no discussion section matched");
        Ok(self.clone())
    }

    /// The recorded closure result and proposed action for `category` in
    /// this reference's section. Either defaults to empty when absent.
    pub fn result_action<S: PageStore>(
        &self,
        store: &mut S,
        registry: &TemplateRegistry,
        category: &Category,
    ) -> Result<(String, String)> {
        let mut result = String::new();
        let mut action = String::new();
        let Some(section_name) = self.section() else {
            return Ok((result, action));
        };
        let text = remove_disabled_parts(&store.get_text(&self.title.without_section())?);
        let code = Wikicode::parse(&text);
        let Some(range) = code.sections(4).into_iter().find(|range| {
            code.section_heading(range)
                .is_some_and(|heading| heading.title() == section_name)
        }) else {
            return Ok((result, action));
        };
        for line in code.section_text(&range).lines() {
            if let Some(captures) = RESULT_RE.captures(line) {
                result = captures[1].to_string();
            }
            let line_code = Wikicode::parse(line);
            for node in line_code.nodes() {
                if category_from_node(node, registry).as_ref() == Some(category) {
                    if let Some(captures) = ACTION_RE.captures(line) {
                        action = captures[1].to_string();
                    }
                    break;
                }
            }
        }
        Ok((result, action))
    }
}

impl fmt::Display for DiscussionPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.title.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::DiscussionPage;
    use crate::fixtures::MemoryStore;
    use crate::registry::{RegistryDoc, TemplateRegistry};
    use crate::title::{Category, NS_PROJECT, Title};

    const LOG_PAGE: &str = "Wikipedia:Categories for discussion/Log/2026 August 12";

    fn registry() -> TemplateRegistry {
        TemplateRegistry::from_doc(&RegistryDoc::default()).expect("registry")
    }

    fn discussion() -> DiscussionPage {
        DiscussionPage::from_link_target(LOG_PAGE).expect("discussion page")
    }

    fn log_text() -> String {
        [
            "== August 12 ==",
            "==== Category:Foo ====",
            "''The result of the discussion was:'' '''merge''' to bar. 10:00, 12 August 2026 (UTC)",
            ":'''Propose merging''' [[:Category:Foo]] to [[:Category:Bar]]. 09:00, 12 August 2026 (UTC)",
            ":Support. 09:30, 12 August 2026 (UTC)",
            "==== Renames ====",
            "''The result of the discussion was:'' '''rename''' 11:00, 12 August 2026 (UTC)",
            ":'''Propose renaming''' [[:Category:Baz]] to [[:Category:Qux]]. 08:00, 12 August 2026 (UTC)",
            ":Oppose. 08:30, 12 August 2026 (UTC)",
        ]
        .join("\n")
    }

    #[test]
    fn constructor_rejects_non_discussion_titles() {
        assert!(DiscussionPage::from_link_target("Wikipedia:Village pump").is_err());
        let title = Title::parse("Categories for discussion/Log/2026 August 12", 0)
            .expect("title");
        assert_ne!(title.namespace(), NS_PROJECT);
        assert!(DiscussionPage::new(title).is_err());
    }

    #[test]
    fn date_is_the_last_slash_segment() {
        assert_eq!(discussion().date(), "2026 August 12");
    }

    #[test]
    fn find_discussion_matches_plain_heading() {
        let mut store = MemoryStore::default();
        store.put(LOG_PAGE, &log_text());
        let category = Category::parse("Foo").expect("category");
        let found = discussion()
            .find_discussion(&mut store, &registry(), &category)
            .expect("find");
        assert_eq!(found.section(), Some("Category:Foo"));
    }

    #[test]
    fn find_discussion_scans_nomination_for_category_links() {
        let mut store = MemoryStore::default();
        store.put(LOG_PAGE, &log_text());
        let category = Category::parse("Baz").expect("category");
        let found = discussion()
            .find_discussion(&mut store, &registry(), &category)
            .expect("find");
        assert_eq!(found.section(), Some("Renames"));
    }

    #[test]
    fn find_discussion_falls_back_to_whole_page() {
        let mut store = MemoryStore::default();
        store.put(LOG_PAGE, &log_text());
        let category = Category::parse("Unrelated").expect("category");
        let found = discussion()
            .find_discussion(&mut store, &registry(), &category)
            .expect("find");
        assert_eq!(found.section(), None);
        assert_eq!(found.title().full_name(), LOG_PAGE);
    }

    #[test]
    fn sectioned_reference_is_used_as_is() {
        let mut store = MemoryStore::default();
        let narrowed =
            DiscussionPage::from_link_target(&format!("{LOG_PAGE}#Renames")).expect("page");
        let category = Category::parse("Anything").expect("category");
        let found = narrowed
            .find_discussion(&mut store, &registry(), &category)
            .expect("find");
        assert_eq!(found, narrowed);
    }

    #[test]
    fn result_action_extracts_bold_markers() {
        let mut store = MemoryStore::default();
        store.put(LOG_PAGE, &log_text());
        let category = Category::parse("Foo").expect("category");
        let narrowed = DiscussionPage::from_link_target(&format!("{LOG_PAGE}#Category:Foo"))
            .expect("page");
        let (result, action) = narrowed
            .result_action(&mut store, &registry(), &category)
            .expect("result/action");
        assert_eq!(result, "merge");
        assert_eq!(action, "merging");
    }

    #[test]
    fn result_action_empty_without_section() {
        let mut store = MemoryStore::default();
        store.put(LOG_PAGE, &log_text());
        let category = Category::parse("Foo").expect("category");
        let (result, action) = discussion()
            .result_action(&mut store, &registry(), &category)
            .expect("result/action");
        assert!(result.is_empty());
        assert!(action.is_empty());
    }
}
