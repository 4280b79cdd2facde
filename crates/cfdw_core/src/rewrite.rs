//! Per-page category substitution: retarget direct category links
//! (preserving sort keys), keep configured template parameters in sync,
//! and run a second pass over colon-prefixed text links in the namespaces
//! that use them.

use anyhow::Result;
use regex::Regex;
use tracing::debug;

use crate::registry::TemplateRegistry;
use crate::store::PageStore;
use crate::title::{
    Category, NS_CATEGORY, NS_MAIN, NS_TEMPLATE, TEXTLINK_NAMESPACES, Title,
};
use crate::wikicode::{Node, Wikicode, replace_except};

/// What happened to one fan-out page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteAction {
    Saved,
    /// Text unchanged; the page was queued for a link-table refresh.
    Purged,
}

/// One category substitution applied across pages.
#[derive(Debug)]
pub struct Substitution {
    old_cat: Category,
    /// Descending title order, so that inserting each after the old link
    /// leaves the replacements in ascending order.
    new_cats: Vec<Category>,
    summary: String,
}

impl Substitution {
    pub fn new(old_cat: Category, new_cats: &[Category], summary: &str) -> Self {
        let mut new_cats = new_cats.to_vec();
        new_cats.sort();
        new_cats.reverse();
        Self {
            old_cat,
            new_cats,
            summary: summary.to_string(),
        }
    }

    /// Apply the substitution to one page: read, rewrite, save when the
    /// text changed, purge when it did not.
    pub fn apply<S: PageStore>(
        &self,
        store: &mut S,
        registry: &TemplateRegistry,
        page: &Title,
    ) -> Result<RewriteAction> {
        let original = store.get_text(page)?;
        let mut code = Wikicode::parse(&original);
        if registry.has_update_templates() {
            self.update_templates(&mut code, registry);
        }
        let mut text = self.rewrite_links(code, page, false);
        if TEXTLINK_NAMESPACES.contains(&page.namespace()) {
            let code = Wikicode::parse(&text);
            text = self.rewrite_links(code, page, true);
        }
        if text == original {
            store.purge(page)?;
            Ok(RewriteAction::Purged)
        } else {
            store.save_text(page, &text, &self.summary, true, true)?;
            Ok(RewriteAction::Saved)
        }
    }

    /// Rewrite category-valued parameters of configured templates. Only
    /// applies for single-target substitutions.
    fn update_templates(&self, code: &mut Wikicode, registry: &TemplateRegistry) {
        if self.new_cats.len() != 1 {
            return;
        }
        let new_name = self.new_cats[0].name().to_string();
        for node in code.nodes_mut() {
            let Node::Template(template) = node else {
                continue;
            };
            let Ok(name) = Title::parse(&template.name, NS_TEMPLATE) else {
                continue;
            };
            let Some(entry) = registry.update_entry(&name) else {
                continue;
            };
            let mut positional = 0usize;
            for param in &mut template.params {
                let param_name = match &param.name {
                    Some(name) => name.clone(),
                    // Positional parameters count from one.
                    None => {
                        positional += 1;
                        positional.to_string()
                    }
                };
                if !entry.param_matches(&param_name) {
                    continue;
                }
                let Ok(value_cat) = Category::parse(param.value.trim()) else {
                    continue;
                };
                if value_cat == self.old_cat {
                    param.value = new_name.clone();
                }
            }
        }
    }

    /// One pass over the page's links. `textlinks` selects colon-prefixed
    /// references; a plain pass ignores them and vice versa.
    fn rewrite_links(&self, mut code: Wikicode, page: &Title, textlinks: bool) -> String {
        let mut cats: Vec<Category> = Vec::new();
        let mut old_link_index: Option<usize> = None;
        for (index, link) in code.links() {
            let target = link.target.trim();
            if target.starts_with(':') != textlinks {
                continue;
            }
            if target.contains("{{") && page.namespace() == NS_CATEGORY {
                // Server-side template expansion in link targets is not
                // resolved here.
                debug!(page = %page, target, "skipping embedded-template link");
                continue;
            }
            let Ok(title) = Title::parse(target, NS_MAIN) else {
                continue;
            };
            let Ok(category) = Category::new(title) else {
                continue;
            };
            cats.push(category.clone());
            if category == self.old_cat {
                old_link_index = Some(index);
            }
        }
        let Some(old_index) = old_link_index else {
            debug!(page = %page, old = %self.old_cat, "category not directly on page");
            return code.to_string();
        };
        if self.new_cats.len() == 1 && !cats.contains(&self.new_cats[0]) {
            // Retarget in place to keep the sort key.
            let prefix = if textlinks { ":" } else { "" };
            if let Node::Link(link) = &mut code.nodes_mut()[old_index] {
                link.target = format!("{prefix}{}", self.new_cats[0].full_name());
            }
            return code.to_string();
        }
        let old_link_text = code.nodes()[old_index].to_string();
        for cat in &self.new_cats {
            if !cats.contains(cat) {
                code.insert_after(old_index, Node::Text(format!("\n{}", cat.as_link(textlinks))));
            }
        }
        let pattern =
            Regex::new(&format!(r"\n?{}", regex::escape(&old_link_text))).expect("link pattern");
        replace_except(&code.to_string(), &pattern, "")
    }
}

#[cfg(test)]
mod tests {
    use super::{RewriteAction, Substitution};
    use crate::fixtures::MemoryStore;
    use crate::registry::{RegistryDoc, TemplateRegistry};
    use crate::title::{Category, NS_MAIN, Title};

    fn registry() -> TemplateRegistry {
        let doc: RegistryDoc = serde_json::from_str(
            r#"{"cfd": [], "update": [{"title": "Cat main", "params": "1|cat"}]}"#,
        )
        .expect("doc");
        TemplateRegistry::from_doc(&doc).expect("registry")
    }

    fn substitution(old: &str, new: &[&str]) -> Substitution {
        let new_cats: Vec<Category> = new
            .iter()
            .map(|name| Category::parse(name).expect("category"))
            .collect();
        Substitution::new(
            Category::parse(old).expect("category"),
            &new_cats,
            "test summary",
        )
    }

    fn title(name: &str) -> Title {
        Title::parse(name, NS_MAIN).expect("title")
    }

    #[test]
    fn single_target_keeps_sort_key() {
        let mut store = MemoryStore::default();
        store.put("Some page", "text\n[[Category:Old|sort]]\n");
        let action = substitution("Old", &["New"])
            .apply(&mut store, &registry(), &title("Some page"))
            .expect("apply");
        assert_eq!(action, RewriteAction::Saved);
        assert_eq!(
            store.text_of("Some page").expect("text"),
            "text\n[[Category:New|sort]]\n"
        );
        // Fan-out edits are minor and never create the page.
        assert!(store.saves[0].minor);
        assert!(store.saves[0].nocreate);
    }

    #[test]
    fn two_targets_insert_and_remove_old_line() {
        let mut store = MemoryStore::default();
        store.put("Some page", "text\n[[Category:Old]]\n[[Category:Other]]\n");
        substitution("Old", &["New2", "New1"])
            .apply(&mut store, &registry(), &title("Some page"))
            .expect("apply");
        assert_eq!(
            store.text_of("Some page").expect("text"),
            "text\n[[Category:New1]]\n[[Category:New2]]\n[[Category:Other]]\n"
        );
    }

    #[test]
    fn removal_with_no_targets() {
        let mut store = MemoryStore::default();
        store.put("Some page", "text\n[[Category:Old]]\n[[Category:Other]]\n");
        substitution("Old", &[])
            .apply(&mut store, &registry(), &title("Some page"))
            .expect("apply");
        assert_eq!(
            store.text_of("Some page").expect("text"),
            "text\n[[Category:Other]]\n"
        );
    }

    #[test]
    fn target_already_present_drops_old_link() {
        let mut store = MemoryStore::default();
        store.put("Some page", "text\n[[Category:Old]]\n[[Category:New]]\n");
        substitution("Old", &["New"])
            .apply(&mut store, &registry(), &title("Some page"))
            .expect("apply");
        assert_eq!(
            store.text_of("Some page").expect("text"),
            "text\n[[Category:New]]\n"
        );
    }

    #[test]
    fn unchanged_page_is_purged_not_saved() {
        let mut store = MemoryStore::default();
        store.put("Some page", "no categories here");
        let action = substitution("Old", &["New"])
            .apply(&mut store, &registry(), &title("Some page"))
            .expect("apply");
        assert_eq!(action, RewriteAction::Purged);
        assert!(store.saves.is_empty());
        assert_eq!(store.purged, vec!["Some page".to_string()]);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let mut store = MemoryStore::default();
        store.put("Some page", "text\n[[Category:Old|sort]]\n");
        let substitution = substitution("Old", &["New"]);
        substitution
            .apply(&mut store, &registry(), &title("Some page"))
            .expect("first apply");
        let first = store.text_of("Some page").expect("text").to_string();
        let action = substitution
            .apply(&mut store, &registry(), &title("Some page"))
            .expect("second apply");
        assert_eq!(action, RewriteAction::Purged);
        assert_eq!(store.text_of("Some page").expect("text"), first);
    }

    #[test]
    fn comment_guard_protects_disabled_regions() {
        let mut store = MemoryStore::default();
        store.put(
            "Some page",
            "[[Category:Old]]\n<!-- [[Category:Old]] -->\n[[Category:New]]\n",
        );
        substitution("Old", &["New"])
            .apply(&mut store, &registry(), &title("Some page"))
            .expect("apply");
        assert_eq!(
            store.text_of("Some page").expect("text"),
            "\n<!-- [[Category:Old]] -->\n[[Category:New]]\n"
        );
    }

    #[test]
    fn template_parameter_updated_for_single_target() {
        let mut store = MemoryStore::default();
        store.put(
            "Some page",
            "{{Cat main|cat=Old}}\nintro\n[[Category:Old]]\n",
        );
        substitution("Old", &["New"])
            .apply(&mut store, &registry(), &title("Some page"))
            .expect("apply");
        let text = store.text_of("Some page").expect("text");
        assert!(text.contains("{{Cat main|cat=New}}"));
        assert!(text.contains("[[Category:New]]"));
    }

    #[test]
    fn template_parameter_outside_pattern_untouched() {
        let mut store = MemoryStore::default();
        store.put(
            "Some page",
            "{{Cat main|other=Old}}\n[[Category:Old]]\n",
        );
        substitution("Old", &["New"])
            .apply(&mut store, &registry(), &title("Some page"))
            .expect("apply");
        let text = store.text_of("Some page").expect("text");
        assert!(text.contains("{{Cat main|other=Old}}"));
    }

    #[test]
    fn textlink_namespace_gets_colon_pass() {
        let mut store = MemoryStore::default();
        store.put("Draft:Some draft", "see [[:Category:Old]] for context\n");
        substitution("Old", &["New"])
            .apply(&mut store, &registry(), &title("Draft:Some draft"))
            .expect("apply");
        assert_eq!(
            store.text_of("Draft:Some draft").expect("text"),
            "see [[:Category:New]] for context\n"
        );
    }
}
