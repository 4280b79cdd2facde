//! Single-line parser for working pages: one left-to-right scan over the
//! line's flat node sequence.

use anyhow::Result;

use crate::discussion::DiscussionPage;
use crate::extract::category_from_node;
use crate::registry::TemplateRegistry;
use crate::title::Category;
use crate::wikicode::{Node, Wikicode};

/// Transient per-line record. `old_cat` is the first category-like
/// reference, `new_cats` the rest; `discussion` is the first plain link
/// that is not a category.
#[derive(Debug, Clone, Default)]
pub struct ParsedLine {
    pub prefix: String,
    pub suffix: String,
    pub old_cat: Option<Category>,
    pub new_cats: Vec<Category>,
    pub discussion: Option<DiscussionPage>,
}

/// Parse one working-page line. A non-category link that is not a valid
/// discussion-page reference is an error; callers treat it as a malformed
/// section and skip it.
pub fn parse_line(line: &str, registry: &TemplateRegistry) -> Result<ParsedLine> {
    let mut results = ParsedLine::default();
    let mut link_found = false;
    let code = Wikicode::parse(line);
    let nodes = code.nodes();
    for (index, node) in nodes.iter().enumerate() {
        match node {
            Node::Text(text) => {
                if !link_found {
                    if !results.prefix.is_empty() {
                        results.prefix.push(' ');
                    }
                    results.prefix.push_str(text.trim());
                } else if index + 1 == nodes.len() {
                    results.suffix = text.trim().to_string();
                }
            }
            Node::Template(_) | Node::Link(_) => {
                if let Some(category) = category_from_node(node, registry) {
                    link_found = true;
                    if results.old_cat.is_none() {
                        results.old_cat = Some(category);
                    } else {
                        results.new_cats.push(category);
                    }
                } else if let Node::Link(link) = node {
                    link_found = true;
                    if results.discussion.is_none() {
                        results.discussion = Some(DiscussionPage::from_link_target(&link.target)?);
                    }
                }
            }
            Node::Comment(_) | Node::Heading(_) => {}
        }
    }
    Ok(results)
}
