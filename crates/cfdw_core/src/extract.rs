//! Decide whether a single parse-tree node names a category, either
//! through a category-discussion template or a direct category link.

use crate::registry::TemplateRegistry;
use crate::title::{Category, NS_MAIN, NS_TEMPLATE, Title};
use crate::wikicode::Node;

/// Returns the category a node denotes, if any. Title-resolution failures
/// are recoverable parse ambiguity, never errors.
pub fn category_from_node(node: &Node, registry: &TemplateRegistry) -> Option<Category> {
    match node {
        Node::Template(template) => {
            let name = Title::parse(&template.name, NS_TEMPLATE).ok()?;
            if !registry.is_cfd_template(&name) {
                return None;
            }
            let target = template.first_positional()?;
            Category::parse(target).ok()
        }
        Node::Link(link) => {
            let target = link.target.split('#').next().unwrap_or("");
            let title = Title::parse(target, NS_MAIN).ok()?;
            Category::new(title).ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::category_from_node;
    use crate::registry::{RegistryDoc, TemplateRegistry};
    use crate::wikicode::Wikicode;

    fn registry() -> TemplateRegistry {
        let doc: RegistryDoc =
            serde_json::from_str(r#"{"cfd": [{"title": "Cfd full"}], "update": []}"#)
                .expect("doc");
        TemplateRegistry::from_doc(&doc).expect("registry")
    }

    fn first_node_category(text: &str) -> Option<String> {
        let code = Wikicode::parse(text);
        code.nodes()
            .iter()
            .find_map(|node| category_from_node(node, &registry()))
            .map(|cat| cat.full_name())
    }

    #[test]
    fn cfd_template_first_positional_is_the_category() {
        assert_eq!(
            first_node_category("{{Cfd full|Old name}}"),
            Some("Category:Old name".to_string())
        );
        assert_eq!(first_node_category("{{Cfd full}}"), None);
        assert_eq!(first_node_category("{{Some other|Old name}}"), None);
    }

    #[test]
    fn category_links_match_with_or_without_colon() {
        assert_eq!(
            first_node_category("[[Category:Foo]]"),
            Some("Category:Foo".to_string())
        );
        assert_eq!(
            first_node_category("[[:Category:Foo|display]]"),
            Some("Category:Foo".to_string())
        );
        assert_eq!(first_node_category("[[Foo]]"), None);
    }

    #[test]
    fn section_fragment_is_stripped_before_resolution() {
        assert_eq!(
            first_node_category("[[:Category:Foo#History]]"),
            Some("Category:Foo".to_string())
        );
    }

    #[test]
    fn malformed_targets_yield_no_match() {
        assert_eq!(first_node_category("[[Category:{{PAGENAME}} stubs]]"), None);
        assert_eq!(first_node_category("plain text"), None);
    }
}
