use std::fmt;

use anyhow::{Result, bail};

pub const NS_MAIN: i32 = 0;
pub const NS_TALK: i32 = 1;
pub const NS_USER: i32 = 2;
pub const NS_USER_TALK: i32 = 3;
pub const NS_PROJECT: i32 = 4;
pub const NS_PROJECT_TALK: i32 = 5;
pub const NS_FILE: i32 = 6;
pub const NS_TEMPLATE: i32 = 10;
pub const NS_TEMPLATE_TALK: i32 = 11;
pub const NS_CATEGORY: i32 = 14;
pub const NS_CATEGORY_TALK: i32 = 15;
pub const NS_PORTAL: i32 = 100;
pub const NS_DRAFT: i32 = 118;
pub const NS_MODULE: i32 = 828;

/// Namespaces whose pages reference categories through plain-text colon
/// links rather than true membership.
pub const TEXTLINK_NAMESPACES: &[i32] = &[NS_DRAFT];

const NAMESPACE_NAMES: &[(&str, i32)] = &[
    ("talk", NS_TALK),
    ("user", NS_USER),
    ("user talk", NS_USER_TALK),
    ("wikipedia", NS_PROJECT),
    ("project", NS_PROJECT),
    ("wikipedia talk", NS_PROJECT_TALK),
    ("project talk", NS_PROJECT_TALK),
    ("file", NS_FILE),
    ("image", NS_FILE),
    ("template", NS_TEMPLATE),
    ("template talk", NS_TEMPLATE_TALK),
    ("category", NS_CATEGORY),
    ("category talk", NS_CATEGORY_TALK),
    ("portal", NS_PORTAL),
    ("draft", NS_DRAFT),
    ("module", NS_MODULE),
];

pub fn namespace_name(namespace: i32) -> &'static str {
    match namespace {
        NS_MAIN => "",
        NS_TALK => "Talk",
        NS_USER => "User",
        NS_USER_TALK => "User talk",
        NS_PROJECT => "Wikipedia",
        NS_PROJECT_TALK => "Wikipedia talk",
        NS_FILE => "File",
        NS_TEMPLATE => "Template",
        NS_TEMPLATE_TALK => "Template talk",
        NS_CATEGORY => "Category",
        NS_CATEGORY_TALK => "Category talk",
        NS_PORTAL => "Portal",
        NS_DRAFT => "Draft",
        NS_MODULE => "Module",
        _ => "?",
    }
}

/// Whether a namespace supports subpages (and therefore `/doc` pages).
pub fn namespace_has_subpages(namespace: i32) -> bool {
    !matches!(namespace, NS_MAIN | NS_FILE)
}

/// A canonical wiki page title: namespace id, page name without the
/// namespace prefix, and an optional section fragment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Title {
    namespace: i32,
    name: String,
    section: Option<String>,
}

impl Title {
    pub fn new(namespace: i32, name: &str) -> Result<Self> {
        let name = canonicalize_name(name)?;
        Ok(Self {
            namespace,
            name,
            section: None,
        })
    }

    /// Parse a wikilink-style target. A leading colon is stripped, a known
    /// namespace prefix overrides `default_namespace`, and anything after
    /// `#` becomes the section fragment.
    pub fn parse(raw: &str, default_namespace: i32) -> Result<Self> {
        let mut text = raw.trim();
        if text.contains("{{") {
            bail!("title embeds a template invocation: {raw:?}");
        }
        text = text.strip_prefix(':').unwrap_or(text).trim();

        let (text, section) = match text.split_once('#') {
            Some((before, after)) => {
                let fragment = after.trim();
                (
                    before.trim(),
                    if fragment.is_empty() {
                        None
                    } else {
                        Some(fragment.to_string())
                    },
                )
            }
            None => (text, None),
        };

        let (namespace, name) = match text.split_once(':') {
            Some((prefix, rest)) => {
                let key = prefix.trim().replace('_', " ").to_lowercase();
                match NAMESPACE_NAMES
                    .iter()
                    .find(|(candidate, _)| *candidate == key)
                {
                    Some((_, id)) => (*id, rest),
                    None => (default_namespace, text),
                }
            }
            None => (default_namespace, text),
        };

        let name = canonicalize_name(name)?;
        Ok(Self {
            namespace,
            name,
            section,
        })
    }

    pub fn namespace(&self) -> i32 {
        self.namespace
    }

    /// Page name without the namespace prefix or section fragment.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    pub fn with_section(&self, section: &str) -> Self {
        Self {
            namespace: self.namespace,
            name: self.name.clone(),
            section: Some(section.trim().to_string()),
        }
    }

    pub fn without_section(&self) -> Self {
        Self {
            namespace: self.namespace,
            name: self.name.clone(),
            section: None,
        }
    }

    /// Full canonical title including the namespace prefix, without section.
    pub fn full_name(&self) -> String {
        let prefix = namespace_name(self.namespace);
        if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{prefix}:{}", self.name)
        }
    }

    /// Full title including the section fragment when present.
    pub fn full_name_with_section(&self) -> String {
        match &self.section {
            Some(section) => format!("{}#{section}", self.full_name()),
            None => self.full_name(),
        }
    }

    /// Render as a wikilink. `textlink` forces the leading colon so that
    /// category and file titles link instead of categorizing.
    pub fn as_link(&self, textlink: bool) -> String {
        let colon = if textlink && matches!(self.namespace, NS_CATEGORY | NS_FILE) {
            ":"
        } else {
            ""
        };
        format!("[[{colon}{}]]", self.full_name_with_section())
    }

    /// The matching talk (or subject) page title.
    pub fn toggle_talk(&self) -> Self {
        let namespace = if self.namespace % 2 == 0 {
            self.namespace + 1
        } else {
            self.namespace - 1
        };
        Self {
            namespace,
            name: self.name.clone(),
            section: None,
        }
    }

    /// Compare identity ignoring any section fragment.
    pub fn same_page(&self, other: &Title) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name_with_section())
    }
}

fn canonicalize_name(raw: &str) -> Result<String> {
    let cleaned = raw.replace('_', " ");
    let mut out = String::with_capacity(cleaned.len());
    let mut previous_space = true;
    for ch in cleaned.chars() {
        if matches!(ch, '<' | '>' | '[' | ']' | '{' | '}' | '|' | '\n') {
            bail!("invalid character {ch:?} in title {raw:?}");
        }
        if ch.is_whitespace() {
            if !previous_space {
                out.push(' ');
            }
            previous_space = true;
        } else {
            out.push(ch);
            previous_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    if out.is_empty() {
        bail!("empty title");
    }
    // MediaWiki titles are case-insensitive in their first letter.
    let mut chars = out.chars();
    let first = chars.next().map(|ch| ch.to_uppercase().collect::<String>());
    Ok(match first {
        Some(first) => format!("{first}{}", chars.as_str()),
        None => out,
    })
}

/// A category page identity. Construction guarantees the category
/// namespace; any section fragment is dropped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Category(Title);

impl Category {
    pub fn new(title: Title) -> Result<Self> {
        if title.namespace() != NS_CATEGORY {
            bail!("{title} is not a category title");
        }
        Ok(Self(title.without_section()))
    }

    /// Parse from link-target text, defaulting to the category namespace.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::new(Title::parse(raw, NS_CATEGORY)?)
    }

    pub fn title(&self) -> &Title {
        &self.0
    }

    /// Category name without the `Category:` prefix.
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Full `Category:Name` form.
    pub fn full_name(&self) -> String {
        self.0.full_name()
    }

    pub fn as_link(&self, textlink: bool) -> String {
        self.0.as_link(textlink)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, NS_CATEGORY, NS_MAIN, NS_PROJECT, NS_TEMPLATE, Title};

    #[test]
    fn parse_canonicalizes_underscores_and_case() {
        let title = Title::parse("category:foo_bar  baz", NS_MAIN).expect("parse");
        assert_eq!(title.namespace(), NS_CATEGORY);
        assert_eq!(title.name(), "Foo bar baz");
        assert_eq!(title.full_name(), "Category:Foo bar baz");
    }

    #[test]
    fn parse_strips_leading_colon_and_section() {
        let title = Title::parse(":Category:Foo#History", NS_MAIN).expect("parse");
        assert_eq!(title.namespace(), NS_CATEGORY);
        assert_eq!(title.section(), Some("History"));
        assert_eq!(title.full_name(), "Category:Foo");
        assert_eq!(title.full_name_with_section(), "Category:Foo#History");
    }

    #[test]
    fn parse_uses_default_namespace_for_unknown_prefix() {
        let title = Title::parse("Foo: the beginning", NS_MAIN).expect("parse");
        assert_eq!(title.namespace(), NS_MAIN);
        assert_eq!(title.name(), "Foo: the beginning");
    }

    #[test]
    fn parse_rejects_embedded_template() {
        assert!(Title::parse("Category:{{PAGENAME}} stubs", NS_MAIN).is_err());
        assert!(Title::parse("Category:Bad [link]", NS_MAIN).is_err());
        assert!(Title::parse("   ", NS_MAIN).is_err());
    }

    #[test]
    fn category_link_forms() {
        let cat = Category::parse("Foo").expect("category");
        assert_eq!(cat.as_link(false), "[[Category:Foo]]");
        assert_eq!(cat.as_link(true), "[[:Category:Foo]]");
        assert_eq!(cat.name(), "Foo");
    }

    #[test]
    fn category_rejects_other_namespaces() {
        let title = Title::parse("Template:Cfd full", NS_MAIN).expect("parse");
        assert_eq!(title.namespace(), NS_TEMPLATE);
        assert!(Category::new(title).is_err());
    }

    #[test]
    fn talk_page_toggle() {
        let cat = Title::parse("Category:Foo", NS_MAIN).expect("parse");
        let talk = cat.toggle_talk();
        assert_eq!(talk.full_name(), "Category talk:Foo");
        assert_eq!(talk.toggle_talk().full_name(), "Category:Foo");
    }

    #[test]
    fn project_namespace_aliases() {
        let a = Title::parse("Wikipedia:Categories for discussion/Log/2026 May 1", NS_MAIN)
            .expect("parse");
        let b = Title::parse("Project:Categories for discussion/Log/2026 May 1", NS_MAIN)
            .expect("parse");
        assert_eq!(a.namespace(), NS_PROJECT);
        assert!(a.same_page(&b));
    }
}
