//! Minimal wikitext parse tree: a flat sequence of typed nodes that can be
//! queried, mutated, and serialized back to the exact source text.
//!
//! This is deliberately not a full grammar. Headings are recognized at line
//! starts, links and templates by their bracket pairs, and everything else
//! is kept as opaque text so that round-tripping never loses content.

use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static DISABLED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<!--.*?(?:-->|$)|<nowiki>.*?(?:</nowiki>|$)|<pre.*?(?:</pre>|$)|<math>.*?(?:</math>|$)|<source.*?(?:</source>|$)|<syntaxhighlight.*?(?:</syntaxhighlight>|$)",
    )
    .expect("disabled-region regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Comment(String),
    Link(Link),
    Template(Template),
    Heading(Heading),
}

/// `[[target]]` or `[[target|display]]`. Spacing inside both halves is
/// preserved so serialization round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub target: String,
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: usize,
    raw: String,
}

impl Template {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
        }
    }

    pub fn add(&mut self, name: &str, value: &str) {
        self.params.push(Param {
            name: Some(name.to_string()),
            value: value.to_string(),
        });
    }

    /// First positional parameter value, trimmed.
    pub fn first_positional(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|param| param.name.is_none())
            .map(|param| param.value.trim())
    }

    /// Named parameter value, trimmed; `None` when absent or empty.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|param| param.name.as_deref().map(str::trim) == Some(name))
            .map(|param| param.value.trim())
            .filter(|value| !value.is_empty())
    }
}

impl Heading {
    pub fn title(&self) -> &str {
        self.raw
            .trim()
            .trim_matches('=')
            .trim()
    }

    /// Whether the heading text is plain (no links, templates, or markup).
    pub fn is_plain_text(&self) -> bool {
        let title = self.title();
        !title.contains("[[") && !title.contains("{{") && !title.contains("<")
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(text) => f.write_str(text),
            Node::Comment(body) => write!(f, "<!--{body}-->"),
            Node::Link(link) => match &link.display {
                Some(display) => write!(f, "[[{}|{display}]]", link.target),
                None => write!(f, "[[{}]]", link.target),
            },
            Node::Template(tpl) => {
                write!(f, "{{{{{}", tpl.name)?;
                for param in &tpl.params {
                    match &param.name {
                        Some(name) => write!(f, "|{name}={}", param.value)?,
                        None => write!(f, "|{}", param.value)?,
                    }
                }
                write!(f, "}}}}")
            }
            Node::Heading(heading) => f.write_str(&heading.raw),
        }
    }
}

/// A parsed run of wikitext. Serializing with `to_string` reproduces the
/// input, modulo any mutations made through the node list.
#[derive(Debug, Clone, Default)]
pub struct Wikicode {
    nodes: Vec<Node>,
}

impl Wikicode {
    pub fn parse(text: &str) -> Self {
        Self {
            nodes: parse_nodes(text),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn insert_after(&mut self, index: usize, node: Node) {
        self.nodes.insert(index + 1, node);
    }

    pub fn retain<F: FnMut(&Node) -> bool>(&mut self, keep: F) {
        self.nodes.retain(keep);
    }

    pub fn prepend(&mut self, node: Node) {
        self.nodes.insert(0, node);
    }

    pub fn links(&self) -> impl Iterator<Item = (usize, &Link)> {
        self.nodes.iter().enumerate().filter_map(|(i, node)| {
            if let Node::Link(link) = node {
                Some((i, link))
            } else {
                None
            }
        })
    }

    pub fn templates(&self) -> impl Iterator<Item = (usize, &Template)> {
        self.nodes.iter().enumerate().filter_map(|(i, node)| {
            if let Node::Template(tpl) = node {
                Some((i, tpl))
            } else {
                None
            }
        })
    }

    /// Node-index ranges of heading-delimited sections at exactly `level`.
    /// Each range starts at its heading and runs until the next heading of
    /// the same or higher (numerically lower) level.
    pub fn sections(&self, level: usize) -> Vec<Range<usize>> {
        let mut out = Vec::new();
        let mut start: Option<usize> = None;
        for (index, node) in self.nodes.iter().enumerate() {
            if let Node::Heading(heading) = node {
                if let Some(begin) = start
                    && heading.level <= level
                {
                    out.push(begin..index);
                    start = None;
                }
                if heading.level == level && start.is_none() {
                    start = Some(index);
                }
            }
        }
        if let Some(begin) = start {
            out.push(begin..self.nodes.len());
        }
        out
    }

    /// Node-index ranges split at every heading, excluding the lead.
    pub fn sections_flat(&self) -> Vec<Range<usize>> {
        let mut out = Vec::new();
        let mut start: Option<usize> = None;
        for (index, node) in self.nodes.iter().enumerate() {
            if matches!(node, Node::Heading(_)) {
                if let Some(begin) = start {
                    out.push(begin..index);
                }
                start = Some(index);
            }
        }
        if let Some(begin) = start {
            out.push(begin..self.nodes.len());
        }
        out
    }

    pub fn section_heading(&self, range: &Range<usize>) -> Option<&Heading> {
        match self.nodes.get(range.start) {
            Some(Node::Heading(heading)) => Some(heading),
            _ => None,
        }
    }

    pub fn section_text(&self, range: &Range<usize>) -> String {
        self.nodes[range.clone()]
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl fmt::Display for Wikicode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            node.fmt(f)?;
        }
        Ok(())
    }
}

/// Strip comment/nowiki/pre/math/source regions before structural
/// parsing; content inside them is not live wikitext.
pub fn remove_disabled_parts(text: &str) -> String {
    DISABLED_RE.replace_all(text, "").into_owned()
}

/// Replace `pattern` matches with `replacement`, skipping any match that
/// overlaps a disabled (comment/nowiki/pre/math/source) region.
pub fn replace_except(text: &str, pattern: &Regex, replacement: &str) -> String {
    let disabled: Vec<Range<usize>> = DISABLED_RE
        .find_iter(text)
        .map(|found| found.range())
        .collect();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for found in pattern.find_iter(text) {
        let range = found.range();
        if range.start < cursor {
            continue;
        }
        let overlaps = disabled
            .iter()
            .any(|region| range.start < region.end && region.start < range.end);
        if overlaps {
            continue;
        }
        out.push_str(&text[cursor..range.start]);
        out.push_str(replacement);
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn parse_nodes(text: &str) -> Vec<Node> {
    let bytes = text.as_bytes();
    let mut nodes = Vec::new();
    let mut buffer = String::new();
    let mut index = 0usize;
    let mut at_line_start = true;

    while index < bytes.len() {
        let rest = &text[index..];
        if rest.starts_with("<!--") {
            if let Some(end) = rest.find("-->") {
                flush_text(&mut nodes, &mut buffer);
                nodes.push(Node::Comment(rest[4..end].to_string()));
                index += end + 3;
                at_line_start = false;
                continue;
            }
        }
        if at_line_start && rest.starts_with('=') {
            if let Some((heading, consumed)) = parse_heading(rest) {
                flush_text(&mut nodes, &mut buffer);
                nodes.push(Node::Heading(heading));
                index += consumed;
                at_line_start = false;
                continue;
            }
        }
        if rest.starts_with("[[") {
            if let Some((link, consumed)) = parse_link(rest) {
                flush_text(&mut nodes, &mut buffer);
                nodes.push(Node::Link(link));
                index += consumed;
                at_line_start = false;
                continue;
            }
        }
        if rest.starts_with("{{") {
            if let Some((template, consumed)) = parse_template(rest) {
                flush_text(&mut nodes, &mut buffer);
                nodes.push(Node::Template(template));
                index += consumed;
                at_line_start = false;
                continue;
            }
        }
        let ch = rest.chars().next().unwrap_or('\0');
        buffer.push(ch);
        at_line_start = ch == '\n';
        index += ch.len_utf8();
    }
    flush_text(&mut nodes, &mut buffer);
    nodes
}

fn flush_text(nodes: &mut Vec<Node>, buffer: &mut String) {
    if !buffer.is_empty() {
        nodes.push(Node::Text(std::mem::take(buffer)));
    }
}

fn parse_heading(rest: &str) -> Option<(Heading, usize)> {
    let line_end = rest.find('\n').unwrap_or(rest.len());
    let line = &rest[..line_end];
    let trimmed = line.trim_end();
    let opening = trimmed.chars().take_while(|ch| *ch == '=').count();
    let closing = trimmed.chars().rev().take_while(|ch| *ch == '=').count();
    if opening == 0 || closing == 0 || opening != closing || opening * 2 >= trimmed.len() {
        return None;
    }
    let title = trimmed[opening..trimmed.len() - closing].trim();
    if title.is_empty() {
        return None;
    }
    Some((
        Heading {
            level: opening,
            raw: line.to_string(),
        },
        line_end,
    ))
}

fn parse_link(rest: &str) -> Option<(Link, usize)> {
    let inner_start = 2;
    let end = rest.find("]]")?;
    if end < inner_start {
        return None;
    }
    let inner = &rest[inner_start..end];
    if inner.contains("[[") || inner.contains('\n') {
        return None;
    }
    let (target, display) = match inner.split_once('|') {
        Some((target, display)) => (target.to_string(), Some(display.to_string())),
        None => (inner.to_string(), None),
    };
    if target.trim().is_empty() {
        return None;
    }
    Some((Link { target, display }, end + 2))
}

fn parse_template(rest: &str) -> Option<(Template, usize)> {
    let mut depth = 0usize;
    let mut end = None;
    let bytes = rest.as_bytes();
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            depth += 1;
            i += 2;
            continue;
        }
        if bytes[i] == b'}' && bytes[i + 1] == b'}' {
            depth -= 1;
            if depth == 0 {
                end = Some(i);
                break;
            }
            i += 2;
            continue;
        }
        i += 1;
    }
    let end = end?;
    let inner = &rest[2..end];
    let mut pieces = split_top_level(inner);
    if pieces.is_empty() {
        return None;
    }
    let name = pieces.remove(0);
    if name.trim().is_empty() {
        return None;
    }
    let params = pieces
        .into_iter()
        .map(|piece| match split_param(&piece) {
            Some((name, value)) => Param {
                name: Some(name),
                value,
            },
            None => Param {
                name: None,
                value: piece,
            },
        })
        .collect();
    Some((Template { name, params }, end + 2))
}

/// Split on `|` outside nested `{{ }}` and `[[ ]]` pairs.
fn split_top_level(inner: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut brace_depth = 0usize;
    let mut bracket_depth = 0usize;
    let bytes = inner.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let rest = &inner[i..];
        if rest.starts_with("{{") {
            brace_depth += 1;
            current.push_str("{{");
            i += 2;
            continue;
        }
        if rest.starts_with("}}") && brace_depth > 0 {
            brace_depth -= 1;
            current.push_str("}}");
            i += 2;
            continue;
        }
        if rest.starts_with("[[") {
            bracket_depth += 1;
            current.push_str("[[");
            i += 2;
            continue;
        }
        if rest.starts_with("]]") && bracket_depth > 0 {
            bracket_depth -= 1;
            current.push_str("]]");
            i += 2;
            continue;
        }
        let ch = rest.chars().next().unwrap_or('\0');
        if ch == '|' && brace_depth == 0 && bracket_depth == 0 {
            out.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
        i += ch.len_utf8();
    }
    out.push(current);
    out
}

fn split_param(piece: &str) -> Option<(String, String)> {
    let index = piece.find('=')?;
    let (name, value) = piece.split_at(index);
    if name.contains("[[") || name.contains("{{") {
        return None;
    }
    Some((name.to_string(), value[1..].to_string()))
}
