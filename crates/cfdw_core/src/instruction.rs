use std::fmt;

use crate::discussion::DiscussionPage;
use crate::title::Category;

/// Editorial modes a working-page section can be labeled with.
///
/// Heading detection is an ordered case-insensitive substring match, so
/// the variant order here is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Move,
    Merge,
    Empty,
    Retain,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Move, Mode::Merge, Mode::Empty, Mode::Retain];

    pub fn keyword(self) -> &'static str {
        match self {
            Mode::Move => "move",
            Mode::Merge => "merge",
            Mode::Empty => "empty",
            Mode::Retain => "retain",
        }
    }

    /// Match a section heading to a mode; first keyword found wins.
    pub fn from_heading(heading: &str) -> Option<Mode> {
        let lowered = heading.to_lowercase();
        Mode::ALL
            .into_iter()
            .find(|mode| lowered.contains(mode.keyword()))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One unit of work distilled from a working-page line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub mode: Mode,
    pub old_cat: Category,
    /// Ordered; the first element is the primary target.
    pub new_cats: Vec<Category>,
    /// The discussion section that resolved this line.
    pub discussion: DiscussionPage,
    pub result: String,
    pub action: String,
    /// merge: convert the emptied category to a soft redirect.
    pub redirect: bool,
    /// move: suppress the redirect normally left behind by the rename.
    pub noredirect: bool,
}

impl Instruction {
    pub fn new(mode: Mode, old_cat: Category, discussion: DiscussionPage) -> Self {
        Self {
            mode,
            old_cat,
            new_cats: Vec::new(),
            discussion,
            result: String::new(),
            action: String::new(),
            redirect: false,
            noredirect: false,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.mode, self.old_cat.full_name())?;
        if !self.new_cats.is_empty() {
            let targets: Vec<String> = self
                .new_cats
                .iter()
                .map(Category::full_name)
                .collect();
            write!(f, " -> {}", targets.join(", "))?;
        }
        write!(f, " per {}", self.discussion.title())
    }
}
