//! Conflict and validation checking for a batch of instructions.
//!
//! Two passes: a collection pass that drops duplicates and marks
//! categories named as `old_cat` more than once as contested, then a
//! per-instruction decision pass run just before execution. Rejections
//! skip the one instruction; the batch always continues.

use std::collections::HashSet;

use anyhow::Result;

use crate::instruction::{Instruction, Mode};
use crate::store::PageStore;
use crate::title::Category;

/// Drop exact duplicates and collect the contested-category set.
pub fn collect(instructions: Vec<Instruction>) -> (Vec<Instruction>, HashSet<Category>) {
    let mut unique: Vec<Instruction> = Vec::new();
    let mut seen: HashSet<Category> = HashSet::new();
    let mut contested: HashSet<Category> = HashSet::new();
    for instruction in instructions {
        if unique.contains(&instruction) {
            continue;
        }
        if !seen.insert(instruction.old_cat.clone()) {
            contested.insert(instruction.old_cat.clone());
        }
        for new_cat in &instruction.new_cats {
            seen.insert(new_cat.clone());
        }
        unique.push(instruction);
    }
    (unique, contested)
}

/// Decide whether one instruction may execute. `Ok(Some(reason))` means
/// skip; store queries are made live so earlier instructions' effects are
/// visible.
pub fn skip_reason<S: PageStore>(
    store: &mut S,
    instruction: &Instruction,
    contested: &HashSet<Category>,
) -> Result<Option<String>> {
    let old_cat = &instruction.old_cat;
    let mut cats: Vec<&Category> = vec![old_cat];
    cats.extend(&instruction.new_cats);
    if cats.iter().any(|cat| contested.contains(cat)) {
        return Ok(Some(format!(
            "{old_cat} is involved in multiple instructions"
        )));
    }
    for cat in &cats {
        if store.page_info(cat.title())?.is_disambiguation {
            return Ok(Some(format!("{cat} is a disambiguation page")));
        }
    }
    if instruction.new_cats.contains(old_cat) {
        return Ok(Some(format!(
            "{old_cat} is also a {} target",
            instruction.mode
        )));
    }
    mode_rules(store, instruction)
}

fn mode_rules<S: PageStore>(
    store: &mut S,
    instruction: &Instruction,
) -> Result<Option<String>> {
    let old_cat = &instruction.old_cat;
    let new_cats = &instruction.new_cats;
    let reason = match instruction.mode {
        Mode::Empty => {
            if new_cats.is_empty() {
                None
            } else {
                Some(format!("empty mode has new categories for {old_cat}"))
            }
        }
        Mode::Merge => {
            if new_cats.is_empty() {
                Some(format!("merge mode has no new categories for {old_cat}"))
            } else if instruction.action.is_empty() || instruction.result.is_empty() {
                Some(format!("missing action or result for {old_cat}"))
            } else {
                let mut reason = None;
                for new_cat in new_cats {
                    let info = store.page_info(new_cat.title())?;
                    if !info.exists {
                        reason = Some(format!("{new_cat} does not exist"));
                        break;
                    }
                    if info.is_redirect || store.is_category_redirect(new_cat.title())? {
                        reason = Some(format!("{new_cat} is a redirect"));
                        break;
                    }
                }
                reason
            }
        }
        Mode::Move => {
            if new_cats.len() != 1 {
                Some(format!(
                    "move mode has {} new categories for {old_cat}",
                    new_cats.len()
                ))
            } else {
                let new_cat = &new_cats[0];
                let new_info = store.page_info(new_cat.title())?;
                let old_info = store.page_info(old_cat.title())?;
                let old_soft_redirect = store.is_category_redirect(old_cat.title())?;
                if new_info.exists && old_info.exists && !old_soft_redirect {
                    Some(format!("{new_cat} already exists"))
                } else if (old_soft_redirect || old_info.is_redirect) && !new_info.exists {
                    Some(format!("no target for move to {new_cat}"))
                } else if new_info.is_redirect || store.is_category_redirect(new_cat.title())? {
                    Some(format!("{new_cat} is a redirect"))
                } else {
                    None
                }
            }
        }
        Mode::Retain => {
            if !store.exists(old_cat.title())? {
                Some(format!("{old_cat} does not exist"))
            } else if !new_cats.is_empty() {
                Some(format!("retain mode has new categories for {old_cat}"))
            } else if instruction.action.is_empty() || instruction.result.is_empty() {
                Some(format!("missing action or result for {old_cat}"))
            } else {
                None
            }
        }
    };
    Ok(reason)
}
