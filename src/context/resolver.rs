// src/context/resolver.rs
//! Reference resolution: free-text mention -> concrete task.
//!
//! One ordered rule list, first match wins, no backtracking. The two
//! historical pronoun tables are collapsed into a single canonical set
//! resolved through `active_task.primary`, falling back to `last_task`
//! only when no primary is set.
//!
//! Tie-break for partial id/title matches: `recent_tasks` is kept newest
//! first, so the most recently created candidate wins deterministically.

use serde::{Deserialize, Serialize};

use super::{ContextManager, Role};
use crate::store::Task;

/// Canonical pronoun vocabulary for the task in focus.
const PRONOUN_REFS: &[&str] = &[
    "that task",
    "this task",
    "that one",
    "this one",
    "the task",
    "that",
    "this",
    "it",
];

/// Ordinal phrases resolving to the head of the last result set.
const ORDINAL_REFS: &[&str] = &["first task", "the first task", "first one", "the first one"];

/// How many of the most recent bot messages are scanned for displayed tasks.
const RECENT_DISPLAY_WINDOW: usize = 3;

/// Minimum reference length for id-prefix matching.
const ID_PREFIX_MIN_LEN: usize = 8;

/// Which rule produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionRule {
    ByTaskIdMap,
    ByRecentDisplay,
    ByActiveContext,
    ByOrdinal,
    ByIdPrefix,
    ByTitleSubstring,
}

#[derive(Debug, Clone)]
pub struct ResolvedReference {
    pub task: Task,
    pub rule: ResolutionRule,
}

impl ContextManager {
    /// Resolve a free-text reference to the best-matching task, or None.
    pub fn resolve_task_reference(&self, reference: &str) -> Option<ResolvedReference> {
        let normalized = reference.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        // Rule 1: exact (normalized) title previously seen.
        if let Some(id) = self.entities.task_id_map.get(&normalized) {
            if let Some(task) = self.find_task_by_id(&id.clone()) {
                return Some(ResolvedReference {
                    task,
                    rule: ResolutionRule::ByTaskIdMap,
                });
            }
        }

        // Rule 2: tasks displayed in the last few bot messages.
        if let Some(task) = self.find_in_recent_display(&normalized) {
            return Some(ResolvedReference {
                task,
                rule: ResolutionRule::ByRecentDisplay,
            });
        }

        // Rule 3: pronouns against the task in focus.
        if PRONOUN_REFS.contains(&normalized.as_str()) {
            let focused = self
                .entities
                .active_task
                .primary
                .as_ref()
                .and_then(|id| self.find_task_by_id(&id.clone()))
                .or_else(|| self.entities.last_task.clone());
            if let Some(task) = focused {
                return Some(ResolvedReference {
                    task,
                    rule: ResolutionRule::ByActiveContext,
                });
            }
        }

        // Rule 4: ordinals against the last result set.
        if ORDINAL_REFS.contains(&normalized.as_str()) {
            if let Some(task) = self.entities.last_list.first() {
                return Some(ResolvedReference {
                    task: task.clone(),
                    rule: ResolutionRule::ByOrdinal,
                });
            }
        }

        // Rule 5: id prefix over recently seen tasks.
        if normalized.len() >= ID_PREFIX_MIN_LEN {
            if let Some(task) = self
                .entities
                .recent_tasks
                .iter()
                .find(|t| t.id.to_lowercase().starts_with(&normalized))
            {
                return Some(ResolvedReference {
                    task: task.clone(),
                    rule: ResolutionRule::ByIdPrefix,
                });
            }
        }

        // Rule 6: title substring over recently seen tasks.
        self.entities
            .recent_tasks
            .iter()
            .find(|t| t.title.to_lowercase().contains(&normalized))
            .map(|task| ResolvedReference {
                task: task.clone(),
                rule: ResolutionRule::ByTitleSubstring,
            })
    }

    fn find_in_recent_display(&self, normalized: &str) -> Option<Task> {
        self.history()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .filter(|m| m.role == Role::Bot)
            .take(RECENT_DISPLAY_WINDOW)
            .flat_map(|m| m.displayed_tasks.iter())
            .find(|t| t.title.to_lowercase().contains(normalized))
            .cloned()
    }

    /// Structural id lookup across the context's collections:
    /// last_task, then recent_tasks, last_list, active last_displayed.
    pub fn find_task_by_id(&self, id: &str) -> Option<Task> {
        if let Some(task) = self.entities.last_task.as_ref().filter(|t| t.id == id) {
            return Some(task.clone());
        }
        self.entities
            .recent_tasks
            .iter()
            .chain(self.entities.last_list.iter())
            .chain(self.entities.active_task.last_displayed.iter())
            .find(|t| t.id == id)
            .cloned()
    }
}
