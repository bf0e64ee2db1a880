//! Context reduction strategies.
//!
//! A reducer selects the part of a conversation history that is submitted
//! to the completion backend.

use parley_core::ContextMessage;
use serde::{Deserialize, Serialize};

use crate::pairs::ToolUnits;

/// Pluggable reduction strategy.
pub trait ContextReducer: Send + Sync {
    fn reduce(&self, messages: &[ContextMessage]) -> Vec<ContextMessage>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextStrategy {
    /// Submit everything.
    Unbounded,
    /// Keep the last `max_messages` messages.
    FixedWindow { max_messages: usize },
    /// Keep the opening messages plus the most recent ones, treating each
    /// tool request with its results as one unit.
    AdaptiveWindow {
        max_messages: usize,
        preserve_initial: usize,
        prioritize_tool_pairs: bool,
    },
}

impl Default for ContextStrategy {
    fn default() -> Self {
        Self::AdaptiveWindow {
            max_messages: 20,
            preserve_initial: 2,
            prioritize_tool_pairs: true,
        }
    }
}

impl ContextReducer for ContextStrategy {
    fn reduce(&self, messages: &[ContextMessage]) -> Vec<ContextMessage> {
        match *self {
            Self::Unbounded => messages.to_vec(),
            Self::FixedWindow { max_messages } => fixed_window(messages, max_messages),
            Self::AdaptiveWindow {
                max_messages,
                preserve_initial,
                prioritize_tool_pairs,
            } => adaptive_window(
                messages,
                max_messages,
                preserve_initial,
                prioritize_tool_pairs,
            ),
        }
    }
}

#[must_use]
pub fn fixed_window(messages: &[ContextMessage], max_messages: usize) -> Vec<ContextMessage> {
    let start = messages.len().saturating_sub(max_messages);
    messages[start..].to_vec()
}

/// Adaptive selection.
///
/// The first `preserve_initial` messages are kept, then (optionally) the most
/// recent tool units that fit, then the most recent remaining messages. Once
/// tool units are prioritized the fill pass takes plain messages only;
/// otherwise a unit is taken during the fill only if all of it fits. A unit
/// cut by the preserved prefix is dropped entirely.
/// The result keeps chronological order.
#[must_use]
pub fn adaptive_window(
    messages: &[ContextMessage],
    max_messages: usize,
    preserve_initial: usize,
    prioritize_tool_pairs: bool,
) -> Vec<ContextMessage> {
    let total = messages.len();
    if total <= max_messages {
        return messages.to_vec();
    }

    let groups = ToolUnits::build(messages);
    let mut selected = vec![false; total];

    let prefix = preserve_initial.min(total);
    selected[..prefix].fill(true);
    let mut budget = max_messages.saturating_sub(prefix);

    if prioritize_tool_pairs {
        for unit in groups.units.iter().rev() {
            if budget == 0 {
                break;
            }
            let missing = unit.iter().filter(|&&idx| !selected[idx]).count();
            if missing == 0 || missing > budget {
                continue;
            }
            for &idx in unit {
                selected[idx] = true;
            }
            budget -= missing;
        }
    }

    for idx in (prefix..total).rev() {
        if budget == 0 {
            break;
        }
        if selected[idx] || groups.is_orphan(idx) {
            continue;
        }
        match groups.unit_of[idx] {
            None => {
                selected[idx] = true;
                budget -= 1;
            }
            Some(_) if prioritize_tool_pairs => {}
            Some(unit) => {
                let unit = &groups.units[unit];
                let missing = unit.iter().filter(|&&i| !selected[i]).count();
                if missing <= budget {
                    for &i in unit {
                        selected[i] = true;
                    }
                    budget -= missing;
                }
            }
        }
    }

    for unit in &groups.units {
        let kept = unit.iter().filter(|&&idx| selected[idx]).count();
        if kept != 0 && kept != unit.len() {
            for &idx in unit {
                selected[idx] = false;
            }
        }
    }
    for &idx in &groups.orphans {
        selected[idx] = false;
    }

    messages
        .iter()
        .zip(selected)
        .filter(|(_, keep)| *keep)
        .map(|(message, _)| message.clone())
        .collect()
}
