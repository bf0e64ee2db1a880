//! Assistant tool-call / tool-result pairing.

use std::collections::HashMap;

use parley_core::{ContextMessage, Role};

/// Message indices grouped into atomic tool-call units.
///
/// A unit is an assistant message that requested tools plus every tool
/// result answering one of its calls. Tool results without a matching
/// earlier request are orphans.
pub(crate) struct ToolUnits {
    pub(crate) units: Vec<Vec<usize>>,
    pub(crate) unit_of: Vec<Option<usize>>,
    pub(crate) orphans: Vec<usize>,
}

impl ToolUnits {
    pub(crate) fn build(messages: &[ContextMessage]) -> Self {
        let mut units: Vec<Vec<usize>> = Vec::new();
        let mut unit_of = vec![None; messages.len()];
        let mut orphans = Vec::new();
        let mut owner: HashMap<&str, usize> = HashMap::new();

        for (idx, message) in messages.iter().enumerate() {
            if message.requests_tools() {
                let unit = units.len();
                units.push(vec![idx]);
                unit_of[idx] = Some(unit);
                for id in message.tool_call_ids() {
                    owner.insert(id, unit);
                }
            } else if message.role == Role::ToolResult {
                match message
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| owner.get(id))
                {
                    Some(&unit) => {
                        units[unit].push(idx);
                        unit_of[idx] = Some(unit);
                    }
                    None => orphans.push(idx),
                }
            }
        }

        Self {
            units,
            unit_of,
            orphans,
        }
    }

    pub(crate) fn is_orphan(&self, idx: usize) -> bool {
        self.orphans.contains(&idx)
    }
}

/// Check that every tool result answers exactly one earlier tool call.
pub fn validate_tool_pairs(messages: &[ContextMessage]) -> Result<(), String> {
    let mut requested: HashMap<&str, usize> = HashMap::new();
    for (idx, message) in messages.iter().enumerate() {
        if message.role == Role::Assistant {
            for id in message.tool_call_ids() {
                *requested.entry(id).or_default() += 1;
            }
        } else if message.role == Role::ToolResult {
            let Some(id) = message.tool_call_id.as_deref() else {
                return Err(format!("tool result at {idx} has no tool_call_id"));
            };
            match requested.get(id) {
                Some(1) => {}
                Some(n) => return Err(format!("tool_call_id {id} requested {n} times")),
                None => return Err(format!("orphaned tool_call_id {id} at {idx}")),
            }
        }
    }
    Ok(())
}

/// Drop tool results whose originating request is not in `messages`.
#[must_use]
pub fn drop_orphan_results(messages: Vec<ContextMessage>) -> Vec<ContextMessage> {
    let units = ToolUnits::build(&messages);
    if units.orphans.is_empty() {
        return messages;
    }
    messages
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !units.is_orphan(*idx))
        .map(|(_, message)| message)
        .collect()
}
