use tracing::debug;

use crate::model::ToolCallState;

/// Tracks the single in-flight tool invocation of a session.
///
/// `none -> started -> none`. Only one call is modeled live at a time, so a
/// new `tool_started` simply replaces the previous slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCallTracker {
    current: Option<ToolCallState>,
}

impl ToolCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a `tool_started` event.
    pub fn start(&mut self, state: ToolCallState) {
        if let Some(previous) = &self.current {
            debug!(
                previous_index = ?previous.tool_index,
                next_index = ?state.tool_index,
                "tool call replaced before completion"
            );
        }
        self.current = Some(state);
    }

    /// Handles `tool_completed`, `tool_failed` or `tool_error` for `tool_index`.
    ///
    /// Clears the slot only when the index matches the tracked call. Returns
    /// true when it cleared.
    pub fn finish(&mut self, tool_index: Option<i64>) -> bool {
        match &self.current {
            Some(current) if current.tool_index == tool_index => {
                self.current = None;
                true
            }
            Some(current) => {
                debug!(
                    tracked_index = ?current.tool_index,
                    event_index = ?tool_index,
                    "ignoring tool lifecycle event for a different tool index"
                );
                false
            }
            None => false,
        }
    }

    /// A tool result message ends the call regardless of status ordering.
    pub fn on_tool_result(&mut self) {
        self.current = None;
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<&ToolCallState> {
        self.current.as_ref()
    }
}
