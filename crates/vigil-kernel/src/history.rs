//! History view: which events a stuck check is allowed to inspect.
//!
//! User messages and null events are conversation scaffolding; they carry no
//! evidence of progress or repetition and must not take part in pattern
//! matching. In interactive mode a fresh user message is additionally an
//! explicit reset signal: only what the agent has done since the user last
//! spoke counts. Headless runs have no human in the loop, so injected user
//! messages cannot reset them.

use vigil_types::{Event, EventPayload, EventSource};

/// True for a `Message` sent by the user.
fn is_user_message(event: &Event) -> bool {
    event.source == EventSource::User
        && matches!(event.payload, EventPayload::Message { .. })
}

/// True for the null placeholder events.
fn is_null(event: &Event) -> bool {
    matches!(
        event.payload,
        EventPayload::NullAction | EventPayload::NullObservation
    )
}

/// Return the filtered tail of `history`, preserving relative order.
///
/// With `headless_mode` false the working window starts after the last user
/// `Message` (or spans the whole history when there is none); with it true
/// the window is always the whole history. User messages and null events are
/// removed from the window in both modes.
///
/// Positions in the returned slice are the positions recognizers report in
/// [`StuckAnalysis::loop_start_idx`][vigil_types::StuckAnalysis].
pub fn inspectable_tail(history: &[Event], headless_mode: bool) -> Vec<&Event> {
    let window = if headless_mode {
        history
    } else {
        match history.iter().rposition(is_user_message) {
            Some(last_user) => &history[last_user + 1..],
            None => history,
        }
    };

    window
        .iter()
        .filter(|event| !is_user_message(event) && !is_null(event))
        .collect()
}
