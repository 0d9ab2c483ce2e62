//! Shaping of the conversation before it leaves the client.
//!
//! The full in-memory conversation is never modified here; both operations
//! produce a derived copy for the outbound request.

use crate::core::message::{Message, Role};

/// Index of the first message kept by [`truncate`].
///
/// The kept window is always a contiguous suffix of `history`: the backward
/// scan stops at the first message that would overflow the budget, and the
/// leading assistant turns of the window are then skipped. Returns
/// `history.len()` when nothing fits.
pub fn truncation_start(history: &[Message], max_chars: usize) -> usize {
    let mut total = 0usize;
    let mut start = history.len();

    for (index, message) in history.iter().enumerate().rev() {
        let len = message.char_len();
        if total + len > max_chars {
            break;
        }
        total += len;
        start = index;
    }

    history[start..]
        .iter()
        .position(Message::is_user)
        .map_or(history.len(), |offset| start + offset)
}

/// Keep the most recent messages whose combined length fits in `max_chars`.
///
/// The result is either empty or starts with a user turn.
pub fn truncate(history: &[Message], max_chars: usize) -> Vec<Message> {
    history[truncation_start(history, max_chars)..].to_vec()
}

/// Merge runs of same-role messages into single turns.
///
/// Each constituent of a merged run is trimmed and the pieces are joined with
/// a newline, so the output strictly alternates roles.
pub fn sanitize(history: &[Message]) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(history.len());
    let mut run: Vec<&str> = Vec::new();
    let mut run_role: Option<Role> = None;

    for message in history {
        if run_role != Some(message.role) {
            flush_run(&mut merged, run_role, &mut run);
            run_role = Some(message.role);
        }
        run.push(&message.content);
    }
    flush_run(&mut merged, run_role, &mut run);

    merged
}

fn flush_run(out: &mut Vec<Message>, role: Option<Role>, run: &mut Vec<&str>) {
    let Some(role) = role else {
        return;
    };
    let content = match run.as_slice() {
        [] => return,
        [single] => (*single).to_string(),
        parts => parts
            .iter()
            .map(|part| part.trim())
            .collect::<Vec<_>>()
            .join("\n"),
    };
    out.push(Message::new(role, content));
    run.clear();
}

/// Build the outbound message list: truncate to the budget, then merge.
pub fn prepare_outbound(history: &[Message], max_chars: usize) -> Vec<Message> {
    sanitize(&truncate(history, max_chars))
}
