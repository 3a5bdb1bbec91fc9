// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Contract-fixed synthetic strings returned to the model at well-defined
//! points.  The engine recognizes these to suppress re-echoing them as
//! ordinary assistant-visible user input.

/// Appended to history when the user interrupts a streaming model response.
pub const INTERRUPT_MESSAGE: &str = "[Request interrupted by user]";

/// Appended to history when the user interrupts during tool execution.
pub const INTERRUPT_MESSAGE_FOR_TOOL_USE: &str = "[Request interrupted by user for tool use]";

/// Tool result for a call that never ran because an earlier call in the same
/// batch was refused.
pub const TOOL_CANCELLED_MESSAGE: &str = "This tool call was cancelled because an earlier \
     tool call in the same batch was rejected by the user. The operation was NOT performed. \
     Do not retry it without new instructions.";

/// Tool result for a call the user refused.
pub const TOOL_REFUSED_MESSAGE: &str = "The user declined permission for this tool call. \
     The requested operation was NOT performed. Stop the current approach and wait for the \
     user to tell you how to proceed.";

/// Returned when the model should not produce any reply.
pub const NO_RESPONSE_REQUESTED: &str = "No response requested.";

const FEEDBACK_PREFIX: &str = "The user did not allow this tool call and answered with \
     feedback instead:";

/// Tool result for a permission response that was neither a known selection
/// nor a refusal: the user's text is forwarded to the model as feedback.
pub fn feedback_message(feedback: &str) -> String {
    format!(
        "{FEEDBACK_PREFIX}\n<user-feedback>\n{feedback}\n</user-feedback>\nThe operation was \
         NOT performed. Take this feedback into account before continuing."
    )
}

/// Recognizer for the synthetic string set.
pub fn is_synthetic(text: &str) -> bool {
    text == INTERRUPT_MESSAGE
        || text == INTERRUPT_MESSAGE_FOR_TOOL_USE
        || text == TOOL_CANCELLED_MESSAGE
        || text == TOOL_REFUSED_MESSAGE
        || text == NO_RESPONSE_REQUESTED
        || text.starts_with(FEEDBACK_PREFIX)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_strings_are_recognized() {
        for s in [
            INTERRUPT_MESSAGE,
            INTERRUPT_MESSAGE_FOR_TOOL_USE,
            TOOL_CANCELLED_MESSAGE,
            TOOL_REFUSED_MESSAGE,
            NO_RESPONSE_REQUESTED,
        ] {
            assert!(is_synthetic(s), "not recognized: {s}");
        }
    }

    #[test]
    fn feedback_template_is_recognized() {
        assert!(is_synthetic(&feedback_message("use the staging db instead")));
    }

    #[test]
    fn ordinary_text_is_not_synthetic() {
        assert!(!is_synthetic("please run the tests"));
    }

    #[test]
    fn feedback_embeds_user_text() {
        let msg = feedback_message("try a dry run first");
        assert!(msg.contains("try a dry run first"));
    }
}
