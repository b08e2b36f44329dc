//! Prompt assembly.
//!
//! The prompt is a view: `[system(instructions)] + session log + transient
//! systems`. Transient messages live for one turn and never reach the log.

use colloquy_core::field::FieldSpec;
use colloquy_core::message::Message;

/// Build the message list sent to the ChatModel.
pub(crate) fn assemble(instructions: &str, history: Vec<Message>, transient: &[Message]) -> Vec<Message> {
    let mut prompt = Vec::with_capacity(history.len() + transient.len() + 1);
    if !instructions.trim().is_empty() {
        prompt.push(Message::system(instructions));
    }
    prompt.extend(history);
    prompt.extend(transient.iter().cloned());
    prompt
}

/// Instruction asking the LLM to gather `missing` fields, or `None` if
/// nothing is missing.
pub(crate) fn collect_instruction(missing: &[&FieldSpec]) -> Option<String> {
    if missing.is_empty() {
        return None;
    }
    let mut text = String::from(
        "Collect the following information from the user. \
         Ask only for what has not been provided yet:\n",
    );
    for field in missing {
        let marker = if field.required { "" } else { " (optional)" };
        text.push_str(&format!("- {}{}: {}\n", field.name, marker, field.prompt));
    }
    Some(text.trim_end().to_string())
}
