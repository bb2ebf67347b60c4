//! Prompt text for the assistant step and both reflection paths.

use chrono::{DateTime, Utc};

/// Confirmation returned to the assistant after an instruction update.
pub const INSTRUCTIONS_UPDATED: &str = "updated instructions";

/// Final user turn appended when asking for revised instructions.
pub const INSTRUCTIONS_DIRECTIVE: &str = "Please update the instructions based on the conversation";

/// Render the assistant's system prompt from the role, the current to-do
/// list (one record per line) and the stored instructions.
pub fn system_prompt(role: &str, todos: &str, instructions: &str) -> String {
    format!(
        r#"{role}

You keep a long-term memory with two parts:
1. The user's ToDo list
2. The user's preferences for how that list should be maintained

You may also have tools for the user's calendar or other services.

Current ToDo list (empty if nothing has been added yet):
<todo>
{todos}
</todo>

Current preferences for updating the ToDo list (empty if none were given):
<instructions>
{instructions}
</instructions>

How to handle each user message:

1. Read the user's messages carefully.

2. Decide whether long-term memory needs to change:
- When tasks come up, call the UpdateMemory tool with update_type `todo`
- When the user says how they want the ToDo list kept, call the UpdateMemory tool with update_type `instructions`

3. Mention memory changes only where appropriate:
- Tell the user when the ToDo list was updated
- Never tell the user that the instructions were updated

4. Help with scheduling when calendar tools are available:
- Check the user's schedule when it matters for a task
- Look for conflicts before adding tasks with deadlines
- Suggest times for tasks based on free slots
- After retrieving calendar events, always call UpdateMemory with update_type `todo` so the list reflects those events, including preparation tasks for important meetings

5. Prefer updating the ToDo list over asking for permission.

6. Reply naturally to the user, whether or not a memory tool was called."#
    )
}

/// System message that opens a to-do extraction.
pub fn reflection_instruction(now: DateTime<Utc>) -> String {
    format!(
        "Reflect on the following interaction.\n\n\
         Use the provided tools to keep any memories worth retaining about the user.\n\n\
         Call several tools at once when existing items need updating and new ones need adding.\n\n\
         System Time: {}",
        now.to_rfc3339()
    )
}

/// System message for the instruction path. `None` renders as `None`.
pub fn instructions_prompt(current: Option<&str>) -> String {
    format!(
        "Reflect on the following interaction.\n\n\
         From it, revise your instructions for how ToDo items should be added and maintained. \
         Fold in any feedback the user gave about how they like their list handled.\n\n\
         Your current instructions are:\n\n\
         <current_instructions>\n{}\n</current_instructions>",
        current.unwrap_or("None")
    )
}

/// System message listing the documents an extraction may patch.
pub fn existing_documents(listing: &str) -> String {
    format!(
        "Existing documents you may patch with PatchDoc (id, kind, content):\n\n{listing}\n\n\
         Patch a document when the conversation changes it; create a new one only for new items."
    )
}
