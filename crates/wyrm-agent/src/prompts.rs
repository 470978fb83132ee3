//! Narrator system prompt assembly
//!
//! The base prompt is always present. Three optional sections are appended
//! only when the current game context contains their trigger markers, so
//! the model is not paying attention (or tokens) to rules that cannot
//! apply to the scene.

const BASE_NARRATOR_PROMPT: &str = "\
You are the game master for a tabletop fantasy campaign. Narrate scenes in \
second person, stay in voice, and keep descriptions to a few sentences \
unless the players linger. Answer rules questions plainly and briefly, then \
return to the fiction.

Write prose only: no markdown headers, no bold, no bullet lists, no \
\"Label:\" style section headers.

You may request outside information mid-response using exactly these forms:
[FILE_READ]{\"path\": \"<path>\"}[/FILE_READ] to read a local campaign file, or
[WEB_SEARCH]{\"query\": \"<query>\"}[/WEB_SEARCH] to search the web (the table \
must approve a search before it runs). Emit the tag alone and stop; the \
result will be supplied and you will be asked to continue.

When the fiction changes character state, append a \
[STAT_CHANGES]...[/STAT_CHANGES] block, and when you take game actions on \
the players' behalf, append a [DM_ACTIONS]...[/DM_ACTIONS] block. Both \
blocks are machine-read and must contain only their structured content.";

const COMBAT_TACTICS_SECTION: &str = "\
Combat is underway. Track the initiative order you were given, describe \
each foe's action cinematically but resolve it by the rules, and remind a \
player of their options only if they ask. Keep rounds moving.";

const PLANAR_RULES_SECTION: &str = "\
The scene is on another plane of existence. Apply that plane's traits to \
travel, rest, and magic, and let the environment color every description. \
Mundane logic does not apply unless the plane says it does.";

const EFFECTS_TOOLBOX_SECTION: &str = "\
Active effects are in play. Before narrating an outcome, check the listed \
effects for anything that would alter it, mention the effect by name when \
it changes a result, and note when a duration lapses.";

/// Trigger for the combat tactics section
const COMBAT_MARKER: &str = "Initiative";

/// Trigger for the effects toolbox section
const EFFECTS_MARKER: &str = "Active Effects";

/// Plane-of-existence keywords that pull in the planar rules section
const PLANE_KEYWORDS: &[&str] = &[
    "Astral Plane",
    "Ethereal Plane",
    "Feywild",
    "Shadowfell",
    "Elemental Plane",
    "Nine Hells",
    "the Abyss",
    "plane of existence",
];

/// Build the narrator system prompt for the current game context.
/// Sections are independent and appended in a stable order.
pub fn build_system_prompt(context: &str) -> String {
    let mut prompt = String::from(BASE_NARRATOR_PROMPT);

    if wants_combat_section(context) {
        prompt.push_str("\n\n");
        prompt.push_str(COMBAT_TACTICS_SECTION);
    }
    if wants_planar_section(context) {
        prompt.push_str("\n\n");
        prompt.push_str(PLANAR_RULES_SECTION);
    }
    if wants_effects_section(context) {
        prompt.push_str("\n\n");
        prompt.push_str(EFFECTS_TOOLBOX_SECTION);
    }

    prompt
}

fn wants_combat_section(context: &str) -> bool {
    context.contains(COMBAT_MARKER)
}

fn wants_planar_section(context: &str) -> bool {
    PLANE_KEYWORDS.iter().any(|kw| context.contains(kw))
}

fn wants_effects_section(context: &str) -> bool {
    context.contains(EFFECTS_MARKER)
}
