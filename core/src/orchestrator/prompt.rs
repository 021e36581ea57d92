//! Builds the system prompt handed to the model on every turn: persona,
//! tool catalogue, runtime context, tone fragment, and (if an adventure is
//! underway) the bible's spoiler-filtered DM view.

use super::NarrativeContext;
use crate::bible::{dm_view, AdventureBible};
use crate::character::Character;
use crate::config::ToneModule;
use crate::tools::ToolRegistry;

const PERSONA: &str = "You are the dungeon master for a solo 5th-edition adventure. \
You narrate, you never play the hero's actions for them, and every mechanical \
outcome you describe must come from a tool result, not from your own invention. \
Reply with a single JSON object: {\"tool\": string|null, \"parameters\": object, \
\"narrative\": string, \"mode_change\": \"exploration\"|\"social\"|\"combat\"|null, \
\"memory\": object}. Omit markdown fences if you can; if you must use them, use ```json.";

pub fn build(character: &mut Character, registry: &ToolRegistry, context: &NarrativeContext, tone: &ToneModule, bible: Option<&AdventureBible>) -> String {
    let mut sections = vec![PERSONA.to_string()];

    sections.push(format!(
        "## Tone module: {}\nTone: {}. Lethality: {}. Morality: {}. Failure resolution: {}.{}",
        tone.name,
        tone.narrative_tone,
        tone.lethality,
        tone.morality,
        tone.failure_resolution,
        if tone.prompt_extra.is_empty() { String::new() } else { format!(" {}", tone.prompt_extra) }
    ));

    sections.push(format!("## Available tools\n{}", registry.describe_for_model()));

    sections.push(character_fragment(character));

    sections.push(runtime_fragment(context));

    if let Some(bible) = bible {
        sections.push(bible_fragment(bible));
    }

    sections.join("\n\n")
}

fn character_fragment(character: &mut Character) -> String {
    let derived = character.derived();
    format!(
        "## Acting character\n{} the {} {} (level {}), HP {}/{}, AC {}.",
        character.info_basica.name,
        character.info_basica.race,
        character.info_basica.class,
        character.info_basica.level,
        derived.hp_current,
        derived.hp_max,
        derived.armor_class,
    )
}

fn runtime_fragment(context: &NarrativeContext) -> String {
    let mut out = format!("## Scene\nLocation: {}\nMode: {:?}\nCast present: {}\n", context.location, context.mode, if context.npc_cast.is_empty() { "none".to_string() } else { context.npc_cast.join(", ") });

    if !context.history.is_empty() {
        out.push_str("Recent history:\n");
        for line in &context.history {
            out.push_str(&format!("- {line}\n"));
        }
    }

    if !context.narrative_memory.is_empty() {
        out.push_str(&format!("Remembered facts: {}\n", serde_json::to_string(&context.narrative_memory).unwrap_or_default()));
    }

    out
}

fn bible_fragment(bible: &AdventureBible) -> String {
    let view = dm_view(bible);
    let mut out = format!("## Adventure bible\nLogline: {}\nMain quest: {} ({:?})\nAntagonist presents as: {}\n", view.logline, view.main_quest.objective, view.main_quest.state, view.antagonist.facade);

    if !view.antagonist.foreshadowing_clues.is_empty() {
        out.push_str(&format!("Foreshadowing clues in play: {}\n", view.antagonist.foreshadowing_clues.join("; ")));
    }

    if let Some(identity) = &view.antagonist.true_identity {
        out.push_str(&format!("You may now reveal: the antagonist is {identity}"));
        if let Some(motivation) = &view.antagonist.motivation {
            out.push_str(&format!(", driven by {motivation}"));
        }
        if let Some(weakness) = &view.antagonist.weakness {
            out.push_str(&format!(", vulnerable through {weakness}"));
        }
        out.push_str(".\n");
    }

    if let Some(act) = view.acts.iter().find(|a| matches!(a.state, crate::bible::ActState::Active)) {
        out.push_str(&format!("Current act: {} — {}\n", act.name, act.objective));
    }

    if !view.visible_revelation_clues.is_empty() {
        out.push_str("Clues discoverable now:\n");
        for (id, clues) in &view.visible_revelation_clues {
            out.push_str(&format!("- {id}: {}\n", clues.join("; ")));
        }
    }

    if !view.clocks.is_empty() {
        out.push_str("Clocks:\n");
        for clock in &view.clocks {
            out.push_str(&format!("- {} ({}/{}, {:?}): {}\n", clock.description, clock.segments, clock.total, clock.urgency, clock.trigger_summary));
        }
    }

    if !view.npcs.is_empty() {
        out.push_str("NPCs:\n");
        for npc in &view.npcs {
            out.push_str(&format!("- {} ({}), attitude: {}, status: {:?}\n", npc.name, npc.role, npc.current_attitude, npc.status));
        }
    }

    out
}
