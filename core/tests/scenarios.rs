//! Cross-component scenario tests: a player action travels through the
//! normaliser/validator/pipeline, the combat engine, and the orchestrator's
//! turn loop the way a real session would exercise them, rather than each
//! module in isolation.

use keeper_core::character::{AbilityScores, BasicInfo, Character};
use keeper_core::combat::{Combatant, EncounterState, EncounterStatus, TurnFlags};
use keeper_core::compendium::{ActionKind, Compendium, MonsterAction};
use keeper_core::config::{LlmProfiles, ToneModule};
use keeper_core::orchestrator::{DungeonMasterOrchestrator, NarrativeContext, NarrativeMode};
use keeper_core::testing::{fixture_compendium, MockLlm};
use keeper_core::tools::builtin_registry;
use std::collections::HashSet;
use uuid::Uuid;

fn fighter(id: Uuid) -> Character {
    let info = BasicInfo {
        name: "Thorin".to_string(),
        race: "dwarf".to_string(),
        class: "fighter".to_string(),
        level: 1,
        background: "soldier".to_string(),
        alignment: "lawful_good".to_string(),
        experience: 0,
    };
    let scores = AbilityScores { strength: 16, dexterity: 14, constitution: 14, intelligence: 10, wisdom: 10, charisma: 8 };
    Character::new(id, info, scores, 10, 30)
}

fn goblin_combatant(id: Uuid, initiative: i32) -> Combatant {
    Combatant {
        id,
        name: "Goblin".to_string(),
        is_player: false,
        is_ally: false,
        initiative,
        dexterity_modifier: 2,
        hp_current: 7,
        hp_max: 7,
        temp_hp: 0,
        armor_class: 15,
        speed: 30,
        attack_bonus: 4,
        damage_bonus: 2,
        conditions: HashSet::new(),
        concentration_target: None,
        monster_actions: vec![MonsterAction { name: "Scimitar".to_string(), kind: ActionKind::Melee, attack_bonus: 4, damage_expression: "1d6+2".to_string(), damage_type: "slashing".to_string() }],
        spell_slots: None,
        flags: TurnFlags::default(),
        inconsciente: false,
        muerto: false,
    }
}

fn pc_combatant(id: Uuid, initiative: i32) -> Combatant {
    Combatant {
        id,
        name: "Thorin".to_string(),
        is_player: true,
        is_ally: false,
        initiative,
        dexterity_modifier: 2,
        hp_current: 12,
        hp_max: 12,
        temp_hp: 0,
        armor_class: 16,
        speed: 30,
        attack_bonus: 5,
        damage_bonus: 3,
        conditions: HashSet::new(),
        concentration_target: None,
        monster_actions: Vec::new(),
        spell_slots: None,
        flags: TurnFlags::default(),
        inconsciente: false,
        muerto: false,
    }
}

/// Solo PC fighter vs. a single goblin: with initiative already resolved
/// (PC 21, goblin 9) the PC acts first and round 1 starts `in_progress`.
#[test]
fn solo_pc_vs_single_goblin_pc_acts_first() {
    let pc_id = Uuid::new_v4();
    let goblin_id = Uuid::new_v4();

    let mut encounter = EncounterState::new();
    encounter.add_combatant(pc_combatant(pc_id, 21)).unwrap();
    encounter.add_combatant(goblin_combatant(goblin_id, 9)).unwrap();
    encounter.start(false).unwrap();

    assert_eq!(encounter.status, EncounterStatus::InProgress);
    assert_eq!(encounter.round, 1);
    assert_eq!(encounter.current_combatant_id(), Some(pc_id));
}

/// A tie in initiative breaks on dexterity modifier, highest first.
#[test]
fn tied_initiative_breaks_on_dexterity() {
    let high_dex_id = Uuid::new_v4();
    let low_dex_id = Uuid::new_v4();

    let mut encounter = EncounterState::new();
    let mut low_dex = goblin_combatant(low_dex_id, 15);
    low_dex.dexterity_modifier = 0;
    encounter.add_combatant(low_dex).unwrap();

    let mut high_dex = goblin_combatant(high_dex_id, 15);
    high_dex.dexterity_modifier = 3;
    encounter.add_combatant(high_dex).unwrap();

    encounter.start(false).unwrap();
    assert_eq!(encounter.current_combatant_id(), Some(high_dex_id));
}

/// The orchestrator refuses a combat-only tool call when no encounter is
/// active, instead of letting the registry execute it and fail loudly.
#[tokio::test]
async fn combat_only_tool_refused_outside_combat() {
    let pc_id = Uuid::new_v4();
    let character = fighter(pc_id);
    let registry = builtin_registry();
    let compendium = fixture_compendium();

    let turn_reply = serde_json::json!({
        "tool": "damage_enemy",
        "parameters": { "target_id": Uuid::new_v4().to_string(), "amount": 5 },
        "narrative": "You lash out at nothing in particular.",
        "mode_change": null,
        "memory": {}
    })
    .to_string();
    let llm = MockLlm::new([turn_reply]);

    let mut dm = DungeonMasterOrchestrator::new(
        Box::new(llm),
        LlmProfiles::default(),
        ToneModule::default(),
        registry,
        compendium,
        character,
        NarrativeContext::new("the Dunmere crossroads"),
    );

    let outcome = dm.process_turn("I swing my sword at the empty air").await.unwrap();
    assert!(outcome.tool_called.is_none());
    assert!(outcome.narrative.starts_with("⚠ [System:"));
    assert!(outcome.narrative.contains("only available once combat has started"));
    assert_eq!(outcome.mode, NarrativeMode::Exploration);
}

/// `start_combat` is callable with nothing active (it's the one tool whose
/// entire job is to create the encounter), and a successful call pulls the
/// orchestrator's narrative mode into combat.
#[tokio::test]
async fn start_combat_tool_call_enters_combat_mode() {
    let pc_id = Uuid::new_v4();
    let character = fighter(pc_id);
    let registry = builtin_registry();
    let compendium = fixture_compendium();

    let turn_reply = serde_json::json!({
        "tool": "start_combat",
        "parameters": { "monster_ids": ["goblin"] },
        "narrative": "A goblin leaps out from behind the crates!",
        "mode_change": "combat",
        "memory": {}
    })
    .to_string();
    let narration_reply = "The goblin snarls and draws its scimitar.".to_string();
    let llm = MockLlm::new([turn_reply, narration_reply]);

    let mut dm = DungeonMasterOrchestrator::new(
        Box::new(llm),
        LlmProfiles::default(),
        ToneModule::default(),
        registry,
        compendium,
        character,
        NarrativeContext::new("the Dunmere crossroads"),
    );

    let outcome = dm.process_turn("I push open the door").await.unwrap();
    assert_eq!(outcome.tool_called.as_deref(), Some("start_combat"));
    assert_eq!(outcome.mode, NarrativeMode::Combat);
    assert!(dm.encounter().is_some());
    assert_eq!(dm.encounter().unwrap().status, EncounterStatus::InProgress);
}

/// An unparseable model reply degrades to plain narrative with no tool
/// call, rather than erroring the whole turn out.
#[tokio::test]
async fn unparseable_model_reply_falls_back_to_narrative() {
    let pc_id = Uuid::new_v4();
    let character = fighter(pc_id);
    let registry = builtin_registry();
    let compendium = Compendium::default();

    let llm = MockLlm::new(["The torches gutter in a sudden draft.".to_string()]);
    let mut dm = DungeonMasterOrchestrator::new(
        Box::new(llm),
        LlmProfiles::default(),
        ToneModule::default(),
        registry,
        compendium,
        character,
        NarrativeContext::new("the old crypt"),
    );

    let outcome = dm.process_turn("I check the torches").await.unwrap();
    assert!(outcome.tool_called.is_none());
    assert_eq!(outcome.narrative, "The torches gutter in a sudden draft.");
}
