//! The action pipeline: the single entry point that turns free text into
//! an applied (or rejected, or clarification-seeking) combat-state
//! change. Ties the normaliser, validator, dice primitives, and combat
//! engine's guarded delta path together.

use crate::combat::{CombatEvent, Combatant, DamageDelta, EncounterState, StateDelta};
use crate::compendium::Compendium;
use crate::dice::{self, Advantage};
use crate::normalizer::{ActionKind, NormalizedAction, Normalizer};
use crate::validator::{self, ActorSnapshot};
use serde::Serialize;
use uuid::Uuid;

/// The live scene the pipeline and normaliser both consult: the acting
/// combatant's equipment/spells/slots, the live enemies/allies from its
/// perspective, and remaining movement.
pub struct SceneContext<'a> {
    pub actor: &'a Combatant,
    pub compendium: &'a Compendium,
    pub live_enemy_ids: Vec<Uuid>,
    pub live_ally_ids: Vec<Uuid>,
    pub equipped_weapon_ids: Vec<String>,
    pub known_spell_ids: Vec<String>,
    pub available_slot_levels: Vec<u32>,
    pub strict_equipment: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClarificationOption {
    pub id: String,
    pub label: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub enum PipelineResult {
    NeedsClarification { question: String, options: Vec<ClarificationOption>, partial_action: serde_json::Value },
    ActionRejected { reason: String, suggestion: Option<String> },
    ActionApplied { events: Vec<CombatEvent>, state_delta: StateDelta, narration_hint: Option<String> },
    InternalError { error: String },
}

/// Run free text through normalisation, validation, and (on success)
/// execution + guarded delta application against `encounter`.
pub fn process(text: &str, scene: &SceneContext, normalizer: &Normalizer, encounter: &mut EncounterState) -> PipelineResult {
    let normalizer_scene = crate::normalizer::SceneContext {
        live_enemy_ids: scene.live_enemy_ids.iter().map(|id| id.to_string()).collect(),
        equipped_weapon_ids: scene.equipped_weapon_ids.clone(),
        known_spell_ids: scene.known_spell_ids.clone(),
        remaining_speed: scene.actor.speed.saturating_sub(scene.actor.flags.movement_used),
    };

    let action = normalizer.normalize(text, &normalizer_scene);

    if action.needs_clarification {
        return PipelineResult::NeedsClarification {
            question: clarification_question(&action),
            options: clarification_options(&action, scene),
            partial_action: serde_json::to_value(&action).unwrap_or(serde_json::Value::Null),
        };
    }

    let snapshot = build_snapshot(&action, scene);
    let validation = validator::validate(&action, &snapshot);
    if !validation.valid {
        let reason = validation.reason.unwrap_or_else(|| "action rejected".to_string());
        let suggestion = suggestion_for_reason(&reason);
        return PipelineResult::ActionRejected { reason, suggestion };
    }

    match execute(&action, scene, encounter) {
        Ok((events, delta, narration_hint)) => {
            if let Err(err) = encounter.apply_delta(scene.actor.id, delta.clone()) {
                return PipelineResult::InternalError { error: err.to_string() };
            }
            PipelineResult::ActionApplied { events, state_delta: delta, narration_hint }
        }
        Err(error) => PipelineResult::InternalError { error },
    }
}

fn clarification_question(action: &NormalizedAction) -> String {
    match action.kind {
        ActionKind::Attack => "Who or what are you attacking?".to_string(),
        ActionKind::Spell => "Which spell do you want to cast?".to_string(),
        ActionKind::Skill => "Which skill are you using?".to_string(),
        _ => "Can you clarify what you want to do?".to_string(),
    }
}

/// Clarification options are always drawn from the live scene; the
/// pipeline never invents an option the rules would later reject.
fn clarification_options(action: &NormalizedAction, scene: &SceneContext) -> Vec<ClarificationOption> {
    match action.kind {
        ActionKind::Attack => scene
            .live_enemy_ids
            .iter()
            .map(|id| ClarificationOption { id: id.to_string(), label: id.to_string(), data: serde_json::json!({ "target": id.to_string() }) })
            .collect(),
        ActionKind::Spell => scene
            .known_spell_ids
            .iter()
            .map(|id| ClarificationOption { id: id.clone(), label: id.clone(), data: serde_json::json!({ "spell_id": id }) })
            .collect(),
        ActionKind::Skill => crate::character::SKILLS
            .iter()
            .map(|s| ClarificationOption { id: s.to_string(), label: s.to_string(), data: serde_json::json!({ "skill": s }) })
            .collect(),
        _ => Vec::new(),
    }
}

fn suggestion_for_reason(reason: &str) -> Option<String> {
    if reason.contains("not equipped") {
        Some("equip the weapon first, or name one that is already equipped".to_string())
    } else if reason.contains("exceeds remaining speed") {
        Some("move a shorter distance, or end your turn here".to_string())
    } else if reason.contains("spell slot") {
        Some("choose a lower-level spell or wait for a rest".to_string())
    } else {
        None
    }
}

fn build_snapshot<'a>(action: &NormalizedAction, scene: &'a SceneContext) -> ActorSnapshot<'a> {
    let weapon_id = action.data.get("weapon_id").and_then(|v| v.as_str());
    let weapon_exists = weapon_id.map(|id| scene.compendium.weapon(id).is_some()).unwrap_or(true);

    let spell_id = action.data.get("spell_id").and_then(|v| v.as_str());
    let spell_entry = spell_id.and_then(|id| scene.compendium.spell(id));

    let target_alive = action.data.get("target").and_then(|v| v.as_str()).map(|target| {
        scene.live_enemy_ids.iter().any(|id| id.to_string() == target) || scene.live_ally_ids.iter().any(|id| id.to_string() == target)
    });

    ActorSnapshot {
        actor: scene.actor,
        strict_equipment: scene.strict_equipment,
        equipped_weapon_ids: &scene.equipped_weapon_ids,
        known_spell_ids: &scene.known_spell_ids,
        available_slot_levels: &scene.available_slot_levels,
        weapon_exists,
        spell_exists: spell_entry.is_some(),
        spell_level: spell_entry.map(|s| s.level),
        spell_requires_target: spell_entry.map(|s| s.requires_target).unwrap_or(false),
        target_alive,
        remaining_speed: scene.actor.speed.saturating_sub(scene.actor.flags.movement_used),
    }
}

type ExecutionOutcome = (Vec<CombatEvent>, StateDelta, Option<String>);

fn execute(action: &NormalizedAction, scene: &SceneContext, encounter: &EncounterState) -> Result<ExecutionOutcome, String> {
    match action.kind {
        ActionKind::Attack => execute_attack(action, scene, encounter),
        ActionKind::Spell => execute_spell(action, scene),
        ActionKind::Movement => execute_movement(action, scene),
        ActionKind::Skill => execute_skill(action, scene),
        ActionKind::GenericAction => execute_generic(action, scene),
        ActionKind::Item | ActionKind::Unknown => Err("this action kind carries no state delta".to_string()),
    }
}

fn execute_attack(action: &NormalizedAction, scene: &SceneContext, encounter: &EncounterState) -> Result<ExecutionOutcome, String> {
    let target_str = action.data.get("target").and_then(|v| v.as_str()).ok_or("no target specified")?;
    let target: Uuid = target_str.parse().map_err(|_| "target is not a recognised combatant id".to_string())?;
    let target_combatant = encounter.combatants.get(&target).ok_or("target not found in this encounter")?;

    let (attack_bonus, weapon_name, damage_expression, damage_type) = if let Some(monster_action) = scene.actor.monster_actions.first() {
        (monster_action.attack_bonus, monster_action.name.clone(), monster_action.damage_expression.clone(), monster_action.damage_type.clone())
    } else {
        let weapon_id = action.data.get("weapon_id").and_then(|v| v.as_str()).ok_or("no weapon available for this attack")?;
        let weapon = scene.compendium.weapon(weapon_id).ok_or("weapon not in compendium")?;
        (scene.actor.attack_bonus, weapon.name.clone(), weapon.damage_expression.clone(), weapon.damage_type.clone())
    };

    let attack_roll = dice::DiceExpression::new(1, dice::DieType::D20, attack_bonus).map_err(|e| e.to_string())?.roll(Advantage::Normal);
    let mut events = vec![CombatEvent::AttackMade { actor: scene.actor.id, target, weapon_name }];

    if !attack_roll.meets_dc(target_combatant.armor_class) {
        events.push(CombatEvent::AttackMissed { actor: scene.actor.id, target });
        let delta = StateDelta { action_used: true, bonus_action_used: false, movement_used: 0, movement_bonus: 0, damage: None, slot_consumed: None, temporary_condition: None };
        return Ok((events, delta, Some("the attack misses".to_string())));
    }

    let base_expr: dice::DiceExpression = damage_expression.parse().map_err(|e: dice::DiceError| e.to_string())?;
    let expr_with_bonus = dice::DiceExpression::new(base_expr.count, base_expr.die, base_expr.modifier + scene.actor.damage_bonus).map_err(|e| e.to_string())?;
    let damage = dice::roll_damage(&expr_with_bonus.to_string(), attack_roll.is_critical()).map_err(|e| e.to_string())?;
    events.push(CombatEvent::DamageComputed { target, amount: damage.total, damage_type: damage_type.clone(), critical: attack_roll.is_critical() });

    let delta = StateDelta {
        action_used: true,
        bonus_action_used: false,
        movement_used: 0,
        movement_bonus: 0,
        damage: Some(DamageDelta { target, amount: damage.total, damage_type }),
        slot_consumed: None,
        temporary_condition: None,
    };
    let hint = if attack_roll.is_critical() { Some("a critical hit lands".to_string()) } else { None };
    Ok((events, delta, hint))
}

fn execute_spell(action: &NormalizedAction, scene: &SceneContext) -> Result<ExecutionOutcome, String> {
    let spell_id = action.data.get("spell_id").and_then(|v| v.as_str()).ok_or("no spell specified")?.to_string();
    let spell_level = scene.compendium.spell(&spell_id).map(|s| s.level).unwrap_or(0);
    let target = action.data.get("target").and_then(|v| v.as_str()).map(|s| s.to_string());

    let events = vec![CombatEvent::SpellCast { actor: scene.actor.id, spell_id, target: target.and_then(|t| t.parse().ok()) }];
    let delta = StateDelta {
        action_used: true,
        bonus_action_used: false,
        movement_used: 0,
        movement_bonus: 0,
        damage: None,
        slot_consumed: if spell_level > 0 { Some(spell_level) } else { None },
        temporary_condition: None,
    };
    Ok((events, delta, None))
}

fn execute_movement(action: &NormalizedAction, scene: &SceneContext) -> Result<ExecutionOutcome, String> {
    let feet = action.data.get("feet").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let _ = scene;
    let delta = StateDelta { action_used: false, bonus_action_used: false, movement_used: feet, movement_bonus: 0, damage: None, slot_consumed: None, temporary_condition: None };
    Ok((Vec::new(), delta, None))
}

fn execute_skill(action: &NormalizedAction, scene: &SceneContext) -> Result<ExecutionOutcome, String> {
    let skill = action.data.get("skill").and_then(|v| v.as_str()).ok_or("no skill specified")?.to_string();
    let roll = dice::DiceExpression::new(1, dice::DieType::D20, 0).map_err(|e| e.to_string())?.roll(Advantage::Normal);
    let events = vec![CombatEvent::SkillCheck { actor: scene.actor.id, skill, total: roll.total }];
    let delta = StateDelta { action_used: false, bonus_action_used: false, movement_used: 0, movement_bonus: 0, damage: None, slot_consumed: None, temporary_condition: None };
    Ok((events, delta, None))
}

fn execute_generic(action: &NormalizedAction, scene: &SceneContext) -> Result<ExecutionOutcome, String> {
    let action_id = action.data.get("action_id").and_then(|v| v.as_str()).unwrap_or("generic").to_string();
    let events = vec![CombatEvent::GenericAction { actor: scene.actor.id, action: action_id.clone() }];

    let mut delta = StateDelta { action_used: true, bonus_action_used: false, movement_used: 0, movement_bonus: 0, damage: None, slot_consumed: None, temporary_condition: None };
    if action_id == "dash" {
        delta.movement_bonus = scene.actor.speed.saturating_sub(scene.actor.flags.movement_used);
    }
    Ok((events, delta, None))
}
