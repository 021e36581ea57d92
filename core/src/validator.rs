//! Rule validation: given a normalised action and a scene snapshot, decide
//! valid/invalid with a reason and advisories. Never consults the RNG.

use crate::character::SKILLS;
use crate::combat::{Combatant, Condition};
use crate::normalizer::{ActionKind, NormalizedAction};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<String>,
    pub advisories: Vec<String>,
    pub extras: serde_json::Value,
}

impl ValidationResult {
    fn ok() -> Self {
        Self { valid: true, reason: None, advisories: Vec::new(), extras: serde_json::Value::Null }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()), advisories: Vec::new(), extras: serde_json::Value::Null }
    }

    fn with_advisory(mut self, advisory: impl Into<String>) -> Self {
        self.advisories.push(advisory.into());
        self
    }
}

/// Everything the validator needs about the acting combatant and the live
/// scene, without reaching back into the combat engine or compendium.
pub struct ActorSnapshot<'a> {
    pub actor: &'a Combatant,
    pub strict_equipment: bool,
    pub equipped_weapon_ids: &'a [String],
    pub known_spell_ids: &'a [String],
    pub available_slot_levels: &'a [u32],
    pub weapon_exists: bool,
    pub spell_exists: bool,
    pub spell_level: Option<u32>,
    pub spell_requires_target: bool,
    pub target_alive: Option<bool>,
    pub remaining_speed: u32,
}

pub fn validate(action: &NormalizedAction, snapshot: &ActorSnapshot) -> ValidationResult {
    if let Some(reason) = actor_incapacitated_reason(snapshot.actor) {
        return ValidationResult::reject(reason);
    }

    match action.kind {
        ActionKind::Attack => validate_attack(action, snapshot),
        ActionKind::Spell => validate_spell(action, snapshot),
        ActionKind::Movement => validate_movement(action, snapshot),
        ActionKind::Skill => validate_skill(action, snapshot),
        ActionKind::GenericAction => validate_generic(action),
        ActionKind::Item => ValidationResult::ok(),
        ActionKind::Unknown => ValidationResult::reject("could not understand the requested action"),
    }
}

fn actor_incapacitated_reason(actor: &Combatant) -> Option<String> {
    if actor.muerto {
        return Some("the actor is dead and cannot act".to_string());
    }
    if actor.hp_current <= 0 || actor.inconsciente {
        return Some("the actor is unconscious and cannot act".to_string());
    }
    for blocking in [Condition::Paralyzed, Condition::Petrified, Condition::Stunned, Condition::Incapacitated] {
        if actor.conditions.contains(&blocking) {
            return Some(format!("the actor is {blocking:?} and cannot act"));
        }
    }
    None
}

fn validate_attack(action: &NormalizedAction, snapshot: &ActorSnapshot) -> ValidationResult {
    if !action.data.contains_key("target") {
        return ValidationResult::reject("no target specified for the attack");
    }
    if snapshot.target_alive == Some(false) {
        return ValidationResult::reject("target does not exist or is already defeated");
    }
    if !snapshot.weapon_exists {
        return ValidationResult::reject("that weapon is not in the compendium");
    }

    if let Some(weapon_id) = action.data.get("weapon_id").and_then(|v| v.as_str()) {
        let equipped = snapshot.equipped_weapon_ids.iter().any(|w| w == weapon_id);
        if !equipped {
            if snapshot.strict_equipment {
                return ValidationResult::reject(format!("{weapon_id} is not equipped"));
            }
            return ValidationResult::ok().with_advisory(format!("{weapon_id} is not equipped; using it anyway"));
        }
    }

    ValidationResult::ok()
}

fn validate_spell(action: &NormalizedAction, snapshot: &ActorSnapshot) -> ValidationResult {
    if !snapshot.spell_exists {
        return ValidationResult::reject("unknown spell");
    }

    let spell_id = action.data.get("spell_id").and_then(|v| v.as_str()).unwrap_or_default();
    let mut result = ValidationResult::ok();
    if !snapshot.known_spell_ids.iter().any(|s| s == spell_id) {
        result = result.with_advisory("spell is not in the actor's known/prepared list");
    }

    let spell_level = snapshot.spell_level.unwrap_or(0);
    if spell_level > 0 {
        if !snapshot.available_slot_levels.contains(&spell_level) {
            return ValidationResult::reject("no spell slot of sufficient level available");
        }
    }

    if snapshot.spell_requires_target && !action.data.contains_key("target") {
        return ValidationResult::reject("this spell requires a target");
    }

    result
}

fn validate_movement(action: &NormalizedAction, snapshot: &ActorSnapshot) -> ValidationResult {
    for blocking in [Condition::Restrained, Condition::Grappled, Condition::Paralyzed, Condition::Petrified] {
        if snapshot.actor.conditions.contains(&blocking) {
            return ValidationResult::reject(format!("movement is blocked: actor is {blocking:?}"));
        }
    }

    let requested = action.data.get("feet").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    if requested > snapshot.remaining_speed {
        return ValidationResult::reject(format!("movement of {requested} feet exceeds remaining speed ({} feet)", snapshot.remaining_speed));
    }
    ValidationResult::ok()
}

fn validate_skill(action: &NormalizedAction, snapshot: &ActorSnapshot) -> ValidationResult {
    let skill = match action.data.get("skill").and_then(|v| v.as_str()) {
        Some(s) => s,
        None => return ValidationResult::reject("no skill specified"),
    };
    if !SKILLS.contains(&skill) {
        return ValidationResult::reject(format!("'{skill}' is not a recognised skill"));
    }

    let mut result = ValidationResult::ok();
    if skill == "perception" && snapshot.actor.conditions.contains(&Condition::Blinded) {
        result = result.with_advisory("blinded: disadvantage on sight-based Perception checks");
    }
    result
}

fn validate_generic(action: &NormalizedAction) -> ValidationResult {
    let rule_summary = match action.data.get("action_id").and_then(|v| v.as_str()) {
        Some("dash") => "dash doubles movement for the turn",
        Some("dodge") => "dodge grants disadvantage to incoming attacks until the actor's next turn",
        Some("disengage") => "disengage prevents opportunity attacks when moving away",
        Some("help") => "help grants advantage to an ally's next check or attack",
        Some("hide") => "hide attempts a Stealth check to become hidden",
        Some("search") => "search is a Perception or Investigation check over the area",
        Some("ready") => "ready prepares an action to trigger on a stated condition",
        _ => "generic action permitted for an able actor",
    };
    let mut result = ValidationResult::ok();
    result.extras = serde_json::json!({ "rule_summary": rule_summary });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::TurnFlags;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn able_combatant() -> Combatant {
        Combatant {
            id: Uuid::new_v4(),
            name: "Thorin".to_string(),
            is_player: true,
            is_ally: false,
            initiative: 0,
            dexterity_modifier: 2,
            hp_current: 10,
            hp_max: 10,
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

    fn attack_action(target: bool) -> NormalizedAction {
        let mut data = std::collections::HashMap::new();
        if target {
            data.insert("target".to_string(), serde_json::json!("goblin_1"));
        }
        NormalizedAction {
            kind: ActionKind::Attack,
            data,
            confidence: 0.9,
            missing_required: Vec::new(),
            advisories: Vec::new(),
            origin: crate::normalizer::Origin::Pattern,
            needs_clarification: false,
        }
    }

    #[test]
    fn dead_actor_cannot_act() {
        let mut actor = able_combatant();
        actor.muerto = true;
        let action = attack_action(true);
        let snapshot = ActorSnapshot {
            actor: &actor,
            strict_equipment: false,
            equipped_weapon_ids: &[],
            known_spell_ids: &[],
            available_slot_levels: &[],
            weapon_exists: true,
            spell_exists: false,
            spell_level: None,
            spell_requires_target: false,
            target_alive: Some(true),
            remaining_speed: 30,
        };
        let result = validate(&action, &snapshot);
        assert!(!result.valid);
    }

    #[test]
    fn movement_over_remaining_speed_rejected_with_keyword() {
        let actor = able_combatant();
        let mut data = std::collections::HashMap::new();
        data.insert("feet".to_string(), serde_json::json!(40));
        let action = NormalizedAction {
            kind: ActionKind::Movement,
            data,
            confidence: 1.0,
            missing_required: Vec::new(),
            advisories: Vec::new(),
            origin: crate::normalizer::Origin::Pattern,
            needs_clarification: false,
        };
        let snapshot = ActorSnapshot {
            actor: &actor,
            strict_equipment: false,
            equipped_weapon_ids: &[],
            known_spell_ids: &[],
            available_slot_levels: &[],
            weapon_exists: true,
            spell_exists: false,
            spell_level: None,
            spell_requires_target: false,
            target_alive: None,
            remaining_speed: 30,
        };
        let result = validate(&action, &snapshot);
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("movement"));
    }

    #[test]
    fn unequipped_weapon_is_advisory_not_rejection_when_not_strict() {
        let actor = able_combatant();
        let mut data = std::collections::HashMap::new();
        data.insert("target".to_string(), serde_json::json!("goblin_1"));
        data.insert("weapon_id".to_string(), serde_json::json!("dagger"));
        let action = NormalizedAction {
            kind: ActionKind::Attack,
            data,
            confidence: 0.9,
            missing_required: Vec::new(),
            advisories: Vec::new(),
            origin: crate::normalizer::Origin::Pattern,
            needs_clarification: false,
        };
        let snapshot = ActorSnapshot {
            actor: &actor,
            strict_equipment: false,
            equipped_weapon_ids: &["espada_larga".to_string()],
            known_spell_ids: &[],
            available_slot_levels: &[],
            weapon_exists: true,
            spell_exists: false,
            spell_level: None,
            spell_requires_target: false,
            target_alive: Some(true),
            remaining_speed: 30,
        };
        let result = validate(&action, &snapshot);
        assert!(result.valid);
        assert!(!result.advisories.is_empty());
    }

    #[test]
    fn unknown_skill_name_rejected() {
        let actor = able_combatant();
        let mut data = std::collections::HashMap::new();
        data.insert("skill".to_string(), serde_json::json!("juggling"));
        let action = NormalizedAction {
            kind: ActionKind::Skill,
            data,
            confidence: 0.9,
            missing_required: Vec::new(),
            advisories: Vec::new(),
            origin: crate::normalizer::Origin::Pattern,
            needs_clarification: false,
        };
        let snapshot = ActorSnapshot {
            actor: &actor,
            strict_equipment: false,
            equipped_weapon_ids: &[],
            known_spell_ids: &[],
            available_slot_levels: &[],
            weapon_exists: false,
            spell_exists: false,
            spell_level: None,
            spell_requires_target: false,
            target_alive: None,
            remaining_speed: 30,
        };
        assert!(!validate(&action, &snapshot).valid);
    }
}
