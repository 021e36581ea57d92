//! The combat engine: initiative, per-turn resources, HP/condition
//! tracking, idempotent delta application, and victory/defeat/draw
//! detection.

use crate::compendium::MonsterEntry;
use crate::dice::{self, Advantage};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CombatError {
    #[error("combat already has a roster; cannot add combatants after start")]
    AlreadyStarted,
    #[error("combat not in progress")]
    NotInProgress,
    #[error("unknown combatant {0}")]
    UnknownCombatant(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Blinded,
    Charmed,
    Deafened,
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncounterStatus {
    NotStarted,
    InProgress,
    Victory,
    Defeat,
    Draw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellSlots {
    /// Remaining slots indexed by spell level 1-9 (index 0 unused).
    pub remaining: [u32; 10],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnFlags {
    pub action_used: bool,
    pub bonus_action_used: bool,
    pub reaction_used: bool,
    pub movement_used: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combatant {
    pub id: Uuid,
    pub name: String,
    pub is_player: bool,
    pub is_ally: bool,
    pub initiative: i32,
    pub dexterity_modifier: i32,
    pub hp_current: i32,
    pub hp_max: i32,
    pub temp_hp: i32,
    pub armor_class: i32,
    pub speed: u32,
    pub attack_bonus: i32,
    pub damage_bonus: i32,
    pub conditions: HashSet<Condition>,
    pub concentration_target: Option<Uuid>,
    pub monster_actions: Vec<crate::compendium::MonsterAction>,
    pub spell_slots: Option<SpellSlots>,
    pub flags: TurnFlags,
    pub inconsciente: bool,
    pub muerto: bool,
}

impl Combatant {
    pub fn is_alive(&self) -> bool {
        !self.muerto
    }

    pub fn can_act(&self) -> bool {
        self.is_alive()
            && !self.inconsciente
            && !self.conditions.contains(&Condition::Paralyzed)
            && !self.conditions.contains(&Condition::Petrified)
            && !self.conditions.contains(&Condition::Stunned)
            && !self.conditions.contains(&Condition::Incapacitated)
            && self.hp_current > 0
    }

    pub fn apply_damage(&mut self, amount: i32) {
        let mut remaining = amount;
        if self.temp_hp > 0 {
            let absorbed = remaining.min(self.temp_hp);
            self.temp_hp -= absorbed;
            remaining -= absorbed;
        }
        self.hp_current = (self.hp_current - remaining).max(0);
        if self.hp_current == 0 {
            if self.is_player {
                self.inconsciente = true;
            } else {
                self.muerto = true;
            }
        }
    }

    pub fn heal(&mut self, amount: i32) {
        self.hp_current = (self.hp_current + amount).min(self.hp_max);
        if self.hp_current > 0 {
            self.inconsciente = false;
        }
    }

    pub fn from_monster_instance(instance: &crate::compendium::MonsterInstance) -> Self {
        Self::from_monster(instance.instance_id, &instance.source)
    }

    pub fn from_monster(id: Uuid, entry: &MonsterEntry) -> Self {
        Self {
            id,
            name: entry.name.clone(),
            is_player: false,
            is_ally: false,
            initiative: 0,
            dexterity_modifier: entry.dexterity_modifier,
            hp_current: entry.hp_max,
            hp_max: entry.hp_max,
            temp_hp: 0,
            armor_class: entry.armor_class,
            speed: 30,
            attack_bonus: entry.actions.first().map(|a| a.attack_bonus).unwrap_or(0),
            damage_bonus: 0,
            conditions: HashSet::new(),
            concentration_target: None,
            monster_actions: entry.actions.clone(),
            spell_slots: None,
            flags: TurnFlags::default(),
            inconsciente: false,
            muerto: false,
        }
    }
}

/// A structured mutation to encounter state, produced by the action
/// pipeline and applied exactly once per `(round, actor, turn_index)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateDelta {
    pub action_used: bool,
    #[serde(default)]
    pub bonus_action_used: bool,
    #[serde(default)]
    pub movement_used: u32,
    #[serde(default)]
    pub movement_bonus: u32,
    #[serde(default)]
    pub damage: Option<DamageDelta>,
    #[serde(default)]
    pub slot_consumed: Option<u32>,
    #[serde(default)]
    pub temporary_condition: Option<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DamageDelta {
    pub target: Uuid,
    pub amount: i32,
    pub damage_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CombatEvent {
    AttackMade { actor: Uuid, target: Uuid, weapon_name: String },
    DamageComputed { target: Uuid, amount: i32, damage_type: String, critical: bool },
    AttackMissed { actor: Uuid, target: Uuid },
    SpellCast { actor: Uuid, spell_id: String, target: Option<Uuid> },
    SkillCheck { actor: Uuid, skill: String, total: i32 },
    GenericAction { actor: Uuid, action: String },
}

pub struct EncounterState {
    pub combatants: HashMap<Uuid, Combatant>,
    pub initiative_order: Vec<Uuid>,
    pub round: u32,
    pub turn_index: usize,
    pub status: EncounterStatus,
    pub event_log: Vec<CombatEvent>,
    applied_deltas: HashSet<(u32, Uuid, usize, u64)>,
}

impl EncounterState {
    pub fn new() -> Self {
        Self {
            combatants: HashMap::new(),
            initiative_order: Vec::new(),
            round: 1,
            turn_index: 0,
            status: EncounterStatus::NotStarted,
            event_log: Vec::new(),
            applied_deltas: HashSet::new(),
        }
    }

    pub fn add_combatant(&mut self, combatant: Combatant) -> Result<(), CombatError> {
        if self.status != EncounterStatus::NotStarted {
            return Err(CombatError::AlreadyStarted);
        }
        self.combatants.insert(combatant.id, combatant);
        Ok(())
    }

    /// Roll initiative for every combatant without a pre-set value, freeze
    /// the roster, sort `(initiative desc, dex desc)`, and begin round 1.
    pub fn start(&mut self, roll_initiative: bool) -> Result<(), CombatError> {
        if self.status != EncounterStatus::NotStarted {
            return Err(CombatError::AlreadyStarted);
        }

        if roll_initiative {
            let ids: Vec<Uuid> = self.combatants.keys().copied().collect();
            for id in ids {
                let dex_mod = self.combatants[&id].dexterity_modifier;
                let roll = dice::DiceExpression::new(1, dice::DieType::D20, dex_mod).unwrap().roll(Advantage::Normal);
                self.combatants.get_mut(&id).unwrap().initiative = roll.total;
            }
        }

        let mut order: Vec<Uuid> = self.combatants.keys().copied().collect();
        order.sort_by(|a, b| {
            let ca = &self.combatants[a];
            let cb = &self.combatants[b];
            cb.initiative.cmp(&ca.initiative).then(cb.dexterity_modifier.cmp(&ca.dexterity_modifier)).then(a.cmp(b))
        });

        self.initiative_order = order;
        self.round = 1;
        self.turn_index = 0;
        self.status = EncounterStatus::InProgress;
        self.reset_turn_flags_for_active();
        Ok(())
    }

    pub fn current_combatant_id(&self) -> Option<Uuid> {
        self.initiative_order.get(self.turn_index).copied()
    }

    pub fn current_combatant(&self) -> Option<&Combatant> {
        self.current_combatant_id().and_then(|id| self.combatants.get(&id))
    }

    fn reset_turn_flags_for_active(&mut self) {
        if let Some(id) = self.current_combatant_id() {
            if let Some(c) = self.combatants.get_mut(&id) {
                c.flags = TurnFlags::default();
            }
        }
    }

    /// Advance the cursor, crossing round boundaries, skipping dead or
    /// unconscious combatants.
    pub fn next_turn(&mut self) -> Result<(), CombatError> {
        if self.status != EncounterStatus::InProgress {
            return Err(CombatError::NotInProgress);
        }
        if self.initiative_order.is_empty() {
            return Ok(());
        }

        let len = self.initiative_order.len();
        loop {
            self.turn_index += 1;
            if self.turn_index >= len {
                self.turn_index = 0;
                self.round += 1;
            }
            let id = self.initiative_order[self.turn_index];
            let combatant = &self.combatants[&id];
            if combatant.is_alive() && !combatant.inconsciente {
                break;
            }
            // Full loop with nobody able to act would otherwise spin forever;
            // end-of-combat detection upstream always fires before that happens.
        }
        self.reset_turn_flags_for_active();
        Ok(())
    }

    /// Canonicalise and hash a delta for the dedup guard. Serializing to a
    /// `BTreeMap`-ordered JSON value before hashing keeps the hash stable
    /// regardless of struct field declaration order.
    fn delta_hash(delta: &StateDelta) -> u64 {
        let value = serde_json::to_value(delta).unwrap_or_default();
        let canonical: std::collections::BTreeMap<String, serde_json::Value> =
            value.as_object().map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default();
        let canonical_json = serde_json::to_string(&canonical).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        canonical_json.hash(&mut hasher);
        hasher.finish()
    }

    /// Apply `delta` for the given actor's current turn exactly once;
    /// repeat submissions with the same `(round, actor, turn_index, hash)`
    /// are silently discarded.
    pub fn apply_delta(&mut self, actor: Uuid, delta: StateDelta) -> Result<(), CombatError> {
        let span = tracing::info_span!("combat_apply_delta", round = self.round, %actor);
        let _enter = span.enter();

        if self.status != EncounterStatus::InProgress {
            return Err(CombatError::NotInProgress);
        }

        let key = (self.round, actor, self.turn_index, Self::delta_hash(&delta));
        if self.applied_deltas.contains(&key) {
            tracing::warn!(%actor, "discarded duplicate delta submission");
            return Ok(());
        }

        {
            let combatant = self.combatants.get_mut(&actor).ok_or(CombatError::UnknownCombatant(actor))?;
            if delta.action_used {
                combatant.flags.action_used = true;
            }
            if delta.bonus_action_used {
                combatant.flags.bonus_action_used = true;
            }
            combatant.flags.movement_used += delta.movement_used + delta.movement_bonus;
            if let Some(condition) = delta.temporary_condition {
                combatant.conditions.insert(condition);
            }
        }

        if let Some(damage) = &delta.damage {
            let target = self.combatants.get_mut(&damage.target).ok_or(CombatError::UnknownCombatant(damage.target))?;
            target.apply_damage(damage.amount);
        }

        self.applied_deltas.insert(key);
        self.check_end_of_combat();
        Ok(())
    }

    fn check_end_of_combat(&mut self) {
        if self.status != EncounterStatus::InProgress {
            return;
        }
        let pcs_alive = self.combatants.values().any(|c| c.is_player && c.is_alive() && !c.inconsciente);
        let enemies_alive = self.combatants.values().any(|c| !c.is_player && !c.is_ally && c.is_alive());

        self.status = match (pcs_alive, enemies_alive) {
            (true, false) => EncounterStatus::Victory,
            (false, true) => EncounterStatus::Defeat,
            (false, false) => EncounterStatus::Draw,
            (true, true) => EncounterStatus::InProgress,
        };
    }

    pub fn live_enemies_of(&self, actor: Uuid) -> Vec<&Combatant> {
        let actor_is_player = self.combatants.get(&actor).map(|c| c.is_player || c.is_ally).unwrap_or(true);
        self.combatants
            .values()
            .filter(|c| c.is_alive() && (c.is_player || c.is_ally) != actor_is_player)
            .collect()
    }

    pub fn live_allies_of(&self, actor: Uuid) -> Vec<&Combatant> {
        let actor_is_player = self.combatants.get(&actor).map(|c| c.is_player || c.is_ally).unwrap_or(true);
        self.combatants
            .values()
            .filter(|c| c.id != actor && c.is_alive() && (c.is_player || c.is_ally) == actor_is_player)
            .collect()
    }
}

impl Default for EncounterState {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal enemy AI: pick the first monster action (melee over ranged),
/// target the PC, roll to hit, apply damage, advance the turn.
pub fn run_enemy_turn(encounter: &mut EncounterState, actor_id: Uuid, pc_id: Uuid) -> Result<(), CombatError> {
    let action = {
        let actor = encounter.combatants.get(&actor_id).ok_or(CombatError::UnknownCombatant(actor_id))?;
        let mut actions = actor.monster_actions.clone();
        actions.sort_by_key(|a| if a.kind == crate::compendium::ActionKind::Melee { 0 } else { 1 });
        actions.into_iter().next()
    };

    let Some(action) = action else {
        encounter.next_turn()?;
        return Ok(());
    };

    let pc_ac = encounter.combatants.get(&pc_id).map(|c| c.armor_class).unwrap_or(10);
    let attack_roll = dice::DiceExpression::new(1, dice::DieType::D20, action.attack_bonus).unwrap().roll(Advantage::Normal);

    if attack_roll.meets_dc(pc_ac) {
        let mut damage = dice::roll_damage(&action.damage_expression, attack_roll.is_critical()).unwrap();
        if attack_roll.is_critical() {
            // Natural 20: reroll the damage dice once more and add, flat modifier counted once.
            let bonus_dice = dice::roll_damage(&action.damage_expression, false).unwrap();
            damage.total += bonus_dice.total - bonus_dice.modifier;
        }
        encounter.event_log.push(CombatEvent::AttackMade { actor: actor_id, target: pc_id, weapon_name: action.name.clone() });
        encounter.event_log.push(CombatEvent::DamageComputed {
            target: pc_id,
            amount: damage.total,
            damage_type: action.damage_type.clone(),
            critical: attack_roll.is_critical(),
        });
        encounter.apply_delta(
            actor_id,
            StateDelta {
                action_used: true,
                bonus_action_used: false,
                movement_used: 0,
                movement_bonus: 0,
                damage: Some(DamageDelta { target: pc_id, amount: damage.total, damage_type: action.damage_type }),
                slot_consumed: None,
                temporary_condition: None,
            },
        )?;
    } else {
        encounter.event_log.push(CombatEvent::AttackMissed { actor: actor_id, target: pc_id });
        encounter.apply_delta(
            actor_id,
            StateDelta { action_used: true, bonus_action_used: false, movement_used: 0, movement_bonus: 0, damage: None, slot_consumed: None, temporary_condition: None },
        )?;
    }

    if encounter.status == EncounterStatus::InProgress {
        encounter.next_turn()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compendium::{ActionKind, MonsterAction, MonsterEntry};

    fn pc(id: Uuid) -> Combatant {
        Combatant {
            id,
            name: "Thorin".to_string(),
            is_player: true,
            is_ally: false,
            initiative: 0,
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

    fn goblin(id: Uuid) -> Combatant {
        let entry = MonsterEntry {
            id: "goblin".to_string(),
            name: "Goblin".to_string(),
            challenge_rating: "1/4".to_string(),
            experience: 50,
            armor_class: 15,
            hp_max: 7,
            dexterity_modifier: 2,
            actions: vec![MonsterAction { name: "Scimitar".to_string(), kind: ActionKind::Melee, attack_bonus: 4, damage_expression: "1d6+2".to_string(), damage_type: "slashing".to_string() }],
        };
        Combatant::from_monster(id, &entry)
    }

    #[test]
    fn start_deterministic_initiative_matches_documented_scenario() {
        dice::set_seed(42);
        let mut encounter = EncounterState::new();
        let pc_id = Uuid::new_v4();
        let goblin_id = Uuid::new_v4();
        encounter.add_combatant(pc(pc_id)).unwrap();
        encounter.add_combatant(goblin(goblin_id)).unwrap();
        encounter.start(true).unwrap();
        dice::reset();

        assert_eq!(encounter.status, EncounterStatus::InProgress);
        assert_eq!(encounter.round, 1);
        assert!(encounter.combatants[&pc_id].initiative >= encounter.combatants[&goblin_id].initiative);
    }

    #[test]
    fn initiative_order_is_stable_desc_by_initiative_then_dex() {
        let mut encounter = EncounterState::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut ca = pc(a);
        ca.initiative = 15;
        ca.dexterity_modifier = 1;
        let mut cb = goblin(b);
        cb.initiative = 15;
        cb.dexterity_modifier = 3;
        encounter.add_combatant(ca).unwrap();
        encounter.add_combatant(cb).unwrap();
        encounter.start(false).unwrap();
        assert_eq!(encounter.initiative_order[0], b);
    }

    #[test]
    fn delta_idempotence_applying_twice_equals_applying_once() {
        let mut encounter = EncounterState::new();
        let pc_id = Uuid::new_v4();
        let goblin_id = Uuid::new_v4();
        encounter.add_combatant(pc(pc_id)).unwrap();
        encounter.add_combatant(goblin(goblin_id)).unwrap();
        encounter.start(false).unwrap();

        let delta = StateDelta {
            action_used: true,
            bonus_action_used: false,
            movement_used: 0,
            movement_bonus: 0,
            damage: Some(DamageDelta { target: goblin_id, amount: 5, damage_type: "slashing".to_string() }),
            slot_consumed: None,
            temporary_condition: None,
        };

        let actor = encounter.current_combatant_id().unwrap();
        encounter.apply_delta(actor, delta.clone()).unwrap();
        let hp_after_first = encounter.combatants[&goblin_id].hp_current;
        encounter.apply_delta(actor, delta).unwrap();
        let hp_after_second = encounter.combatants[&goblin_id].hp_current;

        assert_eq!(hp_after_first, hp_after_second);
    }

    #[test]
    fn zero_hp_sets_terminal_flags_for_pc_and_monster() {
        let mut c = pc(Uuid::new_v4());
        c.apply_damage(999);
        assert!(c.inconsciente);
        assert!(!c.muerto);

        let mut g = goblin(Uuid::new_v4());
        g.apply_damage(999);
        assert!(g.muerto);
    }

    #[test]
    fn victory_detected_when_all_enemies_dead() {
        let mut encounter = EncounterState::new();
        let pc_id = Uuid::new_v4();
        let goblin_id = Uuid::new_v4();
        encounter.add_combatant(pc(pc_id)).unwrap();
        encounter.add_combatant(goblin(goblin_id)).unwrap();
        encounter.start(false).unwrap();

        encounter.apply_delta(pc_id, StateDelta {
            action_used: true,
            bonus_action_used: false,
            movement_used: 0,
            movement_bonus: 0,
            damage: Some(DamageDelta { target: goblin_id, amount: 999, damage_type: "slashing".to_string() }),
            slot_consumed: None,
            temporary_condition: None,
        }).unwrap();

        assert_eq!(encounter.status, EncounterStatus::Victory);
    }

    #[test]
    fn terminal_combat_rejects_further_deltas() {
        let mut encounter = EncounterState::new();
        let pc_id = Uuid::new_v4();
        let goblin_id = Uuid::new_v4();
        encounter.add_combatant(pc(pc_id)).unwrap();
        encounter.add_combatant(goblin(goblin_id)).unwrap();
        encounter.start(false).unwrap();
        encounter.status = EncounterStatus::Victory;

        let result = encounter.apply_delta(pc_id, StateDelta { action_used: true, bonus_action_used: false, movement_used: 0, movement_bonus: 0, damage: None, slot_consumed: None, temporary_condition: None });
        assert!(matches!(result, Err(CombatError::NotInProgress)));
    }
}
