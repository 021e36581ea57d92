//! Character sheets: authored sections, derived (recomputed, never
//! authored) stats, on-disk character/autosave store, and XP/level
//! progression.

use crate::dice;
use crate::persist::{self, PersistError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const CHARACTER_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

pub const ALL_ABILITIES: [Ability; 6] = [
    Ability::Strength,
    Ability::Dexterity,
    Ability::Constitution,
    Ability::Intelligence,
    Ability::Wisdom,
    Ability::Charisma,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

impl AbilityScores {
    pub fn score(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    pub fn modifier(&self, ability: Ability) -> i32 {
        dice::ability_modifier(self.score(ability))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkillOrigin {
    Race,
    Class,
    Background,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicInfo {
    pub name: String,
    pub race: String,
    pub class: String,
    pub level: u32,
    pub background: String,
    pub alignment: String,
    pub experience: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Proficiencies {
    pub saving_throws: Vec<Ability>,
    pub skills: HashMap<String, SkillOrigin>,
    pub armor: Vec<String>,
    pub weapons: Vec<String>,
    pub tools: Vec<String>,
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub name: String,
    pub source: String,
    pub chosen_option: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponSlot {
    pub instance_id: Uuid,
    pub compendium_ref: String,
    pub name: String,
    pub equipped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmorSlot {
    pub instance_id: Uuid,
    pub compendium_ref: String,
    pub name: String,
    pub base_ac: i32,
    pub armor_type: dice::ArmorType,
    pub equipped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldSlot {
    pub instance_id: Uuid,
    pub compendium_ref: String,
    pub name: String,
    pub equipped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStack {
    pub instance_id: Uuid,
    pub compendium_ref: String,
    pub name: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Coinpurse {
    pub gold: i64,
    pub silver: i64,
    pub copper: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Equipment {
    pub weapons: Vec<WeaponSlot>,
    pub armor: Option<ArmorSlot>,
    pub shield: Option<ShieldSlot>,
    pub items: Vec<ItemStack>,
    pub coins: Coinpurse,
}

impl Equipment {
    pub fn equipped_weapon(&self) -> Option<&WeaponSlot> {
        self.weapons.iter().find(|w| w.equipped)
    }

    pub fn equipped_weapons(&self) -> Vec<&WeaponSlot> {
        self.weapons.iter().filter(|w| w.equipped).collect()
    }

    /// Enforce at most one equipped weapon/armour/shield: equipping a new
    /// item unequips whatever previously held that slot.
    pub fn equip_weapon(&mut self, instance_id: Uuid) -> bool {
        let exists = self.weapons.iter().any(|w| w.instance_id == instance_id);
        if !exists {
            return false;
        }
        for w in &mut self.weapons {
            w.equipped = w.instance_id == instance_id;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedStats {
    pub ability_modifiers: HashMap<String, i32>,
    pub proficiency_bonus: i32,
    pub hp_max: i32,
    pub hp_current: i32,
    pub hit_die: String,
    pub armor_class: i32,
    pub speed: u32,
    pub initiative: i32,
    pub save_bonuses: HashMap<String, i32>,
    pub skill_bonuses: HashMap<String, i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdventureState {
    pub context_blob: serde_json::Value,
    pub turn_count: u64,
    pub last_session_summary: Option<String>,
}

impl Default for AdventureState {
    fn default() -> Self {
        Self { context_blob: serde_json::Value::Null, turn_count: 0, last_session_summary: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub version: u32,
    pub id: Uuid,
    pub info_basica: BasicInfo,
    pub caracteristicas: AbilityScores,
    pub competencias: Proficiencies,
    pub rasgos: Vec<FeatureRecord>,
    pub equipo: Equipment,
    pub base_hp_per_level: Vec<i32>,
    pub hit_die_size: u32,
    pub base_speed: u32,
    pub hp_current: i32,
    pub inconsciente: bool,

    #[serde(skip)]
    derivados_cache: Option<DerivedStats>,

    pub estado_aventura: AdventureState,
}

impl Character {
    pub fn new(
        id: Uuid,
        info_basica: BasicInfo,
        caracteristicas: AbilityScores,
        hit_die_size: u32,
        base_speed: u32,
    ) -> Self {
        let con_mod = caracteristicas.modifier(Ability::Constitution);
        let hp_max = hit_die_size as i32 + con_mod;
        Self {
            version: CHARACTER_SCHEMA_VERSION,
            id,
            info_basica,
            caracteristicas,
            competencias: Proficiencies::default(),
            rasgos: Vec::new(),
            equipo: Equipment::default(),
            base_hp_per_level: vec![hp_max],
            hit_die_size,
            base_speed,
            hp_current: hp_max,
            inconsciente: false,
            derivados_cache: None,
            estado_aventura: AdventureState::default(),
        }
    }

    pub fn level(&self) -> u32 {
        self.info_basica.level
    }

    pub fn hp_max(&self) -> i32 {
        self.base_hp_per_level.iter().sum()
    }

    /// Recompute every derived field from the authored sections. Called on
    /// load and after any mutation to an authored field; idempotent.
    pub fn recompute_derived(&mut self) -> &DerivedStats {
        let mut ability_modifiers = HashMap::new();
        for ability in ALL_ABILITIES {
            ability_modifiers.insert(format!("{ability:?}"), self.caracteristicas.modifier(ability));
        }

        let proficiency_bonus = dice::proficiency_bonus(self.info_basica.level);

        let mut save_bonuses = HashMap::new();
        for ability in ALL_ABILITIES {
            let mut bonus = self.caracteristicas.modifier(ability);
            if self.competencias.saving_throws.contains(&ability) {
                bonus += proficiency_bonus;
            }
            save_bonuses.insert(format!("{ability:?}"), bonus);
        }

        let mut skill_bonuses = HashMap::new();
        for (skill, _origin) in &self.competencias.skills {
            let ability = skill_governing_ability(skill);
            let bonus = self.caracteristicas.modifier(ability) + proficiency_bonus;
            skill_bonuses.insert(skill.clone(), bonus);
        }

        let dex_mod = self.caracteristicas.modifier(Ability::Dexterity);
        let armor = self.equipo.armor.as_ref().map(|a| (a.base_ac, a.armor_type));
        let has_defense_style = self.rasgos.iter().any(|f| f.chosen_option.as_deref() == Some("defense"));
        let armor_class = dice::armor_class(&dice::ArmorClassInput {
            dex_modifier: dex_mod,
            armor,
            shield: self.equipo.shield.as_ref().map(|s| s.equipped).unwrap_or(false),
            defense_style: has_defense_style,
        });

        let hp_max = self.hp_max();
        self.hp_current = self.hp_current.clamp(0, hp_max);
        self.inconsciente = self.hp_current == 0;

        let derived = DerivedStats {
            ability_modifiers,
            proficiency_bonus,
            hp_max,
            hp_current: self.hp_current,
            hit_die: format!("d{}", self.hit_die_size),
            armor_class,
            speed: self.base_speed,
            initiative: dex_mod,
            save_bonuses,
            skill_bonuses,
        };
        self.derivados_cache = Some(derived);
        self.derivados_cache.as_ref().unwrap()
    }

    pub fn derived(&mut self) -> &DerivedStats {
        if self.derivados_cache.is_none() {
            self.recompute_derived();
        }
        self.derivados_cache.as_ref().unwrap()
    }

    pub fn apply_damage(&mut self, amount: i32) {
        self.hp_current = (self.hp_current - amount).max(0);
        self.inconsciente = self.hp_current == 0;
        self.derivados_cache = None;
    }

    pub fn heal(&mut self, amount: i32) {
        let max = self.hp_max();
        self.hp_current = (self.hp_current + amount).min(max);
        if self.hp_current > 0 {
            self.inconsciente = false;
        }
        self.derivados_cache = None;
    }
}

fn skill_governing_ability(skill: &str) -> Ability {
    match skill {
        "athletics" => Ability::Strength,
        "acrobatics" | "sleight_of_hand" | "stealth" => Ability::Dexterity,
        "arcana" | "history" | "investigation" | "nature" | "religion" => Ability::Intelligence,
        "animal_handling" | "insight" | "medicine" | "perception" | "survival" => Ability::Wisdom,
        "deception" | "intimidation" | "performance" | "persuasion" => Ability::Charisma,
        _ => Ability::Wisdom,
    }
}

pub const SKILLS: [&str; 18] = [
    "acrobatics",
    "animal_handling",
    "arcana",
    "athletics",
    "deception",
    "history",
    "insight",
    "intimidation",
    "investigation",
    "medicine",
    "nature",
    "perception",
    "performance",
    "persuasion",
    "religion",
    "sleight_of_hand",
    "stealth",
    "survival",
];

#[derive(Debug, Error)]
pub enum CharacterStoreError {
    #[error("character {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Autosave payload: a character mid-creation, plus wizard progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Autosave {
    pub pj: serde_json::Value,
    pub current_step: String,
    pub completed_steps: Vec<String>,
    pub timestamp: String,
}

/// Save/load for character sheets and autosaves, two sibling directories.
pub struct CharacterStore {
    characters_dir: PathBuf,
    autosave_dir: PathBuf,
}

impl CharacterStore {
    pub fn new(storage_root: impl AsRef<Path>) -> Self {
        let root = storage_root.as_ref();
        Self {
            characters_dir: root.join("characters"),
            autosave_dir: root.join("autosave"),
        }
    }

    fn character_path(&self, id: Uuid) -> PathBuf {
        self.characters_dir.join(format!("{id}.json"))
    }

    fn autosave_path(&self, id: Uuid) -> PathBuf {
        self.autosave_dir.join(format!("{id}.json"))
    }

    /// Save overwrites by ID and clears any matching autosave.
    pub async fn save(&self, character: &Character) -> Result<(), CharacterStoreError> {
        persist::save_json_atomic(self.character_path(character.id), character).await?;
        persist::remove_if_exists(self.autosave_path(character.id)).await?;
        Ok(())
    }

    pub async fn load(&self, id: Uuid) -> Result<Character, CharacterStoreError> {
        persist::load_json(self.character_path(id))
            .await
            .map_err(|_| CharacterStoreError::NotFound(id))
    }

    pub async fn save_autosave(&self, id: Uuid, autosave: &Autosave) -> Result<(), CharacterStoreError> {
        persist::save_json_atomic(self.autosave_path(id), autosave).await?;
        Ok(())
    }

    pub async fn load_autosave(&self, id: Uuid) -> Result<Autosave, CharacterStoreError> {
        persist::load_json(self.autosave_path(id))
            .await
            .map_err(|_| CharacterStoreError::NotFound(id))
    }
}

/// XP thresholds to advance from level N to N+1, indexed `[N-1]` for N in 1..20.
pub const XP_THRESHOLDS: [u64; 19] = [
    300, 900, 2700, 6500, 14000, 23000, 34000, 48000, 64000, 85000, 100000, 120000, 140000, 165000,
    195000, 225000, 265000, 305000, 355000,
];

pub fn xp_to_next_level(level: u32) -> Option<u64> {
    XP_THRESHOLDS.get((level as usize).saturating_sub(1)).copied()
}

#[derive(Debug, Clone, Serialize)]
pub struct AwardXpResult {
    pub xp_before: u64,
    pub xp_after: u64,
    pub can_level_up: bool,
    pub target_level: u32,
}

pub fn award_xp(character: &mut Character, amount: u64) -> AwardXpResult {
    let xp_before = character.info_basica.experience;
    character.info_basica.experience += amount;
    let xp_after = character.info_basica.experience;

    let mut target_level = character.info_basica.level;
    while let Some(threshold) = xp_to_next_level(target_level) {
        if xp_after >= threshold && target_level < 20 {
            target_level += 1;
        } else {
            break;
        }
    }

    AwardXpResult {
        xp_before,
        xp_after,
        can_level_up: target_level > character.info_basica.level,
        target_level,
    }
}

/// Apply one or more levels of level-up, per the §4.10 per-level formula.
pub fn level_up(character: &mut Character, target_level: u32, feature_records: impl Fn(u32) -> Vec<FeatureRecord>) {
    let con_mod = character.caracteristicas.modifier(Ability::Constitution);
    while character.info_basica.level < target_level {
        let next_level = character.info_basica.level + 1;
        let hp_gain = (character.hit_die_size as i32 / 2 + 1 + con_mod).max(1);
        character.base_hp_per_level.push(hp_gain);
        character.hp_current += hp_gain;
        character.info_basica.level = next_level;
        character.rasgos.extend(feature_records(next_level));
    }
    character.recompute_derived();
}

/// Ability-score-improvement levels for most classes (4, 8, 12, 16, 19).
pub fn grants_ability_score_improvement(level: u32) -> bool {
    matches!(level, 4 | 8 | 12 | 16 | 19)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Character {
        let info = BasicInfo {
            name: "Thorin".to_string(),
            race: "dwarf".to_string(),
            class: "fighter".to_string(),
            level: 4,
            background: "soldier".to_string(),
            alignment: "lawful_good".to_string(),
            experience: 2700,
        };
        let scores = AbilityScores { strength: 16, dexterity: 12, constitution: 14, intelligence: 10, wisdom: 10, charisma: 8 };
        Character::new(Uuid::new_v4(), info, scores, 10, 30)
    }

    #[test]
    fn derived_stats_are_idempotent() {
        let mut c = sample();
        let first = c.recompute_derived().clone();
        let second = c.recompute_derived().clone();
        assert_eq!(first.armor_class, second.armor_class);
        assert_eq!(first.proficiency_bonus, second.proficiency_bonus);
    }

    #[test]
    fn hp_zero_sets_unconscious() {
        let mut c = sample();
        let max = c.hp_max();
        c.apply_damage(max);
        c.recompute_derived();
        assert_eq!(c.hp_current, 0);
        assert!(c.inconsciente);
    }

    #[test]
    fn level_up_4_to_5_matches_documented_example() {
        let mut c = sample();
        let before_hp = c.hp_max();
        level_up(&mut c, 5, |_lvl| Vec::new());
        assert_eq!(c.hp_max(), before_hp + 8);
        assert_eq!(dice::proficiency_bonus(c.info_basica.level), 3);
    }

    #[test]
    fn unarmored_dex_uncapped_medium_capped_heavy_zero() {
        let mut c = sample();
        c.recompute_derived();
        let unarmored_ac = c.derived().armor_class;
        assert_eq!(unarmored_ac, 10 + c.caracteristicas.modifier(Ability::Dexterity));
    }

    #[test]
    fn award_xp_reports_level_up_eligibility() {
        let mut c = sample();
        let result = award_xp(&mut c, 4000);
        assert!(result.can_level_up);
        assert_eq!(result.target_level, 5);
    }
}
