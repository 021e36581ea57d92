//! Read-only accessor to the static reference catalogues (monsters,
//! weapons, armour, spells, items) and instance factories that stamp a
//! fresh UUID onto a copy of a compendium entry. Never interprets rules.

use crate::dice::ArmorType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CompendiumError {
    #[error("failed to read compendium file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse compendium file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("no entry named '{0}' in {1}")]
    NotFound(String, &'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonsterAction {
    pub name: String,
    pub kind: ActionKind,
    pub attack_bonus: i32,
    pub damage_expression: String,
    pub damage_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Melee,
    Ranged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonsterEntry {
    pub id: String,
    pub name: String,
    pub challenge_rating: String,
    pub experience: u64,
    pub armor_class: i32,
    pub hp_max: i32,
    pub dexterity_modifier: i32,
    pub actions: Vec<MonsterAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponEntry {
    pub id: String,
    pub name: String,
    pub damage_expression: String,
    pub damage_type: String,
    pub finesse: bool,
    pub ranged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmorEntry {
    pub id: String,
    pub name: String,
    pub base_ac: i32,
    pub armor_type: ArmorType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellEntry {
    pub id: String,
    pub name: String,
    pub level: u32,
    pub requires_target: bool,
    pub damage_expression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEntry {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CompendiumFiles {
    #[serde(default)]
    monsters: Vec<MonsterEntry>,
    #[serde(default)]
    weapons: Vec<WeaponEntry>,
    #[serde(default)]
    armor: Vec<ArmorEntry>,
    #[serde(default)]
    spells: Vec<SpellEntry>,
    #[serde(default)]
    items: Vec<ItemEntry>,
}

/// In-memory read-only view over the reference catalogues.
#[derive(Debug, Clone, Default)]
pub struct Compendium {
    monsters: HashMap<String, MonsterEntry>,
    weapons: HashMap<String, WeaponEntry>,
    armor: HashMap<String, ArmorEntry>,
    spells: HashMap<String, SpellEntry>,
    items: HashMap<String, ItemEntry>,
}

impl Compendium {
    /// Load `monsters.json`, `weapons.json`, `armour.json`, `spells.json`,
    /// `items.json` from `dir`. A missing file at startup is fatal, per the
    /// error-handling design's one startup-fatal class.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, CompendiumError> {
        let dir = dir.as_ref();
        let monsters: Vec<MonsterEntry> = read_catalogue(dir, "monsters.json")?;
        let weapons: Vec<WeaponEntry> = read_catalogue(dir, "weapons.json")?;
        let armor: Vec<ArmorEntry> = read_catalogue(dir, "armour.json")?;
        let spells: Vec<SpellEntry> = read_catalogue(dir, "spells.json")?;
        let items: Vec<ItemEntry> = read_catalogue(dir, "items.json")?;

        Ok(Self {
            monsters: monsters.into_iter().map(|m| (m.id.clone(), m)).collect(),
            weapons: weapons.into_iter().map(|w| (w.id.clone(), w)).collect(),
            armor: armor.into_iter().map(|a| (a.id.clone(), a)).collect(),
            spells: spells.into_iter().map(|s| (s.id.clone(), s)).collect(),
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
        })
    }

    /// Build a compendium directly from in-memory entries, bypassing disk
    /// I/O entirely. Used by combat-engine and validator tests that want a
    /// small, fixed catalogue instead of the real on-disk one.
    pub fn from_entries(monsters: Vec<MonsterEntry>, weapons: Vec<WeaponEntry>, armor: Vec<ArmorEntry>, spells: Vec<SpellEntry>, items: Vec<ItemEntry>) -> Self {
        Self {
            monsters: monsters.into_iter().map(|m| (m.id.clone(), m)).collect(),
            weapons: weapons.into_iter().map(|w| (w.id.clone(), w)).collect(),
            armor: armor.into_iter().map(|a| (a.id.clone(), a)).collect(),
            spells: spells.into_iter().map(|s| (s.id.clone(), s)).collect(),
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
        }
    }

    pub fn monster(&self, id: &str) -> Option<&MonsterEntry> {
        self.monsters.get(id)
    }

    pub fn weapon(&self, id: &str) -> Option<&WeaponEntry> {
        self.weapons.get(id)
    }

    pub fn armor(&self, id: &str) -> Option<&ArmorEntry> {
        self.armor.get(id)
    }

    pub fn spell(&self, id: &str) -> Option<&SpellEntry> {
        self.spells.get(id)
    }

    pub fn item(&self, id: &str) -> Option<&ItemEntry> {
        self.items.get(id)
    }

    pub fn list_monsters(&self) -> Vec<&MonsterEntry> {
        self.monsters.values().collect()
    }

    pub fn list_weapons(&self) -> Vec<&WeaponEntry> {
        self.weapons.values().collect()
    }

    pub fn list_spells(&self) -> Vec<&SpellEntry> {
        self.spells.values().collect()
    }

    /// Substring search across every category's display name.
    pub fn search(&self, query: &str) -> Vec<String> {
        let q = query.to_lowercase();
        let mut hits = Vec::new();
        hits.extend(self.monsters.values().filter(|m| m.name.to_lowercase().contains(&q)).map(|m| format!("monster:{}", m.id)));
        hits.extend(self.weapons.values().filter(|w| w.name.to_lowercase().contains(&q)).map(|w| format!("weapon:{}", w.id)));
        hits.extend(self.armor.values().filter(|a| a.name.to_lowercase().contains(&q)).map(|a| format!("armor:{}", a.id)));
        hits.extend(self.spells.values().filter(|s| s.name.to_lowercase().contains(&q)).map(|s| format!("spell:{}", s.id)));
        hits.extend(self.items.values().filter(|i| i.name.to_lowercase().contains(&q)).map(|i| format!("item:{}", i.id)));
        hits
    }

    /// Stamp a fresh instance of a monster for combat, with a new UUID.
    pub fn instantiate_monster(&self, id: &str) -> Result<MonsterInstance, CompendiumError> {
        let entry = self.monster(id).ok_or_else(|| CompendiumError::NotFound(id.to_string(), "monsters"))?;
        Ok(MonsterInstance { instance_id: Uuid::new_v4(), source: entry.clone() })
    }
}

#[derive(Debug, Clone)]
pub struct MonsterInstance {
    pub instance_id: Uuid,
    pub source: MonsterEntry,
}

fn read_catalogue<T: serde::de::DeserializeOwned>(dir: &Path, file: &str) -> Result<Vec<T>, CompendiumError> {
    let path = dir.join(file);
    let content = std::fs::read_to_string(&path).map_err(|source| CompendiumError::Read { path: path.display().to_string(), source })?;
    serde_json::from_str(&content).map_err(|source| CompendiumError::Parse { path: path.display().to_string(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Compendium {
        let mut monsters = HashMap::new();
        monsters.insert(
            "goblin".to_string(),
            MonsterEntry {
                id: "goblin".to_string(),
                name: "Goblin".to_string(),
                challenge_rating: "1/4".to_string(),
                experience: 50,
                armor_class: 15,
                hp_max: 7,
                dexterity_modifier: 2,
                actions: vec![MonsterAction {
                    name: "Scimitar".to_string(),
                    kind: ActionKind::Melee,
                    attack_bonus: 4,
                    damage_expression: "1d6+2".to_string(),
                    damage_type: "slashing".to_string(),
                }],
            },
        );
        Compendium { monsters, ..Default::default() }
    }

    #[test]
    fn instantiate_assigns_fresh_uuid_each_time() {
        let compendium = fixture();
        let a = compendium.instantiate_monster("goblin").unwrap();
        let b = compendium.instantiate_monster("goblin").unwrap();
        assert_ne!(a.instance_id, b.instance_id);
        assert_eq!(a.source.name, "Goblin");
    }

    #[test]
    fn missing_entry_is_not_found_not_panic() {
        let compendium = fixture();
        assert!(matches!(compendium.instantiate_monster("dragon"), Err(CompendiumError::NotFound(_, _))));
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let compendium = fixture();
        assert_eq!(compendium.search("gob"), vec!["monster:goblin".to_string()]);
    }
}
