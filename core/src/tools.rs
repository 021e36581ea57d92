//! The tool registry: self-describing named operations the DM
//! orchestrator can dispatch to, each validated against a small parameter
//! schema before it runs.

use crate::character::Character;
use crate::combat::{CombatError, Combatant, DamageDelta, EncounterState, StateDelta};
use crate::compendium::Compendium;
use crate::dice::{self, Advantage};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Int,
    Float,
    Bool,
    List,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub allowed_values: Option<Vec<String>>,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self { name: name.to_string(), kind, required: true, allowed_values: None, description: description.to_string() }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self { name: name.to_string(), kind, required: false, allowed_values: None, description: description.to_string() }
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.allowed_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub family: ToolFamily,
    pub parameters: Vec<ParamSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFamily {
    Inspection,
    Rolls,
    State,
    /// Transitions the session into combat; callable with no encounter active.
    CombatSetup,
    /// Requires an encounter already in progress; `is_combat_only` matches this family.
    Combat,
}

/// Everything a tool handler needs to mutate or read live game state.
/// `encounter` is `None` outside combat; combat-only tools must check it.
pub struct ToolContext<'a> {
    pub character: &'a mut Character,
    pub compendium: &'a Compendium,
    pub encounter: &'a mut Option<EncounterState>,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub result: serde_json::Value,
    pub error: Option<String>,
}

impl ToolOutcome {
    fn ok(result: serde_json::Value) -> Self {
        Self { success: true, result, error: None }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self { success: false, result: serde_json::Value::Null, error: Some(error.into()) }
    }
}

type ToolHandler = Box<dyn Fn(&mut ToolContext, &HashMap<String, serde_json::Value>) -> Result<serde_json::Value, String> + Send + Sync>;

struct RegisteredTool {
    spec: ToolSpec,
    handler: ToolHandler,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec, handler: ToolHandler) {
        self.tools.insert(spec.name.clone(), RegisteredTool { spec, handler });
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    pub fn list(&self) -> Vec<&ToolSpec> {
        self.tools.values().map(|t| &t.spec).collect()
    }

    pub fn is_combat_only(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.spec.family == ToolFamily::Combat).unwrap_or(false)
    }

    /// Validate required parameters and enum constraints, run the tool,
    /// and convert any handler error into `{success:false, error}` rather
    /// than propagating it.
    pub fn execute(&self, name: &str, ctx: &mut ToolContext, params: HashMap<String, serde_json::Value>) -> ToolOutcome {
        let span = tracing::info_span!("tool_execute", tool = name);
        let _enter = span.enter();

        let Some(registered) = self.tools.get(name) else {
            tracing::warn!(tool = name, "no such tool registered");
            return ToolOutcome::fail(format!("no such tool: {name}"));
        };

        for param in &registered.spec.parameters {
            if param.required && !params.contains_key(&param.name) {
                return ToolOutcome::fail(format!("missing required parameter '{}'", param.name));
            }
            if let (Some(value), Some(allowed)) = (params.get(&param.name), &param.allowed_values) {
                if let Some(s) = value.as_str() {
                    if !allowed.iter().any(|a| a == s) {
                        return ToolOutcome::fail(format!("'{}' is not a valid value for '{}'", s, param.name));
                    }
                }
            }
        }

        match (registered.handler)(ctx, &params) {
            Ok(result) => ToolOutcome::ok(result),
            Err(error) => {
                tracing::warn!(tool = name, error = %error, "tool handler returned an error");
                ToolOutcome::fail(error)
            }
        }
    }

    /// The canonical textual catalogue injected into the DM system prompt.
    pub fn describe_for_model(&self) -> String {
        let mut tools: Vec<&RegisteredTool> = self.tools.values().collect();
        tools.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));

        let mut out = String::new();
        for tool in tools {
            out.push_str(&format!("- {}: {}\n", tool.spec.name, tool.spec.description));
            for param in &tool.spec.parameters {
                let req = if param.required { "required" } else { "optional" };
                out.push_str(&format!("    {} ({:?}, {}): {}\n", param.name, param.kind, req, param.description));
            }
        }
        out
    }
}

fn param_str<'a>(params: &'a HashMap<String, serde_json::Value>, key: &str) -> Result<&'a str, String> {
    params.get(key).and_then(|v| v.as_str()).ok_or_else(|| format!("'{key}' must be a string"))
}

fn param_i64(params: &HashMap<String, serde_json::Value>, key: &str) -> Result<i64, String> {
    params.get(key).and_then(|v| v.as_i64()).ok_or_else(|| format!("'{key}' must be an integer"))
}

/// Attack and damage bonus for a weapon attack: proficiency bonus (if the
/// character is proficient with it) plus the relevant ability modifier —
/// STR for melee, the better of STR/DEX for finesse, DEX for ranged.
fn weapon_bonuses(character: &mut Character, weapon: &crate::compendium::WeaponEntry) -> (i32, i32) {
    let proficient = character.competencias.weapons.iter().any(|w| w == &weapon.id);
    let proficiency_bonus = character.derived().proficiency_bonus;
    let str_mod = character.caracteristicas.modifier(crate::character::Ability::Strength);
    let dex_mod = character.caracteristicas.modifier(crate::character::Ability::Dexterity);
    let ability_mod = if weapon.ranged {
        dex_mod
    } else if weapon.finesse {
        str_mod.max(dex_mod)
    } else {
        str_mod
    };
    let attack_bonus = ability_mod + if proficient { proficiency_bonus } else { 0 };
    (attack_bonus, ability_mod)
}

/// Build a registry populated with every built-in tool.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolSpec {
            name: "consult_sheet".to_string(),
            description: "Read the acting character's full sheet.".to_string(),
            family: ToolFamily::Inspection,
            parameters: vec![],
        },
        Box::new(|ctx, _params| Ok(serde_json::to_value(&*ctx.character).map_err(|e| e.to_string())?)),
    );

    registry.register(
        ToolSpec {
            name: "consult_monster".to_string(),
            description: "Look up a monster's compendium entry by id.".to_string(),
            family: ToolFamily::Inspection,
            parameters: vec![ParamSpec::required("monster_id", ParamKind::String, "compendium monster id")],
        },
        Box::new(|ctx, params| {
            let id = param_str(params, "monster_id")?;
            let entry = ctx.compendium.monster(id).ok_or_else(|| format!("unknown monster '{id}'"))?;
            serde_json::to_value(entry).map_err(|e| e.to_string())
        }),
    );

    registry.register(
        ToolSpec {
            name: "consult_item".to_string(),
            description: "Look up an item's compendium entry by id.".to_string(),
            family: ToolFamily::Inspection,
            parameters: vec![ParamSpec::required("item_id", ParamKind::String, "compendium item id")],
        },
        Box::new(|ctx, params| {
            let id = param_str(params, "item_id")?;
            let entry = ctx.compendium.item(id).ok_or_else(|| format!("unknown item '{id}'"))?;
            serde_json::to_value(entry).map_err(|e| e.to_string())
        }),
    );

    registry.register(
        ToolSpec {
            name: "roll_skill".to_string(),
            description: "Roll a d20 skill check for the acting character.".to_string(),
            family: ToolFamily::Rolls,
            parameters: vec![ParamSpec::required("skill", ParamKind::String, "one of the 18 skills").with_enum(&crate::character::SKILLS)],
        },
        Box::new(|ctx, params| {
            let skill = param_str(params, "skill")?.to_string();
            let modifier = ctx.character.derived().skill_bonuses.get(&skill).copied().unwrap_or(0);
            let roll = dice::DiceExpression::new(1, dice::DieType::D20, modifier).map_err(|e| e.to_string())?.roll(Advantage::Normal);
            Ok(serde_json::json!({ "skill": skill, "total": roll.total, "natural": roll.natural_20 }))
        }),
    );

    registry.register(
        ToolSpec {
            name: "roll_save".to_string(),
            description: "Roll a saving throw for the acting character.".to_string(),
            family: ToolFamily::Rolls,
            parameters: vec![ParamSpec::required("ability", ParamKind::String, "strength|dexterity|constitution|intelligence|wisdom|charisma")],
        },
        Box::new(|ctx, params| {
            let ability_name = param_str(params, "ability")?;
            let ability = match ability_name {
                "strength" => crate::character::Ability::Strength,
                "dexterity" => crate::character::Ability::Dexterity,
                "constitution" => crate::character::Ability::Constitution,
                "intelligence" => crate::character::Ability::Intelligence,
                "wisdom" => crate::character::Ability::Wisdom,
                "charisma" => crate::character::Ability::Charisma,
                other => return Err(format!("unknown ability '{other}'")),
            };
            let key = format!("{ability:?}");
            let modifier = ctx.character.derived().save_bonuses.get(&key).copied().unwrap_or(0);
            let roll = dice::DiceExpression::new(1, dice::DieType::D20, modifier).map_err(|e| e.to_string())?.roll(Advantage::Normal);
            Ok(serde_json::json!({ "ability": ability_name, "total": roll.total }))
        }),
    );

    registry.register(
        ToolSpec {
            name: "roll_attack".to_string(),
            description: "Roll an attack with the currently equipped weapon; on hit or crit also rolls damage.".to_string(),
            family: ToolFamily::Rolls,
            parameters: vec![ParamSpec::required("target_ac", ParamKind::Int, "armor class of the target")],
        },
        Box::new(|ctx, params| {
            let target_ac = param_i64(params, "target_ac")? as i32;
            let compendium_ref = ctx.character.equipo.equipped_weapon().ok_or("no weapon equipped")?.compendium_ref.clone();
            let weapon_entry = ctx.compendium.weapon(&compendium_ref).ok_or("equipped weapon not in compendium")?.clone();
            let (attack_bonus, damage_bonus) = weapon_bonuses(ctx.character, &weapon_entry);
            let attack_roll = dice::DiceExpression::new(1, dice::DieType::D20, attack_bonus).map_err(|e| e.to_string())?.roll(Advantage::Normal);
            let hit = attack_roll.meets_dc(target_ac);
            let damage = if hit {
                let expr = format!("{}+{}", weapon_entry.damage_expression, damage_bonus);
                Some(dice::roll_damage(&expr, attack_roll.is_critical()).map_err(|e| e.to_string())?.total)
            } else {
                None
            };
            Ok(serde_json::json!({ "attack_roll": attack_roll.total, "hit": hit, "critical": attack_roll.is_critical(), "damage": damage }))
        }),
    );

    registry.register(
        ToolSpec {
            name: "modify_hp".to_string(),
            description: "Directly adjust the acting character's current HP (positive heals, negative damages).".to_string(),
            family: ToolFamily::State,
            parameters: vec![ParamSpec::required("delta", ParamKind::Int, "signed HP change")],
        },
        Box::new(|ctx, params| {
            let delta = param_i64(params, "delta")? as i32;
            if delta >= 0 {
                ctx.character.heal(delta);
            } else {
                ctx.character.apply_damage(-delta);
            }
            Ok(serde_json::json!({ "hp_current": ctx.character.hp_current }))
        }),
    );

    registry.register(
        ToolSpec {
            name: "give_item".to_string(),
            description: "Add an item stack to the acting character's inventory.".to_string(),
            family: ToolFamily::State,
            parameters: vec![
                ParamSpec::required("item_id", ParamKind::String, "compendium item id"),
                ParamSpec::optional("quantity", ParamKind::Int, "how many (default 1)"),
            ],
        },
        Box::new(|ctx, params| {
            let item_id = param_str(params, "item_id")?.to_string();
            let quantity = params.get("quantity").and_then(|v| v.as_i64()).unwrap_or(1).max(1) as u32;
            if let Some(stack) = ctx.character.equipo.items.iter_mut().find(|s| s.compendium_ref == item_id) {
                stack.count += quantity;
            } else {
                let name = ctx.compendium.item(&item_id).map(|i| i.name.clone()).unwrap_or_else(|| item_id.clone());
                ctx.character.equipo.items.push(crate::character::ItemStack {
                    instance_id: Uuid::new_v4(),
                    compendium_ref: item_id.clone(),
                    name,
                    count: quantity,
                });
            }
            Ok(serde_json::json!({ "item_id": item_id, "quantity": quantity }))
        }),
    );

    registry.register(
        ToolSpec {
            name: "remove_item".to_string(),
            description: "Remove (up to) a quantity of an item stack from the acting character's inventory.".to_string(),
            family: ToolFamily::State,
            parameters: vec![
                ParamSpec::required("item_id", ParamKind::String, "compendium item id"),
                ParamSpec::optional("quantity", ParamKind::Int, "how many (default 1)"),
            ],
        },
        Box::new(|ctx, params| {
            let item_id = param_str(params, "item_id")?;
            let quantity = params.get("quantity").and_then(|v| v.as_i64()).unwrap_or(1).max(1) as u32;
            let inventory = &mut ctx.character.equipo.items;
            if let Some(pos) = inventory.iter().position(|s| s.compendium_ref == item_id) {
                inventory[pos].count = inventory[pos].count.saturating_sub(quantity);
                if inventory[pos].count == 0 {
                    inventory.remove(pos);
                }
                Ok(serde_json::json!({ "item_id": item_id, "removed": quantity }))
            } else {
                Err(format!("'{item_id}' is not in the inventory"))
            }
        }),
    );

    registry.register(
        ToolSpec {
            name: "modify_gold".to_string(),
            description: "Adjust the acting character's coinpurse; rejects a change that would make any denomination negative.".to_string(),
            family: ToolFamily::State,
            parameters: vec![ParamSpec::required("gold_delta", ParamKind::Int, "signed gold change")],
        },
        Box::new(|ctx, params| {
            let delta = param_i64(params, "gold_delta")?;
            let new_total = ctx.character.equipo.coins.gold + delta;
            if new_total < 0 {
                return Err("insufficient gold for this change".to_string());
            }
            ctx.character.equipo.coins.gold = new_total;
            Ok(serde_json::json!({ "gold": ctx.character.equipo.coins.gold }))
        }),
    );

    registry.register(
        ToolSpec {
            name: "list_monsters".to_string(),
            description: "List every monster in the compendium.".to_string(),
            family: ToolFamily::Inspection,
            parameters: vec![],
        },
        Box::new(|ctx, _params| {
            let ids: Vec<&str> = ctx.compendium.list_monsters().into_iter().map(|m| m.id.as_str()).collect();
            Ok(serde_json::json!({ "monster_ids": ids }))
        }),
    );

    registry.register(
        ToolSpec {
            name: "start_combat".to_string(),
            description: "Start an encounter against the named compendium monsters. Only accepts monster ids that exist in the compendium.".to_string(),
            family: ToolFamily::CombatSetup,
            parameters: vec![ParamSpec::required("monster_ids", ParamKind::List, "compendium monster ids to face")],
        },
        Box::new(|ctx, params| {
            let ids = params.get("monster_ids").and_then(|v| v.as_array()).ok_or("'monster_ids' must be a list")?;
            let mut encounter = EncounterState::new();
            let (attack_bonus, damage_bonus) = ctx
                .character
                .equipo
                .equipped_weapon()
                .and_then(|w| ctx.compendium.weapon(&w.compendium_ref).cloned())
                .map(|entry| weapon_bonuses(ctx.character, &entry))
                .unwrap_or((0, 0));
            let pc_combatant = Combatant {
                id: ctx.actor_id,
                name: ctx.character.info_basica.name.clone(),
                is_player: true,
                is_ally: false,
                initiative: 0,
                dexterity_modifier: ctx.character.caracteristicas.modifier(crate::character::Ability::Dexterity),
                hp_current: ctx.character.hp_current,
                hp_max: ctx.character.hp_max(),
                temp_hp: 0,
                armor_class: ctx.character.derived().armor_class,
                speed: ctx.character.base_speed,
                attack_bonus,
                damage_bonus,
                conditions: Default::default(),
                concentration_target: None,
                monster_actions: Vec::new(),
                spell_slots: None,
                flags: Default::default(),
                inconsciente: false,
                muerto: false,
            };
            encounter.add_combatant(pc_combatant).map_err(|e| e.to_string())?;
            for id_value in ids {
                let id = id_value.as_str().ok_or("monster id must be a string")?;
                let instance = ctx.compendium.instantiate_monster(id).map_err(|e| e.to_string())?;
                encounter.add_combatant(Combatant::from_monster_instance(&instance)).map_err(|e| e.to_string())?;
            }
            encounter.start(true).map_err(|e| e.to_string())?;
            let result = serde_json::json!({ "status": format!("{:?}", encounter.status), "round": encounter.round });
            *ctx.encounter = Some(encounter);
            Ok(result)
        }),
    );

    registry.register(
        ToolSpec {
            name: "damage_enemy".to_string(),
            description: "Apply damage to a combatant, routed through the same guarded delta path as the action pipeline.".to_string(),
            family: ToolFamily::Combat,
            parameters: vec![
                ParamSpec::required("target_id", ParamKind::String, "combatant uuid"),
                ParamSpec::required("amount", ParamKind::Int, "damage amount"),
                ParamSpec::optional("damage_type", ParamKind::String, "damage type (default 'untyped')"),
            ],
        },
        Box::new(|ctx, params| {
            let target_id = param_str(params, "target_id")?;
            let target: Uuid = target_id.parse().map_err(|_| "target_id is not a valid uuid".to_string())?;
            let amount = param_i64(params, "amount")? as i32;
            let damage_type = params.get("damage_type").and_then(|v| v.as_str()).unwrap_or("untyped").to_string();

            let encounter = ctx.encounter.as_mut().ok_or("no active combat")?;
            encounter
                .apply_delta(ctx.actor_id, StateDelta { action_used: true, bonus_action_used: false, movement_used: 0, movement_bonus: 0, damage: Some(DamageDelta { target, amount, damage_type }), slot_consumed: None, temporary_condition: None })
                .map_err(|e: CombatError| e.to_string())?;
            Ok(serde_json::json!({ "target": target_id, "applied": amount }))
        }),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{AbilityScores, BasicInfo};

    fn sample_character() -> Character {
        let info = BasicInfo {
            name: "Thorin".to_string(),
            race: "dwarf".to_string(),
            class: "fighter".to_string(),
            level: 1,
            background: "soldier".to_string(),
            alignment: "lawful_good".to_string(),
            experience: 0,
        };
        let scores = AbilityScores { strength: 16, dexterity: 12, constitution: 14, intelligence: 10, wisdom: 10, charisma: 8 };
        Character::new(Uuid::new_v4(), info, scores, 10, 30)
    }

    #[test]
    fn execute_rejects_missing_required_parameter() {
        let registry = builtin_registry();
        let mut character = sample_character();
        let compendium = Compendium::default();
        let mut encounter = None;
        let mut ctx = ToolContext { character: &mut character, compendium: &compendium, encounter: &mut encounter, actor_id: Uuid::new_v4() };
        let outcome = registry.execute("consult_monster", &mut ctx, HashMap::new());
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("monster_id"));
    }

    #[test]
    fn execute_rejects_invalid_enum_value() {
        let registry = builtin_registry();
        let mut character = sample_character();
        let compendium = Compendium::default();
        let mut encounter = None;
        let mut ctx = ToolContext { character: &mut character, compendium: &compendium, encounter: &mut encounter, actor_id: Uuid::new_v4() };
        let mut params = HashMap::new();
        params.insert("skill".to_string(), serde_json::json!("juggling"));
        let outcome = registry.execute("roll_skill", &mut ctx, params);
        assert!(!outcome.success);
    }

    #[test]
    fn modify_gold_rejects_negative_total() {
        let registry = builtin_registry();
        let mut character = sample_character();
        character.equipo.coins.gold = 5;
        let compendium = Compendium::default();
        let mut encounter = None;
        let mut ctx = ToolContext { character: &mut character, compendium: &compendium, encounter: &mut encounter, actor_id: Uuid::new_v4() };
        let mut params = HashMap::new();
        params.insert("gold_delta".to_string(), serde_json::json!(-10));
        let outcome = registry.execute("modify_gold", &mut ctx, params);
        assert!(!outcome.success);
    }

    #[test]
    fn start_combat_rejects_unknown_monster_id() {
        let registry = builtin_registry();
        let mut character = sample_character();
        let compendium = Compendium::default();
        let mut encounter = None;
        let mut ctx = ToolContext { character: &mut character, compendium: &compendium, encounter: &mut encounter, actor_id: Uuid::new_v4() };
        let mut params = HashMap::new();
        params.insert("monster_ids".to_string(), serde_json::json!(["dragon"]));
        let outcome = registry.execute("start_combat", &mut ctx, params);
        assert!(!outcome.success);
    }

    #[test]
    fn describe_for_model_lists_every_tool_name() {
        let registry = builtin_registry();
        let text = registry.describe_for_model();
        assert!(text.contains("consult_sheet"));
        assert!(text.contains("damage_enemy"));
    }
}
