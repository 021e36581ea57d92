//! Free-text → typed-action normalisation.
//!
//! A layered strategy: pre-clean, check generic-action verbs, then spell
//! names, then skill names, then a bilingual verb→intent table, then
//! item-ish nouns, finally `unknown`. Ambiguity resolution fills in a
//! missing target/weapon when the scene makes the choice unambiguous. An
//! optional LLM-fallback closure fills non-critical blanks only.

use crate::character::SKILLS;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Attack,
    Spell,
    Movement,
    Skill,
    GenericAction,
    Item,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Pattern,
    Llm,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedAction {
    pub kind: ActionKind,
    pub data: HashMap<String, serde_json::Value>,
    pub confidence: f32,
    pub missing_required: Vec<String>,
    pub advisories: Vec<String>,
    pub origin: Origin,
    pub needs_clarification: bool,
}

impl NormalizedAction {
    fn recompute_clarification(&mut self) {
        self.needs_clarification = !self.missing_required.is_empty();
    }
}

/// Scene context the normaliser consults to resolve ambiguity — e.g. fill
/// in a target when there is exactly one live enemy.
pub struct SceneContext {
    pub live_enemy_ids: Vec<String>,
    pub equipped_weapon_ids: Vec<String>,
    pub known_spell_ids: Vec<String>,
    pub remaining_speed: u32,
}

const GENERIC_VERBS: &[(&str, &str)] = &[
    ("correr", "dash"),
    ("dash", "dash"),
    ("esquivar", "dodge"),
    ("dodge", "dodge"),
    ("desvincular", "disengage"),
    ("disengage", "disengage"),
    ("ayudar", "help"),
    ("help", "help"),
    ("esconder", "hide"),
    ("ocultar", "hide"),
    ("hide", "hide"),
    ("buscar", "search"),
    ("search", "search"),
    ("preparar", "ready"),
    ("ready", "ready"),
];

/// Bilingual verb → intent table. Each entry lists synonyms (Spanish and
/// English) for one intent kind.
const VERB_INTENT_TABLE: &[(ActionKind, &[&str])] = &[
    (ActionKind::Attack, &["atacar", "ataco", "golpear", "golpeo", "pegar", "attack", "strike", "hit"]),
    (ActionKind::Movement, &["mover", "muevo", "avanzar", "avanzo", "caminar", "move", "advance", "walk"]),
    (ActionKind::Spell, &["lanzar", "lanzo", "conjurar", "conjuro", "cast"]),
];

const ITEM_NOUNS: &[&str] = &["pocion", "poción", "potion", "pergamino", "scroll"];

pub struct Normalizer<'a> {
    pub llm_fallback: Option<Box<dyn Fn(&NormalizedAction, &SceneContext) -> HashMap<String, serde_json::Value> + 'a>>,
}

impl<'a> Normalizer<'a> {
    pub fn new() -> Self {
        Self { llm_fallback: None }
    }

    pub fn with_llm_fallback(
        mut self,
        fallback: impl Fn(&NormalizedAction, &SceneContext) -> HashMap<String, serde_json::Value> + 'a,
    ) -> Self {
        self.llm_fallback = Some(Box::new(fallback));
        self
    }

    pub fn normalize(&self, text: &str, scene: &SceneContext) -> NormalizedAction {
        let cleaned = preclean(text);

        let mut action = if let Some(action_id) = detect_generic_verb(&cleaned) {
            generic_action(action_id)
        } else if let Some(spell_id) = detect_spell(&cleaned, &scene.known_spell_ids) {
            spell_action(spell_id)
        } else if let Some(skill) = detect_skill(&cleaned) {
            skill_action(skill)
        } else if let Some(kind) = detect_verb_intent(&cleaned) {
            match kind {
                ActionKind::Attack => attack_action(&cleaned),
                ActionKind::Movement => movement_action(&cleaned),
                ActionKind::Spell => spell_action_unknown(),
                _ => unknown_action(),
            }
        } else if detect_item_noun(&cleaned) {
            item_action(&cleaned)
        } else {
            unknown_action()
        };

        resolve_ambiguity(&mut action, scene);

        if action.needs_clarification {
            if let Some(fallback) = &self.llm_fallback {
                let non_critical_blank = !matches!(action.kind, ActionKind::Attack | ActionKind::Spell | ActionKind::Skill)
                    || action.missing_required.iter().all(|f| f != "target" && f != "spell_id" && f != "skill" && f != "action_id");
                if non_critical_blank {
                    let filled = fallback(&action, scene);
                    for (k, v) in filled {
                        action.data.entry(k.clone()).or_insert(v);
                        action.missing_required.retain(|m| m != &k);
                    }
                    action.origin = Origin::Llm;
                    action.confidence = action.confidence.min(0.7);
                    action.recompute_clarification();
                }
            }
        }

        action
    }
}

impl<'a> Default for Normalizer<'a> {
    fn default() -> Self {
        Self::new()
    }
}

fn preclean(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered.chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

fn detect_generic_verb(text: &str) -> Option<&'static str> {
    GENERIC_VERBS.iter().find(|(verb, _)| text.split_whitespace().any(|w| w == *verb)).map(|(_, id)| *id)
}

fn detect_spell(text: &str, known_spells: &[String]) -> Option<String> {
    known_spells.iter().find(|s| text.contains(s.as_str())).cloned()
}

const SKILL_KEYWORDS: &[(&str, &[&str])] = &[
    ("acrobatics", &["acrobacias", "acrobacia", "acrobatics"]),
    ("animal_handling", &["trato con animales", "animal handling"]),
    ("arcana", &["arcanos", "arcano", "arcana"]),
    ("athletics", &["atletismo", "athletics"]),
    ("deception", &["enganar", "mentir", "deception", "deceive"]),
    ("history", &["historia", "history"]),
    ("insight", &["perspicacia", "insight"]),
    ("intimidation", &["intimidar", "intimidacion", "intimidate", "intimidation"]),
    ("investigation", &["investigar", "investigacion", "investigate", "investigation"]),
    ("medicine", &["medicina", "medicine"]),
    ("nature", &["naturaleza", "nature"]),
    ("perception", &["percepcion", "perception", "percibir"]),
    ("performance", &["interpretacion", "performance"]),
    ("persuasion", &["persuadir", "persuasion", "persuade"]),
    ("religion", &["religion"]),
    ("sleight_of_hand", &["juego de manos", "sleight of hand"]),
    ("stealth", &["sigilo", "stealth"]),
    ("survival", &["supervivencia", "survival"]),
];

fn detect_skill(text: &str) -> Option<&'static str> {
    let folded = fold_accents(text);
    SKILL_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| folded.contains(k)))
        .map(|(id, _)| {
            debug_assert!(SKILLS.contains(id));
            *id
        })
}

fn detect_verb_intent(text: &str) -> Option<ActionKind> {
    VERB_INTENT_TABLE.iter().find(|(_, verbs)| verbs.iter().any(|v| text.split_whitespace().any(|w| w == *v))).map(|(kind, _)| *kind)
}

fn detect_item_noun(text: &str) -> bool {
    ITEM_NOUNS.iter().any(|n| text.contains(n))
}

fn attack_action(text: &str) -> NormalizedAction {
    let mut data = HashMap::new();
    let mut missing = Vec::new();

    if let Some(target) = extract_after(text, &["al", "a la", "a", "the"]) {
        data.insert("target".to_string(), serde_json::json!(target));
    } else {
        missing.push("target".to_string());
    }

    if let Some(weapon) = extract_weapon_mention(text) {
        data.insert("weapon_id".to_string(), serde_json::json!(weapon));
    }

    let mut action = NormalizedAction {
        kind: ActionKind::Attack,
        data,
        confidence: 0.8,
        missing_required: missing,
        advisories: Vec::new(),
        origin: Origin::Pattern,
        needs_clarification: false,
    };
    action.recompute_clarification();
    action
}

fn movement_action(text: &str) -> NormalizedAction {
    let mut data = HashMap::new();
    let mut missing = Vec::new();
    if let Some(feet) = extract_number(text) {
        data.insert("feet".to_string(), serde_json::json!(feet));
    } else {
        missing.push("feet".to_string());
    }
    let mut action = NormalizedAction { kind: ActionKind::Movement, data, confidence: 0.7, missing_required: missing, advisories: Vec::new(), origin: Origin::Pattern, needs_clarification: false };
    action.recompute_clarification();
    action
}

fn spell_action(spell_id: String) -> NormalizedAction {
    let mut data = HashMap::new();
    data.insert("spell_id".to_string(), serde_json::json!(spell_id));
    let mut action = NormalizedAction { kind: ActionKind::Spell, data, confidence: 0.9, missing_required: Vec::new(), advisories: Vec::new(), origin: Origin::Pattern, needs_clarification: false };
    action.recompute_clarification();
    action
}

fn spell_action_unknown() -> NormalizedAction {
    let mut action = NormalizedAction {
        kind: ActionKind::Spell,
        data: HashMap::new(),
        confidence: 0.5,
        missing_required: vec!["spell_id".to_string()],
        advisories: Vec::new(),
        origin: Origin::Pattern,
        needs_clarification: false,
    };
    action.recompute_clarification();
    action
}

fn skill_action(skill: &'static str) -> NormalizedAction {
    let mut data = HashMap::new();
    data.insert("skill".to_string(), serde_json::json!(skill));
    let mut action = NormalizedAction { kind: ActionKind::Skill, data, confidence: 0.85, missing_required: Vec::new(), advisories: Vec::new(), origin: Origin::Pattern, needs_clarification: false };
    action.recompute_clarification();
    action
}

fn generic_action(action_id: &'static str) -> NormalizedAction {
    let mut data = HashMap::new();
    data.insert("action_id".to_string(), serde_json::json!(action_id));
    let mut action = NormalizedAction { kind: ActionKind::GenericAction, data, confidence: 0.95, missing_required: Vec::new(), advisories: Vec::new(), origin: Origin::Pattern, needs_clarification: false };
    action.recompute_clarification();
    action
}

fn item_action(text: &str) -> NormalizedAction {
    let mut data = HashMap::new();
    for noun in ITEM_NOUNS {
        if text.contains(noun) {
            data.insert("item_name".to_string(), serde_json::json!(noun));
            break;
        }
    }
    let mut action = NormalizedAction { kind: ActionKind::Item, data, confidence: 0.6, missing_required: Vec::new(), advisories: Vec::new(), origin: Origin::Pattern, needs_clarification: false };
    action.recompute_clarification();
    action
}

fn unknown_action() -> NormalizedAction {
    NormalizedAction { kind: ActionKind::Unknown, data: HashMap::new(), confidence: 0.0, missing_required: Vec::new(), advisories: Vec::new(), origin: Origin::Pattern, needs_clarification: false }
}

fn extract_after<'a>(text: &'a str, markers: &[&str]) -> Option<&'a str> {
    for marker in markers {
        if let Some(pos) = text.find(&format!(" {marker} ")) {
            let start = pos + marker.len() + 2;
            let rest = &text[start..];
            if !rest.is_empty() {
                return Some(rest.split_whitespace().next().unwrap_or(rest));
            }
        }
    }
    None
}

fn extract_weapon_mention(text: &str) -> Option<String> {
    const WEAPON_WORDS: &[&str] = &["espada", "daga", "arco", "hacha", "lanza", "sword", "dagger", "bow", "axe", "spear"];
    WEAPON_WORDS.iter().find(|w| text.contains(**w)).map(|w| w.to_string())
}

fn extract_number(text: &str) -> Option<u32> {
    text.split_whitespace().find_map(|w| w.parse().ok())
}

/// Fill a missing target when exactly one enemy is alive, or a missing
/// weapon when exactly one weapon is equipped; note the inference as an
/// advisory either way.
fn resolve_ambiguity(action: &mut NormalizedAction, scene: &SceneContext) {
    if action.kind == ActionKind::Attack {
        if action.missing_required.contains(&"target".to_string()) && scene.live_enemy_ids.len() == 1 {
            let only = scene.live_enemy_ids[0].clone();
            action.data.insert("target".to_string(), serde_json::json!(only.clone()));
            action.missing_required.retain(|f| f != "target");
            action.advisories.push(format!("inferred target '{only}' as the only live enemy"));
        }
        if !action.data.contains_key("weapon_id") && scene.equipped_weapon_ids.len() == 1 {
            let only = scene.equipped_weapon_ids[0].clone();
            action.data.insert("weapon_id".to_string(), serde_json::json!(only.clone()));
            action.advisories.push(format!("inferred weapon '{only}' as the only equipped weapon"));
        }
    }
    action.recompute_clarification();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(enemies: usize, weapons: usize) -> SceneContext {
        SceneContext {
            live_enemy_ids: (0..enemies).map(|i| format!("goblin_{i}")).collect(),
            equipped_weapon_ids: (0..weapons).map(|i| format!("weapon_{i}")).collect(),
            known_spell_ids: Vec::new(),
            remaining_speed: 30,
        }
    }

    #[test]
    fn bare_atacar_fills_single_enemy_and_weapon() {
        let normalizer = Normalizer::new();
        let action = normalizer.normalize("ataco", &scene(1, 1));
        assert_eq!(action.kind, ActionKind::Attack);
        assert!(!action.needs_clarification);
        assert!(!action.advisories.is_empty());
    }

    #[test]
    fn ambiguous_multiple_enemies_needs_clarification() {
        let normalizer = Normalizer::new();
        let action = normalizer.normalize("ataco", &scene(3, 1));
        assert!(action.needs_clarification);
        assert!(action.missing_required.contains(&"target".to_string()));
    }

    #[test]
    fn generic_verb_detected_before_verb_table() {
        let normalizer = Normalizer::new();
        let action = normalizer.normalize("esquivar", &scene(1, 1));
        assert_eq!(action.kind, ActionKind::GenericAction);
        assert_eq!(action.data.get("action_id").unwrap(), "dodge");
    }

    #[test]
    fn english_attack_verb_also_recognised() {
        let normalizer = Normalizer::new();
        let action = normalizer.normalize("attack the goblin", &scene(1, 1));
        assert_eq!(action.kind, ActionKind::Attack);
    }

    #[test]
    fn unrecognised_text_is_unknown() {
        let normalizer = Normalizer::new();
        let action = normalizer.normalize("xyzzy plugh", &scene(1, 1));
        assert_eq!(action.kind, ActionKind::Unknown);
    }

    #[test]
    fn llm_fallback_only_fills_non_critical_blanks_and_caps_confidence() {
        // "avanzar" with no distance leaves only "feet" blank, which is not
        // one of the critical fields (target/spell_id/skill/action_id), so
        // the fallback is allowed to fill it in.
        let normalizer = Normalizer::new().with_llm_fallback(|_action, _scene| {
            let mut fill = HashMap::new();
            fill.insert("feet".to_string(), serde_json::json!(10));
            fill
        });
        let action = normalizer.normalize("avanzar", &scene(1, 1));
        assert!(!action.needs_clarification);
        assert!(action.confidence <= 0.7);
        assert_eq!(action.origin, Origin::Llm);
    }

    #[test]
    fn llm_fallback_refuses_to_fill_a_critical_blank() {
        let normalizer = Normalizer::new().with_llm_fallback(|_action, _scene| {
            let mut fill = HashMap::new();
            fill.insert("target".to_string(), serde_json::json!("goblin_0"));
            fill
        });
        let action = normalizer.normalize("ataco", &scene(3, 1));
        assert!(action.needs_clarification);
        assert_eq!(action.origin, Origin::Pattern);
    }
}
