//! The adventure-bible store: one-shot LLM-backed generation, a filtered
//! DM view that withholds spoilers by act, and an append-only patch log
//! that is the only path to mutating a bible after generation.

use crate::persist::{self, PersistError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const BIBLE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum BibleError {
    #[error("no JSON object found in generation response")]
    NoJsonFound,
    #[error("malformed generation response: {0}")]
    MalformedResponse(String),
    #[error("missing required field '{0}' in generation response")]
    MissingField(String),
    #[error("no bible exists at path {0}")]
    NotFound(PathBuf),
    #[error("unknown patch path: {0}")]
    UnknownPath(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActState {
    Pending,
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BibleMetadata {
    pub id: Uuid,
    pub generated_at: String,
    pub region: String,
    pub tone_id: String,
    pub pc_level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MainQuestState {
    Act1,
    Act2,
    Act3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainQuest {
    pub objective: String,
    pub stakes: String,
    pub initial_hook: String,
    pub state: MainQuestState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Antagonist {
    pub true_identity: String,
    pub facade: String,
    pub motivation: String,
    pub resources: String,
    pub weakness: String,
    pub planned_reveal_act: u32,
    pub foreshadowing_clues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Act {
    pub id: String,
    pub name: String,
    pub objective: String,
    #[serde(default)]
    pub seed_scenes: Vec<String>,
    pub state: ActState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clue {
    pub text: String,
    #[serde(default)]
    pub guaranteed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revelation {
    pub id: String,
    pub summary: String,
    pub act: u32,
    pub clues: Vec<Clue>,
    #[serde(default)]
    pub discovered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NpcStatus {
    Alive,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcRecord {
    pub name: String,
    pub role: String,
    pub secret: String,
    pub initial_attitude: String,
    pub current_attitude: String,
    pub status: NpcStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clock {
    pub id: String,
    pub description: String,
    pub total_segments: u32,
    pub current_segment: u32,
    pub triggering_condition: String,
    pub completion_payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockUrgency {
    Calm,
    Rising,
    Urgent,
    Critical,
}

impl Clock {
    pub fn urgency(&self) -> ClockUrgency {
        if self.total_segments == 0 {
            return ClockUrgency::Calm;
        }
        let fraction = self.current_segment as f32 / self.total_segments as f32;
        if fraction >= 1.0 {
            ClockUrgency::Critical
        } else if fraction >= 0.75 {
            ClockUrgency::Urgent
        } else if fraction >= 0.4 {
            ClockUrgency::Rising
        } else {
            ClockUrgency::Calm
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideQuest {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyTier {
    Canon,
    Flexible,
    Impro,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyContract {
    pub attributes: HashMap<String, ConsistencyTier>,
}

impl ConsistencyContract {
    fn with_canonical_defaults() -> Self {
        let mut attributes = HashMap::new();
        attributes.insert("antagonist.true_identity".to_string(), ConsistencyTier::Canon);
        attributes.insert("main_quest.objective".to_string(), ConsistencyTier::Canon);
        attributes.insert("npcs.secret".to_string(), ConsistencyTier::Canon);
        attributes.insert("acts.seed_scenes".to_string(), ConsistencyTier::Flexible);
        attributes.insert("side_quests".to_string(), ConsistencyTier::Impro);
        Self { attributes }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdventureBible {
    pub version: u32,
    pub metadata: BibleMetadata,
    pub logline: String,
    pub main_quest: MainQuest,
    pub antagonist: Antagonist,
    pub acts: Vec<Act>,
    pub revelations: Vec<Revelation>,
    pub npcs: Vec<NpcRecord>,
    pub clocks: Vec<Clock>,
    pub side_quests: Vec<SideQuest>,
    pub planned_rewards: Vec<String>,
    pub consistency_contract: ConsistencyContract,
}

/// Maximum number of foreshadowing clues surfaced to the model before the
/// reveal act; the rest stay in reserve for later improvisation.
const MAX_VISIBLE_FORESHADOWING_CLUES: usize = 2;

/// The antagonist slice of a `DmView`: the façade and a taste of
/// foreshadowing are always visible, while the identity-bearing fields
/// unlock together once the current act reaches `planned_reveal_act`.
#[derive(Debug, Clone, Serialize)]
pub struct AntagonistView {
    pub facade: String,
    pub foreshadowing_clues: Vec<String>,
    pub true_identity: Option<String>,
    pub motivation: Option<String>,
    pub weakness: Option<String>,
}

/// What the LLM is actually shown: spoilers withheld by current act.
#[derive(Debug, Clone, Serialize)]
pub struct DmView {
    pub logline: String,
    pub main_quest: MainQuest,
    pub antagonist: AntagonistView,
    pub acts: Vec<Act>,
    pub visible_revelation_clues: HashMap<String, Vec<String>>,
    pub npcs: Vec<NpcRecord>,
    pub clocks: Vec<ClockSummary>,
    pub side_quests: Vec<SideQuest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClockSummary {
    pub id: String,
    pub description: String,
    pub segments: u32,
    pub total: u32,
    pub urgency: ClockUrgency,
    pub trigger_summary: String,
}

/// Current act number, inferred from which act record is `active`
/// (falling back to the last `completed` act, else act 1).
fn current_act_number(bible: &AdventureBible) -> u32 {
    bible
        .acts
        .iter()
        .position(|a| a.state == ActState::Active)
        .map(|i| i as u32 + 1)
        .unwrap_or_else(|| bible.acts.iter().filter(|a| a.state == ActState::Completed).count() as u32 + 1)
}

/// Project a bible into what the model is allowed to see right now.
pub fn dm_view(bible: &AdventureBible) -> DmView {
    let act_number = current_act_number(bible);
    let revealed = act_number >= bible.antagonist.planned_reveal_act;

    let antagonist = AntagonistView {
        facade: bible.antagonist.facade.clone(),
        foreshadowing_clues: bible.antagonist.foreshadowing_clues.iter().take(MAX_VISIBLE_FORESHADOWING_CLUES).cloned().collect(),
        true_identity: revealed.then(|| bible.antagonist.true_identity.clone()),
        motivation: revealed.then(|| bible.antagonist.motivation.clone()),
        weakness: revealed.then(|| bible.antagonist.weakness.clone()),
    };

    let mut visible_revelation_clues = HashMap::new();
    for revelation in &bible.revelations {
        if revelation.act <= act_number {
            visible_revelation_clues.insert(revelation.id.clone(), revelation.clues.iter().map(|c| c.text.clone()).collect());
        }
    }

    let clocks = bible
        .clocks
        .iter()
        .map(|c| ClockSummary {
            id: c.id.clone(),
            description: c.description.clone(),
            segments: c.current_segment,
            total: c.total_segments,
            urgency: c.urgency(),
            trigger_summary: c.triggering_condition.clone(),
        })
        .collect();

    DmView {
        logline: bible.logline.clone(),
        main_quest: bible.main_quest.clone(),
        antagonist,
        acts: bible.acts.clone(),
        visible_revelation_clues,
        npcs: bible.npcs.clone(),
        clocks,
        side_quests: bible.side_quests.clone(),
    }
}

/// Extract a JSON object from a raw LLM response: a fenced ```json block,
/// a bare fenced block, or the first top-level `{...}` span.
fn extract_json(raw: &str) -> Result<Value, BibleError> {
    let trimmed = raw.trim();
    let fenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    if let Ok(value) = serde_json::from_str::<Value>(fenced) {
        return Ok(value);
    }

    let start = fenced.find('{').ok_or(BibleError::NoJsonFound)?;
    let end = fenced.rfind('}').ok_or(BibleError::NoJsonFound)?;
    if end <= start {
        return Err(BibleError::NoJsonFound);
    }
    serde_json::from_str(&fenced[start..=end]).map_err(|e| BibleError::MalformedResponse(e.to_string()))
}

fn require_field<'a>(value: &'a Value, path: &str) -> Result<&'a Value, BibleError> {
    value.get(path).ok_or_else(|| BibleError::MissingField(path.to_string()))
}

/// Validate presence of the mandatory skeleton, then fill in every
/// structural default the generation prompt didn't guarantee.
pub fn parse_generation_response(raw: &str, region: String, tone_id: String, pc_level: u32) -> Result<AdventureBible, BibleError> {
    let value = extract_json(raw)?;

    let logline = require_field(&value, "logline")?.as_str().ok_or_else(|| BibleError::MissingField("logline".to_string()))?.to_string();
    let main_quest_value = require_field(&value, "main_quest")?;
    require_field(main_quest_value, "objective")?;
    let antagonist_value = require_field(&value, "antagonist")?;
    require_field(antagonist_value, "true_identity")?;
    let acts_value = require_field(&value, "acts")?.as_array().ok_or_else(|| BibleError::MissingField("acts".to_string()))?;
    if acts_value.len() < 2 {
        return Err(BibleError::MalformedResponse("acts must contain at least 2 entries".to_string()));
    }
    for act in acts_value {
        require_field(act, "name")?;
        require_field(act, "objective")?;
    }

    let main_quest = MainQuest {
        objective: main_quest_value.get("objective").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        stakes: main_quest_value.get("stakes").and_then(|v| v.as_str()).unwrap_or("unknown stakes").to_string(),
        initial_hook: main_quest_value.get("initial_hook").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        state: MainQuestState::Act1,
    };

    let antagonist = Antagonist {
        true_identity: antagonist_value.get("true_identity").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        facade: antagonist_value.get("facade").and_then(|v| v.as_str()).unwrap_or("a stranger").to_string(),
        motivation: antagonist_value.get("motivation").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        resources: antagonist_value.get("resources").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        weakness: antagonist_value.get("weakness").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        planned_reveal_act: antagonist_value.get("planned_reveal_act").and_then(|v| v.as_u64()).unwrap_or(3) as u32,
        foreshadowing_clues: antagonist_value
            .get("foreshadowing_clues")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
    };

    let acts = acts_value
        .iter()
        .enumerate()
        .map(|(i, a)| Act {
            id: a.get("id").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| format!("act_{}", i + 1)),
            name: a.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            objective: a.get("objective").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            seed_scenes: a.get("seed_scenes").and_then(|v| v.as_array()).map(|s| s.iter().filter_map(|x| x.as_str().map(str::to_string)).collect()).unwrap_or_default(),
            state: if i == 0 { ActState::Active } else { ActState::Pending },
        })
        .collect();

    let revelations = value
        .get("revelations")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().enumerate().map(|(i, r)| normalize_revelation(r, i)).collect())
        .unwrap_or_default();

    let npcs = value
        .get("npcs")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|n| {
                    let initial_attitude = n.get("initial_attitude").and_then(|v| v.as_str()).unwrap_or("neutral").to_string();
                    NpcRecord {
                        name: n.get("name").and_then(|v| v.as_str()).unwrap_or("unnamed").to_string(),
                        role: n.get("role").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        secret: n.get("secret").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        current_attitude: initial_attitude.clone(),
                        initial_attitude,
                        status: NpcStatus::Alive,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let clocks = value
        .get("clocks")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|c| Clock {
                    id: c.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    description: c.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    total_segments: c.get("total_segments").and_then(|v| v.as_u64()).unwrap_or(6) as u32,
                    current_segment: 0,
                    triggering_condition: c.get("triggering_condition").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    completion_payload: c.get("completion_payload").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let side_quests = value
        .get("side_quests")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(i, s)| SideQuest {
                    id: s.get("id").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| format!("side_quest_{i}")),
                    summary: s.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    completed: false,
                })
                .collect()
        })
        .unwrap_or_default();

    let planned_rewards = value.get("planned_rewards").and_then(|v| v.as_array()).map(|a| a.iter().filter_map(|r| r.as_str().map(str::to_string)).collect()).unwrap_or_default();

    Ok(AdventureBible {
        version: BIBLE_SCHEMA_VERSION,
        metadata: BibleMetadata { id: Uuid::new_v4(), generated_at: String::new(), region, tone_id, pc_level },
        logline,
        main_quest,
        antagonist,
        acts,
        revelations,
        npcs,
        clocks,
        side_quests,
        planned_rewards,
        consistency_contract: ConsistencyContract::with_canonical_defaults(),
    })
}

fn normalize_revelation(raw: &Value, index: usize) -> Revelation {
    let mut clues: Vec<Clue> = raw
        .get("clues")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|c| c.as_str()).map(|text| Clue { text: text.to_string(), guaranteed: false }).collect())
        .unwrap_or_default();

    if clues.is_empty() {
        clues.push(Clue { text: "an unspecified clue".to_string(), guaranteed: true });
    } else if !clues.iter().any(|c| c.guaranteed) {
        clues[0].guaranteed = true;
    }

    Revelation {
        id: raw.get("id").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| format!("revelation_{index}")),
        summary: raw.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        act: raw.get("act").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
        clues,
        discovered: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    Append,
    Replace,
    Tombstone,
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchLogEntry {
    pub turn: u32,
    pub timestamp: String,
    pub kind: PatchKind,
    pub path: String,
    pub previous_value: Value,
    pub new_value: Value,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub killed_npcs: Vec<String>,
    pub discovered_revelations: Vec<String>,
    pub main_quest_transitions: Vec<String>,
}

pub struct BibleStore {
    root: PathBuf,
}

impl BibleStore {
    pub fn new(saves_root: impl AsRef<Path>) -> Self {
        Self { root: saves_root.as_ref().to_path_buf() }
    }

    fn adventure_dir(&self, character_id: Uuid) -> PathBuf {
        self.root.join("adventures").join(character_id.to_string())
    }

    fn bible_path(&self, character_id: Uuid) -> PathBuf {
        self.adventure_dir(character_id).join("adventure_bible_full.json")
    }

    fn patch_log_path(&self, character_id: Uuid) -> PathBuf {
        self.adventure_dir(character_id).join("adventure_patch.json")
    }

    fn change_summary_path(&self, character_id: Uuid) -> PathBuf {
        self.adventure_dir(character_id).join("adventure_change_summary.json")
    }

    pub async fn save(&self, character_id: Uuid, bible: &AdventureBible) -> Result<(), BibleError> {
        persist::save_json_atomic(self.bible_path(character_id), bible).await?;
        Ok(())
    }

    pub async fn load(&self, character_id: Uuid) -> Result<AdventureBible, BibleError> {
        persist::load_json(self.bible_path(character_id)).await.map_err(|_| BibleError::NotFound(self.bible_path(character_id)))
    }

    async fn load_patches(&self, character_id: Uuid) -> Vec<PatchLogEntry> {
        persist::load_json(self.patch_log_path(character_id)).await.unwrap_or_default()
    }

    /// Apply one patch entry to `bible` by dotted path, persist both the
    /// mutated bible and the appended patch record. Best-effort ordering:
    /// bible write lands before the patch-log write, so a crash between
    /// the two leaves a log one entry short of the truth rather than a
    /// phantom entry with no matching state change; re-applying an
    /// identical patch after such a crash is accepted by design.
    pub async fn apply_patch(&self, character_id: Uuid, mut bible: AdventureBible, turn: u32, kind: PatchKind, path: &str, new_value: Value, reason: String, timestamp: String) -> Result<AdventureBible, BibleError> {
        let span = tracing::info_span!("bible_apply_patch", %character_id, turn, path, kind = ?kind);
        let _enter = span.enter();

        let mut value = serde_json::to_value(&bible).map_err(|e| BibleError::MalformedResponse(e.to_string()))?;
        let previous_value = read_path(&value, path).ok_or_else(|| BibleError::UnknownPath(path.to_string()))?.clone();

        write_path(&mut value, path, kind, new_value.clone())?;
        bible = serde_json::from_value(value).map_err(|e| BibleError::MalformedResponse(e.to_string()))?;

        self.save(character_id, &bible).await?;

        let mut patches = self.load_patches(character_id).await;
        patches.push(PatchLogEntry { turn, timestamp, kind, path: path.to_string(), previous_value, new_value, reason });
        persist::save_json_atomic(self.patch_log_path(character_id), &patches).await?;

        let summary = change_summary(&bible);
        persist::save_json_atomic(self.change_summary_path(character_id), &summary).await?;

        Ok(bible)
    }
}

/// Recomputed from scratch on every patch rather than updated
/// incrementally: cheap at this bible's size, and immune to drift if a
/// patch touches the bible through a path this function doesn't expect.
fn change_summary(bible: &AdventureBible) -> ChangeSummary {
    ChangeSummary {
        killed_npcs: bible.npcs.iter().filter(|n| n.status == NpcStatus::Dead).map(|n| n.name.clone()).collect(),
        discovered_revelations: bible.revelations.iter().filter(|r| r.discovered).map(|r| r.id.clone()).collect(),
        main_quest_transitions: vec![format!("{:?}", bible.main_quest.state)],
    }
}

fn read_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn write_path(value: &mut Value, path: &str, kind: PatchKind, new_value: Value) -> Result<(), BibleError> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments.split_last().ok_or_else(|| BibleError::UnknownPath(path.to_string()))?;

    let mut current = value;
    for segment in parents {
        current = current.get_mut(*segment).ok_or_else(|| BibleError::UnknownPath(path.to_string()))?;
    }
    let target = current.as_object_mut().ok_or_else(|| BibleError::UnknownPath(path.to_string()))?;

    match kind {
        PatchKind::Replace | PatchKind::Merge => {
            target.insert(last.to_string(), new_value);
        }
        PatchKind::Append => {
            let entry = target.entry(last.to_string()).or_insert_with(|| Value::Array(Vec::new()));
            if let Some(array) = entry.as_array_mut() {
                array.push(new_value);
            } else {
                return Err(BibleError::MalformedResponse(format!("path {last} is not an array; cannot append")));
            }
        }
        PatchKind::Tombstone => {
            if let Some(existing) = target.get_mut(*last) {
                if let Some(obj) = existing.as_object_mut() {
                    obj.insert("active".to_string(), Value::Bool(false));
                } else {
                    target.insert(last.to_string(), Value::Bool(false));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> String {
        r#"{
            "logline": "A stolen relic wakes something old beneath the hills.",
            "main_quest": { "objective": "Recover the relic", "stakes": "the valley floods with shadow", "initial_hook": "a frightened courier arrives at dusk" },
            "antagonist": { "true_identity": "the steward Alric", "facade": "a kindly merchant", "motivation": "grief", "resources": "a smuggling ring", "weakness": "his missing daughter", "planned_reveal_act": 3, "foreshadowing_clues": ["a merchant's ledger with odd entries"] },
            "acts": [ { "name": "The Courier's Plea", "objective": "reach the valley" }, { "name": "The Ledger", "objective": "find the smuggling ring" }, { "name": "The Steward's Grief", "objective": "confront Alric" } ],
            "revelations": [ { "summary": "the merchant is the steward", "act": 2, "clues": ["a signet ring", "a familiar handwriting"] } ],
            "npcs": [ { "name": "Alric", "role": "merchant", "secret": "he is the steward", "initial_attitude": "friendly" } ],
            "clocks": [ { "id": "flood_clock", "description": "the shadow rises", "total_segments": 6, "triggering_condition": "each failed exploration check", "completion_payload": "the valley floods" } ]
        }"#.to_string()
    }

    #[test]
    fn parses_fenced_and_bare_json_alike() {
        let fenced = format!("```json\n{}\n```", sample_response());
        let a = parse_generation_response(&fenced, "Dunmere Valley".to_string(), "classic_heroic".to_string(), 1).unwrap();
        let b = parse_generation_response(&sample_response(), "Dunmere Valley".to_string(), "classic_heroic".to_string(), 1).unwrap();
        assert_eq!(a.logline, b.logline);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let broken = r#"{ "logline": "x", "main_quest": {}, "antagonist": {}, "acts": [] }"#;
        let result = parse_generation_response(broken, "x".to_string(), "classic_heroic".to_string(), 1);
        assert!(result.is_err());
    }

    #[test]
    fn revelation_without_explicit_guaranteed_clue_gets_one() {
        let bible = parse_generation_response(&sample_response(), "Dunmere Valley".to_string(), "classic_heroic".to_string(), 1).unwrap();
        let revelation = &bible.revelations[0];
        assert!(revelation.clues.iter().any(|c| c.guaranteed));
    }

    #[test]
    fn dm_view_hides_true_identity_before_reveal_act() {
        let bible = parse_generation_response(&sample_response(), "Dunmere Valley".to_string(), "classic_heroic".to_string(), 1).unwrap();
        let view = dm_view(&bible);
        assert!(view.antagonist.true_identity.is_none());
        assert!(view.antagonist.motivation.is_none());
        assert!(view.antagonist.weakness.is_none());
    }

    #[test]
    fn dm_view_always_surfaces_up_to_two_foreshadowing_clues() {
        let mut bible = parse_generation_response(&sample_response(), "Dunmere Valley".to_string(), "classic_heroic".to_string(), 1).unwrap();
        bible.antagonist.foreshadowing_clues = vec!["a merchant's ledger with odd entries".to_string(), "a signet ring left behind".to_string(), "a third clue that should be dropped".to_string()];
        let view = dm_view(&bible);
        assert_eq!(view.antagonist.foreshadowing_clues.len(), 2);
    }

    #[test]
    fn dm_view_reveals_identity_motivation_and_weakness_together() {
        let mut bible = parse_generation_response(&sample_response(), "Dunmere Valley".to_string(), "classic_heroic".to_string(), 1).unwrap();
        bible.antagonist.planned_reveal_act = 1;
        let view = dm_view(&bible);
        assert!(view.antagonist.true_identity.is_some());
        assert!(view.antagonist.motivation.is_some());
        assert!(view.antagonist.weakness.is_some());
    }

    #[test]
    fn dm_view_filters_revelation_clues_by_act() {
        let bible = parse_generation_response(&sample_response(), "Dunmere Valley".to_string(), "classic_heroic".to_string(), 1).unwrap();
        let view = dm_view(&bible);
        assert!(view.visible_revelation_clues.is_empty());
    }

    #[test]
    fn clock_urgency_rises_with_segment_fraction() {
        let mut clock = Clock { id: "c".to_string(), description: "d".to_string(), total_segments: 4, current_segment: 0, triggering_condition: "t".to_string(), completion_payload: "p".to_string() };
        assert_eq!(clock.urgency(), ClockUrgency::Calm);
        clock.current_segment = 3;
        assert_eq!(clock.urgency(), ClockUrgency::Urgent);
        clock.current_segment = 4;
        assert_eq!(clock.urgency(), ClockUrgency::Critical);
    }
}
