//! The three layered configuration surfaces a host process wires
//! together before constructing the kernel: LLM profiles, tone modules,
//! and storage roots. Every struct here is a plain `serde` value with a
//! `Default` impl, so a missing config file degrades to documented
//! defaults rather than refusing to start.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProfile {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl LlmProfile {
    pub fn lite() -> Self {
        Self { max_tokens: 512, temperature: 0.6, timeout_seconds: 20 }
    }

    pub fn normal() -> Self {
        Self { max_tokens: 1024, temperature: 0.8, timeout_seconds: 45 }
    }

    pub fn complete() -> Self {
        Self { max_tokens: 2048, temperature: 0.9, timeout_seconds: 90 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProfiles {
    pub lite: LlmProfile,
    pub normal: LlmProfile,
    pub complete: LlmProfile,
}

impl Default for LlmProfiles {
    fn default() -> Self {
        Self { lite: LlmProfile::lite(), normal: LlmProfile::normal(), complete: LlmProfile::complete() }
    }
}

impl LlmProfiles {
    pub fn select(&self, name: &str) -> &LlmProfile {
        match name {
            "lite" => &self.lite,
            "complete" => &self.complete,
            _ => &self.normal,
        }
    }
}

/// One entry from `tones.json`: the tonal dial an adventure is generated
/// and narrated under for its whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneModule {
    pub id: String,
    pub name: String,
    pub narrative_tone: String,
    #[serde(default)]
    pub frequencies: HashMap<String, f32>,
    pub lethality: String,
    pub morality: String,
    pub failure_resolution: String,
    #[serde(default)]
    pub npc_archetypes: Vec<String>,
    #[serde(default)]
    pub antagonist_types: Vec<String>,
    #[serde(default)]
    pub prompt_extra: String,
    #[serde(default)]
    pub special_rules: Vec<String>,
}

impl Default for ToneModule {
    fn default() -> Self {
        Self {
            id: "classic_heroic".to_string(),
            name: "Classic Heroic".to_string(),
            narrative_tone: "optimistic, clear stakes, earned victories".to_string(),
            frequencies: HashMap::new(),
            lethality: "moderate".to_string(),
            morality: "clear".to_string(),
            failure_resolution: "setback, not dead end".to_string(),
            npc_archetypes: Vec::new(),
            antagonist_types: Vec::new(),
            prompt_extra: String::new(),
            special_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToneModules {
    pub tones: Vec<ToneModule>,
}

impl ToneModules {
    pub fn find(&self, id: &str) -> Option<&ToneModule> {
        self.tones.iter().find(|t| t.id == id)
    }
}

/// The four path roots a host process owns; the kernel never invents or
/// guesses a path of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRoots {
    pub storage: PathBuf,
    pub saves: PathBuf,
    pub compendium: PathBuf,
    pub data: PathBuf,
}

impl Default for StorageRoots {
    fn default() -> Self {
        Self {
            storage: PathBuf::from("./storage"),
            saves: PathBuf::from("./saves"),
            compendium: PathBuf::from("./compendium"),
            data: PathBuf::from("./data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_selection_falls_back_to_normal() {
        let profiles = LlmProfiles::default();
        assert_eq!(profiles.select("unknown").timeout_seconds, profiles.normal.timeout_seconds);
        assert_eq!(profiles.select("lite").max_tokens, profiles.lite.max_tokens);
    }

    #[test]
    fn default_tone_module_round_trips() {
        let tone = ToneModule::default();
        let json = serde_json::to_string(&tone).unwrap();
        let back: ToneModule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, tone.id);
    }

    #[test]
    fn storage_roots_default_to_relative_paths() {
        let roots = StorageRoots::default();
        assert_eq!(roots.compendium, PathBuf::from("./compendium"));
    }
}
