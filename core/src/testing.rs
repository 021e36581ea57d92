//! Test-only doubles and fixtures for exercising the kernel without a live
//! model server, a seeded dice RNG, or the real on-disk compendium:
//! - `MockLlm` for deterministic orchestrator tests.
//! - `with_seeded_rng` to pin the dice RNG for the duration of a closure.
//! - `fixture_compendium` for a small, fixed monster/weapon/armor catalogue.

use crate::compendium::{ActionKind, ArmorEntry, Compendium, MonsterAction, MonsterEntry, WeaponEntry};
use crate::dice::{self, ArmorType};
use async_trait::async_trait;
use keeper_llm::{ChatCompletion, CompletionRequest, Error as LlmError};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A chat-completion double that returns a scripted sequence of raw
/// responses in order, one per `complete` call.
pub struct MockLlm {
    responses: Mutex<VecDeque<String>>,
}

impl MockLlm {
    pub fn new(responses: impl IntoIterator<Item = String>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().collect()) }
    }

    pub fn queue(&self, response: impl Into<String>) {
        self.responses.lock().expect("mock llm mutex poisoned").push_back(response.into());
    }
}

#[async_trait]
impl ChatCompletion for MockLlm {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, LlmError> {
        self.responses
            .lock()
            .expect("mock llm mutex poisoned")
            .pop_front()
            .ok_or_else(|| LlmError::Config("MockLlm has no more scripted responses".to_string()))
    }
}

/// Run `f` with the process-wide dice RNG pinned to `seed`, then reset it
/// to entropy afterward so later tests in the same binary never inherit a
/// stale seed.
pub fn with_seeded_rng<T>(seed: u64, f: impl FnOnce() -> T) -> T {
    dice::set_seed(seed);
    let result = f();
    dice::reset();
    result
}

/// A small, fixed compendium (one goblin, one longsword, one shortbow, one
/// suit of leather and one of chainmail) for combat-engine and validator
/// tests that shouldn't depend on the real on-disk catalogue.
pub fn fixture_compendium() -> Compendium {
    let monsters = vec![MonsterEntry {
        id: "goblin".to_string(),
        name: "Goblin".to_string(),
        challenge_rating: "1/4".to_string(),
        experience: 50,
        armor_class: 15,
        hp_max: 7,
        dexterity_modifier: 2,
        actions: vec![MonsterAction { name: "Scimitar".to_string(), kind: ActionKind::Melee, attack_bonus: 4, damage_expression: "1d6+2".to_string(), damage_type: "slashing".to_string() }],
    }];

    let weapons = vec![
        WeaponEntry { id: "longsword".to_string(), name: "Longsword".to_string(), damage_expression: "1d8".to_string(), damage_type: "slashing".to_string(), finesse: false, ranged: false },
        WeaponEntry { id: "shortbow".to_string(), name: "Shortbow".to_string(), damage_expression: "1d6".to_string(), damage_type: "piercing".to_string(), finesse: false, ranged: true },
    ];

    let armor = vec![
        ArmorEntry { id: "leather".to_string(), name: "Leather armor".to_string(), base_ac: 11, armor_type: ArmorType::Light },
        ArmorEntry { id: "chainmail".to_string(), name: "Chainmail".to_string(), base_ac: 16, armor_type: ArmorType::Heavy },
    ];

    Compendium::from_entries(monsters, weapons, armor, Vec::new(), Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_llm::Message;

    #[tokio::test]
    async fn mock_llm_returns_queued_responses_in_order() {
        let mock = MockLlm::new(["first".to_string(), "second".to_string()]);
        let request = CompletionRequest { messages: vec![Message::user("hi")], temperature: 0.5, max_tokens: 10, timeout: std::time::Duration::from_secs(1) };
        assert_eq!(mock.complete(request.clone()).await.unwrap(), "first");
        assert_eq!(mock.complete(request).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn mock_llm_errors_once_exhausted() {
        let mock = MockLlm::new(Vec::new());
        let request = CompletionRequest { messages: vec![Message::user("hi")], temperature: 0.5, max_tokens: 10, timeout: std::time::Duration::from_secs(1) };
        assert!(mock.complete(request).await.is_err());
    }

    #[test]
    fn seeded_rng_reproduces_the_same_roll() {
        let first = with_seeded_rng(42, || dice::roll("1d20", dice::Advantage::Normal).unwrap().total);
        let second = with_seeded_rng(42, || dice::roll("1d20", dice::Advantage::Normal).unwrap().total);
        assert_eq!(first, second);
    }

    #[test]
    fn fixture_compendium_has_the_documented_entries() {
        let compendium = fixture_compendium();
        assert!(compendium.monster("goblin").is_some());
        assert!(compendium.weapon("longsword").is_some());
        assert!(compendium.armor("chainmail").is_some());
    }
}
