//! Deterministic 5e-flavoured rules kernel that mediates an LLM dungeon
//! master.
//!
//! This crate provides:
//! - Dice and derived-stat primitives (ability modifiers, proficiency
//!   bonus, armor class, critical damage)
//! - A compendium adapter over static monster/weapon/armor/spell/item data
//! - Free-text action normalization and validation against live scene state
//! - A turn-based combat engine with idempotent delta application
//! - A four-outcome action pipeline gluing normalization, validation, and
//!   execution together
//! - A self-describing tool registry the DM orchestrator dispatches to
//! - The DM orchestrator itself: the turn loop tying the LLM, the tools,
//!   combat, and the adventure bible together
//! - An adventure-bible store with a spoiler-filtered DM view and an
//!   append-only patch log
//! - Character and campaign persistence, and an encounter-difficulty
//!   calculator
//!
//! # Quick Start
//!
//! ```ignore
//! use keeper_core::orchestrator::{DungeonMasterOrchestrator, NarrativeContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut dm = DungeonMasterOrchestrator::new(
//!         llm, profiles, tone, registry, compendium, character,
//!         NarrativeContext::new("the Dunmere crossroads"),
//!     );
//!     let outcome = dm.process_turn("I look around the tavern").await?;
//!     println!("{}", outcome.narrative);
//!     Ok(())
//! }
//! ```

pub mod bible;
pub mod character;
pub mod combat;
pub mod compendium;
pub mod config;
pub mod dice;
pub mod difficulty;
pub mod normalizer;
pub mod orchestrator;
pub mod persist;
pub mod pipeline;
pub mod testing;
pub mod tools;
pub mod validator;
