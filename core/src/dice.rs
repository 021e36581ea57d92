//! Dice rolling and the handful of pure 5e-derived formulas the rest of the
//! kernel treats as ground truth (ability modifiers, proficiency bonus, AC,
//! critical damage doubling).
//!
//! Rolling is deterministic given an injected RNG; production code defaults
//! to a process-wide singleton that tests can seed and reset.

use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiceError {
    #[error("invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("invalid die size: d{0}")]
    InvalidDieSize(u32),
    #[error("dice count must be at least 1")]
    NoDice,
}

/// Advantage state for a d20 roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Advantage and disadvantage supplied together reduce to normal.
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (Advantage::Advantage, Advantage::Disadvantage)
            | (Advantage::Disadvantage, Advantage::Advantage) => Advantage::Normal,
            (a, _) => a,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DieType {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    D100,
}

impl DieType {
    pub fn sides(self) -> u32 {
        match self {
            DieType::D4 => 4,
            DieType::D6 => 6,
            DieType::D8 => 8,
            DieType::D10 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
            DieType::D100 => 100,
        }
    }

    pub fn from_sides(sides: u32) -> Result<Self, DiceError> {
        match sides {
            4 => Ok(DieType::D4),
            6 => Ok(DieType::D6),
            8 => Ok(DieType::D8),
            10 => Ok(DieType::D10),
            12 => Ok(DieType::D12),
            20 => Ok(DieType::D20),
            100 => Ok(DieType::D100),
            other => Err(DiceError::InvalidDieSize(other)),
        }
    }
}

/// A single `NdX±M` expression. Compound multi-term expressions are
/// out of scope: this engine only ever needs one kind of die at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceExpression {
    pub count: u32,
    pub die: DieType,
    pub modifier: i32,
}

impl DiceExpression {
    pub fn new(count: u32, die: DieType, modifier: i32) -> Result<Self, DiceError> {
        if count == 0 {
            return Err(DiceError::NoDice);
        }
        Ok(Self { count, die, modifier })
    }

    pub fn is_single_d20(&self) -> bool {
        self.count == 1 && self.die == DieType::D20
    }

    /// Roll this expression with the given RNG and advantage mode.
    pub fn roll_with_rng(&self, rng: &mut impl Rng, mode: Advantage) -> RollResult {
        if self.is_single_d20() && mode != Advantage::Normal {
            let first = rng.gen_range(1..=20);
            let second = rng.gen_range(1..=20);
            let (kept, discarded) = match mode {
                Advantage::Advantage => (first.max(second), first.min(second)),
                Advantage::Disadvantage => (first.min(second), first.max(second)),
                Advantage::Normal => unreachable!(),
            };
            return RollResult::from_single_d20(kept, self.modifier, mode, Some(discarded));
        }

        let dice: Vec<u32> = (0..self.count).map(|_| rng.gen_range(1..=self.die.sides())).collect();
        let sum: i32 = dice.iter().sum::<u32>() as i32;
        let total = sum + self.modifier;

        let (natural_20, natural_1) = if self.is_single_d20() {
            (dice[0] == 20, dice[0] == 1)
        } else {
            (false, false)
        };

        RollResult {
            dice,
            modifier: self.modifier,
            total,
            is_d20: self.die == DieType::D20,
            natural_20,
            natural_1,
            mode_used: Advantage::Normal,
            discarded: None,
        }
    }

    pub fn roll(&self, mode: Advantage) -> RollResult {
        self.roll_with_rng(&mut *rng_singleton(), mode)
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, DiceError> {
        let s = s.trim().to_lowercase().replace(' ', "");
        if s.is_empty() {
            return Err(DiceError::InvalidNotation(s));
        }

        let d_pos = s.find('d').ok_or_else(|| DiceError::InvalidNotation(s.clone()))?;
        let (count_str, rest) = s.split_at(d_pos);
        let rest = &rest[1..];

        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str.parse().map_err(|_| DiceError::InvalidNotation(s.clone()))?
        };

        let (sides_str, modifier) = if let Some(plus) = rest.find('+') {
            let (sides, m) = rest.split_at(plus);
            let modifier: i32 = m[1..].parse().map_err(|_| DiceError::InvalidNotation(s.clone()))?;
            (sides, modifier)
        } else if let Some(minus) = rest.find('-') {
            let (sides, m) = rest.split_at(minus);
            let modifier: i32 = -m[1..].parse::<i32>().map_err(|_| DiceError::InvalidNotation(s.clone()))?;
            (sides, modifier)
        } else {
            (rest, 0)
        };

        let sides: u32 = sides_str.parse().map_err(|_| DiceError::InvalidNotation(s.clone()))?;
        let die = DieType::from_sides(sides)?;
        DiceExpression::new(count, die, modifier)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.die.sides())?;
        if self.modifier > 0 {
            write!(f, "+{}", self.modifier)?;
        } else if self.modifier < 0 {
            write!(f, "{}", self.modifier)?;
        }
        Ok(())
    }
}

/// Outcome of rolling a [`DiceExpression`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollResult {
    pub dice: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
    pub is_d20: bool,
    pub natural_20: bool,
    pub natural_1: bool,
    pub mode_used: Advantage,
    pub discarded: Option<u32>,
}

impl RollResult {
    fn from_single_d20(kept: u32, modifier: i32, mode: Advantage, discarded: Option<u32>) -> Self {
        Self {
            dice: vec![kept],
            modifier,
            total: kept as i32 + modifier,
            is_d20: true,
            natural_20: kept == 20,
            natural_1: kept == 1,
            mode_used: mode,
            discarded,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.is_d20 && self.natural_20
    }

    pub fn is_fumble(&self) -> bool {
        self.is_d20 && self.natural_1
    }

    pub fn meets_dc(&self, dc: i32) -> bool {
        self.total >= dc
    }

    pub fn dice_display(&self) -> String {
        self.dice.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("+")
    }
}

lazy_static! {
    static ref KERNEL_RNG: Mutex<StdRng> = Mutex::new(StdRng::from_entropy());
}

fn rng_singleton() -> std::sync::MutexGuard<'static, StdRng> {
    KERNEL_RNG.lock().expect("dice RNG mutex poisoned")
}

/// Pin the process-wide RNG to a fixed seed. Tests should call this before
/// any roll they need to be reproducible and [`reset`] afterwards.
pub fn set_seed(seed: u64) {
    *rng_singleton() = StdRng::seed_from_u64(seed);
}

/// Re-seed the process-wide RNG from entropy, releasing a prior [`set_seed`].
pub fn reset() {
    *rng_singleton() = StdRng::from_entropy();
}

/// Parse and roll a `NdX±M` expression against the process-wide RNG.
pub fn roll(expression: &str, mode: Advantage) -> Result<RollResult, DiceError> {
    let parsed: DiceExpression = expression.parse()?;
    Ok(parsed.roll(mode))
}

/// `(score − 10) ÷ 2`, floored.
pub fn ability_modifier(score: i32) -> i32 {
    (score - 10).div_euclid(2)
}

/// Piecewise proficiency bonus by character level (1-20).
pub fn proficiency_bonus(level: u32) -> i32 {
    match level {
        1..=4 => 2,
        5..=8 => 3,
        9..=12 => 4,
        13..=16 => 5,
        _ => 6,
    }
}

/// Cap applied to DEX modifier's contribution to AC by armour weight class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmorType {
    Light,
    Medium,
    Heavy,
}

impl ArmorType {
    fn dex_cap(self) -> Option<i32> {
        match self {
            ArmorType::Light => None,
            ArmorType::Medium => Some(2),
            ArmorType::Heavy => Some(0),
        }
    }
}

/// Inputs needed to compute armour class; `armor` is `None` when unarmoured.
pub struct ArmorClassInput {
    pub dex_modifier: i32,
    pub armor: Option<(i32, ArmorType)>,
    pub shield: bool,
    pub defense_style: bool,
}

/// `10 + DEX` unarmoured; `base + min(DEX, cap)` armoured; `+2` shield;
/// `+1` defense fighting style while any armour is worn.
pub fn armor_class(input: &ArmorClassInput) -> i32 {
    let mut ac = match &input.armor {
        None => 10 + input.dex_modifier,
        Some((base, armor_type)) => {
            let dex_contribution = match armor_type.dex_cap() {
                None => input.dex_modifier,
                Some(cap) => input.dex_modifier.min(cap),
            };
            base + dex_contribution
        }
    };

    if input.shield {
        ac += 2;
    }
    if input.defense_style && input.armor.is_some() {
        ac += 1;
    }
    ac
}

/// Roll damage for a hit, doubling only the dice count (never the flat
/// modifier) when `critical` is true.
pub fn roll_damage(expression: &str, critical: bool) -> Result<RollResult, DiceError> {
    let parsed: DiceExpression = expression.parse()?;
    let doubled = if critical {
        DiceExpression::new(parsed.count * 2, parsed.die, parsed.modifier)?
    } else {
        parsed
    };
    Ok(doubled.roll_with_rng(&mut *rng_singleton(), Advantage::Normal))
}
