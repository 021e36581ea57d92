//! Encounter-difficulty calculator: DMG adjusted-XP thresholds, the
//! monster-count multiplier ladder, and the solo/large-group rung shift.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Trivial,
    Easy,
    Medium,
    Hard,
    Deadly,
    Mortal,
}

/// `[easy, medium, hard, deadly]` per-character XP threshold, levels 1-20.
const XP_THRESHOLDS: [[u64; 4]; 20] = [
    [25, 50, 75, 100],
    [50, 100, 150, 200],
    [75, 150, 225, 400],
    [125, 250, 375, 500],
    [250, 500, 750, 1100],
    [300, 600, 900, 1400],
    [350, 750, 1100, 1700],
    [450, 900, 1400, 2100],
    [550, 1100, 1600, 2400],
    [600, 1200, 1900, 2800],
    [800, 1600, 2400, 3600],
    [1000, 2000, 3000, 4500],
    [1100, 2200, 3400, 5100],
    [1250, 2500, 3800, 5700],
    [1400, 2800, 4300, 6400],
    [1600, 3200, 4800, 7200],
    [2000, 3900, 5900, 8800],
    [2100, 4200, 6300, 9500],
    [2400, 4900, 7300, 10900],
    [2800, 5700, 8500, 12700],
];

/// Monster-count buckets, per the DMG group-size multiplier table:
/// 1 -> 1.0, 2 -> 1.5, 3-6 -> 2.0, 7-10 -> 2.5, 11-14 -> 3.0, 15+ -> 4.0.
const MULTIPLIERS_NORMAL: &[(u32, f32)] = &[(1, 1.0), (2, 1.5), (3, 2.0), (7, 2.5), (11, 3.0), (15, 4.0)];

/// The ordered rung ladder used to shift a base multiplier for solo or
/// large parties. `5.0` is reachable only via a lift from `4.0`; no
/// monster-count bucket maps to it directly.
const MULTIPLIER_LADDER: [f32; 7] = [1.0, 1.5, 2.0, 2.5, 3.0, 4.0, 5.0];

pub fn xp_thresholds_for_level(level: u32) -> Option<[u64; 4]> {
    let idx = level.checked_sub(1)? as usize;
    XP_THRESHOLDS.get(idx).copied()
}

fn base_multiplier(monster_count: u32) -> f32 {
    MULTIPLIERS_NORMAL.iter().rev().find(|(threshold, _)| monster_count >= *threshold).map(|(_, m)| *m).unwrap_or(1.0)
}

/// Look up the raw multiplier for `monster_count`, then shift it one rung
/// up for a solo party (<=2 PCs) or one rung down for a large party
/// (>=6 PCs) — solo PCs take the full brunt of ganging-up, large parties
/// dilute it. Clamped to the ladder's ends.
fn multiplier_for(monster_count: u32, party_size: u32) -> f32 {
    let base = base_multiplier(monster_count);
    let rung_index = MULTIPLIER_LADDER.iter().position(|m| (*m - base).abs() < f32::EPSILON).unwrap_or(0);

    if party_size <= 2 {
        MULTIPLIER_LADDER.get(rung_index + 1).copied().unwrap_or(*MULTIPLIER_LADDER.last().unwrap())
    } else if party_size >= 6 {
        MULTIPLIER_LADDER.get(rung_index.saturating_sub(1)).copied().unwrap_or(MULTIPLIER_LADDER[0])
    } else {
        base
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DifficultyResult {
    pub total_xp: u64,
    pub adjusted_xp: f32,
    pub multiplier: f32,
    pub party_thresholds: [u64; 4],
    pub difficulty: Difficulty,
}

/// `monster_xp_values` lists each monster's raw Monster Manual XP;
/// `party_levels` lists every living PC's level.
pub fn calculate_difficulty(monster_xp_values: &[u64], party_levels: &[u32]) -> DifficultyResult {
    let total_xp: u64 = monster_xp_values.iter().sum();
    let multiplier = multiplier_for(monster_xp_values.len() as u32, party_levels.len() as u32);
    let adjusted_xp = total_xp as f32 * multiplier;

    let mut party_thresholds = [0u64; 4];
    for &level in party_levels {
        let t = xp_thresholds_for_level(level).unwrap_or(xp_thresholds_for_level(1).unwrap());
        for i in 0..4 {
            party_thresholds[i] += t[i];
        }
    }

    let deadly = party_thresholds[3] as f32;
    let difficulty = if adjusted_xp < party_thresholds[0] as f32 {
        Difficulty::Trivial
    } else if adjusted_xp < party_thresholds[1] as f32 {
        Difficulty::Easy
    } else if adjusted_xp < party_thresholds[2] as f32 {
        Difficulty::Medium
    } else if adjusted_xp < deadly {
        Difficulty::Hard
    } else if adjusted_xp < deadly * 1.5 {
        Difficulty::Deadly
    } else {
        Difficulty::Mortal
    };

    DifficultyResult { total_xp, adjusted_xp, multiplier, party_thresholds, difficulty }
}

/// Filter `candidates` (monster id, raw XP) down to those whose
/// single-monster adjusted XP lands at `target` difficulty for this
/// party, capped at 10 suggestions.
pub fn suggest_monsters(candidates: &[(String, u64)], party_levels: &[u32], target: Difficulty) -> Vec<String> {
    let mut hits = Vec::new();
    for (id, xp) in candidates {
        let result = calculate_difficulty(&[*xp], party_levels);
        if result.difficulty == target {
            hits.push(id.clone());
            if hits.len() >= 10 {
                break;
            }
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_goblin_vs_solo_level_one_pc_is_hard() {
        let result = calculate_difficulty(&[50], &[1]);
        assert_eq!(result.difficulty, Difficulty::Hard);
        assert_eq!(result.multiplier, 1.5);
    }

    #[test]
    fn single_goblin_vs_normal_party_of_four_is_trivial() {
        let result = calculate_difficulty(&[50], &[1, 1, 1, 1]);
        assert_eq!(result.difficulty, Difficulty::Trivial);
        assert_eq!(result.multiplier, 1.0);
    }

    #[test]
    fn large_party_gets_reduced_multiplier() {
        let normal = multiplier_for(3, 4);
        let large = multiplier_for(3, 6);
        assert!(large < normal);
    }

    #[test]
    fn thresholds_climb_monotonically_with_level() {
        let low = xp_thresholds_for_level(1).unwrap();
        let high = xp_thresholds_for_level(20).unwrap();
        assert!(high[3] > low[3]);
    }

    #[test]
    fn suggestions_are_capped_at_ten_and_filter_by_bucket() {
        let candidates: Vec<(String, u64)> = (0..20).map(|i| (format!("monster_{i}"), 10)).collect();
        let suggestions = suggest_monsters(&candidates, &[1, 1, 1, 1], Difficulty::Trivial);
        assert!(suggestions.len() <= 10);
        assert!(suggestions.iter().all(|id| id.starts_with("monster_")));
    }

    #[test]
    fn mortal_bucket_above_one_and_half_times_deadly() {
        let result = calculate_difficulty(&[10_000], &[1]);
        assert_eq!(result.difficulty, Difficulty::Mortal);
    }
}
