//! Per-tier room settings and server-wide simulation rules.

use std::time::Duration;

use voxmine_protocol::{Tier, Vec3};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Settings that differ between tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomConfig {
    pub tier: Tier,
    /// Maximum number of members.
    pub capacity: usize,
    /// Applied to every mining and loot reward.
    pub loot_multiplier: f64,
    /// Probability (0.0 to 1.0) that a successful extraction drops loot.
    pub loot_spawn_chance: f64,
    /// Inclusive range of a drop's base value.
    pub loot_value_min: u32,
    pub loot_value_max: u32,
}

impl RoomConfig {
    /// The fixed settings for `tier`. Higher tiers get smaller rooms and
    /// richer drops.
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Unranked => Self {
                tier,
                capacity: 50,
                loot_multiplier: 1.0,
                loot_spawn_chance: 0.05,
                loot_value_min: 5,
                loot_value_max: 20,
            },
            Tier::Mid => Self {
                tier,
                capacity: 30,
                loot_multiplier: 1.5,
                loot_spawn_chance: 0.08,
                loot_value_min: 10,
                loot_value_max: 40,
            },
            Tier::High => Self {
                tier,
                capacity: 15,
                loot_multiplier: 2.5,
                loot_spawn_chance: 0.12,
                loot_value_min: 25,
                loot_value_max: 100,
            },
        }
    }

    /// `floor(base * loot_multiplier)`.
    pub fn reward_for(&self, base: u32) -> u64 {
        (f64::from(base) * self.loot_multiplier).floor() as u64
    }
}

// ---------------------------------------------------------------------------
// SimulationRules
// ---------------------------------------------------------------------------

/// Rules shared by every room regardless of tier.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRules {
    pub tick_rate_hz: u32,
    /// Units per second a player may legitimately move.
    pub max_speed: f32,
    /// Allowance on top of `max_speed` for latency and jitter.
    pub slack_factor: f32,
    /// A single move longer than this is rejected outright.
    pub teleport_threshold: f32,
    /// Maximum distance to the centre of a block being mined or looted.
    pub mining_range: f32,
    pub mining_cooldown: Duration,
    /// Chat text is cut to this many characters.
    pub chat_max_len: usize,
    /// How long a non-default room may sit empty before it is reclaimed.
    pub idle_teardown: Duration,
    /// How often a dirty world delta is written to storage.
    pub flush_interval: Duration,
    pub spawn: Vec3,
    /// Capacity of each room actor's command channel.
    pub command_buffer: usize,
}

impl Default for SimulationRules {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            max_speed: 12.0,
            slack_factor: 1.5,
            teleport_threshold: 25.0,
            mining_range: 6.0,
            mining_cooldown: Duration::from_millis(250),
            chat_max_len: 200,
            idle_teardown: Duration::from_secs(300),
            flush_interval: Duration::from_secs(30),
            spawn: Vec3::new(0.0, 64.0, 0.0),
            command_buffer: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_tier_table() {
        let u = RoomConfig::for_tier(Tier::Unranked);
        let m = RoomConfig::for_tier(Tier::Mid);
        let h = RoomConfig::for_tier(Tier::High);
        assert_eq!((u.capacity, m.capacity, h.capacity), (50, 30, 15));
        assert_eq!(h.loot_multiplier, 2.5);
        assert_eq!((m.loot_value_min, m.loot_value_max), (10, 40));
        assert_eq!(h.tier, Tier::High);
    }

    #[test]
    fn test_reward_for_floors() {
        assert_eq!(RoomConfig::for_tier(Tier::Unranked).reward_for(10), 10);
        assert_eq!(RoomConfig::for_tier(Tier::Mid).reward_for(5), 7);
        assert_eq!(RoomConfig::for_tier(Tier::High).reward_for(3), 7);
    }
}
