use voxmine_protocol::Tier;

/// Stake boundaries between tiers. A stake equal to a boundary belongs to
/// the higher tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierThresholds {
    pub mid: f64,
    pub high: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            mid: 100.0,
            high: 1000.0,
        }
    }
}

impl TierThresholds {
    /// Maps a stake to its tier. NaN and negative stakes are `Unranked`.
    pub fn tier_for(&self, stake: f64) -> Tier {
        if stake >= self.high {
            Tier::High
        } else if stake >= self.mid {
            Tier::Mid
        } else {
            Tier::Unranked
        }
    }
}
