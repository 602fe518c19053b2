//! Server-side movement validation.
//!
//! Clients report where they want to be; the room decides where they are.
//! [`validate_move`] is a pure function so the rules can be tested without
//! a room, a session, or a clock.

use voxmine_protocol::Vec3;

use crate::SimulationRules;

/// What to do with a requested position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveVerdict {
    /// Within the speed allowance; apply as sent.
    Accept(Vec3),
    /// Too fast but plausible; apply this shortened position instead.
    Clamp(Vec3),
    /// Longer than the teleport threshold; keep the old position and
    /// correct the client.
    Reject,
    /// NaN or infinite coordinates; drop the input.
    Invalid,
}

/// Checks a move from `current` to `requested` over `elapsed_secs`.
///
/// A clamped move keeps the requested direction and travels exactly
/// `max_speed * elapsed_secs * slack_factor`.
pub fn validate_move(
    current: Vec3,
    requested: Vec3,
    elapsed_secs: f32,
    rules: &SimulationRules,
) -> MoveVerdict {
    if !requested.is_finite() {
        return MoveVerdict::Invalid;
    }

    let delta = requested - current;
    let distance = delta.length();

    if distance > rules.teleport_threshold {
        return MoveVerdict::Reject;
    }

    let allowed = rules.max_speed * elapsed_secs.max(0.0) * rules.slack_factor;
    if distance > allowed {
        return MoveVerdict::Clamp(current + delta.scale(allowed / distance));
    }

    MoveVerdict::Accept(requested)
}
