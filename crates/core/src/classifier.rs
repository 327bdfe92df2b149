//! Geometric gesture classification.
//!
//! Maps one landmark set to a discrete [`Gesture`] by testing which fingers are
//! extended. The classifier is a pure function: no state, no I/O, a fixed
//! number of comparisons per call.

use crate::landmark::{LandmarkSet, index};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum vertical drop (normalized units) of the thumb tip below its base
/// joint for the thumb to count as pointing down. A curled thumb also sits a
/// little below its base, so the sign alone is not enough.
pub const THUMB_DOWN_MARGIN: f32 = 0.08;

/// Recognized hand shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    OpenPalm,
    Fist,
    PointUp,
    Peace,
    ThumbsDown,
}

impl Gesture {
    pub const ALL: [Gesture; 5] = [
        Gesture::OpenPalm,
        Gesture::Fist,
        Gesture::PointUp,
        Gesture::Peace,
        Gesture::ThumbsDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenPalm => "open_palm",
            Self::Fist => "fist",
            Self::PointUp => "point_up",
            Self::Peace => "peace",
            Self::ThumbsDown => "thumbs_down",
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gesture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Gesture::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| format!("unknown gesture '{}'", s))
    }
}

/// Which fingers are extended in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FingerState {
    /// Thumb extended sideways, away from the palm.
    pub thumb: bool,
    pub index: bool,
    pub middle: bool,
    pub ring: bool,
    pub pinky: bool,
    /// Thumb tip hangs below its base by more than [`THUMB_DOWN_MARGIN`].
    pub thumb_down: bool,
}

impl FingerState {
    pub fn from_landmarks(lm: &LandmarkSet) -> Self {
        let extended = |tip: usize, pip: usize| lm.point(tip).y < lm.point(pip).y;
        let thumb_tip = lm.point(index::THUMB_TIP);
        let thumb_base = lm.point(index::THUMB_MCP);

        Self {
            thumb: thumb_tip.x < thumb_base.x,
            index: extended(index::INDEX_TIP, index::INDEX_PIP),
            middle: extended(index::MIDDLE_TIP, index::MIDDLE_PIP),
            ring: extended(index::RING_TIP, index::RING_PIP),
            pinky: extended(index::PINKY_TIP, index::PINKY_PIP),
            thumb_down: thumb_tip.y - thumb_base.y > THUMB_DOWN_MARGIN,
        }
    }

    fn fingers_curled(&self) -> bool {
        !self.index && !self.middle && !self.ring && !self.pinky
    }

    /// Resolves the finger combination to the first rule in [`RULES`] that
    /// matches. The rules are pairwise disjoint, so order never breaks a tie.
    pub fn gesture(&self) -> Option<Gesture> {
        RULES
            .iter()
            .find(|(matches, _)| matches(self))
            .map(|(_, gesture)| *gesture)
    }
}

/// A predicate over finger states and the gesture it selects.
pub type Rule = (fn(&FingerState) -> bool, Gesture);

/// Gesture rules in priority order.
pub const RULES: [Rule; 5] = [
    (is_open_palm, Gesture::OpenPalm),
    (is_peace, Gesture::Peace),
    (is_point_up, Gesture::PointUp),
    (is_thumbs_down, Gesture::ThumbsDown),
    (is_fist, Gesture::Fist),
];

fn is_open_palm(f: &FingerState) -> bool {
    f.thumb && f.index && f.middle && f.ring && f.pinky
}

fn is_peace(f: &FingerState) -> bool {
    f.index && f.middle && !f.ring && !f.pinky
}

fn is_point_up(f: &FingerState) -> bool {
    f.index && !f.middle && !f.ring && !f.pinky
}

fn is_thumbs_down(f: &FingerState) -> bool {
    f.fingers_curled() && f.thumb_down
}

// A thumb hanging down is a thumbs-down, never a fist.
fn is_fist(f: &FingerState) -> bool {
    f.fingers_curled() && !f.thumb && !f.thumb_down
}

/// Classifies one hand. Returns `None` when no rule matches.
pub fn classify(landmarks: &LandmarkSet) -> Option<Gesture> {
    FingerState::from_landmarks(landmarks).gesture()
}
