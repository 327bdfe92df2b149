//! Hand landmark data produced by the external detector, one set per frame.

use serde::{Deserialize, Serialize};

/// Number of keypoints in one detected hand.
pub const LANDMARK_COUNT: usize = 21;

/// Keypoint indices (wrist, then four joints per finger from base to tip).
pub mod index {
    pub const WRIST: usize = 0;
    pub const THUMB_CMC: usize = 1;
    pub const THUMB_MCP: usize = 2;
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_MCP: usize = 5;
    pub const INDEX_PIP: usize = 6;
    pub const INDEX_DIP: usize = 7;
    pub const INDEX_TIP: usize = 8;
    pub const MIDDLE_MCP: usize = 9;
    pub const MIDDLE_PIP: usize = 10;
    pub const MIDDLE_DIP: usize = 11;
    pub const MIDDLE_TIP: usize = 12;
    pub const RING_MCP: usize = 13;
    pub const RING_PIP: usize = 14;
    pub const RING_DIP: usize = 15;
    pub const RING_TIP: usize = 16;
    pub const PINKY_MCP: usize = 17;
    pub const PINKY_PIP: usize = 18;
    pub const PINKY_DIP: usize = 19;
    pub const PINKY_TIP: usize = 20;
}

/// A single keypoint. `x` and `y` are normalized to the image (y grows
/// downward); `z` is depth relative to the wrist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LandmarkError {
    #[error("expected 21 landmarks, got {0}")]
    WrongCount(usize),
}

/// The 21 keypoints of one hand in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Landmark>", into = "Vec<Landmark>")]
pub struct LandmarkSet {
    points: [Landmark; LANDMARK_COUNT],
}

impl LandmarkSet {
    pub fn new(points: [Landmark; LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    pub fn point(&self, idx: usize) -> &Landmark {
        &self.points[idx]
    }

    pub fn point_mut(&mut self, idx: usize) -> &mut Landmark {
        &mut self.points[idx]
    }

    pub fn points(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.points
    }
}

impl TryFrom<Vec<Landmark>> for LandmarkSet {
    type Error = LandmarkError;

    fn try_from(points: Vec<Landmark>) -> Result<Self, Self::Error> {
        let len = points.len();
        let points: [Landmark; LANDMARK_COUNT] =
            points.try_into().map_err(|_| LandmarkError::WrongCount(len))?;
        Ok(Self { points })
    }
}

impl From<LandmarkSet> for Vec<Landmark> {
    fn from(set: LandmarkSet) -> Self {
        set.points.to_vec()
    }
}
