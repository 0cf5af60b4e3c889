//! Valence/arousal quadrant labels.
//!
//! The plane is split into a central disk of radius `threshold` and the four quadrants
//! outside it. Each region maps to a 3-component target vector:
//!
//! | region                         | target      |
//! |--------------------------------|-------------|
//! | `v² + a² ≤ threshold²`         | `[0, 0, 1]` |
//! | `v > 0`, `a > 0`               | `[1, 1, 0]` |
//! | `v > 0`, `a ≤ 0`               | `[1, 0, 0]` |
//! | `v ≤ 0`, `a > 0`               | `[0, 1, 0]` |
//! | `v ≤ 0`, `a ≤ 0`               | `[0, 0, 0]` |
//!
//! The targets are component-wise valence/arousal flags plus a neutral flag rather than a
//! one-hot code over five regions; `[0, 0, 0]` in particular carries no positive class.
//! Models trained on the historical dataset used exactly these vectors, so they are kept.

pub const DEFAULT_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrant {
    Neutral,
    HighValenceHighArousal,
    HighValenceLowArousal,
    LowValenceHighArousal,
    LowValenceLowArousal,
}

impl Quadrant {
    pub fn classify(valence: f64, arousal: f64, threshold: f64) -> Self {
        if valence * valence + arousal * arousal <= threshold * threshold {
            Quadrant::Neutral
        } else if valence > 0.0 && arousal > 0.0 {
            Quadrant::HighValenceHighArousal
        } else if valence > 0.0 {
            Quadrant::HighValenceLowArousal
        } else if arousal > 0.0 {
            Quadrant::LowValenceHighArousal
        } else {
            Quadrant::LowValenceLowArousal
        }
    }

    pub fn target(self) -> [f32; 3] {
        match self {
            Quadrant::Neutral => [0.0, 0.0, 1.0],
            Quadrant::HighValenceHighArousal => [1.0, 1.0, 0.0],
            Quadrant::HighValenceLowArousal => [1.0, 0.0, 0.0],
            Quadrant::LowValenceHighArousal => [0.0, 1.0, 0.0],
            Quadrant::LowValenceLowArousal => [0.0, 0.0, 0.0],
        }
    }
}

pub fn quadrant_target(valence: f64, arousal: f64, threshold: f64) -> [f32; 3] {
    Quadrant::classify(valence, arousal, threshold).target()
}
