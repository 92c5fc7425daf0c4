//! Effects configuration.

use crate::bezier::Bezier;
use anyhow::{Result as ConfigResult, bail};
use serde::Deserialize;

/// Tunables for the effects core, deserializable from the compositor's
/// configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    /// Blur strength: number of downsample/upsample pass pairs (0 disables
    /// blurring, typical values 1–8).
    pub blur_level: u32,
    /// Also blur the backdrop behind fully opaque windows' frames.
    pub blur_background_frame: bool,
    /// Fixed pass count for softening shadow masks.
    pub shadow_blur_passes: u32,
    /// Cubic-bezier control points shared by all opacity fades.
    pub fade_curve: (f64, f64, f64, f64),
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            blur_level: 3,
            blur_background_frame: false,
            shadow_blur_passes: 4,
            fade_curve: (0.4, 0.0, 0.2, 1.0),
        }
    }
}

impl EffectsConfig {
    /// Validate ranges the pipelines rely on.
    ///
    /// # Errors
    /// Returns an error naming the offending field when a value is outside
    /// its usable range.
    pub fn validated(self) -> ConfigResult<Self> {
        if self.blur_level > 16 {
            bail!("blur_level {} is out of range (0..=16)", self.blur_level);
        }
        if self.shadow_blur_passes == 0 || self.shadow_blur_passes > 16 {
            bail!(
                "shadow_blur_passes {} is out of range (1..=16)",
                self.shadow_blur_passes
            );
        }
        let (p1x, _, p2x, _) = self.fade_curve;
        if !(0.0..=1.0).contains(&p1x) || !(0.0..=1.0).contains(&p2x) {
            bail!("fade_curve control-point x values must lie in [0, 1]");
        }
        Ok(self)
    }

    /// The shared easing curve built from `fade_curve`.
    #[must_use]
    pub fn curve(&self) -> Bezier {
        let (p1x, p1y, p2x, p2y) = self.fade_curve;
        Bezier::new(p1x, p1y, p2x, p2y)
    }
}
