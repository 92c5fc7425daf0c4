//! Frame-synchronous driver surface for the effects core.
//!
//! The compositor driver owns one [`Effects`] value and calls into it each
//! frame, single-threaded: first `tick_fades` for every window (damage
//! propagation happens here, before any refresh decision reads the flags),
//! then `refresh_blur` for each damaged blurred window, then
//! `generate_shadows` as one batch before any shadow is composited.
//! Completion events accumulate in a queue the driver drains after the
//! tick batch; no callbacks run from inside animation state.

use crate::bezier::Bezier;
use crate::blur::{BackdropSource, BlurPipeline};
use crate::config::EffectsConfig;
use crate::fade::FadeAction;
use crate::geometry::Rect;
use crate::gpu::{EffectError, GpuDevice, TextureId};
use crate::shadow::{ShadowCache, ShadowJob, ShadowPipeline};
use crate::window::{WindowArena, WindowEffects, WindowHandle, WindowStatus};
use anyhow::Context;

/// A fade finished and its registered action should be interpreted by the
/// driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeEvent {
    pub window: WindowHandle,
    pub action: FadeAction,
}

/// The effects core: window arena, paint order, shared easing curve, and
/// the GPU device everything renders through.
pub struct Effects<D: GpuDevice> {
    device: D,
    config: EffectsConfig,
    curve: Bezier,
    arena: WindowArena,
    /// Back-to-front compositing order; windows later in the list paint
    /// in front.
    paint_order: Vec<WindowHandle>,
    events: Vec<FadeEvent>,
}

impl<D: GpuDevice> Effects<D> {
    /// Build the core around a device and a validated configuration.
    ///
    /// # Errors
    /// Returns an error when the configuration is out of range.
    pub fn new(device: D, config: EffectsConfig) -> anyhow::Result<Self> {
        let config = config
            .validated()
            .context("invalid effects configuration")?;
        let curve = config.curve();
        Ok(Self {
            device,
            config,
            curve,
            arena: WindowArena::new(),
            paint_order: Vec::new(),
            events: Vec::new(),
        })
    }

    /// The wrapped device.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// The wrapped device, mutably.
    pub const fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Start tracking a window, initially topmost in paint order.
    pub fn add_window(&mut self, rect: Rect, blur_background: bool, has_shadow: bool) -> WindowHandle {
        let handle = self
            .arena
            .insert(WindowEffects::new(rect, blur_background, has_shadow));
        self.paint_order.push(handle);
        handle
    }

    /// Stop tracking a window, destroying its caches exactly once. Stale
    /// handles are ignored.
    pub fn remove_window(&mut self, handle: WindowHandle) {
        if let Some(mut window) = self.arena.remove(handle) {
            window.blur.delete(&mut self.device);
            window.shadow.delete(&mut self.device);
        }
        self.paint_order.retain(|&other| other != handle);
    }

    /// Resolve a window's effect state.
    #[must_use]
    pub fn window(&self, handle: WindowHandle) -> Option<&WindowEffects> {
        self.arena.get(handle)
    }

    /// Resolve a window's effect state mutably.
    pub fn window_mut(&mut self, handle: WindowHandle) -> Option<&mut WindowEffects> {
        self.arena.get_mut(handle)
    }

    /// Back-to-front paint order.
    #[must_use]
    pub fn paint_order(&self) -> &[WindowHandle] {
        &self.paint_order
    }

    /// Move a window to the top of the paint order.
    pub fn raise(&mut self, handle: WindowHandle) {
        self.paint_order.retain(|&other| other != handle);
        if self.arena.contains(handle) {
            self.paint_order.push(handle);
        }
    }

    /// Update a window's geometry. The blur cache goes stale immediately;
    /// the shadow cache is resized lazily by the next shadow batch when
    /// the size drifted.
    pub fn set_window_rect(&mut self, handle: WindowHandle, rect: Rect) {
        if let Some(window) = self.arena.get_mut(handle) {
            let resized = window.rect.size() != rect.size();
            window.rect = rect;
            window.damage_blur();
            if resized && window.has_shadow {
                window.shadow_damaged = true;
            }
        }
    }

    /// Set a window's lifecycle state (usually alongside a fade).
    pub fn set_status(&mut self, handle: WindowHandle, status: WindowStatus) {
        if let Some(window) = self.arena.get_mut(handle) {
            window.status = status;
        }
    }

    /// Begin fading a window towards `target` percent opacity over
    /// `duration` seconds, replacing any registered completion action.
    pub fn start_fade(
        &mut self,
        handle: WindowHandle,
        target: f64,
        duration: f64,
        action: Option<FadeAction>,
    ) {
        if let Some(window) = self.arena.get_mut(handle) {
            window.fade.start(target, duration);
            window.pending_action = action;
        }
    }

    /// Displayed opacity of a window in percent.
    #[must_use]
    pub fn opacity(&self, handle: WindowHandle) -> Option<f64> {
        self.arena.get(handle).map(WindowEffects::opacity)
    }

    /// Advance every window's fade by `dt` seconds and propagate damage.
    ///
    /// Runs before any blur refresh is evaluated for the frame, since
    /// refresh decisions read the damage flags set here. Returns whether
    /// the driver should render at least one more frame (a fade moved or
    /// completed this tick).
    pub fn tick_fades(&mut self, dt: f64) -> bool {
        let _span = tracing::info_span!("tick_fades").entered();
        let mut keep_awake = false;

        for (position, &handle) in self.paint_order.iter().enumerate() {
            let Some(window) = self.arena.get_mut(handle) else {
                continue;
            };
            if window.fade.is_idle() {
                continue;
            }
            let tick = window.fade.tick(dt, &self.curve);
            let rect = window.rect;

            if tick.value_changed {
                keep_awake = true;
                // The fading window's appearance is stale in the cached
                // backdrops of every overlapping window painted over it.
                for &front in &self.paint_order[position + 1..] {
                    if let Some(other) = self.arena.get_mut(front)
                        && other.rect.overlaps(rect)
                    {
                        other.damage_blur();
                    }
                }
            }

            if tick.completed {
                keep_awake = true;
                if let Some(window) = self.arena.get_mut(handle) {
                    window.status = window.status.settled();
                    if let Some(action) = window.pending_action.take() {
                        self.events.push(FadeEvent {
                            window: handle,
                            action,
                        });
                    }
                }
            }
        }
        keep_awake
    }

    /// Take the fade-completion events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<FadeEvent> {
        core::mem::take(&mut self.events)
    }

    /// Recompute a window's cached backdrop blur if it is damaged.
    ///
    /// `backdrop` is the driver-supplied content behind the window and
    /// `damage` optionally clips the final composite. Returns `true` when
    /// the cache is valid after the call (including the no-op case) and
    /// `false` when blur is unavailable this frame; the driver should then
    /// skip the blurred-backdrop draw, not crash.
    pub fn refresh_blur(
        &mut self,
        handle: WindowHandle,
        backdrop: BackdropSource<'_>,
        damage: &[Rect],
    ) -> bool {
        let Some(window) = self.arena.get_mut(handle) else {
            return false;
        };
        if !window.status.viewable() || !window.blur_background {
            return false;
        }
        if window.solid && !self.config.blur_background_frame {
            return false;
        }
        if !window.blur.damaged {
            return true;
        }

        if window.blur.ensure(&mut self.device, window.rect.size()).is_err() {
            return false;
        }
        let ok = BlurPipeline::refresh(
            &mut self.device,
            &mut window.blur,
            backdrop,
            self.config.blur_level,
            window.rect,
            damage,
        );
        if ok {
            window.blur.damaged = false;
        }
        ok
    }

    /// The finished blur texture for compositing, when valid.
    #[must_use]
    pub fn blurred_texture(&self, handle: WindowHandle) -> Option<TextureId> {
        let window = self.arena.get(handle)?;
        if window.blur.damaged {
            return None;
        }
        window.blur.current_texture()
    }

    /// Regenerate shadows for every damaged shadowed window, as one batch.
    ///
    /// `contents` maps windows to their content textures (the silhouette
    /// alpha source). Caches are initialized or resized here when the
    /// window size drifted since they were last sized. Damage flags are
    /// cleared only after the whole batch succeeds, keeping the batch
    /// atomic with respect to damage marked by the fade animator.
    ///
    /// # Errors
    /// Returns the batch's first failure; flags stay set so the next frame
    /// retries.
    pub fn generate_shadows(
        &mut self,
        contents: &[(WindowHandle, TextureId)],
    ) -> Result<(), EffectError> {
        // Size pass: (re)allocate caches and collect the damaged set.
        let mut staged: Vec<(WindowHandle, TextureId, ShadowCache)> = Vec::new();
        for &(handle, texture) in contents {
            let Some(window) = self.arena.get_mut(handle) else {
                continue;
            };
            if !window.has_shadow || !window.status.viewable() {
                continue;
            }
            let size = window.rect.size();
            if !window.shadow.initialized() {
                if window.shadow.init(&mut self.device, size).is_err() {
                    continue;
                }
                window.shadow_damaged = true;
            } else if window.shadow.window_size() != size {
                if window.shadow.resize(&mut self.device, size).is_err() {
                    continue;
                }
                window.shadow_damaged = true;
            }
            if window.shadow_damaged {
                // Jobs need simultaneous mutable caches; stage them out of
                // the arena for the duration of the batch.
                let cache = core::mem::replace(&mut window.shadow, ShadowCache::new());
                staged.push((handle, texture, cache));
            }
        }

        let mut sizes = Vec::with_capacity(staged.len());
        for (handle, _, _) in &staged {
            let size = self
                .arena
                .get(*handle)
                .map(|window| window.rect.size())
                .unwrap_or_default();
            sizes.push(size);
        }
        let mut jobs: Vec<ShadowJob<'_>> = staged
            .iter_mut()
            .zip(&sizes)
            .map(|((_, texture, cache), &window_size)| ShadowJob {
                cache,
                window_texture: *texture,
                window_size,
                flipped: false,
            })
            .collect();
        let result = ShadowPipeline::generate(&mut self.device, &mut jobs, self.config.shadow_blur_passes);
        drop(jobs);

        for (handle, _, cache) in staged {
            if let Some(window) = self.arena.get_mut(handle) {
                window.shadow = cache;
                if result.is_ok() {
                    window.shadow_damaged = false;
                }
            } else {
                // Window died mid-frame; release the orphaned cache.
                let mut cache = cache;
                cache.delete(&mut self.device);
            }
        }
        result
    }

    /// The clipped shadow texture for compositing, when generated.
    #[must_use]
    pub fn shadow_texture(&self, handle: WindowHandle) -> Option<TextureId> {
        let window = self.arena.get(handle)?;
        if window.shadow_damaged {
            return None;
        }
        window.shadow.effect_texture()
    }

    /// Where a window's shadow composites on screen.
    #[must_use]
    pub fn shadow_paint_rect(&self, handle: WindowHandle) -> Option<Rect> {
        let window = self.arena.get(handle)?;
        Some(window.shadow.paint_rect(window.rect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    #[allow(clippy::unwrap_used, reason = "the default config is valid")]
    fn effects() -> Effects<MockDevice> {
        Effects::new(MockDevice::new(), EffectsConfig::default()).unwrap()
    }

    #[test]
    fn fade_damages_overlapping_windows_in_front() {
        let mut fx = effects();
        let a = fx.add_window(Rect::new(0.0, 0.0, 100.0, 100.0), true, false);
        let b = fx.add_window(Rect::new(50.0, 50.0, 100.0, 100.0), true, false);
        let c = fx.add_window(Rect::new(500.0, 500.0, 50.0, 50.0), true, false);

        // Settle the damage left over from window creation.
        for handle in [a, b, c] {
            if let Some(window) = fx.window_mut(handle) {
                window.blur.damaged = false;
            }
        }

        fx.start_fade(a, 100.0, 1.0, None);
        let keep_awake = fx.tick_fades(0.016);
        let _ = fx.tick_fades(0.1);

        assert!(keep_awake || fx.window(a).is_some_and(|w| !w.fade.is_idle()));
        assert!(fx.window(b).is_some_and(WindowEffects::blur_damaged));
        assert!(!fx.window(c).is_some_and(WindowEffects::blur_damaged));
        // The fading window itself is not damaged by its own fade.
        assert!(!fx.window(a).is_some_and(WindowEffects::blur_damaged));
    }

    #[test]
    fn completion_event_fires_exactly_once_and_settles_status() {
        let mut fx = effects();
        let w = fx.add_window(Rect::new(0.0, 0.0, 10.0, 10.0), false, false);
        fx.set_status(w, WindowStatus::Hiding);
        fx.start_fade(w, 0.0, 0.1, Some(FadeAction::Hide));

        let mut events = Vec::new();
        for _ in 0..20 {
            let _ = fx.tick_fades(0.05);
            events.extend(fx.drain_events());
        }
        assert_eq!(
            events,
            vec![FadeEvent {
                window: w,
                action: FadeAction::Hide
            }]
        );
        assert_eq!(fx.window(w).map(|win| win.status), Some(WindowStatus::Invisible));
    }

    #[test]
    fn immediate_fade_emits_action_and_settles_status() {
        let mut fx = effects();
        let w = fx.add_window(Rect::new(0.0, 0.0, 10.0, 10.0), false, false);
        fx.set_status(w, WindowStatus::Hiding);
        fx.start_fade(w, 0.0, 0.0, Some(FadeAction::Hide));

        let mut events = Vec::new();
        for _ in 0..5 {
            let _ = fx.tick_fades(0.016);
            events.extend(fx.drain_events());
        }
        assert_eq!(
            events,
            vec![FadeEvent {
                window: w,
                action: FadeAction::Hide
            }]
        );
        assert_eq!(fx.window(w).map(|win| win.status), Some(WindowStatus::Invisible));
    }

    #[test]
    fn immediate_fade_damages_overlapping_windows_in_front() {
        let mut fx = effects();
        let below = fx.add_window(Rect::new(0.0, 0.0, 100.0, 100.0), true, false);
        let above = fx.add_window(Rect::new(50.0, 50.0, 100.0, 100.0), true, false);
        for handle in [below, above] {
            if let Some(window) = fx.window_mut(handle) {
                window.blur.damaged = false;
            }
        }

        fx.start_fade(below, 100.0, 0.0, None);
        assert!(fx.tick_fades(0.016));
        assert!(fx.window(above).is_some_and(WindowEffects::blur_damaged));
    }

    #[test]
    fn refresh_blur_is_gated_on_damage() {
        let mut fx = effects();
        let w = fx.add_window(Rect::new(0.0, 0.0, 64.0, 64.0), true, false);

        assert!(fx.refresh_blur(w, BackdropSource::default(), &[]));
        let passes = fx.device().draw_count(crate::gpu::ShaderKind::Downsample);
        assert_eq!(passes, 3); // default blur_level

        // Cache now clean: no further passes.
        assert!(fx.refresh_blur(w, BackdropSource::default(), &[]));
        assert_eq!(
            fx.device().draw_count(crate::gpu::ShaderKind::Downsample),
            passes
        );
        assert!(fx.blurred_texture(w).is_some());
    }

    #[test]
    fn shadow_batch_clears_flags_only_on_success() {
        let mut fx = effects();
        let w = fx.add_window(Rect::new(0.0, 0.0, 80.0, 60.0), false, true);
        let content = fx
            .device_mut()
            .create_texture(crate::geometry::Size::new(80, 60))
            .unwrap_or(TextureId(u64::MAX));

        // Broken shadow shader: the batch fails, damage stays set.
        fx.device_mut()
            .register_program("shadow.shader", crate::gpu::ShaderKind::Global);
        assert!(fx.generate_shadows(&[(w, content)]).is_err());
        assert!(fx.window(w).is_some_and(|win| win.shadow_damaged));
        assert!(fx.shadow_texture(w).is_none());

        // Fixed shader: batch succeeds and the flag clears.
        fx.device_mut()
            .register_program("shadow.shader", crate::gpu::ShaderKind::Shadow);
        assert!(fx.generate_shadows(&[(w, content)]).is_ok());
        assert!(fx.window(w).is_some_and(|win| !win.shadow_damaged));
        assert!(fx.shadow_texture(w).is_some());
    }

    #[test]
    fn remove_window_releases_gpu_resources() {
        let mut fx = effects();
        let w = fx.add_window(Rect::new(0.0, 0.0, 64.0, 64.0), true, true);
        assert!(fx.refresh_blur(w, BackdropSource::default(), &[]));
        let content = fx
            .device_mut()
            .create_texture(crate::geometry::Size::new(64, 64))
            .unwrap_or(TextureId(u64::MAX));
        assert!(fx.generate_shadows(&[(w, content)]).is_ok());
        assert!(fx.device().live_textures() > 1);

        fx.remove_window(w);
        // Only the driver-owned content texture survives.
        assert_eq!(fx.device().live_textures(), 1);
        assert_eq!(fx.device().live_framebuffers(), 0);
        assert_eq!(fx.device().live_stencils(), 0);
        assert!(fx.paint_order().is_empty());
        assert!(fx.window(w).is_none());
    }

    #[test]
    fn resize_damages_blur_and_flags_shadow() {
        let mut fx = effects();
        let w = fx.add_window(Rect::new(0.0, 0.0, 64.0, 64.0), true, true);
        assert!(fx.refresh_blur(w, BackdropSource::default(), &[]));
        let content = fx
            .device_mut()
            .create_texture(crate::geometry::Size::new(64, 64))
            .unwrap_or(TextureId(u64::MAX));
        assert!(fx.generate_shadows(&[(w, content)]).is_ok());

        fx.set_window_rect(w, Rect::new(0.0, 0.0, 128.0, 96.0));
        assert!(fx.window(w).is_some_and(WindowEffects::blur_damaged));
        assert!(fx.window(w).is_some_and(|win| win.shadow_damaged));

        // The next batch resizes the shadow cache to the new padded size.
        assert!(fx.generate_shadows(&[(w, content)]).is_ok());
        let padded = fx
            .window(w)
            .map(|win| win.shadow.padded(crate::geometry::Size::new(128, 96)));
        assert_eq!(padded, Some(crate::geometry::Size::new(256, 224)));
    }
}
