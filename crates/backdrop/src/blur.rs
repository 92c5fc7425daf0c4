//! Backdrop blur: per-window GPU cache and the dual-Kawase pipeline.
//!
//! The cache holds two ping-pong textures and a lazily created framebuffer.
//! The pipeline renders the backdrop into texture 0, then runs `level`
//! downsample passes (halving resolution each time) followed by `level`
//! upsample passes back to full size. Each pass samples between texel
//! centers via the `halfpixel` uniform, so the geometric shrinkage buys a
//! large-radius blur for O(level) passes whose cost converges, far cheaper
//! than one wide convolution kernel.
//!
//! Every public entry point restores the device's toggle state on all exit
//! paths, including shader-mismatch failures.

use crate::geometry::{Rect, Size};
use crate::gpu::{
    DrawQuad, EffectError, FramebufferId, GpuDevice, RenderToggles, ShaderKind, TextureId,
    ToggleGuard, Uniform, load_shader,
};

/// Per-window blur cache: ping-pong texture pair, shared framebuffer,
/// damage flag.
///
/// Both textures always have the same, current size; a size change
/// reallocates both before any further use. When `damaged` is false the
/// current texture holds a valid blur of the window's backdrop at `size`.
#[derive(Debug)]
pub struct BlurCache {
    size: Size,
    textures: [Option<TextureId>; 2],
    /// Index of the texture holding the most recent pass output.
    current: usize,
    framebuffer: Option<FramebufferId>,
    /// Cached content no longer matches the screen and must be recomputed
    /// before the next composite.
    pub damaged: bool,
}

impl Default for BlurCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BlurCache {
    /// An uninitialized cache; [`BlurCache::ensure`] must succeed before
    /// the pipeline may use it.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            size: Size::new(0, 0),
            textures: [None, None],
            current: 0,
            framebuffer: None,
            damaged: true,
        }
    }

    /// Whether both textures are allocated.
    #[must_use]
    pub const fn initialized(&self) -> bool {
        self.textures[0].is_some() && self.textures[1].is_some()
    }

    /// Current target dimensions.
    #[must_use]
    pub const fn size(&self) -> Size {
        self.size
    }

    /// The texture holding the latest pass output (the finished blur once
    /// a refresh completes).
    #[must_use]
    pub const fn current_texture(&self) -> Option<TextureId> {
        self.textures[self.current]
    }

    /// The texture the next pass will write into.
    const fn back_texture(&self) -> Option<TextureId> {
        self.textures[1 - self.current]
    }

    /// Toggle which texture is current. Index-based, so there is no
    /// aliasing between "read" and "write" surfaces.
    const fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Make the cache usable at `size`.
    ///
    /// A size change deletes and reallocates both textures and marks the
    /// cache damaged; calling with the current size is a no-op that
    /// preserves the damage flag. The framebuffer is created once, lazily,
    /// and lives until [`BlurCache::delete`].
    ///
    /// # Errors
    /// Returns [`EffectError::Allocation`] if any allocation fails. Partial
    /// allocations from this call are released first, leaving the cache
    /// uninitialized; callers must not use it until a later `ensure`
    /// succeeds.
    pub fn ensure<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        size: Size,
    ) -> Result<(), EffectError> {
        if size != self.size {
            for texture in &mut self.textures {
                if let Some(id) = texture.take() {
                    device.delete_texture(id);
                }
            }
        }

        if !self.initialized() {
            let first = match self.textures[0] {
                Some(id) => id,
                None => device.create_texture(size).map_err(|err| {
                    log::error!(target: "backdrop", "blur cache texture allocation failed: {err}");
                    err
                })?,
            };
            self.textures[0] = Some(first);

            if self.textures[1].is_none() {
                match device.create_texture(size) {
                    Ok(id) => self.textures[1] = Some(id),
                    Err(err) => {
                        log::error!(target: "backdrop", "blur cache texture allocation failed: {err}");
                        device.delete_texture(first);
                        self.textures[0] = None;
                        self.size = Size::new(0, 0);
                        return Err(err);
                    }
                }
            }

            self.size = size;
            self.current = 0;
            self.damaged = true;
        }

        if self.framebuffer.is_none() {
            match device.create_framebuffer() {
                Ok(id) => self.framebuffer = Some(id),
                Err(err) => {
                    log::error!(target: "backdrop", "blur cache framebuffer allocation failed: {err}");
                    for texture in &mut self.textures {
                        if let Some(id) = texture.take() {
                            device.delete_texture(id);
                        }
                    }
                    self.size = Size::new(0, 0);
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    /// Release all GPU resources. Safe to call on an uninitialized cache.
    pub fn delete<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        for texture in &mut self.textures {
            if let Some(id) = texture.take() {
                device.delete_texture(id);
            }
        }
        if let Some(fb) = self.framebuffer.take() {
            device.delete_framebuffer(fb);
        }
        self.size = Size::new(0, 0);
        self.current = 0;
        self.damaged = true;
    }
}

/// One already-composited quad of the content behind a window, supplied by
/// the driver back-to-front. Window-content acquisition stays outside the
/// core; the pipeline only replays these into the capture texture.
#[derive(Debug, Clone, Copy)]
pub struct BackdropQuad {
    pub texture: TextureId,
    /// Placement within the capture target, in capture-texture pixels.
    pub rect: Rect,
    pub flipped: bool,
}

/// The screen content behind one window for this refresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackdropSource<'quads> {
    /// Back-to-front quads covering the window's rectangle. Empty means
    /// the capture texture already holds the backdrop.
    pub quads: &'quads [BackdropQuad],
}

/// Executes the downsample/upsample blur against a [`BlurCache`].
pub struct BlurPipeline;

impl BlurPipeline {
    /// Recompute the cached blur for one window.
    ///
    /// `level` is the blur radius proxy: exactly `level` downsample and
    /// `level` upsample passes run regardless of resolution. With
    /// `level == 0` the final passthrough still executes, producing a
    /// sharp copy. `damage` optionally clips the final composite to the
    /// given screen rectangles intersected with `window_rect`.
    ///
    /// Returns `false` (after restoring toggle state) when the cache is
    /// unusable or a required shader is missing or of the wrong kind; the
    /// caller should skip the blurred-backdrop draw this frame.
    pub fn refresh<D: GpuDevice + ?Sized>(
        device: &mut D,
        cache: &mut BlurCache,
        backdrop: BackdropSource<'_>,
        level: u32,
        window_rect: Rect,
        damage: &[Rect],
    ) -> bool {
        let _span = tracing::info_span!("blur_refresh", level).entered();

        if !cache.initialized() {
            log::error!(target: "backdrop", "blur refresh on uninitialized cache");
            return false;
        }
        let Some(fb) = cache.framebuffer else {
            log::error!(target: "backdrop", "blur refresh without framebuffer");
            return false;
        };

        let mut guard = ToggleGuard::new(device);

        let Ok(passthrough) =
            load_shader(&mut *guard, "passthrough.shader", ShaderKind::Passthrough)
        else {
            return false;
        };
        let Ok(downsample) = load_shader(&mut *guard, "downsample.shader", ShaderKind::Downsample)
        else {
            return false;
        };
        let Ok(upsample) = load_shader(&mut *guard, "upsample.shader", ShaderKind::Upsample) else {
            return false;
        };

        let size = cache.size;
        cache.current = 0;

        // Capture the backdrop into texture 0.
        if !backdrop.quads.is_empty() {
            guard.set_toggles(RenderToggles {
                blend: true,
                ..RenderToggles::default()
            });
            guard.reset_framebuffer_targets(fb);
            if let Some(target) = cache.current_texture() {
                guard.attach_texture(fb, target);
            }
            guard.bind_framebuffer(Some(fb));
            guard.set_viewport(size);
            guard.clear([0.0, 0.0, 0.0, 0.0], false);
            for quad in backdrop.quads {
                guard.draw_quad(&DrawQuad {
                    program: passthrough,
                    source: quad.texture,
                    target_rect: quad.rect,
                    uniforms: vec![Uniform::new("flip", quad.flipped)],
                });
            }
        }

        guard.set_toggles(RenderToggles::default());

        let pixeluv = [1.0 / size.width as f32, 1.0 / size.height as f32];

        // Downsample: each pass halves the working resolution.
        for i in 0..level {
            let dst = size.shrunk(i + 1);
            let halfpixel = [
                1.0 / (2.0 * dst.width as f32),
                1.0 / (2.0 * dst.height as f32),
            ];
            let Some((source, target)) = cache.current_texture().zip(cache.back_texture()) else {
                return false;
            };
            guard.reset_framebuffer_targets(fb);
            guard.attach_texture(fb, target);
            guard.bind_framebuffer(Some(fb));
            guard.set_viewport(dst);
            guard.draw_quad(&DrawQuad {
                program: downsample,
                source,
                target_rect: Rect::new(0.0, 0.0, dst.width as f32, dst.height as f32),
                uniforms: vec![
                    Uniform::new("pixeluv", pixeluv),
                    Uniform::new("halfpixel", halfpixel),
                ],
            });
            cache.swap();
        }

        // Upsample: mirror the chain back out to full resolution.
        for i in 0..level {
            let dst = size.shrunk(level - i - 1);
            let halfpixel = [
                1.0 / (2.0 * dst.width as f32),
                1.0 / (2.0 * dst.height as f32),
            ];
            let Some((source, target)) = cache.current_texture().zip(cache.back_texture()) else {
                return false;
            };
            guard.reset_framebuffer_targets(fb);
            guard.attach_texture(fb, target);
            guard.bind_framebuffer(Some(fb));
            guard.set_viewport(dst);
            guard.draw_quad(&DrawQuad {
                program: upsample,
                source,
                target_rect: Rect::new(0.0, 0.0, dst.width as f32, dst.height as f32),
                uniforms: vec![
                    Uniform::new("pixeluv", pixeluv),
                    Uniform::new("halfpixel", halfpixel),
                ],
            });
            cache.swap();
        }

        // Final pass: draw the result back under the caller's scissor and
        // stencil configuration.
        guard.reapply();
        guard.bind_framebuffer(None);
        let Some(result) = cache.current_texture() else {
            return false;
        };
        let final_uniforms = vec![Uniform::new("flip", false)];
        if damage.is_empty() {
            guard.draw_quad(&DrawQuad {
                program: passthrough,
                source: result,
                target_rect: window_rect,
                uniforms: final_uniforms,
            });
        } else {
            for rect in damage {
                if let Some(clipped) = rect.intersection(window_rect) {
                    guard.draw_quad(&DrawQuad {
                        program: passthrough,
                        source: result,
                        target_rect: clipped,
                        uniforms: final_uniforms.clone(),
                    });
                }
            }
        }

        drop(guard);
        true
    }

    /// Blur `texture` in place at `size` using `swap` as the ping-pong
    /// partner, running `passes` downsample passes and `passes` upsample
    /// passes through `fb`. Used by the shadow batch, which brings its own
    /// framebuffer and texture pair.
    ///
    /// # Errors
    /// Propagates shader lookup failures; the caller owns toggle state.
    pub fn blur_texture<D: GpuDevice + ?Sized>(
        device: &mut D,
        fb: FramebufferId,
        texture: TextureId,
        swap: TextureId,
        size: Size,
        passes: u32,
    ) -> Result<(), EffectError> {
        let downsample = load_shader(device, "downsample.shader", ShaderKind::Downsample)?;
        let upsample = load_shader(device, "upsample.shader", ShaderKind::Upsample)?;

        let pixeluv = [1.0 / size.width as f32, 1.0 / size.height as f32];
        let mut front = texture;
        let mut back = swap;

        for i in 0..passes {
            let dst = size.shrunk(i + 1);
            Self::pass(device, fb, downsample, front, back, dst, pixeluv);
            core::mem::swap(&mut front, &mut back);
        }
        for i in 0..passes {
            let dst = size.shrunk(passes - i - 1);
            Self::pass(device, fb, upsample, front, back, dst, pixeluv);
            core::mem::swap(&mut front, &mut back);
        }

        // Even pass count: the result landed back in `texture`.
        Ok(())
    }

    fn pass<D: GpuDevice + ?Sized>(
        device: &mut D,
        fb: FramebufferId,
        program: crate::gpu::ShaderProgram,
        source: TextureId,
        target: TextureId,
        dst: Size,
        pixeluv: [f32; 2],
    ) {
        let halfpixel = [
            1.0 / (2.0 * dst.width as f32),
            1.0 / (2.0 * dst.height as f32),
        ];
        device.reset_framebuffer_targets(fb);
        device.attach_texture(fb, target);
        device.bind_framebuffer(Some(fb));
        device.set_viewport(dst);
        device.draw_quad(&DrawQuad {
            program,
            source,
            target_rect: Rect::new(0.0, 0.0, dst.width as f32, dst.height as f32),
            uniforms: vec![
                Uniform::new("pixeluv", pixeluv),
                Uniform::new("halfpixel", halfpixel),
            ],
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    fn sized(width: u32, height: u32) -> Size {
        Size::new(width, height)
    }

    #[test]
    fn ensure_allocates_once_and_reallocates_on_resize() {
        let mut device = MockDevice::new();
        let mut cache = BlurCache::new();

        cache.ensure(&mut device, sized(100, 100)).unwrap_or(());
        assert!(cache.initialized());
        assert!(cache.damaged);
        assert_eq!(device.live_textures(), 2);
        assert_eq!(device.live_framebuffers(), 1);
        let first_pair = (cache.textures[0], cache.textures[1]);

        // Same size: textures untouched, damage preserved.
        cache.damaged = false;
        cache.ensure(&mut device, sized(100, 100)).unwrap_or(());
        assert!(!cache.damaged);
        assert_eq!((cache.textures[0], cache.textures[1]), first_pair);

        // New size: both reallocated, damaged again, framebuffer kept.
        cache.ensure(&mut device, sized(200, 150)).unwrap_or(());
        assert!(cache.damaged);
        assert_eq!(device.live_textures(), 2);
        assert_eq!(device.live_framebuffers(), 1);
        assert_ne!((cache.textures[0], cache.textures[1]), first_pair);
        assert_eq!(cache.size(), sized(200, 150));
    }

    #[test]
    fn partial_allocation_failure_rolls_back() {
        let mut device = MockDevice::new();
        device.fail_texture_allocs_after(1);
        let mut cache = BlurCache::new();

        let result = cache.ensure(&mut device, sized(64, 64));
        assert!(matches!(result, Err(EffectError::Allocation { .. })));
        assert!(!cache.initialized());
        assert_eq!(device.live_textures(), 0);

        // A later successful ensure recovers.
        device.fail_texture_allocs_after(usize::MAX);
        cache.ensure(&mut device, sized(64, 64)).unwrap_or(());
        assert!(cache.initialized());
    }

    #[test]
    fn refresh_runs_exactly_level_passes_each_way() {
        let mut device = MockDevice::new();
        let mut cache = BlurCache::new();
        cache.ensure(&mut device, sized(100, 100)).unwrap_or(());

        for level in [1_u32, 3, 8] {
            device.clear_draws();
            let ok = BlurPipeline::refresh(
                &mut device,
                &mut cache,
                BackdropSource::default(),
                level,
                Rect::new(0.0, 0.0, 100.0, 100.0),
                &[],
            );
            assert!(ok);
            assert_eq!(device.draw_count(ShaderKind::Downsample), level as usize);
            assert_eq!(device.draw_count(ShaderKind::Upsample), level as usize);
            assert_eq!(device.draw_count(ShaderKind::Passthrough), 1);
        }
    }

    #[test]
    fn level_zero_is_pure_passthrough() {
        let mut device = MockDevice::new();
        let mut cache = BlurCache::new();
        cache.ensure(&mut device, sized(64, 64)).unwrap_or(());

        let ok = BlurPipeline::refresh(
            &mut device,
            &mut cache,
            BackdropSource::default(),
            0,
            Rect::new(0.0, 0.0, 64.0, 64.0),
            &[],
        );
        assert!(ok);
        assert_eq!(device.draw_count(ShaderKind::Downsample), 0);
        assert_eq!(device.draw_count(ShaderKind::Upsample), 0);
        assert_eq!(device.draw_count(ShaderKind::Passthrough), 1);
        // The unmodified capture texture is what gets composited.
        assert_eq!(cache.current_texture(), cache.textures[0]);
    }

    #[test]
    fn shader_mismatch_fails_without_leaking_state() {
        let mut device = MockDevice::new();
        device.register_program("downsample.shader", ShaderKind::Global);
        let toggles = RenderToggles {
            scissor: true,
            stencil: true,
            blend: false,
            depth: true,
        };
        device.set_toggles(toggles);

        let mut cache = BlurCache::new();
        cache.ensure(&mut device, sized(32, 32)).unwrap_or(());
        device.clear_draws();

        let ok = BlurPipeline::refresh(
            &mut device,
            &mut cache,
            BackdropSource::default(),
            2,
            Rect::new(0.0, 0.0, 32.0, 32.0),
            &[],
        );
        assert!(!ok);
        assert_eq!(device.toggles(), toggles);
        assert_eq!(device.draw_count(ShaderKind::Downsample), 0);
        assert_eq!(device.draw_count(ShaderKind::Passthrough), 0);
    }

    #[test]
    fn final_pass_clips_to_damage() {
        let mut device = MockDevice::new();
        let mut cache = BlurCache::new();
        cache.ensure(&mut device, sized(100, 100)).unwrap_or(());
        device.clear_draws();

        let window = Rect::new(0.0, 0.0, 100.0, 100.0);
        let damage = [
            Rect::new(50.0, 50.0, 100.0, 100.0),  // clips to 50x50
            Rect::new(500.0, 500.0, 10.0, 10.0),  // disjoint, dropped
        ];
        let ok = BlurPipeline::refresh(
            &mut device,
            &mut cache,
            BackdropSource::default(),
            0,
            window,
            &damage,
        );
        assert!(ok);
        let finals = device.draws_of(ShaderKind::Passthrough);
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].target_rect, Rect::new(50.0, 50.0, 50.0, 50.0));
    }
}
