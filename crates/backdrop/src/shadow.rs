//! Soft window shadows: silhouette extraction, batched blur, masked
//! composite.
//!
//! Shadow generation runs as one batch over every shadow-damaged window,
//! not interleaved with compositing, so the stencil and blend setup is
//! shared across the whole pass. Each window gets its opaque silhouette
//! drawn (offset by the border inset) into `texture` while the stencil
//! records the window's clip shape; all collected textures are then blurred
//! with the shared Kawase passes; finally the blurred mask is drawn into
//! `effect` under a stencil test so the blur cannot bleed outside the
//! window's shape. Blurring and clipping in one step produces boundary
//! artifacts, which is why the mask and the clipped composite are separate
//! stages.

use crate::blur::BlurPipeline;
use crate::geometry::{Rect, Size};
use crate::gpu::{
    DrawQuad, EffectError, GpuDevice, RenderToggles, RenderbufferId, ShaderKind, StencilMode,
    TextureId, ToggleGuard, Uniform, load_shader,
};

/// Fixed visual radius added around the window bounds so the blur does not
/// clip at the texture edge.
pub const SHADOW_BORDER: u32 = 64;

/// Per-window shadow cache.
///
/// `texture` holds the intermediate silhouette/blur mask, `effect` the
/// stencil-clipped result that actually gets composited, and `stencil`
/// the window's clip shape. All three are sized to the window plus the
/// border on every side, and resized whenever the owning window's size
/// drifts from `window_size`.
#[derive(Debug)]
pub struct ShadowCache {
    texture: Option<TextureId>,
    effect: Option<TextureId>,
    stencil: Option<RenderbufferId>,
    border: u32,
    window_size: Size,
    initialized: bool,
}

impl Default for ShadowCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowCache {
    /// An uninitialized cache; [`ShadowCache::init`] allocates it.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            texture: None,
            effect: None,
            stencil: None,
            border: SHADOW_BORDER,
            window_size: Size::new(0, 0),
            initialized: false,
        }
    }

    /// Whether the cache holds live GPU resources.
    #[must_use]
    pub const fn initialized(&self) -> bool {
        self.initialized
    }

    /// Border inset in pixels.
    #[must_use]
    pub const fn border(&self) -> u32 {
        self.border
    }

    /// The window size the cache was last sized for.
    #[must_use]
    pub const fn window_size(&self) -> Size {
        self.window_size
    }

    /// The clipped shadow texture to composite, once generated.
    #[must_use]
    pub const fn effect_texture(&self) -> Option<TextureId> {
        self.effect
    }

    /// Texture dimensions for a given window size: the window grown by the
    /// border on all sides.
    #[must_use]
    pub const fn padded(&self, window_size: Size) -> Size {
        window_size.grown(self.border)
    }

    /// Where the shadow composites on screen for a window at `rect`.
    #[must_use]
    pub fn paint_rect(&self, rect: Rect) -> Rect {
        rect.grown(self.border as f32)
    }

    /// Allocate the texture pair and the stencil renderbuffer.
    ///
    /// # Errors
    /// Returns [`EffectError::Allocation`] on failure; resources allocated
    /// by this call are released first, leaving the cache uninitialized.
    pub fn init<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        window_size: Size,
    ) -> Result<(), EffectError> {
        let size = self.padded(window_size);

        let texture = device.create_texture(size).map_err(|err| {
            log::error!(target: "backdrop", "couldn't create shadow texture: {err}");
            err
        })?;
        let effect = match device.create_texture(size) {
            Ok(id) => id,
            Err(err) => {
                log::error!(target: "backdrop", "couldn't create shadow effect texture: {err}");
                device.delete_texture(texture);
                return Err(err);
            }
        };
        let stencil = match device.create_stencil(size) {
            Ok(id) => id,
            Err(err) => {
                log::error!(target: "backdrop", "couldn't create shadow stencil: {err}");
                device.delete_texture(texture);
                device.delete_texture(effect);
                return Err(err);
            }
        };

        self.texture = Some(texture);
        self.effect = Some(effect);
        self.stencil = Some(stencil);
        self.window_size = window_size;
        self.initialized = true;
        Ok(())
    }

    /// Resize all three targets for a window now at `window_size`.
    ///
    /// # Errors
    /// Returns [`EffectError::UninitializedCache`] before a successful
    /// [`ShadowCache::init`], or [`EffectError::Allocation`] if the device
    /// refuses a reallocation.
    pub fn resize<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        window_size: Size,
    ) -> Result<(), EffectError> {
        let (Some(texture), Some(effect), Some(stencil)) = (self.texture, self.effect, self.stencil)
        else {
            return Err(EffectError::UninitializedCache);
        };
        let size = self.padded(window_size);
        device.resize_texture(texture, size)?;
        device.resize_texture(effect, size)?;
        device.resize_stencil(stencil, size)?;
        self.window_size = window_size;
        Ok(())
    }

    /// Release all GPU resources. Safe to call when uninitialized.
    pub fn delete<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        if !self.initialized {
            return;
        }
        if let Some(id) = self.texture.take() {
            device.delete_texture(id);
        }
        if let Some(id) = self.effect.take() {
            device.delete_texture(id);
        }
        if let Some(id) = self.stencil.take() {
            device.delete_stencil(id);
        }
        self.window_size = Size::new(0, 0);
        self.initialized = false;
    }
}

/// One shadow-damaged window's inputs to the batch.
pub struct ShadowJob<'cache> {
    pub cache: &'cache mut ShadowCache,
    /// The window's content texture; its alpha forms the silhouette.
    pub window_texture: TextureId,
    pub window_size: Size,
    pub flipped: bool,
}

/// Batched shadow generation over all damaged windows.
pub struct ShadowPipeline;

impl ShadowPipeline {
    /// Regenerate the shadow textures for every job in the batch.
    ///
    /// The whole batch runs under one saved/restored toggle snapshot and a
    /// single scratch framebuffer. Callers must clear their shadow-damage
    /// flags only when this returns `Ok`, after the entire batch, so a
    /// failure never leaves a partially updated shadow set.
    ///
    /// # Errors
    /// Returns the first allocation or shader failure; toggle state is
    /// restored either way and the batch's flags stay set so the next
    /// frame retries.
    pub fn generate<D: GpuDevice + ?Sized>(
        device: &mut D,
        jobs: &mut [ShadowJob<'_>],
        blur_passes: u32,
    ) -> Result<(), EffectError> {
        if jobs.is_empty() {
            return Ok(());
        }
        let _span = tracing::info_span!("shadow_batch", windows = jobs.len()).entered();

        let mut guard = ToggleGuard::new(device);
        let shadow_program = load_shader(&mut *guard, "shadow.shader", ShaderKind::Shadow)?;
        let passthrough = load_shader(&mut *guard, "passthrough.shader", ShaderKind::Passthrough)?;

        let fb = guard.create_framebuffer().map_err(|err| {
            log::error!(target: "backdrop", "couldn't create framebuffer for shadow batch: {err}");
            err
        })?;

        // Stage 1: silhouettes into the mask textures, shapes into the
        // stencils.
        guard.set_toggles(RenderToggles {
            stencil: true,
            ..RenderToggles::default()
        });
        guard.set_stencil_mode(StencilMode::WriteShape);

        for job in jobs.iter_mut() {
            let (Some(texture), Some(stencil)) = (job.cache.texture, job.cache.stencil) else {
                guard.delete_framebuffer(fb);
                return Err(EffectError::UninitializedCache);
            };
            let size = job.cache.padded(job.window_size);
            let border = job.cache.border() as f32;

            guard.reset_framebuffer_targets(fb);
            guard.attach_texture(fb, texture);
            guard.attach_stencil(fb, stencil);
            guard.bind_framebuffer(Some(fb));
            guard.set_viewport(size);
            guard.clear([0.0, 0.0, 0.0, 0.0], true);
            guard.draw_quad(&DrawQuad {
                program: shadow_program,
                source: job.window_texture,
                target_rect: Rect::new(
                    border,
                    border,
                    job.window_size.width as f32,
                    job.window_size.height as f32,
                ),
                uniforms: vec![Uniform::new("flip", job.flipped)],
            });
        }

        // Stage 2: soften every collected mask. The stencil must not clip
        // here; that is what stage 3 is for.
        guard.set_toggles(RenderToggles::default());
        guard.set_stencil_mode(StencilMode::Disabled);

        for job in jobs.iter_mut() {
            let (Some(texture), Some(effect)) = (job.cache.texture, job.cache.effect) else {
                guard.delete_framebuffer(fb);
                return Err(EffectError::UninitializedCache);
            };
            let size = job.cache.padded(job.window_size);
            if let Err(err) =
                BlurPipeline::blur_texture(&mut *guard, fb, texture, effect, size, blur_passes)
            {
                guard.delete_framebuffer(fb);
                return Err(err);
            }
        }

        // Stage 3: draw the blurred mask into `effect`, clipped by the
        // stencil shape built in stage 1.
        guard.set_toggles(RenderToggles {
            stencil: true,
            ..RenderToggles::default()
        });
        guard.set_stencil_mode(StencilMode::TestInside);

        for job in jobs.iter_mut() {
            let (Some(texture), Some(effect), Some(stencil)) =
                (job.cache.texture, job.cache.effect, job.cache.stencil)
            else {
                guard.delete_framebuffer(fb);
                return Err(EffectError::UninitializedCache);
            };
            let size = job.cache.padded(job.window_size);

            guard.reset_framebuffer_targets(fb);
            guard.attach_texture(fb, effect);
            guard.attach_stencil(fb, stencil);
            guard.bind_framebuffer(Some(fb));
            guard.set_viewport(size);
            guard.clear([0.0, 0.0, 0.0, 0.0], false);
            guard.draw_quad(&DrawQuad {
                program: passthrough,
                source: texture,
                target_rect: Rect::new(0.0, 0.0, size.width as f32, size.height as f32),
                uniforms: vec![Uniform::new("flip", false)],
            });
        }

        guard.delete_framebuffer(fb);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    #[test]
    fn init_rolls_back_on_partial_failure() {
        let mut device = MockDevice::new();
        device.fail_stencil_allocs_after(0);
        let mut cache = ShadowCache::new();

        let result = cache.init(&mut device, Size::new(100, 100));
        assert!(matches!(result, Err(EffectError::Allocation { .. })));
        assert!(!cache.initialized());
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.live_stencils(), 0);
    }

    #[test]
    fn resize_pads_by_border_on_all_sides() {
        let mut device = MockDevice::new();
        let mut cache = ShadowCache::new();
        cache.init(&mut device, Size::new(100, 50)).unwrap_or(());
        assert!(cache.initialized());
        assert_eq!(cache.window_size(), Size::new(100, 50));

        cache.resize(&mut device, Size::new(200, 100)).unwrap_or(());
        assert_eq!(cache.window_size(), Size::new(200, 100));
        let padded = cache.padded(Size::new(200, 100));
        assert_eq!(padded, Size::new(200 + 128, 100 + 128));
        let texture = cache.texture.unwrap_or(TextureId(u64::MAX));
        assert_eq!(device.texture_size(texture), Some(padded));
    }

    #[test]
    fn batch_runs_silhouette_blur_and_masked_composite() {
        let mut device = MockDevice::new();
        let mut cache = ShadowCache::new();
        cache.init(&mut device, Size::new(80, 60)).unwrap_or(());
        let content = device.create_texture(Size::new(80, 60)).unwrap_or(TextureId(u64::MAX));
        device.clear_draws();

        let mut jobs = [ShadowJob {
            cache: &mut cache,
            window_texture: content,
            window_size: Size::new(80, 60),
            flipped: false,
        }];
        ShadowPipeline::generate(&mut device, &mut jobs, 4).unwrap_or(());

        assert_eq!(device.draw_count(ShaderKind::Shadow), 1);
        assert_eq!(device.draw_count(ShaderKind::Downsample), 4);
        assert_eq!(device.draw_count(ShaderKind::Upsample), 4);
        assert_eq!(device.draw_count(ShaderKind::Passthrough), 1);

        // Silhouette is inset by the border.
        let silhouettes = device.draws_of(ShaderKind::Shadow);
        assert_eq!(
            silhouettes[0].target_rect,
            Rect::new(64.0, 64.0, 80.0, 60.0)
        );
        // Scratch framebuffer does not outlive the batch.
        assert_eq!(device.live_framebuffers(), 0);
    }

    #[test]
    fn shader_mismatch_aborts_batch_and_restores_toggles() {
        let mut device = MockDevice::new();
        device.register_program("shadow.shader", ShaderKind::Passthrough);
        let toggles = RenderToggles {
            scissor: true,
            ..RenderToggles::default()
        };
        device.set_toggles(toggles);

        let mut cache = ShadowCache::new();
        cache.init(&mut device, Size::new(10, 10)).unwrap_or(());
        let content = device.create_texture(Size::new(10, 10)).unwrap_or(TextureId(u64::MAX));
        device.clear_draws();

        let mut jobs = [ShadowJob {
            cache: &mut cache,
            window_texture: content,
            window_size: Size::new(10, 10),
            flipped: false,
        }];
        let result = ShadowPipeline::generate(&mut device, &mut jobs, 4);
        assert!(matches!(result, Err(EffectError::ShaderKindMismatch { .. })));
        assert_eq!(device.toggles(), toggles);
        assert_eq!(device.draw_count(ShaderKind::Shadow), 0);
    }
}
