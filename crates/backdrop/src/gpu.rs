//! The device seam between the effects core and the GPU subsystem.
//!
//! The core never touches GL/Vulkan objects directly. It drives an abstract
//! [`GpuDevice`] that owns textures, framebuffers and stencil renderbuffers
//! and knows how to draw a textured quad with a named shader program. The
//! compositor supplies the real implementation; tests supply
//! [`crate::mock::MockDevice`].
//!
//! Shader programs are opaque but carry a [`ShaderKind`] tag. Every pipeline
//! verifies the tag before use and treats a mismatch as a non-fatal,
//! per-call failure: the effect is skipped for the frame and GPU toggle
//! state is left exactly as it was found.

use crate::geometry::{Rect, Size};
use core::fmt;
use core::ops::{Deref, DerefMut};

/// Handle to a device-owned texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Handle to a device-owned framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u64);

/// Handle to a device-owned stencil renderbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderbufferId(pub u64);

/// The shader variants the effects core draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    /// Kawase downsample pass, sampling between texel centers.
    Downsample,
    /// Kawase upsample pass.
    Upsample,
    /// Straight copy, optionally flipped.
    Passthrough,
    /// Alpha-silhouette extraction for shadow masks.
    Shadow,
    /// Window content draw with opacity/dim/invert uniforms.
    Global,
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Downsample => "downsample",
            Self::Upsample => "upsample",
            Self::Passthrough => "passthrough",
            Self::Shadow => "shadow",
            Self::Global => "global",
        };
        formatter.write_str(name)
    }
}

/// A loaded shader program together with its declared kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderProgram {
    pub id: u32,
    pub kind: ShaderKind,
}

/// A uniform value passed to a draw call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Bool(bool),
    Sampler(u32),
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(value: [f32; 2]) -> Self {
        Self::Vec2(value)
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A named uniform for one draw call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniform {
    pub name: &'static str,
    pub value: UniformValue,
}

impl Uniform {
    /// Create a uniform from anything convertible to a [`UniformValue`].
    #[inline]
    pub fn new(name: &'static str, value: impl Into<UniformValue>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// One textured-quad draw against the currently bound framebuffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawQuad {
    pub program: ShaderProgram,
    pub source: TextureId,
    /// Destination rectangle in target-surface pixels.
    pub target_rect: Rect,
    pub uniforms: Vec<Uniform>,
}

/// Stencil usage for subsequent draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StencilMode {
    /// Stencil buffer untouched and ignored.
    #[default]
    Disabled,
    /// Draws increment the stencil where they write, building a clip shape.
    WriteShape,
    /// Draws pass only inside the previously written shape.
    TestInside,
}

/// The GPU enable flags the core must leave unchanged across every call.
///
/// The compositor driver relies on these across unrelated draws; leaking a
/// changed flag corrupts later frames in ways that never show up at the
/// failure site. See [`ToggleGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderToggles {
    pub scissor: bool,
    pub stencil: bool,
    pub blend: bool,
    pub depth: bool,
}

/// Failures the effects core can degrade on.
///
/// None of these are fatal: the affected effect is simply not rendered this
/// frame while base window compositing continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    /// GPU texture/framebuffer/renderbuffer creation failed.
    Allocation { what: &'static str },
    /// A loaded asset was not the expected shader variant.
    ShaderKindMismatch {
        expected: ShaderKind,
        found: ShaderKind,
    },
    /// A shader asset was missing entirely.
    ShaderMissing { name: &'static str },
    /// A cache was used before a successful `ensure`/`init`.
    UninitializedCache,
}

impl fmt::Display for EffectError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { what } => write!(formatter, "failed allocating {what}"),
            Self::ShaderKindMismatch { expected, found } => {
                write!(formatter, "expected a {expected} shader, found {found}")
            }
            Self::ShaderMissing { name } => write!(formatter, "shader asset {name} not found"),
            Self::UninitializedCache => formatter.write_str("cache used before initialization"),
        }
    }
}

impl std::error::Error for EffectError {}

/// Abstract GPU device the effects core renders through.
///
/// All calls are synchronous and single-threaded; a call either completes
/// or fails before returning. Resource handles are owned by whichever cache
/// created them and must be deleted exactly once.
pub trait GpuDevice {
    /// Allocate a texture of the given size.
    ///
    /// # Errors
    /// Returns [`EffectError::Allocation`] when the device is out of
    /// memory or otherwise refuses the allocation.
    fn create_texture(&mut self, size: Size) -> Result<TextureId, EffectError>;

    /// Reallocate the backing store of a texture.
    ///
    /// # Errors
    /// Returns [`EffectError::Allocation`] on failure; the old contents are
    /// lost either way.
    fn resize_texture(&mut self, id: TextureId, size: Size) -> Result<(), EffectError>;

    /// Delete a texture. Stale handles are ignored.
    fn delete_texture(&mut self, id: TextureId);

    /// Allocate a framebuffer object.
    ///
    /// # Errors
    /// Returns [`EffectError::Allocation`] on failure.
    fn create_framebuffer(&mut self) -> Result<FramebufferId, EffectError>;

    /// Delete a framebuffer. Stale handles are ignored.
    fn delete_framebuffer(&mut self, id: FramebufferId);

    /// Allocate a stencil renderbuffer.
    ///
    /// # Errors
    /// Returns [`EffectError::Allocation`] on failure.
    fn create_stencil(&mut self, size: Size) -> Result<RenderbufferId, EffectError>;

    /// Reallocate a stencil renderbuffer.
    ///
    /// # Errors
    /// Returns [`EffectError::Allocation`] on failure.
    fn resize_stencil(&mut self, id: RenderbufferId, size: Size) -> Result<(), EffectError>;

    /// Delete a stencil renderbuffer. Stale handles are ignored.
    fn delete_stencil(&mut self, id: RenderbufferId);

    /// Drop all attachments from a framebuffer.
    fn reset_framebuffer_targets(&mut self, fb: FramebufferId);

    /// Attach a color texture to a framebuffer.
    fn attach_texture(&mut self, fb: FramebufferId, texture: TextureId);

    /// Attach a stencil renderbuffer to a framebuffer.
    fn attach_stencil(&mut self, fb: FramebufferId, stencil: RenderbufferId);

    /// Bind a framebuffer as the draw target, or the default backbuffer
    /// when `None`.
    fn bind_framebuffer(&mut self, fb: Option<FramebufferId>);

    /// Set the viewport for subsequent draws.
    fn set_viewport(&mut self, size: Size);

    /// Clear the bound target's color buffer, and its stencil when asked.
    fn clear(&mut self, color: [f32; 4], stencil: bool);

    /// Set stencil behavior for subsequent draws.
    fn set_stencil_mode(&mut self, mode: StencilMode);

    /// Read the current enable flags.
    fn toggles(&self) -> RenderToggles;

    /// Overwrite the enable flags.
    fn set_toggles(&mut self, toggles: RenderToggles);

    /// Look up a shader program by asset name.
    fn load_program(&mut self, name: &str) -> Option<ShaderProgram>;

    /// Draw a textured quad into the bound framebuffer.
    fn draw_quad(&mut self, quad: &DrawQuad);
}

/// Load a shader asset and verify its declared kind.
///
/// # Errors
/// Returns [`EffectError::ShaderMissing`] when the asset is absent and
/// [`EffectError::ShaderKindMismatch`] when it is the wrong variant. Both
/// are per-call failures the caller degrades on.
pub fn load_shader<D: GpuDevice + ?Sized>(
    device: &mut D,
    name: &'static str,
    kind: ShaderKind,
) -> Result<ShaderProgram, EffectError> {
    let program = device
        .load_program(name)
        .ok_or(EffectError::ShaderMissing { name })?;
    if program.kind != kind {
        log::error!(target: "backdrop", "shader {name} was not a {kind} shader");
        return Err(EffectError::ShaderKindMismatch {
            expected: kind,
            found: program.kind,
        });
    }
    Ok(program)
}

/// Scoped snapshot of the device's [`RenderToggles`].
///
/// Taking the guard records the current flags; dropping it writes them
/// back, so every exit path of a pipeline (including early failure
/// returns) restores the state the driver expects. The guard derefs to
/// the device so pass code can keep drawing through it.
pub struct ToggleGuard<'dev, D: GpuDevice + ?Sized> {
    device: &'dev mut D,
    saved: RenderToggles,
}

impl<'dev, D: GpuDevice + ?Sized> ToggleGuard<'dev, D> {
    /// Snapshot the device's current toggles.
    pub fn new(device: &'dev mut D) -> Self {
        let saved = device.toggles();
        Self { device, saved }
    }

    /// The flags captured when the guard was taken.
    #[must_use]
    pub const fn saved(&self) -> RenderToggles {
        self.saved
    }

    /// Re-apply the saved flags now, e.g. before a final pass that must run
    /// under the caller's scissor/stencil configuration. The guard still
    /// restores on drop.
    pub fn reapply(&mut self) {
        self.device.set_toggles(self.saved);
    }
}

impl<D: GpuDevice + ?Sized> Deref for ToggleGuard<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.device
    }
}

impl<D: GpuDevice + ?Sized> DerefMut for ToggleGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.device
    }
}

impl<D: GpuDevice + ?Sized> Drop for ToggleGuard<'_, D> {
    fn drop(&mut self) {
        self.device.set_toggles(self.saved);
        self.device.set_stencil_mode(StencilMode::Disabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    #[test]
    fn guard_restores_toggles_on_drop() {
        let mut device = MockDevice::new();
        let saved = RenderToggles {
            scissor: true,
            stencil: true,
            blend: false,
            depth: false,
        };
        device.set_toggles(saved);
        {
            let mut guard = ToggleGuard::new(&mut device);
            guard.set_toggles(RenderToggles::default());
            assert_eq!(guard.toggles(), RenderToggles::default());
        }
        assert_eq!(device.toggles(), saved);
    }

    #[test]
    fn load_shader_checks_kind() {
        let mut device = MockDevice::new();
        device.register_program("shadow.shader", ShaderKind::Global);
        let err = load_shader(&mut device, "shadow.shader", ShaderKind::Shadow);
        assert_eq!(
            err,
            Err(EffectError::ShaderKindMismatch {
                expected: ShaderKind::Shadow,
                found: ShaderKind::Global,
            })
        );
    }

    #[test]
    fn load_shader_reports_missing_assets() {
        let mut device = MockDevice::new();
        device.clear_programs();
        let err = load_shader(&mut device, "passthrough.shader", ShaderKind::Passthrough);
        assert_eq!(
            err,
            Err(EffectError::ShaderMissing {
                name: "passthrough.shader"
            })
        );
    }
}
