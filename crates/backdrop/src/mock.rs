//! Deterministic in-memory [`GpuDevice`] for tests.
//!
//! Records every draw with the program kind, bound framebuffer, viewport
//! and uniforms that were in effect, tracks live resource counts, and can
//! inject allocation failures, so pipeline behavior (pass counts, toggle
//! restoration, rollback on partial allocation) is directly assertable
//! without a GPU.

use crate::geometry::{Rect, Size};
use crate::gpu::{
    DrawQuad, EffectError, FramebufferId, GpuDevice, RenderToggles, RenderbufferId, ShaderKind,
    ShaderProgram, StencilMode, TextureId, Uniform,
};
use std::collections::{BTreeMap, HashMap};

/// One recorded [`GpuDevice::draw_quad`] call plus the device state it ran
/// under.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub kind: ShaderKind,
    pub source: TextureId,
    pub target_rect: Rect,
    pub uniforms: Vec<Uniform>,
    pub framebuffer: Option<FramebufferId>,
    pub viewport: Size,
    pub toggles: RenderToggles,
    pub stencil_mode: StencilMode,
}

/// In-memory mock device.
pub struct MockDevice {
    next_id: u64,
    textures: BTreeMap<u64, Size>,
    framebuffers: BTreeMap<u64, ()>,
    stencils: BTreeMap<u64, Size>,
    programs: HashMap<String, ShaderProgram>,
    draws: Vec<DrawRecord>,
    toggles: RenderToggles,
    stencil_mode: StencilMode,
    bound_framebuffer: Option<FramebufferId>,
    viewport: Size,
    texture_budget: usize,
    stencil_budget: usize,
    framebuffer_budget: usize,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A device with every shader asset present under its expected kind
    /// and unlimited allocation budgets.
    #[must_use]
    pub fn new() -> Self {
        let mut device = Self {
            next_id: 1,
            textures: BTreeMap::new(),
            framebuffers: BTreeMap::new(),
            stencils: BTreeMap::new(),
            programs: HashMap::new(),
            draws: Vec::new(),
            toggles: RenderToggles::default(),
            stencil_mode: StencilMode::Disabled,
            bound_framebuffer: None,
            viewport: Size::new(0, 0),
            texture_budget: usize::MAX,
            stencil_budget: usize::MAX,
            framebuffer_budget: usize::MAX,
        };
        device.register_program("downsample.shader", ShaderKind::Downsample);
        device.register_program("upsample.shader", ShaderKind::Upsample);
        device.register_program("passthrough.shader", ShaderKind::Passthrough);
        device.register_program("shadow.shader", ShaderKind::Shadow);
        device.register_program("global.shader", ShaderKind::Global);
        device
    }

    /// Register (or replace) a shader asset with the given kind tag. Use a
    /// mismatched kind to exercise the failure paths.
    pub fn register_program(&mut self, name: &str, kind: ShaderKind) {
        let id = self.programs.len() as u32;
        self.programs.insert(name.to_owned(), ShaderProgram { id, kind });
    }

    /// Remove every shader asset.
    pub fn clear_programs(&mut self) {
        self.programs.clear();
    }

    /// Allow only `budget` further texture allocations before failing.
    pub fn fail_texture_allocs_after(&mut self, budget: usize) {
        self.texture_budget = budget;
    }

    /// Allow only `budget` further stencil allocations before failing.
    pub fn fail_stencil_allocs_after(&mut self, budget: usize) {
        self.stencil_budget = budget;
    }

    /// Allow only `budget` further framebuffer allocations before failing.
    pub fn fail_framebuffer_allocs_after(&mut self, budget: usize) {
        self.framebuffer_budget = budget;
    }

    /// All recorded draws, in order.
    #[must_use]
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Recorded draws with the given shader kind.
    #[must_use]
    pub fn draws_of(&self, kind: ShaderKind) -> Vec<&DrawRecord> {
        self.draws.iter().filter(|draw| draw.kind == kind).collect()
    }

    /// Number of recorded draws with the given shader kind.
    #[must_use]
    pub fn draw_count(&self, kind: ShaderKind) -> usize {
        self.draws.iter().filter(|draw| draw.kind == kind).count()
    }

    /// Forget recorded draws (budgets and resources are kept).
    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    /// Number of live textures.
    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Number of live framebuffers.
    #[must_use]
    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Number of live stencil renderbuffers.
    #[must_use]
    pub fn live_stencils(&self) -> usize {
        self.stencils.len()
    }

    /// Current size of a live texture.
    #[must_use]
    pub fn texture_size(&self, id: TextureId) -> Option<Size> {
        self.textures.get(&id.0).copied()
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl GpuDevice for MockDevice {
    fn create_texture(&mut self, size: Size) -> Result<TextureId, EffectError> {
        if self.texture_budget == 0 {
            return Err(EffectError::Allocation { what: "texture" });
        }
        self.texture_budget = self.texture_budget.saturating_sub(1);
        let id = self.take_id();
        self.textures.insert(id, size);
        Ok(TextureId(id))
    }

    fn resize_texture(&mut self, id: TextureId, size: Size) -> Result<(), EffectError> {
        match self.textures.get_mut(&id.0) {
            Some(stored) => {
                *stored = size;
                Ok(())
            }
            None => Err(EffectError::Allocation { what: "texture" }),
        }
    }

    fn delete_texture(&mut self, id: TextureId) {
        self.textures.remove(&id.0);
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, EffectError> {
        if self.framebuffer_budget == 0 {
            return Err(EffectError::Allocation { what: "framebuffer" });
        }
        self.framebuffer_budget = self.framebuffer_budget.saturating_sub(1);
        let id = self.take_id();
        self.framebuffers.insert(id, ());
        Ok(FramebufferId(id))
    }

    fn delete_framebuffer(&mut self, id: FramebufferId) {
        self.framebuffers.remove(&id.0);
    }

    fn create_stencil(&mut self, size: Size) -> Result<RenderbufferId, EffectError> {
        if self.stencil_budget == 0 {
            return Err(EffectError::Allocation {
                what: "stencil renderbuffer",
            });
        }
        self.stencil_budget = self.stencil_budget.saturating_sub(1);
        let id = self.take_id();
        self.stencils.insert(id, size);
        Ok(RenderbufferId(id))
    }

    fn resize_stencil(&mut self, id: RenderbufferId, size: Size) -> Result<(), EffectError> {
        match self.stencils.get_mut(&id.0) {
            Some(stored) => {
                *stored = size;
                Ok(())
            }
            None => Err(EffectError::Allocation {
                what: "stencil renderbuffer",
            }),
        }
    }

    fn delete_stencil(&mut self, id: RenderbufferId) {
        self.stencils.remove(&id.0);
    }

    fn reset_framebuffer_targets(&mut self, _fb: FramebufferId) {}

    fn attach_texture(&mut self, _fb: FramebufferId, _texture: TextureId) {}

    fn attach_stencil(&mut self, _fb: FramebufferId, _stencil: RenderbufferId) {}

    fn bind_framebuffer(&mut self, fb: Option<FramebufferId>) {
        self.bound_framebuffer = fb;
    }

    fn set_viewport(&mut self, size: Size) {
        self.viewport = size;
    }

    fn clear(&mut self, _color: [f32; 4], _stencil: bool) {}

    fn set_stencil_mode(&mut self, mode: StencilMode) {
        self.stencil_mode = mode;
    }

    fn toggles(&self) -> RenderToggles {
        self.toggles
    }

    fn set_toggles(&mut self, toggles: RenderToggles) {
        self.toggles = toggles;
    }

    fn load_program(&mut self, name: &str) -> Option<ShaderProgram> {
        self.programs.get(name).copied()
    }

    fn draw_quad(&mut self, quad: &DrawQuad) {
        self.draws.push(DrawRecord {
            kind: quad.program.kind,
            source: quad.source,
            target_rect: quad.target_rect,
            uniforms: quad.uniforms.clone(),
            framebuffer: self.bound_framebuffer,
            viewport: self.viewport,
            toggles: self.toggles,
            stencil_mode: self.stencil_mode,
        });
    }
}
