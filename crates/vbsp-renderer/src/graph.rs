//! Declared render-pass sequence with explicit attachment and resolve
//! dependencies.
//!
//! A pass that needs to read a target some earlier (or the same) pass wrote
//! declares a resolve on it; the executor snapshots the target's current
//! contents into a fresh texture before the pass begins, and the pass can
//! only reach that snapshot through its scope. No pass can ever sample a
//! resource it is concurrently writing.

use crate::gfx::{
    ColorAttachment, DepthAttachment, Device, Format, GfxError, PassEncoder, RenderPassDesc,
    TextureDesc, TextureDimension, TextureId, TextureUsage,
};

#[derive(Debug, Clone)]
pub struct RenderTargetDesc {
    pub name: String,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub clear_color: Option<[f32; 4]>,
    pub clear_depth: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetId(usize);

/// Index of one resolve declaration within its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveId(usize);

/// Snapshot textures available to an executing pass.
pub struct PassScope {
    resolved: Vec<TextureId>,
}

impl PassScope {
    pub fn resolve_texture(&self, id: ResolveId) -> TextureId {
        self.resolved[id.0]
    }
}

type PassExec = Box<dyn FnOnce(&mut dyn PassEncoder, &PassScope)>;

pub struct RenderPass {
    name: String,
    color: Option<TargetId>,
    depth: Option<TargetId>,
    resolves: Vec<TargetId>,
    exec: Option<PassExec>,
}

impl RenderPass {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            color: None,
            depth: None,
            resolves: Vec::new(),
            exec: None,
        }
    }

    pub fn attach_color(&mut self, target: TargetId) {
        self.color = Some(target);
    }

    pub fn attach_depth(&mut self, target: TargetId) {
        self.depth = Some(target);
    }

    /// Declare a read of `target`'s contents as they are when this pass
    /// starts. The snapshot is reachable through the scope at exec time.
    pub fn attach_resolve(&mut self, target: TargetId) -> ResolveId {
        self.resolves.push(target);
        ResolveId(self.resolves.len() - 1)
    }

    pub fn set_exec(&mut self, exec: PassExec) {
        self.exec = Some(exec);
    }
}

/// Builds and runs one frame's pass sequence.
#[derive(Default)]
pub struct GraphBuilder {
    targets: Vec<RenderTargetDesc>,
    passes: Vec<RenderPass>,
    external_resolves: Vec<(TargetId, TextureId)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_render_target(&mut self, desc: RenderTargetDesc) -> TargetId {
        self.targets.push(desc);
        TargetId(self.targets.len() - 1)
    }

    pub fn push_pass(&mut self, pass: RenderPass) {
        self.passes.push(pass);
    }

    /// Copy a target's final contents into an externally-owned texture
    /// (the backbuffer) after all passes ran.
    pub fn resolve_to_external(&mut self, target: TargetId, dst: TextureId) {
        self.external_resolves.push((target, dst));
    }

    fn texture_desc(desc: &RenderTargetDesc, usage: TextureUsage) -> TextureDesc {
        TextureDesc {
            dimension: TextureDimension::D2,
            format: desc.format,
            width: desc.width,
            height: desc.height,
            depth: 1,
            num_levels: 1,
            usage,
        }
    }

    /// Allocate targets, run every pass in declaration order with its
    /// snapshots, resolve externals, then release the transients.
    pub fn execute(self, device: &dyn Device) -> Result<(), GfxError> {
        let mut textures = Vec::with_capacity(self.targets.len());
        for desc in &self.targets {
            textures.push(device.create_texture(&Self::texture_desc(desc, TextureUsage::RenderTarget))?);
        }

        let mut snapshots: Vec<TextureId> = Vec::new();
        // Clear values apply on a target's first use; later passes load.
        let mut written = vec![false; self.targets.len()];

        let result = (|| {
            for pass in self.passes {
                let mut scope = PassScope {
                    resolved: Vec::with_capacity(pass.resolves.len()),
                };
                for target in &pass.resolves {
                    let desc = &self.targets[target.0];
                    let snapshot =
                        device.create_texture(&Self::texture_desc(desc, TextureUsage::Sampled))?;
                    device.copy_texture(textures[target.0], snapshot)?;
                    snapshots.push(snapshot);
                    scope.resolved.push(snapshot);
                }

                let color = pass.color.map(|t| ColorAttachment {
                    texture: textures[t.0],
                    clear: if written[t.0] {
                        None
                    } else {
                        self.targets[t.0].clear_color
                    },
                });
                let depth = pass.depth.map(|t| DepthAttachment {
                    texture: textures[t.0],
                    clear: if written[t.0] {
                        None
                    } else {
                        self.targets[t.0].clear_depth
                    },
                });
                if let Some(t) = pass.color {
                    written[t.0] = true;
                }
                if let Some(t) = pass.depth {
                    written[t.0] = true;
                }

                let mut encoder = device.begin_pass(&RenderPassDesc {
                    name: pass.name,
                    color,
                    depth,
                })?;
                if let Some(exec) = pass.exec {
                    exec(&mut *encoder, &scope);
                }
            }

            for (target, dst) in &self.external_resolves {
                device.copy_texture(textures[target.0], *dst)?;
            }
            Ok(())
        })();

        for texture in snapshots.into_iter().chain(textures) {
            device.destroy_texture(texture);
        }
        result
    }
}
