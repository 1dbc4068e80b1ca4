//! Material instances and the asynchronous material cache.
//!
//! Material content (shader compilation, texture decoding, parameter
//! animation) lives behind the `MaterialLoader` contract. This module owns
//! the lifecycle: loads are fired off to background workers and never
//! awaited; completed instances are drained once per frame on the render
//! thread, where device-side init runs sequentially. Until an instance is
//! ready its surfaces silently contribute nothing: a cooperative skip, not
//! an error. Requests are never cancelled; dropping a handle abandons the
//! eventual result.

use std::sync::Arc;

use crossbeam::queue::SegQueue;
use log::warn;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use thiserror::Error;

use vbsp_common::math::Mat4;

use crate::gfx::{Device, GfxError, ProgramId};
use crate::render_inst::{DrawInstance, RenderLayer, RenderInstList};
use crate::view::SceneView;

#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("material {0} not found")]
    NotFound(String),
    #[error("material {name} failed to parse: {reason}")]
    Parse { name: String, reason: String },
    #[error("device init failed: {0}")]
    Init(#[from] GfxError),
}

/// Per-frame state materials may read while binding draws.
pub struct RenderContext {
    pub device: Arc<dyn Device>,
    pub material_cache: MaterialCache,
    /// Seconds since scene start.
    pub global_time: f64,
    pub global_delta_time: f64,
    /// Draw materials flagged as editor-only.
    pub show_tool_materials: bool,
}

impl RenderContext {
    pub fn new(device: Arc<dyn Device>, loader: Arc<dyn MaterialLoader>) -> Self {
        Self {
            device,
            material_cache: MaterialCache::new(loader),
            global_time: 0.0,
            global_delta_time: 0.0,
            show_tool_materials: false,
        }
    }
}

/// The closed capability surface every material variant implements,
/// resolved once at creation time, with no run-time type inspection afterwards.
pub trait MaterialInstance: Send {
    /// Device-side initialization; runs on the render thread after the
    /// background load completes, possibly spanning frames.
    fn init(&mut self, device: &dyn Device) -> Result<(), MaterialError>;

    /// True once `init` has finished and the material can bind draws.
    fn is_loaded(&self) -> bool;

    /// False hides the material this frame (disabled, fully faded, tool-only).
    fn is_visible(&self, ctx: &RenderContext) -> bool;

    fn layer(&self) -> RenderLayer;

    fn program(&self) -> Option<ProgramId>;

    /// Materials that read back the framebuffer (refraction) draw on the
    /// view's indirect list instead of the main list.
    fn wants_indirect(&self) -> bool {
        false
    }

    /// Per-frame parameter animation.
    fn movement(&mut self, _ctx: &RenderContext) {}

    /// Populate per-draw bindings and uniforms.
    fn bind_to_draw(&self, draw: &mut DrawInstance, model_matrix: &Mat4, lightmap_page_index: u32);
}

/// Pick the view list a material's draws belong on.
pub fn render_inst_list_for_view<'a>(
    material: &dyn MaterialInstance,
    view: &'a mut SceneView,
) -> &'a mut RenderInstList {
    if material.wants_indirect() {
        &mut view.indirect_list
    } else {
        &mut view.main_list
    }
}

/// External factory: name in, CPU-side material instance out. Runs on
/// background workers, so no device access here.
pub trait MaterialLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<Box<dyn MaterialInstance>, MaterialError>;
}

// ============================================================
// Handles
// ============================================================

enum SlotState {
    /// Load requested, not yet drained.
    Pending,
    Ready(Box<dyn MaterialInstance>),
    Failed,
}

struct MaterialSlot {
    name: String,
    state: Mutex<SlotState>,
}

/// A polled reference to a material that may still be loading. Clones share
/// the same slot.
#[derive(Clone)]
pub struct MaterialHandle(Arc<MaterialSlot>);

impl MaterialHandle {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Still waiting on the background load or device init.
    pub fn is_pending(&self) -> bool {
        matches!(*self.0.state.lock(), SlotState::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.0.state.lock(), SlotState::Failed)
    }

    /// The ready instance, or `None` while pending/failed.
    pub fn instance(&self) -> Option<MappedMutexGuard<'_, Box<dyn MaterialInstance>>> {
        let guard = self.0.state.lock();
        MutexGuard::try_map(guard, |state| match state {
            SlotState::Ready(instance) => Some(instance),
            _ => None,
        })
        .ok()
    }
}

// ============================================================
// Cache
// ============================================================

type CompletedLoad = (
    Arc<MaterialSlot>,
    Result<Box<dyn MaterialInstance>, MaterialError>,
);

/// Fire-and-forget material creation. Two phases, mirroring asset upload
/// elsewhere in the engine: background workers run the loader, then the
/// render thread drains completions and performs device init sequentially.
pub struct MaterialCache {
    loader: Arc<dyn MaterialLoader>,
    completed: Arc<SegQueue<CompletedLoad>>,
}

impl MaterialCache {
    pub fn new(loader: Arc<dyn MaterialLoader>) -> Self {
        Self {
            loader,
            completed: Arc::new(SegQueue::new()),
        }
    }

    /// Request a material instance. Returns immediately; poll the handle.
    pub fn create_material_instance(&self, name: &str) -> MaterialHandle {
        let slot = Arc::new(MaterialSlot {
            name: name.to_string(),
            state: Mutex::new(SlotState::Pending),
        });

        let loader = self.loader.clone();
        let queue = self.completed.clone();
        let worker_slot = slot.clone();
        let name = name.to_string();
        rayon::spawn(move || {
            queue.push((worker_slot, loader.load(&name)));
        });

        MaterialHandle(slot)
    }

    /// Drain finished background loads and run device init. Called once per
    /// frame from the render thread; instances whose init fails are marked
    /// failed and skipped forever after.
    pub fn process_completed(&self, device: &dyn Device) {
        while let Some((slot, result)) = self.completed.pop() {
            let mut state = slot.state.lock();
            *state = match result {
                Ok(mut instance) => match instance.init(device) {
                    Ok(()) => SlotState::Ready(instance),
                    Err(err) => {
                        warn!("material {} failed device init: {err}", slot.name);
                        SlotState::Failed
                    }
                },
                Err(err) => {
                    warn!("material {} failed to load: {err}", slot.name);
                    SlotState::Failed
                }
            };
        }
    }
}
