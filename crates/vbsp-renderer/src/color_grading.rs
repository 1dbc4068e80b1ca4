//! Color grading via a 3-D lookup texture.
//!
//! Graded layers blend by weight on top of an identity ramp; when the
//! combined weight exceeds one the weights renormalize, otherwise the
//! identity ramp fills the remainder. The LUT re-uploads lazily on a dirty
//! flag and is sampled by the fullscreen correction pass.

use crate::gfx::{
    Device, Format, GfxError, SamplerDesc, SamplerId, TexFilter, TextureDesc, TextureDimension,
    TextureId, TextureUsage, WrapMode,
};

/// LUT resolution per axis.
pub const LUT_SIZE: usize = 32;

/// Bytes per source layer (RGB).
pub const LAYER_SIZE: usize = LUT_SIZE * LUT_SIZE * LUT_SIZE * 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerId(u64);

struct Layer {
    id: LayerId,
    data: Vec<u8>,
    weight: f32,
}

pub struct ColorCorrection {
    lut_data: Vec<u8>,
    texture: TextureId,
    sampler: SamplerId,
    layers: Vec<Layer>,
    next_layer_id: u64,
    dirty: bool,
    enabled: bool,
}

impl ColorCorrection {
    pub fn new(device: &dyn Device) -> Result<Self, GfxError> {
        let size = LUT_SIZE as u32;
        let texture = device.create_texture(&TextureDesc {
            dimension: TextureDimension::D3,
            format: Format::Rgba8,
            width: size,
            height: size,
            depth: size,
            num_levels: 1,
            usage: TextureUsage::Sampled,
        })?;

        let sampler = device.create_sampler(&SamplerDesc {
            min_filter: TexFilter::Bilinear,
            mag_filter: TexFilter::Bilinear,
            wrap: WrapMode::Clamp,
        })?;

        let mut this = Self {
            lut_data: vec![0u8; LUT_SIZE * LUT_SIZE * LUT_SIZE * 4],
            texture,
            sampler,
            layers: Vec::new(),
            next_layer_id: 0,
            dirty: true,
            enabled: true,
        };
        this.prepare_to_render(device)?;
        Ok(this)
    }

    /// Register a raw 32^3 RGB layer at full weight.
    pub fn add_layer(&mut self, data: Vec<u8>) -> LayerId {
        debug_assert!(data.len() >= LAYER_SIZE);
        let id = LayerId(self.next_layer_id);
        self.next_layer_id += 1;
        self.layers.push(Layer {
            id,
            data,
            weight: 1.0,
        });
        self.dirty = true;
        id
    }

    pub fn remove_layer(&mut self, id: LayerId) {
        self.layers.retain(|l| l.id != id);
        self.dirty = true;
    }

    pub fn set_layer_weight(&mut self, id: LayerId, weight: f32) {
        let Some(layer) = self.layers.iter_mut().find(|l| l.id == id) else {
            return;
        };
        if layer.weight == weight {
            return;
        }
        layer.weight = weight;
        self.dirty = true;
    }

    /// Debug toggle; disabled grading collapses to the identity ramp.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.dirty = true;
    }

    /// Bindings for the fullscreen correction pass.
    pub fn texture_mapping(&self) -> (TextureId, SamplerId) {
        (self.texture, self.sampler)
    }

    /// Recompute and upload the LUT if anything changed.
    pub fn prepare_to_render(&mut self, device: &dyn Device) -> Result<(), GfxError> {
        if !self.dirty {
            return Ok(());
        }

        let mut weights: Vec<f32> = if self.enabled {
            self.layers.iter().map(|l| l.weight).collect()
        } else {
            Vec::new()
        };

        let total: f32 = weights.iter().sum();
        let default_weight = if total < 1.0 {
            1.0 - total
        } else {
            for w in &mut weights {
                *w /= total;
            }
            0.0
        };

        let size = LUT_SIZE;
        for z in 0..size {
            for y in 0..size {
                for x in 0..size {
                    self.compute_lut_pixel(default_weight, &weights, x, y, z);
                }
            }
        }

        device.upload_texture(self.texture, 0, &self.lut_data)?;
        self.dirty = false;
        Ok(())
    }

    fn compute_lut_pixel(&mut self, default_weight: f32, weights: &[f32], x: usize, y: usize, z: usize) {
        let size = LUT_SIZE;
        let ratio = 255.0 / (size - 1) as f32;

        let dst_px = (((z * size) + y) * size + x) * 4;
        let lut_px = (((z * size) + y) * size + x) * 3;

        let mut r = x as f32 * ratio * default_weight;
        let mut g = y as f32 * ratio * default_weight;
        let mut b = z as f32 * ratio * default_weight;

        for (layer, &weight) in self.layers.iter().zip(weights.iter()) {
            r += layer.data[lut_px] as f32 * weight;
            g += layer.data[lut_px + 1] as f32 * weight;
            b += layer.data[lut_px + 2] as f32 * weight;
        }

        self.lut_data[dst_px] = r.clamp(0.0, 255.0) as u8;
        self.lut_data[dst_px + 1] = g.clamp(0.0, 255.0) as u8;
        self.lut_data[dst_px + 2] = b.clamp(0.0, 255.0) as u8;
        self.lut_data[dst_px + 3] = 0xFF;
    }

    pub fn destroy(&self, device: &dyn Device) {
        device.destroy_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::NullDevice;

    fn pixel(cc: &ColorCorrection, x: usize, y: usize, z: usize) -> [u8; 3] {
        let px = (((z * LUT_SIZE) + y) * LUT_SIZE + x) * 4;
        [cc.lut_data[px], cc.lut_data[px + 1], cc.lut_data[px + 2]]
    }

    #[test]
    fn test_identity_without_layers() {
        let device = NullDevice::new();
        let cc = ColorCorrection::new(&device).unwrap();
        assert_eq!(pixel(&cc, 0, 0, 0), [0, 0, 0]);
        assert_eq!(pixel(&cc, 31, 0, 0), [255, 0, 0]);
        assert_eq!(pixel(&cc, 0, 31, 31), [0, 255, 255]);
    }

    #[test]
    fn test_full_weight_layer_replaces_ramp() {
        let device = NullDevice::new();
        let mut cc = ColorCorrection::new(&device).unwrap();
        // Constant mid-gray layer.
        cc.add_layer(vec![128u8; LAYER_SIZE]);
        cc.prepare_to_render(&device).unwrap();
        assert_eq!(pixel(&cc, 0, 0, 0), [128, 128, 128]);
        assert_eq!(pixel(&cc, 31, 31, 31), [128, 128, 128]);
    }

    #[test]
    fn test_partial_weight_blends_with_identity() {
        let device = NullDevice::new();
        let mut cc = ColorCorrection::new(&device).unwrap();
        let id = cc.add_layer(vec![0u8; LAYER_SIZE]);
        cc.set_layer_weight(id, 0.5);
        cc.prepare_to_render(&device).unwrap();
        // Half identity + half black darkens the white corner to half.
        let corner = pixel(&cc, 31, 31, 31);
        for c in corner {
            assert!((c as i32 - 128).abs() <= 1, "corner {corner:?}");
        }
    }

    #[test]
    fn test_overweight_layers_renormalize() {
        let device = NullDevice::new();
        let mut cc = ColorCorrection::new(&device).unwrap();
        cc.add_layer(vec![200u8; LAYER_SIZE]);
        cc.add_layer(vec![100u8; LAYER_SIZE]);
        cc.prepare_to_render(&device).unwrap();
        // Two full-weight layers renormalize to half each; identity drops out.
        assert_eq!(pixel(&cc, 0, 0, 0), [150, 150, 150]);
    }

    #[test]
    fn test_disabled_grading_is_identity() {
        let device = NullDevice::new();
        let mut cc = ColorCorrection::new(&device).unwrap();
        cc.add_layer(vec![10u8; LAYER_SIZE]);
        cc.set_enabled(false);
        cc.prepare_to_render(&device).unwrap();
        assert_eq!(pixel(&cc, 31, 0, 0), [255, 0, 0]);
    }

    #[test]
    fn test_removed_layer_stops_contributing() {
        let device = NullDevice::new();
        let mut cc = ColorCorrection::new(&device).unwrap();
        let id = cc.add_layer(vec![10u8; LAYER_SIZE]);
        cc.prepare_to_render(&device).unwrap();
        cc.remove_layer(id);
        cc.prepare_to_render(&device).unwrap();
        assert_eq!(pixel(&cc, 31, 0, 0), [255, 0, 0]);
    }
}
