//! Runs a simulated editing session against a pair of [Vbo]s and prints how their blocks are laid
//! out over time.
//!
//! Usage: `visualizer [workload.json]`. Every field of the workload is optional.

use std::{num::NonZeroU64, path::Path};

use bytemuck::{Pod, Zeroable};
use glam::{vec2, vec3, Vec2, Vec3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use vbo::{BlockHandle, BufferTarget, HostDevice, Vbo, VboConfig, VboManager, VboState};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct Workload {
    frames: u32,
    /// Faces added each frame, at most.
    faces_per_frame: u32,
    /// Faces removed each frame, at most.
    removals_per_frame: u32,
    max_face_vertices: u32,
    /// Print the block layout every this many frames.
    print_every: u32,
    seed: u64,
    vbo: VboConfig,
}

impl Default for Workload {
    fn default() -> Self {
        Workload {
            frames: 120,
            faces_per_frame: 24,
            removals_per_frame: 20,
            max_face_vertices: 12,
            print_every: 20,
            seed: 0,
            vbo: VboConfig {
                initial_capacity: 4096,
                ..Default::default()
            },
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: Vec3,
    uv: Vec2,
}

/// A convex polygon living in both buffers.
struct Face {
    vertices: BlockHandle,
    indices: BlockHandle,
}

struct MainState {
    workload: Workload,
    device: HostDevice,
    manager: VboManager,
    vertices: Vbo,
    indices: Vbo,
    faces: Vec<Face>,
    rng: StdRng,
}

impl MainState {
    fn new(workload: Workload) -> anyhow::Result<MainState> {
        let mut device = HostDevice::new();
        let mut manager = VboManager::with_config(workload.vbo)?;
        let mut vertices = manager.allocate_default_vbo(BufferTarget::Vertex);
        let mut indices = manager.allocate_default_vbo(BufferTarget::Index);
        vertices.activate(&mut device)?;
        indices.activate(&mut device)?;

        Ok(MainState {
            rng: StdRng::seed_from_u64(workload.seed),
            workload,
            device,
            manager,
            vertices,
            indices,
            faces: vec![],
        })
    }

    fn add_face(&mut self) -> anyhow::Result<()> {
        let count = self.rng.gen_range(3..=self.workload.max_face_vertices.max(3));
        let center = vec3(
            self.rng.gen_range(-512.0..512.0),
            self.rng.gen_range(-512.0..512.0),
            self.rng.gen_range(-512.0..512.0),
        );
        let polygon: Vec<Vertex> = (0..count)
            .map(|i| {
                let angle = i as f32 / count as f32 * std::f32::consts::TAU;
                let (sin, cos) = angle.sin_cos();
                Vertex {
                    position: center + vec3(cos, sin, 0.) * 16.,
                    uv: vec2(cos * 0.5 + 0.5, sin * 0.5 + 0.5),
                }
            })
            .collect();
        // Triangle fan around the first vertex.
        let fan: Vec<u32> = (1..count - 1).flat_map(|i| [0, i, i + 1]).collect();

        let vertices = write_block(&mut self.vertices, &mut self.device, &polygon)?;
        let indices = write_block(&mut self.indices, &mut self.device, &fan)?;
        self.faces.push(Face { vertices, indices });
        Ok(())
    }

    /// Simulates one frame: faces come and go, and blocks retired this frame are only freed once
    /// the frame is over.
    fn update(&mut self) -> anyhow::Result<()> {
        let removals = self.rng.gen_range(0..=self.workload.removals_per_frame);
        for _ in 0..removals.min(self.faces.len() as u32) {
            let index = self.rng.gen_range(0..self.faces.len());
            let face = self.faces.swap_remove(index);
            self.vertices.enqueue_block_for_freeing(face.vertices)?;
            self.indices.enqueue_block_for_freeing(face.indices)?;
        }

        let additions = self.rng.gen_range(0..=self.workload.faces_per_frame);
        for _ in 0..additions {
            self.add_face()?;
        }

        // End of frame: nothing in flight references the retired blocks anymore.
        self.vertices.free_pending_blocks()?;
        self.indices.free_pending_blocks()?;
        Ok(())
    }

    fn draw(&self, frame: u32) {
        println!("frame {frame}: {} faces", self.faces.len());
        println!("  vertices {}", layout_bar(&self.vertices, 64));
        println!("  indices  {}", layout_bar(&self.indices, 64));
    }

    fn finish(self) -> anyhow::Result<()> {
        log::debug!("{:?}", self.vertices);
        log::debug!("{:?}", self.indices);
        let MainState {
            mut device,
            mut manager,
            vertices,
            indices,
            ..
        } = self;

        println!("{}", serde_json::to_string_pretty(&manager.stats())?);
        manager.destroy_vbo(&mut device, vertices)?;
        manager.destroy_vbo(&mut device, indices)?;
        Ok(())
    }
}

/// Writes `elements` into a fresh block of `vbo`.
fn write_block<T: Pod>(
    vbo: &mut Vbo,
    device: &mut HostDevice,
    elements: &[T],
) -> anyhow::Result<BlockHandle> {
    let size = NonZeroU64::new(std::mem::size_of_val(elements) as u64)
        .ok_or_else(|| anyhow::anyhow!("tried to upload an empty array"))?;
    let block = vbo.scoped(device, VboState::FullyMapped, |vbo, device| {
        let block = vbo.allocate_block(device, size)?;
        vbo.write_array(device, &block, 0, elements)?;
        Ok(block)
    })?;
    Ok(block)
}

/// Renders the blocks of `vbo` as a bar of `width` cells: `#` used, `.` free, `+` mixed.
fn layout_bar(vbo: &Vbo, width: usize) -> String {
    let capacity = vbo.capacity();
    let mut used = vec![0u64; width];
    for block in vbo.blocks().filter(|block| !block.is_free()) {
        for (cell, used) in used.iter_mut().enumerate() {
            let start = capacity * cell as u64 / width as u64;
            let end = capacity * (cell as u64 + 1) / width as u64;
            *used += block.end().min(end).saturating_sub(block.offset().max(start));
        }
    }

    let bar: String = used
        .iter()
        .enumerate()
        .map(|(cell, &used)| {
            let start = capacity * cell as u64 / width as u64;
            let end = capacity * (cell as u64 + 1) / width as u64;
            match used {
                0 => '.',
                used if used >= end - start => '#',
                _ => '+',
            }
        })
        .collect();
    format!(
        "|{bar}| {}/{} bytes used, {} blocks",
        vbo.used_capacity(),
        capacity,
        vbo.block_count()
    )
}

fn load_workload(path: Option<&Path>) -> anyhow::Result<Workload> {
    match path {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(Workload::default()),
    }
}

pub fn main() -> anyhow::Result<()> {
    env_logger::init();
    let path = std::env::args().nth(1);
    let workload = load_workload(path.as_deref().map(Path::new))?;
    log::info!("running {:?}", workload);

    let mut state = MainState::new(workload)?;
    for frame in 1..=state.workload.frames {
        state.update()?;
        if state.workload.print_every > 0 && frame % state.workload.print_every == 0 {
            state.draw(frame);
        }
    }
    state.finish()
}
