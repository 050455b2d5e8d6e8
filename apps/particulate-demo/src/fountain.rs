//! A particle fountain: producers emit velocities, the simulate pass
//! integrates positions on the host backend.

use glam::Vec3;
use particulate_core::{AttributeFormat, AttributeLayout, AttributeSpec};
use particulate_gpu::host::{FeedbackInput, FeedbackOutput};
use particulate_gpu::{AttributeSlot, HostProgram};

/// Uniforms the fountain programs read.
const UNIFORMS: [&str; 5] = ["u_mvpMatrix", "u_time", "u_lifetime", "u_size", "u_frameLen"];

/// Gravity applied by the simulate kernel, in units per second squared.
const GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);

pub fn layout() -> anyhow::Result<AttributeLayout> {
    Ok(AttributeLayout::new(
        vec![AttributeSpec::new("a_velocity", AttributeFormat::Float3)],
        vec![AttributeSpec::new("a_position", AttributeFormat::Float3)],
    )?)
}

pub fn calculate_program() -> HostProgram {
    HostProgram::new()
        .with_attributes(["a_velocity", "a_position"])
        .with_uniforms(UNIFORMS)
}

pub fn render_program() -> HostProgram {
    HostProgram::new()
        .with_attributes(["a_velocity", "a_position", "a_offset", "a_texCoord"])
        .with_uniforms(UNIFORMS)
}

/// Velocities for one emitted batch, spread around the up axis.
pub fn emit(batch: u64, batch_size: u32) -> Vec<u8> {
    (0..batch_size)
        .flat_map(|i| {
            let angle = (batch as f32 * 0.37 + i as f32 * 2.399) % std::f32::consts::TAU;
            let spread = 0.5 + (i % 7) as f32 * 0.1;
            let velocity = Vec3::new(angle.cos() * spread, 4.0, angle.sin() * spread);
            velocity.to_array()
        })
        .flat_map(f32::to_ne_bytes)
        .collect()
}

fn vec3s(bytes: &[u8]) -> impl Iterator<Item = Vec3> + '_ {
    bytes.chunks_exact(12).map(|c| {
        let f = |o: usize| f32::from_ne_bytes([c[o], c[o + 1], c[o + 2], c[o + 3]]);
        Vec3::new(f(0), f(4), f(8))
    })
}

/// Kernel integrating `a_position` by `a_velocity` over a fixed step.
pub fn integrator(dt: f32) -> impl FnMut(u32, &[FeedbackInput], &mut [FeedbackOutput]) + Send {
    move |_count: u32, inputs: &[FeedbackInput], outputs: &mut [FeedbackOutput]| {
        let find = |slot| inputs.iter().find(|i| i.slot == AttributeSlot(slot));
        let (Some(velocity), Some(position), Some(output)) = (find(0), find(1), outputs.first_mut())
        else {
            return;
        };

        output.data = vec3s(&velocity.data)
            .zip(vec3s(&position.data))
            .flat_map(|(v, p)| (p + v * dt + 0.5 * GRAVITY * dt * dt).to_array())
            .flat_map(f32::to_ne_bytes)
            .collect();
    }
}
