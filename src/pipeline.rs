//! Device-resident solver on a wgpu compute pipeline.
//!
//! The whole body grid runs in one workgroup of `n x n` invocations, so the
//! kernel can use workgroup barriers between its accelerate, reduce and move
//! phases and loop over every step without returning to the host. Grids that do
//! not fit in one workgroup are rejected before anything is dispatched.

use std::borrow::Cow;
use std::fs;
use std::mem::size_of;
use std::path::Path;
use std::sync::mpsc::channel;

use bytemuck::{Pod, Zeroable};
use log::{debug, info};
use serde::Serialize;
use tera::{Context, Tera};
use wgpu::{
    self, Backends, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, BufferBindingType, BufferDescriptor, BufferUsages,
    CommandEncoderDescriptor, ComputePassDescriptor, ComputePipelineDescriptor, DeviceDescriptor,
    ErrorFilter, Features, Instance, Limits, Maintain, MapMode, PipelineLayoutDescriptor,
    PowerPreference, RequestAdapterOptions, ShaderModuleDescriptor, ShaderSource, ShaderStages,
};

use crate::error::{Error, Result};
use crate::solver::Solver;
use crate::structures::{Body, SimulationConfig, Vector3};

pub const KERNEL_TEMPLATE: &str = include_str!("../shaders/dynamics.wgsl");
pub const KERNEL_ENTRY_POINT: &str = "simulate";

/// `f32` mirror of [`Body`] laid out like the kernel's `Body` struct.
#[repr(C, align(16))]
#[derive(Debug, Default, Clone, Copy, Zeroable, Pod)]
pub struct DeviceBody {
    pub position: [f32; 3],
    pub mass: f32,
    pub velocity: [f32; 3],
    pub padding: f32,
}

impl From<&Body> for DeviceBody {
    fn from(body: &Body) -> Self {
        let v = |v: Vector3| [v.x as f32, v.y as f32, v.z as f32];
        Self {
            position: v(body.position),
            mass: body.mass as f32,
            velocity: v(body.velocity),
            padding: 0.0,
        }
    }
}

impl DeviceBody {
    fn position(&self) -> Vector3 {
        let [x, y, z] = self.position;
        Vector3::new(x.into(), y.into(), z.into())
    }

    fn velocity(&self) -> Vector3 {
        let [x, y, z] = self.velocity;
        Vector3::new(x.into(), y.into(), z.into())
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Zeroable, Pod)]
pub struct DeviceParams {
    pub gravitation_constant: f32,
    pub softening_radius: f32,
    pub time_step: f32,
    pub step_count: u32,
}

/// How steps are laid out over dispatches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// One dispatch loops over every step inside the kernel.
    #[default]
    Resident,
    /// One single-workgroup dispatch per step; the host orders the steps.
    PerStep,
}

#[derive(Serialize)]
struct KernelContext {
    body_count: u32,
}

/// Bakes the workgroup size into the kernel template.
pub fn render_kernel(template: &str, body_count: u32) -> Result<String> {
    let context = Context::from_serialize(KernelContext { body_count })
        .map_err(|e| Error::Config(format!("kernel template context: {e}")))?;
    Tera::one_off(template, &context, false)
        .map_err(|e| Error::Config(format!("kernel template: {e}")))
}

/// Fails unless an `n x n` grid fits in one workgroup under `limits`.
pub fn check_workgroup_fit(body_count: u32, limits: &Limits) -> Result<()> {
    let invocations = u64::from(body_count) * u64::from(body_count);
    if body_count > limits.max_compute_workgroup_size_x
        || body_count > limits.max_compute_workgroup_size_y
        || invocations > u64::from(limits.max_compute_invocations_per_workgroup)
    {
        return Err(Error::Resource {
            body_count,
            limit: format!(
                "{}x{} and {} invocations per workgroup",
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_invocations_per_workgroup
            ),
        });
    }
    Ok(())
}

pub struct Pipeline {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    params_bindgroup: wgpu::BindGroup,
    body_bindgroup: wgpu::BindGroup,
    params_buffer: wgpu::Buffer,
    body_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    params: DeviceParams,
    body_count: u32,
    residency: Residency,
}

impl Pipeline {
    pub async fn create(
        kernel_template: &str,
        config: &SimulationConfig,
        residency: Residency,
    ) -> Result<Self> {
        let body_count = u32::try_from(config.body_count).map_err(|_| Error::Resource {
            body_count: u32::MAX,
            limit: "a 32-bit body count".into(),
        })?;

        let instance = Instance::new(Backends::all());
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| Error::Gpu("no compatible adapter".into()))?;
        info!("using adapter {}", adapter.get_info().name);

        let limits = adapter.limits();
        check_workgroup_fit(body_count, &limits)?;

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("Compute device"),
                    features: Features::empty(),
                    limits,
                },
                None,
            )
            .await
            .map_err(|e| Error::Gpu(format!("could not acquire device: {e}")))?;

        let source = render_kernel(kernel_template, body_count)?;
        device.push_error_scope(ErrorFilter::Validation);
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Dynamics kernel"),
            source: ShaderSource::Wgsl(Cow::Owned(source)),
        });
        let params_bindgroup_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: None,
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let storage_entry = |binding| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let body_bindgroup_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: None,
            entries: &[storage_entry(0), storage_entry(1)],
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Compute pipeline layout"),
            bind_group_layouts: &[&params_bindgroup_layout, &body_bindgroup_layout],
            ..Default::default()
        });
        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Compute pipeline"),
            module: &shader,
            entry_point: KERNEL_ENTRY_POINT,
            layout: Some(&pipeline_layout),
        });
        if let Some(error) = device.pop_error_scope().await {
            return Err(Error::Gpu(format!("kernel rejected: {error}")));
        }

        let body_bytes = (config.body_count * size_of::<DeviceBody>()) as u64;
        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Params"),
            size: size_of::<DeviceParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let body_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Bodies"),
            size: body_bytes,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let acceleration_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Accelerations"),
            size: (config.body_count * config.body_count * size_of::<[f32; 4]>()) as u64,
            usage: BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let staging_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Staging"),
            size: body_bytes,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_bindgroup = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Params bind group"),
            layout: &params_bindgroup_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });
        let body_bindgroup = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Body bind group"),
            layout: &body_bindgroup_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: body_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: acceleration_buffer.as_entire_binding(),
                },
            ],
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            params_bindgroup,
            body_bindgroup,
            params_buffer,
            body_buffer,
            staging_buffer,
            params: DeviceParams {
                gravitation_constant: config.gravitation_constant as f32,
                softening_radius: config.softening_radius as f32,
                time_step: config.time_step as f32,
                step_count: 0,
            },
            body_count,
            residency,
        })
    }

    pub fn write_bodies(&self, input: &[Body]) -> Result<()> {
        if input.len() != self.body_count as usize {
            return Err(Error::Domain(format!(
                "pipeline holds {} bodies, got {}",
                self.body_count,
                input.len()
            )));
        }
        let device_bodies: Vec<DeviceBody> = input.iter().map(DeviceBody::from).collect();
        self.queue
            .write_buffer(&self.body_buffer, 0, bytemuck::cast_slice(&device_bodies));
        Ok(())
    }

    /// Runs `step_count` steps and blocks until the device is idle.
    pub fn submit_and_block(&self, step_count: usize) -> Result<()> {
        let (steps_per_dispatch, dispatches) = match self.residency {
            Residency::Resident => (step_count, usize::from(step_count > 0)),
            Residency::PerStep => (1, step_count),
        };
        let params = DeviceParams {
            step_count: u32::try_from(steps_per_dispatch)
                .map_err(|_| Error::Domain(format!("{steps_per_dispatch} steps exceed u32")))?,
            ..self.params
        };
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: None });
        for _ in 0..dispatches {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor { label: None });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.params_bindgroup, &[]);
            pass.set_bind_group(1, &self.body_bindgroup, &[]);
            // one workgroup, so every invocation shares the kernel's barriers
            pass.dispatch_workgroups(1, 1, 1);
        }

        debug!(
            "submitting {} dispatch(es) of {} step(s) each",
            dispatches, steps_per_dispatch
        );
        self.queue.submit(Some(encoder.finish()));
        self.device.poll(Maintain::Wait);
        Ok(())
    }

    /// Copies the bodies back to the host. Masses come back at `f32` precision.
    pub fn read_bodies(&self) -> Result<Vec<DeviceBody>> {
        let size = (self.body_count as usize * size_of::<DeviceBody>()) as u64;
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(&self.body_buffer, 0, &self.staging_buffer, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = self.staging_buffer.slice(..);
        let (sender, receiver) = channel();
        slice.map_async(MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| Error::Gpu("staging buffer map was dropped".into()))?
            .map_err(|e| Error::Gpu(format!("could not map staging buffer: {e}")))?;

        let output = {
            let mapped = slice.get_mapped_range();
            mapped
                .chunks_exact(size_of::<DeviceBody>())
                .map(bytemuck::pod_read_unaligned::<DeviceBody>)
                .collect()
        };
        self.staging_buffer.unmap();
        Ok(output)
    }
}

/// [`Solver`] facade over [`Pipeline`]; blocks on the async setup with `pollster`.
#[derive(Debug, Clone)]
pub struct DeviceSolver {
    kernel_template: String,
    residency: Residency,
}

impl Default for DeviceSolver {
    fn default() -> Self {
        Self::new(Residency::default())
    }
}

impl DeviceSolver {
    pub fn new(residency: Residency) -> Self {
        Self {
            kernel_template: KERNEL_TEMPLATE.to_owned(),
            residency,
        }
    }

    /// Uses a kernel template from disk instead of the built-in one.
    pub fn with_kernel_file(path: impl AsRef<Path>, residency: Residency) -> Result<Self> {
        let path = path.as_ref();
        let kernel_template = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("could not read kernel {}: {e}", path.display()))
        })?;
        Ok(Self {
            kernel_template,
            residency,
        })
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }
}

impl Solver for DeviceSolver {
    fn name(&self) -> &'static str {
        "device"
    }

    fn simulate(&mut self, config: &SimulationConfig, mut bodies: Vec<Body>) -> Result<Vec<Body>> {
        config.validate_bodies(&bodies)?;
        let pipeline = pollster::block_on(Pipeline::create(
            &self.kernel_template,
            config,
            self.residency,
        ))?;
        if config.step_count == 0 {
            // nothing to integrate; skip the f32 round trip
            return Ok(bodies);
        }
        pipeline.write_bodies(&bodies)?;
        pipeline.submit_and_block(config.step_count)?;
        for (body, result) in bodies.iter_mut().zip(pipeline.read_bodies()?) {
            body.position = result.position();
            body.velocity = result.velocity();
        }
        Ok(bodies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_body_matches_kernel_layout() {
        assert_eq!(size_of::<DeviceBody>(), 32);
        assert_eq!(size_of::<DeviceParams>(), 16);
    }

    #[test]
    fn kernel_template_bakes_in_workgroup_size() {
        let source = render_kernel(KERNEL_TEMPLATE, 7).unwrap();
        assert!(source.contains("@workgroup_size(7, 7, 1)"));
        assert!(source.contains("let n = 7u;"));
        assert!(!source.contains("{{"));
    }

    #[test]
    fn broken_template_is_a_config_error() {
        assert!(matches!(
            render_kernel("{{ body_count", 2),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn grid_must_fit_one_workgroup() {
        let limits = Limits {
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_invocations_per_workgroup: 256,
            ..Limits::default()
        };
        assert!(check_workgroup_fit(16, &limits).is_ok());
        assert!(matches!(
            check_workgroup_fit(17, &limits),
            Err(Error::Resource { body_count: 17, .. })
        ));
    }

    #[test]
    fn narrow_axis_limit_is_enforced() {
        let limits = Limits {
            max_compute_workgroup_size_x: 1024,
            max_compute_workgroup_size_y: 4,
            max_compute_invocations_per_workgroup: 1024,
            ..Limits::default()
        };
        assert!(check_workgroup_fit(5, &limits).is_err());
    }

    #[test]
    fn conversion_keeps_components() {
        let body = Body::new(2.0, Vector3::new(1.0, -2.0, 0.5), Vector3::new(0.25, 0.0, -1.0));
        let device = DeviceBody::from(&body);
        assert_eq!(device.mass, 2.0);
        assert_eq!(device.position(), body.position);
        assert_eq!(device.velocity(), body.velocity);
    }

    #[test]
    fn missing_kernel_file_is_a_config_error() {
        assert!(matches!(
            DeviceSolver::with_kernel_file("/nonexistent/dynamics.wgsl", Residency::Resident),
            Err(Error::Config(_))
        ));
    }
}
