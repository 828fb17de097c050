//! GI Preview
//!
//! Headless preview of the GI pipeline: builds a small voxel room with a
//! skylight and a glowing block, ray-casts a G-buffer from a fixed camera,
//! runs a number of GI frames and writes the composite to a PNG.
//!
//! Usage:
//!   gi_preview [--frames N] [--size WxH] [--config gi.json] [--out preview.png] [--gpu]

use std::error::Error;
use std::path::PathBuf;

use glam::{IVec3, UVec3, Vec2, Vec3};
use voxel_gi_engine::gi::dda::{FACE_NORMALS, TraceOutcome, trace_ray};
use voxel_gi_engine::gi::math::encode_normal_unorm;
use voxel_gi_engine::gi::{
    CameraMatrices, CpuGiPipeline, FrameInputs, FrameStats, GiConfig, ImagePlane, LightLuts, OccupancyCell,
    OccupancyVolume, VolumeWindow,
};
use voxel_gi_engine::render::{GpuContext, GpuContextConfig, GpuGiPipeline};

/// Material ids of the preview room
const STONE: u16 = 1;
const PLASTER: u16 = 2;
const LAMP: u16 = 3;

const SUN_DIRECTION: Vec3 = Vec3::new(0.35, 1.0, 0.2);
const GBUFFER_STEPS: u32 = 256;

struct Options {
    frames: u32,
    width: u32,
    height: u32,
    config: Option<PathBuf>,
    out: PathBuf,
    gpu: bool,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut opts = Self {
            frames: 16,
            width: 320,
            height: 180,
            config: None,
            out: PathBuf::from("gi_preview.png"),
            gpu: false,
        };
        let mut it = args.iter();
        while let Some(arg) = it.next() {
            let mut value = || it.next().ok_or_else(|| format!("missing value for {arg}"));
            match arg.as_str() {
                "--frames" => opts.frames = value()?.parse().map_err(|e| format!("--frames: {e}"))?,
                "--size" => {
                    let v = value()?;
                    let (w, h) = v.split_once('x').ok_or_else(|| format!("--size expects WxH, got {v}"))?;
                    opts.width = w.parse().map_err(|e| format!("--size: {e}"))?;
                    opts.height = h.parse().map_err(|e| format!("--size: {e}"))?;
                }
                "--config" => opts.config = Some(PathBuf::from(value()?)),
                "--out" => opts.out = PathBuf::from(value()?),
                "--gpu" => opts.gpu = true,
                other => return Err(format!("unknown argument {other}")),
            }
        }
        Ok(opts)
    }
}

/// 14×8×14 room with a skylight in the ceiling and a lamp block in one corner.
fn build_room(config: &GiConfig) -> OccupancyVolume {
    let window = VolumeWindow::new(IVec3::new(-16, -4, -16), UVec3::splat(32), config.voxel_size, config.chunk_size);
    let mut vol = OccupancyVolume::new(window);
    vol.fill_box(IVec3::new(-16, -4, -16), IVec3::new(15, 27, 15), OccupancyCell::air(0, 15));

    let solid = |material| OccupancyCell::new(material, 0, 0, 0);
    vol.fill_box(IVec3::new(-8, -2, -8), IVec3::new(7, -1, 7), solid(STONE));
    vol.fill_box(IVec3::new(-8, 0, -8), IVec3::new(-8, 8, 7), solid(PLASTER));
    vol.fill_box(IVec3::new(7, 0, -8), IVec3::new(7, 8, 7), solid(PLASTER));
    vol.fill_box(IVec3::new(-8, 0, -8), IVec3::new(7, 8, -8), solid(PLASTER));
    vol.fill_box(IVec3::new(-8, 8, -8), IVec3::new(7, 8, 7), solid(PLASTER));

    vol.fill_box(IVec3::new(-7, 0, -7), IVec3::new(6, 7, 7), OccupancyCell::air(2, 4));
    vol.fill_box(IVec3::new(-2, 8, -3), IVec3::new(1, 8, 0), OccupancyCell::air(0, 15));
    vol.fill_box(IVec3::new(-2, 0, -3), IVec3::new(1, 7, 0), OccupancyCell::air(2, 12));
    vol.set(IVec3::new(5, 0, -6), OccupancyCell::new(LAMP, 1, 15, 0));
    vol
}

fn albedo_of(material: u32) -> Vec3 {
    match material as u16 {
        STONE => Vec3::new(0.55, 0.5, 0.45),
        PLASTER => Vec3::new(0.8, 0.78, 0.74),
        LAMP => Vec3::ONE,
        _ => Vec3::splat(0.5),
    }
}

struct GBuffer {
    depth: ImagePlane<f32>,
    normals: ImagePlane<Vec3>,
    albedo: ImagePlane<Vec3>,
    metallic: ImagePlane<f32>,
    direct: ImagePlane<Vec3>,
    camera: CameraMatrices,
}

impl GBuffer {
    /// Ray-cast the volume once per pixel.
    fn trace(vol: &OccupancyVolume, luts: &LightLuts, width: u32, height: u32) -> Self {
        let aspect = width as f32 / height as f32;
        let camera = CameraMatrices::look_at(
            Vec3::new(-5.5, 5.0, 6.5),
            Vec3::new(1.0, 1.0, -3.0),
            70f32.to_radians(),
            aspect,
            0.1,
            100.0,
        );
        let sun = SUN_DIRECTION.normalize();

        let mut depth = ImagePlane::new(width, height, 1.0);
        let mut normals = ImagePlane::new(width, height, encode_normal_unorm(Vec3::Y));
        let mut albedo = ImagePlane::new(width, height, Vec3::ZERO);
        let mut direct = ImagePlane::new(width, height, Vec3::ZERO);

        for y in 0..height {
            for x in 0..width {
                let uv = Vec2::new((x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32);
                let origin = camera.eye();
                let dir = (camera.world_position(uv, 1.0) - origin).normalize();
                let TraceOutcome::Hit(hit) = trace_ray(vol, origin, dir, GBUFFER_STEPS, None) else {
                    continue;
                };
                let p = hit.position(origin, dir);
                let Some((_, d)) = camera.project(p) else { continue };
                let n = FACE_NORMALS[hit.face as usize].as_vec3();
                let a = albedo_of(hit.cell.material());

                let lit = n.dot(sun).max(0.0);
                let shadowed = lit > 0.0 && trace_ray(vol, p + n * 0.01, sun, GBUFFER_STEPS, None).is_hit();
                let sun_light = if shadowed { Vec3::ZERO } else { luts.sun_color * lit };

                depth.set(x, y, d);
                normals.set(x, y, encode_normal_unorm(n));
                albedo.set(x, y, a);
                direct.set(x, y, sun_light * a + luts.emission(hit.cell));
            }
        }

        Self { depth, normals, albedo, metallic: ImagePlane::new(width, height, 0.0), direct, camera }
    }

    fn inputs(&self) -> FrameInputs<'_> {
        FrameInputs {
            depth: &self.depth,
            normals: &self.normals,
            albedo: &self.albedo,
            metallic: &self.metallic,
            direct: &self.direct,
            camera: self.camera,
        }
    }
}

fn log_stats(stats: &FrameStats) {
    let c = stats.counters;
    let hit_rate = if c.rays > 0 { c.hits as f32 / c.rays as f32 } else { 0.0 };
    log::info!(
        "[GiPreview] Frame {}: {} probes, {} pages captured, {} resident, {} rays ({:.1}% hit, {} out of bounds)",
        stats.frame_index,
        stats.valid_probes,
        stats.captured_pages,
        stats.pages.resident,
        c.rays,
        hit_rate * 100.0,
        c.out_of_bounds_starts
    );
}

/// Reinhard tonemap and sRGB-ish gamma.
fn to_rgb8(c: Vec3) -> [u8; 3] {
    let mapped = c / (Vec3::ONE + c);
    let g = mapped.max(Vec3::ZERO).powf(1.0 / 2.2) * 255.0;
    [g.x.round() as u8, g.y.round() as u8, g.z.round() as u8]
}

fn write_png(path: &PathBuf, plane: &ImagePlane<Vec3>) -> Result<(), Box<dyn Error>> {
    let img = image::RgbImage::from_fn(plane.width(), plane.height(), |x, y| image::Rgb(to_rgb8(plane.get(x, y))));
    img.save(path)?;
    log::info!("[GiPreview] Wrote {}", path.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = Options::parse(&args)?;

    let mut config = match &opts.config {
        Some(path) => GiConfig::load(path)?,
        None => GiConfig::default(),
    };
    config.debug_counters = true;

    let volume = build_room(&config);
    let luts = LightLuts::default().with_sun_color(config.sun_color);
    let gbuffer = GBuffer::trace(&volume, &luts, opts.width, opts.height);
    log::info!("[GiPreview] {}x{} G-buffer, {} frames", opts.width, opts.height, opts.frames);

    let combined = if opts.gpu {
        let ctx = GpuContext::new(&GpuContextConfig::default())?;
        let mut gi = GpuGiPipeline::new(ctx, config, opts.width, opts.height)?;
        for _ in 0..opts.frames {
            let stats = gi.render_frame(&gbuffer.inputs(), &volume)?;
            log_stats(&stats);
        }
        gi.resources().read_combined(gi.context())?
    } else {
        let mut gi = CpuGiPipeline::new(config, opts.width, opts.height)?;
        for _ in 0..opts.frames {
            let stats = gi.render_frame(&gbuffer.inputs(), &volume)?;
            log_stats(&stats);
        }
        gi.combined().clone()
    };

    write_png(&opts.out, &combined)
}
