//! Fluid Splat CLI - Run a scripted pointer stroke through the fluid pipeline.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use fluid_splat::{
    compute::{Backend, CpuBackend, FieldId, FluidPipeline, GpuBackend},
    schema::FluidConfig,
};

/// Virtual output surface the stroke is drawn on.
const SURFACE: (u32, u32) = (640, 480);

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_config();
        return;
    }

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [frames] [--gpu]", args[0]);
        eprintln!();
        eprintln!("Drive the fluid pipeline with a circular pointer stroke.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to fluid configuration file");
        eprintln!("  frames       Number of frames to render (default: 120)");
        eprintln!("  --gpu        Run on the GPU backend instead of the CPU reference");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);
    let use_gpu = args.iter().any(|a| a == "--gpu");
    let frames: u64 = args
        .iter()
        .skip(2)
        .find_map(|s| s.parse().ok())
        .unwrap_or(120);

    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });
    let config = FluidConfig::from_json(&config_str).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });

    println!("Fluid Splat");
    println!("===========");
    println!("Surface: {}x{}", SURFACE.0, SURFACE.1);
    println!("Sim/dye resolution: {}/{}", config.sim_res, config.dye_res);
    println!("Pressure iterations: {}", config.pressure_iterations());
    println!("Frames: {}", frames);
    println!(
        "Backend: {}",
        if use_gpu { "GPU (wgpu)" } else { "CPU reference" }
    );
    println!();

    if use_gpu {
        let backend = pollster::block_on(GpuBackend::new()).unwrap_or_else(|e| {
            eprintln!("Error creating GPU backend: {}", e);
            std::process::exit(1);
        });
        let mut pipeline = create_pipeline(backend, config);
        run(&mut pipeline, frames, |_, _| {});
    } else {
        let mut pipeline = create_pipeline(CpuBackend::new(), config);
        run(&mut pipeline, frames, print_field_stats);

        println!();
        println!("Final state:");
        print_field_stats(&pipeline, frames);
    }
}

fn create_pipeline<B: Backend>(backend: B, config: FluidConfig) -> FluidPipeline<B> {
    FluidPipeline::new(backend, config, SURFACE.0, SURFACE.1).unwrap_or_else(|e| {
        eprintln!("Error creating pipeline: {}", e);
        std::process::exit(1);
    })
}

/// Render `frames` frames, moving the pointer along a circle before each one.
fn run<B: Backend>(
    pipeline: &mut FluidPipeline<B>,
    frames: u64,
    mut progress: impl FnMut(&FluidPipeline<B>, u64),
) {
    let mut tracker = pipeline.pointer_tracker();
    let (width, height) = (SURFACE.0 as f32, SURFACE.1 as f32);

    println!("Rendering...");
    let start = Instant::now();

    for i in 0..frames {
        let angle = i as f32 * 0.15;
        tracker.on_move(
            width * (0.5 + 0.3 * angle.cos()),
            height * (0.5 + 0.3 * angle.sin()),
        );

        if let Err(e) = pipeline.render_frame() {
            eprintln!("Error rendering frame {}: {}", i, e);
            std::process::exit(1);
        }

        // Print progress every 10%
        if (i + 1) % (frames / 10).max(1) == 0 {
            let elapsed = start.elapsed().as_secs_f32();
            println!(
                "  Frame {}/{}: {:.1} frames/s",
                i + 1,
                frames,
                (i + 1) as f32 / elapsed
            );
            progress(pipeline, i + 1);
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!(
        "Time: {:.2}s ({:.1} frames/s)",
        elapsed.as_secs_f32(),
        frames as f32 / elapsed.as_secs_f32()
    );
}

fn print_field_stats(pipeline: &FluidPipeline<CpuBackend>, _frame: u64) {
    for (name, id) in [("density", FieldId::Density), ("velocity", FieldId::Velocity)] {
        let stats = pipeline
            .field(id)
            .ok()
            .and_then(|buffer| pipeline.backend().stats(buffer.id()));
        if let Some(stats) = stats {
            println!(
                "    {:<8} range=[{:.4}, {:.4}], total={:.4}, non-finite={}",
                name, stats.min, stats.max, stats.total, stats.non_finite
            );
        }
    }
}

fn print_example_config() {
    let config = FluidConfig::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}
