//! Deploys a toy denoiser through the compiled-graph shim, runs a short
//! multi-resolution sampling loop, then saves and restores the graph state.

use std::sync::Arc;

use anyhow::Result;
use diffuse_rs::{
    deploy, ArgTree, DType, DeployOptions, NetworkModule, ParameterSpec, Shape, Tensor,
};
use diffuse_rs_backend_ref_cpu::CpuGraphBackend;
use rand::rngs::StdRng;
use rand::SeedableRng;

struct DemoDenoiser;

impl NetworkModule for DemoDenoiser {
    fn invoke(&self, args: &ArgTree<Tensor>) -> Result<ArgTree<Tensor>> {
        args.try_map_tensors(&mut |tensor: &Tensor| {
            if tensor.dtype() == DType::F32 {
                tensor.map(|x| x * 0.8)
            } else {
                Ok(tensor.clone())
            }
        })
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec {
            name: "eps.weight".to_string(),
            dims: vec![4, 4],
            dtype: DType::F32,
        }]
    }
}

fn denoiser_args(height: usize, width: usize, timestep: i64, rng: &mut StdRng) -> ArgTree<Tensor> {
    let latents = Tensor::randn(Shape::new([1, 4, height, width]), 1.0, rng);
    let conditioning = Tensor::randn(Shape::new([1, 77, 32]), 1.0, rng);
    ArgTree::denoiser_call(latents, Tensor::scalar_i64(timestep), conditioning)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let mut rng = StdRng::seed_from_u64(42);

    let backend = Arc::new(CpuGraphBackend::new());
    let mut denoiser = deploy(
        Arc::clone(&backend),
        Arc::new(DemoDenoiser),
        DeployOptions::default(),
    )?;
    denoiser.set_cache_capacity(2)?;

    for (height, width) in [(64, 64), (64, 96)] {
        for timestep in [981i64, 961, 941, 921] {
            let args = denoiser_args(height, width, timestep, &mut rng);
            let output = denoiser.apply_model(&args)?;
            println!(
                "{height}x{width} t={timestep}: {} output tensors, {} graphs resident",
                output.tensor_count(),
                denoiser.resident_graphs()
            );
        }
    }

    let path = std::env::temp_dir().join("diffuse_rs_demo_graph.bin");
    denoiser.save_graph(&path)?;
    println!("saved graph state to {}", path.display());

    let mut warmed = deploy(backend, Arc::new(DemoDenoiser), DeployOptions::default())?;
    warmed.warmup_with_load(&path, None)?;
    let args = denoiser_args(64, 96, 901, &mut rng);
    warmed.invoke(&args)?;
    println!("warmed shim served the first call without compiling");

    std::fs::remove_file(&path)?;
    Ok(())
}
