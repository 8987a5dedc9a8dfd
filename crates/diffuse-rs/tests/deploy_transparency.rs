use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use diffuse_rs::{
    deploy, ArgTree, CompiledGraph, DeployError, DeployOptions, Device, GraphOptions,
    NetworkModule, ParameterSpec, Shape, ShapeKey, Tensor,
};
use diffuse_rs_backend_ref_cpu::CpuGraphBackend;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Toy denoiser: scales and shifts every float leaf, leaves integer leaves
/// (timesteps) untouched.
struct ToyDenoiser {
    scale: f32,
    shift: f32,
}

impl ToyDenoiser {
    fn new() -> Self {
        ToyDenoiser {
            scale: 0.5,
            shift: -0.25,
        }
    }
}

impl NetworkModule for ToyDenoiser {
    fn invoke(&self, args: &ArgTree<Tensor>) -> anyhow::Result<ArgTree<Tensor>> {
        args.try_map_tensors(&mut |tensor: &Tensor| {
            if tensor.dtype() == diffuse_rs::DType::F32 {
                tensor.map(|x| x * self.scale + self.shift)
            } else {
                Ok(tensor.clone())
            }
        })
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec {
                name: "eps.weight".to_string(),
                dims: vec![4, 4],
                dtype: diffuse_rs::DType::F32,
            },
            ParameterSpec {
                name: "eps.bias".to_string(),
                dims: vec![4],
                dtype: diffuse_rs::DType::F32,
            },
        ]
    }
}

fn cpu_backend() -> Arc<CpuGraphBackend> {
    Arc::new(CpuGraphBackend::new())
}

fn temp_path(label: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("diffuse_rs_{label}_{timestamp}.bin"))
}

fn denoiser_args(height: usize, width: usize, timestep: i64, seed: u64) -> ArgTree<Tensor> {
    let mut rng = StdRng::seed_from_u64(seed);
    let latents = Tensor::randn(Shape::new([1, 4, height, width]), 1.0, &mut rng);
    let conditioning = Tensor::randn(Shape::new([1, 77, 32]), 1.0, &mut rng);
    ArgTree::denoiser_call(latents, Tensor::scalar_i64(timestep), conditioning)
}

#[test]
fn graph_path_matches_eager_path_bit_for_bit() {
    let backend = cpu_backend();
    let mut graph_shim = deploy(
        Arc::clone(&backend),
        Arc::new(ToyDenoiser::new()),
        DeployOptions::default(),
    )
    .unwrap();
    let mut eager_shim = deploy(
        backend,
        Arc::new(ToyDenoiser::new()),
        DeployOptions {
            use_graph: false,
            ..DeployOptions::default()
        },
    )
    .unwrap();

    assert!(graph_shim.graph_mode());
    assert!(!eager_shim.graph_mode());

    for (step, timestep) in [981i64, 961, 941, 921].into_iter().enumerate() {
        let args = denoiser_args(8, 8, timestep, step as u64);
        let from_graph = graph_shim.invoke(&args).unwrap();
        let from_eager = eager_shim.invoke(&args).unwrap();
        assert_eq!(from_graph, from_eager);
    }

    assert_eq!(graph_shim.resident_graphs(), 1);
    assert_eq!(eager_shim.resident_graphs(), 0);
}

#[test]
fn apply_model_is_an_alias_for_invoke() {
    let backend = cpu_backend();
    let mut shim = deploy(
        backend,
        Arc::new(ToyDenoiser::new()),
        DeployOptions::default(),
    )
    .unwrap();

    let args = denoiser_args(8, 8, 500, 3);
    let via_invoke = shim.invoke(&args).unwrap();
    let via_apply_model = shim.apply_model(&args).unwrap();
    assert_eq!(via_invoke, via_apply_model);
}

#[test]
fn multi_resolution_workload_respects_the_cache_bound() {
    let backend = cpu_backend();
    let mut shim = deploy(
        backend,
        Arc::new(ToyDenoiser::new()),
        DeployOptions {
            cache_capacity: 2,
            ..DeployOptions::default()
        },
    )
    .unwrap();

    for (height, width) in [(8, 8), (8, 12), (16, 16), (8, 8)] {
        let args = denoiser_args(height, width, 900, 7);
        shim.invoke(&args).unwrap();
    }

    assert_eq!(shim.resident_graphs(), 2);
}

#[test]
fn eager_shim_rejects_graph_operations() {
    let backend = cpu_backend();
    let mut shim = deploy(
        backend,
        Arc::new(ToyDenoiser::new()),
        DeployOptions {
            use_graph: false,
            ..DeployOptions::default()
        },
    )
    .unwrap();

    let path = temp_path("eager_save");
    match shim.save_graph(&path) {
        Err(DeployError::InvalidState(_)) => {}
        other => panic!("expected an invalid-state error, got {other:?}"),
    }
    match shim.set_cache_capacity(4) {
        Err(DeployError::InvalidState(_)) => {}
        other => panic!("expected an invalid-state error, got {other:?}"),
    }
    match shim.compile_ahead_of_time(&denoiser_args(8, 8, 1, 0)) {
        Err(DeployError::InvalidState(_)) => {}
        other => panic!("expected an invalid-state error, got {other:?}"),
    }
}

#[test]
fn save_before_any_compilation_is_an_ordering_error() {
    let backend = cpu_backend();
    let shim = deploy(
        backend,
        Arc::new(ToyDenoiser::new()),
        DeployOptions::default(),
    )
    .unwrap();

    match shim.save_graph(temp_path("premature_save")) {
        Err(DeployError::InvalidState(_)) => {}
        other => panic!("expected an invalid-state error, got {other:?}"),
    }
}

#[test]
fn saved_graph_warms_up_a_fresh_shim_with_identical_outputs() {
    let backend = cpu_backend();
    let path = temp_path("warmup");

    let mut first = deploy(
        Arc::clone(&backend),
        Arc::new(ToyDenoiser::new()),
        DeployOptions::default(),
    )
    .unwrap();
    let args = denoiser_args(8, 8, 750, 11);
    let expected = first.invoke(&args).unwrap();
    first.save_graph(&path).unwrap();

    let mut warmed = deploy(
        backend,
        Arc::new(ToyDenoiser::new()),
        DeployOptions::default(),
    )
    .unwrap();
    warmed.warmup_with_load(&path, None).unwrap();
    assert_eq!(warmed.resident_graphs(), 1);

    let output = warmed.invoke(&args).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(expected, output);
}

#[test]
fn loading_over_an_already_compiled_graph_is_not_fatal() {
    let backend = cpu_backend();
    let path = temp_path("warmup_over_compiled");
    let args = denoiser_args(8, 8, 300, 31);

    let mut shim = deploy(
        Arc::clone(&backend),
        Arc::new(ToyDenoiser::new()),
        DeployOptions::default(),
    )
    .unwrap();
    shim.invoke(&args).unwrap();
    shim.save_graph(&path).unwrap();

    // The graph for this shape is already compiled; loading logs a warning
    // about the wasted compilation but still succeeds.
    shim.warmup_with_load(&path, None).unwrap();
    let output = shim.invoke(&args).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(shim.resident_graphs(), 1);
    assert!(output.tensor_count() > 0);
}

#[test]
fn loading_into_an_incompatible_module_fails() {
    struct WiderDenoiser;

    impl NetworkModule for WiderDenoiser {
        fn invoke(&self, args: &ArgTree<Tensor>) -> anyhow::Result<ArgTree<Tensor>> {
            Ok(args.clone())
        }

        fn parameter_specs(&self) -> Vec<ParameterSpec> {
            vec![ParameterSpec {
                name: "eps.weight".to_string(),
                dims: vec![8, 8],
                dtype: diffuse_rs::DType::F32,
            }]
        }
    }

    let backend = cpu_backend();
    let path = temp_path("incompatible_load");

    let mut donor = deploy(
        Arc::clone(&backend),
        Arc::new(ToyDenoiser::new()),
        DeployOptions::default(),
    )
    .unwrap();
    donor.invoke(&denoiser_args(8, 8, 600, 13)).unwrap();
    donor.save_graph(&path).unwrap();

    let mut recipient = deploy(
        backend,
        Arc::new(WiderDenoiser),
        DeployOptions::default(),
    )
    .unwrap();
    let result = recipient.load_graph(&path, None);
    fs::remove_file(&path).unwrap();

    match result {
        Err(DeployError::Load(_)) => {}
        other => panic!("expected a load error, got {other:?}"),
    }
}

#[test]
fn retargeting_to_an_unsupported_device_fails() {
    let backend = cpu_backend();
    let path = temp_path("retarget");

    let mut donor = deploy(
        Arc::clone(&backend),
        Arc::new(ToyDenoiser::new()),
        DeployOptions::default(),
    )
    .unwrap();
    donor.invoke(&denoiser_args(8, 8, 400, 17)).unwrap();
    donor.save_graph(&path).unwrap();

    let mut recipient = deploy(
        backend,
        Arc::new(ToyDenoiser::new()),
        DeployOptions::default(),
    )
    .unwrap();
    let result = recipient.load_graph(&path, Some(&Device::Cuda(0)));
    fs::remove_file(&path).unwrap();

    match result {
        Err(DeployError::Backend(_)) => {}
        other => panic!("expected a backend error, got {other:?}"),
    }
}

#[test]
fn compile_ahead_of_time_makes_the_first_invoke_a_hit() {
    let backend = cpu_backend();
    let mut shim = deploy(
        backend,
        Arc::new(ToyDenoiser::new()),
        DeployOptions::default(),
    )
    .unwrap();

    let sample = denoiser_args(8, 8, 999, 19);
    shim.compile_ahead_of_time(&sample).unwrap();
    assert_eq!(shim.resident_graphs(), 1);

    let output = shim.invoke(&sample).unwrap();
    assert_eq!(shim.resident_graphs(), 1);
    assert!(output.tensor_count() > 0);
}

#[test]
fn exhausted_shape_budget_without_respecialization_is_an_error() {
    let backend = cpu_backend();
    let mut graph = CompiledGraph::bind(
        Arc::clone(&backend),
        Arc::new(ToyDenoiser::new()),
        &GraphOptions {
            dynamic_shape_budget: 1,
            ..GraphOptions::default()
        },
        false,
    )
    .unwrap();

    let first = denoiser_args(8, 8, 100, 23);
    let second = denoiser_args(16, 16, 100, 23);
    let first_key = ShapeKey::of(&first);
    let second_key = ShapeKey::of(&second);
    let first_bridged = diffuse_rs::bridge::to_compiled(backend.as_ref(), &first).unwrap();
    let second_bridged = diffuse_rs::bridge::to_compiled(backend.as_ref(), &second).unwrap();

    graph.execute(&first_key, &first_bridged).unwrap();
    // Re-running an already absorbed shape stays within budget.
    graph.execute(&first_key, &first_bridged).unwrap();

    match graph.execute(&second_key, &second_bridged) {
        Err(DeployError::ShapeMismatch(_)) => {}
        other => panic!("expected a shape mismatch, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn exhausted_shape_budget_with_respecialization_recompiles() {
    let backend = cpu_backend();
    let mut graph = CompiledGraph::bind(
        Arc::clone(&backend),
        Arc::new(ToyDenoiser::new()),
        &GraphOptions {
            dynamic_shape_budget: 1,
            ..GraphOptions::default()
        },
        true,
    )
    .unwrap();

    let first = denoiser_args(8, 8, 100, 29);
    let second = denoiser_args(16, 16, 100, 29);
    let first_bridged = diffuse_rs::bridge::to_compiled(backend.as_ref(), &first).unwrap();
    let second_bridged = diffuse_rs::bridge::to_compiled(backend.as_ref(), &second).unwrap();

    graph.execute(&ShapeKey::of(&first), &first_bridged).unwrap();
    graph
        .execute(&ShapeKey::of(&second), &second_bridged)
        .unwrap();
    assert_eq!(graph.shapes_seen().len(), 2);
}

#[test]
fn invalid_options_are_rejected_at_deploy_time() {
    let backend = cpu_backend();
    let result = deploy(
        backend,
        Arc::new(ToyDenoiser::new()),
        DeployOptions {
            cache_capacity: 0,
            ..DeployOptions::default()
        },
    );
    match result {
        Err(DeployError::Config(_)) => {}
        other => panic!("expected a config error, got {:?}", other.map(|_| ())),
    }
}
