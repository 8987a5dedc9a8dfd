use diffuse_rs::{bridge, ArgTree, GraphBackend, Shape, Tensor};
use diffuse_rs_backend_ref_cpu::CpuGraphBackend;

fn nested_args() -> ArgTree<Tensor> {
    let latents = Tensor::from_vec(Shape::new([1, 4, 2, 2]), (0..16).map(|i| i as f32).collect())
        .unwrap();
    let timestep = Tensor::scalar_i64(981);
    let conditioning = Tensor::from_vec(Shape::new([1, 3]), vec![0.5, -1.5, 2.25]).unwrap();
    ArgTree::Map(vec![
        (
            "sample".to_string(),
            ArgTree::Seq(vec![ArgTree::Tensor(latents), ArgTree::Tensor(timestep)]),
        ),
        (
            "encoder_hidden_states".to_string(),
            ArgTree::Tensor(conditioning),
        ),
        ("guidance_scale".to_string(), ArgTree::Float(7.5)),
        ("num_steps".to_string(), ArgTree::Int(30)),
        ("return_dict".to_string(), ArgTree::Bool(false)),
        ("cross_attention_kwargs".to_string(), ArgTree::None),
    ])
}

#[test]
fn roundtrip_preserves_structure_and_payloads() {
    let backend = CpuGraphBackend::new();
    let args = nested_args();

    let compiled = bridge::to_compiled(&backend, &args).unwrap();
    let back = bridge::to_dynamic(&backend, &compiled).unwrap();

    assert_eq!(args, back);
    assert_eq!(args.tensor_count(), 3);
    assert_eq!(back.tensor_count(), 3);
}

#[test]
fn non_tensor_leaves_pass_through_unconverted() {
    let backend = CpuGraphBackend::new();
    let args: ArgTree<Tensor> = ArgTree::Seq(vec![
        ArgTree::Int(-7),
        ArgTree::Float(0.125),
        ArgTree::Bool(true),
        ArgTree::None,
    ]);

    let compiled = bridge::to_compiled(&backend, &args).unwrap();
    assert_eq!(compiled.tensor_count(), 0);
    let back = bridge::to_dynamic(&backend, &compiled).unwrap();
    assert_eq!(args, back);
}

#[test]
fn map_entries_keep_insertion_order() {
    let backend = CpuGraphBackend::new();
    let args: ArgTree<Tensor> = ArgTree::Map(vec![
        ("zebra".to_string(), ArgTree::Int(1)),
        ("apple".to_string(), ArgTree::Int(2)),
        ("mango".to_string(), ArgTree::Int(3)),
    ]);

    let back = bridge::to_dynamic(&backend, &bridge::to_compiled(&backend, &args).unwrap()).unwrap();
    let ArgTree::Map(entries) = back else {
        panic!("map did not survive the roundtrip");
    };
    let keys: Vec<_> = entries.iter().map(|(key, _)| key.as_str()).collect();
    assert_eq!(keys, ["zebra", "apple", "mango"]);
}

#[test]
fn import_shares_storage_with_the_host_tensor() {
    let backend = CpuGraphBackend::new();
    let tensor = Tensor::from_vec(Shape::new([2, 2]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();

    let handle = backend.import(&tensor).unwrap();
    let exported = backend.export(&handle).unwrap();

    assert_eq!(tensor, exported);
    assert_eq!(
        tensor.data().as_ptr(),
        exported.data().as_ptr(),
        "bridging a host tensor must not copy its payload"
    );
}
