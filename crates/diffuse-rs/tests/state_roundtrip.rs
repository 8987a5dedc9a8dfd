use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use diffuse_rs::{
    DType, DeployError, Device, GraphOptions, RuntimeState, Shape, ShapeKey, Tensor,
};

fn temp_path(label: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("diffuse_rs_{label}_{timestamp}.bin"))
}

fn sample_state() -> RuntimeState {
    let mut state = RuntimeState::new(Device::Cpu);
    state.set_options(GraphOptions::default());
    state.set_shape_key(ShapeKey::from_dims(vec![vec![1, 4, 64, 64], vec![1]]));
    state.push_entry(
        "down.0.weight",
        Tensor::from_vec(Shape::new([2, 3]), vec![0.1, -0.2, 0.3, -0.4, 0.5, -0.6]).unwrap(),
    );
    state.push_entry(
        "time_embed.offsets",
        Tensor::from_i64(Shape::new([4]), vec![0, 250, 500, 750]).unwrap(),
    );
    state
}

#[test]
fn runtime_state_roundtrips_through_a_file() {
    let state = sample_state();
    let path = temp_path("state_roundtrip");

    state.save(&path).unwrap();
    let loaded = RuntimeState::load(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(state, loaded);
    assert_eq!(loaded.device(), &Device::Cpu);
    assert_eq!(loaded.entries().len(), 2);
    assert_eq!(loaded.entries()[0].tensor.data(), [0.1, -0.2, 0.3, -0.4, 0.5, -0.6]);
    assert_eq!(loaded.entries()[1].tensor.data_i64(), [0, 250, 500, 750]);
}

#[test]
fn minimal_state_roundtrips_without_optional_sections() {
    let state = RuntimeState::new(Device::Cuda(1));
    let path = temp_path("state_minimal");

    state.save(&path).unwrap();
    let loaded = RuntimeState::load(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(state, loaded);
    assert!(loaded.options().is_none());
    assert!(loaded.shape_key().is_none());
    assert!(loaded.entries().is_empty());
}

#[test]
fn missing_file_is_a_load_error() {
    let path = temp_path("state_missing");
    match RuntimeState::load(&path) {
        Err(DeployError::Load(message)) => {
            assert!(message.contains(&path.display().to_string()));
        }
        other => panic!("expected a load error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn corrupt_magic_is_a_load_error() {
    let path = temp_path("state_bad_magic");
    fs::write(&path, b"NOTAGRPHxxxxxxxxxxxxxxxx").unwrap();
    let result = RuntimeState::load(&path);
    fs::remove_file(&path).unwrap();

    match result {
        Err(DeployError::Load(message)) => assert!(message.contains("magic")),
        other => panic!("expected a load error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn truncated_file_is_a_load_error() {
    let state = sample_state();
    let path = temp_path("state_truncated");
    state.save(&path).unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    let result = RuntimeState::load(&path);
    fs::remove_file(&path).unwrap();

    match result {
        Err(DeployError::Load(_)) => {}
        other => panic!("expected a load error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn entry_payloads_survive_both_dtypes() {
    let mut state = RuntimeState::new(Device::Cpu);
    state.push_entry(
        "f32",
        Tensor::from_vec(Shape::new([3]), vec![f32::MIN, 0.0, f32::MAX]).unwrap(),
    );
    state.push_entry(
        "i64",
        Tensor::from_i64(Shape::new([3]), vec![i64::MIN, 0, i64::MAX]).unwrap(),
    );
    let path = temp_path("state_dtypes");

    state.save(&path).unwrap();
    let loaded = RuntimeState::load(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(loaded.entries()[0].tensor.dtype(), DType::F32);
    assert_eq!(loaded.entries()[0].tensor.data(), [f32::MIN, 0.0, f32::MAX]);
    assert_eq!(loaded.entries()[1].tensor.dtype(), DType::I64);
    assert_eq!(loaded.entries()[1].tensor.data_i64(), [i64::MIN, 0, i64::MAX]);
}
