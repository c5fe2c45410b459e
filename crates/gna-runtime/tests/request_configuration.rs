//! Request configuration rules exercised through a device.

use gna_kernels::{AccelerationMode, DataType};
use gna_runtime::{
    operand, Device, DeviceConfig, Error, IdentifierKind, Model, Operation, RequestStatus, Tensor,
    TensorBuffer,
};
use std::time::Duration;

const LONG: Duration = Duration::from_secs(30);

fn open() -> Device {
    gna_tracing::init_test_tracing();
    Device::open(0, DeviceConfig::default()).unwrap()
}

/// Four output rows; row `r` weighs every input element by `r + 1`.
fn ramp() -> Model {
    let weights: Vec<i16> = (0..4).flat_map(|row| [row as i16 + 1; 8]).collect();
    Model::new(vec![Operation::fully_connected(
        Tensor::new(DataType::Int16, [8, 1]),
        Tensor::new(DataType::Int32, [4, 1]),
        Tensor::new(DataType::Int16, [4, 8]).with_buffer(TensorBuffer::from_slice(&weights).unwrap()),
        Tensor::new(DataType::Int32, [4]).with_buffer(TensorBuffer::zeroed(16).unwrap()),
        None,
    )])
}

fn bind_ones(device: &Device, config: u32) -> TensorBuffer {
    let output = TensorBuffer::zeroed(16).unwrap();
    device
        .bind_buffer(config, 0, operand::INPUT, TensorBuffer::from_slice(&[1i16; 8]).unwrap())
        .unwrap();
    device.bind_buffer(config, 0, operand::OUTPUT, output.clone()).unwrap();
    output
}

#[test]
fn incomplete_configuration_cannot_be_enqueued() {
    let device = open();
    let model = device.register_model(ramp()).unwrap();
    let config = device.create_request_config(model).unwrap();
    device
        .bind_buffer(config, 0, operand::INPUT, TensorBuffer::zeroed(16).unwrap())
        .unwrap();

    assert_eq!(device.missing_buffers(config).unwrap(), vec![(0, 1)]);
    assert_eq!(
        device.enqueue(config),
        Err(Error::RequestConfigIncomplete {
            config_id: config,
            missing: vec![(0, 1)]
        })
    );

    device
        .bind_buffer(config, 0, operand::OUTPUT, TensorBuffer::zeroed(16).unwrap())
        .unwrap();
    let request = device.enqueue(config).unwrap();
    assert_eq!(device.wait(request, LONG).unwrap(), RequestStatus::Completed);
}

#[test]
fn active_list_computes_selected_rows_in_order() {
    let device = open();
    let model = device.register_model(ramp()).unwrap();
    let config = device.create_request_config(model).unwrap();
    let output = bind_ones(&device, config);

    device.set_active_list(config, 0, vec![3, 1]).unwrap();
    let request = device.enqueue(config).unwrap();
    assert_eq!(device.wait(request, LONG).unwrap(), RequestStatus::Completed);
    assert_eq!(output.to_vec::<i32>(), vec![32, 16, 0, 0]);

    device.clear_active_list(config, 0).unwrap();
    let request = device.enqueue(config).unwrap();
    assert_eq!(device.wait(request, LONG).unwrap(), RequestStatus::Completed);
    assert_eq!(output.to_vec::<i32>(), vec![8, 16, 24, 32]);

    assert!(matches!(
        device.set_active_list(config, 0, vec![4]),
        Err(Error::ActiveListInvalid { operation: 0, .. })
    ));
}

#[test]
fn active_list_longer_than_the_output_is_rejected() {
    gna_tracing::init_test_tracing();
    let device = Device::open(
        0,
        DeviceConfig {
            thread_count: 1,
            ..DeviceConfig::default()
        },
    )
    .unwrap();
    let model = device.register_model(ramp()).unwrap();
    let config = device.create_request_config(model).unwrap();
    let output = bind_ones(&device, config);

    assert!(matches!(
        device.set_active_list(config, 0, vec![0; 5]),
        Err(Error::ActiveListInvalid { operation: 0, .. })
    ));
    assert!(matches!(
        device.set_active_list(config, 0, vec![1, 2, 1]),
        Err(Error::ActiveListInvalid { operation: 0, .. })
    ));

    for _ in 0..2 {
        let request = device.enqueue(config).unwrap();
        assert_eq!(device.wait(request, LONG).unwrap(), RequestStatus::Completed);
        device.release_request(request).unwrap();
    }
    assert_eq!(output.to_vec::<i32>(), vec![8, 16, 24, 32]);
    device.release_request_config(config).unwrap();
}

#[test]
fn later_changes_do_not_affect_submitted_requests() {
    let device = open();
    let model = device.register_model(ramp()).unwrap();
    let config = device.create_request_config(model).unwrap();
    let first_output = bind_ones(&device, config);

    let first = device.enqueue(config).unwrap();
    let second_output = TensorBuffer::zeroed(16).unwrap();
    device.bind_buffer(config, 0, operand::OUTPUT, second_output.clone()).unwrap();
    device.set_active_list(config, 0, vec![0]).unwrap();
    let second = device.enqueue(config).unwrap();

    assert_eq!(device.wait(first, LONG).unwrap(), RequestStatus::Completed);
    assert_eq!(device.wait(second, LONG).unwrap(), RequestStatus::Completed);
    assert_eq!(first_output.to_vec::<i32>(), vec![8, 16, 24, 32]);
    assert_eq!(second_output.to_vec::<i32>(), vec![8, 0, 0, 0]);
}

#[test]
fn acceleration_override_and_profile() {
    let device = open();
    let model = device.register_model(ramp()).unwrap();
    let config = device.create_request_config(model).unwrap();
    bind_ones(&device, config);

    let avx2 = device.set_acceleration_mode(config, AccelerationMode::Avx2);
    if device.detector().is_supported(AccelerationMode::Avx2) {
        assert!(avx2.is_ok());
    } else {
        assert_eq!(avx2, Err(Error::AccelerationModeNotSupported(AccelerationMode::Avx2)));
    }

    device.set_acceleration_mode(config, AccelerationMode::Generic).unwrap();
    device.enable_profiling(config, true).unwrap();
    let request = device.enqueue(config).unwrap();
    device.wait(request, LONG).unwrap();

    let profile = device.request_profile(request).unwrap().unwrap();
    assert_eq!(profile.request_id, request);
    assert_eq!(profile.operations, 1);
    assert_eq!(profile.acceleration_modes, vec![AccelerationMode::Generic]);
    assert_eq!(profile.saturations, 0);
    assert!(serde_json::to_string(&profile).unwrap().contains("\"generic\""));
}

#[test]
fn release_order_is_enforced() {
    let device = open();
    let model = device.register_model(ramp()).unwrap();
    let config = device.create_request_config(model).unwrap();
    bind_ones(&device, config);
    let request = device.enqueue(config).unwrap();
    device.wait(request, LONG).unwrap();

    assert!(matches!(
        device.release_model(model),
        Err(Error::DeviceBusy { kind: IdentifierKind::Model, .. })
    ));
    device.release_request_config(config).unwrap();
    device.release_model(model).unwrap();

    assert_eq!(
        device.create_request_config(model),
        Err(Error::not_found(IdentifierKind::Model, model))
    );
    assert_eq!(
        device.enqueue(config),
        Err(Error::not_found(IdentifierKind::RequestConfig, config))
    );

    device.release_request(request).unwrap();
    assert_eq!(
        device.request_state(request),
        Err(Error::not_found(IdentifierKind::Request, request))
    );
    device.ensure_idle().unwrap();
}
