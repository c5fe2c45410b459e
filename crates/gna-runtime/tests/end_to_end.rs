//! Device-level scenarios: model rejection, parallel execution with
//! saturation, every operation kind, zero-timeout waits, pool resizing with
//! queued work and jobs that panic on a worker.

use gna_kernels::{
    AccelerationMode, DataType, KernelBuffers, Pooling, PoolingMode, PwlSegment,
};
use gna_runtime::{
    operand, Device, DeviceConfig, DeviceGeneration, DeviceManager, Error, ErrorReason,
    IdentifierKind, ItemType, Job, Model, ModelErrorReporter, Operation, RequestState,
    RequestStatus, Tensor, TensorBuffer, WorkerPool,
};
use serial_test::serial;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const LONG: Duration = Duration::from_secs(30);

fn constant<T: bytemuck::Pod>(data_type: DataType, shape: &[usize], values: &[T]) -> Tensor {
    Tensor::new(data_type, shape).with_buffer(TensorBuffer::from_slice(values).unwrap())
}

fn device(threads: u32, generation: DeviceGeneration) -> Device {
    gna_tracing::init_test_tracing();
    Device::open(
        0,
        DeviceConfig {
            generation,
            thread_count: threads,
            acceleration_mode: AccelerationMode::Auto,
        },
    )
    .unwrap()
}

/// Diagonal affine whose output clamps once for every input equal to 100.
fn amplifier() -> Model {
    Model::new(vec![Operation::element_wise(
        Tensor::new(DataType::Int16, [8, 1]),
        Tensor::new(DataType::Int16, [8, 1]),
        constant(DataType::Int16, &[8], &[1000i16; 8]),
        constant(DataType::Int32, &[8], &[0i32; 8]),
        Some(constant(DataType::PwlSegment, &[1], &[PwlSegment::new(0, 0, 1)])),
    )])
}

fn transposition() -> Model {
    Model::new(vec![Operation::transposition(
        Tensor::new(DataType::Int16, [2, 3]),
        Tensor::new(DataType::Int16, [3, 2]),
    )])
}

/// Configuration of `model` with fresh input and output memory.
fn bound_config(
    device: &Device,
    model: u32,
    input: &[i16],
    output_bytes: usize,
) -> (u32, TensorBuffer, TensorBuffer) {
    let config = device.create_request_config(model).unwrap();
    let input = TensorBuffer::from_slice(input).unwrap();
    let output = TensorBuffer::zeroed(output_bytes).unwrap();
    device.bind_buffer(config, 0, operand::INPUT, input.clone()).unwrap();
    device.bind_buffer(config, 0, operand::OUTPUT, output.clone()).unwrap();
    (config, input, output)
}

fn wait_for_state(
    device: &Device,
    request: u32,
    done: impl Fn(Result<RequestState, Error>) -> bool,
) {
    let deadline = Instant::now() + LONG;
    while !done(device.request_state(request)) {
        assert!(Instant::now() < deadline, "request {request} never reached the expected state");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
#[serial]
fn unsupported_combination_is_reported_with_its_operation() {
    let _ = ModelErrorReporter::pop();
    let device = device(1, DeviceGeneration::Gen2_0);

    let affine = |input: DataType| {
        Operation::fully_connected(
            Tensor::new(input, [16, 2]),
            Tensor::new(DataType::Int16, [4, 2]),
            constant(DataType::Int16, &[4, 16], &[0i16; 64]),
            constant(DataType::Int32, &[4], &[0i32; 4]),
            Some(constant(DataType::PwlSegment, &[1], &[PwlSegment::new(0, 0, 1)])),
        )
    };
    let model = Model::new(vec![affine(DataType::Int16), affine(DataType::Int8)]);

    let Err(Error::ModelConfiguration(error)) = device.register_model(model) else {
        panic!("int8 input must be rejected before generation 3.0");
    };
    assert_eq!(error.reason, ErrorReason::NotInSet);
    assert_eq!(error.locator.item, ItemType::OperandMode);
    assert_eq!(error.locator.operation_index, Some(1));

    assert_eq!(ModelErrorReporter::pop().unwrap(), error);
    assert_eq!(ModelErrorReporter::pop(), Err(Error::ErrorUnavailable));
    assert!(ModelErrorReporter::error_string(&error).len() <= 256);
}

#[test]
#[serial]
fn pending_error_is_kept_until_popped() {
    let _ = ModelErrorReporter::pop();
    let device = device(1, DeviceGeneration::Gen3_0);

    let first = device.register_model(Model::default()).unwrap_err();
    let second = device.register_model(Model::default()).unwrap_err();
    assert_eq!(first, second);

    let Error::ModelConfiguration(stored) = first else {
        panic!("expected a model error");
    };
    assert!(ModelErrorReporter::is_pending());
    assert_eq!(ModelErrorReporter::pop().unwrap(), stored);
    assert!(matches!(ModelErrorReporter::pop(), Err(Error::ErrorUnavailable)));
}

#[test]
#[serial]
fn ten_requests_on_four_workers_sum_their_saturations() {
    gna_tracing::init_test_tracing();
    let device = DeviceManager::open_with(
        0,
        DeviceConfig {
            thread_count: 4,
            ..DeviceConfig::default()
        },
    )
    .unwrap();
    assert_eq!(device.thread_count(), 4);
    let model = device.register_model(amplifier()).unwrap();

    let mut submitted = Vec::new();
    for index in 0..10usize {
        let clamps = index % 9;
        let input: Vec<i16> =
            (0..8).map(|element| if element < clamps { 100 } else { 1 }).collect();
        let (config, _input, output) = bound_config(&device, model, &input, 16);
        let request = device.enqueue(config).unwrap();
        submitted.push((request, config, clamps, output));
    }

    let mut total = 0;
    for (request, _, clamps, output) in &submitted {
        let status = device.wait(*request, LONG).unwrap();
        let saturations = match status {
            RequestStatus::Completed => 0,
            RequestStatus::Saturated { saturations } => saturations as usize,
            RequestStatus::Timeout => panic!("request {request} timed out"),
        };
        assert_eq!(saturations, *clamps);
        total += saturations;

        let expected: Vec<i16> =
            (0..8).map(|element| if element < *clamps { i16::MAX } else { 1000 }).collect();
        assert_eq!(output.to_vec::<i16>(), expected);
    }
    assert_eq!(total, (0..10).map(|index| index % 9).sum::<usize>());

    assert!(matches!(DeviceManager::close(0), Err(Error::DeviceBusy { .. })));
    for (request, config, _, _) in submitted {
        device.release_request(request).unwrap();
        device.release_request_config(config).unwrap();
    }
    device.release_model(model).unwrap();
    DeviceManager::close(0).unwrap();
    assert_eq!(DeviceManager::open_count(0), 0);
}

#[test]
fn zero_timeout_returns_before_the_kernel_ran() {
    let device = device(1, DeviceGeneration::Gen3_0);
    let model = device.register_model(transposition()).unwrap();
    let (config, input, output) = bound_config(&device, model, &[1, 2, 3, 4, 5, 6], 12);

    let writer = input.write();
    let request = device.enqueue(config).unwrap();
    assert_eq!(device.wait(request, Duration::ZERO).unwrap(), RequestStatus::Timeout);
    assert!(!device.request_state(request).unwrap().is_terminal());
    assert!(device.release_request(request).is_err());
    assert!(matches!(
        device.release_request_config(config),
        Err(Error::DeviceBusy { kind: IdentifierKind::RequestConfig, .. })
    ));
    drop(writer);

    assert_eq!(device.wait(request, LONG).unwrap(), RequestStatus::Completed);
    assert_eq!(device.wait(request, Duration::ZERO).unwrap(), RequestStatus::Completed);
    assert_eq!(output.to_vec::<i16>(), vec![1, 4, 2, 5, 3, 6]);
}

#[test]
fn resize_discards_queued_requests() {
    let device = device(1, DeviceGeneration::Gen3_0);
    let model = device.register_model(transposition()).unwrap();
    let (running_config, running_input, running_output) =
        bound_config(&device, model, &[1, 2, 3, 4, 5, 6], 12);
    let (queued_config, _, queued_output) = bound_config(&device, model, &[6, 5, 4, 3, 2, 1], 12);

    let writer = running_input.write();
    let running = device.enqueue(running_config).unwrap();
    wait_for_state(&device, running, |state| state == Ok(RequestState::Running));
    let queued = device.enqueue(queued_config).unwrap();
    assert_eq!(device.request_state(queued).unwrap(), RequestState::Queued);

    thread::scope(|scope| {
        let resize = scope.spawn(|| device.set_thread_count(2));
        wait_for_state(&device, queued, |state| {
            matches!(state, Ok(RequestState::Abandoned) | Err(_))
        });
        drop(writer);
        resize.join().unwrap().unwrap();
    });

    assert_eq!(
        device.wait(queued, LONG),
        Err(Error::not_found(IdentifierKind::Request, queued))
    );
    assert_eq!(queued_output.to_vec::<i16>(), vec![0; 6]);

    assert_eq!(device.wait(running, LONG).unwrap(), RequestStatus::Completed);
    assert_eq!(running_output.to_vec::<i16>(), vec![1, 4, 2, 5, 3, 6]);
    assert_eq!(device.thread_count(), 2);
    assert_eq!(device.live_buffers(), 2);
}

#[test]
fn resize_without_outstanding_work_swaps_all_scratch_memory() {
    let device = device(3, DeviceGeneration::Gen3_0);
    assert_eq!(device.live_buffers(), 3);

    device.set_thread_count(5).unwrap();
    assert_eq!(device.thread_count(), 5);
    assert_eq!(device.live_buffers(), 5);

    assert_eq!(device.set_thread_count(0), Err(Error::ThreadCountInvalid(0)));
    device.set_thread_count(1).unwrap();
    assert_eq!(device.live_buffers(), 1);

    let model = device.register_model(transposition()).unwrap();
    let (config, _, output) = bound_config(&device, model, &[1, 2, 3, 4, 5, 6], 12);
    let request = device.enqueue(config).unwrap();
    assert_eq!(device.wait(request, LONG).unwrap(), RequestStatus::Completed);
    assert_eq!(output.to_vec::<i16>(), vec![1, 4, 2, 5, 3, 6]);
}

/// Scores for `[groups, features]` input against `[states, mixtures, features]`
/// means, laid out `[states, groups]`.
struct Mixture {
    groups: usize,
    features: usize,
    states: usize,
    mixtures: usize,
    input: Vec<u8>,
    means: Vec<u8>,
    variances: Vec<u16>,
    constants: Vec<u32>,
}

impl Mixture {
    fn new() -> Self {
        let (groups, features, states, mixtures) = (2, 4, 3, 2);
        let cells = states * mixtures * features;
        Self {
            groups,
            features,
            states,
            mixtures,
            input: (0..groups * features).map(|i| (i * 3) as u8).collect(),
            means: (0..cells).map(|i| (i * 5 % 23) as u8).collect(),
            variances: (0..cells).map(|i| (1 + i % 3) as u16).collect(),
            constants: (0..states * mixtures).map(|i| (i * 37) as u32).collect(),
        }
    }

    fn model(&self, maximum_score: u32) -> Model {
        let (states, mixtures, features) = (self.states, self.mixtures, self.features);
        Model::new(vec![Operation::gmm(
            Tensor::new(DataType::UInt8, [self.groups, features]),
            Tensor::new(DataType::UInt32, [states, self.groups]),
            constant(DataType::UInt8, &[states, mixtures, features], &self.means),
            constant(DataType::UInt16, &[states, mixtures, features], &self.variances),
            constant(DataType::UInt32, &[states, mixtures], &self.constants),
            maximum_score,
        )])
    }

    fn score(&self, state: usize, group: usize) -> u64 {
        let vector = &self.input[group * self.features..(group + 1) * self.features];
        (0..self.mixtures)
            .map(|mixture| {
                let offset = (state * self.mixtures + mixture) * self.features;
                let distance: u64 = (0..self.features)
                    .map(|feature| {
                        let mean = self.means[offset + feature];
                        let delta = u64::from(vector[feature].abs_diff(mean));
                        delta * delta * u64::from(self.variances[offset + feature])
                    })
                    .sum();
                u64::from(self.constants[state * self.mixtures + mixture]) + distance
            })
            .min()
            .unwrap()
    }

    fn bind(&self, device: &Device, model: u32) -> (u32, TensorBuffer) {
        let config = device.create_request_config(model).unwrap();
        let output = TensorBuffer::zeroed(self.states * self.groups * 4).unwrap();
        device
            .bind_buffer(config, 0, operand::INPUT, TensorBuffer::from_slice(&self.input).unwrap())
            .unwrap();
        device.bind_buffer(config, 0, operand::OUTPUT, output.clone()).unwrap();
        (config, output)
    }
}

#[test]
#[serial]
fn gmm_scores_every_state_and_clamps_to_the_maximum() {
    let _ = ModelErrorReporter::pop();
    let device = device(1, DeviceGeneration::Gen3_0);
    let mixture = Mixture::new();
    let expected: Vec<u64> = (0..mixture.states)
        .flat_map(|state| (0..mixture.groups).map(move |group| (state, group)))
        .map(|(state, group)| mixture.score(state, group))
        .collect();

    let unbounded = device.register_model(mixture.model(u32::MAX)).unwrap();
    let (config, output) = mixture.bind(&device, unbounded);
    let request = device.enqueue(config).unwrap();
    assert_eq!(device.wait(request, LONG).unwrap(), RequestStatus::Completed);
    let scores: Vec<u64> = output.to_vec::<u32>().into_iter().map(u64::from).collect();
    assert_eq!(scores, expected);

    let (listed, listed_output) = mixture.bind(&device, unbounded);
    device.set_active_list(listed, 0, vec![2, 0]).unwrap();
    let request = device.enqueue(listed).unwrap();
    assert_eq!(device.wait(request, LONG).unwrap(), RequestStatus::Completed);
    let groups = mixture.groups;
    let mut selected: Vec<u64> = expected[2 * groups..3 * groups].to_vec();
    selected.extend_from_slice(&expected[..groups]);
    selected.extend(std::iter::repeat(0).take(groups));
    let scores: Vec<u64> = listed_output.to_vec::<u32>().into_iter().map(u64::from).collect();
    assert_eq!(scores, selected);

    let maximum = 60u32;
    let clamped = expected.iter().filter(|&&score| score > u64::from(maximum)).count();
    assert!(clamped > 0);
    let bounded = device.register_model(mixture.model(maximum)).unwrap();
    let (config, output) = mixture.bind(&device, bounded);
    let request = device.enqueue(config).unwrap();
    assert_eq!(
        device.wait(request, LONG).unwrap(),
        RequestStatus::Saturated {
            saturations: clamped as u32
        }
    );
    let limited: Vec<u32> = expected
        .iter()
        .map(|&score| score.min(u64::from(maximum)) as u32)
        .collect();
    assert_eq!(output.to_vec::<u32>(), limited);
}

/// Single-vector convolution with int32 output and no activation.
struct Convolution {
    elements: usize,
    filters: usize,
    size: usize,
    stride: usize,
    pooling: Option<Pooling>,
}

impl Convolution {
    fn input(&self) -> Vec<i16> {
        (0..self.elements).map(|i| (i * 7 % 11) as i16 - 5).collect()
    }

    fn coefficients(&self) -> Vec<i16> {
        (0..self.filters * self.size).map(|i| (i * 3 % 5) as i16 - 2).collect()
    }

    fn biases(&self) -> Vec<i32> {
        (0..self.filters).map(|filter| filter as i32 * 10).collect()
    }

    fn convolved(&self) -> usize {
        (self.elements - self.size) / self.stride + 1
    }

    fn outputs(&self) -> usize {
        match self.pooling {
            Some(pooling) => (self.convolved() - pooling.window) / pooling.stride + 1,
            None => self.convolved(),
        }
    }

    fn model(&self) -> Model {
        Model::new(vec![Operation::convolution(
            Tensor::new(DataType::Int16, [self.elements]),
            Tensor::new(DataType::Int32, [self.outputs(), self.filters]),
            constant(DataType::Int16, &[self.filters, self.size], &self.coefficients()),
            constant(DataType::Int32, &[self.filters], &self.biases()),
            None,
            self.stride,
            self.pooling,
        )])
    }

    /// `[outputs, filters]` values computed directly.
    fn expected(&self) -> Vec<i32> {
        let (input, coefficients, biases) = (self.input(), self.coefficients(), self.biases());
        let convolved = |output: usize, filter: usize| -> i64 {
            let window = &input[output * self.stride..output * self.stride + self.size];
            let weights = &coefficients[filter * self.size..(filter + 1) * self.size];
            let sum: i64 = window
                .iter()
                .zip(weights)
                .map(|(&x, &w)| i64::from(x) * i64::from(w))
                .sum();
            sum + i64::from(biases[filter])
        };
        (0..self.outputs())
            .flat_map(|output| (0..self.filters).map(move |filter| (output, filter)))
            .map(|(output, filter)| match self.pooling {
                None => convolved(output, filter),
                Some(Pooling { mode, window, stride }) => {
                    let steps = (output * stride..output * stride + window)
                        .map(|step| convolved(step, filter));
                    match mode {
                        PoolingMode::Max => steps.max().unwrap(),
                        PoolingMode::Sum => steps.sum(),
                    }
                }
            })
            .map(|value| value as i32)
            .collect()
    }
}

#[test]
fn convolutions_of_growing_size_share_one_worker() {
    let device = device(1, DeviceGeneration::Gen3_0);
    let layers = [
        Convolution {
            elements: 16,
            filters: 2,
            size: 3,
            stride: 1,
            pooling: None,
        },
        Convolution {
            elements: 512,
            filters: 8,
            size: 8,
            stride: 2,
            pooling: None,
        },
        Convolution {
            elements: 256,
            filters: 4,
            size: 4,
            stride: 1,
            pooling: Some(Pooling {
                mode: PoolingMode::Max,
                window: 3,
                stride: 2,
            }),
        },
        Convolution {
            elements: 16,
            filters: 2,
            size: 3,
            stride: 1,
            pooling: Some(Pooling {
                mode: PoolingMode::Sum,
                window: 2,
                stride: 2,
            }),
        },
    ];

    for layer in &layers {
        let model = device.register_model(layer.model()).unwrap();
        let config = device.create_request_config(model).unwrap();
        let output = TensorBuffer::zeroed(layer.outputs() * layer.filters * 4).unwrap();
        let input = TensorBuffer::from_slice(&layer.input()).unwrap();
        device.bind_buffer(config, 0, operand::INPUT, input).unwrap();
        device.bind_buffer(config, 0, operand::OUTPUT, output.clone()).unwrap();

        let request = device.enqueue(config).unwrap();
        assert_eq!(device.wait(request, LONG).unwrap(), RequestStatus::Completed);
        assert_eq!(output.to_vec::<i32>(), layer.expected(), "{} elements", layer.elements);
    }
    assert_eq!(device.live_buffers(), 1);
}

/// Fully connected layer into int8; row `r` sums to `80 * (r + 1)`.
fn narrow(activation: bool) -> Model {
    let weights: Vec<i16> = (0..4).flat_map(|row| [(row as i16 + 1) * 10; 8]).collect();
    Model::new(vec![Operation::fully_connected(
        Tensor::new(DataType::Int16, [8, 1]),
        Tensor::new(DataType::Int8, [4, 1]),
        constant(DataType::Int16, &[4, 8], &weights),
        constant(DataType::Int32, &[4], &[0i32; 4]),
        activation.then(|| constant(DataType::PwlSegment, &[1], &[PwlSegment::new(0, 0, 1)])),
    )])
}

#[test]
#[serial]
fn int8_output_needs_activation_and_saturates() {
    let _ = ModelErrorReporter::pop();
    let device = device(1, DeviceGeneration::Gen3_0);

    let Err(Error::ModelConfiguration(error)) = device.register_model(narrow(false)) else {
        panic!("int8 output without activation must be rejected");
    };
    assert_eq!(error.reason, ErrorReason::NotInSet);
    assert_eq!(error.locator.item, ItemType::OperandMode);
    assert_eq!(ModelErrorReporter::pop().unwrap(), error);

    let model = device.register_model(narrow(true)).unwrap();
    let (config, _input, output) = bound_config(&device, model, &[1; 8], 4);
    let request = device.enqueue(config).unwrap();
    assert_eq!(
        device.wait(request, LONG).unwrap(),
        RequestStatus::Saturated { saturations: 3 }
    );
    assert_eq!(output.to_vec::<i8>(), vec![80, 127, 127, 127]);
}

/// Panics inside the kernel path and reports the failure it is handed.
struct Faulting {
    failures: mpsc::Sender<String>,
}

impl Job for Faulting {
    fn run(&self, buffers: &mut KernelBuffers) {
        let pool = buffers.pool_mut();
        let past_the_end = pool[pool.len()];
        std::hint::black_box(past_the_end);
    }

    fn abandon(&self) {}

    fn fail(&self, reason: &str) {
        self.failures.send(reason.to_string()).unwrap();
    }
}

#[test]
fn panicking_job_fails_and_the_worker_keeps_serving() {
    gna_tracing::init_test_tracing();
    let pool = WorkerPool::new(1).unwrap();
    let (failures, failed) = mpsc::channel();
    pool.enqueue(Arc::new(Faulting { failures: failures.clone() })).unwrap();
    pool.enqueue(Arc::new(Faulting { failures })).unwrap();

    for _ in 0..2 {
        let reason = failed.recv_timeout(LONG).unwrap();
        assert!(reason.contains("index out of bounds"), "{reason}");
    }
    assert_eq!(pool.thread_count(), 1);
    assert_eq!(pool.live_buffers(), 1);
}
