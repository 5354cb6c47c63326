#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use fusejit::shape_helpers::contiguous_strides;
use fusejit::{
    Array, ArrayId, BinaryOp, DType, FuseError, FuseResult, FusedComputation, Literal, TapeNode,
    TapeOp, TapeRef,
};
use fusejit_backend_metal::{
    CommandEncoder, ComputePipeline, Device, GridDims, LibrarySpec, OutputAllocator,
};

/// Device double: caches built libraries by name, counts build-closure runs
/// and records every kernel lookup.
pub struct RecordingDevice {
    max_threads: usize,
    builds: Mutex<u64>,
    libraries: Mutex<HashMap<String, LibrarySpec>>,
    kernel_requests: Mutex<Vec<String>>,
}

impl RecordingDevice {
    pub fn new(max_threads: usize) -> Self {
        Self {
            max_threads,
            builds: Mutex::new(0),
            libraries: Mutex::new(HashMap::new()),
            kernel_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn build_count(&self) -> u64 {
        *self.builds.lock().expect("device mutex poisoned")
    }

    pub fn last_kernel(&self) -> Option<String> {
        self.kernel_requests
            .lock()
            .expect("device mutex poisoned")
            .last()
            .cloned()
    }
}

impl Device for RecordingDevice {
    type Library = LibrarySpec;
    type Pipeline = FixedPipeline;

    fn get_library(
        &self,
        name: &str,
        build: &mut dyn FnMut() -> FuseResult<LibrarySpec>,
    ) -> FuseResult<LibrarySpec> {
        let mut libraries = self.libraries.lock().expect("device mutex poisoned");
        if let Some(found) = libraries.get(name) {
            return Ok(found.clone());
        }
        *self.builds.lock().expect("device mutex poisoned") += 1;
        let spec = build()?;
        libraries.insert(name.to_string(), spec.clone());
        Ok(spec)
    }

    fn get_kernel(&self, name: &str, library: &LibrarySpec) -> FuseResult<FixedPipeline> {
        self.kernel_requests
            .lock()
            .expect("device mutex poisoned")
            .push(name.to_string());
        if !library.variants.iter().any(|variant| variant == name) {
            return Err(FuseError::execution(format!(
                "kernel '{name}' is not part of library '{}'",
                library.name
            )));
        }
        Ok(FixedPipeline {
            max_threads: self.max_threads,
        })
    }
}

pub struct FixedPipeline {
    max_threads: usize,
}

impl ComputePipeline for FixedPipeline {
    fn max_total_threads_per_threadgroup(&self) -> usize {
        self.max_threads
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Input { id: ArrayId, slot: usize },
    Output { id: ArrayId, slot: usize },
    Strides { data: Vec<usize>, slot: usize },
    Shape { data: Vec<i32>, slot: usize },
    Rank { ndim: i32, slot: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Launch {
    pub grid: GridDims,
    pub group: GridDims,
}

#[derive(Default)]
pub struct RecordingEncoder {
    pub bindings: Vec<Binding>,
    pub launches: Vec<Launch>,
}

impl CommandEncoder for RecordingEncoder {
    fn set_input_array(&mut self, array: &Array, slot: usize) {
        self.bindings.push(Binding::Input {
            id: array.id(),
            slot,
        });
    }

    fn set_output_array(&mut self, array: &Array, slot: usize) {
        self.bindings.push(Binding::Output {
            id: array.id(),
            slot,
        });
    }

    fn set_strides(&mut self, strides: &[usize], slot: usize) {
        self.bindings.push(Binding::Strides {
            data: strides.to_vec(),
            slot,
        });
    }

    fn set_shape(&mut self, shape: &[i32], slot: usize) {
        self.bindings.push(Binding::Shape {
            data: shape.to_vec(),
            slot,
        });
    }

    fn set_rank(&mut self, ndim: i32, slot: usize) {
        self.bindings.push(Binding::Rank { ndim, slot });
    }

    fn dispatch_threads(&mut self, grid: GridDims, group: GridDims) {
        self.launches.push(Launch { grid, group });
    }
}

#[derive(Default)]
pub struct RecordingAllocator {
    pub calls: Mutex<Vec<bool>>,
}

impl OutputAllocator for RecordingAllocator {
    fn allocate_outputs(
        &self,
        _inputs: &[Array],
        _outputs: &[Array],
        contiguous: bool,
    ) -> FuseResult<()> {
        self.calls
            .lock()
            .expect("allocator mutex poisoned")
            .push(contiguous);
        Ok(())
    }
}

pub fn f32_array(id: u64, shape: &[usize]) -> Array {
    Array::new(
        ArrayId(id),
        DType::F32,
        shape.to_vec(),
        contiguous_strides(shape),
    )
}

pub fn strided_f32(id: u64, shape: &[usize], strides: &[usize]) -> Array {
    Array::new(ArrayId(id), DType::F32, shape.to_vec(), strides.to_vec())
}

fn add(id: u64, lhs: TapeRef, rhs: TapeRef) -> TapeNode {
    TapeNode {
        id: ArrayId(id),
        dtype: DType::F32,
        op: TapeOp::Binary(BinaryOp::Add),
        args: vec![lhs, rhs],
    }
}

/// `z = (x + y) * 2` with the 2 captured as a constant scalar.
/// Ids: x=0, y=1, constant=2, add=3, mul=4 (output).
pub fn scaled_sum(len: usize) -> FusedComputation {
    let inputs = vec![
        f32_array(0, &[len]),
        f32_array(1, &[len]),
        f32_array(2, &[]),
    ];
    let outputs = vec![f32_array(4, &[len])];
    let tape = vec![
        add(3, TapeRef::Input(0), TapeRef::Input(1)),
        TapeNode {
            id: ArrayId(4),
            dtype: DType::F32,
            op: TapeOp::Binary(BinaryOp::Mul),
            args: vec![TapeRef::Node(0), TapeRef::Input(2)],
        },
    ];
    let mut constants = HashMap::new();
    constants.insert(ArrayId(2), Literal::Float(2.0));
    FusedComputation::new(inputs, outputs, tape, constants).expect("valid computation")
}

/// `z = x + y` over broadcast shapes [4,1,8] + [1,6,8] -> [4,6,8].
/// Ids: x=0, y=1, add=2 (output).
pub fn broadcast_add() -> FusedComputation {
    let inputs = vec![f32_array(0, &[4, 1, 8]), f32_array(1, &[1, 6, 8])];
    let outputs = vec![f32_array(2, &[4, 6, 8])];
    let tape = vec![add(2, TapeRef::Input(0), TapeRef::Input(1))];
    FusedComputation::new(inputs, outputs, tape, HashMap::new()).expect("valid computation")
}

/// Chain of adds over `input_count` vector inputs; the last node is the
/// single output.
pub fn add_chain(input_count: usize, len: usize) -> FusedComputation {
    let inputs: Vec<Array> = (0..input_count)
        .map(|id| f32_array(id as u64, &[len]))
        .collect();
    let mut tape = Vec::new();
    let mut node_id = input_count as u64;
    tape.push(add(node_id, TapeRef::Input(0), TapeRef::Input(1)));
    for input in 2..input_count {
        node_id += 1;
        tape.push(add(node_id, TapeRef::Node(tape.len() - 1), TapeRef::Input(input)));
    }
    let outputs = vec![f32_array(node_id, &[len])];
    FusedComputation::new(inputs, outputs, tape, HashMap::new()).expect("valid computation")
}
