//! Deferred GPU job queue.
//!
//! A fixed table of job slots standing in for a GPU command queue. GPU-tier
//! kernels copy their call into a free slot; the caller drains the table with
//! [`GpuJobQueue::process`]. Slots never allocate: views and parameters are
//! copied into fixed arrays, and buffers are only touched when a job runs.

use thiserror::Error;
use tracing::debug;

use crate::kernel::ops::{self, OpKind, Scalar};
use crate::kernel::view::{BufferSet, ComponentView, EntityRange};

pub const MAX_GPU_JOBS: usize = 16;
pub const MAX_JOB_VIEWS: usize = 2;
pub const MAX_JOB_PARAMS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GpuQueueError {
    #[error("all {MAX_GPU_JOBS} GPU job slots are in use")]
    Full,

    #[error("job uses {0} views on one side, at most {MAX_JOB_VIEWS} are supported")]
    TooManyViews(usize),

    #[error("job parameters are {0} bytes, at most {MAX_JOB_PARAMS} are supported")]
    ParamsTooLarge(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct GpuJob {
    pub in_use: bool,
    pub ready: bool,
    pub kind: OpKind,
    inputs: [ComponentView; MAX_JOB_VIEWS],
    input_count: usize,
    outputs: [ComponentView; MAX_JOB_VIEWS],
    output_count: usize,
    pub range: EntityRange,
    params: [u8; MAX_JOB_PARAMS],
    params_len: usize,
}

impl GpuJob {
    const EMPTY: GpuJob = GpuJob {
        in_use: false,
        ready: false,
        kind: OpKind::MemCopy,
        inputs: [ComponentView::unbound(); MAX_JOB_VIEWS],
        input_count: 0,
        outputs: [ComponentView::unbound(); MAX_JOB_VIEWS],
        output_count: 0,
        range: EntityRange::new(0, 0),
        params: [0; MAX_JOB_PARAMS],
        params_len: 0,
    };

    pub fn is_pending(&self) -> bool {
        self.in_use && !self.ready
    }

    pub fn inputs(&self) -> &[ComponentView] {
        &self.inputs[..self.input_count]
    }

    pub fn outputs(&self) -> &[ComponentView] {
        &self.outputs[..self.output_count]
    }

    pub fn params(&self) -> &[u8] {
        &self.params[..self.params_len]
    }

    fn run(&self, buffers: &mut BufferSet) {
        ops::execute::<Scalar>(
            self.kind,
            self.inputs(),
            self.outputs(),
            self.params(),
            self.range,
            buffers,
        );
    }
}

/// Caller-owned job slot table.
#[derive(Debug, Clone)]
pub struct GpuJobQueue {
    slots: [GpuJob; MAX_GPU_JOBS],
}

impl Default for GpuJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuJobQueue {
    pub const fn new() -> Self {
        Self {
            slots: [GpuJob::EMPTY; MAX_GPU_JOBS],
        }
    }

    /// Copy a job into the first free slot and return the slot index.
    pub fn enqueue(
        &mut self,
        kind: OpKind,
        inputs: &[ComponentView],
        outputs: &[ComponentView],
        params: &[u8],
        range: EntityRange,
    ) -> Result<usize, GpuQueueError> {
        if inputs.len() > MAX_JOB_VIEWS {
            return Err(GpuQueueError::TooManyViews(inputs.len()));
        }
        if outputs.len() > MAX_JOB_VIEWS {
            return Err(GpuQueueError::TooManyViews(outputs.len()));
        }
        if params.len() > MAX_JOB_PARAMS {
            return Err(GpuQueueError::ParamsTooLarge(params.len()));
        }
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| !s.in_use)
            .ok_or(GpuQueueError::Full)?;

        *slot = GpuJob::EMPTY;
        slot.in_use = true;
        slot.kind = kind;
        slot.inputs[..inputs.len()].copy_from_slice(inputs);
        slot.input_count = inputs.len();
        slot.outputs[..outputs.len()].copy_from_slice(outputs);
        slot.output_count = outputs.len();
        slot.params[..params.len()].copy_from_slice(params);
        slot.params_len = params.len();
        slot.range = range;
        Ok(index)
    }

    /// Jobs enqueued but not yet executed.
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_pending()).count()
    }

    pub fn job(&self, index: usize) -> Option<&GpuJob> {
        self.slots.get(index).filter(|s| s.in_use)
    }

    /// Execute up to `max_jobs` pending jobs in slot order, freeing each slot
    /// as it completes. Returns the number executed.
    pub fn process(&mut self, buffers: &mut BufferSet, max_jobs: usize) -> usize {
        let mut executed = 0;
        for slot in self.slots.iter_mut() {
            if executed == max_jobs {
                break;
            }
            if !slot.is_pending() {
                continue;
            }
            slot.run(buffers);
            slot.ready = true;
            *slot = GpuJob::EMPTY;
            executed += 1;
        }
        if executed > 0 {
            debug!(executed, remaining = self.pending(), "gpu jobs processed");
        }
        executed
    }

    /// Drop every slot, pending or not.
    pub fn clear(&mut self) {
        self.slots = [GpuJob::EMPTY; MAX_GPU_JOBS];
    }
}
