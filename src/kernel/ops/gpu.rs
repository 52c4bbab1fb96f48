use crate::kernel::dispatch::{CallContext, KernelCall, KernelEnv};
use crate::kernel::ops::{execute, OpKind, Scalar};

/// Kernel entry point for the GPU tier.
///
/// Queues the call for the next [`process`](crate::kernel::GpuJobQueue::process).
/// A call the queue cannot take (no free slot, too many views, oversized
/// parameters) runs synchronously on the scalar path instead, so work is
/// never dropped.
pub fn gpu_kernel(ctx: &CallContext, call: &KernelCall<'_>, env: &mut KernelEnv<'_>) {
    let Some(kind) = OpKind::from_op(ctx.op) else {
        return;
    };
    let queued = env
        .gpu_queue
        .enqueue(kind, call.inputs, call.outputs, call.params, call.range);
    if queued.is_err() {
        execute::<Scalar>(kind, call.inputs, call.outputs, call.params, call.range, env.buffers);
    }
}
