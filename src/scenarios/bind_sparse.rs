//! Semaphores signalled through a mix of queue submissions and sparse binds,
//! then waited on for values they never reach.
//!
//! The submission sequence is data. [`SemaphoreLedger`] replays it on the
//! host to produce the values the device should hold when the final wait
//! blocks.

use ash::vk;
use thiserror::Error;
use tracing::{info, warn};

use crate::gpu::{
    create_bind_sparse_info, create_binary_semaphores, create_fence, create_submit_info,
    create_timeline_semaphore_submit_info, create_timeline_semaphores, reset_fence,
    wait_for_fence, Result, VulkanContext, VulkanDevice, FENCE_TIMEOUT,
};
use crate::vk_validate;

use super::timeline::record_double_dispatch;

pub const NUM_BINARY_SEMAPHORES: usize = 10;
pub const NUM_TIMELINE_SEMAPHORES: usize = 10;
pub const TIMELINE_INITIAL_VALUE: u64 = 10;
/// Every semaphore is waited on for this value at the end.
pub const FINAL_WAIT_VALUE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemaphoreRef {
    Binary(usize),
    Timeline(usize),
}

/// A wait or signal on one semaphore. Binary semaphores ignore `value`
/// beyond using 1 for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreOp {
    pub semaphore: SemaphoreRef,
    pub value: u64,
}

const fn binary(index: usize) -> SemaphoreOp {
    SemaphoreOp {
        semaphore: SemaphoreRef::Binary(index),
        value: 1,
    }
}

const fn timeline(index: usize, value: u64) -> SemaphoreOp {
    SemaphoreOp {
        semaphore: SemaphoreRef::Timeline(index),
        value,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Submit,
    BindSparse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionStep {
    pub label: &'static str,
    pub kind: StepKind,
    pub waits: Vec<SemaphoreOp>,
    pub signals: Vec<SemaphoreOp>,
}

/// The fenced submit and the two sparse binds, in order.
pub fn plan() -> Vec<SubmissionStep> {
    vec![
        SubmissionStep {
            label: "vkQueueSubmit",
            kind: StepKind::Submit,
            waits: vec![],
            signals: vec![binary(0), binary(4), timeline(0, 11), timeline(4, 12), timeline(8, 13)],
        },
        SubmissionStep {
            label: "vkQueueBindSparse1",
            kind: StepKind::BindSparse,
            waits: vec![binary(0), timeline(8, 13)],
            signals: vec![binary(2), binary(6), timeline(1, 14), timeline(5, 15), timeline(9, 16)],
        },
        SubmissionStep {
            label: "vkQueueBindSparse2",
            kind: StepKind::BindSparse,
            waits: vec![binary(4), timeline(8, 13)],
            signals: vec![binary(2), binary(7), timeline(0, 17), timeline(1, 18), timeline(2, 19)],
        },
    ]
}

/// A submit that waits on every semaphore, binaries first, for `value`.
pub fn final_wait(value: u64) -> SubmissionStep {
    let binaries = (0..NUM_BINARY_SEMAPHORES).map(|i| SemaphoreOp {
        semaphore: SemaphoreRef::Binary(i),
        value,
    });
    let timelines = (0..NUM_TIMELINE_SEMAPHORES).map(|i| timeline(i, value));
    SubmissionStep {
        label: "vkQueueSubmit2",
        kind: StepKind::Submit,
        waits: binaries.chain(timelines).collect(),
        signals: vec![],
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{0:?} does not exist")]
    OutOfRange(SemaphoreRef),
    #[error("wait on {semaphore:?} for {wanted} cannot be satisfied (current value {current})")]
    Unsatisfied {
        semaphore: SemaphoreRef,
        wanted: u64,
        current: u64,
    },
    #[error("timeline {index} would move backwards from {current} to {value}")]
    NonMonotonic { index: usize, current: u64, value: u64 },
}

/// Host-side model of semaphore state: binaries are 0 or 1, timelines only
/// grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaphoreLedger {
    pub binary: Vec<u64>,
    pub timeline: Vec<u64>,
}

impl SemaphoreLedger {
    pub fn new(binaries: usize, timelines: usize, initial: u64) -> Self {
        Self {
            binary: vec![0; binaries],
            timeline: vec![initial; timelines],
        }
    }

    pub fn value(&self, semaphore: SemaphoreRef) -> std::result::Result<u64, LedgerError> {
        let slot = match semaphore {
            SemaphoreRef::Binary(i) => self.binary.get(i),
            SemaphoreRef::Timeline(i) => self.timeline.get(i),
        };
        slot.copied().ok_or(LedgerError::OutOfRange(semaphore))
    }

    fn check_wait(&self, op: &SemaphoreOp) -> std::result::Result<(), LedgerError> {
        let current = self.value(op.semaphore)?;
        let satisfied = match op.semaphore {
            SemaphoreRef::Binary(_) => current == 1,
            SemaphoreRef::Timeline(_) => current >= op.value,
        };
        if satisfied {
            Ok(())
        } else {
            Err(LedgerError::Unsatisfied {
                semaphore: op.semaphore,
                wanted: op.value,
                current,
            })
        }
    }

    /// Whether `step` would wait forever given the current state.
    pub fn would_block(&self, step: &SubmissionStep) -> bool {
        step.waits.iter().any(|op| self.check_wait(op).is_err())
    }

    /// Consumes binary waits and applies every signal. Nothing changes when
    /// a wait is unsatisfied or a timeline would go backwards.
    pub fn apply(&mut self, step: &SubmissionStep) -> std::result::Result<(), LedgerError> {
        for op in &step.waits {
            self.check_wait(op)?;
        }
        for op in &step.signals {
            let current = self.value(op.semaphore)?;
            if let SemaphoreRef::Timeline(index) = op.semaphore {
                if op.value <= current {
                    return Err(LedgerError::NonMonotonic {
                        index,
                        current,
                        value: op.value,
                    });
                }
            }
        }

        for op in &step.waits {
            if let SemaphoreRef::Binary(i) = op.semaphore {
                self.binary[i] = 0;
            }
        }
        for op in &step.signals {
            match op.semaphore {
                SemaphoreRef::Binary(i) => self.binary[i] = 1,
                SemaphoreRef::Timeline(i) => self.timeline[i] = op.value,
            }
        }
        Ok(())
    }
}

/// Native handles and values for one step, split the way the API wants them.
struct ResolvedStep {
    waits: Vec<vk::Semaphore>,
    wait_values: Vec<u64>,
    signals: Vec<vk::Semaphore>,
    signal_values: Vec<u64>,
}

fn resolve(step: &SubmissionStep, binaries: &[vk::Semaphore], timelines: &[vk::Semaphore]) -> ResolvedStep {
    let handle = |r: SemaphoreRef| match r {
        SemaphoreRef::Binary(i) => binaries[i],
        SemaphoreRef::Timeline(i) => timelines[i],
    };
    ResolvedStep {
        waits: step.waits.iter().map(|op| handle(op.semaphore)).collect(),
        wait_values: step.waits.iter().map(|op| op.value).collect(),
        signals: step.signals.iter().map(|op| handle(op.semaphore)).collect(),
        signal_values: step.signals.iter().map(|op| op.value).collect(),
    }
}

fn some_if_any<T>(items: &[T]) -> Option<&[T]> {
    (!items.is_empty()).then_some(items)
}

fn issue(
    device: &VulkanDevice,
    cmd_buf: vk::CommandBuffer,
    step: &SubmissionStep,
    resolved: &ResolvedStep,
    fence: vk::Fence,
) -> Result<()> {
    let queue = device.queue()?;
    let mut timeline = create_timeline_semaphore_submit_info(
        some_if_any(&resolved.wait_values),
        some_if_any(&resolved.signal_values),
    );
    match step.kind {
        StepKind::Submit => {
            let masks = vec![vk::PipelineStageFlags::ALL_GRAPHICS; resolved.waits.len()];
            let submit = create_submit_info(
                &cmd_buf,
                some_if_any(&resolved.waits),
                some_if_any(&masks),
                some_if_any(&resolved.signals),
                Some(&mut timeline),
            )
            .build();
            vk_validate!(unsafe { device.raw().queue_submit(queue, &[submit], fence) });
        }
        StepKind::BindSparse => {
            let bind = create_bind_sparse_info(
                some_if_any(&resolved.waits),
                some_if_any(&resolved.signals),
                Some(&mut timeline),
            )
            .build();
            vk_validate!(unsafe { device.raw().queue_bind_sparse(queue, &[bind], fence) });
        }
    }
    Ok(())
}

pub(super) fn hang(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();
    let cmd_buf = record_double_dispatch(&device)?;

    info!("Creating fence...");
    let fence = create_fence(&device, "Fence")?;

    info!("Creating binary semaphores...");
    let binaries = create_binary_semaphores(&device, NUM_BINARY_SEMAPHORES)?;
    for (i, s) in binaries.iter().enumerate() {
        device.set_name(*s, &format!("Binary Semaphore {}", i));
    }

    info!("Creating timeline semaphores...");
    let timelines = create_timeline_semaphores(&device, NUM_TIMELINE_SEMAPHORES, TIMELINE_INITIAL_VALUE)?;
    for (i, s) in timelines.iter().enumerate() {
        device.set_name(*s, &format!("Timeline Semaphore {}", i));
    }

    let mut ledger = SemaphoreLedger::new(
        NUM_BINARY_SEMAPHORES,
        NUM_TIMELINE_SEMAPHORES,
        TIMELINE_INITIAL_VALUE,
    );
    for step in plan() {
        info!("Creating and submitting {} with fence...", step.label);
        issue(&device, cmd_buf, &step, &resolve(&step, &binaries, &timelines), fence)?;
        info!("Done.");

        info!("Waiting for fence from {}...", step.label);
        vk_validate!(wait_for_fence(&device, fence, FENCE_TIMEOUT));
        info!("Fence signal received.");
        info!("Resetting the fence...");
        vk_validate!(reset_fence(&device, fence));

        if let Err(e) = ledger.apply(&step) {
            warn!("{}: {}", step.label, e);
        }
        info!("binary semaphores:   {:?}", ledger.binary);
        info!("timeline semaphores: {:?}", ledger.timeline);
    }

    let last = final_wait(FINAL_WAIT_VALUE);
    info!("Creating and submitting {} that waits on all the semaphores...", last.label);
    issue(&device, cmd_buf, &last, &resolve(&last, &binaries, &timelines), fence)?;
    info!("Done.");
    Ok(())
}
