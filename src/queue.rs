//! Dependency queue model
//!
//! Shadows the six inter-engine token counters of the array. Every
//! instruction is classified by the engine that consumes it; its pop bits
//! take a token from the queue feeding that engine and its push bits add one
//! to the queue leaving it. A counter leaving `[0, capacity]` means the
//! stream would deadlock or lose a signal on hardware, so it is fatal.

use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ScheduleError, ScheduleResult};
use crate::instruction::{Engine, Instruction, InstructionKind};
use crate::sink::{InstructionSink, NullSink};

/// One directed channel between two engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Queue {
    LoadToExecute,
    LoadToStore,
    ExecuteToLoad,
    ExecuteToStore,
    StoreToLoad,
    StoreToExecute,
}

impl Queue {
    pub const ALL: [Queue; 6] = [
        Queue::LoadToExecute,
        Queue::LoadToStore,
        Queue::ExecuteToLoad,
        Queue::ExecuteToStore,
        Queue::StoreToLoad,
        Queue::StoreToExecute,
    ];

    /// Queue carrying tokens from `from` to `to`
    pub fn between(from: Engine, to: Engine) -> Option<Queue> {
        match (from, to) {
            (Engine::Load, Engine::Execute) => Some(Queue::LoadToExecute),
            (Engine::Load, Engine::Store) => Some(Queue::LoadToStore),
            (Engine::Execute, Engine::Load) => Some(Queue::ExecuteToLoad),
            (Engine::Execute, Engine::Store) => Some(Queue::ExecuteToStore),
            (Engine::Store, Engine::Load) => Some(Queue::StoreToLoad),
            (Engine::Store, Engine::Execute) => Some(Queue::StoreToExecute),
            _ => None,
        }
    }

    pub fn source(self) -> Engine {
        match self {
            Queue::LoadToExecute | Queue::LoadToStore => Engine::Load,
            Queue::ExecuteToLoad | Queue::ExecuteToStore => Engine::Execute,
            Queue::StoreToLoad | Queue::StoreToExecute => Engine::Store,
        }
    }

    pub fn target(self) -> Engine {
        match self {
            Queue::ExecuteToLoad | Queue::StoreToLoad => Engine::Load,
            Queue::LoadToExecute | Queue::StoreToExecute => Engine::Execute,
            Queue::LoadToStore | Queue::ExecuteToStore => Engine::Store,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source(), self.target())
    }
}

/// Six bounded token counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    counts: [usize; 6],
    high_water: [usize; 6],
    capacity: usize,
}

impl QueueState {
    pub fn new(capacity: usize) -> Self {
        Self {
            counts: [0; 6],
            high_water: [0; 6],
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self, queue: Queue) -> usize {
        self.counts[queue.index()]
    }

    /// Largest count `queue` has held this session
    pub fn high_water(&self, queue: Queue) -> usize {
        self.high_water[queue.index()]
    }

    pub fn is_drained(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    /// Queues still holding tokens
    pub fn outstanding(&self) -> impl Iterator<Item = (Queue, usize)> + '_ {
        Queue::ALL
            .into_iter()
            .map(|q| (q, self.count(q)))
            .filter(|&(_, c)| c > 0)
    }

    fn push(&mut self, queue: Queue, index: usize) -> ScheduleResult<()> {
        let slot = queue.index();
        if self.counts[slot] == self.capacity {
            return Err(ScheduleError::QueueOverflow {
                queue,
                index,
                capacity: self.capacity,
            });
        }
        self.counts[slot] += 1;
        self.high_water[slot] = self.high_water[slot].max(self.counts[slot]);
        Ok(())
    }

    fn pop(&mut self, queue: Queue, index: usize) -> ScheduleResult<()> {
        let slot = queue.index();
        if self.counts[slot] == 0 {
            return Err(ScheduleError::QueueUnderflow { queue, index });
        }
        self.counts[slot] -= 1;
        Ok(())
    }

    /// Apply instruction number `index` of the session
    ///
    /// Pops are taken before pushes: an instruction waits for its inputs
    /// before it signals anyone. A Fence requires every queue to be empty.
    pub fn apply(&mut self, instruction: &Instruction, index: usize) -> ScheduleResult<()> {
        if instruction.kind == InstructionKind::Fence {
            if let Some((queue, outstanding)) = self.outstanding().next() {
                return Err(ScheduleError::QueueNotDrained {
                    queue,
                    index,
                    outstanding,
                });
            }
            return Ok(());
        }
        let Some(engine) = instruction.engine() else {
            return Ok(());
        };
        for peer in instruction.deps.pops(engine) {
            if let Some(queue) = Queue::between(peer, engine) {
                self.pop(queue, index)?;
            }
        }
        for peer in instruction.deps.pushes(engine) {
            if let Some(queue) = Queue::between(engine, peer) {
                self.push(queue, index)?;
            }
        }
        Ok(())
    }
}

/// Validating sink: checks every instruction against a [`QueueState`]
/// before passing it on
pub struct QueueModel<S = NullSink> {
    state: QueueState,
    inner: S,
    issued: usize,
}

impl QueueModel<NullSink> {
    pub fn new(capacity: usize) -> Self {
        Self::wrapping(capacity, NullSink)
    }
}

impl<S: InstructionSink> QueueModel<S> {
    pub fn wrapping(capacity: usize, inner: S) -> Self {
        Self {
            state: QueueState::new(capacity),
            inner,
            issued: 0,
        }
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    /// Instructions accepted so far
    pub fn issued(&self) -> usize {
        self.issued
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: InstructionSink> InstructionSink for QueueModel<S> {
    fn issue(&mut self, instruction: Instruction) -> ScheduleResult<()> {
        self.state.apply(&instruction, self.issued)?;
        trace!("queue #{} {} -> {:?}", self.issued, instruction, self.state.counts);
        self.issued += 1;
        self.inner.issue(instruction)
    }
}

/// Replay `instructions` through a fresh model of the given capacity
pub fn validate<'a>(
    instructions: impl IntoIterator<Item = &'a Instruction>,
    capacity: usize,
) -> ScheduleResult<QueueState> {
    let mut model = QueueModel::new(capacity);
    for inst in instructions {
        model.issue(*inst)?;
    }
    Ok(model.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratchpad::ScratchpadAddress;
    use pretty_assertions::assert_eq;

    fn mvin() -> Instruction {
        Instruction::move_in(0x1000, ScratchpadAddress::new(0), 1)
    }

    fn preload() -> Instruction {
        Instruction::preload(ScratchpadAddress::GARBAGE, ScratchpadAddress::GARBAGE)
    }

    #[test]
    fn test_push_then_pop_balances() {
        let stream = [
            mvin().with_deps(Engine::Load.push(Engine::Execute)),
            preload().with_deps(Engine::Execute.pop(Engine::Load)),
            Instruction::fence(),
        ];
        let state = validate(&stream, 2).unwrap();
        assert!(state.is_drained());
        assert_eq!(state.high_water(Queue::LoadToExecute), 1);
    }

    #[test]
    fn test_pop_without_push_underflows() {
        let stream = [preload().with_deps(Engine::Execute.pop(Engine::Store))];
        match validate(&stream, 2) {
            Err(ScheduleError::QueueUnderflow { queue, index }) => {
                assert_eq!(queue, Queue::StoreToExecute);
                assert_eq!(index, 0);
            }
            other => panic!("expected underflow, got {:?}", other),
        }
    }

    #[test]
    fn test_overflow_at_capacity() {
        let push = mvin().with_deps(Engine::Load.push(Engine::Execute));
        let stream = [push, push, push];
        match validate(&stream, 2) {
            Err(ScheduleError::QueueOverflow { queue, index, capacity }) => {
                assert_eq!(queue, Queue::LoadToExecute);
                assert_eq!(index, 2);
                assert_eq!(capacity, 2);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_fence_requires_drained_queues() {
        let stream = [
            Instruction::move_out(0, ScratchpadAddress::new(0)).with_deps(Engine::Store.push(Engine::Load)),
            Instruction::fence(),
        ];
        match validate(&stream, 4) {
            Err(ScheduleError::QueueNotDrained { queue, outstanding, .. }) => {
                assert_eq!(queue, Queue::StoreToLoad);
                assert_eq!(outstanding, 1);
            }
            other => panic!("expected fence failure, got {:?}", other),
        }
    }

    #[test]
    fn test_config_instructions_classified_by_selector() {
        // a drain is a load-engine instruction popping the execute queue
        let stream = [
            preload().with_deps(Engine::Execute.push(Engine::Load)),
            Instruction::configure_load(16).with_deps(Engine::Load.pop(Engine::Execute)),
            Instruction::configure_store(16).with_deps(Engine::Store.push(Engine::Execute)),
        ];
        let state = validate(&stream, 2).unwrap();
        assert_eq!(state.count(Queue::ExecuteToLoad), 0);
        assert_eq!(state.count(Queue::StoreToExecute), 1);
        assert_eq!(
            state.outstanding().collect::<Vec<_>>(),
            vec![(Queue::StoreToExecute, 1)]
        );
    }

    #[test]
    fn test_model_forwards_to_inner_sink() {
        let mut model = QueueModel::wrapping(2, crate::sink::InstructionStream::new());
        model.issue(Instruction::flush()).unwrap();
        assert_eq!(model.issued(), 1);
        assert_eq!(model.into_inner().len(), 1);
    }

    #[test]
    fn test_queue_display() {
        assert_eq!(Queue::ExecuteToStore.to_string(), "ex->st");
        for q in Queue::ALL {
            assert_eq!(Queue::between(q.source(), q.target()), Some(q));
        }
    }
}
