//! Destinations for generated instructions
//!
//! The scheduler never knows where its instructions go. A sink may issue them
//! to hardware, execute them in the simulator, validate them against the
//! queue model, or simply record them.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ScheduleResult;
use crate::instruction::{Instruction, InstructionKind};

/// Capability to accept an ordered instruction stream
pub trait InstructionSink {
    /// Accept the next instruction. An error aborts the session.
    fn issue(&mut self, instruction: Instruction) -> ScheduleResult<()>;
}

impl<S: InstructionSink + ?Sized> InstructionSink for &mut S {
    fn issue(&mut self, instruction: Instruction) -> ScheduleResult<()> {
        (**self).issue(instruction)
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl InstructionSink for NullSink {
    fn issue(&mut self, _instruction: Instruction) -> ScheduleResult<()> {
        Ok(())
    }
}

/// Records a stream in issue order
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct InstructionStream {
    instructions: Vec<Instruction>,
}

impl InstructionStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    pub fn count(&self, kind: InstructionKind) -> usize {
        self.instructions.iter().filter(|i| i.kind == kind).count()
    }

    /// Drain-marked ConfigureLoad instructions
    pub fn drains(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_drain()).count()
    }

    /// Instruction count per mnemonic
    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for inst in &self.instructions {
            *counts.entry(inst.kind.mnemonic()).or_insert(0) += 1;
        }
        counts
    }

    /// Replay the recorded stream into another sink
    pub fn replay<S: InstructionSink>(&self, sink: &mut S) -> ScheduleResult<()> {
        for inst in &self.instructions {
            sink.issue(*inst)?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.instructions)
    }
}

impl InstructionSink for InstructionStream {
    fn issue(&mut self, instruction: Instruction) -> ScheduleResult<()> {
        self.instructions.push(instruction);
        Ok(())
    }
}

impl From<Vec<Instruction>> for InstructionStream {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }
}

impl fmt::Display for InstructionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.instructions {
            writeln!(f, "{}", inst)?;
        }
        Ok(())
    }
}
