//! Array instruction set and its bit-exact encoding
//!
//! Every instruction is an opcode plus two 64-bit operands (`rs1`, `rs2`) and
//! four dependency bits. The combined control word is
//! `funct = (deps << 3) | opcode`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

use crate::error::{ScheduleError, ScheduleResult};
use crate::hardware::{Activation, Dataflow, QuantConfig};
use crate::scratchpad::ScratchpadAddress;

/// Configuration sub-selectors carried in `rs1[1:0]`
pub const CONFIG_EX: u64 = 0;
pub const CONFIG_LD: u64 = 1;
pub const CONFIG_ST: u64 = 2;

/// The three independently draining pipelines of the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Engine {
    Load,
    Execute,
    Store,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::Load, Engine::Execute, Engine::Store];

    /// The engines on this engine's first and second signalling channel
    pub fn peers(self) -> [Engine; 2] {
        match self {
            Engine::Load => [Engine::Store, Engine::Execute],
            Engine::Execute => [Engine::Load, Engine::Store],
            Engine::Store => [Engine::Load, Engine::Execute],
        }
    }

    fn channel_to(self, peer: Engine) -> Option<usize> {
        self.peers().iter().position(|&p| p == peer)
    }

    /// Flags for an instruction of this engine that signals `peer`
    pub fn push(self, peer: Engine) -> DependencyFlags {
        debug_assert_ne!(self, peer, "an engine has no channel to itself");
        match self.channel_to(peer) {
            Some(0) => DependencyFlags::new(true, false, false, false),
            Some(_) => DependencyFlags::new(false, false, true, false),
            None => DependencyFlags::NONE,
        }
    }

    /// Flags for an instruction of this engine that waits on `peer`
    pub fn pop(self, peer: Engine) -> DependencyFlags {
        debug_assert_ne!(self, peer, "an engine has no channel to itself");
        match self.channel_to(peer) {
            Some(0) => DependencyFlags::new(false, true, false, false),
            Some(_) => DependencyFlags::new(false, false, false, true),
            None => DependencyFlags::NONE,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Engine::Load => "ld",
            Engine::Execute => "ex",
            Engine::Store => "st",
        }
    }

    pub fn from_short_name(name: &str) -> Option<Self> {
        Engine::ALL.into_iter().find(|e| e.short_name() == name)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Push/pop bits on the two channels of the issuing engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyFlags {
    pub push_first: bool,
    pub pop_first: bool,
    pub push_second: bool,
    pub pop_second: bool,
}

impl DependencyFlags {
    pub const NONE: DependencyFlags = DependencyFlags {
        push_first: false,
        pop_first: false,
        push_second: false,
        pop_second: false,
    };

    pub fn new(push_first: bool, pop_first: bool, push_second: bool, pop_second: bool) -> Self {
        Self {
            push_first,
            pop_first,
            push_second,
            pop_second,
        }
    }

    /// 4-bit field `push1 pop1 push2 pop2`, most significant first
    pub fn bits(self) -> u8 {
        (self.push_first as u8) << 3
            | (self.pop_first as u8) << 2
            | (self.push_second as u8) << 1
            | self.pop_second as u8
    }

    pub fn from_bits(bits: u8) -> Self {
        Self::new(bits & 0b1000 != 0, bits & 0b0100 != 0, bits & 0b0010 != 0, bits & 0b0001 != 0)
    }

    pub fn is_empty(self) -> bool {
        self.bits() == 0
    }

    /// Peers this instruction signals, given the engine that issues it
    pub fn pushes(self, engine: Engine) -> impl Iterator<Item = Engine> {
        let [first, second] = engine.peers();
        [(self.push_first, first), (self.push_second, second)]
            .into_iter()
            .filter_map(|(set, peer)| set.then_some(peer))
    }

    /// Peers this instruction waits on, given the engine that issues it
    pub fn pops(self, engine: Engine) -> impl Iterator<Item = Engine> {
        let [first, second] = engine.peers();
        [(self.pop_first, first), (self.pop_second, second)]
            .into_iter()
            .filter_map(|(set, peer)| set.then_some(peer))
    }
}

impl BitOr for DependencyFlags {
    type Output = DependencyFlags;

    fn bitor(self, rhs: Self) -> Self {
        DependencyFlags::from_bits(self.bits() | rhs.bits())
    }
}

/// Closed set of instruction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionKind {
    ConfigureExecute,
    ConfigureLoad,
    ConfigureStore,
    MoveIn,
    MoveOut,
    Preload,
    ComputePreloaded,
    ComputeAccumulate,
    Flush,
    Fence,
}

impl InstructionKind {
    pub const ALL: [InstructionKind; 10] = [
        InstructionKind::ConfigureExecute,
        InstructionKind::ConfigureLoad,
        InstructionKind::ConfigureStore,
        InstructionKind::MoveIn,
        InstructionKind::MoveOut,
        InstructionKind::Preload,
        InstructionKind::ComputePreloaded,
        InstructionKind::ComputeAccumulate,
        InstructionKind::Flush,
        InstructionKind::Fence,
    ];

    /// 3-bit opcode
    pub fn opcode(self) -> u8 {
        match self {
            InstructionKind::ConfigureExecute
            | InstructionKind::ConfigureLoad
            | InstructionKind::ConfigureStore => 0,
            InstructionKind::Fence => 1,
            InstructionKind::MoveIn => 2,
            InstructionKind::MoveOut => 3,
            InstructionKind::ComputePreloaded => 4,
            InstructionKind::ComputeAccumulate => 5,
            InstructionKind::Preload => 6,
            InstructionKind::Flush => 7,
        }
    }

    /// Engine that consumes this kind, if any
    pub fn engine(self) -> Option<Engine> {
        match self {
            InstructionKind::ConfigureLoad | InstructionKind::MoveIn => Some(Engine::Load),
            InstructionKind::ConfigureExecute
            | InstructionKind::Preload
            | InstructionKind::ComputePreloaded
            | InstructionKind::ComputeAccumulate => Some(Engine::Execute),
            InstructionKind::ConfigureStore | InstructionKind::MoveOut => Some(Engine::Store),
            InstructionKind::Flush | InstructionKind::Fence => None,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            InstructionKind::ConfigureExecute => "config_ex",
            InstructionKind::ConfigureLoad => "config_ld",
            InstructionKind::ConfigureStore => "config_st",
            InstructionKind::MoveIn => "mvin",
            InstructionKind::MoveOut => "mvout",
            InstructionKind::Preload => "preload",
            InstructionKind::ComputePreloaded => "compute_preloaded",
            InstructionKind::ComputeAccumulate => "compute_accumulated",
            InstructionKind::Flush => "flush",
            InstructionKind::Fence => "fence",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        InstructionKind::ALL.into_iter().find(|k| k.mnemonic() == name)
    }
}

/// Instruction as it travels to the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawInstruction {
    pub funct: u8,
    pub rs1: u64,
    pub rs2: u64,
}

/// One array instruction: kind, two operand words and dependency flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub rs1: u64,
    pub rs2: u64,
    pub deps: DependencyFlags,
}

impl Instruction {
    fn new(kind: InstructionKind, rs1: u64, rs2: u64) -> Self {
        Self {
            kind,
            rs1,
            rs2,
            deps: DependencyFlags::NONE,
        }
    }

    /// Select dataflow and the move-out quantization stage
    pub fn configure_execute(dataflow: Dataflow, quant: &QuantConfig) -> ScheduleResult<Self> {
        let mode = dataflow
            .mode_bit()
            .ok_or_else(|| ScheduleError::UnsupportedDataflow {
                dataflow: dataflow.to_string(),
            })?;
        let rs1 = quant.activation.code() << 3 | mode << 2 | CONFIG_EX;
        let rs2 = (quant.relu6_shift as u64) << 32 | quant.acc_shift as u64;
        Ok(Self::new(InstructionKind::ConfigureExecute, rs1, rs2))
    }

    /// Row stride in bytes for following move-ins
    pub fn configure_load(stride: u64) -> Self {
        Self::new(InstructionKind::ConfigureLoad, CONFIG_LD, stride)
    }

    /// Row stride in bytes for following move-outs
    pub fn configure_store(stride: u64) -> Self {
        Self::new(InstructionKind::ConfigureStore, CONFIG_ST, stride)
    }

    /// Move `blocks` horizontally adjacent tiles into consecutive tile slots
    pub fn move_in(dram: u64, spad: ScratchpadAddress, blocks: usize) -> Self {
        let rs2 = (blocks as u64) << 32 | (spad.raw() & 0xFFFF_FFFF);
        Self::new(InstructionKind::MoveIn, dram, rs2)
    }

    pub fn move_out(dram: u64, spad: ScratchpadAddress) -> Self {
        Self::new(InstructionKind::MoveOut, dram, spad.raw())
    }

    pub fn preload(preload: ScratchpadAddress, output: ScratchpadAddress) -> Self {
        Self::new(InstructionKind::Preload, preload.raw(), output.raw())
    }

    pub fn compute_preloaded(a: ScratchpadAddress, b: ScratchpadAddress) -> Self {
        Self::new(InstructionKind::ComputePreloaded, a.raw(), b.raw())
    }

    pub fn compute_accumulate(a: ScratchpadAddress, b: ScratchpadAddress) -> Self {
        Self::new(InstructionKind::ComputeAccumulate, a.raw(), b.raw())
    }

    pub fn flush() -> Self {
        Self::new(InstructionKind::Flush, 0, 0)
    }

    pub fn fence() -> Self {
        Self::new(InstructionKind::Fence, 0, 0)
    }

    pub fn with_deps(mut self, deps: DependencyFlags) -> Self {
        self.deps = deps;
        self
    }

    pub fn engine(&self) -> Option<Engine> {
        self.kind.engine()
    }

    /// ConfigureLoad with a pop on the execute channel: waits for one
    /// retirement and changes nothing else
    pub fn is_drain(&self) -> bool {
        self.kind == InstructionKind::ConfigureLoad && self.deps.pop_second
    }

    /// Scratchpad address carried in `rs2` (move-in/out, preload output)
    pub fn spad_address(&self) -> ScratchpadAddress {
        ScratchpadAddress::from_operand(self.rs2)
    }

    /// Tiles covered by a move-in; a zero length field means a single tile
    pub fn block_len(&self) -> usize {
        match self.kind {
            InstructionKind::MoveIn => ((self.rs2 >> 32) as usize).max(1),
            _ => 1,
        }
    }

    /// Dataflow and quantization stage of a ConfigureExecute
    pub fn execute_config(&self) -> Option<(Dataflow, QuantConfig)> {
        if self.kind != InstructionKind::ConfigureExecute {
            return None;
        }
        let dataflow = Dataflow::from_mode_bit(self.rs1 >> 2);
        let activation = Activation::from_code((self.rs1 >> 3) & 0b11)?;
        let quant = QuantConfig::new(
            activation,
            (self.rs2 & 0xFFFF_FFFF) as u32,
            (self.rs2 >> 32) as u32,
        );
        Some((dataflow, quant))
    }

    pub fn encode(&self) -> RawInstruction {
        RawInstruction {
            funct: self.deps.bits() << 3 | self.kind.opcode(),
            rs1: self.rs1,
            rs2: self.rs2,
        }
    }

    pub fn decode(raw: RawInstruction) -> ScheduleResult<Self> {
        let opcode = raw.funct & 0b111;
        let unknown = ScheduleError::UnknownOpcode {
            opcode,
            funct: raw.funct,
        };
        let kind = match opcode {
            0 => match raw.rs1 & 0b11 {
                CONFIG_EX => InstructionKind::ConfigureExecute,
                CONFIG_LD => InstructionKind::ConfigureLoad,
                CONFIG_ST => InstructionKind::ConfigureStore,
                _ => return Err(unknown),
            },
            1 => InstructionKind::Fence,
            2 => InstructionKind::MoveIn,
            3 => InstructionKind::MoveOut,
            4 => InstructionKind::ComputePreloaded,
            5 => InstructionKind::ComputeAccumulate,
            6 => InstructionKind::Preload,
            7 => InstructionKind::Flush,
            _ => return Err(unknown),
        };
        if raw.funct >> 7 != 0 {
            return Err(unknown);
        }
        Ok(Self {
            kind,
            rs1: raw.rs1,
            rs2: raw.rs2,
            deps: DependencyFlags::from_bits(raw.funct >> 3),
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<20} {:#018x}, {:#018x}", self.kind.mnemonic(), self.rs1, self.rs2)?;
        if let Some(engine) = self.engine() {
            for peer in self.deps.pushes(engine) {
                write!(f, " push:{}", peer)?;
            }
            for peer in self.deps.pops(engine) {
                write!(f, " pop:{}", peer)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_flag_bits_sit_above_opcode() {
        let inst = Instruction::move_in(0x1000, ScratchpadAddress::new(0x40), 1)
            .with_deps(Engine::Load.push(Engine::Execute));
        let raw = inst.encode();
        assert_eq!(raw.funct, 0b0010_010);
        assert_eq!(raw.rs2, 1 << 32 | 0x40);

        let all = DependencyFlags::new(true, true, true, true);
        let raw = Instruction::flush().with_deps(all).encode();
        assert_eq!(raw.funct, 0b1111_111);
    }

    #[test]
    fn test_block_move_in_packing() {
        let spad = ScratchpadAddress::new(ScratchpadAddress::ACCUMULATOR_BIT | 0x20);
        let inst = Instruction::move_in(0xabc0, spad, 4);
        assert_eq!(inst.rs2 >> 32, 4);
        assert_eq!(inst.rs2 & 0xFFFF_FFFF, 0x8000_0020);
        assert_eq!(inst.block_len(), 4);
        assert_eq!(inst.spad_address(), spad);
    }

    #[test]
    fn test_configure_execute_packing() {
        let quant = QuantConfig::new(Activation::Relu6, 7, 3);
        let inst = Instruction::configure_execute(Dataflow::WeightStationary, &quant).unwrap();
        assert_eq!(inst.rs1, 2 << 3 | 1 << 2 | CONFIG_EX);
        assert_eq!(inst.rs2, 3 << 32 | 7);
        assert_eq!(
            inst.execute_config(),
            Some((Dataflow::WeightStationary, quant))
        );
        assert!(Instruction::configure_execute(Dataflow::CpuReference, &quant).is_err());
    }

    #[test]
    fn test_decode_inverts_encode() {
        let quant = QuantConfig::new(Activation::Relu, 2, 0);
        let stream = vec![
            Instruction::configure_execute(Dataflow::OutputStationary, &quant).unwrap(),
            Instruction::configure_load(64).with_deps(Engine::Load.pop(Engine::Execute)),
            Instruction::configure_store(16),
            Instruction::preload(ScratchpadAddress::GARBAGE, ScratchpadAddress::new(0xC000_0000))
                .with_deps(Engine::Execute.pop(Engine::Load) | Engine::Execute.pop(Engine::Store)),
            Instruction::compute_accumulate(ScratchpadAddress::new(0), ScratchpadAddress::new(0x80)),
            Instruction::move_out(0x2000, ScratchpadAddress::new(0xC000_0000))
                .with_deps(Engine::Store.push(Engine::Load)),
            Instruction::fence(),
        ];
        for inst in stream {
            assert_eq!(Instruction::decode(inst.encode()).unwrap(), inst);
        }
    }

    #[test]
    fn test_decode_rejects_bad_config_selector() {
        let raw = RawInstruction { funct: 0, rs1: 3, rs2: 0 };
        assert!(Instruction::decode(raw).is_err());
    }

    #[test]
    fn test_engine_channels() {
        // mvin: (store, execute); compute: (load, store); mvout: (load, execute)
        assert_eq!(Engine::Load.push(Engine::Store).bits(), 0b1000);
        assert_eq!(Engine::Load.pop(Engine::Execute).bits(), 0b0001);
        assert_eq!(Engine::Execute.pop(Engine::Load).bits(), 0b0100);
        assert_eq!(Engine::Execute.push(Engine::Store).bits(), 0b0010);
        assert_eq!(Engine::Store.push(Engine::Execute).bits(), 0b0010);
        let flags = Engine::Store.pop(Engine::Execute) | Engine::Store.push(Engine::Load);
        assert_eq!(flags.pushes(Engine::Store).collect::<Vec<_>>(), vec![Engine::Load]);
        assert_eq!(flags.pops(Engine::Store).collect::<Vec<_>>(), vec![Engine::Execute]);
    }

    #[test]
    fn test_display_listing() {
        let inst = Instruction::move_out(0x40, ScratchpadAddress::new(0xC000_0000))
            .with_deps(Engine::Store.pop(Engine::Execute));
        let text = inst.to_string();
        assert!(text.starts_with("mvout"));
        assert!(text.ends_with("0x00000000c0000000 pop:ex"));
    }
}
