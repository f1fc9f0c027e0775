//! The in-flight instruction record.
//!
//! One `Inst` exists per dynamic instruction (or vector uop) from fetch to
//! retirement. It carries:
//! 1. **Identity:** unique id (fetch order), program id (trace order), uop id.
//! 2. **Decode info:** mnemonic, class, operand lists, immediate, vector config.
//! 3. **Lifecycle:** status (monotonic along the success path) and flags.
//! 4. **Rename shadow:** renamed sources/destinations per register file plus
//!    the store-data register, with previous-destination mappings for flush
//!    restore.
//!
//! The record is shared by every stage that still references it (ROB, rename
//! in-flight queue, LSU structures, memory-access records), so it lives in an
//! `Rc<RefCell<_>>`; the only structural back-pointer to it (the rename
//! reference-count producer) is a `Weak`, so no strong cycle exists and the
//! retire path releases it linearly.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::common::types::{RegFile, RegisterBitMask, NUM_REG_FILES};

/// Shared handle to an in-flight instruction.
pub type InstPtr = Rc<RefCell<Inst>>;

/// Weak handle used for structural back-pointers.
pub type InstWeakPtr = Weak<RefCell<Inst>>;

/// A group of instructions moving between stages together.
pub type InstGroup = Vec<InstPtr>;

/// Vector register length in bits (fixed machine parameter).
pub const VLEN: u32 = 128;

/// Lifecycle status; advances monotonically along the success path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstStatus {
    /// Produced by the trace source and grouped by Fetch.
    Fetched,
    /// Passed through Decode.
    Decoded,
    /// Holds physical registers.
    Renamed,
    /// Routed to an execution unit.
    Dispatched,
    /// Operands ready; sitting in (or moving through) an issue structure.
    Scheduled,
    /// Result available; eligible for in-order retirement.
    Completed,
    /// Left the machine.
    Retired,
}

impl fmt::Display for InstStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstStatus::Fetched => "FETCHED",
            InstStatus::Decoded => "DECODED",
            InstStatus::Renamed => "RENAMED",
            InstStatus::Dispatched => "DISPATCHED",
            InstStatus::Scheduled => "SCHEDULED",
            InstStatus::Completed => "COMPLETED",
            InstStatus::Retired => "RETIRED",
        };
        write!(f, "{s}")
    }
}

/// Operand field within the encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandField {
    Rs1,
    Rs2,
    Rs3,
    Rd,
}

/// Static operand descriptor from the decoder facade.
#[derive(Clone, Copy, Debug)]
pub struct OpInfo {
    /// Which register file the operand lives in.
    pub reg_file: RegFile,
    /// Encoding field this operand came from.
    pub field_id: OperandField,
    /// Architectural register number.
    pub field_value: u32,
    /// True for integer x0 (hardwired zero, never renamed).
    pub is_x0: bool,
}

/// Vector uop expansion kind assigned by the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UopGen {
    /// One uop per LMUL register group member.
    Elementwise,
    /// Destination EMUL is twice the source LMUL.
    Widening,
    /// Destination EMUL is half the source LMUL.
    Narrowing,
    /// Slide up/down; uops carry an extra overlap source.
    Slide,
    /// Register-gather style permutes.
    Permute,
}

/// Coarse instruction class used for routing and modelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstClass {
    /// Integer ALU operation.
    Alu,
    /// Floating-point operation.
    Fpu,
    /// Memory load.
    Load,
    /// Memory store.
    Store,
    /// Conditional branch or jump.
    Branch,
    /// System instruction (fence/csr/ecall); retires at the ROB.
    System,
    /// Vector configuration (`vset{i}vl{i}`).
    Vset,
    /// Vector operation with a uop expansion kind.
    Vector(UopGen),
}

/// Execution unit an instruction dispatches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetUnit {
    Alu,
    Fpu,
    Br,
    Lsu,
    /// Completes at dispatch; retires from the ROB directly.
    Rob,
}

impl fmt::Display for TargetUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetUnit::Alu => "alu",
            TargetUnit::Fpu => "fpu",
            TargetUnit::Br => "br",
            TargetUnit::Lsu => "lsu",
            TargetUnit::Rob => "rob",
        };
        write!(f, "{s}")
    }
}

/// Vector configuration established by `vset*` instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectorConfig {
    /// Active vector length in elements.
    pub vl: u32,
    /// Element width in bits.
    pub sew: u32,
    /// Register group multiplier.
    pub lmul: u32,
    /// Tail-agnostic flag.
    pub vta: bool,
    /// Mask-agnostic flag.
    pub vma: bool,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            vl: 0,
            sew: 64,
            lmul: 1,
            vta: false,
            vma: false,
        }
    }
}

impl VectorConfig {
    /// Maximum VL for the current SEW/LMUL.
    pub fn vlmax(&self) -> u32 {
        (VLEN / self.sew) * self.lmul
    }
}

/// A renamed register recorded in the instruction's rename shadow.
#[derive(Clone, Debug)]
pub struct RenamedReg {
    /// Physical register backing this operand.
    pub phys: u32,
    /// The original operand descriptor.
    pub op_info: OpInfo,
    /// For destinations: the mapping this rename displaced.
    pub prev_dest: Option<u32>,
}

/// The store-data operand, kept apart from the address sources.
#[derive(Clone, Debug)]
pub struct DataReg {
    /// Physical register of the data operand (arch number for x0).
    pub phys: u32,
    /// The original operand descriptor.
    pub op_info: OpInfo,
    /// x0 data operands are always ready and never renamed.
    pub is_x0: bool,
}

/// Per-instruction rename shadow state.
#[derive(Clone, Debug, Default)]
pub struct RenameData {
    sources: [Vec<RenamedReg>; NUM_REG_FILES],
    dests: [Vec<RenamedReg>; NUM_REG_FILES],
    data_reg: Option<DataReg>,
}

impl RenameData {
    /// Records a renamed source.
    pub fn add_source(&mut self, reg: RenamedReg) {
        self.sources[reg.op_info.reg_file.index()].push(reg);
    }

    /// Records a renamed destination.
    pub fn add_dest(&mut self, reg: RenamedReg) {
        self.dests[reg.op_info.reg_file.index()].push(reg);
    }

    /// Sets the store-data register.
    pub fn set_data_reg(&mut self, data: DataReg) {
        self.data_reg = Some(data);
    }

    /// Renamed sources on one register file.
    pub fn sources(&self, rf: RegFile) -> &[RenamedReg] {
        &self.sources[rf.index()]
    }

    /// Renamed destinations on one register file.
    pub fn dests(&self, rf: RegFile) -> &[RenamedReg] {
        &self.dests[rf.index()]
    }

    /// The store-data register, if one was recorded.
    pub fn data_reg(&self) -> Option<&DataReg> {
        self.data_reg.as_ref()
    }

    /// Drops the shadow state for one register file (flush restore path).
    pub fn clear(&mut self, rf: RegFile) {
        self.sources[rf.index()].clear();
        self.dests[rf.index()].clear();
    }
}

/// One in-flight dynamic instruction.
pub struct Inst {
    /// Monotonic id assigned at fetch; total age order.
    pub unique_id: u64,
    /// Trace-order id (uops of one instruction share it).
    pub program_id: u64,
    /// Uop index within an expanded instruction (0 for scalars).
    pub uop_id: u32,
    /// Program counter.
    pub pc: u64,
    /// Target virtual address (memory target or branch target).
    pub target_vaddr: u64,
    /// Target physical address once translated.
    pub target_paddr: u64,

    /// Mnemonic from the decoder facade.
    pub mnemonic: String,
    /// Raw opcode when the trace provided one.
    pub opcode: u32,
    /// Class used for routing/modelling.
    pub class: InstClass,
    /// Source operand descriptors.
    pub srcs: Vec<OpInfo>,
    /// Destination operand descriptors.
    pub dests: Vec<OpInfo>,
    /// Immediate, when present.
    pub imm: Option<u64>,
    /// Vector configuration attached by the trace/decode.
    pub vector_config: VectorConfig,

    status: InstStatus,

    /// Ground-truth branch direction from the trace.
    pub is_taken: bool,
    /// Change-of-flow marker (never shares a fetch group).
    pub is_cof: bool,
    /// Register-move eligible for move elimination.
    pub is_move: bool,
    /// Last instruction of its fetch block.
    pub is_last_in_fetch_block: bool,
    /// Fetched down a speculative path.
    pub is_speculative: bool,
    /// Removed by a flush.
    pub is_flushed: bool,
    /// Last uop of its program instruction (true for scalars).
    pub is_last_uop: bool,
    /// A source was produced by an in-flight load (replay policy input).
    pub load_producer: bool,
    /// Completes at dispatch and retires from the ROB (move elimination).
    pub retire_at_rename: bool,

    /// Predicted direction attached by Fetch from the FTQ stream.
    pub predicted_taken: Option<bool>,

    /// Rename shadow state.
    pub rename_data: RenameData,

    /// Opaque trace-source cursor used to replay on flush.
    pub rewind_index: u64,

    /// ROB marked this instruction as the oldest un-completed one; its
    /// completion must wake the retire event.
    pub marked_oldest: bool,
}

impl Inst {
    /// Creates an instruction in FETCHED state. Ids are assigned by the
    /// trace source; decode fields by the decoder facade.
    pub fn new(mnemonic: impl Into<String>, class: InstClass) -> Self {
        Self {
            unique_id: 0,
            program_id: 0,
            uop_id: 0,
            pc: 0,
            target_vaddr: 0,
            target_paddr: 0,
            mnemonic: mnemonic.into(),
            opcode: 0,
            class,
            srcs: Vec::new(),
            dests: Vec::new(),
            imm: None,
            vector_config: VectorConfig::default(),
            status: InstStatus::Fetched,
            is_taken: false,
            is_cof: false,
            is_move: false,
            is_last_in_fetch_block: false,
            is_speculative: false,
            is_flushed: false,
            is_last_uop: true,
            load_producer: false,
            retire_at_rename: false,
            predicted_taken: None,
            rename_data: RenameData::default(),
            rewind_index: 0,
            marked_oldest: false,
        }
    }

    /// Wraps an instruction in a shared handle.
    pub fn into_ptr(self) -> InstPtr {
        Rc::new(RefCell::new(self))
    }

    /// Current lifecycle status.
    #[inline]
    pub fn status(&self) -> InstStatus {
        self.status
    }

    /// Advances the status. Monotonic along the success path.
    pub fn set_status(&mut self, status: InstStatus) {
        debug_assert!(
            status >= self.status,
            "status went backwards on uid {}: {} -> {}",
            self.unique_id,
            self.status,
            status
        );
        self.status = status;
    }

    /// True for loads and stores.
    #[inline]
    pub fn is_load_store(&self) -> bool {
        matches!(self.class, InstClass::Load | InstClass::Store)
    }

    /// True for stores.
    #[inline]
    pub fn is_store(&self) -> bool {
        self.class == InstClass::Store
    }

    /// True for loads.
    #[inline]
    pub fn is_load(&self) -> bool {
        self.class == InstClass::Load
    }

    /// True for branches.
    #[inline]
    pub fn is_branch(&self) -> bool {
        self.class == InstClass::Branch
    }

    /// True for a taken branch (trace ground truth).
    #[inline]
    pub fn is_taken_branch(&self) -> bool {
        self.is_branch() && self.is_taken
    }

    /// Execution unit this instruction routes to.
    pub fn target_unit(&self) -> TargetUnit {
        if self.retire_at_rename {
            return TargetUnit::Rob;
        }
        match self.class {
            InstClass::Load | InstClass::Store => TargetUnit::Lsu,
            InstClass::Branch => TargetUnit::Br,
            InstClass::Fpu => TargetUnit::Fpu,
            InstClass::System | InstClass::Vset => TargetUnit::Rob,
            InstClass::Alu | InstClass::Vector(_) => TargetUnit::Alu,
        }
    }

    /// Bitmask of renamed source physical registers on one file.
    pub fn src_reg_mask(&self, rf: RegFile) -> RegisterBitMask {
        let mut mask = RegisterBitMask::default();
        for src in self.rename_data.sources(rf) {
            mask.set(src.phys);
        }
        mask
    }

    /// Bitmask of renamed destination physical registers on one file.
    pub fn dest_reg_mask(&self, rf: RegFile) -> RegisterBitMask {
        let mut mask = RegisterBitMask::default();
        for dest in self.rename_data.dests(rf) {
            mask.set(dest.phys);
        }
        mask
    }

    /// Bitmask for the store-data register on one file.
    pub fn data_reg_mask(&self, rf: RegFile) -> RegisterBitMask {
        let mut mask = RegisterBitMask::default();
        if let Some(data) = self.rename_data.data_reg() {
            if data.op_info.reg_file == rf && !data.is_x0 {
                mask.set(data.phys);
            }
        }
        mask
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uid:{} pid:{} uop:{} '{}' pc:{:#x} {}",
            self.unique_id, self.program_id, self.uop_id, self.mnemonic, self.pc, self.status
        )
    }
}

/// Formats an instruction handle for debug dumps.
pub fn fmt_inst(inst: &InstPtr) -> String {
    inst.borrow().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_monotonic() {
        let mut inst = Inst::new("add", InstClass::Alu);
        inst.set_status(InstStatus::Decoded);
        inst.set_status(InstStatus::Renamed);
        inst.set_status(InstStatus::Completed);
        assert_eq!(inst.status(), InstStatus::Completed);
    }

    #[test]
    #[should_panic(expected = "status went backwards")]
    #[cfg(debug_assertions)]
    fn test_status_regress_asserts() {
        let mut inst = Inst::new("add", InstClass::Alu);
        inst.set_status(InstStatus::Completed);
        inst.set_status(InstStatus::Renamed);
    }

    #[test]
    fn test_target_unit_routing() {
        assert_eq!(Inst::new("lw", InstClass::Load).target_unit(), TargetUnit::Lsu);
        assert_eq!(Inst::new("sd", InstClass::Store).target_unit(), TargetUnit::Lsu);
        assert_eq!(Inst::new("beq", InstClass::Branch).target_unit(), TargetUnit::Br);
        assert_eq!(Inst::new("fence", InstClass::System).target_unit(), TargetUnit::Rob);
        let mut mv = Inst::new("mv", InstClass::Alu);
        mv.retire_at_rename = true;
        assert_eq!(mv.target_unit(), TargetUnit::Rob);
    }

    #[test]
    fn test_vlmax() {
        let cfg = VectorConfig {
            vl: 64,
            sew: 8,
            lmul: 4,
            vta: false,
            vma: false,
        };
        assert_eq!(cfg.vlmax(), 64);
    }

    #[test]
    fn test_reg_masks() {
        let mut inst = Inst::new("add", InstClass::Alu);
        let op = OpInfo {
            reg_file: RegFile::Integer,
            field_id: OperandField::Rs1,
            field_value: 5,
            is_x0: false,
        };
        inst.rename_data.add_source(RenamedReg {
            phys: 40,
            op_info: op,
            prev_dest: None,
        });
        let mask = inst.src_reg_mask(RegFile::Integer);
        assert!(mask.contains(40));
        assert!(inst.src_reg_mask(RegFile::Float).is_empty());
    }
}
