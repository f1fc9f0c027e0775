//! Decoder facade.
//!
//! The real decode tables live outside the core; this facade provides the
//! two entry points the trace sources need: `make_inst` for raw opcodes
//! (a compact RV64 subset) and `make_inst_direct` for mnemonic-plus-operand
//! records. Both classify the instruction (routing class, move flag,
//! change-of-flow flag, vector uop-generation kind).

use crate::common::error::SimError;
use crate::common::types::RegFile;
use crate::core::inst::{Inst, InstClass, OpInfo, OperandField, UopGen};

/// Operand kind in a trace operand record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandType {
    /// Integer register.
    Long,
    /// Floating-point register.
    Double,
    /// Vector register.
    Vector,
}

impl OperandType {
    fn reg_file(self) -> RegFile {
        match self {
            OperandType::Long => RegFile::Integer,
            OperandType::Double => RegFile::Float,
            OperandType::Vector => RegFile::Vector,
        }
    }
}

/// One operand element handed in by a trace record.
#[derive(Clone, Copy, Debug)]
pub struct OperandElement {
    /// Encoding field.
    pub field_id: OperandField,
    /// Register file kind.
    pub operand_type: OperandType,
    /// Architectural register number.
    pub field_value: u64,
}

impl OperandElement {
    fn op_info(&self) -> OpInfo {
        let reg_file = self.operand_type.reg_file();
        OpInfo {
            reg_file,
            field_id: self.field_id,
            field_value: self.field_value as u32,
            is_x0: reg_file == RegFile::Integer && self.field_value == 0,
        }
    }
}

/// The decoder facade. Stateless; one per trace source.
#[derive(Default)]
pub struct InstFactory;

impl InstFactory {
    /// Creates the facade.
    pub fn new() -> Self {
        Self
    }

    /// Classifies a mnemonic into a routing class.
    fn classify(mnemonic: &str) -> InstClass {
        match mnemonic {
            "lb" | "lh" | "lw" | "ld" | "lbu" | "lhu" | "lwu" | "flw" | "fld" => InstClass::Load,
            "sb" | "sh" | "sw" | "sd" | "fsw" | "fsd" => InstClass::Store,
            "beq" | "bne" | "blt" | "bge" | "bltu" | "bgeu" | "jal" | "jalr" => InstClass::Branch,
            "fence" | "fence.i" | "ecall" | "ebreak" | "wfi" | "mret" | "sret" | "csrrw"
            | "csrrs" | "csrrc" | "csrrwi" | "csrrsi" | "csrrci" => InstClass::System,
            "vsetvli" | "vsetivli" | "vsetvl" => InstClass::Vset,
            m if m.starts_with("vw") => InstClass::Vector(UopGen::Widening),
            m if m.starts_with("vn") => InstClass::Vector(UopGen::Narrowing),
            m if m.starts_with("vslide") => InstClass::Vector(UopGen::Slide),
            m if m.starts_with("vrgather") || m.starts_with("vcompress") => {
                InstClass::Vector(UopGen::Permute)
            }
            m if m.starts_with('v') && m.contains('.') => InstClass::Vector(UopGen::Elementwise),
            m if m.starts_with('f') => InstClass::Fpu,
            _ => InstClass::Alu,
        }
    }

    fn is_move(mnemonic: &str) -> bool {
        matches!(
            mnemonic,
            "mv" | "fmv.s" | "fmv.d" | "fmv.x.w" | "fsgnj.s" | "fsgnj.d"
        )
    }

    fn is_change_of_flow(mnemonic: &str) -> bool {
        matches!(mnemonic, "jal" | "jalr")
    }

    /// Builds an instruction from a mnemonic and operand records.
    pub fn make_inst_direct(
        &self,
        mnemonic: &str,
        srcs: &[OperandElement],
        dests: &[OperandElement],
        imm: Option<u64>,
    ) -> Inst {
        let class = Self::classify(mnemonic);
        let mut inst = Inst::new(mnemonic, class);
        inst.srcs = srcs.iter().map(OperandElement::op_info).collect();
        inst.dests = dests.iter().map(OperandElement::op_info).collect();
        inst.imm = imm;
        inst.is_move = Self::is_move(mnemonic);
        inst.is_cof = Self::is_change_of_flow(mnemonic);
        inst
    }

    /// Decodes a raw RV64 opcode (compact subset). Anything the facade
    /// does not recognise is a trace error.
    pub fn make_inst(&self, opcode: u32) -> Result<Inst, SimError> {
        let op = opcode & 0x7f;
        let funct3 = (opcode >> 12) & 0x7;
        let funct7 = (opcode >> 25) & 0x7f;
        let rd = (opcode >> 7) & 0x1f;
        let rs1 = (opcode >> 15) & 0x1f;
        let rs2 = (opcode >> 20) & 0x1f;

        let int_op = |field_id, value: u32| OperandElement {
            field_id,
            operand_type: OperandType::Long,
            field_value: u64::from(value),
        };

        let (mnemonic, srcs, dests): (&str, Vec<OperandElement>, Vec<OperandElement>) = match op {
            0x03 => {
                let mnemonic = match funct3 {
                    0 => "lb",
                    1 => "lh",
                    2 => "lw",
                    3 => "ld",
                    4 => "lbu",
                    5 => "lhu",
                    6 => "lwu",
                    _ => return Err(SimError::trace(format!("bad load funct3 in {opcode:#x}"))),
                };
                (
                    mnemonic,
                    vec![int_op(OperandField::Rs1, rs1)],
                    vec![int_op(OperandField::Rd, rd)],
                )
            }
            0x23 => {
                let mnemonic = match funct3 {
                    0 => "sb",
                    1 => "sh",
                    2 => "sw",
                    3 => "sd",
                    _ => return Err(SimError::trace(format!("bad store funct3 in {opcode:#x}"))),
                };
                (
                    mnemonic,
                    vec![int_op(OperandField::Rs1, rs1), int_op(OperandField::Rs2, rs2)],
                    vec![],
                )
            }
            0x63 => {
                let mnemonic = match funct3 {
                    0 => "beq",
                    1 => "bne",
                    4 => "blt",
                    5 => "bge",
                    6 => "bltu",
                    7 => "bgeu",
                    _ => return Err(SimError::trace(format!("bad branch funct3 in {opcode:#x}"))),
                };
                (
                    mnemonic,
                    vec![int_op(OperandField::Rs1, rs1), int_op(OperandField::Rs2, rs2)],
                    vec![],
                )
            }
            0x6f => ("jal", vec![], vec![int_op(OperandField::Rd, rd)]),
            0x67 => (
                "jalr",
                vec![int_op(OperandField::Rs1, rs1)],
                vec![int_op(OperandField::Rd, rd)],
            ),
            0x37 => ("lui", vec![], vec![int_op(OperandField::Rd, rd)]),
            0x17 => ("auipc", vec![], vec![int_op(OperandField::Rd, rd)]),
            0x13 => {
                let mnemonic = match funct3 {
                    0 => "addi",
                    1 => "slli",
                    2 => "slti",
                    3 => "sltiu",
                    4 => "xori",
                    5 => {
                        if funct7 & 0x20 != 0 {
                            "srai"
                        } else {
                            "srli"
                        }
                    }
                    6 => "ori",
                    7 => "andi",
                    _ => unreachable!(),
                };
                (
                    mnemonic,
                    vec![int_op(OperandField::Rs1, rs1)],
                    vec![int_op(OperandField::Rd, rd)],
                )
            }
            0x33 => {
                let mnemonic = match (funct3, funct7) {
                    (0, 0x00) => "add",
                    (0, 0x20) => "sub",
                    (0, 0x01) => "mul",
                    (1, 0x00) => "sll",
                    (2, 0x00) => "slt",
                    (3, 0x00) => "sltu",
                    (4, 0x00) => "xor",
                    (4, 0x01) => "div",
                    (5, 0x00) => "srl",
                    (5, 0x20) => "sra",
                    (6, 0x00) => "or",
                    (6, 0x01) => "rem",
                    (7, 0x00) => "and",
                    _ => {
                        return Err(SimError::trace(format!(
                            "unknown R-type encoding {opcode:#x}"
                        )))
                    }
                };
                (
                    mnemonic,
                    vec![int_op(OperandField::Rs1, rs1), int_op(OperandField::Rs2, rs2)],
                    vec![int_op(OperandField::Rd, rd)],
                )
            }
            0x0f => ("fence", vec![], vec![]),
            0x73 => ("ecall", vec![], vec![]),
            _ => {
                return Err(SimError::trace(format!(
                    "decoder cannot decode opcode {opcode:#x}"
                )))
            }
        };

        let mut inst = self.make_inst_direct(mnemonic, &srcs, &dests, None);
        inst.opcode = opcode;
        Ok(inst)
    }
}
