//! Trace sources.
//!
//! A trace source produces decoded instructions in program order and can
//! rewind to a previously-produced instruction when the machine flushes.
//! The JSON flavor is implemented here; binary STF-style traces remain an
//! external concern behind the same trait.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::common::error::SimError;
use crate::core::decoder::{InstFactory, OperandElement, OperandType};
use crate::core::inst::{InstPtr, OperandField};

/// A source of decoded instructions.
pub trait InstGenerator {
    /// Produces the next instruction, or `None` when the trace is done.
    fn next_inst(&mut self) -> Result<Option<InstPtr>, SimError>;

    /// True once the trace is exhausted.
    fn is_done(&self) -> bool;

    /// Rewinds to the given instruction's position. With `skip` the
    /// replay starts at the *following* instruction (exclusive flush).
    fn reset(&mut self, inst: &InstPtr, skip: bool);
}

/// JSON-array trace reader.
///
/// Records carry keys among `opcode`, `mnemonic`, `rs1`/`rs2`/`fs1`/`fs2`/
/// `vs1`/`vs2`/`rd`/`fd`/`vd`, `imm`, `vaddr`, `vtype`, `vl`, `vta` and
/// `taken`. A record with neither `opcode` nor `mnemonic` is a trace error.
pub struct JsonInstGenerator {
    records: Vec<Value>,
    factory: InstFactory,
    index: usize,
    unique_id: u64,
    program_id: u64,
    /// Synthetic PC assigned per record (4 bytes per instruction).
    base_pc: u64,
}

impl JsonInstGenerator {
    /// Parses a trace from a JSON string.
    pub fn from_str(json: &str) -> Result<Self, SimError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| SimError::trace(e.to_string()))?;
        let records = match value {
            Value::Array(records) => records,
            _ => return Err(SimError::trace("JSON trace must be an array of records")),
        };
        Ok(Self {
            records,
            factory: InstFactory::new(),
            index: 0,
            unique_id: 0,
            program_id: 1,
            base_pc: 0x1000,
        })
    }

    /// Loads a trace file.
    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let text = fs::read_to_string(path)
            .map_err(|e| SimError::trace(format!("cannot open {}: {e}", path.display())))?;
        Self::from_str(&text)
    }

    /// Number of records in the trace.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True for an empty trace.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn parse_u64(value: &Value) -> Result<u64, SimError> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| SimError::trace(format!("bad number {n}"))),
            Value::String(s) => {
                let t = s.trim();
                if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                    u64::from_str_radix(hex, 16)
                        .map_err(|e| SimError::trace(format!("bad hex '{s}': {e}")))
                } else {
                    t.parse::<u64>()
                        .map_err(|e| SimError::trace(format!("bad number '{s}': {e}")))
                }
            }
            Value::Bool(b) => Ok(u64::from(*b)),
            _ => Err(SimError::trace(format!("expected number, got {value}"))),
        }
    }

    fn operand(
        record: &serde_json::Map<String, Value>,
        key: &str,
        field_id: OperandField,
        operand_type: OperandType,
    ) -> Result<Option<OperandElement>, SimError> {
        match record.get(key) {
            Some(v) => Ok(Some(OperandElement {
                field_id,
                operand_type,
                field_value: Self::parse_u64(v)?,
            })),
            None => Ok(None),
        }
    }

    fn build_inst(&self, index: usize) -> Result<InstPtr, SimError> {
        let record = self.records[index]
            .as_object()
            .ok_or_else(|| SimError::trace(format!("record {index} is not an object")))?;

        let mut inst = if let Some(op) = record.get("opcode") {
            let opcode = Self::parse_u64(op)? as u32;
            self.factory.make_inst(opcode)?
        } else {
            let mnemonic = record
                .get("mnemonic")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SimError::trace(format!("record {index} has neither opcode nor mnemonic"))
                })?;

            let mut srcs = Vec::new();
            let mut dests = Vec::new();
            for (key, field, ty) in [
                ("rs1", OperandField::Rs1, OperandType::Long),
                ("fs1", OperandField::Rs1, OperandType::Double),
                ("vs1", OperandField::Rs1, OperandType::Vector),
                ("rs2", OperandField::Rs2, OperandType::Long),
                ("fs2", OperandField::Rs2, OperandType::Double),
                ("vs2", OperandField::Rs2, OperandType::Vector),
            ] {
                if let Some(op) = Self::operand(record, key, field, ty)? {
                    srcs.push(op);
                }
            }
            for (key, ty) in [
                ("rd", OperandType::Long),
                ("fd", OperandType::Double),
                ("vd", OperandType::Vector),
            ] {
                if let Some(op) = Self::operand(record, key, OperandField::Rd, ty)? {
                    dests.push(op);
                }
            }

            let imm = match record.get("imm") {
                Some(v) => Some(Self::parse_u64(v)?),
                None => None,
            };
            self.factory.make_inst_direct(mnemonic, &srcs, &dests, imm)
        };

        if let Some(vaddr) = record.get("vaddr") {
            inst.target_vaddr = Self::parse_u64(vaddr)?;
        }

        // vtype hex: bits [5:3] hold log2(sew/8), bits [2:0] hold log2(lmul).
        if let Some(vtype) = record.get("vtype") {
            let vtype = Self::parse_u64(vtype)?;
            inst.vector_config.sew = 8 << ((vtype >> 3) & 0x7);
            inst.vector_config.lmul = 1 << (vtype & 0x7);
        }
        if let Some(vta) = record.get("vta") {
            inst.vector_config.vta = Self::parse_u64(vta)? > 0;
        }
        if let Some(vl) = record.get("vl") {
            inst.vector_config.vl = Self::parse_u64(vl)? as u32;
        }
        if let Some(taken) = record.get("taken") {
            inst.is_taken = Self::parse_u64(taken)? > 0;
            if inst.is_taken {
                inst.is_cof = true;
            }
        }

        inst.pc = self.base_pc + 4 * index as u64;
        Ok(inst.into_ptr())
    }
}

impl InstGenerator for JsonInstGenerator {
    fn next_inst(&mut self) -> Result<Option<InstPtr>, SimError> {
        if self.is_done() {
            return Ok(None);
        }
        let inst = self.build_inst(self.index)?;
        {
            let mut i = inst.borrow_mut();
            i.rewind_index = self.index as u64;
            self.unique_id += 1;
            i.unique_id = self.unique_id;
            i.program_id = self.program_id;
        }
        self.program_id += 1;
        self.index += 1;
        Ok(Some(inst))
    }

    fn is_done(&self) -> bool {
        self.index >= self.records.len()
    }

    fn reset(&mut self, inst: &InstPtr, skip: bool) {
        let saved = inst.borrow().rewind_index as usize;
        assert!(
            saved < self.records.len(),
            "rewind index {} out of bounds for a {}-record trace",
            saved,
            self.records.len()
        );
        self.index = saved;
        self.program_id = inst.borrow().program_id;
        if skip {
            self.index += 1;
            self.program_id += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonic_records() {
        let json = r#"[
            {"mnemonic": "add", "rs1": 1, "rs2": 2, "rd": 3},
            {"mnemonic": "lw", "rs1": 3, "rd": 4, "vaddr": "0xdeadbeef"}
        ]"#;
        let mut generator = JsonInstGenerator::from_str(json).unwrap();
        let a = generator.next_inst().unwrap().unwrap();
        assert_eq!(a.borrow().mnemonic, "add");
        assert_eq!(a.borrow().unique_id, 1);
        let b = generator.next_inst().unwrap().unwrap();
        assert_eq!(b.borrow().target_vaddr, 0xdead_beef);
        assert_eq!(b.borrow().program_id, 2);
        assert!(generator.next_inst().unwrap().is_none());
        assert!(generator.is_done());
    }

    #[test]
    fn test_vtype_decode() {
        // sew=8 (bits 5:3 = 0), lmul=4 (bits 2:0 = 2) -> vtype 0x2.
        let json = r#"[
            {"mnemonic": "vsetivli", "rd": 1, "vtype": "0x2", "vl": 64, "vta": 1}
        ]"#;
        let mut generator = JsonInstGenerator::from_str(json).unwrap();
        let inst = generator.next_inst().unwrap().unwrap();
        let cfg = inst.borrow().vector_config;
        assert_eq!(cfg.sew, 8);
        assert_eq!(cfg.lmul, 4);
        assert_eq!(cfg.vl, 64);
        assert!(cfg.vta);
        assert_eq!(cfg.vlmax(), 64);
    }

    #[test]
    fn test_missing_opcode_and_mnemonic_is_error() {
        let mut generator = JsonInstGenerator::from_str(r#"[{"rd": 1}]"#).unwrap();
        assert!(generator.next_inst().is_err());
    }

    #[test]
    fn test_rewind_inclusive_and_skip() {
        let json = r#"[
            {"mnemonic": "add", "rd": 1},
            {"mnemonic": "add", "rd": 2},
            {"mnemonic": "add", "rd": 3}
        ]"#;
        let mut generator = JsonInstGenerator::from_str(json).unwrap();
        let _a = generator.next_inst().unwrap().unwrap();
        let b = generator.next_inst().unwrap().unwrap();
        let _c = generator.next_inst().unwrap().unwrap();

        generator.reset(&b, false);
        let b2 = generator.next_inst().unwrap().unwrap();
        assert_eq!(b2.borrow().program_id, b.borrow().program_id);
        // New fetch gets a fresh unique id.
        assert!(b2.borrow().unique_id > b.borrow().unique_id);

        generator.reset(&b, true);
        let c2 = generator.next_inst().unwrap().unwrap();
        assert_eq!(c2.borrow().program_id, b.borrow().program_id + 1);
    }

    #[test]
    fn test_taken_branch_is_cof() {
        let json = r#"[{"mnemonic": "beq", "rs1": 1, "rs2": 2, "taken": 1}]"#;
        let mut generator = JsonInstGenerator::from_str(json).unwrap();
        let inst = generator.next_inst().unwrap().unwrap();
        assert!(inst.borrow().is_taken_branch());
        assert!(inst.borrow().is_cof);
    }
}
