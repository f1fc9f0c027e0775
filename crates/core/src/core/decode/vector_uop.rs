//! Vector uop generation.
//!
//! Vector instructions whose semantics span multiple physical register
//! group members expand into one uop per member, driven by the live vector
//! configuration. The uops replace the original instruction; they share
//! its unique id and program id and are distinguished by `uop_id`
//! (1-based), with `is_last_uop` set on the final one. Patterns the
//! generator does not support fail loudly.

use crate::common::error::SimError;
use crate::common::types::RegFile;
use crate::core::inst::{Inst, InstClass, InstPtr, UopGen, VectorConfig};

/// Vector uop generator statistics.
#[derive(Debug, Default)]
pub struct VectorUopStats {
    /// Uops emitted.
    pub uops_generated: u64,
    /// Instructions expanded.
    pub insts_expanded: u64,
}

/// The vector uop generator.
#[derive(Default)]
pub struct VectorUopGenerator {
    /// Counters.
    pub stats: VectorUopStats,
}

impl VectorUopGenerator {
    /// Creates a generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of uops an expansion produces for the given kind and config.
    fn num_uops(gen: UopGen, config: &VectorConfig) -> u32 {
        match gen {
            UopGen::Elementwise | UopGen::Slide | UopGen::Permute | UopGen::Narrowing => {
                config.lmul
            }
            // The destination group is twice as wide as the sources.
            UopGen::Widening => config.lmul * 2,
        }
    }

    /// Expands a vector instruction under the live configuration.
    ///
    /// Returns the uop sequence replacing the instruction; a vector
    /// instruction needing no expansion comes back as a single-element
    /// sequence holding the original.
    pub fn expand(
        &mut self,
        inst: &InstPtr,
        config: &VectorConfig,
    ) -> Result<Vec<InstPtr>, SimError> {
        let gen = match inst.borrow().class {
            InstClass::Vector(gen) => gen,
            _ => return Ok(vec![inst.clone()]),
        };

        if config.vl > config.vlmax() {
            return Err(SimError::trace(format!(
                "vector config vl={} exceeds vlmax={} for '{}'",
                config.vl,
                config.vlmax(),
                inst.borrow().mnemonic
            )));
        }
        if config.lmul > 8 {
            return Err(SimError::trace(format!(
                "unsupported lmul={} for '{}'",
                config.lmul,
                inst.borrow().mnemonic
            )));
        }

        let num_uops = Self::num_uops(gen, config);
        if num_uops <= 1 {
            let mut i = inst.borrow_mut();
            i.vector_config = *config;
            i.uop_id = 0;
            i.is_last_uop = true;
            drop(i);
            return Ok(vec![inst.clone()]);
        }

        let mut uops = Vec::with_capacity(num_uops as usize);
        let src = inst.borrow();
        for k in 0..num_uops {
            let mut uop = Inst::new(src.mnemonic.clone(), src.class);
            uop.unique_id = src.unique_id;
            uop.program_id = src.program_id;
            uop.uop_id = k + 1;
            uop.pc = src.pc;
            uop.target_vaddr = src.target_vaddr;
            uop.opcode = src.opcode;
            uop.imm = src.imm;
            uop.vector_config = *config;
            uop.rewind_index = src.rewind_index;
            uop.is_speculative = src.is_speculative;
            uop.is_last_uop = k + 1 == num_uops;

            // Register group members: vector operand numbers advance per
            // uop; widening destinations advance twice as fast as sources.
            let (src_step, dest_step) = match gen {
                UopGen::Widening => (k / 2, k),
                UopGen::Narrowing => (k, k / 2),
                _ => (k, k),
            };
            for op in &src.srcs {
                let mut op = *op;
                if op.reg_file == RegFile::Vector {
                    op.field_value += src_step;
                }
                uop.srcs.push(op);
            }
            // Slides read the neighbouring group member as well.
            if gen == UopGen::Slide && k > 0 {
                for op in &src.srcs {
                    if op.reg_file == RegFile::Vector {
                        let mut op = *op;
                        op.field_value += src_step - 1;
                        uop.srcs.push(op);
                    }
                }
            }
            for op in &src.dests {
                let mut op = *op;
                if op.reg_file == RegFile::Vector {
                    op.field_value += dest_step;
                }
                uop.dests.push(op);
            }

            self.stats.uops_generated += 1;
            uops.push(uop.into_ptr());
        }
        self.stats.insts_expanded += 1;
        Ok(uops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decoder::{InstFactory, OperandElement, OperandType};
    use crate::core::inst::OperandField;

    fn vadd() -> InstPtr {
        let factory = InstFactory::new();
        let srcs = [
            OperandElement {
                field_id: OperandField::Rs1,
                operand_type: OperandType::Vector,
                field_value: 8,
            },
            OperandElement {
                field_id: OperandField::Rs2,
                operand_type: OperandType::Vector,
                field_value: 16,
            },
        ];
        let dests = [OperandElement {
            field_id: OperandField::Rd,
            operand_type: OperandType::Vector,
            field_value: 24,
        }];
        let mut inst = factory.make_inst_direct("vadd.vv", &srcs, &dests, None);
        inst.unique_id = 7;
        inst.program_id = 2;
        inst.into_ptr()
    }

    fn config(vl: u32, sew: u32, lmul: u32) -> VectorConfig {
        VectorConfig {
            vl,
            sew,
            lmul,
            vta: false,
            vma: false,
        }
    }

    #[test]
    fn test_lmul4_expands_to_four_uops() {
        let mut generator = VectorUopGenerator::new();
        let uops = generator.expand(&vadd(), &config(64, 8, 4)).unwrap();
        assert_eq!(uops.len(), 4);
        for (k, uop) in uops.iter().enumerate() {
            let uop = uop.borrow();
            assert_eq!(uop.unique_id, 7);
            assert_eq!(uop.uop_id, k as u32 + 1);
            assert_eq!(uop.dests[0].field_value, 24 + k as u32);
            assert_eq!(uop.srcs[0].field_value, 8 + k as u32);
        }
        assert!(uops.last().unwrap().borrow().is_last_uop);
        assert!(!uops[0].borrow().is_last_uop);
        assert_eq!(generator.stats.uops_generated, 4);
    }

    #[test]
    fn test_lmul1_passes_through() {
        let mut generator = VectorUopGenerator::new();
        let inst = vadd();
        let uops = generator.expand(&inst, &config(16, 8, 1)).unwrap();
        assert_eq!(uops.len(), 1);
        assert!(std::rc::Rc::ptr_eq(&uops[0], &inst));
    }

    #[test]
    fn test_vl_over_vlmax_rejected() {
        let mut generator = VectorUopGenerator::new();
        // vlmax = 128/8*1 = 16, vl = 64 is illegal.
        assert!(generator.expand(&vadd(), &config(64, 8, 1)).is_err());
    }

    #[test]
    fn test_scalar_passes_through() {
        let mut generator = VectorUopGenerator::new();
        let inst = Inst::new("add", InstClass::Alu).into_ptr();
        let uops = generator.expand(&inst, &config(0, 64, 1)).unwrap();
        assert_eq!(uops.len(), 1);
    }
}
