//! Instruction decode: 32-bit RV64IMAF encodings, the RV64C compressed subset, and the chip's
//! packed/mask extension in the custom-0 opcode space.

use crate::csr::CsrSpecifier;
use crate::hart::Specifier;
use log::trace;
use thiserror::Error;

/// Data structure that can hold any supported instruction in its decoded form.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    OpImm {
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i64,
    },
    OpShiftImm {
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount_u6: u32,
    },
    /// 32-bit (`*W`) register-immediate operations.
    OpImm32 {
        op: RegImm32Op,
        dest: Specifier,
        src: Specifier,
        immediate: i64,
    },
    Auipc {
        dest: Specifier,
        immediate: i64,
    },
    Lui {
        dest: Specifier,
        immediate: i64,
    },
    Amo {
        op: AmoOp,
        width: AmoWidth,
        aq: bool,
        rl: bool,
        src: Specifier,
        addr: Specifier,
        dest: Specifier,
    },
    Op {
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    /// 32-bit (`*W`) register-register operations.
    Op32 {
        op: RegReg32Op,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Jal {
        dest: Specifier,
        offset: i64,
    },
    Jalr {
        dest: Specifier,
        base: Specifier,
        offset: i64,
    },
    Branch {
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i64,
    },
    Load {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i64,
    },
    Store {
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i64,
    },
    /// Scalar FP load (`flw`); writes lane 0 of the destination vector register.
    LoadFp {
        dest: u8,
        base: Specifier,
        offset: i64,
    },
    /// Scalar FP store (`fsw`); stores lane 0 of the source vector register.
    StoreFp {
        src: u8,
        base: Specifier,
        offset: i64,
    },
    /// Two-operand single-precision FP computation.
    OpFp {
        op: FpOp,
        dest: u8,
        src1: u8,
        src2: u8,
        rm: u8,
    },
    /// Fused multiply-add family.
    FpFma {
        op: FpFmaOp,
        dest: u8,
        src1: u8,
        src2: u8,
        src3: u8,
        rm: u8,
    },
    /// Full-width vector load: `VLENB` bytes into an `f` register, masked by `m0`.
    VLoad {
        dest: u8,
        base: Specifier,
        offset: i64,
    },
    /// Full-width vector store: `VLENB` bytes from an `f` register, masked by `m0`.
    VStore {
        src: u8,
        base: Specifier,
        offset: i64,
    },
    /// Lane-wise packed-f32 computation on the vector registers, masked by `m0`.
    OpPacked {
        op: PackedOp,
        dest: u8,
        src1: u8,
        src2: u8,
    },
    /// Splats an `x` register's low 32 bits across the f32 lanes of an `f` register.
    VBroadcast {
        dest: u8,
        src: Specifier,
    },
    /// Mask-register transfers and queries.
    OpMask {
        op: MaskOp,
        dest: Specifier,
        mask: u8,
        src: Specifier,
    },
    Fence {
        predecessor: FenceOrderCombination,
        successor: FenceOrderCombination,
    },
    Ecall,
    Ebreak,
    Sret,
    Mret,
    Wfi,
    SfenceVma {
        vaddr: Specifier,
        asid: Specifier,
    },
    Csr {
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    },
    Csri {
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u64,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp {
    Slli,
    Srli,
    Srai,
    Slliw,
    Srliw,
    Sraiw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImm32Op {
    Addiw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoOp {
    Lr,
    Sc,
    Swap,
    Add,
    Xor,
    And,
    Or,
    Min,
    Max,
    Minu,
    Maxu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoWidth {
    W,
    D,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
    Add,
    Slt,
    Sltu,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sub,
    Sra,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegReg32Op {
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
    Mulw,
    Divw,
    Divuw,
    Remw,
    Remuw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition {
    Beq,
    Bne,
    Blt,
    Bltu,
    Bge,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadWidth {
    Lb,
    Lh,
    Lw,
    Ld,
    Lbu,
    Lhu,
    Lwu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreWidth {
    Sb,
    Sh,
    Sw,
    Sd,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpOp {
    Add,
    Sub,
    Mul,
    Div,
    Sqrt,
    SgnJ,
    SgnJn,
    SgnJx,
    Min,
    Max,
    CvtWS,
    CvtWuS,
    CvtLS,
    CvtLuS,
    CvtSW,
    CvtSWu,
    CvtSL,
    CvtSLu,
    MvXW,
    MvWX,
    Eq,
    Lt,
    Le,
    Class,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpFmaOp {
    Madd,
    Msub,
    Nmsub,
    Nmadd,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PackedOp {
    Add,
    Mul,
    /// `dest = src1 * src2 + dest`, lane-wise fused.
    Fmadd,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MaskOp {
    /// Move the low `MLEN` bits of an `x` register to a mask register.
    MovXM,
    /// Move a mask register, zero-extended, to an `x` register.
    MovMX,
    /// Population count of a mask register, to an `x` register.
    Popc,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FenceOrderCombination {
    pub device_input: bool,
    pub device_output: bool,
    pub memory_reads: bool,
    pub memory_writes: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrOp {
    /// Atomic Read/Write CSR.
    ReadWrite,
    /// Atomic Read and Set Bits in CSR.
    ReadSet,
    /// Atomic Read and Clear Bits in CSR.
    ReadClear,
}

impl Instruction {
    /// Decodes a full-size (32-bit) instruction word.
    pub fn decode(raw: u32) -> Result<Self, DecodeError> {
        trace!("Decoding instruction {raw:#010x}");
        match opcode(raw).ok_or(DecodeError::UnsupportedOpcode)? {
            Opcode::OpImm => match i_funct(raw) {
                Some(op) => Ok(Self::OpImm {
                    op,
                    dest: rd(raw),
                    src: rs1(raw),
                    immediate: i_imm(raw),
                }),
                None => match i_shfunct(raw) {
                    Some(op) => Ok(Self::OpShiftImm {
                        op,
                        dest: rd(raw),
                        src: rs1(raw),
                        shift_amount_u6: shamt6(raw),
                    }),
                    None => Err(DecodeError::IllegalInstruction),
                },
            },
            Opcode::OpImm32 => match funct3(raw) {
                0b000 => Ok(Self::OpImm32 {
                    op: RegImm32Op::Addiw,
                    dest: rd(raw),
                    src: rs1(raw),
                    immediate: i_imm(raw),
                }),
                _ => match i_shfunct32(raw) {
                    Some(op) => Ok(Self::OpShiftImm {
                        op,
                        dest: rd(raw),
                        src: rs1(raw),
                        shift_amount_u6: shamt5(raw),
                    }),
                    None => Err(DecodeError::IllegalInstruction),
                },
            },
            Opcode::Auipc => Ok(Self::Auipc {
                dest: rd(raw),
                immediate: u_imm(raw),
            }),
            Opcode::Lui => Ok(Self::Lui {
                dest: rd(raw),
                immediate: u_imm(raw),
            }),
            Opcode::Amo => match amo_op(raw) {
                Some((op, width)) => Ok(Self::Amo {
                    op,
                    width,
                    aq: (raw >> 26) & 1 == 1,
                    rl: (raw >> 25) & 1 == 1,
                    src: rs2(raw),
                    addr: rs1(raw),
                    dest: rd(raw),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Op => match r_funct(raw) {
                Some(op) => Ok(Self::Op {
                    op,
                    dest: rd(raw),
                    src1: rs1(raw),
                    src2: rs2(raw),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Op32 => match r_funct32(raw) {
                Some(op) => Ok(Self::Op32 {
                    op,
                    dest: rd(raw),
                    src1: rs1(raw),
                    src2: rs2(raw),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Jal => Ok(Self::Jal {
                dest: rd(raw),
                offset: j_imm(raw),
            }),
            Opcode::Jalr => Ok(Self::Jalr {
                dest: rd(raw),
                base: rs1(raw),
                offset: i_imm(raw),
            }),
            Opcode::Branch => match b_funct(raw) {
                Some(condition) => Ok(Self::Branch {
                    condition,
                    src1: rs1(raw),
                    src2: rs2(raw),
                    offset: b_imm(raw),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Load => match i_width(raw) {
                Some(width) => Ok(Self::Load {
                    width,
                    dest: rd(raw),
                    base: rs1(raw),
                    offset: i_imm(raw),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Store => match s_width(raw) {
                Some(width) => Ok(Self::Store {
                    width,
                    src: rs2(raw),
                    base: rs1(raw),
                    offset: s_imm(raw),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::LoadFp => match funct3(raw) {
                0b010 => Ok(Self::LoadFp {
                    dest: raw_rd(raw),
                    base: rs1(raw),
                    offset: i_imm(raw),
                }),
                _ => Err(DecodeError::IllegalInstruction),
            },
            Opcode::StoreFp => match funct3(raw) {
                0b010 => Ok(Self::StoreFp {
                    src: raw_rs2(raw),
                    base: rs1(raw),
                    offset: s_imm(raw),
                }),
                _ => Err(DecodeError::IllegalInstruction),
            },
            Opcode::OpFp => fp_op(raw),
            Opcode::Madd | Opcode::Msub | Opcode::Nmsub | Opcode::Nmadd => {
                if (raw >> 25) & 0b11 != 0b00 {
                    // fmt field: only S (single) is supported.
                    return Err(DecodeError::IllegalInstruction);
                }
                let op = match opcode(raw).unwrap() {
                    Opcode::Madd => FpFmaOp::Madd,
                    Opcode::Msub => FpFmaOp::Msub,
                    Opcode::Nmsub => FpFmaOp::Nmsub,
                    Opcode::Nmadd => FpFmaOp::Nmadd,
                    _ => unreachable!(),
                };
                Ok(Self::FpFma {
                    op,
                    dest: raw_rd(raw),
                    src1: raw_rs1(raw),
                    src2: raw_rs2(raw),
                    src3: (raw >> 27) as u8,
                    rm: funct3(raw),
                })
            }
            Opcode::Custom0 => custom0_op(raw),
            Opcode::MiscMem => match funct3(raw) {
                0b000 => {
                    let predecessor = FenceOrderCombination {
                        device_input: (raw >> 27) & 0b1 == 1,
                        device_output: (raw >> 26) & 0b1 == 1,
                        memory_reads: (raw >> 25) & 0b1 == 1,
                        memory_writes: (raw >> 24) & 0b1 == 1,
                    };
                    let successor = FenceOrderCombination {
                        device_input: (raw >> 23) & 0b1 == 1,
                        device_output: (raw >> 22) & 0b1 == 1,
                        memory_reads: (raw >> 21) & 0b1 == 1,
                        memory_writes: (raw >> 20) & 0b1 == 1,
                    };
                    // Reserved fm/rd/rs1 fields are treated as a normal fence for forward
                    // compatibility, as the spec directs.
                    Ok(Self::Fence {
                        predecessor,
                        successor,
                    })
                }
                0b001 => {
                    // FENCE.I: the fetch cache is the only instruction cache modeled, and it is
                    // synchronized through the cache_invalidate CSR; decode as a plain fence.
                    Ok(Self::Fence {
                        predecessor: FenceOrderCombination {
                            device_input: false,
                            device_output: false,
                            memory_reads: true,
                            memory_writes: true,
                        },
                        successor: FenceOrderCombination {
                            device_input: false,
                            device_output: false,
                            memory_reads: true,
                            memory_writes: true,
                        },
                    })
                }
                _ => Err(DecodeError::IllegalInstruction),
            },
            Opcode::System => match i_sys(raw) {
                Some(sys) => match sys {
                    SysFunct::Priv => match sys_priv(raw) {
                        Some(sys_priv) => Ok(match sys_priv {
                            SysPriv::Ecall => Self::Ecall,
                            SysPriv::Ebreak => Self::Ebreak,
                            SysPriv::Sret => Self::Sret,
                            SysPriv::Mret => Self::Mret,
                            SysPriv::Wfi => Self::Wfi,
                            SysPriv::SfenceVma => Self::SfenceVma {
                                vaddr: rs1(raw),
                                asid: rs2(raw),
                            },
                        }),
                        None => Err(DecodeError::IllegalInstruction),
                    },
                    SysFunct::Csrrw | SysFunct::Csrrs | SysFunct::Csrrc => Ok(Instruction::Csr {
                        op: match sys {
                            SysFunct::Csrrw => CsrOp::ReadWrite,
                            SysFunct::Csrrs => CsrOp::ReadSet,
                            SysFunct::Csrrc => CsrOp::ReadClear,
                            _ => unreachable!(), // Already checked in outer match
                        },
                        dest: rd(raw),
                        csr: csr(raw),
                        src: rs1(raw),
                    }),
                    SysFunct::Csrrwi | SysFunct::Csrrsi | SysFunct::Csrrci => {
                        Ok(Instruction::Csri {
                            op: match sys {
                                SysFunct::Csrrwi => CsrOp::ReadWrite,
                                SysFunct::Csrrsi => CsrOp::ReadSet,
                                SysFunct::Csrrci => CsrOp::ReadClear,
                                _ => unreachable!(), // Already checked in outer match
                            },
                            dest: rd(raw),
                            csr: csr(raw),
                            immediate: u8::from(rs1(raw)) as u64,
                        })
                    }
                },
                None => Err(DecodeError::IllegalInstruction),
            },
        }
    }

    /// Decodes a compressed (16-bit) instruction parcel into its full-size equivalent.
    pub fn decode_compressed(raw: u16) -> Result<Self, DecodeError> {
        trace!("Decoding compressed instruction {raw:#06x}");
        let funct3 = raw >> 13;
        match (raw & 0b11, funct3) {
            (0b00, 0b000) => {
                // C.ADDI4SPN
                let imm = c_addi4spn_imm(raw);
                if imm == 0 {
                    return Err(DecodeError::IllegalInstruction);
                }
                Ok(Self::OpImm {
                    op: RegImmOp::Addi,
                    dest: c_rd_prime(raw),
                    src: Specifier::from_u5(2),
                    immediate: imm,
                })
            }
            (0b00, 0b010) => Ok(Self::Load {
                width: LoadWidth::Lw,
                dest: c_rd_prime(raw),
                base: c_rs1_prime(raw),
                offset: c_lw_imm(raw),
            }),
            (0b00, 0b011) => Ok(Self::Load {
                width: LoadWidth::Ld,
                dest: c_rd_prime(raw),
                base: c_rs1_prime(raw),
                offset: c_ld_imm(raw),
            }),
            (0b00, 0b110) => Ok(Self::Store {
                width: StoreWidth::Sw,
                src: c_rd_prime(raw),
                base: c_rs1_prime(raw),
                offset: c_lw_imm(raw),
            }),
            (0b00, 0b111) => Ok(Self::Store {
                width: StoreWidth::Sd,
                src: c_rd_prime(raw),
                base: c_rs1_prime(raw),
                offset: c_ld_imm(raw),
            }),
            (0b01, 0b000) => Ok(Self::OpImm {
                // C.ADDI (C.NOP when rd == x0)
                op: RegImmOp::Addi,
                dest: c_rd(raw),
                src: c_rd(raw),
                immediate: c_imm6(raw),
            }),
            (0b01, 0b001) => {
                // C.ADDIW
                let dest = c_rd(raw);
                if u8::from(dest) == 0 {
                    return Err(DecodeError::IllegalInstruction);
                }
                Ok(Self::OpImm32 {
                    op: RegImm32Op::Addiw,
                    dest,
                    src: dest,
                    immediate: c_imm6(raw),
                })
            }
            (0b01, 0b010) => Ok(Self::OpImm {
                // C.LI
                op: RegImmOp::Addi,
                dest: c_rd(raw),
                src: Specifier::X0,
                immediate: c_imm6(raw),
            }),
            (0b01, 0b011) => {
                let dest = c_rd(raw);
                if u8::from(dest) == 2 {
                    // C.ADDI16SP
                    let imm = c_addi16sp_imm(raw);
                    if imm == 0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Self::OpImm {
                        op: RegImmOp::Addi,
                        dest,
                        src: dest,
                        immediate: imm,
                    })
                } else {
                    // C.LUI
                    let imm = c_imm6(raw) << 12;
                    if imm == 0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Self::Lui {
                        dest,
                        immediate: imm,
                    })
                }
            }
            (0b01, 0b100) => {
                let dest = c_rs1_prime(raw);
                match (raw >> 10) & 0b11 {
                    0b00 => Ok(Self::OpShiftImm {
                        op: RegShiftImmOp::Srli,
                        dest,
                        src: dest,
                        shift_amount_u6: c_shamt(raw),
                    }),
                    0b01 => Ok(Self::OpShiftImm {
                        op: RegShiftImmOp::Srai,
                        dest,
                        src: dest,
                        shift_amount_u6: c_shamt(raw),
                    }),
                    0b10 => Ok(Self::OpImm {
                        op: RegImmOp::Andi,
                        dest,
                        src: dest,
                        immediate: c_imm6(raw),
                    }),
                    _ => {
                        let src2 = c_rs2_prime(raw);
                        let word = raw & (1 << 12) != 0;
                        let op32 = match (word, (raw >> 5) & 0b11) {
                            (false, 0b00) => {
                                return Ok(Self::Op {
                                    op: RegRegOp::Sub,
                                    dest,
                                    src1: dest,
                                    src2,
                                })
                            }
                            (false, 0b01) => {
                                return Ok(Self::Op {
                                    op: RegRegOp::Xor,
                                    dest,
                                    src1: dest,
                                    src2,
                                })
                            }
                            (false, 0b10) => {
                                return Ok(Self::Op {
                                    op: RegRegOp::Or,
                                    dest,
                                    src1: dest,
                                    src2,
                                })
                            }
                            (false, _) => {
                                return Ok(Self::Op {
                                    op: RegRegOp::And,
                                    dest,
                                    src1: dest,
                                    src2,
                                })
                            }
                            (true, 0b00) => RegReg32Op::Subw,
                            (true, 0b01) => RegReg32Op::Addw,
                            (true, _) => return Err(DecodeError::IllegalInstruction),
                        };
                        Ok(Self::Op32 {
                            op: op32,
                            dest,
                            src1: dest,
                            src2,
                        })
                    }
                }
            }
            (0b01, 0b101) => Ok(Self::Jal {
                dest: Specifier::X0,
                offset: c_j_imm(raw),
            }),
            (0b01, 0b110) => Ok(Self::Branch {
                condition: BranchCondition::Beq,
                src1: c_rs1_prime(raw),
                src2: Specifier::X0,
                offset: c_b_imm(raw),
            }),
            (0b01, 0b111) => Ok(Self::Branch {
                condition: BranchCondition::Bne,
                src1: c_rs1_prime(raw),
                src2: Specifier::X0,
                offset: c_b_imm(raw),
            }),
            (0b10, 0b000) => {
                let dest = c_rd(raw);
                Ok(Self::OpShiftImm {
                    op: RegShiftImmOp::Slli,
                    dest,
                    src: dest,
                    shift_amount_u6: c_shamt(raw),
                })
            }
            (0b10, 0b010) => {
                // C.LWSP
                let dest = c_rd(raw);
                if u8::from(dest) == 0 {
                    return Err(DecodeError::IllegalInstruction);
                }
                Ok(Self::Load {
                    width: LoadWidth::Lw,
                    dest,
                    base: Specifier::from_u5(2),
                    offset: c_lwsp_imm(raw),
                })
            }
            (0b10, 0b011) => {
                // C.LDSP
                let dest = c_rd(raw);
                if u8::from(dest) == 0 {
                    return Err(DecodeError::IllegalInstruction);
                }
                Ok(Self::Load {
                    width: LoadWidth::Ld,
                    dest,
                    base: Specifier::from_u5(2),
                    offset: c_ldsp_imm(raw),
                })
            }
            (0b10, 0b100) => {
                let rs1 = c_rd(raw);
                let rs2 = c_rs2(raw);
                match (raw & (1 << 12) != 0, u8::from(rs1), u8::from(rs2)) {
                    (false, 0, _) => Err(DecodeError::IllegalInstruction),
                    (false, _, 0) => Ok(Self::Jalr {
                        // C.JR
                        dest: Specifier::X0,
                        base: rs1,
                        offset: 0,
                    }),
                    (false, _, _) => Ok(Self::Op {
                        // C.MV
                        op: RegRegOp::Add,
                        dest: rs1,
                        src1: Specifier::X0,
                        src2: rs2,
                    }),
                    (true, 0, 0) => Ok(Self::Ebreak),
                    (true, _, 0) => Ok(Self::Jalr {
                        // C.JALR
                        dest: Specifier::from_u5(1),
                        base: rs1,
                        offset: 0,
                    }),
                    (true, _, _) => Ok(Self::Op {
                        // C.ADD
                        op: RegRegOp::Add,
                        dest: rs1,
                        src1: rs1,
                        src2: rs2,
                    }),
                }
            }
            (0b10, 0b110) => Ok(Self::Store {
                width: StoreWidth::Sw,
                src: c_rs2(raw),
                base: Specifier::from_u5(2),
                offset: c_swsp_imm(raw),
            }),
            (0b10, 0b111) => Ok(Self::Store {
                width: StoreWidth::Sd,
                src: c_rs2(raw),
                base: Specifier::from_u5(2),
                offset: c_sdsp_imm(raw),
            }),
            _ => Err(DecodeError::IllegalInstruction),
        }
    }

    /// Returns `true` if `low_parcel` begins a compressed (16-bit) instruction.
    pub fn is_compressed(low_parcel: u16) -> bool {
        low_parcel & 0b11 != 0b11
    }
}

// TODO: Fold UnsupportedOpcode into IllegalInstruction once the gdb-facing disassembly in the
//       test runner no longer distinguishes them.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("instruction has unsupported opcode")]
    UnsupportedOpcode,
    #[error("illegal instruction")]
    IllegalInstruction,
}

/// Returns the 7-bit *opcode* value of the instruction, or `None` if it isn't supported.
fn opcode(raw: u32) -> Option<Opcode> {
    #[allow(clippy::unusual_byte_groupings)]
    match raw & 0x7F {
        0b00_000_11 => Some(Opcode::Load),
        0b00_001_11 => Some(Opcode::LoadFp),
        0b00_010_11 => Some(Opcode::Custom0),
        0b00_011_11 => Some(Opcode::MiscMem),
        0b00_100_11 => Some(Opcode::OpImm),
        0b00_101_11 => Some(Opcode::Auipc),
        0b00_110_11 => Some(Opcode::OpImm32),
        0b01_000_11 => Some(Opcode::Store),
        0b01_001_11 => Some(Opcode::StoreFp),
        0b01_011_11 => Some(Opcode::Amo),
        0b01_100_11 => Some(Opcode::Op),
        0b01_101_11 => Some(Opcode::Lui),
        0b01_110_11 => Some(Opcode::Op32),
        0b10_000_11 => Some(Opcode::Madd),
        0b10_001_11 => Some(Opcode::Msub),
        0b10_010_11 => Some(Opcode::Nmsub),
        0b10_011_11 => Some(Opcode::Nmadd),
        0b10_100_11 => Some(Opcode::OpFp),
        0b11_000_11 => Some(Opcode::Branch),
        0b11_001_11 => Some(Opcode::Jalr),
        0b11_011_11 => Some(Opcode::Jal),
        0b11_100_11 => Some(Opcode::System),
        _ => None,
    }
}

/// Returns the 5-bit *rd* value for R-type, I-type, U-type, J-type instructions.
fn rd(raw: u32) -> Specifier {
    Specifier::from_u5(raw_rd(raw))
}

/// Returns the 5-bit *rs1* value for R-type, I-type, S-type, B-type instructions.
fn rs1(raw: u32) -> Specifier {
    Specifier::from_u5(raw_rs1(raw))
}

/// Returns the 5-bit *rs2* value for R-type, S-type, B-type instructions.
fn rs2(raw: u32) -> Specifier {
    Specifier::from_u5(raw_rs2(raw))
}

fn raw_rd(raw: u32) -> u8 {
    ((raw >> 7) & 0x1F) as u8
}

fn raw_rs1(raw: u32) -> u8 {
    ((raw >> 15) & 0x1F) as u8
}

fn raw_rs2(raw: u32) -> u8 {
    ((raw >> 20) & 0x1F) as u8
}

fn csr(raw: u32) -> CsrSpecifier {
    (raw >> 20) as u16
}

fn i_funct(raw: u32) -> Option<RegImmOp> {
    match funct3(raw) {
        0b000 => Some(RegImmOp::Addi),
        0b010 => Some(RegImmOp::Slti),
        0b011 => Some(RegImmOp::Sltiu),
        0b100 => Some(RegImmOp::Xori),
        0b110 => Some(RegImmOp::Ori),
        0b111 => Some(RegImmOp::Andi),
        _ => None,
    }
}

fn i_shfunct(raw: u32) -> Option<RegShiftImmOp> {
    // RV64 shifts have a 6-bit shamt, so only bits 31:26 select the function.
    match (raw >> 26, funct3(raw)) {
        (0b000000, 0b001) => Some(RegShiftImmOp::Slli),
        (0b000000, 0b101) => Some(RegShiftImmOp::Srli),
        (0b010000, 0b101) => Some(RegShiftImmOp::Srai),
        _ => None,
    }
}

fn i_shfunct32(raw: u32) -> Option<RegShiftImmOp> {
    match (funct7(raw), funct3(raw)) {
        (0b0000000, 0b001) => Some(RegShiftImmOp::Slliw),
        (0b0000000, 0b101) => Some(RegShiftImmOp::Srliw),
        (0b0100000, 0b101) => Some(RegShiftImmOp::Sraiw),
        _ => None,
    }
}

fn i_sys(raw: u32) -> Option<SysFunct> {
    match funct3(raw) {
        0b000 => Some(SysFunct::Priv),
        0b001 => Some(SysFunct::Csrrw),
        0b010 => Some(SysFunct::Csrrs),
        0b011 => Some(SysFunct::Csrrc),
        0b101 => Some(SysFunct::Csrrwi),
        0b110 => Some(SysFunct::Csrrsi),
        0b111 => Some(SysFunct::Csrrci),
        _ => None,
    }
}

fn sys_priv(raw: u32) -> Option<SysPriv> {
    if raw_rd(raw) != 0 {
        return None;
    }
    if funct7(raw) == 0b0001001 {
        return Some(SysPriv::SfenceVma);
    }
    if raw_rs1(raw) != 0 {
        return None;
    }
    match raw >> 20 {
        0 => Some(SysPriv::Ecall),
        1 => Some(SysPriv::Ebreak),
        _ => match (funct7(raw), raw_rs2(raw)) {
            (0b0001000, 2) => Some(SysPriv::Sret),
            (0b0011000, 2) => Some(SysPriv::Mret),
            (0b0001000, 5) => Some(SysPriv::Wfi),
            _ => None,
        },
    }
}

fn i_width(raw: u32) -> Option<LoadWidth> {
    match funct3(raw) {
        0b000 => Some(LoadWidth::Lb),
        0b001 => Some(LoadWidth::Lh),
        0b010 => Some(LoadWidth::Lw),
        0b011 => Some(LoadWidth::Ld),
        0b100 => Some(LoadWidth::Lbu),
        0b101 => Some(LoadWidth::Lhu),
        0b110 => Some(LoadWidth::Lwu),
        _ => None,
    }
}

fn s_width(raw: u32) -> Option<StoreWidth> {
    match funct3(raw) {
        0b000 => Some(StoreWidth::Sb),
        0b001 => Some(StoreWidth::Sh),
        0b010 => Some(StoreWidth::Sw),
        0b011 => Some(StoreWidth::Sd),
        _ => None,
    }
}

fn r_funct(raw: u32) -> Option<RegRegOp> {
    match (funct7(raw), funct3(raw)) {
        (0b0000000, 0b000) => Some(RegRegOp::Add),
        (0b0000000, 0b001) => Some(RegRegOp::Sll),
        (0b0000000, 0b010) => Some(RegRegOp::Slt),
        (0b0000000, 0b011) => Some(RegRegOp::Sltu),
        (0b0000000, 0b100) => Some(RegRegOp::Xor),
        (0b0000000, 0b101) => Some(RegRegOp::Srl),
        (0b0000000, 0b110) => Some(RegRegOp::Or),
        (0b0000000, 0b111) => Some(RegRegOp::And),
        (0b0100000, 0b000) => Some(RegRegOp::Sub),
        (0b0100000, 0b101) => Some(RegRegOp::Sra),
        // funct7 == MULDIV
        (0b0000001, 0b000) => Some(RegRegOp::Mul),
        (0b0000001, 0b001) => Some(RegRegOp::Mulh),
        (0b0000001, 0b010) => Some(RegRegOp::Mulhsu),
        (0b0000001, 0b011) => Some(RegRegOp::Mulhu),
        (0b0000001, 0b100) => Some(RegRegOp::Div),
        (0b0000001, 0b101) => Some(RegRegOp::Divu),
        (0b0000001, 0b110) => Some(RegRegOp::Rem),
        (0b0000001, 0b111) => Some(RegRegOp::Remu),
        _ => None,
    }
}

fn r_funct32(raw: u32) -> Option<RegReg32Op> {
    match (funct7(raw), funct3(raw)) {
        (0b0000000, 0b000) => Some(RegReg32Op::Addw),
        (0b0000000, 0b001) => Some(RegReg32Op::Sllw),
        (0b0000000, 0b101) => Some(RegReg32Op::Srlw),
        (0b0100000, 0b000) => Some(RegReg32Op::Subw),
        (0b0100000, 0b101) => Some(RegReg32Op::Sraw),
        (0b0000001, 0b000) => Some(RegReg32Op::Mulw),
        (0b0000001, 0b100) => Some(RegReg32Op::Divw),
        (0b0000001, 0b101) => Some(RegReg32Op::Divuw),
        (0b0000001, 0b110) => Some(RegReg32Op::Remw),
        (0b0000001, 0b111) => Some(RegReg32Op::Remuw),
        _ => None,
    }
}

fn b_funct(raw: u32) -> Option<BranchCondition> {
    match funct3(raw) {
        0b000 => Some(BranchCondition::Beq),
        0b001 => Some(BranchCondition::Bne),
        0b100 => Some(BranchCondition::Blt),
        0b101 => Some(BranchCondition::Bge),
        0b110 => Some(BranchCondition::Bltu),
        0b111 => Some(BranchCondition::Bgeu),
        _ => None,
    }
}

fn amo_op(raw: u32) -> Option<(AmoOp, AmoWidth)> {
    let width = match funct3(raw) {
        0b010 => AmoWidth::W,
        0b011 => AmoWidth::D,
        _ => return None,
    };
    let op = match funct7(raw) >> 2 {
        0b00010 if raw_rs2(raw) == 0 => AmoOp::Lr,
        0b00011 => AmoOp::Sc,
        0b00001 => AmoOp::Swap,
        0b00000 => AmoOp::Add,
        0b00100 => AmoOp::Xor,
        0b01100 => AmoOp::And,
        0b01000 => AmoOp::Or,
        0b10000 => AmoOp::Min,
        0b10100 => AmoOp::Max,
        0b11000 => AmoOp::Minu,
        0b11100 => AmoOp::Maxu,
        _ => return None,
    };
    Some((op, width))
}

fn fp_op(raw: u32) -> Result<Instruction, DecodeError> {
    let op = match (funct7(raw), raw_rs2(raw), funct3(raw)) {
        (0b0000000, _, _) => FpOp::Add,
        (0b0000100, _, _) => FpOp::Sub,
        (0b0001000, _, _) => FpOp::Mul,
        (0b0001100, _, _) => FpOp::Div,
        (0b0101100, 0b00000, _) => FpOp::Sqrt,
        (0b0010000, _, 0b000) => FpOp::SgnJ,
        (0b0010000, _, 0b001) => FpOp::SgnJn,
        (0b0010000, _, 0b010) => FpOp::SgnJx,
        (0b0010100, _, 0b000) => FpOp::Min,
        (0b0010100, _, 0b001) => FpOp::Max,
        (0b1100000, 0b00000, _) => FpOp::CvtWS,
        (0b1100000, 0b00001, _) => FpOp::CvtWuS,
        (0b1100000, 0b00010, _) => FpOp::CvtLS,
        (0b1100000, 0b00011, _) => FpOp::CvtLuS,
        (0b1101000, 0b00000, _) => FpOp::CvtSW,
        (0b1101000, 0b00001, _) => FpOp::CvtSWu,
        (0b1101000, 0b00010, _) => FpOp::CvtSL,
        (0b1101000, 0b00011, _) => FpOp::CvtSLu,
        (0b1110000, 0b00000, 0b000) => FpOp::MvXW,
        (0b1110000, 0b00000, 0b001) => FpOp::Class,
        (0b1111000, 0b00000, 0b000) => FpOp::MvWX,
        (0b1010000, _, 0b010) => FpOp::Eq,
        (0b1010000, _, 0b001) => FpOp::Lt,
        (0b1010000, _, 0b000) => FpOp::Le,
        _ => return Err(DecodeError::IllegalInstruction),
    };
    Ok(Instruction::OpFp {
        op,
        dest: raw_rd(raw),
        src1: raw_rs1(raw),
        src2: raw_rs2(raw),
        rm: funct3(raw),
    })
}

/// Decode of the chip's custom-0 opcode space (packed f32, mask transfers, vector memory).
fn custom0_op(raw: u32) -> Result<Instruction, DecodeError> {
    match funct3(raw) {
        // Vector memory: full-VLENB loads/stores with an S-type immediate.
        0b000 => Ok(Instruction::VLoad {
            dest: raw_rd(raw),
            base: rs1(raw),
            offset: i_imm(raw),
        }),
        0b001 => Ok(Instruction::VStore {
            src: raw_rs2(raw),
            base: rs1(raw),
            offset: s_imm(raw),
        }),
        // Packed lane-wise f32 arithmetic.
        0b010 => {
            let op = match funct7(raw) {
                0b0000000 => PackedOp::Add,
                0b0000001 => PackedOp::Mul,
                0b0000010 => PackedOp::Fmadd,
                _ => return Err(DecodeError::IllegalInstruction),
            };
            Ok(Instruction::OpPacked {
                op,
                dest: raw_rd(raw),
                src1: raw_rs1(raw),
                src2: raw_rs2(raw),
            })
        }
        0b011 => Ok(Instruction::VBroadcast {
            dest: raw_rd(raw),
            src: rs1(raw),
        }),
        // Mask transfers: funct7 selects the direction.
        0b100 => {
            let op = match funct7(raw) {
                0b0000000 => MaskOp::MovXM,
                0b0000001 => MaskOp::MovMX,
                0b0000010 => MaskOp::Popc,
                _ => return Err(DecodeError::IllegalInstruction),
            };
            Ok(Instruction::OpMask {
                op,
                dest: rd(raw),
                mask: (raw_rd(raw) | raw_rs2(raw)) & 0b111,
                src: rs1(raw),
            })
        }
        _ => Err(DecodeError::IllegalInstruction),
    }
}

/// Returns the 3-bit *funct3* value for R-type, I-type, S-type, B-type instructions.
fn funct3(raw: u32) -> u8 {
    ((raw >> 12) & 0b111) as u8
}

/// Returns the 7-bit *funct7* value for R-type instructions.
fn funct7(raw: u32) -> u8 {
    (raw >> 25) as u8
}

/// Returns the 5-bit *shamt* value for RV32-width shift instructions.
fn shamt5(raw: u32) -> u32 {
    (raw >> 20) & 0x1F
}

/// Returns the 6-bit *shamt* value for RV64 shift instructions.
fn shamt6(raw: u32) -> u32 {
    (raw >> 20) & 0x3F
}

/// Returns the 12-bit I-immediate sign-extended to 64 bits.
fn i_imm(raw: u32) -> i64 {
    (raw as i32 >> 20) as i64
}

/// Returns the 12-bit S-immediate sign-extended to 64 bits.
fn s_imm(raw: u32) -> i64 {
    let imm_11_5 = raw & 0xFE00_0000;
    let imm_4_0 = raw & 0x0000_0F80;
    ((imm_11_5 | (imm_4_0 << 13)) as i32 >> 20) as i64
}

/// Returns the 13-bit B-immediate sign-extended to 64 bits.
fn b_imm(raw: u32) -> i64 {
    let imm_12 = raw & 0x8000_0000;
    let imm_10_5 = raw & 0x7E00_0000;
    let imm_4_1 = raw & 0x0000_0F00;
    let imm_11 = raw & 0x0000_0080;
    ((imm_12 | (imm_11 << 23) | (imm_10_5 >> 1) | (imm_4_1 << 12)) as i32 >> 19) as i64
}

/// Returns the signed 32-bit U-immediate, sign-extended to 64 bits.
fn u_imm(raw: u32) -> i64 {
    ((raw & 0xFFFF_F000) as i32) as i64
}

/// Returns the 21-bit J-immediate sign-extended to 64 bits.
fn j_imm(raw: u32) -> i64 {
    let imm_20 = raw & 0x8000_0000;
    let imm_10_1 = raw & 0x7FE0_0000;
    let imm_11 = raw & 0x0010_0000;
    let imm_19_12 = raw & 0x000F_F000;
    ((imm_20 | (imm_19_12 << 11) | (imm_11 << 2) | (imm_10_1 >> 9)) as i32 >> 11) as i64
}

//
// Compressed-encoding field helpers. The `prime` registers are the 3-bit encodings mapping to
// x8..x15.
//

fn c_rd(raw: u16) -> Specifier {
    Specifier::from_u5(((raw >> 7) & 0x1F) as u8)
}

fn c_rs2(raw: u16) -> Specifier {
    Specifier::from_u5(((raw >> 2) & 0x1F) as u8)
}

fn c_rd_prime(raw: u16) -> Specifier {
    Specifier::from_u5(8 + ((raw >> 2) & 0b111) as u8)
}

fn c_rs1_prime(raw: u16) -> Specifier {
    Specifier::from_u5(8 + ((raw >> 7) & 0b111) as u8)
}

fn c_rs2_prime(raw: u16) -> Specifier {
    Specifier::from_u5(8 + ((raw >> 2) & 0b111) as u8)
}

/// 6-bit CI-format immediate, sign-extended.
fn c_imm6(raw: u16) -> i64 {
    let imm = ((raw >> 2) & 0x1F) as i64 | (((raw >> 12) & 1) as i64) << 5;
    (imm << 58) >> 58
}

/// 6-bit shift amount of C.SLLI/C.SRLI/C.SRAI.
fn c_shamt(raw: u16) -> u32 {
    (((raw >> 2) & 0x1F) | ((raw >> 7) & 0x20)) as u32
}

/// Zero-extended scaled immediate of C.ADDI4SPN.
fn c_addi4spn_imm(raw: u16) -> i64 {
    let imm = ((raw >> 7) & 0x30)       // imm[5:4]
        | ((raw >> 1) & 0x3C0)          // imm[9:6]
        | ((raw >> 4) & 0x4)            // imm[2]
        | ((raw >> 2) & 0x8); // imm[3]
    imm as i64
}

/// Sign-extended scaled immediate of C.ADDI16SP.
fn c_addi16sp_imm(raw: u16) -> i64 {
    let imm = (((raw >> 12) & 1) << 9)  // imm[9]
        | (((raw >> 6) & 1) << 4)       // imm[4]
        | (((raw >> 5) & 1) << 6)       // imm[6]
        | (((raw >> 3) & 3) << 7)       // imm[8:7]
        | (((raw >> 2) & 1) << 5); // imm[5]
    ((imm as i64) << 54) >> 54
}

/// Zero-extended word-scaled immediate of C.LW/C.SW.
fn c_lw_imm(raw: u16) -> i64 {
    let imm = (((raw >> 10) & 0x7) << 3)    // imm[5:3]
        | (((raw >> 6) & 1) << 2)           // imm[2]
        | (((raw >> 5) & 1) << 6); // imm[6]
    imm as i64
}

/// Zero-extended doubleword-scaled immediate of C.LD/C.SD.
fn c_ld_imm(raw: u16) -> i64 {
    let imm = (((raw >> 10) & 0x7) << 3)    // imm[5:3]
        | (((raw >> 5) & 0x3) << 6); // imm[7:6]
    imm as i64
}

/// Zero-extended immediate of C.LWSP.
fn c_lwsp_imm(raw: u16) -> i64 {
    let imm = (((raw >> 12) & 1) << 5)      // imm[5]
        | (((raw >> 4) & 0x7) << 2)         // imm[4:2]
        | (((raw >> 2) & 0x3) << 6); // imm[7:6]
    imm as i64
}

/// Zero-extended immediate of C.LDSP.
fn c_ldsp_imm(raw: u16) -> i64 {
    let imm = (((raw >> 12) & 1) << 5)      // imm[5]
        | (((raw >> 5) & 0x3) << 3)         // imm[4:3]
        | (((raw >> 2) & 0x7) << 6); // imm[8:6]
    imm as i64
}

/// Zero-extended immediate of C.SWSP.
fn c_swsp_imm(raw: u16) -> i64 {
    let imm = (((raw >> 9) & 0xF) << 2)     // imm[5:2]
        | (((raw >> 7) & 0x3) << 6); // imm[7:6]
    imm as i64
}

/// Zero-extended immediate of C.SDSP.
fn c_sdsp_imm(raw: u16) -> i64 {
    let imm = (((raw >> 10) & 0x7) << 3)    // imm[5:3]
        | (((raw >> 7) & 0x7) << 6); // imm[8:6]
    imm as i64
}

/// Sign-extended jump offset of C.J.
fn c_j_imm(raw: u16) -> i64 {
    let imm = (((raw >> 12) & 1) << 11)     // imm[11]
        | (((raw >> 11) & 1) << 4)          // imm[4]
        | (((raw >> 9) & 0x3) << 8)         // imm[9:8]
        | (((raw >> 8) & 1) << 10)          // imm[10]
        | (((raw >> 7) & 1) << 6)           // imm[6]
        | (((raw >> 6) & 1) << 7)           // imm[7]
        | (((raw >> 3) & 0x7) << 1)         // imm[3:1]
        | (((raw >> 2) & 1) << 5); // imm[5]
    ((imm as i64) << 52) >> 52
}

/// Sign-extended branch offset of C.BEQZ/C.BNEZ.
fn c_b_imm(raw: u16) -> i64 {
    let imm = (((raw >> 12) & 1) << 8)      // imm[8]
        | (((raw >> 10) & 0x3) << 3)        // imm[4:3]
        | (((raw >> 5) & 0x3) << 6)         // imm[7:6]
        | (((raw >> 3) & 0x3) << 1)         // imm[2:1]
        | (((raw >> 2) & 1) << 5); // imm[5]
    ((imm as i64) << 55) >> 55
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Opcode {
    Load,
    LoadFp,
    Custom0,
    MiscMem,
    OpImm,
    Auipc,
    OpImm32,
    Store,
    StoreFp,
    Amo,
    Op,
    Lui,
    Op32,
    Madd,
    Msub,
    Nmsub,
    Nmadd,
    OpFp,
    Branch,
    Jalr,
    Jal,
    System,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SysFunct {
    Priv,
    Csrrw,
    Csrrs,
    Csrrc,
    Csrrwi,
    Csrrsi,
    Csrrci,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SysPriv {
    Ecall,
    Ebreak,
    Sret,
    Mret,
    Wfi,
    SfenceVma,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i_imm() {
        assert_eq!(0, i_imm(0x0000_0000));
        assert_eq!(-1, i_imm(0xFFF0_0000));
        assert_eq!(2047, i_imm(2047 << 20));
        assert_eq!(-2048, i_imm(0x8000_0000));
        // Check other bits are ignored
        assert_eq!(0, i_imm(0x000F_FFFF));
        assert_eq!(-1, i_imm(0xFFF1_2345));
    }

    #[test]
    fn test_decode_addi() {
        // addi x5, x6, -3
        let raw = 0xFFD3_0293;
        assert_eq!(
            Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::from_u5(5),
                src: Specifier::from_u5(6),
                immediate: -3,
            }),
            Instruction::decode(raw)
        );
    }

    #[test]
    fn test_decode_rv64_shift() {
        // slli x1, x1, 42 (6-bit shamt)
        let raw = 0x02A0_9093;
        assert_eq!(
            Ok(Instruction::OpShiftImm {
                op: RegShiftImmOp::Slli,
                dest: Specifier::from_u5(1),
                src: Specifier::from_u5(1),
                shift_amount_u6: 42,
            }),
            Instruction::decode(raw)
        );
    }

    #[test]
    fn test_decode_ld_sd() {
        // ld x7, 16(x2)
        let raw = 0x0101_3383;
        assert_eq!(
            Ok(Instruction::Load {
                width: LoadWidth::Ld,
                dest: Specifier::from_u5(7),
                base: Specifier::from_u5(2),
                offset: 16,
            }),
            Instruction::decode(raw)
        );
        // sd x7, 24(x2)
        let raw = 0x0071_3C23;
        assert_eq!(
            Ok(Instruction::Store {
                width: StoreWidth::Sd,
                src: Specifier::from_u5(7),
                base: Specifier::from_u5(2),
                offset: 24,
            }),
            Instruction::decode(raw)
        );
    }

    #[test]
    fn test_decode_csrrw() {
        // csrrw x0, mstatus, x1
        let raw = 0x3000_9073;
        assert_eq!(
            Ok(Instruction::Csr {
                op: CsrOp::ReadWrite,
                dest: Specifier::X0,
                csr: 0x300,
                src: Specifier::from_u5(1),
            }),
            Instruction::decode(raw)
        );
    }

    #[test]
    fn test_decode_fmadd() {
        // fmadd.s f1, f2, f3, f4
        let raw = 0x2031_70C3;
        assert_eq!(
            Ok(Instruction::FpFma {
                op: FpFmaOp::Madd,
                dest: 1,
                src1: 2,
                src2: 3,
                src3: 4,
                rm: 0b111,
            }),
            Instruction::decode(raw)
        );
    }

    #[test]
    fn test_decode_compressed_addi() {
        // c.addi x8, -1
        let raw = 0x147D;
        assert_eq!(
            Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::from_u5(8),
                src: Specifier::from_u5(8),
                immediate: -1,
            }),
            Instruction::decode_compressed(raw)
        );
    }

    #[test]
    fn test_decode_compressed_ldsp() {
        // c.ldsp x8, 0(sp)
        let raw = 0x6402;
        assert_eq!(
            Ok(Instruction::Load {
                width: LoadWidth::Ld,
                dest: Specifier::from_u5(8),
                base: Specifier::from_u5(2),
                offset: 0,
            }),
            Instruction::decode_compressed(raw)
        );
    }

    #[test]
    fn test_decode_compressed_jr() {
        // c.jr x1
        let raw = 0x8082;
        assert_eq!(
            Ok(Instruction::Jalr {
                dest: Specifier::X0,
                base: Specifier::from_u5(1),
                offset: 0,
            }),
            Instruction::decode_compressed(raw)
        );
    }

    #[test]
    fn test_is_compressed() {
        assert!(Instruction::is_compressed(0x147D));
        assert!(!Instruction::is_compressed(0x0293));
    }

    #[test]
    fn test_reserved_encodings_rejected() {
        // c.addi4spn with zero immediate is reserved.
        assert_eq!(
            Err(DecodeError::IllegalInstruction),
            Instruction::decode_compressed(0x0000)
        );
        // Unsupported opcode (custom-2).
        assert_eq!(
            Err(DecodeError::UnsupportedOpcode),
            Instruction::decode(0x0000_005B)
        );
    }
}
