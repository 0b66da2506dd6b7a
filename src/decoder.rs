//! Table-driven PowerPC instruction decoder.
//!
//! Every recognised instruction is one row of [`opcode_table!`]: a mnemonic,
//! the fixed bits that identify it (primary opcode, extended opcode and any
//! fixed Rc/OE/LK/AA bits) and the ordered list of operand fields. Decoding
//! dispatches on the primary opcode first, then tries the rows sharing that
//! primary from the most specific mask to the least specific one.

use std::cmp::Reverse;
use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::bitfield::{self as bf, Field};
use crate::{Address, Decoder, Instruction};

/// An instruction word that matches no row of the opcode table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot decode word 0x{word:08x} at 0x{address:08x}")]
pub struct DecodeError {
    /// Guest address of the word
    pub address: Address,
    /// Byte-swapped instruction word
    pub word: u32,
}

/// One operand slot of an instruction form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// A plain bit field
    Field(Field),
    /// Special-purpose register number (halves swapped in the encoding)
    Spr,
    /// 6-bit shift split across bits 16..21 and bit 30
    Sh64,
    /// 6-bit mask bound stored as `mb[5] || mb[0:4]`
    Mb64,
}

const SPR_FIELD: Field = Field::new(11, 10);
const SH64_LOW: Field = Field::new(16, 5);
const SH64_HIGH: Field = Field::new(30, 1);
const MB64_FIELD: Field = Field::new(21, 6);

impl Operand {
    /// Read this operand out of `word`.
    pub fn extract(self, word: u32) -> u32 {
        match self {
            Operand::Field(field) => field.extract(word),
            Operand::Spr => {
                let raw = SPR_FIELD.extract(word);
                ((raw & 0x1F) << 5) | (raw >> 5)
            }
            Operand::Sh64 => SH64_LOW.extract(word) | (SH64_HIGH.extract(word) << 5),
            Operand::Mb64 => {
                let raw = MB64_FIELD.extract(word);
                ((raw & 1) << 5) | (raw >> 1)
            }
        }
    }

    /// Write `value` into this operand's bits of `word`.
    pub fn insert(self, word: u32, value: u32) -> u32 {
        match self {
            Operand::Field(field) => field.insert(word, value),
            Operand::Spr => {
                let raw = ((value & 0x1F) << 5) | ((value >> 5) & 0x1F);
                SPR_FIELD.insert(word, raw)
            }
            Operand::Sh64 => {
                let word = SH64_LOW.insert(word, value & 0x1F);
                SH64_HIGH.insert(word, (value >> 5) & 1)
            }
            Operand::Mb64 => {
                let raw = ((value & 0x1F) << 1) | ((value >> 5) & 1);
                MB64_FIELD.insert(word, raw)
            }
        }
    }
}

/// Fixed bits identifying an opcode: `word & mask == bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    pub mask: u32,
    pub bits: u32,
}

impl Encoding {
    pub const fn matches(self, word: u32) -> bool {
        word & self.mask == self.bits
    }

    pub const fn primary(self) -> u32 {
        self.bits >> 26
    }
}

const fn d(primary: u32) -> Encoding {
    Encoding { mask: 0xFC00_0000, bits: primary << 26 }
}

const fn ds(primary: u32, xo: u32) -> Encoding {
    Encoding { mask: 0xFC00_0003, bits: primary << 26 | xo }
}

// X, XL, XFX and XO forms (with OE = 0) share the 10-bit extended opcode slot.
const fn x(primary: u32, xo: u32, rc: u32) -> Encoding {
    Encoding { mask: 0xFC00_07FF, bits: primary << 26 | xo << 1 | rc }
}

const fn xs(primary: u32, xo: u32, rc: u32) -> Encoding {
    Encoding { mask: 0xFC00_07FD, bits: primary << 26 | xo << 2 | rc }
}

const fn a(primary: u32, xo: u32) -> Encoding {
    Encoding { mask: 0xFC00_003F, bits: primary << 26 | xo << 1 }
}

const fn m(primary: u32, rc: u32) -> Encoding {
    Encoding { mask: 0xFC00_0001, bits: primary << 26 | rc }
}

const fn md(xo: u32, rc: u32) -> Encoding {
    Encoding { mask: 0xFC00_001D, bits: 30 << 26 | xo << 2 | rc }
}

const fn mds(xo: u32, rc: u32) -> Encoding {
    Encoding { mask: 0xFC00_001F, bits: 30 << 26 | xo << 1 | rc }
}

const fn branch(primary: u32, aa: u32, lk: u32) -> Encoding {
    Encoding { mask: 0xFC00_0003, bits: primary << 26 | aa << 1 | lk }
}

const fn vx(xo: u32) -> Encoding {
    Encoding { mask: 0xFC00_07FF, bits: 4 << 26 | xo }
}

const fn va(xo: u32) -> Encoding {
    Encoding { mask: 0xFC00_003F, bits: 4 << 26 | xo }
}

const SC: Encoding = Encoding { mask: 0xFC00_0002, bits: 17 << 26 | 2 };

const RD: Operand = Operand::Field(bf::RD);
const RS: Operand = Operand::Field(bf::RS);
const RA: Operand = Operand::Field(bf::RA);
const RB: Operand = Operand::Field(bf::RB);
const RC: Operand = Operand::Field(bf::RC);
const SIMM: Operand = Operand::Field(bf::SIMM);
const UIMM: Operand = Operand::Field(bf::UIMM);
const DS: Operand = Operand::Field(bf::DS);
const LI: Operand = Operand::Field(bf::LI);
const BD: Operand = Operand::Field(bf::BD);
const BO: Operand = Operand::Field(bf::BO);
const BI: Operand = Operand::Field(bf::BI);
const CRFD: Operand = Operand::Field(bf::CRFD);
const CRFS: Operand = Operand::Field(bf::CRFS);
const L: Operand = Operand::Field(bf::L);
const L15: Operand = Operand::Field(bf::L15);
const SYNC_L: Operand = Operand::Field(bf::SYNC_L);
const SH: Operand = Operand::Field(bf::SH);
const MB: Operand = Operand::Field(bf::MB);
const ME: Operand = Operand::Field(bf::ME);
const CRM: Operand = Operand::Field(bf::CRM);
const FM: Operand = Operand::Field(bf::FM);
const TO: Operand = Operand::Field(bf::TO);
const CRBD: Operand = Operand::Field(bf::CRBD);
const CRBA: Operand = Operand::Field(bf::CRBA);
const CRBB: Operand = Operand::Field(bf::CRBB);
const VUIMM: Operand = Operand::Field(bf::VUIMM);
const VSIMM: Operand = Operand::Field(bf::VSIMM);
const VSHB: Operand = Operand::Field(bf::VSHB);
const SPR: Operand = Operand::Spr;
const SH64: Operand = Operand::Sh64;
const MB64: Operand = Operand::Mb64;

const NONE: &[Operand] = &[];
const D_ARITH: &[Operand] = &[RD, RA, SIMM];
const D_LOGIC: &[Operand] = &[RA, RS, UIMM];
const D_CMPI: &[Operand] = &[CRFD, L, RA, SIMM];
const D_CMPLI: &[Operand] = &[CRFD, L, RA, UIMM];
const D_TRAP: &[Operand] = &[TO, RA, SIMM];
const D_MEM: &[Operand] = &[RD, SIMM, RA];
const DS_MEM: &[Operand] = &[RD, DS, RA];
const I_FORM: &[Operand] = &[LI];
const B_FORM: &[Operand] = &[BO, BI, BD];
const XL_BRANCH: &[Operand] = &[BO, BI];
const XL_CR: &[Operand] = &[CRBD, CRBA, CRBB];
const XL_MCRF: &[Operand] = &[CRFD, CRFS];
const X_RRR: &[Operand] = &[RD, RA, RB];
const X_RR: &[Operand] = &[RD, RA];
const X_LOGIC: &[Operand] = &[RA, RS, RB];
const X_UNARY: &[Operand] = &[RA, RS];
const X_SHIFT_IMM: &[Operand] = &[RA, RS, SH];
const XS_SHIFT: &[Operand] = &[RA, RS, SH64];
const X_CMP: &[Operand] = &[CRFD, L, RA, RB];
const X_TRAP: &[Operand] = &[TO, RA, RB];
const X_CACHE: &[Operand] = &[RA, RB];
const X_RD: &[Operand] = &[RD];
const X_MTMSR: &[Operand] = &[RS, L15];
const X_SYNC: &[Operand] = &[SYNC_L];
const XFX_MFSPR: &[Operand] = &[RD, SPR];
const XFX_MTSPR: &[Operand] = &[SPR, RS];
const XFX_MTCRF: &[Operand] = &[CRM, RS];
const M_IMM: &[Operand] = &[RA, RS, SH, MB, ME];
const M_REG: &[Operand] = &[RA, RS, RB, MB, ME];
const MD_FORM: &[Operand] = &[RA, RS, SH64, MB64];
const MDS_FORM: &[Operand] = &[RA, RS, RB, MB64];
const A_FRR: &[Operand] = &[RD, RA, RB];
const A_FRC: &[Operand] = &[RD, RA, RC];
const A_FMA: &[Operand] = &[RD, RA, RC, RB];
const A_FB: &[Operand] = &[RD, RB];
const X_FCMP: &[Operand] = &[CRFD, RA, RB];
const X_MTFSF: &[Operand] = &[FM, RB];
const VX_SPLAT: &[Operand] = &[RD, VUIMM, RB];
const VX_SPLAT_IMM: &[Operand] = &[RD, VSIMM];
const VA_FORM: &[Operand] = &[RD, RA, RB, RC];
const VA_SLDOI: &[Operand] = &[RD, RA, RB, VSHB];
const VA_MADD: &[Operand] = &[RD, RA, RC, RB];

macro_rules! opcode_table {
    ($($variant:ident = $mnemonic:literal, $encoding:expr, $form:expr;)*) => {
        /// Every instruction the decoder recognises.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            /// All opcodes in table order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            /// Assembler mnemonic, including a trailing `.` for record forms.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }

            /// Fixed bits that identify this opcode.
            pub const fn encoding(self) -> Encoding {
                match self {
                    $(Opcode::$variant => $encoding,)*
                }
            }

            /// Ordered operand fields.
            pub const fn form(self) -> &'static [Operand] {
                match self {
                    $(Opcode::$variant => $form,)*
                }
            }
        }
    };
}

opcode_table! {
    // Integer immediate forms
    Tdi = "tdi", d(2), D_TRAP;
    Twi = "twi", d(3), D_TRAP;
    Mulli = "mulli", d(7), D_ARITH;
    Subfic = "subfic", d(8), D_ARITH;
    Cmpli = "cmpli", d(10), D_CMPLI;
    Cmpi = "cmpi", d(11), D_CMPI;
    Addic = "addic", d(12), D_ARITH;
    AddicDot = "addic.", d(13), D_ARITH;
    Addi = "addi", d(14), D_ARITH;
    Addis = "addis", d(15), D_ARITH;
    Ori = "ori", d(24), D_LOGIC;
    Oris = "oris", d(25), D_LOGIC;
    Xori = "xori", d(26), D_LOGIC;
    Xoris = "xoris", d(27), D_LOGIC;
    AndiDot = "andi.", d(28), D_LOGIC;
    AndisDot = "andis.", d(29), D_LOGIC;

    // Branches
    Bc = "bc", branch(16, 0, 0), B_FORM;
    Bcl = "bcl", branch(16, 0, 1), B_FORM;
    Bca = "bca", branch(16, 1, 0), B_FORM;
    Bcla = "bcla", branch(16, 1, 1), B_FORM;
    Sc = "sc", SC, NONE;
    B = "b", branch(18, 0, 0), I_FORM;
    Bl = "bl", branch(18, 0, 1), I_FORM;
    Ba = "ba", branch(18, 1, 0), I_FORM;
    Bla = "bla", branch(18, 1, 1), I_FORM;

    // Primary 19: condition register and branch-to-register
    Mcrf = "mcrf", x(19, 0, 0), XL_MCRF;
    Bclr = "bclr", x(19, 16, 0), XL_BRANCH;
    Bclrl = "bclrl", x(19, 16, 1), XL_BRANCH;
    Rfid = "rfid", x(19, 18, 0), NONE;
    Crnor = "crnor", x(19, 33, 0), XL_CR;
    Crandc = "crandc", x(19, 129, 0), XL_CR;
    Isync = "isync", x(19, 150, 0), NONE;
    Crxor = "crxor", x(19, 193, 0), XL_CR;
    Crnand = "crnand", x(19, 225, 0), XL_CR;
    Crand = "crand", x(19, 257, 0), XL_CR;
    Creqv = "creqv", x(19, 289, 0), XL_CR;
    Crorc = "crorc", x(19, 417, 0), XL_CR;
    Cror = "cror", x(19, 449, 0), XL_CR;
    Bcctr = "bcctr", x(19, 528, 0), XL_BRANCH;
    Bcctrl = "bcctrl", x(19, 528, 1), XL_BRANCH;

    // Rotates
    Rlwimi = "rlwimi", m(20, 0), M_IMM;
    RlwimiDot = "rlwimi.", m(20, 1), M_IMM;
    Rlwinm = "rlwinm", m(21, 0), M_IMM;
    RlwinmDot = "rlwinm.", m(21, 1), M_IMM;
    Rlwnm = "rlwnm", m(23, 0), M_REG;
    RlwnmDot = "rlwnm.", m(23, 1), M_REG;
    Rldicl = "rldicl", md(0, 0), MD_FORM;
    RldiclDot = "rldicl.", md(0, 1), MD_FORM;
    Rldicr = "rldicr", md(1, 0), MD_FORM;
    RldicrDot = "rldicr.", md(1, 1), MD_FORM;
    Rldic = "rldic", md(2, 0), MD_FORM;
    RldicDot = "rldic.", md(2, 1), MD_FORM;
    Rldimi = "rldimi", md(3, 0), MD_FORM;
    RldimiDot = "rldimi.", md(3, 1), MD_FORM;
    Rldcl = "rldcl", mds(8, 0), MDS_FORM;
    Rldcr = "rldcr", mds(9, 0), MDS_FORM;

    // Primary 31: register forms
    Cmp = "cmp", x(31, 0, 0), X_CMP;
    Tw = "tw", x(31, 4, 0), X_TRAP;
    Lvsl = "lvsl", x(31, 6, 0), X_RRR;
    Subfc = "subfc", x(31, 8, 0), X_RRR;
    SubfcDot = "subfc.", x(31, 8, 1), X_RRR;
    Mulhdu = "mulhdu", x(31, 9, 0), X_RRR;
    Addc = "addc", x(31, 10, 0), X_RRR;
    AddcDot = "addc.", x(31, 10, 1), X_RRR;
    Mulhwu = "mulhwu", x(31, 11, 0), X_RRR;
    MulhwuDot = "mulhwu.", x(31, 11, 1), X_RRR;
    Mfcr = "mfcr", x(31, 19, 0), X_RD;
    Lwarx = "lwarx", x(31, 20, 0), X_RRR;
    Ldx = "ldx", x(31, 21, 0), X_RRR;
    Lwzx = "lwzx", x(31, 23, 0), X_RRR;
    Slw = "slw", x(31, 24, 0), X_LOGIC;
    SlwDot = "slw.", x(31, 24, 1), X_LOGIC;
    Cntlzw = "cntlzw", x(31, 26, 0), X_UNARY;
    CntlzwDot = "cntlzw.", x(31, 26, 1), X_UNARY;
    Sld = "sld", x(31, 27, 0), X_LOGIC;
    SldDot = "sld.", x(31, 27, 1), X_LOGIC;
    And = "and", x(31, 28, 0), X_LOGIC;
    AndDot = "and.", x(31, 28, 1), X_LOGIC;
    Cmpl = "cmpl", x(31, 32, 0), X_CMP;
    Lvsr = "lvsr", x(31, 38, 0), X_RRR;
    Subf = "subf", x(31, 40, 0), X_RRR;
    SubfDot = "subf.", x(31, 40, 1), X_RRR;
    Ldux = "ldux", x(31, 53, 0), X_RRR;
    Dcbst = "dcbst", x(31, 54, 0), X_CACHE;
    Lwzux = "lwzux", x(31, 55, 0), X_RRR;
    Cntlzd = "cntlzd", x(31, 58, 0), X_UNARY;
    Andc = "andc", x(31, 60, 0), X_LOGIC;
    AndcDot = "andc.", x(31, 60, 1), X_LOGIC;
    Td = "td", x(31, 68, 0), X_TRAP;
    Mulhd = "mulhd", x(31, 73, 0), X_RRR;
    Mulhw = "mulhw", x(31, 75, 0), X_RRR;
    MulhwDot = "mulhw.", x(31, 75, 1), X_RRR;
    Mfmsr = "mfmsr", x(31, 83, 0), X_RD;
    Ldarx = "ldarx", x(31, 84, 0), X_RRR;
    Dcbf = "dcbf", x(31, 86, 0), X_CACHE;
    Lbzx = "lbzx", x(31, 87, 0), X_RRR;
    Lvx = "lvx", x(31, 103, 0), X_RRR;
    Neg = "neg", x(31, 104, 0), X_RR;
    NegDot = "neg.", x(31, 104, 1), X_RR;
    Lbzux = "lbzux", x(31, 119, 0), X_RRR;
    Nor = "nor", x(31, 124, 0), X_LOGIC;
    NorDot = "nor.", x(31, 124, 1), X_LOGIC;
    Subfe = "subfe", x(31, 136, 0), X_RRR;
    SubfeDot = "subfe.", x(31, 136, 1), X_RRR;
    Adde = "adde", x(31, 138, 0), X_RRR;
    AddeDot = "adde.", x(31, 138, 1), X_RRR;
    Mtcrf = "mtcrf", x(31, 144, 0), XFX_MTCRF;
    Mtmsr = "mtmsr", x(31, 146, 0), X_MTMSR;
    Stdx = "stdx", x(31, 149, 0), X_RRR;
    StwcxDot = "stwcx.", x(31, 150, 1), X_RRR;
    Stwx = "stwx", x(31, 151, 0), X_RRR;
    Mtmsrd = "mtmsrd", x(31, 178, 0), X_MTMSR;
    Stdux = "stdux", x(31, 181, 0), X_RRR;
    Stwux = "stwux", x(31, 183, 0), X_RRR;
    Subfze = "subfze", x(31, 200, 0), X_RR;
    SubfzeDot = "subfze.", x(31, 200, 1), X_RR;
    Addze = "addze", x(31, 202, 0), X_RR;
    AddzeDot = "addze.", x(31, 202, 1), X_RR;
    StdcxDot = "stdcx.", x(31, 214, 1), X_RRR;
    Stbx = "stbx", x(31, 215, 0), X_RRR;
    Stvx = "stvx", x(31, 231, 0), X_RRR;
    Subfme = "subfme", x(31, 232, 0), X_RR;
    SubfmeDot = "subfme.", x(31, 232, 1), X_RR;
    Mulld = "mulld", x(31, 233, 0), X_RRR;
    MulldDot = "mulld.", x(31, 233, 1), X_RRR;
    Addme = "addme", x(31, 234, 0), X_RR;
    AddmeDot = "addme.", x(31, 234, 1), X_RR;
    Mullw = "mullw", x(31, 235, 0), X_RRR;
    MullwDot = "mullw.", x(31, 235, 1), X_RRR;
    Dcbtst = "dcbtst", x(31, 246, 0), X_CACHE;
    Stbux = "stbux", x(31, 247, 0), X_RRR;
    Add = "add", x(31, 266, 0), X_RRR;
    AddDot = "add.", x(31, 266, 1), X_RRR;
    Dcbt = "dcbt", x(31, 278, 0), X_CACHE;
    Lhzx = "lhzx", x(31, 279, 0), X_RRR;
    Eqv = "eqv", x(31, 284, 0), X_LOGIC;
    EqvDot = "eqv.", x(31, 284, 1), X_LOGIC;
    Lhzux = "lhzux", x(31, 311, 0), X_RRR;
    Xor = "xor", x(31, 316, 0), X_LOGIC;
    XorDot = "xor.", x(31, 316, 1), X_LOGIC;
    Mfspr = "mfspr", x(31, 339, 0), XFX_MFSPR;
    Lwax = "lwax", x(31, 341, 0), X_RRR;
    Lhax = "lhax", x(31, 343, 0), X_RRR;
    Mftb = "mftb", x(31, 371, 0), XFX_MFSPR;
    Lwaux = "lwaux", x(31, 373, 0), X_RRR;
    Lhaux = "lhaux", x(31, 375, 0), X_RRR;
    Sthx = "sthx", x(31, 407, 0), X_RRR;
    Orc = "orc", x(31, 412, 0), X_LOGIC;
    OrcDot = "orc.", x(31, 412, 1), X_LOGIC;
    Sthux = "sthux", x(31, 439, 0), X_RRR;
    Or = "or", x(31, 444, 0), X_LOGIC;
    OrDot = "or.", x(31, 444, 1), X_LOGIC;
    Divdu = "divdu", x(31, 457, 0), X_RRR;
    Divwu = "divwu", x(31, 459, 0), X_RRR;
    DivwuDot = "divwu.", x(31, 459, 1), X_RRR;
    Mtspr = "mtspr", x(31, 467, 0), XFX_MTSPR;
    Nand = "nand", x(31, 476, 0), X_LOGIC;
    NandDot = "nand.", x(31, 476, 1), X_LOGIC;
    Divd = "divd", x(31, 489, 0), X_RRR;
    Divw = "divw", x(31, 491, 0), X_RRR;
    DivwDot = "divw.", x(31, 491, 1), X_RRR;
    Lvlx = "lvlx", x(31, 519, 0), X_RRR;
    Lwbrx = "lwbrx", x(31, 534, 0), X_RRR;
    Lfsx = "lfsx", x(31, 535, 0), X_RRR;
    Srw = "srw", x(31, 536, 0), X_LOGIC;
    SrwDot = "srw.", x(31, 536, 1), X_LOGIC;
    Srd = "srd", x(31, 539, 0), X_LOGIC;
    SrdDot = "srd.", x(31, 539, 1), X_LOGIC;
    Lvrx = "lvrx", x(31, 551, 0), X_RRR;
    Lfsux = "lfsux", x(31, 567, 0), X_RRR;
    Sync = "sync", x(31, 598, 0), X_SYNC;
    Lfdx = "lfdx", x(31, 599, 0), X_RRR;
    Lfdux = "lfdux", x(31, 631, 0), X_RRR;
    Stvlx = "stvlx", x(31, 647, 0), X_RRR;
    Stwbrx = "stwbrx", x(31, 662, 0), X_RRR;
    Stfsx = "stfsx", x(31, 663, 0), X_RRR;
    Stvrx = "stvrx", x(31, 679, 0), X_RRR;
    Stfsux = "stfsux", x(31, 695, 0), X_RRR;
    Stfdx = "stfdx", x(31, 727, 0), X_RRR;
    Stfdux = "stfdux", x(31, 759, 0), X_RRR;
    Lhbrx = "lhbrx", x(31, 790, 0), X_RRR;
    Sraw = "sraw", x(31, 792, 0), X_LOGIC;
    SrawDot = "sraw.", x(31, 792, 1), X_LOGIC;
    Srad = "srad", x(31, 794, 0), X_LOGIC;
    SradDot = "srad.", x(31, 794, 1), X_LOGIC;
    Srawi = "srawi", x(31, 824, 0), X_SHIFT_IMM;
    SrawiDot = "srawi.", x(31, 824, 1), X_SHIFT_IMM;
    Sradi = "sradi", xs(31, 413, 0), XS_SHIFT;
    SradiDot = "sradi.", xs(31, 413, 1), XS_SHIFT;
    Eieio = "eieio", x(31, 854, 0), NONE;
    Sthbrx = "sthbrx", x(31, 918, 0), X_RRR;
    Extsh = "extsh", x(31, 922, 0), X_UNARY;
    ExtshDot = "extsh.", x(31, 922, 1), X_UNARY;
    Extsb = "extsb", x(31, 954, 0), X_UNARY;
    ExtsbDot = "extsb.", x(31, 954, 1), X_UNARY;
    Icbi = "icbi", x(31, 982, 0), X_CACHE;
    Stfiwx = "stfiwx", x(31, 983, 0), X_RRR;
    Extsw = "extsw", x(31, 986, 0), X_UNARY;
    ExtswDot = "extsw.", x(31, 986, 1), X_UNARY;
    Dcbz = "dcbz", x(31, 1014, 0), X_CACHE;

    // Displacement loads and stores
    Lwz = "lwz", d(32), D_MEM;
    Lwzu = "lwzu", d(33), D_MEM;
    Lbz = "lbz", d(34), D_MEM;
    Lbzu = "lbzu", d(35), D_MEM;
    Stw = "stw", d(36), D_MEM;
    Stwu = "stwu", d(37), D_MEM;
    Stb = "stb", d(38), D_MEM;
    Stbu = "stbu", d(39), D_MEM;
    Lhz = "lhz", d(40), D_MEM;
    Lhzu = "lhzu", d(41), D_MEM;
    Lha = "lha", d(42), D_MEM;
    Lhau = "lhau", d(43), D_MEM;
    Sth = "sth", d(44), D_MEM;
    Sthu = "sthu", d(45), D_MEM;
    Lmw = "lmw", d(46), D_MEM;
    Stmw = "stmw", d(47), D_MEM;
    Lfs = "lfs", d(48), D_MEM;
    Lfsu = "lfsu", d(49), D_MEM;
    Lfd = "lfd", d(50), D_MEM;
    Lfdu = "lfdu", d(51), D_MEM;
    Stfs = "stfs", d(52), D_MEM;
    Stfsu = "stfsu", d(53), D_MEM;
    Stfd = "stfd", d(54), D_MEM;
    Stfdu = "stfdu", d(55), D_MEM;
    Ld = "ld", ds(58, 0), DS_MEM;
    Ldu = "ldu", ds(58, 1), DS_MEM;
    Lwa = "lwa", ds(58, 2), DS_MEM;
    Std = "std", ds(62, 0), DS_MEM;
    Stdu = "stdu", ds(62, 1), DS_MEM;

    // Single-precision floating point
    Fdivs = "fdivs", a(59, 18), A_FRR;
    Fsubs = "fsubs", a(59, 20), A_FRR;
    Fadds = "fadds", a(59, 21), A_FRR;
    Fsqrts = "fsqrts", a(59, 22), A_FB;
    Fres = "fres", a(59, 24), A_FB;
    Fmuls = "fmuls", a(59, 25), A_FRC;
    Fmsubs = "fmsubs", a(59, 28), A_FMA;
    Fmadds = "fmadds", a(59, 29), A_FMA;
    Fnmsubs = "fnmsubs", a(59, 30), A_FMA;
    Fnmadds = "fnmadds", a(59, 31), A_FMA;

    // Double-precision floating point
    Fcmpu = "fcmpu", x(63, 0, 0), X_FCMP;
    Frsp = "frsp", x(63, 12, 0), A_FB;
    Fctiw = "fctiw", x(63, 14, 0), A_FB;
    Fctiwz = "fctiwz", x(63, 15, 0), A_FB;
    Fdiv = "fdiv", a(63, 18), A_FRR;
    Fsub = "fsub", a(63, 20), A_FRR;
    Fadd = "fadd", a(63, 21), A_FRR;
    Fsqrt = "fsqrt", a(63, 22), A_FB;
    Fsel = "fsel", a(63, 23), A_FMA;
    Fmul = "fmul", a(63, 25), A_FRC;
    Frsqrte = "frsqrte", a(63, 26), A_FB;
    Fmsub = "fmsub", a(63, 28), A_FMA;
    Fmadd = "fmadd", a(63, 29), A_FMA;
    Fnmsub = "fnmsub", a(63, 30), A_FMA;
    Fnmadd = "fnmadd", a(63, 31), A_FMA;
    Fcmpo = "fcmpo", x(63, 32, 0), X_FCMP;
    Fneg = "fneg", x(63, 40, 0), A_FB;
    Fmr = "fmr", x(63, 72, 0), A_FB;
    Fnabs = "fnabs", x(63, 136, 0), A_FB;
    Fabs = "fabs", x(63, 264, 0), A_FB;
    Mffs = "mffs", x(63, 583, 0), X_RD;
    Mtfsf = "mtfsf", x(63, 711, 0), X_MTFSF;
    Fctid = "fctid", x(63, 814, 0), A_FB;
    Fctidz = "fctidz", x(63, 815, 0), A_FB;
    Fcfid = "fcfid", x(63, 846, 0), A_FB;

    // Vector unit (VX and VA forms of primary 4)
    Vaddfp = "vaddfp", vx(10), X_RRR;
    Vsubfp = "vsubfp", vx(74), X_RRR;
    Vmaxfp = "vmaxfp", vx(1034), X_RRR;
    Vminfp = "vminfp", vx(1098), X_RRR;
    Vand = "vand", vx(1028), X_RRR;
    Vandc = "vandc", vx(1092), X_RRR;
    Vor = "vor", vx(1156), X_RRR;
    Vxor = "vxor", vx(1220), X_RRR;
    Vnor = "vnor", vx(1284), X_RRR;
    Vspltw = "vspltw", vx(652), VX_SPLAT;
    Vspltisw = "vspltisw", vx(908), VX_SPLAT_IMM;
    Vsel = "vsel", va(42), VA_FORM;
    Vperm = "vperm", va(43), VA_FORM;
    Vsldoi = "vsldoi", va(44), VA_SLDOI;
    Vmaddfp = "vmaddfp", va(46), VA_MADD;
    Vnmsubfp = "vnmsubfp", va(47), VA_MADD;
}

impl Opcode {
    /// Record forms update CR0 from their result.
    ///
    /// Store-conditional forms carry a `.` too but set CR0 from the
    /// reservation instead; callers handle them separately.
    pub fn is_record(self) -> bool {
        self.mnemonic().ends_with('.')
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Assemble `opcode` with the given operand values.
///
/// Operands beyond the opcode's form are ignored; missing ones encode as 0.
pub fn encode(opcode: Opcode, operands: &[u32]) -> u32 {
    opcode
        .form()
        .iter()
        .zip(operands.iter().copied().chain(std::iter::repeat(0)))
        .fold(opcode.encoding().bits, |word, (operand, value)| operand.insert(word, value))
}

/// The PowerPC decoder.
#[derive(Debug, Clone)]
pub struct PpcDecoder {
    by_primary: Vec<Vec<Opcode>>,
}

impl PpcDecoder {
    /// Index the opcode table by primary opcode, most specific masks first.
    pub fn new() -> Self {
        let mut by_primary = vec![Vec::new(); 64];
        for &opcode in Opcode::ALL {
            by_primary[opcode.encoding().primary() as usize].push(opcode);
        }
        for group in &mut by_primary {
            group.sort_by_key(|op| Reverse(op.encoding().mask.count_ones()));
        }
        Self { by_primary }
    }

    /// Decode a byte-swapped instruction word located at `address`.
    pub fn decode_word(&self, word: u32, address: Address) -> Result<Instruction, DecodeError> {
        let primary = bf::OPCD.extract(word) as usize;
        self.by_primary[primary]
            .iter()
            .find(|op| op.encoding().matches(word))
            .map(|&opcode| Instruction {
                address,
                word,
                opcode,
                operands: opcode.form().iter().map(|operand| operand.extract(word)).collect(),
            })
            .ok_or(DecodeError { address, word })
    }
}

impl Default for PpcDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PpcDecoder {
    fn decode(&self, bytes: [u8; 4], address: Address) -> Result<Instruction, DecodeError> {
        self.decode_word(BigEndian::read_u32(&bytes), address)
    }
}
