//! Bit-field extraction for 32-bit PowerPC instruction words.
//!
//! Bit numbering follows the ISA manual: bit 0 is the most significant bit
//! of the word, bit 31 the least significant.

/// Descriptor for one field of an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
    /// First bit of the field (0 = MSB)
    pub start: u8,
    /// Width of the field in bits
    pub len: u8,
    /// Whether the extracted value is sign-extended to 32 bits
    pub signed: bool,
    /// Left shift applied after extraction (negative = right shift)
    pub shift: i8,
}

impl Field {
    /// Unsigned, unshifted field.
    pub const fn new(start: u8, len: u8) -> Self {
        Self { start, len, signed: false, shift: 0 }
    }

    /// Sign-extended, unshifted field.
    pub const fn signed(start: u8, len: u8) -> Self {
        Self { start, len, signed: true, shift: 0 }
    }

    /// Sign-extended field scaled by `1 << shift` (branch and DS displacements).
    pub const fn scaled(start: u8, len: u8, shift: i8) -> Self {
        Self { start, len, signed: true, shift }
    }

    const fn mask(self) -> u32 {
        if self.len >= 32 {
            u32::MAX
        } else {
            (1u32 << self.len) - 1
        }
    }

    const fn lsb(self) -> u32 {
        32 - self.start as u32 - self.len as u32
    }

    /// Read the field out of `word`.
    pub fn extract(self, word: u32) -> u32 {
        if self.len == 0 {
            return 0;
        }
        let mut value = (word >> self.lsb()) & self.mask();
        if self.signed && self.len < 32 && value & (1 << (self.len - 1)) != 0 {
            value |= !self.mask();
        }
        match self.shift {
            s if s > 0 => value << s,
            s if s < 0 => {
                let amount = (-s) as u32;
                if self.signed {
                    ((value as i32) >> amount) as u32
                } else {
                    value >> amount
                }
            }
            _ => value,
        }
    }

    /// Write `value` into the field's bit positions of `word`.
    ///
    /// Inverse of [`Field::extract`] for every value that `extract` can produce.
    pub fn insert(self, word: u32, value: u32) -> u32 {
        if self.len == 0 {
            return word;
        }
        let raw = match self.shift {
            s if s > 0 => value >> s,
            s if s < 0 => value << (-s) as u32,
            _ => value,
        };
        let shifted = (raw & self.mask()) << self.lsb();
        (word & !(self.mask() << self.lsb())) | shifted
    }
}

// Common instruction fields.
pub const OPCD: Field = Field::new(0, 6);
pub const RD: Field = Field::new(6, 5);
pub const RS: Field = RD;
pub const RA: Field = Field::new(11, 5);
pub const RB: Field = Field::new(16, 5);
pub const RC: Field = Field::new(21, 5);
pub const SIMM: Field = Field::signed(16, 16);
pub const UIMM: Field = Field::new(16, 16);
pub const DS: Field = Field::scaled(16, 14, 2);
pub const LI: Field = Field::scaled(6, 24, 2);
pub const BD: Field = Field::scaled(16, 14, 2);
pub const BO: Field = Field::new(6, 5);
pub const BI: Field = Field::new(11, 5);
pub const CRFD: Field = Field::new(6, 3);
pub const CRFS: Field = Field::new(11, 3);
pub const L: Field = Field::new(10, 1);
pub const L15: Field = Field::new(15, 1);
pub const SYNC_L: Field = Field::new(9, 2);
pub const SH: Field = Field::new(16, 5);
pub const MB: Field = Field::new(21, 5);
pub const ME: Field = Field::new(26, 5);
pub const CRM: Field = Field::new(12, 8);
pub const FM: Field = Field::new(7, 8);
pub const TO: Field = Field::new(6, 5);
pub const CRBD: Field = Field::new(6, 5);
pub const CRBA: Field = Field::new(11, 5);
pub const CRBB: Field = Field::new(16, 5);
pub const VUIMM: Field = Field::new(11, 5);
pub const VSIMM: Field = Field::signed(11, 5);
pub const VSHB: Field = Field::new(22, 4);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn reference(word: u32, start: u8, len: u8) -> u32 {
        let shifted = (word as u64) << start;
        ((shifted & 0xFFFF_FFFF) >> (32 - len)) as u32
    }

    #[test]
    fn test_matches_reference_shift_mask() {
        let words = [0u32, 0xFFFF_FFFF, 0x3860_FFFF, 0x4E80_0020, 0x8000_0001, 0x1234_5678];
        for &word in &words {
            for start in 0u8..32 {
                for len in 1u8..=(32 - start) {
                    let field = Field::new(start, len);
                    assert_eq!(
                        field.extract(word),
                        reference(word, start, len),
                        "word {:08x} start {} len {}",
                        word,
                        start,
                        len
                    );
                }
            }
        }
    }

    #[test]
    fn test_sign_extension_only_when_sign_bit_set() {
        for start in 0u8..32 {
            for len in 1u8..=(32 - start) {
                let unsigned = Field::new(start, len);
                let signed = Field::signed(start, len);
                for &word in &[0x7FFF_7FFFu32, 0x8000_8000, 0xFFFF_FFFF, 0x0F0F_F0F0] {
                    let u = unsigned.extract(word);
                    let s = signed.extract(word);
                    let sign_bit = u >> (len - 1) & 1;
                    if sign_bit == 0 || len == 32 {
                        assert_eq!(u, s);
                    } else {
                        assert_ne!(u, s);
                        assert_eq!(s & unsigned_mask(len), u);
                    }
                }
            }
        }
    }

    fn unsigned_mask(len: u8) -> u32 {
        if len == 32 { u32::MAX } else { (1 << len) - 1 }
    }

    #[rstest]
    #[case(0x3860_FFFF, SIMM, 0xFFFF_FFFF)] // li r3,-1
    #[case(0x3860_0010, SIMM, 0x10)]
    #[case(0x4BFF_FFFC, LI, (-4i32) as u32)] // b .-4
    #[case(0x4800_0008, LI, 8)]
    #[case(0x4182_FFF8, BD, (-8i32) as u32)] // beq .-8
    #[case(0xE9C1_FF68, DS, (-0x98i32) as u32)] // ld r14,-0x98(r1)
    #[case(0x4E80_0020, BO, 20)] // blr
    fn test_isa_fields(#[case] word: u32, #[case] field: Field, #[case] expected: u32) {
        assert_eq!(field.extract(word), expected);
    }

    #[test]
    fn test_right_shift_sign_extends_first() {
        let field = Field::scaled(16, 16, -4);
        assert_eq!(field.extract(0x0000_FFF0), 0xFFFF_FFFF);
        let unsigned = Field { signed: false, ..field };
        assert_eq!(unsigned.extract(0x0000_FFF0), 0x0FFF);
    }

    #[test]
    fn test_insert_inverts_extract() {
        let fields = [RD, RA, RB, SIMM, UIMM, DS, LI, BD, CRFD, SH, MB, ME, CRM];
        for field in fields {
            for &word in &[0u32, 0xFFFF_FFFF, 0x1234_5678, 0x8765_4321] {
                let value = field.extract(word);
                assert_eq!(field.extract(field.insert(0, value)), value);
            }
        }
    }
}
