//! Hollerith punch patterns and card-BCD translation.
//!
//! The reader delivers 6-bit BCD codes to the channel; translation between
//! a column's hole pattern and its code is fixed by the hardware. Two
//! historical collisions are preserved: a blank column and a lone 12 punch
//! both read as 0o20 (space), and a lone 0 punch is the digit zero even
//! though row 0 otherwise acts as a zone.

use thiserror::Error;

/// There are 12 rows in total: 12, 11, and 0..9.
/// Each column's punched holes are a bitmask in a `u16`:
/// bit0 = row 0, bit1 = row 1, ..., bit9 = row 9, bit10 = row 11, bit11 = row 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PunchMask(pub u16);

impl std::ops::BitOr for PunchMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        PunchMask(self.0 | rhs.0)
    }
}

/// Code substituted for an unreadable column under the flagged-fallback
/// policy: the 8-7 multi-punch.
pub const SUBSTITUTE_CODE: u8 = 0o17;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("unsupported character: '{0}' (U+{1:04X})")]
    Unsupported(char, u32),
}

/// Bit utilities: rows 0..9
pub fn row_mask(row: usize) -> PunchMask {
    PunchMask(1u16 << row)
}
pub fn zone11() -> PunchMask {
    PunchMask(1u16 << 10)
}
pub fn zone12() -> PunchMask {
    PunchMask(1u16 << 11)
}

/// Converts a column's punch pattern to its 6-bit BCD code.
///
/// Zone punches (12, 11, 0) contribute the high octal digit (20, 40, 60);
/// rows 1..9 contribute the low digit, with row 8 combining with one other
/// row for codes 0o11..0o17. Returns `None` for patterns the hardware
/// cannot resolve: two zone rows, two digit rows besides 8, or 8-9.
pub fn punches_to_bcd(mask: PunchMask) -> Option<u8> {
    let hol = mask.0;
    if hol == 0 {
        return Some(0o20); // blank column reads as space
    }
    if hol == 0x001 {
        return Some(0o00); // a lone 0 punch is the digit zero
    }
    let zone = match hol & 0xC01 {
        0x000 => 0o00,
        0x800 => 0o20, // row 12
        0x400 => 0o40, // row 11
        0x001 => 0o60, // row 0
        _ => return None,
    };
    let mut digits = hol & 0x3FE;
    let mut digit = 0u8;
    if digits & 0x100 != 0 {
        digit = 8;
        digits &= !0x100;
    }
    if digits != 0 {
        if !digits.is_power_of_two() {
            return None;
        }
        let row = digits.trailing_zeros() as u8;
        if digit != 0 && row == 9 {
            return None; // 8-9 has no code
        }
        digit += row;
    }
    Some(zone | digit)
}

/// Converts a 6-bit BCD code to its canonical punch pattern.
/// Total: every code punches something, though the collisions noted in the
/// module docs make the pair of conversions asymmetric at 0o20 and 0o60.
pub fn bcd_to_punches(code: u8) -> PunchMask {
    let code = code & 0o77;
    if code == 0o00 {
        return row_mask(0);
    }
    if code == 0o20 {
        return PunchMask(0);
    }
    let mut mask = match code & 0o60 {
        0o20 => zone12(),
        0o40 => zone11(),
        0o60 => row_mask(0),
        _ => PunchMask(0),
    };
    let mut digit = code & 0o17;
    if digit > 9 {
        mask = mask | row_mask(8);
        digit -= 8;
    }
    if digit != 0 {
        mask = mask | row_mask(digit as usize);
    }
    mask
}

/// Printable glyph for each BCD code in the commercial print set; `None`
/// marks codes with no glyph.
const CHARSET: [Option<char>; 64] = [
    Some('0'), Some('1'), Some('2'), Some('3'), Some('4'), Some('5'), Some('6'), Some('7'),
    Some('8'), Some('9'), None,      Some('='), Some('@'), Some(':'), Some('>'), Some('"'),
    Some(' '), Some('A'), Some('B'), Some('C'), Some('D'), Some('E'), Some('F'), Some('G'),
    Some('H'), Some('I'), Some('?'), Some('.'), Some(')'), None,      Some('<'), None,
    Some('-'), Some('J'), Some('K'), Some('L'), Some('M'), Some('N'), Some('O'), Some('P'),
    Some('Q'), Some('R'), Some('!'), Some('$'), Some('*'), None,      Some(';'), None,
    None,      Some('/'), Some('S'), Some('T'), Some('U'), Some('V'), Some('W'), Some('X'),
    Some('Y'), Some('Z'), None,      Some(','), Some('('), None,      None,      None,
];

pub fn bcd_to_char(code: u8) -> Option<char> {
    CHARSET[(code & 0o77) as usize]
}

/// Looks up the BCD code for a character, folding lowercase letters.
pub fn char_to_bcd(ch: char) -> Result<u8, EncodeError> {
    let up = if ch.is_ascii_lowercase() {
        ch.to_ascii_uppercase()
    } else {
        ch
    };
    CHARSET
        .iter()
        .position(|&c| c == Some(up))
        .map(|code| code as u8)
        .ok_or(EncodeError::Unsupported(ch, ch as u32))
}

/// Renders a delivered record as text; codes without a glyph appear as `~`.
pub fn decode_record(codes: &[u8]) -> String {
    codes.iter().map(|&c| bcd_to_char(c).unwrap_or('~')).collect()
}
