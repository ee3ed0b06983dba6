//! Item heads: a major type plus its unsigned argument.

use std::cmp::Ordering;

/// CBOR major types, in the order their initial bytes sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Major {
    Unsigned = 0,
    Negative = 1,
    Bytes = 2,
    Text = 3,
    Array = 4,
    Map = 5,
    Tag = 6,
    Simple = 7,
}

impl Major {
    pub(crate) fn of(initial: u8) -> Self {
        match initial >> 5 {
            0 => Major::Unsigned,
            1 => Major::Negative,
            2 => Major::Bytes,
            3 => Major::Text,
            4 => Major::Array,
            5 => Major::Map,
            6 => Major::Tag,
            _ => Major::Simple,
        }
    }
}

pub(crate) const FALSE: u8 = 0xf4;
pub(crate) const TRUE: u8 = 0xf5;
pub(crate) const NULL: u8 = 0xf6;
pub(crate) const FLOAT64: u8 = 0xfb;

/// Number of bytes the shortest encoding of `arg` needs after the
/// initial byte.
pub(crate) fn argument_width(arg: u64) -> usize {
    match arg {
        0..=23 => 0,
        24..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xffff_ffff => 4,
        _ => 8,
    }
}

/// Appends the shortest head for `major` and `arg`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn write_head(out: &mut Vec<u8>, major: Major, arg: u64) {
    let mt = (major as u8) << 5;
    match argument_width(arg) {
        0 => out.push(mt | arg as u8),
        1 => out.extend_from_slice(&[mt | 24, arg as u8]),
        2 => {
            out.push(mt | 25);
            out.extend_from_slice(&(arg as u16).to_be_bytes());
        }
        4 => {
            out.push(mt | 26);
            out.extend_from_slice(&(arg as u32).to_be_bytes());
        }
        _ => {
            out.push(mt | 27);
            out.extend_from_slice(&arg.to_be_bytes());
        }
    }
}

/// Order of encoded map keys: shorter first, then bytewise.
pub(crate) fn key_order(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_switch_at_boundaries() {
        let cases = [
            (23, 0),
            (24, 1),
            (255, 1),
            (256, 2),
            (65_535, 2),
            (65_536, 4),
            (u64::from(u32::MAX), 4),
            (u64::from(u32::MAX) + 1, 8),
        ];
        for (arg, width) in cases {
            assert_eq!(argument_width(arg), width, "argument {arg}");
            let mut out = Vec::new();
            write_head(&mut out, Major::Unsigned, arg);
            assert_eq!(out.len(), width + 1);
        }
    }

    #[test]
    fn major_round_trips_through_initial_byte() {
        let mut out = Vec::new();
        write_head(&mut out, Major::Map, 3);
        assert_eq!(out, vec![0xa3]);
        assert_eq!(Major::of(out[0]), Major::Map);
        assert_eq!(Major::of(NULL), Major::Simple);
    }
}
