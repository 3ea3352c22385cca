use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Neg, Not, Sub};
use std::str::FromStr;

use thiserror::Error;

/// A 32-bit two's-complement machine word.
///
/// All arithmetic wraps at 32 bits. Ordering (`Ord`) is signed; use
/// [`Binary::lt_unsigned`] for the unsigned comparison `sltu` needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Binary(u32);

impl Binary {
    pub const ZERO: Binary = Binary(0);
    pub const ONE: Binary = Binary(1);

    pub const fn from_bits(bits: u32) -> Self {
        Binary(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn to_i32(self) -> i32 {
        self.0 as i32
    }

    pub fn lt_unsigned(self, other: Binary) -> bool {
        self.0 < other.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn from_bool(b: bool) -> Self {
        if b { Binary::ONE } else { Binary::ZERO }
    }

    /// Bit string, most significant bit first.
    pub fn to_bit_string(self) -> String {
        format!("{:032b}", self.0)
    }
}

impl From<i32> for Binary {
    fn from(v: i32) -> Self {
        Binary(v as u32)
    }
}

impl From<u32> for Binary {
    fn from(v: u32) -> Self {
        Binary(v)
    }
}

impl From<bool> for Binary {
    fn from(v: bool) -> Self {
        Binary::from_bool(v)
    }
}

impl From<Binary> for i32 {
    fn from(b: Binary) -> Self {
        b.to_i32()
    }
}

impl From<Binary> for i64 {
    fn from(b: Binary) -> Self {
        b.to_i32() as i64
    }
}

impl Add for Binary {
    type Output = Binary;
    fn add(self, rhs: Binary) -> Binary {
        Binary(self.0.wrapping_add(rhs.0))
    }
}

impl Add<i32> for Binary {
    type Output = Binary;
    fn add(self, rhs: i32) -> Binary {
        self + Binary::from(rhs)
    }
}

impl Sub for Binary {
    type Output = Binary;
    fn sub(self, rhs: Binary) -> Binary {
        // two's complement: a - b == a + !b + 1
        self + (!rhs + Binary::ONE)
    }
}

impl Sub<i32> for Binary {
    type Output = Binary;
    fn sub(self, rhs: i32) -> Binary {
        self - Binary::from(rhs)
    }
}

impl Mul for Binary {
    type Output = Binary;
    fn mul(self, rhs: Binary) -> Binary {
        Binary(self.0.wrapping_mul(rhs.0))
    }
}

/// Signed division with RISC-V edge cases: `x / 0 == -1` and
/// `i32::MIN / -1 == i32::MIN`.
impl Div for Binary {
    type Output = Binary;
    fn div(self, rhs: Binary) -> Binary {
        if rhs.is_zero() {
            return Binary::from(-1);
        }
        Binary::from(self.to_i32().wrapping_div(rhs.to_i32()))
    }
}

impl Neg for Binary {
    type Output = Binary;
    fn neg(self) -> Binary {
        Binary::ZERO - self
    }
}

impl Not for Binary {
    type Output = Binary;
    fn not(self) -> Binary {
        Binary(!self.0)
    }
}

impl BitAnd for Binary {
    type Output = Binary;
    fn bitand(self, rhs: Binary) -> Binary {
        Binary(self.0 & rhs.0)
    }
}

impl BitOr for Binary {
    type Output = Binary;
    fn bitor(self, rhs: Binary) -> Binary {
        Binary(self.0 | rhs.0)
    }
}

impl BitXor for Binary {
    type Output = Binary;
    fn bitxor(self, rhs: Binary) -> Binary {
        Binary(self.0 ^ rhs.0)
    }
}

impl PartialOrd for Binary {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Binary {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_i32().cmp(&other.to_i32())
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_i32())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid immediate '{0}'")]
pub struct ParseBinaryError(pub String);

impl FromStr for Binary {
    type Err = ParseBinaryError;

    /// Accepts decimal (`-12`) and hex (`0x1f`, `-0x1f`) immediates.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseBinaryError(s.to_string());
        let (neg, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let magnitude = if let Some(hex) = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            i64::from_str_radix(hex, 16).map_err(|_| err())?
        } else {
            digits.parse::<i64>().map_err(|_| err())?
        };
        let value = if neg { -magnitude } else { magnitude };
        // hex literals may spell the full unsigned range
        if let Ok(v) = i32::try_from(value) {
            Ok(Binary::from(v))
        } else if let Ok(v) = u32::try_from(value) {
            Ok(Binary::from(v))
        } else {
            Err(err())
        }
    }
}
