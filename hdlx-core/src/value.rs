#![forbid(unsafe_code)]

use std::fmt;

use hdlx_ast::{BinOp, Builtin, FormatPreference, ItemId, UnOp};

use crate::error::ValueError;

/// Widest bit vector a value can hold.
pub const MAX_BIT_WIDTH: u32 = 128;

/// Index of a channel in the owning proc network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(pub u32);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FunctionRef {
    Builtin(Builtin),
    User {
        module: String,
        item: ItemId,
        name: String,
    },
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionRef::Builtin(b) => write!(f, "{b}"),
            FunctionRef::User { module, name, .. } => write!(f, "{module}::{name}"),
        }
    }
}

/// Runtime and compile-time value. Bit vectors keep their magnitude masked
/// to `width` bits.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InterpValue {
    Bits { signed: bool, width: u32, value: u128 },
    Array(Vec<InterpValue>),
    Tuple(Vec<InterpValue>),
    Token,
    Channel(ChannelHandle),
    Function(FunctionRef),
}

pub fn mask(width: u32) -> u128 {
    if width >= MAX_BIT_WIDTH {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

/// Resolves `x[start:limit]` against a `width`-bit value: negative bounds
/// count from the top, both are clamped to `[0, width]`. Returns
/// `(start, width)` of the result.
pub fn slice_bounds(start: Option<i128>, limit: Option<i128>, width: u64) -> (u64, u64) {
    let w = width as i128;
    let resolve = |b: i128| if b < 0 { (w + b).max(0) } else { b.min(w) };
    let s = start.map(resolve).unwrap_or(0);
    let l = limit.map(resolve).unwrap_or(w);
    (s as u64, (l - s).max(0) as u64)
}

fn sign_extend(value: u128, width: u32) -> i128 {
    if width == 0 {
        return 0;
    }
    if width >= MAX_BIT_WIDTH {
        return value as i128;
    }
    if value >> (width - 1) & 1 == 1 {
        (value | !mask(width)) as i128
    } else {
        value as i128
    }
}

fn type_name(signed: bool, width: u32) -> String {
    format!("{}{}", if signed { "s" } else { "u" }, width)
}

impl InterpValue {
    pub fn bits(signed: bool, width: u32, value: u128) -> Self {
        InterpValue::Bits {
            signed,
            width,
            value: value & mask(width),
        }
    }

    pub fn ubits(width: u32, value: u128) -> Self {
        Self::bits(false, width, value)
    }

    pub fn sbits(width: u32, value: i128) -> Self {
        Self::bits(true, width, value as u128)
    }

    pub fn bool(b: bool) -> Self {
        Self::ubits(1, b as u128)
    }

    pub fn u32(v: u32) -> Self {
        Self::ubits(32, v as u128)
    }

    pub fn unit() -> Self {
        InterpValue::Tuple(Vec::new())
    }

    /// Parses literal text (`0xff`, `0b1_0`, `-3`, `true`) into a value of
    /// the given bit type, rejecting literals that do not fit.
    pub fn from_literal(text: &str, signed: bool, width: u32) -> Result<Self, ValueError> {
        let magnitude_text = text.strip_prefix('-');
        let negative = magnitude_text.is_some();
        let body = magnitude_text.unwrap_or(text);
        let magnitude = match body {
            "true" => 1,
            "false" => 0,
            _ => parse_magnitude(body)?,
        };
        let ty = type_name(signed, width);
        let does_not_fit = || ValueError::new(format!("Value '{text}' does not fit in the type {ty}"));
        if negative {
            if !signed {
                return Err(does_not_fit());
            }
            // Allowed down to -2^(width-1).
            let limit = if width == 0 { 0 } else { 1u128 << (width - 1).min(127) };
            if magnitude > limit || (width == 0 && magnitude != 0) {
                return Err(does_not_fit());
            }
            Ok(Self::bits(true, width, magnitude.wrapping_neg()))
        } else {
            if magnitude > mask(width) {
                return Err(does_not_fit());
            }
            Ok(Self::bits(signed, width, magnitude))
        }
    }

    pub fn is_bits(&self) -> bool {
        matches!(self, InterpValue::Bits { .. })
    }

    pub fn as_bits(&self) -> Result<(bool, u32, u128), ValueError> {
        match self {
            InterpValue::Bits { signed, width, value } => Ok((*signed, *width, *value)),
            other => Err(ValueError::new(format!("expected a bits value, got {other}"))),
        }
    }

    pub fn bit_count(&self) -> Result<u32, ValueError> {
        match self {
            InterpValue::Bits { width, .. } => Ok(*width),
            InterpValue::Array(items) | InterpValue::Tuple(items) => {
                items.iter().map(|v| v.bit_count()).sum()
            }
            other => Err(ValueError::new(format!("{other} has no bit width"))),
        }
    }

    pub fn is_true(&self) -> Result<bool, ValueError> {
        let (_, width, value) = self.as_bits()?;
        if width != 1 {
            return Err(ValueError::new(format!("expected a u1 value, got {self}")));
        }
        Ok(value == 1)
    }

    /// Magnitude as u64, failing for wider values.
    pub fn as_u64(&self) -> Result<u64, ValueError> {
        let (_, _, value) = self.as_bits()?;
        u64::try_from(value).map_err(|_| ValueError::new(format!("{self} does not fit in 64 bits")))
    }

    /// Value interpreted per its own signedness.
    pub fn as_i128(&self) -> Result<i128, ValueError> {
        let (signed, width, value) = self.as_bits()?;
        if signed {
            Ok(sign_extend(value, width))
        } else {
            i128::try_from(value).map_err(|_| ValueError::new(format!("{self} does not fit in 127 bits")))
        }
    }

    pub fn elements(&self) -> Result<&[InterpValue], ValueError> {
        match self {
            InterpValue::Array(items) | InterpValue::Tuple(items) => Ok(items),
            other => Err(ValueError::new(format!("expected an aggregate, got {other}"))),
        }
    }

    pub fn channel(&self) -> Result<ChannelHandle, ValueError> {
        match self {
            InterpValue::Channel(c) => Ok(*c),
            other => Err(ValueError::new(format!("expected a channel, got {other}"))),
        }
    }

    fn same_bits(&self, other: &InterpValue, op: &str) -> Result<(bool, u32, u128, u128), ValueError> {
        let (ls, lw, lv) = self.as_bits()?;
        let (rs, rw, rv) = other.as_bits()?;
        if ls != rs || lw != rw {
            return Err(ValueError::new(format!(
                "operands of '{op}' differ: {} vs {}",
                type_name(ls, lw),
                type_name(rs, rw)
            )));
        }
        Ok((ls, lw, lv, rv))
    }

    pub fn add(&self, rhs: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, a, b) = self.same_bits(rhs, "+")?;
        Ok(Self::bits(s, w, a.wrapping_add(b)))
    }

    pub fn sub(&self, rhs: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, a, b) = self.same_bits(rhs, "-")?;
        Ok(Self::bits(s, w, a.wrapping_sub(b)))
    }

    pub fn mul(&self, rhs: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, a, b) = self.same_bits(rhs, "*")?;
        Ok(Self::bits(s, w, a.wrapping_mul(b)))
    }

    pub fn div(&self, rhs: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, a, b) = self.same_bits(rhs, "/")?;
        if b == 0 {
            return Err(ValueError::new("division by zero"));
        }
        if s {
            let q = sign_extend(a, w).wrapping_div(sign_extend(b, w));
            Ok(Self::bits(s, w, q as u128))
        } else {
            Ok(Self::bits(s, w, a / b))
        }
    }

    pub fn rem(&self, rhs: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, a, b) = self.same_bits(rhs, "%")?;
        if b == 0 {
            return Err(ValueError::new("division by zero"));
        }
        if s {
            let r = sign_extend(a, w).wrapping_rem(sign_extend(b, w));
            Ok(Self::bits(s, w, r as u128))
        } else {
            Ok(Self::bits(s, w, a % b))
        }
    }

    pub fn bitand(&self, rhs: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, a, b) = self.same_bits(rhs, "&")?;
        Ok(Self::bits(s, w, a & b))
    }

    pub fn bitor(&self, rhs: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, a, b) = self.same_bits(rhs, "|")?;
        Ok(Self::bits(s, w, a | b))
    }

    pub fn bitxor(&self, rhs: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, a, b) = self.same_bits(rhs, "^")?;
        Ok(Self::bits(s, w, a ^ b))
    }

    fn shift_amount(amount: &InterpValue) -> Result<u128, ValueError> {
        let (signed, width, value) = amount.as_bits()?;
        if signed && sign_extend(value, width) < 0 {
            return Err(ValueError::new("shift amount is negative"));
        }
        Ok(value)
    }

    pub fn shl(&self, amount: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, v) = self.as_bits()?;
        let n = Self::shift_amount(amount)?;
        if n >= w as u128 {
            return Ok(Self::bits(s, w, 0));
        }
        Ok(Self::bits(s, w, v << n))
    }

    /// Logical shift for unsigned values, arithmetic for signed ones.
    pub fn shr(&self, amount: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, v) = self.as_bits()?;
        let n = Self::shift_amount(amount)?;
        if s {
            let x = sign_extend(v, w);
            let shifted = if n >= w as u128 {
                if x < 0 { -1 } else { 0 }
            } else {
                x >> n
            };
            return Ok(Self::bits(s, w, shifted as u128));
        }
        if n >= w as u128 {
            return Ok(Self::bits(s, w, 0));
        }
        Ok(Self::bits(s, w, v >> n))
    }

    /// `a ++ b`: bit vectors put `a` in the high bits; arrays append.
    pub fn concat(&self, rhs: &InterpValue) -> Result<InterpValue, ValueError> {
        match (self, rhs) {
            (InterpValue::Array(a), InterpValue::Array(b)) => {
                Ok(InterpValue::Array(a.iter().chain(b).cloned().collect()))
            }
            _ => {
                let (_, lw, lv) = self.as_bits()?;
                let (_, rw, rv) = rhs.as_bits()?;
                let width = lw + rw;
                if width > MAX_BIT_WIDTH {
                    return Err(ValueError::new(format!(
                        "concatenation produces {width} bits; at most {MAX_BIT_WIDTH} are supported"
                    )));
                }
                let high = if rw >= MAX_BIT_WIDTH { 0 } else { lv << rw };
                Ok(Self::ubits(width, high | rv))
            }
        }
    }

    fn compare(&self, rhs: &InterpValue, op: &str) -> Result<std::cmp::Ordering, ValueError> {
        let (s, w, a, b) = self.same_bits(rhs, op)?;
        if s {
            Ok(sign_extend(a, w).cmp(&sign_extend(b, w)))
        } else {
            Ok(a.cmp(&b))
        }
    }

    pub fn binop(op: BinOp, lhs: &InterpValue, rhs: &InterpValue) -> Result<InterpValue, ValueError> {
        use std::cmp::Ordering::*;
        match op {
            BinOp::Add => lhs.add(rhs),
            BinOp::Sub => lhs.sub(rhs),
            BinOp::Mul => lhs.mul(rhs),
            BinOp::Div => lhs.div(rhs),
            BinOp::Mod => lhs.rem(rhs),
            BinOp::Shl => lhs.shl(rhs),
            BinOp::Shr => lhs.shr(rhs),
            BinOp::Concat => lhs.concat(rhs),
            BinOp::BitAnd | BinOp::And => lhs.bitand(rhs),
            BinOp::BitOr | BinOp::Or => lhs.bitor(rhs),
            BinOp::BitXor => lhs.bitxor(rhs),
            BinOp::Eq => Ok(Self::bool(lhs == rhs)),
            BinOp::Ne => Ok(Self::bool(lhs != rhs)),
            BinOp::Lt => Ok(Self::bool(lhs.compare(rhs, "<")? == Less)),
            BinOp::Le => Ok(Self::bool(lhs.compare(rhs, "<=")? != Greater)),
            BinOp::Gt => Ok(Self::bool(lhs.compare(rhs, ">")? == Greater)),
            BinOp::Ge => Ok(Self::bool(lhs.compare(rhs, ">=")? != Less)),
        }
    }

    pub fn unop(op: UnOp, operand: &InterpValue) -> Result<InterpValue, ValueError> {
        let (s, w, v) = operand.as_bits()?;
        Ok(match op {
            UnOp::Invert => Self::bits(s, w, !v),
            UnOp::Negate => Self::bits(s, w, v.wrapping_neg()),
        })
    }

    /// Truncates or extends to `width`; extension follows the source's
    /// signedness.
    pub fn cast_bits(&self, signed: bool, width: u32) -> Result<InterpValue, ValueError> {
        let (s, w, v) = self.as_bits()?;
        let extended = if s && width > w {
            sign_extend(v, w) as u128
        } else {
            v
        };
        Ok(Self::bits(signed, width, extended))
    }

    /// Flattens bits, arrays, and tuples into one vector; the first element
    /// lands in the most significant bits.
    pub fn flatten(&self) -> Result<InterpValue, ValueError> {
        match self {
            InterpValue::Bits { width, value, .. } => Ok(Self::ubits(*width, *value)),
            InterpValue::Array(items) | InterpValue::Tuple(items) => {
                let mut acc = Self::ubits(0, 0);
                for item in items {
                    acc = acc.concat(&item.flatten()?)?;
                }
                Ok(acc)
            }
            other => Err(ValueError::new(format!("{other} cannot be flattened to bits"))),
        }
    }

    /// Splits a bit vector into `count` elements of `elem_width` bits,
    /// most significant first.
    pub fn unflatten_array(
        &self,
        count: u64,
        elem_signed: bool,
        elem_width: u32,
    ) -> Result<InterpValue, ValueError> {
        let (_, w, v) = self.as_bits()?;
        if (elem_width as u64).saturating_mul(count) != w as u64 {
            return Err(ValueError::new(format!(
                "cannot split {w} bits into {count} elements of {elem_width} bits"
            )));
        }
        let mut items = Vec::with_capacity(count as usize);
        for i in (0..count).rev() {
            let shift = i as u32 * elem_width;
            let part = if shift >= MAX_BIT_WIDTH { 0 } else { v >> shift };
            items.push(Self::bits(elem_signed, elem_width, part));
        }
        Ok(InterpValue::Array(items))
    }

    /// `width` bits starting at bit `start`; bits past the top read as zero.
    pub fn slice(&self, start: u128, width: u32) -> Result<InterpValue, ValueError> {
        let (_, _, v) = self.as_bits()?;
        let shifted = if start >= MAX_BIT_WIDTH as u128 { 0 } else { v >> start };
        Ok(Self::ubits(width, shifted))
    }

    pub fn index(&self, index: &InterpValue) -> Result<InterpValue, ValueError> {
        let items = match self {
            InterpValue::Array(items) => items,
            other => return Err(ValueError::new(format!("cannot index into {other}"))),
        };
        let (_, _, i) = index.as_bits()?;
        usize::try_from(i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| {
                ValueError::new(format!(
                    "index {i} is out of bounds for an array of size {}",
                    items.len()
                ))
            })
    }

    pub fn tuple_index(&self, index: u64) -> Result<InterpValue, ValueError> {
        let items = self.elements()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| {
                ValueError::new(format!(
                    "tuple index {index} is out of range for {} element(s)",
                    items.len()
                ))
            })
    }

    /// Copy of the array with element `index` replaced; out-of-range
    /// indices leave the array unchanged.
    pub fn update(&self, index: &InterpValue, value: InterpValue) -> Result<InterpValue, ValueError> {
        let mut items = match self {
            InterpValue::Array(items) => items.clone(),
            other => return Err(ValueError::new(format!("cannot update {other}"))),
        };
        let (_, _, i) = index.as_bits()?;
        if let Some(slot) = usize::try_from(i).ok().and_then(|i| items.get_mut(i)) {
            *slot = value;
        }
        Ok(InterpValue::Array(items))
    }

    /// Renders the value for `trace_fmt!` with the given placeholder style.
    pub fn format(&self, pref: FormatPreference) -> String {
        let mut out = String::new();
        self.format_into(pref, &mut out);
        out
    }

    fn format_into(&self, pref: FormatPreference, out: &mut String) {
        match self {
            InterpValue::Bits { signed, width, value } => match pref {
                FormatPreference::Hex => out.push_str(&format!("{value:#x}")),
                FormatPreference::Binary => out.push_str(&format!("{value:#b}")),
                FormatPreference::Default | FormatPreference::Decimal => {
                    if *signed {
                        out.push_str(&sign_extend(*value, *width).to_string());
                    } else {
                        out.push_str(&value.to_string());
                    }
                }
            },
            InterpValue::Array(items) | InterpValue::Tuple(items) => {
                let (open, close) = if matches!(self, InterpValue::Array(_)) {
                    ('[', ']')
                } else {
                    ('(', ')')
                };
                out.push(open);
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.format_into(pref, out);
                }
                out.push(close);
            }
            other => out.push_str(&other.to_string()),
        }
    }
}

fn parse_magnitude(text: &str) -> Result<u128, ValueError> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let (digits, radix) = if let Some(rest) = cleaned.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = cleaned.strip_prefix("0b") {
        (rest, 2)
    } else {
        (cleaned.as_str(), 10)
    };
    u128::from_str_radix(digits, radix)
        .map_err(|_| ValueError::new(format!("Value '{text}' is not a valid number of at most 128 bits")))
}

impl fmt::Display for InterpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpValue::Bits { signed, width, value } => {
                let prefix = if *signed { 's' } else { 'u' };
                if *width > 64 {
                    write!(f, "{prefix}{width}:{value:#x}")
                } else if *signed {
                    write!(f, "{prefix}{width}:{}", sign_extend(*value, *width))
                } else {
                    write!(f, "{prefix}{width}:{value}")
                }
            }
            InterpValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            InterpValue::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            InterpValue::Token => write!(f, "token"),
            InterpValue::Channel(c) => write!(f, "channel#{}", c.0),
            InterpValue::Function(FunctionRef::Builtin(b)) => write!(f, "builtin:{b}"),
            InterpValue::Function(r) => write!(f, "fn {r}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn literals_respect_width() {
        assert_eq!(InterpValue::from_literal("255", false, 8), Ok(InterpValue::ubits(8, 255)));
        assert!(InterpValue::from_literal("256", false, 8).is_err());
        assert_eq!(
            InterpValue::from_literal("-1", true, 8).map(|v| v.to_string()),
            Ok("s8:-1".to_string())
        );
        assert_eq!(
            InterpValue::from_literal("-128", true, 8).map(|v| v.to_string()),
            Ok("s8:-128".to_string())
        );
        assert!(InterpValue::from_literal("-129", true, 8).is_err());
        assert!(InterpValue::from_literal("-1", false, 8).is_err());
        assert_eq!(InterpValue::from_literal("0xdead_beef", false, 32), Ok(InterpValue::ubits(32, 0xdead_beef)));
        assert_eq!(InterpValue::from_literal("true", false, 1), Ok(InterpValue::bool(true)));
    }

    #[test]
    fn slice_bounds_wrap_negative_and_clamp() {
        assert_eq!(slice_bounds(Some(2), Some(6), 8), (2, 4));
        assert_eq!(slice_bounds(Some(-2), None, 8), (6, 2));
        assert_eq!(slice_bounds(None, Some(-1), 8), (0, 7));
        assert_eq!(slice_bounds(Some(6), Some(2), 8), (6, 0));
        assert_eq!(slice_bounds(Some(-20), Some(100), 8), (0, 8));
    }

    #[test]
    fn signed_shift_right_is_arithmetic() {
        let v = InterpValue::sbits(8, -8);
        assert_eq!(v.shr(&InterpValue::u32(1)).unwrap(), InterpValue::sbits(8, -4));
        assert_eq!(v.shr(&InterpValue::u32(20)).unwrap(), InterpValue::sbits(8, -1));
        let u = InterpValue::ubits(8, 0x80);
        assert_eq!(u.shr(&InterpValue::u32(7)).unwrap(), InterpValue::ubits(8, 1));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let err = InterpValue::u32(1).div(&InterpValue::u32(0)).unwrap_err();
        assert_eq!(err.0, "division by zero");
    }

    #[test]
    fn concat_puts_lhs_high() {
        let v = InterpValue::ubits(4, 0xa).concat(&InterpValue::ubits(4, 0x5)).unwrap();
        assert_eq!(v, InterpValue::ubits(8, 0xa5));
    }

    #[test]
    fn signed_comparison_uses_sign() {
        let lt = InterpValue::binop(BinOp::Lt, &InterpValue::sbits(8, -1), &InterpValue::sbits(8, 1)).unwrap();
        assert_eq!(lt, InterpValue::bool(true));
        let lt = InterpValue::binop(BinOp::Lt, &InterpValue::ubits(8, 255), &InterpValue::ubits(8, 1)).unwrap();
        assert_eq!(lt, InterpValue::bool(false));
    }

    #[test]
    fn array_bits_round_trip_through_flatten() {
        let arr = InterpValue::Array(vec![InterpValue::ubits(4, 1), InterpValue::ubits(4, 2)]);
        let flat = arr.flatten().unwrap();
        assert_eq!(flat, InterpValue::ubits(8, 0x12));
        assert_eq!(flat.unflatten_array(2, false, 4).unwrap(), arr);
    }

    #[test]
    fn format_preferences() {
        let v = InterpValue::ubits(8, 10);
        assert_eq!(v.format(FormatPreference::Hex), "0xa");
        assert_eq!(v.format(FormatPreference::Binary), "0b1010");
        assert_eq!(InterpValue::sbits(8, -2).format(FormatPreference::Default), "-2");
    }

    proptest! {
        #[test]
        fn addition_wraps_at_width(a in 0u128..256, b in 0u128..256) {
            let sum = InterpValue::ubits(8, a).add(&InterpValue::ubits(8, b)).unwrap();
            prop_assert_eq!(sum, InterpValue::ubits(8, (a + b) % 256));
        }

        #[test]
        fn signed_ops_match_i8(a in any::<i8>(), b in any::<i8>()) {
            let x = InterpValue::sbits(8, a as i128);
            let y = InterpValue::sbits(8, b as i128);
            prop_assert_eq!(x.mul(&y).unwrap(), InterpValue::sbits(8, a.wrapping_mul(b) as i128));
            prop_assert_eq!(x.sub(&y).unwrap(), InterpValue::sbits(8, a.wrapping_sub(b) as i128));
            if b != 0 {
                prop_assert_eq!(x.div(&y).unwrap(), InterpValue::sbits(8, a.wrapping_div(b) as i128));
                prop_assert_eq!(x.rem(&y).unwrap(), InterpValue::sbits(8, a.wrapping_rem(b) as i128));
            }
        }
    }
}
