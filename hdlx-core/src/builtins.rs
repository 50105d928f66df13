#![forbid(unsafe_code)]

use hdlx_ast::Builtin;

use crate::error::ValueError;
use crate::types::ConcreteType;
use crate::value::{InterpValue, MAX_BIT_WIDTH};

/// Longest array `range` may produce.
const MAX_RANGE_LEN: i128 = 1 << 24;

/// Applies a side-effect-free builtin. `result_type` is the deduced type of
/// the invocation and is required by the casts.
pub fn apply(
    builtin: Builtin,
    args: &[InterpValue],
    result_type: Option<&ConcreteType>,
) -> Result<InterpValue, ValueError> {
    if let Some(n) = builtin.info().arity {
        if args.len() != n {
            return Err(ValueError::new(format!(
                "'{builtin}' expects {n} argument(s) but got {}",
                args.len()
            )));
        }
    }
    match builtin {
        Builtin::AndReduce => {
            let (_, w, v) = args[0].as_bits()?;
            Ok(InterpValue::bool(v == crate::value::mask(w)))
        }
        Builtin::OrReduce => {
            let (_, _, v) = args[0].as_bits()?;
            Ok(InterpValue::bool(v != 0))
        }
        Builtin::XorReduce => {
            let (_, _, v) = args[0].as_bits()?;
            Ok(InterpValue::bool(v.count_ones() % 2 == 1))
        }
        Builtin::Rev => {
            let (s, w, v) = args[0].as_bits()?;
            let reversed = if w == 0 { 0 } else { v.reverse_bits() >> (MAX_BIT_WIDTH - w) };
            Ok(InterpValue::bits(s, w, reversed))
        }
        Builtin::Clz => {
            let (s, w, v) = args[0].as_bits()?;
            let n = if v == 0 { w } else { v.leading_zeros() - (MAX_BIT_WIDTH - w) };
            Ok(InterpValue::bits(s, w, n as u128))
        }
        Builtin::Ctz => {
            let (s, w, v) = args[0].as_bits()?;
            let n = if v == 0 { w } else { v.trailing_zeros() };
            Ok(InterpValue::bits(s, w, n as u128))
        }
        Builtin::Signex => {
            let (_, xw, xv) = args[0].as_bits()?;
            let (ys, yw, _) = args[1].as_bits()?;
            InterpValue::bits(true, xw, xv).cast_bits(ys, yw)
        }
        Builtin::ArraySize => {
            let items = match &args[0] {
                InterpValue::Array(items) => items,
                other => return Err(ValueError::new(format!("array_size of non-array {other}"))),
            };
            Ok(InterpValue::u32(items.len() as u32))
        }
        Builtin::Update => args[0].update(&args[1], args[2].clone()),
        Builtin::Range => range(&args[0], &args[1]),
        Builtin::CheckedCast => {
            let (signed, width) = target_bits(builtin, result_type)?;
            let value = args[0].as_i128()?;
            let fits = if signed {
                let half = 1i128 << (width.max(1) - 1).min(126);
                width >= 127 || (-half..half).contains(&value)
            } else {
                value >= 0 && (width >= 127 || value < (1i128 << width))
            };
            if !fits {
                return Err(ValueError::new(format!(
                    "checked_cast: {} does not fit in {}{width}",
                    args[0],
                    if signed { "s" } else { "u" }
                )));
            }
            args[0].cast_bits(signed, width)
        }
        Builtin::WideningCast => {
            let (signed, width) = target_bits(builtin, result_type)?;
            args[0].cast_bits(signed, width)
        }
        Builtin::AssertEq
        | Builtin::AssertLt
        | Builtin::Cover
        | Builtin::Fail
        | Builtin::Join
        | Builtin::Recv
        | Builtin::RecvIf
        | Builtin::RecvIfNonBlocking
        | Builtin::RecvNonBlocking
        | Builtin::Send
        | Builtin::SendIf => Err(ValueError::new(format!("'{builtin}' has side effects"))),
    }
}

fn target_bits(builtin: Builtin, ty: Option<&ConcreteType>) -> Result<(bool, u32), ValueError> {
    ty.and_then(|t| t.bits_info())
        .map(|(s, w)| (s, w as u32))
        .ok_or_else(|| ValueError::new(format!("'{builtin}' needs a bits target type")))
}

/// Value-level `as` conversion to `target`.
pub fn cast(value: &InterpValue, target: &ConcreteType) -> Result<InterpValue, ValueError> {
    match target {
        ConcreteType::Bits { .. } | ConcreteType::Enum(_) => {
            let (signed, width) = target
                .bits_info()
                .ok_or_else(|| ValueError::new(format!("cannot cast to unsized type {target}")))?;
            let source = match value {
                InterpValue::Array(_) => value.flatten()?,
                other => other.clone(),
            };
            source.cast_bits(signed, width as u32)
        }
        ConcreteType::Array { element, size } => {
            let (signed, width) = element
                .bits_info()
                .ok_or_else(|| ValueError::new(format!("cannot cast to array type {target}")))?;
            let count = size
                .known()
                .ok_or_else(|| ValueError::new(format!("cannot cast to unsized type {target}")))?;
            value.unflatten_array(count, signed, width as u32)
        }
        other => Err(ValueError::new(format!("cannot cast {value} to {other}"))),
    }
}

/// `[start, end)` as an array of `start`'s type; empty when `end <= start`.
pub fn range(start: &InterpValue, end: &InterpValue) -> Result<InterpValue, ValueError> {
    let (signed, width, _) = start.as_bits()?;
    let (a, b) = (start.as_i128()?, end.as_i128()?);
    if b - a > MAX_RANGE_LEN {
        return Err(ValueError::new(format!("range of {} elements is too large", b - a)));
    }
    Ok(InterpValue::Array(
        (a..b).map(|i| InterpValue::bits(signed, width, i as u128)).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_counting_builtins() {
        let v = InterpValue::ubits(8, 0b0001_0100);
        assert_eq!(apply(Builtin::Clz, &[v.clone()], None), Ok(InterpValue::ubits(8, 3)));
        assert_eq!(apply(Builtin::Ctz, &[v.clone()], None), Ok(InterpValue::ubits(8, 2)));
        assert_eq!(apply(Builtin::Rev, &[v.clone()], None), Ok(InterpValue::ubits(8, 0b0010_1000)));
        assert_eq!(apply(Builtin::XorReduce, &[v], None), Ok(InterpValue::bool(false)));
        assert_eq!(
            apply(Builtin::Clz, &[InterpValue::ubits(4, 0)], None),
            Ok(InterpValue::ubits(4, 4))
        );
    }

    #[test]
    fn signex_extends_from_the_source_width() {
        let out = apply(
            Builtin::Signex,
            &[InterpValue::ubits(4, 0b1000), InterpValue::ubits(8, 0)],
            None,
        );
        assert_eq!(out, Ok(InterpValue::ubits(8, 0xf8)));
    }

    #[test]
    fn checked_cast_rejects_lossy_values() {
        let target = ConcreteType::ubits(4);
        assert!(apply(Builtin::CheckedCast, &[InterpValue::u32(15)], Some(&target)).is_ok());
        assert!(apply(Builtin::CheckedCast, &[InterpValue::u32(16)], Some(&target)).is_err());
    }

    #[test]
    fn casts_between_bits_and_arrays() {
        let arr = ConcreteType::array(ConcreteType::ubits(4), 2);
        let split = cast(&InterpValue::ubits(8, 0xa5), &arr).unwrap();
        assert_eq!(
            split,
            InterpValue::Array(vec![InterpValue::ubits(4, 0xa), InterpValue::ubits(4, 0x5)])
        );
        assert_eq!(cast(&split, &ConcreteType::ubits(8)), Ok(InterpValue::ubits(8, 0xa5)));
        assert_eq!(
            cast(&InterpValue::sbits(4, -1), &ConcreteType::ubits(8)),
            Ok(InterpValue::ubits(8, 0xff))
        );
    }

    #[test]
    fn range_is_half_open() {
        let r = range(&InterpValue::u32(2), &InterpValue::u32(5)).unwrap();
        assert_eq!(
            r,
            InterpValue::Array(vec![InterpValue::u32(2), InterpValue::u32(3), InterpValue::u32(4)])
        );
        assert_eq!(range(&InterpValue::u32(5), &InterpValue::u32(5)).unwrap(), InterpValue::Array(vec![]));
    }

    #[test]
    fn side_effecting_builtins_are_refused() {
        assert!(apply(Builtin::Join, &[], None).is_err());
    }
}
