#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use hdlx_ast::{ChannelDirection, ItemId};

use crate::error::ValueError;
use crate::value::InterpValue;

/// Symbolic size expression over parametric names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParametricExpr {
    Constant(u64),
    Symbol(String),
    Add(Box<ParametricExpr>, Box<ParametricExpr>),
    Sub(Box<ParametricExpr>, Box<ParametricExpr>),
    Mul(Box<ParametricExpr>, Box<ParametricExpr>),
}

impl ParametricExpr {
    pub fn add(lhs: ParametricExpr, rhs: ParametricExpr) -> Self {
        match (&lhs, &rhs) {
            (ParametricExpr::Constant(a), ParametricExpr::Constant(b)) => {
                ParametricExpr::Constant(a.wrapping_add(*b))
            }
            _ => ParametricExpr::Add(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn sub(lhs: ParametricExpr, rhs: ParametricExpr) -> Self {
        match (&lhs, &rhs) {
            (ParametricExpr::Constant(a), ParametricExpr::Constant(b)) => {
                ParametricExpr::Constant(a.wrapping_sub(*b))
            }
            _ => ParametricExpr::Sub(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn mul(lhs: ParametricExpr, rhs: ParametricExpr) -> Self {
        match (&lhs, &rhs) {
            (ParametricExpr::Constant(a), ParametricExpr::Constant(b)) => {
                ParametricExpr::Constant(a.wrapping_mul(*b))
            }
            _ => ParametricExpr::Mul(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// Value under `lookup`, or `None` while a symbol is unbound.
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<u64>) -> Option<u64> {
        match self {
            ParametricExpr::Constant(c) => Some(*c),
            ParametricExpr::Symbol(s) => lookup(s),
            ParametricExpr::Add(a, b) => Some(a.evaluate(lookup)?.wrapping_add(b.evaluate(lookup)?)),
            ParametricExpr::Sub(a, b) => Some(a.evaluate(lookup)?.wrapping_sub(b.evaluate(lookup)?)),
            ParametricExpr::Mul(a, b) => Some(a.evaluate(lookup)?.wrapping_mul(b.evaluate(lookup)?)),
        }
    }

    /// Replaces symbols for which `f` has an answer.
    pub fn substitute(&self, f: &dyn Fn(&str) -> Option<ParametricExpr>) -> ParametricExpr {
        match self {
            ParametricExpr::Constant(_) => self.clone(),
            ParametricExpr::Symbol(s) => f(s).unwrap_or_else(|| self.clone()),
            ParametricExpr::Add(a, b) => Self::add(a.substitute(f), b.substitute(f)),
            ParametricExpr::Sub(a, b) => Self::sub(a.substitute(f), b.substitute(f)),
            ParametricExpr::Mul(a, b) => Self::mul(a.substitute(f), b.substitute(f)),
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            ParametricExpr::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParametricExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParametricExpr::Constant(c) => write!(f, "{c}"),
            ParametricExpr::Symbol(s) => write!(f, "{s}"),
            ParametricExpr::Add(a, b) => write!(f, "({a} + {b})"),
            ParametricExpr::Sub(a, b) => write!(f, "({a} - {b})"),
            ParametricExpr::Mul(a, b) => write!(f, "({a} * {b})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeDim {
    Known(u64),
    Parametric(ParametricExpr),
}

impl TypeDim {
    pub fn known(&self) -> Option<u64> {
        match self {
            TypeDim::Known(n) => Some(*n),
            TypeDim::Parametric(ParametricExpr::Constant(n)) => Some(*n),
            TypeDim::Parametric(_) => None,
        }
    }

    fn map(&self, f: &dyn Fn(&ParametricExpr) -> TypeDim) -> TypeDim {
        match self {
            TypeDim::Known(_) => self.clone(),
            TypeDim::Parametric(e) => f(e),
        }
    }
}

impl fmt::Display for TypeDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDim::Known(n) => write!(f, "{n}"),
            TypeDim::Parametric(e) => write!(f, "{e}"),
        }
    }
}

/// Identity of a struct or enum definition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NominalRef {
    pub module: String,
    pub item: ItemId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructType {
    pub nominal: NominalRef,
    pub members: Vec<(String, ConcreteType)>,
}

impl StructType {
    pub fn member(&self, name: &str) -> Option<(usize, &ConcreteType)> {
        self.members
            .iter()
            .enumerate()
            .find(|(_, (n, _))| n == name)
            .map(|(i, (_, t))| (i, t))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnumType {
    pub nominal: NominalRef,
    pub signed: bool,
    pub size: TypeDim,
    pub values: Vec<(String, InterpValue)>,
}

impl EnumType {
    pub fn value(&self, name: &str) -> Option<&InterpValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConcreteType {
    Bits {
        signed: bool,
        size: TypeDim,
    },
    Array {
        element: Box<ConcreteType>,
        size: TypeDim,
    },
    Tuple(Vec<ConcreteType>),
    Struct(StructType),
    Enum(EnumType),
    Token,
    Function {
        params: Vec<ConcreteType>,
        ret: Box<ConcreteType>,
    },
    Channel {
        payload: Box<ConcreteType>,
        direction: ChannelDirection,
    },
    /// The type of a type-valued expression.
    Meta(Box<ConcreteType>),
}

impl ConcreteType {
    pub fn bits(signed: bool, width: u64) -> Self {
        ConcreteType::Bits {
            signed,
            size: TypeDim::Known(width),
        }
    }

    pub fn ubits(width: u64) -> Self {
        Self::bits(false, width)
    }

    pub fn bool() -> Self {
        Self::ubits(1)
    }

    pub fn unit() -> Self {
        ConcreteType::Tuple(Vec::new())
    }

    pub fn array(element: ConcreteType, size: u64) -> Self {
        ConcreteType::Array {
            element: Box::new(element),
            size: TypeDim::Known(size),
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, ConcreteType::Tuple(items) if items.is_empty())
    }

    pub fn is_bool(&self) -> bool {
        *self == Self::bool()
    }

    /// Signedness and width of a bits or enum type with a known width.
    pub fn bits_info(&self) -> Option<(bool, u64)> {
        match self {
            ConcreteType::Bits { signed, size } => Some((*signed, size.known()?)),
            ConcreteType::Enum(e) => Some((e.signed, e.size.known()?)),
            _ => None,
        }
    }

    pub fn is_bits(&self) -> bool {
        matches!(self, ConcreteType::Bits { .. })
    }

    pub fn total_bit_count(&self) -> Option<u64> {
        match self {
            ConcreteType::Bits { size, .. } => size.known(),
            ConcreteType::Enum(e) => e.size.known(),
            ConcreteType::Array { element, size } => {
                Some(element.total_bit_count()?.checked_mul(size.known()?)?)
            }
            ConcreteType::Tuple(items) => items.iter().map(|t| t.total_bit_count()).sum(),
            ConcreteType::Struct(s) => s.members.iter().map(|(_, t)| t.total_bit_count()).sum(),
            _ => None,
        }
    }

    pub fn contains_channel(&self) -> bool {
        match self {
            ConcreteType::Channel { .. } => true,
            ConcreteType::Array { element, .. } => element.contains_channel(),
            ConcreteType::Tuple(items) => items.iter().any(|t| t.contains_channel()),
            ConcreteType::Struct(s) => s.members.iter().any(|(_, t)| t.contains_channel()),
            _ => false,
        }
    }

    pub fn has_parametric_dims(&self) -> bool {
        let mut found = false;
        self.visit_dims(&mut |d| found |= matches!(d, TypeDim::Parametric(_)));
        found
    }

    fn visit_dims(&self, f: &mut dyn FnMut(&TypeDim)) {
        match self {
            ConcreteType::Bits { size, .. } => f(size),
            ConcreteType::Array { element, size } => {
                element.visit_dims(f);
                f(size);
            }
            ConcreteType::Tuple(items) => items.iter().for_each(|t| t.visit_dims(f)),
            ConcreteType::Struct(s) => s.members.iter().for_each(|(_, t)| t.visit_dims(f)),
            ConcreteType::Enum(e) => f(&e.size),
            ConcreteType::Function { params, ret } => {
                params.iter().for_each(|t| t.visit_dims(f));
                ret.visit_dims(f);
            }
            ConcreteType::Channel { payload, .. } => payload.visit_dims(f),
            ConcreteType::Meta(t) => t.visit_dims(f),
            ConcreteType::Token => {}
        }
    }

    /// Rewrites every symbolic dimension through `f`.
    pub fn map_dims(&self, f: &dyn Fn(&ParametricExpr) -> TypeDim) -> ConcreteType {
        match self {
            ConcreteType::Bits { signed, size } => ConcreteType::Bits {
                signed: *signed,
                size: size.map(f),
            },
            ConcreteType::Array { element, size } => ConcreteType::Array {
                element: Box::new(element.map_dims(f)),
                size: size.map(f),
            },
            ConcreteType::Tuple(items) => ConcreteType::Tuple(items.iter().map(|t| t.map_dims(f)).collect()),
            ConcreteType::Struct(s) => ConcreteType::Struct(StructType {
                nominal: s.nominal.clone(),
                members: s.members.iter().map(|(n, t)| (n.clone(), t.map_dims(f))).collect(),
            }),
            ConcreteType::Enum(e) => ConcreteType::Enum(EnumType {
                size: e.size.map(f),
                ..e.clone()
            }),
            ConcreteType::Function { params, ret } => ConcreteType::Function {
                params: params.iter().map(|t| t.map_dims(f)).collect(),
                ret: Box::new(ret.map_dims(f)),
            },
            ConcreteType::Channel { payload, direction } => ConcreteType::Channel {
                payload: Box::new(payload.map_dims(f)),
                direction: *direction,
            },
            ConcreteType::Meta(t) => ConcreteType::Meta(Box::new(t.map_dims(f))),
            ConcreteType::Token => ConcreteType::Token,
        }
    }

    /// The all-zeros value of this type.
    pub fn zero_value(&self) -> Result<InterpValue, ValueError> {
        let unknown = || ValueError::new(format!("type {self} has no known size"));
        match self {
            ConcreteType::Bits { .. } | ConcreteType::Enum(_) => {
                let (signed, width) = self.bits_info().ok_or_else(unknown)?;
                Ok(InterpValue::bits(signed, width as u32, 0))
            }
            ConcreteType::Array { element, size } => {
                let n = size.known().ok_or_else(unknown)?;
                let zero = element.zero_value()?;
                Ok(InterpValue::Array(vec![zero; n as usize]))
            }
            ConcreteType::Tuple(items) => Ok(InterpValue::Tuple(
                items.iter().map(|t| t.zero_value()).collect::<Result<_, _>>()?,
            )),
            ConcreteType::Struct(s) => Ok(InterpValue::Tuple(
                s.members.iter().map(|(_, t)| t.zero_value()).collect::<Result<_, _>>()?,
            )),
            ConcreteType::Token => Ok(InterpValue::Token),
            other => Err(ValueError::new(format!("type {other} has no zero value"))),
        }
    }
}

impl fmt::Display for ConcreteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcreteType::Bits { signed, size } => match size {
                TypeDim::Known(n) => write!(f, "{}{n}", if *signed { "s" } else { "u" }),
                TypeDim::Parametric(e) => write!(f, "{}[{e}]", if *signed { "sN" } else { "uN" }),
            },
            ConcreteType::Array { element, size } => write!(f, "{element}[{size}]"),
            ConcreteType::Tuple(items) => {
                write!(f, "(")?;
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            ConcreteType::Struct(s) => write!(f, "{}", s.nominal.name),
            ConcreteType::Enum(e) => write!(f, "{}", e.nominal.name),
            ConcreteType::Token => write!(f, "token"),
            ConcreteType::Function { params, ret } => {
                write!(f, "(")?;
                for (i, t) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ") -> {ret}")
            }
            ConcreteType::Channel { payload, direction } => {
                write!(f, "chan<{payload}> {}", direction.keyword())
            }
            ConcreteType::Meta(t) => write!(f, "typeof({t})"),
        }
    }
}

/// Parametric name -> value bindings of one instantiation. Ordered so that
/// iteration, display, and hashing are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ParametricEnv(BTreeMap<String, InterpValue>);

impl ParametricEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&InterpValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// A copy of this env with one more binding.
    pub fn with(&self, name: impl Into<String>, value: InterpValue) -> Self {
        let mut map = self.0.clone();
        map.insert(name.into(), value);
        ParametricEnv(map)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InterpValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Numeric value of a binding, for resolving symbolic dims.
    pub fn dim(&self, name: &str) -> Option<u64> {
        self.0.get(name).and_then(|v| v.as_u64().ok())
    }
}

impl FromIterator<(String, InterpValue)> for ParametricEnv {
    fn from_iter<I: IntoIterator<Item = (String, InterpValue)>>(iter: I) -> Self {
        ParametricEnv(iter.into_iter().collect())
    }
}

impl fmt::Display for ParametricEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_source_syntax() {
        assert_eq!(ConcreteType::ubits(8).to_string(), "u8");
        assert_eq!(ConcreteType::array(ConcreteType::bits(true, 4), 3).to_string(), "s4[3]");
        assert_eq!(ConcreteType::unit().to_string(), "()");
        let sym = ConcreteType::Bits {
            signed: false,
            size: TypeDim::Parametric(ParametricExpr::add(
                ParametricExpr::Symbol("N".into()),
                ParametricExpr::Constant(1),
            )),
        };
        assert_eq!(sym.to_string(), "uN[(N + 1)]");
    }

    #[test]
    fn parametric_exprs_fold_and_substitute() {
        let e = ParametricExpr::mul(ParametricExpr::Symbol("N".into()), ParametricExpr::Constant(2));
        assert_eq!(e.evaluate(&|_| None), None);
        assert_eq!(e.evaluate(&|s| (s == "N").then_some(4)), Some(8));
        let replaced = e.substitute(&|_| Some(ParametricExpr::Constant(3)));
        assert_eq!(replaced, ParametricExpr::Constant(6));
    }

    #[test]
    fn env_display_is_sorted() {
        let env = ParametricEnv::new()
            .with("N", InterpValue::u32(8))
            .with("M", InterpValue::u32(2));
        assert_eq!(env.to_string(), "{M: u32:2, N: u32:8}");
    }

    #[test]
    fn zero_values_follow_structure() {
        let t = ConcreteType::Tuple(vec![ConcreteType::ubits(4), ConcreteType::array(ConcreteType::bool(), 2)]);
        assert_eq!(
            t.zero_value().unwrap(),
            InterpValue::Tuple(vec![
                InterpValue::ubits(4, 0),
                InterpValue::Array(vec![InterpValue::bool(false); 2]),
            ])
        );
    }
}
