//! Runtime values.
//!
//! Values are immutable; map updates allocate a fresh map id rather than
//! mutating in place, so reference cycles cannot form.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::syntax::ast::Type;

/// Process-wide id of a logical placeholder or of a map in the heap.
/// Once a reference appears in memory or a constraint it persists until
/// the enclosing test case ends.
pub type Ref = usize;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Arbitrary-precision integer.
    Int(BigInt),
    Bool(bool),
    /// Type-tagged id into the map heap.
    MapRef(Type, Ref),
    /// A value of an opaque user-defined type. Two customs of the same
    /// type are equal iff their tag integers match.
    Custom(String, BigInt),
}

impl Value {
    pub fn int(n: i64) -> Self {
        Value::Int(BigInt::from(n))
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Bool(_) => Type::Bool,
            Value::MapRef(ty, _) => ty.clone(),
            Value::Custom(name, _) => Type::Custom(name.clone()),
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map_ref(&self) -> Option<(&Type, Ref)> {
        match self {
            Value::MapRef(ty, r) => Some((ty, *r)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::MapRef(_, r) => write!(f, "map<{}>", r),
            Value::Custom(ty, tag) => write!(f, "{}!{}", ty, tag),
        }
    }
}

/// Euclidean quotient and remainder: `q*b + r == a` and `0 <= r < |b|`.
/// Returns `None` when the divisor is zero (the evaluator models that
/// case as an underconstrained fresh integer instead of failing).
pub fn euclidean(a: &BigInt, b: &BigInt) -> Option<(BigInt, BigInt)> {
    if b.is_zero() {
        return None;
    }
    let mut q = a / b;
    let mut r = a % b;
    if r.is_negative() {
        if b.is_positive() {
            q -= 1;
            r += b;
        } else {
            q += 1;
            r -= b;
        }
    }
    Some((q, r))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn euc(a: i64, b: i64) -> (i64, i64) {
        let (q, r) = euclidean(&BigInt::from(a), &BigInt::from(b)).unwrap();
        (
            i64::try_from(&q).unwrap(),
            i64::try_from(&r).unwrap(),
        )
    }

    #[test]
    fn euclidean_all_sign_combinations() {
        assert_eq!(euc(7, 2), (3, 1));
        assert_eq!(euc(-7, 2), (-4, 1));
        assert_eq!(euc(7, -2), (-3, 1));
        assert_eq!(euc(-7, -2), (4, 1));
        assert_eq!(euc(6, 3), (2, 0));
        assert_eq!(euc(-6, 3), (-2, 0));
    }

    #[test]
    fn euclidean_identity_holds() {
        // q*b + r == a and 0 <= r < |b|, sampled over a sign grid
        for a in -20i64..=20 {
            for b in [-7i64, -3, -1, 1, 2, 5, 13] {
                let (q, r) = euc(a, b);
                assert_eq!(q * b + r, a, "identity for a={} b={}", a, b);
                assert!(r >= 0 && r < b.abs(), "remainder range for a={} b={}", a, b);
            }
        }
    }

    #[test]
    fn euclidean_zero_divisor() {
        assert!(euclidean(&BigInt::from(5), &BigInt::from(0)).is_none());
    }

    #[test]
    fn custom_equality_is_by_tag() {
        let a = Value::Custom("T".to_string(), BigInt::from(1));
        let b = Value::Custom("T".to_string(), BigInt::from(1));
        let c = Value::Custom("T".to_string(), BigInt::from(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn value_types() {
        assert_eq!(Value::int(3).type_of(), Type::Int);
        assert_eq!(Value::Bool(true).type_of(), Type::Bool);
        let m = Value::MapRef(Type::Map(vec![Type::Int], Box::new(Type::Bool)), 0);
        assert!(m.type_of().is_map());
    }
}
