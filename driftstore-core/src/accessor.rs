//! Field accessor and query-evaluator primitives used for in-memory
//! filtering — `CacheIndex::invalidate_where` and client-side re-evaluation
//! of query subscriptions against freshly published values.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::query::Operator;

/// A small comparable value pulled out of an entity by a [`FieldAccessor`].
///
/// Deliberately minimal: the engine never inspects entity payloads except
/// through this capability, so the value set only needs to support the
/// operators in [`Operator`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Boolean field value.
    Bool(bool),
    /// Signed integer field value.
    Int(i64),
    /// Floating point field value.
    Float(f64),
    /// String field value.
    Str(String),
    /// Field is present but carries no value.
    Null,
}

impl FieldValue {
    /// Nulls-first-ascending / nulls-last-descending ordering, per §6.3.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => Some(Ordering::Equal),
            (FieldValue::Null, _) => Some(Ordering::Less),
            (_, FieldValue::Null) => Some(Ordering::Greater),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.partial_cmp(b),
            (FieldValue::Int(a), FieldValue::Int(b)) => a.partial_cmp(b),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.partial_cmp(b),
            (FieldValue::Int(a), FieldValue::Float(b)) => (*a as f64).partial_cmp(b),
            (FieldValue::Float(a), FieldValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (FieldValue::Str(a), FieldValue::Str(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Evaluates `self <operator> operand` for scalar operators. `In`/`NotIn`
    /// use [`FieldValue::matches_in`] instead since they compare against a
    /// set rather than a single operand.
    pub fn matches(&self, operator: Operator, operand: Option<&FieldValue>) -> bool {
        match operator {
            Operator::IsNull => matches!(self, FieldValue::Null),
            Operator::IsNotNull => !matches!(self, FieldValue::Null),
            Operator::Eq => operand.is_some_and(|o| self.compare(o) == Some(Ordering::Equal)),
            Operator::Ne => operand.is_none_or(|o| self.compare(o) != Some(Ordering::Equal)),
            Operator::Lt => operand.is_some_and(|o| self.compare(o) == Some(Ordering::Less)),
            Operator::Le => operand.is_some_and(|o| {
                matches!(self.compare(o), Some(Ordering::Less) | Some(Ordering::Equal))
            }),
            Operator::Gt => operand.is_some_and(|o| self.compare(o) == Some(Ordering::Greater)),
            Operator::Ge => operand.is_some_and(|o| {
                matches!(
                    self.compare(o),
                    Some(Ordering::Greater) | Some(Ordering::Equal)
                )
            }),
            Operator::StartsWith => match (self.as_str(), operand.and_then(FieldValue::as_str)) {
                (Some(s), Some(prefix)) => s.starts_with(prefix),
                _ => false,
            },
            Operator::Contains => match (self.as_str(), operand.and_then(FieldValue::as_str)) {
                (Some(s), Some(needle)) => s.contains(needle),
                _ => false,
            },
            Operator::In | Operator::NotIn => {
                unreachable!("In/NotIn must be dispatched through `matches_in`")
            }
        }
    }

    /// Evaluates `self in/not in operands`.
    pub fn matches_in(&self, operator: Operator, operands: &[FieldValue]) -> bool {
        let present = operands
            .iter()
            .any(|o| self.compare(o) == Some(Ordering::Equal));
        match operator {
            Operator::In => present,
            Operator::NotIn => !present,
            _ => unreachable!("matches_in only handles In/NotIn"),
        }
    }
}

/// Maps a field name to a comparable value on an entity of type `T`.
///
/// The engine requires this capability for `CacheIndex::invalidate_where`
/// and for client-side re-evaluation of query predicates in the reactive
/// layer; it never inspects `T` any other way. Implement it by hand per
/// entity, derive it with a macro, or load it from a schema registry — the
/// engine only consumes the trait.
///
/// Invariant: `get` is total and stable for any `T` produced by any store
/// operation (the same field always yields a value of the same variant, or
/// consistently `None` if the field doesn't exist on `T`).
pub trait FieldAccessor<T>: Send + Sync {
    /// Returns the value of `field` on `item`, or `None` if `T` has no such
    /// field.
    fn get(&self, item: &T, field: &str) -> Option<FieldValue>;
}

impl<T, A> FieldAccessor<T> for Arc<A>
where
    A: FieldAccessor<T> + ?Sized,
{
    fn get(&self, item: &T, field: &str) -> Option<FieldValue> {
        self.as_ref().get(item, field)
    }
}

impl<T, A> FieldAccessor<T> for Box<A>
where
    A: FieldAccessor<T> + ?Sized,
{
    fn get(&self, item: &T, field: &str) -> Option<FieldValue> {
        self.as_ref().get(item, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_sort_first_ascending() {
        let null = FieldValue::Null;
        let one = FieldValue::Int(1);
        assert_eq!(null.compare(&one), Some(Ordering::Less));
        assert_eq!(one.compare(&null), Some(Ordering::Greater));
    }

    #[test]
    fn eq_and_ne_operators() {
        let a = FieldValue::Str("hello".into());
        let b = FieldValue::Str("hello".into());
        assert!(a.matches(Operator::Eq, Some(&b)));
        assert!(!a.matches(Operator::Ne, Some(&b)));
    }

    #[test]
    fn in_and_not_in() {
        let v = FieldValue::Int(3);
        let set = vec![FieldValue::Int(1), FieldValue::Int(3)];
        assert!(v.matches_in(Operator::In, &set));
        assert!(!v.matches_in(Operator::NotIn, &set));
    }

    #[test]
    fn starts_with_and_contains() {
        let v = FieldValue::Str("hello world".into());
        let prefix = FieldValue::Str("hello".into());
        let needle = FieldValue::Str("wor".into());
        assert!(v.matches(Operator::StartsWith, Some(&prefix)));
        assert!(v.matches(Operator::Contains, Some(&needle)));
    }

    #[test]
    fn is_null_and_is_not_null() {
        assert!(FieldValue::Null.matches(Operator::IsNull, None));
        assert!(FieldValue::Int(1).matches(Operator::IsNotNull, None));
    }
}
