//! The predicate/projection expression tree shared by `Filter`, `Project`,
//! `ScanBloomUse`'s pushed-down predicate, and `Group`'s key expressions
//! (§4.2, §4.3, §4.7).
//!
//! The original source parsed SQL text into an ad-hoc tuple-of-strings
//! predicate representation it re-evaluated per row in Python. Here the
//! tree is built once (by the plan loader, from the declarative plan spec)
//! and evaluated per row against a [`RecordBatch`] using [`ScalarValue`]
//! and SQL three-valued logic.

use crate::schema::column_index;
use crate::scalar::{get_value, ScalarValue};
use arrow_schema::Schema;
use std::cmp::Ordering;

/// A scalar/boolean expression evaluated against one row of a batch.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A column reference, resolved once against the operator's input
    /// schema at plan-build time.
    Column(usize),
    /// A literal constant.
    Literal(ScalarValue),
    /// A binary comparison or arithmetic operator.
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// Boolean conjunction/disjunction/negation, short-circuiting per SQL
    /// three-valued logic.
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// `expr LIKE pattern`, where `pattern` uses SQL's `%`/`_` wildcards.
    Like { expr: Box<Expr>, pattern: String },
    /// `expr IN (values...)`.
    In { expr: Box<Expr>, values: Vec<ScalarValue> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("non-boolean result from predicate expression")]
    NonBoolean,
}

impl Expr {
    /// Resolves a `Column(name)` reference against `schema`, called once
    /// while the plan loader builds the tree from the declarative spec.
    pub fn column(schema: &Schema, name: &str) -> Result<Expr, ExprError> {
        column_index(schema, name)
            .map(Expr::Column)
            .ok_or_else(|| ExprError::UnknownColumn(name.to_string()))
    }

    /// Evaluates this expression against row `row` of `batch`, returning a
    /// [`ScalarValue`] (for projections) which may be [`ScalarValue::Boolean`]
    /// (for predicates).
    pub fn eval_row(&self, batch: &arrow_array::RecordBatch, row: usize) -> ScalarValue {
        match self {
            Expr::Column(idx) => get_value(batch, *idx, row),
            Expr::Literal(v) => v.clone(),
            Expr::BinaryOp { left, op, right } => {
                let l = left.eval_row(batch, row);
                let r = right.eval_row(batch, row);
                eval_binary(&l, *op, &r)
            }
            Expr::And(l, r) => {
                and3(as_tri(&l.eval_row(batch, row)), as_tri(&r.eval_row(batch, row)))
            }
            Expr::Or(l, r) => {
                or3(as_tri(&l.eval_row(batch, row)), as_tri(&r.eval_row(batch, row)))
            }
            Expr::Not(e) => match as_tri(&e.eval_row(batch, row)) {
                Some(b) => ScalarValue::Boolean(!b),
                None => ScalarValue::Null,
            },
            Expr::Like { expr, pattern } => match expr.eval_row(batch, row) {
                ScalarValue::Utf8(s) => ScalarValue::Boolean(sql_like(&s, pattern)),
                ScalarValue::Null => ScalarValue::Null,
                _ => ScalarValue::Null,
            },
            Expr::In { expr, values } => {
                let v = expr.eval_row(batch, row);
                if v.is_null() {
                    return ScalarValue::Null;
                }
                let mut saw_null = false;
                for candidate in values {
                    match v.sql_eq(candidate) {
                        Some(true) => return ScalarValue::Boolean(true),
                        Some(false) => {}
                        None => saw_null = true,
                    }
                }
                if saw_null {
                    ScalarValue::Null
                } else {
                    ScalarValue::Boolean(false)
                }
            }
        }
    }

    /// Evaluates this expression as a predicate; a `NULL` result (SQL
    /// three-valued logic) is treated as `false` (the row is dropped), per
    /// §3's "predicate errors are row-local" rule — there is no error here,
    /// only the normal WHERE-clause null semantics.
    pub fn eval_predicate(&self, batch: &arrow_array::RecordBatch, row: usize) -> bool {
        matches!(self.eval_row(batch, row), ScalarValue::Boolean(true))
    }
}

fn as_tri(v: &ScalarValue) -> Option<bool> {
    match v {
        ScalarValue::Boolean(b) => Some(*b),
        ScalarValue::Null => None,
        _ => None,
    }
}

/// SQL `AND` three-valued truth table.
fn and3(a: Option<bool>, b: Option<bool>) -> ScalarValue {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => ScalarValue::Boolean(false),
        (Some(true), Some(true)) => ScalarValue::Boolean(true),
        _ => ScalarValue::Null,
    }
}

/// SQL `OR` three-valued truth table.
fn or3(a: Option<bool>, b: Option<bool>) -> ScalarValue {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => ScalarValue::Boolean(true),
        (Some(false), Some(false)) => ScalarValue::Boolean(false),
        _ => ScalarValue::Null,
    }
}

fn eval_binary(l: &ScalarValue, op: BinaryOp, r: &ScalarValue) -> ScalarValue {
    use BinaryOp::*;
    match op {
        Eq => l.sql_eq(r).map(ScalarValue::Boolean).unwrap_or(ScalarValue::Null),
        NotEq => l
            .sql_eq(r)
            .map(|b| ScalarValue::Boolean(!b))
            .unwrap_or(ScalarValue::Null),
        Lt => cmp_to_bool(l.sql_cmp(r), |o| o == Ordering::Less),
        LtEq => cmp_to_bool(l.sql_cmp(r), |o| o != Ordering::Greater),
        Gt => cmp_to_bool(l.sql_cmp(r), |o| o == Ordering::Greater),
        GtEq => cmp_to_bool(l.sql_cmp(r), |o| o != Ordering::Less),
        Add | Sub | Mul | Div => arith(l, op, r),
    }
}

fn cmp_to_bool(cmp: Option<Ordering>, pred: impl Fn(Ordering) -> bool) -> ScalarValue {
    match cmp {
        Some(o) => ScalarValue::Boolean(pred(o)),
        None => ScalarValue::Null,
    }
}

fn arith(l: &ScalarValue, op: BinaryOp, r: &ScalarValue) -> ScalarValue {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => {
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => unreachable!(),
            };
            ScalarValue::Float64(result)
        }
        _ => ScalarValue::Null,
    }
}

/// Minimal SQL `LIKE` matcher: `%` matches any run of characters, `_`
/// matches exactly one.
fn sql_like(value: &str, pattern: &str) -> bool {
    fn matches(v: &[char], p: &[char]) -> bool {
        match p.first() {
            None => v.is_empty(),
            Some('%') => matches(v, &p[1..]) || (!v.is_empty() && matches(&v[1..], p)),
            Some('_') => !v.is_empty() && matches(&v[1..], &p[1..]),
            Some(c) => v.first() == Some(c) && matches(&v[1..], &p[1..]),
        }
    }
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    matches(&v, &p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Int64Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Int64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(Int64Array::from(vec![Some(1), None, Some(5)])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn eq_with_null_is_unknown_and_filtered() {
        let b = batch();
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::Column(0)),
            op: BinaryOp::Eq,
            right: Box::new(Expr::Column(1)),
        };
        assert!(expr.eval_predicate(&b, 0));
        assert!(!expr.eval_predicate(&b, 1)); // NULL -> filtered out
        assert!(!expr.eval_predicate(&b, 2));
    }

    #[test]
    fn and_short_circuits_to_false_even_with_null() {
        let b = batch();
        // a = 1 AND b = 999 (false) -> false regardless of null elsewhere
        let expr = Expr::And(
            Box::new(Expr::BinaryOp {
                left: Box::new(Expr::Column(0)),
                op: BinaryOp::Eq,
                right: Box::new(Expr::Literal(ScalarValue::Int64(1))),
            }),
            Box::new(Expr::BinaryOp {
                left: Box::new(Expr::Column(1)),
                op: BinaryOp::Eq,
                right: Box::new(Expr::Literal(ScalarValue::Int64(999))),
            }),
        );
        assert!(!expr.eval_predicate(&b, 0));
    }

    #[test]
    fn like_wildcards() {
        assert!(sql_like("hello world", "hello%"));
        assert!(sql_like("hello world", "%world"));
        assert!(sql_like("hello", "h_llo"));
        assert!(!sql_like("hello", "h_llx"));
    }

    #[test]
    fn in_list_with_match() {
        let b = batch();
        let expr = Expr::In {
            expr: Box::new(Expr::Column(0)),
            values: vec![ScalarValue::Int64(2), ScalarValue::Int64(3)],
        };
        assert!(!expr.eval_predicate(&b, 0));
        assert!(expr.eval_predicate(&b, 1));
        assert!(expr.eval_predicate(&b, 2));
    }
}
