//! The operator catalog: named constructors for [`Expression`] and [`SortExpression`].
//!
//! ```ignore
//! use odmlayer::operators::Q;
//!
//! let filter = Q::or_([
//!     Q::eq("name", "Downfall"),
//!     Q::gt("year", 2000)?,
//! ])?;
//! let order = Q::desc("year");
//! ```

use bson::Bson;
use regex::Regex;

use crate::{
    error::{OdmError, OdmResult},
    expression::{
        Comparison, Expression, IntoFieldPath, LogicalOp, Operator, SortDirection, SortExpression,
        resolve_field_path,
    },
    schema::FieldRef,
};

/// A regular expression operand accepted by [`Q::pattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern(String);

impl Pattern {
    /// The pattern source.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Pattern {
    fn from(value: &str) -> Self {
        Pattern(value.to_string())
    }
}

impl From<String> for Pattern {
    fn from(value: String) -> Self {
        Pattern(value)
    }
}

impl From<&Regex> for Pattern {
    fn from(value: &Regex) -> Self {
        Pattern(value.as_str().to_string())
    }
}

impl From<Regex> for Pattern {
    fn from(value: Regex) -> Self {
        Pattern(value.as_str().to_string())
    }
}

/// Shortcut for creating [`Expression`] and [`SortExpression`] instances.
pub struct Q;

impl Q {
    /// `key == value`
    pub fn eq(key: impl IntoFieldPath, value: impl Into<Bson>) -> Expression {
        Expression::compare(key, Operator::Eq, value)
    }

    /// `key != value`
    pub fn neq(key: impl IntoFieldPath, value: impl Into<Bson>) -> Expression {
        Expression::compare(key, Operator::Ne, value)
    }

    /// Negated equality: `{key: {"$not": {"$eq": value}}}`.
    pub fn not_eq(key: impl IntoFieldPath, value: impl Into<Bson>) -> Expression {
        Q::not_(Q::eq(key, value))
    }

    /// `key in values`
    pub fn in_<I, V>(key: impl IntoFieldPath, values: I) -> Expression
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Expression::compare(key, Operator::In, collect(values))
    }

    /// `key not in values`
    pub fn not_in<I, V>(key: impl IntoFieldPath, values: I) -> Expression
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Expression::compare(key, Operator::Nin, collect(values))
    }

    /// `key > value`
    ///
    /// # Errors
    ///
    /// Booleans are not accepted as ordering operands.
    pub fn gt(key: impl IntoFieldPath, value: impl Into<Bson>) -> OdmResult<Expression> {
        ordering(key, Operator::Gt, value.into())
    }

    /// `key >= value`
    pub fn gte(key: impl IntoFieldPath, value: impl Into<Bson>) -> OdmResult<Expression> {
        ordering(key, Operator::Gte, value.into())
    }

    /// `key < value`
    pub fn lt(key: impl IntoFieldPath, value: impl Into<Bson>) -> OdmResult<Expression> {
        ordering(key, Operator::Lt, value.into())
    }

    /// `key <= value`
    pub fn lte(key: impl IntoFieldPath, value: impl Into<Bson>) -> OdmResult<Expression> {
        ordering(key, Operator::Lte, value.into())
    }

    /// Substring match on textual fields; plain equality on any other field.
    ///
    /// The operand is matched literally: regex metacharacters are escaped.
    pub fn contains(field: &FieldRef, value: impl Into<Bson>) -> Expression {
        substring(field, value.into(), false)
    }

    /// Case-insensitive [`Q::contains`].
    pub fn icontains(field: &FieldRef, value: impl Into<Bson>) -> Expression {
        substring(field, value.into(), true)
    }

    /// Regular expression match. Only legal on textual fields.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::FieldDefinition`] naming the field when it is not textual.
    pub fn pattern(field: &FieldRef, pattern: impl Into<Pattern>) -> OdmResult<Expression> {
        if !field.is_textual() {
            return Err(OdmError::FieldDefinition(format!(
                "The {} field is not of type string",
                field.path()
            )));
        }

        let pattern: Pattern = pattern.into();
        Ok(Expression::compare(field, Operator::Regex, pattern.0))
    }

    /// Store-side predicate snippet, compiled to the top-level `$where` key.
    pub fn where_(code: impl Into<String>) -> Expression {
        Expression::Where(code.into())
    }

    /// Field presence check.
    pub fn exists(key: impl IntoFieldPath, exists: bool) -> Expression {
        Expression::compare(key, Operator::Exists, exists)
    }

    /// Array field containing every one of `values`.
    pub fn all<I, V>(key: impl IntoFieldPath, values: I) -> Expression
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Expression::compare(key, Operator::All, collect(values))
    }

    /// All of `expressions` must match.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidQuery`] when `expressions` is empty.
    pub fn and_(expressions: impl IntoIterator<Item = Expression>) -> OdmResult<Expression> {
        logical(LogicalOp::And, expressions)
    }

    /// Any of `expressions` must match.
    pub fn or_(expressions: impl IntoIterator<Item = Expression>) -> OdmResult<Expression> {
        logical(LogicalOp::Or, expressions)
    }

    /// None of `expressions` may match.
    pub fn nor_(expressions: impl IntoIterator<Item = Expression>) -> OdmResult<Expression> {
        logical(LogicalOp::Nor, expressions)
    }

    /// Negates an expression. See [`Expression::negate`].
    pub fn not_(expression: Expression) -> Expression {
        expression.negate()
    }

    /// Ascending order on `key`.
    pub fn asc(key: impl IntoFieldPath) -> SortExpression {
        SortExpression::new(key, SortDirection::Asc)
    }

    /// Descending order on `key`.
    pub fn desc(key: impl IntoFieldPath) -> SortExpression {
        SortExpression::new(key, SortDirection::Desc)
    }
}

fn collect<I, V>(values: I) -> Bson
where
    I: IntoIterator<Item = V>,
    V: Into<Bson>,
{
    Bson::Array(values.into_iter().map(Into::into).collect())
}

fn ordering(key: impl IntoFieldPath, operator: Operator, value: Bson) -> OdmResult<Expression> {
    let key = resolve_field_path(key);

    if let Bson::Boolean(flag) = value {
        return Err(OdmError::invalid_value(
            format!("{key} {}", operator.tag()),
            format!("`{flag}` is a boolean and cannot be used in an ordering comparison"),
        ));
    }

    Ok(Expression::compare(key, operator, value))
}

fn substring(field: &FieldRef, value: Bson, insensitive: bool) -> Expression {
    match (field.is_textual(), value) {
        (true, Bson::String(text)) => {
            let comparison = Comparison::new(field, Operator::Regex, regex::escape(&text));
            Expression::Compare(if insensitive {
                comparison.with_options("i")
            } else {
                comparison
            })
        }
        (_, value) => Expression::compare(field, Operator::Eq, value),
    }
}

fn logical(op: LogicalOp, expressions: impl IntoIterator<Item = Expression>) -> OdmResult<Expression> {
    let expressions: Vec<Expression> = expressions.into_iter().collect();

    if expressions.is_empty() {
        return Err(OdmError::InvalidQuery(format!(
            "`{}` requires at least one expression",
            op.tag()
        )));
    }

    Ok(Expression::Logical(op, expressions))
}
