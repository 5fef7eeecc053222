//! Query expressions and their compilation into native filter documents.
//!
//! An [`Expression`] is an immutable filter clause. Expressions are built by the operator
//! catalog ([`crate::operators::Q`]), by field descriptors, by the lookup parser or by
//! unpacking a raw filter document, and are only ever consumed by the compiler in this
//! module.
//!
//! # Compilation
//!
//! [`Expression::compile_many`] merges a list of expressions into a single filter
//! document. Clauses on the same key are merged into one operator document, so
//!
//! ```ignore
//! Expression::compile_many(&[
//!     Expression::compare("year", Operator::Gt, 2000),
//!     Expression::compare("year", Operator::Lt, 2010),
//! ])?;
//! ```
//!
//! yields `{ "year": { "$gt": 2000, "$lt": 2010 } }`. Logical combinators compile to
//! list-valued keys: `{ "$or": [{ "name": { "$eq": "A" } }, { "year": { "$gt": 2000 } }] }`.

use bson::{Bson, Document, doc};

use crate::{
    error::{OdmError, OdmResult},
    schema::FieldRef,
};

/// Anything that can name a field: a plain string or a resolved [`FieldRef`].
pub trait IntoFieldPath {
    /// Returns the fully dotted field path.
    fn into_field_path(self) -> String;
}

impl IntoFieldPath for &str {
    fn into_field_path(self) -> String {
        self.to_string()
    }
}

impl IntoFieldPath for String {
    fn into_field_path(self) -> String {
        self
    }
}

impl IntoFieldPath for &String {
    fn into_field_path(self) -> String {
        self.clone()
    }
}

impl IntoFieldPath for FieldRef {
    fn into_field_path(self) -> String {
        self.path().to_string()
    }
}

impl IntoFieldPath for &FieldRef {
    fn into_field_path(self) -> String {
        self.path().to_string()
    }
}

/// Normalizes a field key into its dotted string form.
///
/// This is the single point where keys are resolved; every expression constructor calls it.
pub fn resolve_field_path(key: impl IntoFieldPath) -> String {
    key.into_field_path()
}

/// Field comparison operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `$eq`
    Eq,
    /// `$ne`
    Ne,
    /// `$in`
    In,
    /// `$nin`
    Nin,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$regex`
    Regex,
    /// `$exists`
    Exists,
    /// `$all`
    All,
    /// `$size`
    Size,
    /// Any other native operator, only reachable through raw queries.
    Custom(String),
}

impl Operator {
    /// Returns the native operator tag (e.g. `$gt`).
    pub fn tag(&self) -> &str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::Regex => "$regex",
            Operator::Exists => "$exists",
            Operator::All => "$all",
            Operator::Size => "$size",
            Operator::Custom(tag) => tag,
        }
    }

    /// Parses a native operator tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$in" => Operator::In,
            "$nin" => Operator::Nin,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$regex" => Operator::Regex,
            "$exists" => Operator::Exists,
            "$all" => Operator::All,
            "$size" => Operator::Size,
            other => Operator::Custom(other.to_string()),
        }
    }
}

/// Logical combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    /// All operands must match.
    And,
    /// Any operand must match.
    Or,
    /// No operand may match.
    Nor,
}

impl LogicalOp {
    /// Returns the native combinator key.
    pub fn tag(&self) -> &'static str {
        match self {
            LogicalOp::And => "$and",
            LogicalOp::Or => "$or",
            LogicalOp::Nor => "$nor",
        }
    }

    /// Parses a native combinator key.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "$and" => Some(LogicalOp::And),
            "$or" => Some(LogicalOp::Or),
            "$nor" => Some(LogicalOp::Nor),
            _ => None,
        }
    }
}

/// A single `(key, operator, value, options)` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    key: String,
    operator: Operator,
    value: Bson,
    options: Option<String>,
}

impl Comparison {
    /// Creates a comparison clause. The key is normalized to its dotted form.
    pub fn new(key: impl IntoFieldPath, operator: Operator, value: impl Into<Bson>) -> Self {
        Self {
            key: resolve_field_path(key),
            operator,
            value: value.into(),
            options: None,
        }
    }

    /// Returns a copy of this clause with the given `$options` modifier.
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// The dotted field path.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The comparison operator.
    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// The raw operand.
    pub fn value(&self) -> &Bson {
        &self.value
    }

    /// The `$options` modifier, if any.
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// Returns the operand in storable form; list operands are mapped element-wise.
    pub fn compiled_value(&self) -> Bson {
        storable(&self.value)
    }

    /// Compiles the operator part: `{op: value}` or `{op: value, "$options": options}`.
    pub fn compile_operator(&self) -> Document {
        let mut compiled = doc! { self.operator.tag(): self.compiled_value() };

        if let Some(options) = &self.options {
            compiled.insert("$options", options.clone());
        }

        compiled
    }
}

fn storable(value: &Bson) -> Bson {
    match value {
        Bson::Array(items) => Bson::Array(items.iter().map(storable).collect()),
        other => other.clone(),
    }
}

/// An immutable filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A plain comparison clause.
    Compare(Comparison),
    /// A negated comparison clause: `{key: {"$not": {op: value}}}`.
    Negated(Comparison),
    /// A logical combinator over nested expressions.
    Logical(LogicalOp, Vec<Expression>),
    /// A store-side predicate snippet evaluated by the store (`$where`).
    Where(String),
}

impl Expression {
    /// Creates a comparison expression.
    pub fn compare(key: impl IntoFieldPath, operator: Operator, value: impl Into<Bson>) -> Self {
        Expression::Compare(Comparison::new(key, operator, value))
    }

    /// Returns the expression key: the field path, the combinator tag or `$where`.
    pub fn key(&self) -> &str {
        match self {
            Expression::Compare(comparison) | Expression::Negated(comparison) => comparison.key(),
            Expression::Logical(op, _) => op.tag(),
            Expression::Where(_) => "$where",
        }
    }

    /// Returns `true` for `$and`/`$or`/`$nor` expressions.
    pub fn is_combinator(&self) -> bool {
        matches!(self, Expression::Logical(..))
    }

    /// Returns the negation of this expression.
    ///
    /// Comparisons become [`Expression::Negated`] and vice versa; combinators and
    /// `$where` predicates are wrapped in `$nor`.
    pub fn negate(self) -> Self {
        match self {
            Expression::Compare(comparison) => Expression::Negated(comparison),
            Expression::Negated(comparison) => Expression::Compare(comparison),
            other => Expression::Logical(LogicalOp::Nor, vec![other]),
        }
    }

    /// Compiles this expression into a one-key filter document.
    pub fn compile(&self) -> Document {
        match self {
            Expression::Compare(comparison) => {
                doc! { comparison.key(): comparison.compile_operator() }
            }
            Expression::Negated(comparison) => {
                doc! { comparison.key(): { "$not": comparison.compile_operator() } }
            }
            Expression::Logical(op, operands) => doc! {
                op.tag(): operands
                    .iter()
                    .map(|operand| Bson::Document(operand.compile()))
                    .collect::<Vec<_>>(),
            },
            Expression::Where(code) => doc! { "$where": code.clone() },
        }
    }

    /// Merges a list of expressions into a single native filter document.
    ///
    /// Regular clauses sharing a key are merged into one operator document; when the same
    /// operator appears twice for the same key the last clause wins. A `$regex` carries its
    /// `$options` with it, so a later pattern never inherits the flags of an earlier one.
    ///
    /// A key holds at most one `$not`; further negations of that key go to the top-level
    /// `$and` list, as do further `$where` snippets and combinators whose kind is already
    /// stored under its own key.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidQuery`] for combinators without operands.
    pub fn compile_many(expressions: &[Expression]) -> OdmResult<Document> {
        let mut regular = Document::new();
        let mut combinators = Document::new();
        let mut overflow: Vec<Bson> = Vec::new();
        let mut where_clause: Option<&str> = None;

        for expression in expressions {
            match expression {
                Expression::Compare(comparison) => {
                    if comparison.operator() == &Operator::Regex {
                        if let Some(Bson::Document(existing)) = regular.get_mut(comparison.key()) {
                            existing.remove("$options");
                        }
                    }
                    merge_operator(&mut regular, comparison.key(), comparison.compile_operator());
                }
                Expression::Negated(comparison) => {
                    let negated = doc! { "$not": comparison.compile_operator() };
                    let already_negated = matches!(
                        regular.get(comparison.key()),
                        Some(Bson::Document(existing)) if existing.contains_key("$not")
                    );

                    if already_negated {
                        overflow.push(Bson::Document(doc! { comparison.key(): negated }));
                    } else {
                        merge_operator(&mut regular, comparison.key(), negated);
                    }
                }
                Expression::Logical(op, operands) => {
                    if operands.is_empty() {
                        return Err(OdmError::InvalidQuery(format!(
                            "`{}` requires at least one expression",
                            op.tag()
                        )));
                    }

                    let compiled = operands
                        .iter()
                        .map(|operand| Expression::compile_many(std::slice::from_ref(operand)).map(Bson::Document))
                        .collect::<OdmResult<Vec<_>>>()?;

                    if combinators.contains_key(op.tag()) {
                        overflow.push(Bson::Document(doc! { op.tag(): compiled }));
                    } else {
                        combinators.insert(op.tag(), compiled);
                    }
                }
                Expression::Where(code) => {
                    if where_clause.is_some() {
                        overflow.push(Bson::Document(doc! { "$where": code.clone() }));
                    } else {
                        where_clause = Some(code);
                    }
                }
            }
        }

        if !overflow.is_empty() {
            match combinators.get_mut("$and") {
                Some(Bson::Array(list)) => list.extend(overflow),
                _ => {
                    combinators.insert("$and", overflow);
                }
            }
        }

        let mut compiled = regular;
        for (key, value) in combinators {
            compiled.insert(key, value);
        }

        if let Some(code) = where_clause {
            compiled.insert("$where", code);
        }

        Ok(compiled)
    }

    /// Converts a native filter document back into expressions.
    ///
    /// Supported shapes:
    ///
    /// - `{"name": "value"}` (equality)
    /// - `{"year": {"$gt": 1990, "$lt": 2000}}` (one expression per operator)
    /// - `{"name": {"$regex": "^A", "$options": "i"}}`
    /// - `{"name": {"$not": {"$eq": "A"}}}`
    /// - `{"$or": [{...}, {...}]}`, `{"$and": [...]}`, `{"$nor": [...]}`
    /// - `{"$where": "this.a > this.b"}`
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidQuery`] for unsupported top-level operators or
    /// combinators that do not hold a list of documents.
    pub fn unpack(filter: &Document) -> OdmResult<Vec<Expression>> {
        let mut expressions = Vec::new();

        for (key, value) in filter {
            if let Some(op) = LogicalOp::from_tag(key) {
                let operands = value
                    .as_array()
                    .ok_or_else(|| OdmError::InvalidQuery(format!("`{key}` requires a list of documents")))?
                    .iter()
                    .map(|item| match item {
                        Bson::Document(inner) => {
                            let mut unpacked = Expression::unpack(inner)?;
                            Ok(if unpacked.len() == 1 {
                                unpacked.remove(0)
                            } else {
                                Expression::Logical(LogicalOp::And, unpacked)
                            })
                        }
                        other => Err(OdmError::InvalidQuery(format!(
                            "`{key}` operands must be documents, got {:?}",
                            other.element_type()
                        ))),
                    })
                    .collect::<OdmResult<Vec<_>>>()?;

                expressions.push(Expression::Logical(op, operands));
                continue;
            }

            if key == "$where" {
                match value {
                    Bson::String(code) => expressions.push(Expression::Where(code.clone())),
                    Bson::JavaScriptCode(code) => expressions.push(Expression::Where(code.clone())),
                    other => {
                        return Err(OdmError::InvalidQuery(format!(
                            "`$where` requires a string, got {:?}",
                            other.element_type()
                        )));
                    }
                }
                continue;
            }

            if key.starts_with('$') {
                return Err(OdmError::InvalidQuery(format!("unsupported top-level operator `{key}`")));
            }

            match value {
                Bson::Document(operators) if is_operator_document(operators) => {
                    expressions.extend(unpack_operators(key, operators)?);
                }
                other => expressions.push(Expression::compare(key, Operator::Eq, other.clone())),
            }
        }

        Ok(expressions)
    }
}

fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

fn unpack_operators(key: &str, operators: &Document) -> OdmResult<Vec<Expression>> {
    let options = operators
        .get("$options")
        .and_then(Bson::as_str)
        .map(str::to_string);

    let mut expressions = Vec::new();

    for (tag, operand) in operators {
        match tag.as_str() {
            "$options" => {}
            "$not" => match operand {
                Bson::Document(inner) if is_operator_document(inner) => {
                    for negated in unpack_operators(key, inner)? {
                        expressions.push(negated.negate());
                    }
                }
                other => {
                    return Err(OdmError::InvalidQuery(format!(
                        "`$not` on `{key}` requires an operator document, got {:?}",
                        other.element_type()
                    )));
                }
            },
            _ => {
                let mut comparison = Comparison::new(key, Operator::from_tag(tag), operand.clone());
                if comparison.operator == Operator::Regex {
                    if let Some(options) = &options {
                        comparison = comparison.with_options(options.clone());
                    }
                }
                expressions.push(Expression::Compare(comparison));
            }
        }
    }

    Ok(expressions)
}

fn merge_operator(target: &mut Document, key: &str, operator: Document) {
    match target.get_mut(key) {
        Some(Bson::Document(existing)) => {
            for (tag, value) in operator {
                existing.insert(tag, value);
            }
        }
        _ => {
            target.insert(key, operator);
        }
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// Returns the native direction value (`1` or `-1`).
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }

    /// Returns the opposite direction.
    pub fn reverse(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// An immutable `(key, direction)` ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortExpression {
    key: String,
    direction: SortDirection,
}

impl SortExpression {
    /// Creates a sort clause. The key is normalized to its dotted form.
    pub fn new(key: impl IntoFieldPath, direction: SortDirection) -> Self {
        Self {
            key: resolve_field_path(key),
            direction,
        }
    }

    /// The dotted field path.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The sort direction.
    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    /// Compiles this clause to a `(key, direction)` pair.
    pub fn compile(&self) -> (String, SortDirection) {
        (self.key.clone(), self.direction)
    }

    /// Compiles a list of clauses into a native sort document, preserving order.
    pub fn compile_many(sorts: &[SortExpression]) -> Document {
        sorts
            .iter()
            .map(|sort| (sort.key.clone(), Bson::Int32(sort.direction.as_i32())))
            .collect()
    }
}
