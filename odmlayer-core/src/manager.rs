//! The chainable query builder.
//!
//! A [`Manager`] is bound to one document type and one collection. Chain calls (`filter`,
//! `exclude`, `sort`, `limit`, `skip`, `only`, `defer`, `raw`) never modify the receiver;
//! each returns a new manager carrying a copy of the accumulated [`QueryState`]. Terminal
//! calls compile that state into a native filter and sort, run it against the
//! [`StoreBackend`] and materialize the rows.
//!
//! ```ignore
//! let movies = store.objects::<Movie>();
//!
//! let recent = movies
//!     .filter(doc! { "year__gt": 2000 })?
//!     .exclude(doc! { "language__in": ["EN"] })?
//!     .sort("year", SortDirection::Desc)
//!     .limit(10)
//!     .all()
//!     .await?;
//!
//! // `movies` is untouched and can start another chain.
//! let downfall = movies.get_by(doc! { "name": "Downfall" }).await?;
//! ```

use std::{fmt, marker::PhantomData, sync::Arc};

use bson::{Bson, Document as BsonDocument, doc, oid::ObjectId};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use tracing::{debug, warn};

use crate::{
    backend::{DocumentCursor, FindOptions, StoreBackend},
    document::{Document, DocumentExt},
    error::{OdmError, OdmResult},
    expression::{Expression, IntoFieldPath, Operator, SortDirection, SortExpression, resolve_field_path},
    lookup::LookupParser,
    operators::Q,
    page::{Page, PaginationParams},
    row::{FieldSelection, Full, Partial, Projection, get_path},
    settings::OdmSettings,
};

/// The accumulated, not yet executed, state of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    filter: Vec<Expression>,
    sort: Vec<SortExpression>,
    limit_count: u64,
    skip_count: u64,
    only_fields: Vec<String>,
    defer_fields: Vec<String>,
}

impl QueryState {
    /// Filter expressions, in the order they were added.
    pub fn filter(&self) -> &[Expression] {
        &self.filter
    }

    /// Sort expressions, in the order they were added.
    pub fn sort(&self) -> &[SortExpression] {
        &self.sort
    }

    /// Maximum number of rows; `0` is unbounded.
    pub fn limit_count(&self) -> u64 {
        self.limit_count
    }

    /// Number of rows to skip.
    pub fn skip_count(&self) -> u64 {
        self.skip_count
    }

    /// Fields selected with `only`, primary key included.
    pub fn only_fields(&self) -> &[String] {
        &self.only_fields
    }

    /// Fields left out with `defer`.
    pub fn defer_fields(&self) -> &[String] {
        &self.defer_fields
    }
}

/// Input accepted by [`Manager::raw`].
#[derive(Debug, Clone, PartialEq)]
pub enum RawQuery {
    /// A native filter document, unpacked with [`Expression::unpack`].
    Filter(BsonDocument),
    /// Prebuilt expressions.
    Expressions(Vec<Expression>),
}

impl From<BsonDocument> for RawQuery {
    fn from(value: BsonDocument) -> Self {
        RawQuery::Filter(value)
    }
}

impl From<Expression> for RawQuery {
    fn from(value: Expression) -> Self {
        RawQuery::Expressions(vec![value])
    }
}

impl From<Vec<Expression>> for RawQuery {
    fn from(value: Vec<Expression>) -> Self {
        RawQuery::Expressions(value)
    }
}

/// Options for [`Manager::values`] and [`Manager::values_list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuesOptions {
    fields: Vec<String>,
    exclude: Vec<String>,
    exclude_none: bool,
    flat: bool,
}

impl ValuesOptions {
    /// No restrictions: every field of every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the output to `fields`, in that order.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Drops `fields` from the output.
    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Drops `null` values from the output.
    pub fn exclude_none(mut self, exclude_none: bool) -> Self {
        self.exclude_none = exclude_none;
        self
    }

    /// Makes [`Manager::values_list`] return a flat list. Requires exactly one field.
    pub fn flat(mut self, flat: bool) -> Self {
        self.flat = flat;
        self
    }
}

/// Result of [`Manager::values_list`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValuesList {
    /// One list of values per row.
    Rows(Vec<Vec<Bson>>),
    /// The single selected field of every row.
    Flat(Vec<Bson>),
}

/// A cloning query builder for the documents of type `D`.
///
/// `P` selects how rows are materialized: [`Full`] documents by default, [`Partial`]
/// proxies once `only` or `defer` has been applied.
pub struct Manager<'a, B, D, P = Full>
where
    B: StoreBackend,
    D: Document,
    P: Projection<D>,
{
    backend: &'a B,
    settings: Arc<OdmSettings>,
    state: QueryState,
    _projection: PhantomData<fn() -> (D, P)>,
}

impl<B, D, P> Clone for Manager<'_, B, D, P>
where
    B: StoreBackend,
    D: Document,
    P: Projection<D>,
{
    fn clone(&self) -> Self {
        Self {
            backend: self.backend,
            settings: self.settings.clone(),
            state: self.state.clone(),
            _projection: PhantomData,
        }
    }
}

impl<B, D, P> fmt::Debug for Manager<'_, B, D, P>
where
    B: StoreBackend,
    D: Document,
    P: Projection<D>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("collection", &D::collection_name())
            .field("state", &self.state)
            .finish()
    }
}

impl<'a, B, D> Manager<'a, B, D, Full>
where
    B: StoreBackend,
    D: Document,
{
    /// Creates a manager with the default settings.
    pub fn new(backend: &'a B) -> Self {
        Self::with_settings(backend, Arc::new(OdmSettings::default()))
    }

    /// Creates a manager bound to the given settings.
    pub fn with_settings(backend: &'a B, settings: Arc<OdmSettings>) -> Self {
        Self {
            backend,
            settings,
            state: QueryState::default(),
            _projection: PhantomData,
        }
    }
}

impl<'a, B, D, P> Manager<'a, B, D, P>
where
    B: StoreBackend,
    D: Document,
    P: Projection<D>,
{
    /// The collection this manager queries.
    pub fn collection(&self) -> &'static str {
        D::collection_name()
    }

    /// The accumulated query state.
    pub fn state(&self) -> &QueryState {
        &self.state
    }

    /// The settings lookups are parsed with.
    pub fn settings(&self) -> &OdmSettings {
        &self.settings
    }

    fn derive<Q2: Projection<D>>(&self, state: QueryState) -> Manager<'a, B, D, Q2> {
        Manager {
            backend: self.backend,
            settings: self.settings.clone(),
            state,
            _projection: PhantomData,
        }
    }

    fn update_state(&self, apply: impl FnOnce(&mut QueryState)) -> Self {
        let mut state = self.state.clone();
        apply(&mut state);
        self.derive(state)
    }

    fn parser(&self) -> LookupParser<'_> {
        LookupParser::new(&self.settings, D::schema(), D::id_field())
    }

    fn filter_query(&self, lookups: &BsonDocument, exclude: bool) -> OdmResult<Self> {
        let (filters, sorts) = self.parser().parse(lookups, exclude)?;

        Ok(self.update_state(|state| {
            state.filter.extend(filters);
            state.sort.extend(sorts);
        }))
    }

    // Chain operations

    /// Adds keyword lookups (`field__operator: value`) to the filter.
    ///
    /// Sort lookups (`field__asc`, `field__desc`) are added to the sort list instead.
    pub fn filter(&self, lookups: BsonDocument) -> OdmResult<Self> {
        self.filter_query(&lookups, false)
    }

    /// Like [`Manager::filter`], but every produced filter expression is negated.
    pub fn exclude(&self, lookups: BsonDocument) -> OdmResult<Self> {
        self.filter_query(&lookups, true)
    }

    /// Adds a prebuilt expression to the filter.
    pub fn filter_expr(&self, expression: Expression) -> Self {
        self.update_state(|state| state.filter.push(expression))
    }

    /// Adds a native filter document (or prebuilt expressions) to the filter.
    pub fn raw(&self, query: impl Into<RawQuery>) -> OdmResult<Self> {
        let expressions = match query.into() {
            RawQuery::Filter(filter) => Expression::unpack(&filter)?,
            RawQuery::Expressions(expressions) => expressions,
        };

        Ok(self.update_state(|state| state.filter.extend(expressions)))
    }

    /// Appends a sort clause.
    pub fn sort(&self, key: impl IntoFieldPath, direction: SortDirection) -> Self {
        self.sort_expr(SortExpression::new(key, direction))
    }

    /// Appends a prebuilt sort clause.
    pub fn sort_expr(&self, sort: SortExpression) -> Self {
        self.update_state(|state| state.sort.push(sort))
    }

    /// Appends a sort clause given as a single lookup, e.g. `doc! { "year__desc": true }`.
    ///
    /// # Errors
    ///
    /// [`OdmError::FieldDefinition`] unless `lookup` holds exactly one entry.
    pub fn sort_lookup(&self, lookup: BsonDocument) -> OdmResult<Self> {
        if lookup.len() != 1 {
            return Err(OdmError::FieldDefinition(format!(
                "`sort` only allows one field per sort, got {}; chain sort calls for multiple fields",
                lookup.len()
            )));
        }

        self.filter_query(&lookup, false)
    }

    /// Limits the number of rows. `0` is unbounded.
    pub fn limit(&self, count: u64) -> Self {
        self.update_state(|state| state.limit_count = count)
    }

    /// Skips the first `count` rows.
    pub fn skip(&self, count: u64) -> Self {
        self.update_state(|state| state.skip_count = count)
    }

    /// Loads only `fields` (and the primary key) into the materialized rows.
    ///
    /// # Errors
    ///
    /// [`OdmError::FieldDefinition`] if `defer` was already applied, and
    /// [`OdmError::InvalidField`] for unknown fields.
    pub fn only<I, S>(&self, fields: I) -> OdmResult<Manager<'a, B, D, Partial>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.state.defer_fields.is_empty() {
            return Err(OdmError::FieldDefinition(
                "only() and defer() are mutually exclusive; defer() was already applied".to_string(),
            ));
        }

        let mut fields = self.projected_fields(fields)?;
        if !fields.iter().any(|field| field == D::id_field()) {
            fields.insert(0, D::id_field().to_string());
        }

        let mut state = self.state.clone();
        state.only_fields = fields;
        Ok(self.derive(state))
    }

    /// Leaves `fields` out of the materialized rows.
    ///
    /// # Errors
    ///
    /// [`OdmError::FieldDefinition`] if `only` was already applied, and
    /// [`OdmError::InvalidField`] for unknown fields.
    pub fn defer<I, S>(&self, fields: I) -> OdmResult<Manager<'a, B, D, Partial>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.state.only_fields.is_empty() {
            return Err(OdmError::FieldDefinition(
                "only() and defer() are mutually exclusive; only() was already applied".to_string(),
            ));
        }

        let fields = self.projected_fields(fields)?;

        let mut state = self.state.clone();
        state.defer_fields = fields;
        Ok(self.derive(state))
    }

    fn projected_fields<I, S>(&self, fields: I) -> OdmResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parser = self.parser();

        fields
            .into_iter()
            .map(|field| {
                let field = parser.replace_id(field.as_ref());
                parser.resolve(&field).map(|resolved| resolved.path().to_string())
            })
            .collect()
    }

    /// A fresh manager for the same document type, without any accumulated state.
    pub fn none(&self) -> Manager<'a, B, D, Full> {
        self.derive(QueryState::default())
    }

    // Terminal operations

    fn compiled_filter(&self) -> OdmResult<BsonDocument> {
        Expression::compile_many(&self.state.filter)
    }

    fn find_options(&self) -> FindOptions {
        FindOptions::default()
            .with_sort(self.state.sort.iter().map(SortExpression::compile).collect())
            .with_skip(self.state.skip_count)
            .with_limit(i64::try_from(self.state.limit_count).unwrap_or(i64::MAX))
    }

    async fn cursor(&self, where_clause: Option<Bson>) -> OdmResult<DocumentCursor> {
        let filter = self.compiled_filter()?;
        let mut options = self.find_options();
        options.where_clause = where_clause;

        debug!(
            collection = D::collection_name(),
            filter = %filter,
            sort = ?options.sort,
            skip = options.skip,
            limit = options.limit,
            "find"
        );

        self.backend
            .find(D::collection_name(), filter, options)
            .await
    }

    fn rows(&self, cursor: DocumentCursor) -> BoxStream<'static, OdmResult<P::Output>> {
        materialize::<D, P>(
            cursor,
            self.state.only_fields.clone(),
            self.state.defer_fields.clone(),
            self.settings.parsed_ids.clone(),
        )
    }

    /// Opens a lazily materialized stream over the matching rows.
    ///
    /// Every call opens a new cursor.
    pub async fn iter(&self) -> OdmResult<BoxStream<'static, OdmResult<P::Output>>> {
        let cursor = self.cursor(None).await?;
        Ok(self.rows(cursor))
    }

    /// Fetches every matching row, applying sort, skip and limit in that order.
    pub async fn all(&self) -> OdmResult<Vec<P::Output>> {
        self.iter()
            .await?
            .try_collect()
            .await
    }

    /// Counts the matching records. Sort, skip and limit are ignored.
    pub async fn count(&self) -> OdmResult<u64> {
        let filter = self.compiled_filter()?;
        debug!(collection = D::collection_name(), filter = %filter, "count");

        self.backend
            .count_documents(D::collection_name(), filter)
            .await
    }

    /// Returns `true` if at least one record matches.
    pub async fn exists(&self) -> OdmResult<bool> {
        let mut cursor = self.limit(1).cursor(None).await?;
        Ok(cursor.try_next().await?.is_some())
    }

    /// The first matching row, if any.
    pub async fn first(&self) -> OdmResult<Option<P::Output>> {
        Ok(self
            .limit(1)
            .all()
            .await?
            .into_iter()
            .next())
    }

    /// The last matching row, if any.
    ///
    /// This fetches every matching row and keeps the final one, so it is O(n) in the size
    /// of the result. Sort in reverse and use [`Manager::first`] on large collections.
    pub async fn last(&self) -> OdmResult<Option<P::Output>> {
        if self.state.limit_count == 0 {
            warn!(
                collection = D::collection_name(),
                "last() without a limit materializes the whole result set"
            );
        }

        Ok(self.all().await?.pop())
    }

    /// Fetches exactly one matching row.
    ///
    /// At most two records are requested from the store.
    ///
    /// # Errors
    ///
    /// [`OdmError::DocumentNotFound`] when nothing matches and
    /// [`OdmError::MultipleDocumentsReturned`] when more than one record does.
    pub async fn get(&self) -> OdmResult<P::Output> {
        let mut rows = self.limit(2).all().await?;

        match rows.len() {
            0 => Err(OdmError::DocumentNotFound(D::collection_name().to_string())),
            1 => Ok(rows.remove(0)),
            _ => Err(OdmError::MultipleDocumentsReturned(D::collection_name().to_string())),
        }
    }

    /// `filter(lookups)?.get()`.
    pub async fn get_by(&self, lookups: BsonDocument) -> OdmResult<P::Output> {
        self.filter(lookups)?.get().await
    }

    /// Like [`Manager::get`], but returns `None` when nothing matches.
    pub async fn get_or_none(&self) -> OdmResult<Option<P::Output>> {
        match self.get().await {
            Ok(row) => Ok(Some(row)),
            Err(OdmError::DocumentNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// `filter(lookups)?.get_or_none()`.
    pub async fn get_or_none_by(&self, lookups: BsonDocument) -> OdmResult<Option<P::Output>> {
        self.filter(lookups)?.get_or_none().await
    }

    /// Fetches the row with the given primary key.
    ///
    /// String ids are parsed as object ids. Other filters of this manager are ignored.
    pub async fn get_document_by_id(&self, id: impl Into<Bson>) -> OdmResult<P::Output> {
        let id = match id.into() {
            Bson::String(text) => ObjectId::parse_str(&text)
                .map(Bson::ObjectId)
                .map_err(|_| OdmError::invalid_value(D::id_field(), format!("\"{text}\" is not a valid ObjectId")))?,
            other => other,
        };

        let state = QueryState {
            filter: vec![Q::eq(D::id_field(), id)],
            only_fields: self.state.only_fields.clone(),
            defer_fields: self.state.defer_fields.clone(),
            ..QueryState::default()
        };

        self.derive::<P>(state).get().await
    }

    /// Validates values against the schema. The primary key is passed through untouched.
    fn validate_values(&self, values: &BsonDocument) -> OdmResult<BsonDocument> {
        let parser = self.parser();
        let mut id = None;
        let mut fields = BsonDocument::new();

        for (key, value) in values {
            let key = parser.replace_id(key);
            if key == D::id_field() {
                id = Some(value.clone());
            } else {
                fields.insert(key, value.clone());
            }
        }

        let mut validated = D::schema().validate(&fields)?;
        if let Some(id) = id {
            validated.insert(D::id_field(), id);
        }

        Ok(validated)
    }

    /// Equality constraints of the filter, as a native filter document.
    fn equality_constraints(&self) -> BsonDocument {
        let mut constraints = BsonDocument::new();

        for expression in &self.state.filter {
            if let Expression::Compare(comparison) = expression {
                if *comparison.operator() == Operator::Eq {
                    constraints.insert(comparison.key(), comparison.compiled_value());
                }
            }
        }

        constraints
    }

    /// Fetches the row matching the equality constraints of the filter, inserting it when
    /// it does not exist yet.
    ///
    /// The inserted record is built from `defaults` overridden by the filter equalities.
    /// Values are validated against the schema before the store is contacted.
    pub async fn get_or_create(&self, defaults: BsonDocument) -> OdmResult<P::Output> {
        let data = self.equality_constraints();

        let mut values = defaults;
        for (key, value) in &data {
            values.insert(key.clone(), value.clone());
        }

        let values = self.validate_values(&values)?;

        if !values.keys().any(|key| key.contains('.')) {
            D::from_document(values.clone())
                .map_err(|err| OdmError::validation(D::schema().name(), err.to_string()))?;
        }

        debug!(collection = D::collection_name(), filter = %data, "get_or_create");

        let record = self
            .backend
            .find_one_and_update(D::collection_name(), data, doc! { "$setOnInsert": values }, true)
            .await?
            .ok_or_else(|| OdmError::Backend("upsert did not return a document".to_string()))?;

        P::materialize(record, self.selection())
    }

    fn selection(&self) -> FieldSelection<'_> {
        FieldSelection {
            only: &self.state.only_fields,
            defer: &self.state.defer_fields,
            id_field: D::id_field(),
            id_aliases: &self.settings.parsed_ids,
        }
    }

    /// Inserts a document and returns it with its assigned primary key.
    pub async fn create(&self, document: &D) -> OdmResult<D> {
        let mut record = insertable::<D>(document)?;

        debug!(collection = D::collection_name(), "create");
        let id = self
            .backend
            .insert_one(D::collection_name(), record.clone())
            .await?;

        record.insert(D::id_field(), id);
        D::from_document(record)
    }

    /// Inserts documents in order and returns them with their assigned primary keys.
    pub async fn create_many(&self, documents: Vec<D>) -> OdmResult<Vec<D>> {
        let records = documents
            .iter()
            .map(insertable::<D>)
            .collect::<OdmResult<Vec<_>>>()?;

        debug!(collection = D::collection_name(), count = records.len(), "create_many");
        let ids = self
            .backend
            .insert_many(D::collection_name(), records.clone())
            .await?;

        if ids.len() != records.len() {
            return Err(OdmError::Backend(format!(
                "inserted {} documents but received {} ids",
                records.len(),
                ids.len()
            )));
        }

        records
            .into_iter()
            .zip(ids)
            .map(|(mut record, id)| {
                record.insert(D::id_field(), id);
                D::from_document(record)
            })
            .collect()
    }

    /// Alias of [`Manager::create_many`].
    pub async fn bulk_create(&self, documents: Vec<D>) -> OdmResult<Vec<D>> {
        self.create_many(documents).await
    }

    /// Deletes every matching record and returns the deleted count.
    pub async fn delete(&self) -> OdmResult<u64> {
        let filter = self.compiled_filter()?;
        debug!(collection = D::collection_name(), filter = %filter, "delete");

        self.backend
            .delete_many(D::collection_name(), filter)
            .await
    }

    /// Sets `values` on every matching record and returns the updated rows.
    ///
    /// Values are validated against the schema first. The returned rows are fetched with
    /// a filter where clauses on the updated fields are replaced by equality on the new
    /// values.
    ///
    /// # Errors
    ///
    /// [`OdmError::InvalidField`] for fields the schema does not declare and
    /// [`OdmError::Validation`] for values that do not fit their field.
    pub async fn update(&self, values: BsonDocument) -> OdmResult<Vec<P::Output>> {
        if values.is_empty() {
            return self.all().await;
        }

        let values = self.validate_values(&values)?;
        let filter = self.compiled_filter()?;

        debug!(collection = D::collection_name(), filter = %filter, update = %values, "update");
        self.backend
            .update_many(D::collection_name(), filter, doc! { "$set": values.clone() })
            .await?;

        let updated = self.update_state(|state| {
            state.filter.retain(|expression| match expression {
                Expression::Compare(comparison) | Expression::Negated(comparison) => {
                    !values.contains_key(comparison.key())
                }
                _ => true,
            });
            state.filter.extend(
                values
                    .iter()
                    .map(|(key, value)| Q::eq(key, value.clone())),
            );
        });

        updated.all().await
    }

    /// Alias of [`Manager::update`].
    pub async fn update_many(&self, values: BsonDocument) -> OdmResult<Vec<P::Output>> {
        self.update(values).await
    }

    /// Alias of [`Manager::update`].
    pub async fn bulk_update(&self, values: BsonDocument) -> OdmResult<Vec<P::Output>> {
        self.update(values).await
    }

    /// Distinct values of `key` across the matching records.
    pub async fn distinct_values(&self, key: impl IntoFieldPath) -> OdmResult<Vec<Bson>> {
        let key = resolve_field_path(key);
        let filter = self.compiled_filter()?;
        debug!(collection = D::collection_name(), filter = %filter, key = %key, "distinct");

        self.backend
            .distinct(D::collection_name(), &key, filter)
            .await
    }

    /// Fetches the matching rows that also satisfy a store-side predicate.
    ///
    /// # Errors
    ///
    /// [`OdmError::InvalidLookupValue`] unless `condition` is a string or JavaScript code.
    pub async fn where_(&self, condition: impl Into<Bson>) -> OdmResult<Vec<P::Output>> {
        let condition = condition.into();

        if !matches!(condition, Bson::String(_) | Bson::JavaScriptCode(_)) {
            return Err(OdmError::invalid_value(
                "where",
                format!(
                    "the where clause must be a string or JavaScript code, got {:?}",
                    condition.element_type()
                ),
            ));
        }

        let cursor = self.cursor(Some(condition)).await?;
        self.rows(cursor).try_collect().await
    }

    /// Fetches the matching rows as plain mappings.
    pub async fn values(&self, options: ValuesOptions) -> OdmResult<Vec<BsonDocument>> {
        let aliases = &self.settings.parsed_ids;

        self.all()
            .await?
            .iter()
            .map(|row| {
                let record = P::to_values(row)?;
                Ok(project(record, &options, D::id_field(), aliases))
            })
            .collect()
    }

    /// Fetches the matching rows as lists of values, or as a flat list with
    /// [`ValuesOptions::flat`].
    ///
    /// # Errors
    ///
    /// [`OdmError::FieldDefinition`] when `flat` is requested without exactly one field,
    /// raised before any store call.
    pub async fn values_list(&self, options: ValuesOptions) -> OdmResult<ValuesList> {
        if options.flat && options.fields.len() != 1 {
            return Err(OdmError::FieldDefinition(format!(
                "exactly one field is required when `flat` is enabled, got {}",
                options.fields.len()
            )));
        }

        let rows = self.values(options.clone()).await?;

        if options.flat {
            let field = &options.fields[0];
            return rows
                .into_iter()
                .map(|mut row| {
                    row.remove(field).ok_or_else(|| {
                        OdmError::FieldDefinition(format!("{field} does not exist in the results"))
                    })
                })
                .collect::<OdmResult<Vec<_>>>()
                .map(ValuesList::Flat);
        }

        Ok(ValuesList::Rows(
            rows.into_iter()
                .map(|row| row.into_iter().map(|(_, value)| value).collect())
                .collect(),
        ))
    }

    /// Fetches one page of rows together with the total count.
    ///
    /// Any skip or limit already set on this manager is replaced by the page window.
    pub async fn paginate(&self, params: PaginationParams) -> OdmResult<Page<P::Output>> {
        let count = self.count().await?;
        let items = self
            .skip(params.offset())
            .limit(params.per_page)
            .all()
            .await?;

        Ok(params.page_of(items, count))
    }
}

fn materialize<D, P>(
    cursor: DocumentCursor,
    only: Vec<String>,
    defer: Vec<String>,
    aliases: Vec<String>,
) -> BoxStream<'static, OdmResult<P::Output>>
where
    D: Document,
    P: Projection<D>,
{
    cursor
        .map(move |record| {
            record.and_then(|record| {
                P::materialize(record, FieldSelection {
                    only: &only,
                    defer: &defer,
                    id_field: D::id_field(),
                    id_aliases: &aliases,
                })
            })
        })
        .boxed()
}

fn insertable<D: Document>(document: &D) -> OdmResult<BsonDocument> {
    let mut record = document.to_document()?;

    if matches!(record.get(D::id_field()), Some(Bson::Null)) {
        record.remove(D::id_field());
    }

    Ok(record)
}

fn project(record: BsonDocument, options: &ValuesOptions, id_field: &str, aliases: &[String]) -> BsonDocument {
    let canonical = |field: &str| -> String {
        if aliases.iter().any(|alias| alias == field) {
            id_field.to_string()
        } else {
            field.to_string()
        }
    };

    let mut projected = if options.fields.is_empty() {
        record
    } else {
        let mut selected = BsonDocument::new();
        for field in &options.fields {
            if let Some(value) = get_path(&record, &canonical(field)) {
                selected.insert(field.clone(), value.clone());
            }
        }
        selected
    };

    for field in &options.exclude {
        projected.remove(field);
        projected.remove(&canonical(field));
    }

    if options.exclude_none {
        projected = projected
            .into_iter()
            .filter(|(_, value)| !matches!(value, Bson::Null))
            .collect();
    }

    projected
}
