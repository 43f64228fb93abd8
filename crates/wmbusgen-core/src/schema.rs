//! Composable validators for configuration trees
//!
//! A declaration is validated by a [`Validator`] built from small pieces:
//! primitive validators ([`string`], [`one_of`], [`int_range`], ...), the
//! [`Validator::and_then`] / [`Validator::or`] combinators, and [`Fields`],
//! which walks a mapping and aggregates every field error instead of
//! stopping at the first one.
//!
//! Validators run against a [`Context`] that tracks the current field path
//! and stages side effects (drivers used, display pages registered). Staged
//! effects are only committed by the caller once the whole declaration is
//! known to be valid.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;
use toml::{Table, Value};

use crate::declaration::{ComponentKind, IdGenerator, IdRef, Identifier};
use crate::units::{UnitTable, NO_UNITS};

/// One step of a path into the configuration tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a value in the configuration tree, e.g. `wmbus_meter[0].key`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Child path under a mapping key
    pub fn key(&self, key: &str) -> Self {
        let mut path = self.clone();
        path.0.push(PathSegment::Key(key.to_string()));
        path
    }

    /// Child path under a list index
    pub fn index(&self, index: usize) -> Self {
        let mut path = self.clone();
        path.0.push(PathSegment::Index(index));
        path
    }

    /// The innermost mapping key, used as the field name in messages
    pub fn last_key(&self) -> Option<&str> {
        self.0.iter().rev().find_map(|segment| match segment {
            PathSegment::Key(key) => Some(key.as_str()),
            PathSegment::Index(_) => None,
        })
    }

    fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    fn pop(&mut self) {
        self.0.pop();
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{}", key)?,
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// What went wrong with a single field
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationErrorKind {
    #[error("required key not provided")]
    MissingField,
    #[error("extra keys not allowed")]
    UnknownField,
    #[error("expected {expected}, got {found}")]
    InvalidType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Unknown value '{value}' for '{field}', valid options are {}", quote_all(.allowed))]
    InvalidEnumValue {
        field: String,
        value: String,
        allowed: Vec<String>,
    },
    #[error("{0}")]
    InvalidKeyFormat(String),
    #[error("'{first}' and '{second}' are mutually exclusive: {hint}")]
    MutuallyExclusiveFields {
        first: String,
        second: String,
        hint: String,
    },
    #[error("{0}")]
    Invalid(String),
}

fn quote_all(values: &[String]) -> String {
    if values.is_empty() {
        return "(none)".to_string();
    }
    values
        .iter()
        .map(|v| format!("'{}'", v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A field-level validation failure
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{path}: {kind}")]
pub struct ValidationError {
    pub path: FieldPath,
    pub kind: ValidationErrorKind,
}

/// Every validation failure collected for a tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// Errors of a given kind, convenient in tests and diagnostics
    pub fn kinds(&self) -> impl Iterator<Item = &ValidationErrorKind> {
        self.0.iter().map(|e| &e.kind)
    }

    /// `Ok(())` when nothing was collected
    pub fn into_result(self) -> Outcome<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self(vec![error])
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

pub type Outcome<T> = Result<T, ValidationErrors>;

/// Side effects of validating one declaration, applied only on success
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Staged {
    /// Catalog entries chosen by this declaration
    pub drivers: BTreeSet<String>,
    /// Objects registering themselves as display pages
    pub display_pages: Vec<Identifier>,
}

/// Validation state threaded through every validator
pub struct Context<'a> {
    path: FieldPath,
    drivers: &'a [String],
    units: &'a UnitTable,
    ids: &'a mut IdGenerator,
    staged: Staged,
}

impl<'a> Context<'a> {
    /// `drivers` is the set of selectable driver names
    pub fn new(path: FieldPath, drivers: &'a [String], ids: &'a mut IdGenerator) -> Self {
        Self {
            path,
            drivers,
            units: &NO_UNITS,
            ids,
            staged: Staged::default(),
        }
    }

    /// Units used for derived `unit_of_measurement` defaults
    pub fn with_units(mut self, units: &'a UnitTable) -> Self {
        self.units = units;
        self
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// Build an error located at the current path
    pub fn error(&self, kind: ValidationErrorKind) -> ValidationError {
        ValidationError {
            path: self.path.clone(),
            kind,
        }
    }

    /// Short-hand for returning a single error at the current path
    pub fn fail<T>(&self, kind: ValidationErrorKind) -> Outcome<T> {
        Err(self.error(kind).into())
    }

    /// Run `f` with `segment` appended to the current path
    pub fn nested<T>(&mut self, segment: PathSegment, f: impl FnOnce(&mut Self) -> T) -> T {
        self.path.push(segment);
        let result = f(self);
        self.path.pop();
        result
    }

    pub fn drivers(&self) -> &[String] {
        self.drivers
    }

    pub fn units(&self) -> &UnitTable {
        self.units
    }

    pub fn stage_driver(&mut self, name: &str) {
        self.staged.drivers.insert(name.to_string());
    }

    pub fn stage_display_page(&mut self, id: &Identifier) {
        self.staged.display_pages.push(id.clone());
    }

    pub fn generate_id(&mut self, kind: ComponentKind) -> Identifier {
        self.ids.generate(kind)
    }

    /// Side effects gathered so far
    pub fn into_staged(self) -> Staged {
        self.staged
    }
}

/// A rule checking (and normalizing) one raw configuration value
pub trait Validator {
    type Output;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<Self::Output>;

    /// Feed the output of this validator into a further check
    fn and_then<F, O>(self, f: F) -> AndThen<Self, F, O>
    where
        Self: Sized,
        F: Fn(Self::Output, &mut Context<'_>) -> Result<O, ValidationErrorKind>,
    {
        AndThen {
            inner: self,
            f,
            _output: PhantomData,
        }
    }

    /// Accept the value if either this or `other` accepts it
    ///
    /// When both fail, the errors of `other` are reported.
    fn or<B>(self, other: B) -> Any<Self, B>
    where
        Self: Sized,
        B: Validator<Output = Self::Output>,
    {
        Any {
            first: self,
            second: other,
        }
    }
}

pub struct AndThen<V, F, O> {
    inner: V,
    f: F,
    _output: PhantomData<fn() -> O>,
}

impl<V, F, O> Validator for AndThen<V, F, O>
where
    V: Validator,
    F: Fn(V::Output, &mut Context<'_>) -> Result<O, ValidationErrorKind>,
{
    type Output = O;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<O> {
        let output = self.inner.validate(value, cx)?;
        (self.f)(output, cx).map_err(|kind| cx.error(kind).into())
    }
}

pub struct Any<A, B> {
    first: A,
    second: B,
}

impl<A, B> Validator for Any<A, B>
where
    A: Validator,
    B: Validator<Output = A::Output>,
{
    type Output = A::Output;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<A::Output> {
        match self.first.validate(value, cx) {
            Ok(output) => Ok(output),
            Err(_) => self.second.validate(value, cx),
        }
    }
}

/// Adapts a plain function into a validator
pub struct FromFn<O>(fn(&Value, &mut Context<'_>) -> Outcome<O>);

impl<O> Validator for FromFn<O> {
    type Output = O;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<O> {
        (self.0)(value, cx)
    }
}

pub fn from_fn<O>(f: fn(&Value, &mut Context<'_>) -> Outcome<O>) -> FromFn<O> {
    FromFn(f)
}

fn type_error<T>(cx: &Context<'_>, expected: &'static str, value: &Value) -> Outcome<T> {
    cx.fail(ValidationErrorKind::InvalidType {
        expected,
        found: value.type_str(),
    })
}

pub struct Str {
    strict: bool,
}

impl Validator for Str {
    type Output = String;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Integer(i) if !self.strict => Ok(i.to_string()),
            Value::Float(f) if !self.strict => Ok(f.to_string()),
            Value::Boolean(b) if !self.strict => Ok(b.to_string()),
            other => type_error(cx, "string", other),
        }
    }
}

/// A string; numbers and booleans are converted
pub fn string() -> Str {
    Str { strict: false }
}

/// A string, and only a string
pub fn string_strict() -> Str {
    Str { strict: true }
}

pub struct Boolean;

impl Validator for Boolean {
    type Output = bool;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<bool> {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => type_error(cx, "boolean", other),
        }
    }
}

pub fn boolean() -> Boolean {
    Boolean
}

pub struct IntRange {
    min: i64,
    max: i64,
}

impl Validator for IntRange {
    type Output = i64;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<i64> {
        let parsed = match value {
            Value::Integer(i) => *i,
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => i,
                Err(_) => return type_error(cx, "integer", value),
            },
            other => return type_error(cx, "integer", other),
        };
        if parsed < self.min || parsed > self.max {
            return cx.fail(ValidationErrorKind::Invalid(format!(
                "Value {} must be in range {}..={}",
                parsed, self.min, self.max
            )));
        }
        Ok(parsed)
    }
}

pub fn int_range(min: i64, max: i64) -> IntRange {
    IntRange { min, max }
}

/// Membership in a fixed set of options
pub struct OneOf {
    options: Vec<String>,
    lower: bool,
    space: Option<&'static str>,
}

impl OneOf {
    /// Compare case-insensitively; the normalized value is lowercase
    pub fn lower(mut self) -> Self {
        self.lower = true;
        self
    }

    /// Replace spaces in the input before comparing
    pub fn space(mut self, replacement: &'static str) -> Self {
        self.space = Some(replacement);
        self
    }

    fn normalize(&self, raw: &str) -> String {
        let mut value = raw.trim().to_string();
        if self.lower {
            value = value.to_lowercase();
        }
        if let Some(replacement) = self.space {
            value = value.replace(' ', replacement);
        }
        value
    }
}

impl Validator for OneOf {
    type Output = String;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<String> {
        let raw = string().validate(value, cx)?;
        let normalized = self.normalize(&raw);
        if self.options.iter().any(|o| *o == normalized) {
            return Ok(normalized);
        }
        cx.fail(ValidationErrorKind::InvalidEnumValue {
            field: cx.path().last_key().unwrap_or_default().to_string(),
            value: raw,
            allowed: self.options.clone(),
        })
    }
}

pub fn one_of<I, S>(options: I) -> OneOf
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    OneOf {
        options: options.into_iter().map(Into::into).collect(),
        lower: false,
        space: None,
    }
}

/// A list where each item passes `item`; errors are reported per index
pub struct ListOf<V> {
    item: V,
}

impl<V: Validator> Validator for ListOf<V> {
    type Output = Vec<V::Output>;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<Vec<V::Output>> {
        let Value::Array(items) = value else {
            return type_error(cx, "list", value);
        };
        let mut outputs = Vec::with_capacity(items.len());
        let mut errors = ValidationErrors::new();
        for (index, item) in items.iter().enumerate() {
            match cx.nested(PathSegment::Index(index), |cx| self.item.validate(item, cx)) {
                Ok(output) => outputs.push(output),
                Err(e) => errors.extend(e),
            }
        }
        errors.into_result().map(|()| outputs)
    }
}

pub fn list_of<V: Validator>(item: V) -> ListOf<V> {
    ListOf { item }
}

/// A list of items, or a single item standing for a list of one
pub struct OneOrMany<V> {
    list: ListOf<V>,
}

impl<V: Validator> Validator for OneOrMany<V> {
    type Output = Vec<V::Output>;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<Vec<V::Output>> {
        match value {
            Value::Array(_) => self.list.validate(value, cx),
            single => Ok(vec![self.list.item.validate(single, cx)?]),
        }
    }
}

pub fn one_or_many<V: Validator>(item: V) -> OneOrMany<V> {
    OneOrMany {
        list: list_of(item),
    }
}

/// The table behind a mapping value
pub fn table<'v>(value: &'v Value, cx: &Context<'_>) -> Outcome<&'v Table> {
    match value {
        Value::Table(table) => Ok(table),
        other => type_error(cx, "mapping", other),
    }
}

/// An identifier declaration
pub struct DeclareId;

impl Validator for DeclareId {
    type Output = Identifier;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<Identifier> {
        let raw = string_strict().validate(value, cx)?;
        Identifier::parse(&raw).or_else(|message| cx.fail(ValidationErrorKind::Invalid(message)))
    }
}

pub fn declare_id() -> DeclareId {
    DeclareId
}

/// A reference to an identifier declared elsewhere
pub fn use_id() -> impl Validator<Output = IdRef> {
    declare_id().and_then(|id, _| Ok(IdRef::Explicit(id)))
}

/// Walks a mapping field by field, collecting every error
///
/// Field validators that fail record their errors and yield the output
/// type's default so validation can continue; [`Fields::finish`] then
/// reports everything at once.
pub struct Fields<'t> {
    table: &'t Table,
    consumed: BTreeSet<&'t str>,
    errors: ValidationErrors,
}

impl<'t> Fields<'t> {
    pub fn new(value: &'t Value, cx: &Context<'_>) -> Outcome<Self> {
        Ok(Self {
            table: table(value, cx)?,
            consumed: BTreeSet::new(),
            errors: ValidationErrors::new(),
        })
    }

    pub fn has(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    fn run<V: Validator>(
        &mut self,
        cx: &mut Context<'_>,
        key: &str,
        validator: &V,
    ) -> Option<Option<V::Output>> {
        let (key, value) = self.table.get_key_value(key)?;
        self.consumed.insert(key.as_str());
        match cx.nested(PathSegment::Key(key.clone()), |cx| validator.validate(value, cx)) {
            Ok(output) => Some(Some(output)),
            Err(e) => {
                self.errors.extend(e);
                Some(None)
            }
        }
    }

    /// A field that must be present
    pub fn required<V>(&mut self, cx: &mut Context<'_>, key: &str, validator: V) -> V::Output
    where
        V: Validator,
        V::Output: Default,
    {
        match self.run(cx, key, &validator) {
            Some(output) => output.unwrap_or_default(),
            None => {
                self.errors.push(ValidationError {
                    path: cx.path().key(key),
                    kind: ValidationErrorKind::MissingField,
                });
                V::Output::default()
            }
        }
    }

    /// A field that may be absent; `None` when absent or invalid
    pub fn optional<V: Validator>(
        &mut self,
        cx: &mut Context<'_>,
        key: &str,
        validator: V,
    ) -> Option<V::Output> {
        self.run(cx, key, &validator).flatten()
    }

    /// An identifier declaration, generated when absent
    pub fn declare_id(&mut self, cx: &mut Context<'_>, key: &str, kind: ComponentKind) -> Identifier {
        match self.run(cx, key, &declare_id()) {
            Some(id) => id.unwrap_or_default(),
            None => cx.generate_id(kind),
        }
    }

    /// A reference, resolved to the only instance of its kind when absent
    pub fn use_id(&mut self, cx: &mut Context<'_>, key: &str) -> IdRef {
        self.optional(cx, key, use_id()).unwrap_or_default()
    }

    /// Reject `key` if present
    pub fn forbid(&mut self, cx: &Context<'_>, key: &str, kind: ValidationErrorKind) {
        if let Some((key, _)) = self.table.get_key_value(key) {
            self.consumed.insert(key.as_str());
            self.errors.push(ValidationError {
                path: cx.path().key(key),
                kind,
            });
        }
    }

    /// Accept `key` without looking at it
    pub fn ignore(&mut self, key: &str) {
        if let Some((key, _)) = self.table.get_key_value(key) {
            self.consumed.insert(key.as_str());
        }
    }

    /// Accept every remaining key without looking at it
    pub fn ignore_rest(&mut self) {
        self.consumed.extend(self.table.keys().map(String::as_str));
    }

    /// Report unknown keys and every error collected so far
    pub fn finish(mut self, cx: &Context<'_>) -> Outcome<()> {
        for key in self.table.keys() {
            if !self.consumed.contains(key.as_str()) {
                self.errors.push(ValidationError {
                    path: cx.path().key(key),
                    kind: ValidationErrorKind::UnknownField,
                });
            }
        }
        self.errors.into_result()
    }
}
