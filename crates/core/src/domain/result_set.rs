// Result sets - immutable, kind-checked views over driver output

use super::error::{DomainError, Result, MSG_MULTIPLE_RESULTSET, MSG_SINGLE_RESULTSET};
use serde::Serialize;
use serde_json::{Map, Value};

/// One row record: column name to JSON value
pub type Row = Map<String, Value>;

/// Accessor contract shared by every result shape.
///
/// Callers that assume the wrong arity fail immediately with
/// [`DomainError::WrongResultSetArity`] instead of reading the wrong data.
pub trait Dataset {
    /// Affected-row count of an update/insert/delete statement
    fn row_count(&self) -> Result<u64>;

    /// Stored rows, `None` when the statement returned no dataset
    fn rows(&self) -> Result<Option<&[Row]>>;

    fn first_row_or_none(&self) -> Result<Option<&Row>>;

    fn first_row(&self) -> Result<&Row> {
        self.first_row_or_none()?.ok_or(DomainError::NoDataset)
    }

    fn single_row_or_none(&self) -> Result<Option<&Row>>;

    fn single_row(&self) -> Result<&Row> {
        self.single_row_or_none()?.ok_or(DomainError::NoDataset)
    }

    /// Constituent result sets of a batch, in execution order
    fn as_result_array(&self) -> Result<Vec<ResultSet>>;
}

/// Output of a single statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    rows: Option<Vec<Row>>,
    row_count: Option<u64>,
}

impl ResultSet {
    pub fn new(rows: Option<Vec<Row>>, row_count: Option<u64>) -> Self {
        Self { rows, row_count }
    }

    /// Result of a row-returning statement
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(Some(rows), None)
    }

    /// Result of a row-count-returning statement
    pub fn from_row_count(row_count: u64) -> Self {
        Self::new(None, Some(row_count))
    }

    /// Build from loosely-typed JSON: `rows` must be null or an array of
    /// objects, `row_count` null or a non-negative integer.
    pub fn from_json(rows: &Value, row_count: &Value) -> Result<Self> {
        let rows = match rows {
            Value::Null => None,
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Object(row) => Ok(row.clone()),
                        other => Err(DomainError::Validation(format!(
                            "every element of `rows` should be an object, got {}",
                            other
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => {
                return Err(DomainError::Validation(
                    "the `rows` argument should be either null or an array".to_string(),
                ))
            }
        };

        let row_count = match row_count {
            Value::Null => None,
            Value::Number(n) => Some(n.as_u64().ok_or_else(|| {
                DomainError::Validation(format!(
                    "the `row_count` argument should be a non-negative integer, got {}",
                    n
                ))
            })?),
            _ => {
                return Err(DomainError::Validation(
                    "the `row_count` argument should be either null or a number".to_string(),
                ))
            }
        };

        Ok(Self::new(rows, row_count))
    }

    fn row_slice(&self) -> &[Row] {
        self.rows.as_deref().unwrap_or_default()
    }
}

impl Dataset for ResultSet {
    fn row_count(&self) -> Result<u64> {
        self.row_count.ok_or(DomainError::NotAnUpdateQuery)
    }

    fn rows(&self) -> Result<Option<&[Row]>> {
        Ok(self.rows.as_deref())
    }

    fn first_row_or_none(&self) -> Result<Option<&Row>> {
        Ok(self.row_slice().first())
    }

    fn single_row_or_none(&self) -> Result<Option<&Row>> {
        match self.row_slice() {
            [] => Ok(None),
            [row] => Ok(Some(row)),
            rows => Err(DomainError::NotUnique(rows.len())),
        }
    }

    fn as_result_array(&self) -> Result<Vec<ResultSet>> {
        Err(DomainError::WrongResultSetArity(MSG_SINGLE_RESULTSET))
    }
}

/// Outputs of a multi-statement batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultipleResultSet {
    results: Vec<ResultSet>,
}

impl MultipleResultSet {
    /// Fails with a validation error when `results` is empty
    pub fn new(results: Vec<ResultSet>) -> Result<Self> {
        if results.is_empty() {
            return Err(DomainError::Validation(
                "a multiple result set needs at least one result".to_string(),
            ));
        }
        Ok(Self { results })
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultSet> {
        self.results.iter()
    }
}

impl Dataset for MultipleResultSet {
    fn row_count(&self) -> Result<u64> {
        Err(DomainError::WrongResultSetArity(MSG_MULTIPLE_RESULTSET))
    }

    fn rows(&self) -> Result<Option<&[Row]>> {
        Err(DomainError::WrongResultSetArity(MSG_MULTIPLE_RESULTSET))
    }

    fn first_row_or_none(&self) -> Result<Option<&Row>> {
        Err(DomainError::WrongResultSetArity(MSG_MULTIPLE_RESULTSET))
    }

    fn first_row(&self) -> Result<&Row> {
        Err(DomainError::WrongResultSetArity(MSG_MULTIPLE_RESULTSET))
    }

    fn single_row_or_none(&self) -> Result<Option<&Row>> {
        Err(DomainError::WrongResultSetArity(MSG_MULTIPLE_RESULTSET))
    }

    fn single_row(&self) -> Result<&Row> {
        Err(DomainError::WrongResultSetArity(MSG_MULTIPLE_RESULTSET))
    }

    fn as_result_array(&self) -> Result<Vec<ResultSet>> {
        Ok(self.results.clone())
    }
}

/// What a query returned: one result set or a batch of them
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "result", rename_all = "kebab-case")]
pub enum QueryResult {
    Single(ResultSet),
    Multiple(MultipleResultSet),
}

impl QueryResult {
    pub fn is_single(&self) -> bool {
        matches!(self, QueryResult::Single(_))
    }

    /// Label used in query logs
    pub fn kind(&self) -> &'static str {
        match self {
            QueryResult::Single(_) => "single resultset",
            QueryResult::Multiple(_) => "multiple resultset",
        }
    }

    pub fn into_single(self) -> Result<ResultSet> {
        match self {
            QueryResult::Single(rs) => Ok(rs),
            QueryResult::Multiple(_) => Err(DomainError::WrongResultSetArity(MSG_MULTIPLE_RESULTSET)),
        }
    }

    fn as_dataset(&self) -> &dyn Dataset {
        match self {
            QueryResult::Single(rs) => rs,
            QueryResult::Multiple(mrs) => mrs,
        }
    }
}

impl Dataset for QueryResult {
    fn row_count(&self) -> Result<u64> {
        self.as_dataset().row_count()
    }

    fn rows(&self) -> Result<Option<&[Row]>> {
        self.as_dataset().rows()
    }

    fn first_row_or_none(&self) -> Result<Option<&Row>> {
        self.as_dataset().first_row_or_none()
    }

    fn first_row(&self) -> Result<&Row> {
        self.as_dataset().first_row()
    }

    fn single_row_or_none(&self) -> Result<Option<&Row>> {
        self.as_dataset().single_row_or_none()
    }

    fn single_row(&self) -> Result<&Row> {
        self.as_dataset().single_row()
    }

    fn as_result_array(&self) -> Result<Vec<ResultSet>> {
        self.as_dataset().as_result_array()
    }
}

impl From<ResultSet> for QueryResult {
    fn from(rs: ResultSet) -> Self {
        QueryResult::Single(rs)
    }
}

impl From<MultipleResultSet> for QueryResult {
    fn from(mrs: MultipleResultSet) -> Self {
        QueryResult::Multiple(mrs)
    }
}
