//! # Table Augmentation Module
//!
//! Adds a `"vector"` column of embeddings to a table. Tables are either Arrow
//! [`RecordBatch`]es (column-oriented) or lists of JSON objects (row-oriented); row
//! tables are converted to a `RecordBatch` first, with column types inferred from
//! the values.
//!
//! ## Key Components
//!
//! - `Table`: Column- or row-oriented input table
//! - `ColumnValue`: Extraction of a flat item list from an Arrow column
//! - `EmbeddingOptions`: Source column, batching and API wrapping options
//! - `with_embeddings`: The augmentation entry point

use crate::config::DEFAULT_BATCH_SIZE;
use crate::embedding::{EmbeddingFunction, Vector, common_dimension};
use crate::error::{Error, Result};
use crate::pipeline::FunctionWrapper;
use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Float64Type, Int32Type, Int64Type};
use arrow_array::{
    Array, ArrayRef, BooleanArray, FixedSizeListArray, Float32Array, Float64Array, Int64Array,
    NullArray, RecordBatch, RecordBatchOptions, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Name of the column appended by [`with_embeddings`]
pub const VECTOR_COLUMN: &str = "vector";

/// A table to augment
#[derive(Debug, Clone)]
pub enum Table {
    /// Column-oriented Arrow data
    Columns(RecordBatch),

    /// Row-oriented data, one JSON object per row
    Rows(Vec<Map<String, Value>>),
}

impl From<RecordBatch> for Table {
    fn from(batch: RecordBatch) -> Self {
        Table::Columns(batch)
    }
}

impl From<Vec<Map<String, Value>>> for Table {
    fn from(rows: Vec<Map<String, Value>>) -> Self {
        Table::Rows(rows)
    }
}

impl Table {
    pub fn num_rows(&self) -> usize {
        match self {
            Table::Columns(batch) => batch.num_rows(),
            Table::Rows(rows) => rows.len(),
        }
    }

    /// Convert to a `RecordBatch`, inferring column types for row tables
    pub fn into_record_batch(self) -> Result<RecordBatch> {
        match self {
            Table::Columns(batch) => Ok(batch),
            Table::Rows(rows) => rows_to_record_batch(&rows),
        }
    }
}

/// Options for [`with_embeddings`]
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingOptions {
    /// Column passed to the embedding function
    pub column: String,

    /// Whether to wrap the function with the default retry and rate limit
    pub wrap_api: bool,

    /// Whether to show a progress bar
    pub show_progress: bool,

    /// Number of rows passed to each call of the embedding function
    pub batch_size: usize,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            column: "text".to_string(),
            wrap_api: true,
            show_progress: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl EmbeddingOptions {
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn wrap_api(mut self, wrap_api: bool) -> Self {
        self.wrap_api = wrap_api;
        self
    }

    pub fn show_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Item types that can be read out of an Arrow column
pub trait ColumnValue: Sized + Clone {
    /// Read every value of `array`, failing on nulls or unsupported types
    fn extract(column: &str, array: &ArrayRef) -> Result<Vec<Self>>;
}

impl ColumnValue for String {
    fn extract(column: &str, array: &ArrayRef) -> Result<Vec<Self>> {
        let values: Vec<Option<&str>> = if let Some(strings) = array.as_string_opt::<i32>() {
            strings.iter().collect()
        } else if let Some(strings) = array.as_string_opt::<i64>() {
            strings.iter().collect()
        } else {
            return Err(unsupported_type(column, array.data_type(), "a string"));
        };
        Ok(require_values(column, values)?
            .into_iter()
            .map(str::to_string)
            .collect())
    }
}

impl ColumnValue for Vec<u8> {
    fn extract(column: &str, array: &ArrayRef) -> Result<Vec<Self>> {
        let values: Vec<Option<&[u8]>> = if let Some(bytes) = array.as_binary_opt::<i32>() {
            bytes.iter().collect()
        } else if let Some(bytes) = array.as_binary_opt::<i64>() {
            bytes.iter().collect()
        } else {
            return Err(unsupported_type(column, array.data_type(), "a binary"));
        };
        Ok(require_values(column, values)?
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect())
    }
}

impl ColumnValue for f64 {
    fn extract(column: &str, array: &ArrayRef) -> Result<Vec<Self>> {
        let values: Vec<Option<f64>> = match array.data_type() {
            DataType::Float64 => array.as_primitive::<Float64Type>().iter().collect(),
            DataType::Float32 => array
                .as_primitive::<Float32Type>()
                .iter()
                .map(|v| v.map(f64::from))
                .collect(),
            DataType::Int64 => array
                .as_primitive::<Int64Type>()
                .iter()
                .map(|v| v.map(|v| v as f64))
                .collect(),
            DataType::Int32 => array
                .as_primitive::<Int32Type>()
                .iter()
                .map(|v| v.map(f64::from))
                .collect(),
            other => return Err(unsupported_type(column, other, "a numeric")),
        };
        require_values(column, values)
    }
}

fn require_values<T>(column: &str, values: Vec<Option<T>>) -> Result<Vec<T>> {
    values
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.ok_or_else(|| {
                Error::InvalidInput(format!("column '{column}' has a null value at row {row}"))
            })
        })
        .collect()
}

fn unsupported_type(column: &str, data_type: &DataType, expected: &str) -> Error {
    Error::InvalidInput(format!(
        "column '{column}' has type {data_type}, expected {expected} column"
    ))
}

/// Add a `"vector"` column holding the embeddings of `options.column`.
///
/// With `wrap_api` the function is called through the default retry schedule and
/// rate limit. The returned batch contains every input column unchanged plus the new
/// fixed-size list column.
#[instrument(skip(func, data, options), fields(column = %options.column, batch_size = options.batch_size))]
pub async fn with_embeddings<T, F>(
    func: &F,
    data: impl Into<Table>,
    options: &EmbeddingOptions,
) -> Result<RecordBatch>
where
    F: EmbeddingFunction<T>,
    T: ColumnValue,
{
    let mut wrapper = FunctionWrapper::new(func).batch_size(options.batch_size);
    if options.wrap_api {
        wrapper = wrapper.with_default_retry().with_default_rate_limit();
    }
    if options.show_progress {
        wrapper = wrapper.show_progress();
    }
    let pipeline = wrapper.build()?;

    let batch = data.into().into_record_batch()?;
    if batch.schema().column_with_name(VECTOR_COLUMN).is_some() {
        return Err(Error::InvalidInput(format!(
            "table already has a '{VECTOR_COLUMN}' column"
        )));
    }
    let column = batch
        .column_by_name(&options.column)
        .ok_or_else(|| Error::MissingColumn(options.column.clone()))?;
    let values = T::extract(&options.column, column)?;

    let embeddings = pipeline.call(&values).await?;
    if embeddings.len() != batch.num_rows() {
        return Err(Error::LengthMismatch {
            expected: batch.num_rows(),
            actual: embeddings.len(),
        });
    }
    debug!(rows = batch.num_rows(), "Appending vector column");
    append_vector_column(&batch, embeddings)
}

/// Return a copy of `batch` with `vectors` appended as a fixed-size list column
pub fn append_vector_column(batch: &RecordBatch, vectors: Vec<Vector>) -> Result<RecordBatch> {
    let (field, array) = vector_array(vectors, batch.num_rows())?;

    let schema = batch.schema();
    let mut fields: Vec<Arc<Field>> = schema.fields().iter().cloned().collect();
    fields.push(Arc::new(field));
    let schema = Schema::new_with_metadata(fields, schema.metadata().clone());

    let mut columns = batch.columns().to_vec();
    columns.push(array);
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}

fn vector_array(vectors: Vec<Vector>, rows: usize) -> Result<(Field, ArrayRef)> {
    let dims = common_dimension(&vectors).ok_or_else(|| {
        Error::InvalidInput("embeddings have different dimensions".to_string())
    })?;
    if dims == 0 && rows > 0 {
        return Err(Error::InvalidInput("embeddings are empty".to_string()));
    }
    let size = i32::try_from(dims)
        .map_err(|_| Error::InvalidInput(format!("embedding dimension {dims} is too large")))?;

    let values = Float32Array::from(vectors.into_iter().flatten().collect::<Vec<f32>>());
    let item = Arc::new(Field::new("item", DataType::Float32, true));
    let array = FixedSizeListArray::try_new(item.clone(), size, Arc::new(values), None)?;
    let field = Field::new(VECTOR_COLUMN, DataType::FixedSizeList(item, size), false);
    Ok((field, Arc::new(array)))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColumnKind {
    Null,
    Boolean,
    Integer,
    Float,
    Text,
}

impl ColumnKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => ColumnKind::Null,
            Value::Bool(_) => ColumnKind::Boolean,
            Value::Number(n) if n.is_i64() => ColumnKind::Integer,
            Value::Number(_) => ColumnKind::Float,
            Value::String(_) | Value::Array(_) | Value::Object(_) => ColumnKind::Text,
        }
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnKind::Null, other) | (other, ColumnKind::Null) => other,
            (ColumnKind::Integer, ColumnKind::Float) | (ColumnKind::Float, ColumnKind::Integer) => {
                ColumnKind::Float
            }
            _ => ColumnKind::Text,
        }
    }
}

fn rows_to_record_batch(rows: &[Map<String, Value>]) -> Result<RecordBatch> {
    let mut names: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for row in rows {
        for name in row.keys() {
            if seen.insert(name.as_str()) {
                names.push(name);
            }
        }
    }

    let mut fields = Vec::with_capacity(names.len());
    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        let values: Vec<&Value> = rows
            .iter()
            .map(|row| row.get(name).unwrap_or(&Value::Null))
            .collect();
        let kind = values
            .iter()
            .fold(ColumnKind::Null, |kind, value| kind.merge(ColumnKind::of(value)));
        let (data_type, array) = json_column(kind, &values);
        fields.push(Field::new(name, data_type, true));
        columns.push(array);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        columns,
        &options,
    )?)
}

fn json_column(kind: ColumnKind, values: &[&Value]) -> (DataType, ArrayRef) {
    match kind {
        ColumnKind::Null => (DataType::Null, Arc::new(NullArray::new(values.len()))),
        ColumnKind::Boolean => {
            let array: BooleanArray = values.iter().map(|v| v.as_bool()).collect();
            (DataType::Boolean, Arc::new(array))
        }
        ColumnKind::Integer => {
            let array: Int64Array = values.iter().map(|v| v.as_i64()).collect();
            (DataType::Int64, Arc::new(array))
        }
        ColumnKind::Float => {
            let array: Float64Array = values.iter().map(|v| v.as_f64()).collect();
            (DataType::Float64, Arc::new(array))
        }
        ColumnKind::Text => {
            let array: StringArray = values
                .iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect();
            (DataType::Utf8, Arc::new(array))
        }
    }
}
