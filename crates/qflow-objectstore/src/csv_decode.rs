//! Progressive decode of the store's pipe-delimited CSV response (§6).
//!
//! The response body is consumed as it arrives rather than buffered whole:
//! [`LineBatcher`] accumulates complete lines out of successive byte chunks
//! and hands back row batches of up to `batch_rows` as soon as they're
//! ready, so a `Scan` can start forwarding `RecordBatch`es to its consumer
//! before the store has finished sending. The response carries a header
//! line naming the projected columns before any data, mirrored here the
//! same way `pandas.read_csv(..., skiprows=1)` treats the header row as
//! metadata rather than data.

use arrow_schema::{DataType, SchemaRef};
use qflow_core::{build_batch, Batch, ScalarValue};

pub const FIELD_DELIMITER: char = '|';

/// Buffers incoming byte chunks, splits them into complete lines, validates
/// and discards the leading header line, and parses each remaining line
/// into a row of [`ScalarValue`]s against `schema`.
pub struct LineBatcher {
    schema: SchemaRef,
    batch_rows: usize,
    carry: Vec<u8>,
    rows: Vec<Vec<ScalarValue>>,
    row_bytes: u64,
    header_seen: bool,
}

impl LineBatcher {
    pub fn new(schema: SchemaRef, batch_rows: usize) -> Self {
        Self {
            schema,
            batch_rows: batch_rows.max(1),
            carry: Vec::new(),
            rows: Vec::new(),
            row_bytes: 0,
            header_seen: false,
        }
    }

    /// Feeds a chunk of response bytes. Returns any batches that became
    /// full as a result (usually zero or one), each paired with the number
    /// of decoded row bytes (newline included) it was built from.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<(Batch, u64)>> {
        self.carry.extend_from_slice(chunk);
        let mut batches = Vec::new();

        while let Some(pos) = self.carry.iter().position(|b| *b == b'\n') {
            let line = self.carry.drain(..=pos).collect::<Vec<u8>>();
            let line_len = line.len() as u64;
            let line = &line[..line.len() - 1]; // drop the newline
            if line.is_empty() {
                continue;
            }
            if !self.header_seen {
                self.header_seen = true;
                validate_header(std::str::from_utf8(line)?, &self.schema)?;
                continue;
            }
            let row = parse_line(std::str::from_utf8(line)?, &self.schema)?;
            self.rows.push(row);
            self.row_bytes += line_len;
            if self.rows.len() >= self.batch_rows {
                batches.push(self.take_batch()?);
            }
        }
        Ok(batches)
    }

    /// Flushes any carried-over partial line and the final partial batch,
    /// called once the response body is exhausted.
    pub fn finish(mut self) -> anyhow::Result<Option<(Batch, u64)>> {
        if !self.carry.is_empty() {
            let carried_len = self.carry.len() as u64;
            let line = std::mem::take(&mut self.carry);
            let text = std::str::from_utf8(&line)?.trim_end();
            if !text.is_empty() {
                if !self.header_seen {
                    self.header_seen = true;
                    validate_header(text, &self.schema)?;
                } else {
                    let row = parse_line(text, &self.schema)?;
                    self.rows.push(row);
                    self.row_bytes += carried_len;
                }
            }
        }
        if self.rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.take_batch()?))
        }
    }

    /// The current partial batch plus the decoded row bytes it accounts
    /// for, resetting both so the next call starts a fresh accumulation.
    fn take_batch(&mut self) -> anyhow::Result<(Batch, u64)> {
        let rows = std::mem::take(&mut self.rows);
        let bytes = std::mem::take(&mut self.row_bytes);
        let num_fields = self.schema.fields().len();
        let mut columns: Vec<Vec<ScalarValue>> = vec![Vec::with_capacity(rows.len()); num_fields];
        for row in rows {
            for (col, value) in columns.iter_mut().zip(row.into_iter()) {
                col.push(value);
            }
        }
        Ok((build_batch(self.schema.clone(), columns)?, bytes))
    }
}

/// The header line must name exactly as many columns as the schema
/// declares; the object store echoes back the projected column names in
/// response-body order, so a mismatch means the projection and the schema
/// the caller parses against have drifted apart.
fn validate_header(line: &str, schema: &SchemaRef) -> anyhow::Result<()> {
    let columns = line.split(FIELD_DELIMITER).count();
    anyhow::ensure!(
        columns == schema.fields().len(),
        "header declares {columns} columns, scan schema declares {}",
        schema.fields().len()
    );
    Ok(())
}

fn parse_line(line: &str, schema: &SchemaRef) -> anyhow::Result<Vec<ScalarValue>> {
    let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    anyhow::ensure!(
        parts.len() == schema.fields().len(),
        "row has {} fields, schema declares {}",
        parts.len(),
        schema.fields().len()
    );
    parts
        .into_iter()
        .zip(schema.fields().iter())
        .map(|(text, field)| parse_field(text, field.data_type()))
        .collect()
}

fn parse_field(text: &str, data_type: &DataType) -> anyhow::Result<ScalarValue> {
    if text.is_empty() {
        return Ok(ScalarValue::Null);
    }
    Ok(match data_type {
        DataType::Utf8 => ScalarValue::Utf8(text.to_string()),
        DataType::Int64 => ScalarValue::Int64(text.parse()?),
        DataType::Float64 => ScalarValue::Float64(text.parse()?),
        DataType::Boolean => ScalarValue::Boolean(matches!(text, "t" | "true" | "1")),
        DataType::Timestamp(_, _) => {
            let parsed = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d"))?;
            ScalarValue::Timestamp(parsed.and_utc().timestamp_micros())
        }
        other => anyhow::bail!("unsupported push-down column type {other:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{Field, Schema};
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("l_orderkey", DataType::Int64, false),
            Field::new("l_extendedprice", DataType::Float64, true),
        ]))
    }

    const HEADER: &[u8] = b"l_orderkey|l_extendedprice\n";

    #[test]
    fn splits_on_newline_across_chunks() {
        let mut batcher = LineBatcher::new(schema(), 10);
        let mut chunk = HEADER.to_vec();
        chunk.extend_from_slice(b"1|10.5\n2|2");
        let batches = batcher.push_chunk(&chunk).unwrap();
        assert!(batches.is_empty());
        let batches = batcher.push_chunk(b"0.0\n3|30.0\n").unwrap();
        assert!(batches.is_empty()); // batch_rows not reached yet
        let (final_batch, bytes) = batcher.finish().unwrap().unwrap();
        assert_eq!(final_batch.num_rows(), 3);
        assert!(bytes > 0);
    }

    #[test]
    fn emits_full_batches_progressively() {
        let mut batcher = LineBatcher::new(schema(), 2);
        let mut chunk = HEADER.to_vec();
        chunk.extend_from_slice(b"1|1.0\n2|2.0\n3|3.0\n");
        let batches = batcher.push_chunk(&chunk).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0.num_rows(), 2);
        let (rest, _) = batcher.finish().unwrap().unwrap();
        assert_eq!(rest.num_rows(), 1);
    }

    #[test]
    fn empty_field_is_null() {
        let mut batcher = LineBatcher::new(schema(), 10);
        let mut chunk = HEADER.to_vec();
        chunk.extend_from_slice(b"1|\n");
        batcher.push_chunk(&chunk).unwrap();
        let (batch, _) = batcher.finish().unwrap().unwrap();
        assert_eq!(
            qflow_core::get_value(&batch, 1, 0),
            ScalarValue::Null
        );
    }

    #[test]
    fn rejects_header_with_wrong_column_count() {
        let mut batcher = LineBatcher::new(schema(), 10);
        let err = batcher.push_chunk(b"l_orderkey\n1|10.5\n").unwrap_err();
        assert!(err.to_string().contains("header declares"));
    }
}
