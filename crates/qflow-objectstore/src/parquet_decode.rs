//! Decodes a select response served in Parquet form rather than the
//! default pipe-delimited CSV (§6: the store may choose either wire format;
//! Parquet responses arrive as one self-describing buffer rather than a
//! line stream, so they can't use [`crate::csv_decode::LineBatcher`]'s
//! progressive strategy and are decoded once the body is complete).

use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use qflow_core::Batch;

pub fn decode(body: Bytes, batch_rows: usize) -> anyhow::Result<Vec<Batch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(body)?
        .with_batch_size(batch_rows.max(1))
        .build()?;
    reader
        .map(|b| b.map_err(anyhow::Error::from))
        .collect::<anyhow::Result<Vec<_>>>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_parquet_bytes() {
        let body = Bytes::from_static(b"not a parquet file");
        assert!(ParquetRecordBatchReaderBuilder::try_new(body).is_err());
    }
}
