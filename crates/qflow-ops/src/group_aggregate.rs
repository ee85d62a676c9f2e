//! `Group` (partial, per-partition aggregation) and `Aggregate` (final
//! combine across every `Group` partition's output) (§4.7).
//!
//! Grounded in `s3filter`'s `AggregateExpression`/`AggregateExpressionContext`:
//! each aggregate function has a combine law that lets a partial result
//! computed on one partition be merged with another partition's partial
//! result without re-reading either partition's rows. `SUM`/`COUNT`/`MIN`/
//! `MAX` combine with themselves; `AVG` is carried between stages as a
//! `(sum, count)` pair and only divided into a ratio at the very end, so
//! that averaging a stream of averages never happens.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use qflow_core::{build_batch, get_value, EngineError, Expr, Message, OpMetrics, Operator,
    OperatorContext, ScalarValue, SchemaRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone)]
pub struct AggSpec {
    pub input: Expr,
    pub func: AggFunc,
    pub name: String,
}

/// Number of physical columns `func` occupies in the partial (combinable)
/// representation: every function is one column except `Avg`, which
/// carries `(sum, count)` as two.
fn partial_width(func: AggFunc) -> usize {
    if func == AggFunc::Avg {
        2
    } else {
        1
    }
}

fn partial_fields(agg: &AggSpec) -> Vec<Field> {
    match agg.func {
        AggFunc::Sum | AggFunc::Min | AggFunc::Max => {
            vec![Field::new(&agg.name, DataType::Float64, true)]
        }
        AggFunc::Count => vec![Field::new(&agg.name, DataType::Int64, false)],
        AggFunc::Avg => vec![
            Field::new(format!("{}__sum", agg.name), DataType::Float64, true),
            Field::new(format!("{}__count", agg.name), DataType::Int64, false),
        ],
    }
}

/// The schema `Group` emits and `Aggregate` consumes: group-key columns
/// followed by each aggregate's partial (combinable) columns.
pub fn partial_schema(key_names: &[(String, DataType)], aggs: &[AggSpec]) -> SchemaRef {
    let mut fields: Vec<Field> = key_names
        .iter()
        .map(|(name, dt)| Field::new(name, dt.clone(), true))
        .collect();
    for agg in aggs {
        fields.extend(partial_fields(agg));
    }
    Arc::new(Schema::new(fields))
}

/// The schema `Aggregate` finally emits: group-key columns followed by one
/// finalized column per aggregate (an `Avg`'s two partial columns collapse
/// back into one ratio column).
pub fn final_schema(key_names: &[(String, DataType)], aggs: &[AggSpec]) -> SchemaRef {
    let mut fields: Vec<Field> = key_names
        .iter()
        .map(|(name, dt)| Field::new(name, dt.clone(), true))
        .collect();
    for agg in aggs {
        fields.push(Field::new(&agg.name, DataType::Float64, true));
    }
    Arc::new(Schema::new(fields))
}

#[derive(Debug, Clone)]
enum Accumulator {
    Sum(f64),
    Count(u64),
    Min(Option<f64>),
    Max(Option<f64>),
    Avg { sum: f64, count: u64 },
}

impl Accumulator {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Sum => Accumulator::Sum(0.0),
            AggFunc::Count => Accumulator::Count(0),
            AggFunc::Min => Accumulator::Min(None),
            AggFunc::Max => Accumulator::Max(None),
            AggFunc::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
        }
    }

    fn observe(&mut self, value: &ScalarValue) {
        match self {
            Accumulator::Sum(s) => {
                if let Some(v) = value.as_f64() {
                    *s += v;
                }
            }
            Accumulator::Count(c) => {
                if !value.is_null() {
                    *c += 1;
                }
            }
            Accumulator::Min(m) => {
                if let Some(v) = value.as_f64() {
                    *m = Some(m.map_or(v, |cur| cur.min(v)));
                }
            }
            Accumulator::Max(m) => {
                if let Some(v) = value.as_f64() {
                    *m = Some(m.map_or(v, |cur| cur.max(v)));
                }
            }
            Accumulator::Avg { sum, count } => {
                if let Some(v) = value.as_f64() {
                    *sum += v;
                    *count += 1;
                }
            }
        }
    }

    /// Merges another partition's partial accumulator of the same kind
    /// into this one — the combine law each function needs to support
    /// distributed partial aggregation.
    fn combine(&mut self, other: &Accumulator) {
        match (self, other) {
            (Accumulator::Sum(a), Accumulator::Sum(b)) => *a += b,
            (Accumulator::Count(a), Accumulator::Count(b)) => *a += b,
            (Accumulator::Min(a), Accumulator::Min(b)) => {
                *a = match (*a, *b) {
                    (Some(x), Some(y)) => Some(x.min(y)),
                    (Some(x), None) => Some(x),
                    (None, y) => y,
                }
            }
            (Accumulator::Max(a), Accumulator::Max(b)) => {
                *a = match (*a, *b) {
                    (Some(x), Some(y)) => Some(x.max(y)),
                    (Some(x), None) => Some(x),
                    (None, y) => y,
                }
            }
            (Accumulator::Avg { sum: sa, count: ca }, Accumulator::Avg { sum: sb, count: cb }) => {
                *sa += sb;
                *ca += cb;
            }
            _ => unreachable!("mismatched accumulator kinds"),
        }
    }

    /// This accumulator's own partial (combinable) column values.
    fn partial_values(&self) -> Vec<ScalarValue> {
        match self {
            Accumulator::Sum(s) => vec![ScalarValue::Float64(*s)],
            Accumulator::Count(c) => vec![ScalarValue::Int64(*c as i64)],
            Accumulator::Min(m) => vec![m.map(ScalarValue::Float64).unwrap_or(ScalarValue::Null)],
            Accumulator::Max(m) => vec![m.map(ScalarValue::Float64).unwrap_or(ScalarValue::Null)],
            Accumulator::Avg { sum, count } => {
                vec![ScalarValue::Float64(*sum), ScalarValue::Int64(*count as i64)]
            }
        }
    }

    /// Rebuilds an accumulator from its own previously emitted partial
    /// columns, so `Aggregate` can fold already-partial rows (another
    /// `Group`'s output) the same way it folds freshly observed values.
    fn from_partial(func: AggFunc, values: &[ScalarValue]) -> Self {
        match func {
            AggFunc::Sum => Accumulator::Sum(values[0].as_f64().unwrap_or(0.0)),
            AggFunc::Count => Accumulator::Count(match &values[0] {
                ScalarValue::Int64(c) => *c as u64,
                _ => 0,
            }),
            AggFunc::Min => Accumulator::Min(values[0].as_f64()),
            AggFunc::Max => Accumulator::Max(values[0].as_f64()),
            AggFunc::Avg => Accumulator::Avg {
                sum: values[0].as_f64().unwrap_or(0.0),
                count: match &values[1] {
                    ScalarValue::Int64(c) => *c as u64,
                    _ => 0,
                },
            },
        }
    }

    fn finalize(&self) -> ScalarValue {
        match self {
            Accumulator::Sum(s) => ScalarValue::Float64(*s),
            Accumulator::Count(c) => ScalarValue::Float64(*c as f64),
            Accumulator::Min(m) => m.map(ScalarValue::Float64).unwrap_or(ScalarValue::Null),
            Accumulator::Max(m) => m.map(ScalarValue::Float64).unwrap_or(ScalarValue::Null),
            Accumulator::Avg { sum, count } => {
                if *count == 0 {
                    ScalarValue::Null
                } else {
                    ScalarValue::Float64(sum / *count as f64)
                }
            }
        }
    }
}

struct GroupState {
    key_values: Vec<ScalarValue>,
    accs: Vec<Accumulator>,
}

pub struct Group {
    id: String,
    key_exprs: Vec<Expr>,
    aggs: Vec<AggSpec>,
    output_schema: SchemaRef,
    groups: HashMap<Vec<u8>, GroupState>,
    metrics: OpMetrics,
}

impl Group {
    pub fn new(id: String, key_exprs: Vec<Expr>, aggs: Vec<AggSpec>, output_schema: SchemaRef) -> Self {
        Self {
            id,
            key_exprs,
            aggs,
            output_schema,
            groups: HashMap::new(),
            metrics: OpMetrics::new(),
        }
    }

    fn group_key_bytes(values: &[ScalarValue]) -> Vec<u8> {
        values.iter().flat_map(ScalarValue::hash_bytes).collect()
    }
}

#[async_trait]
impl Operator for Group {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, mut ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();

        while let Some(msg) = ctx.inbound.recv().await {
            match msg {
                Message::Data(batch) => {
                    self.metrics.record_in(batch.num_rows() as u64);
                    for row in 0..batch.num_rows() {
                        let key_values: Vec<ScalarValue> =
                            self.key_exprs.iter().map(|e| e.eval_row(&batch, row)).collect();
                        let key_bytes = Self::group_key_bytes(&key_values);
                        let aggs = &self.aggs;
                        let state = self.groups.entry(key_bytes).or_insert_with(|| GroupState {
                            key_values: key_values.clone(),
                            accs: aggs.iter().map(|a| Accumulator::new(a.func)).collect(),
                        });
                        for (acc, agg) in state.accs.iter_mut().zip(aggs.iter()) {
                            acc.observe(&agg.input.eval_row(&batch, row));
                        }
                    }
                }
                Message::Stop => break,
                _ => {}
            }
        }

        for out in &ctx.outbound {
            out.send(Message::FieldNames(self.output_schema.clone())).await.ok();
        }

        let num_cols = self.output_schema.fields().len();
        let mut columns: Vec<Vec<ScalarValue>> = vec![Vec::new(); num_cols];
        for state in self.groups.values() {
            let mut col = 0;
            for v in &state.key_values {
                columns[col].push(v.clone());
                col += 1;
            }
            for acc in &state.accs {
                for v in acc.partial_values() {
                    columns[col].push(v);
                    col += 1;
                }
            }
        }
        let num_rows = columns.first().map(Vec::len).unwrap_or(0);
        if num_rows > 0 {
            let batch = match build_batch(self.output_schema.clone(), columns) {
                Ok(batch) => batch,
                Err(e) => {
                    self.metrics.timer_stop();
                    ctx.control
                        .send(qflow_core::ControlMessage::Complete {
                            operator: self.id.clone(),
                            error: Some(EngineError::Aggregate {
                                operator: self.id.clone(),
                                detail: e.to_string(),
                            }),
                            metrics: self.metrics.clone(),
                        })
                        .await
                        .ok();
                    return Ok(());
                }
            };
            self.metrics.record_out(batch.num_rows() as u64);
            for out in &ctx.outbound {
                out.send(Message::Data(batch.clone())).await.ok();
            }
        }

        self.metrics.timer_stop();
        ctx.control
            .send(qflow_core::ControlMessage::Complete {
                operator: self.id.clone(),
                error: None,
                metrics: self.metrics.clone(),
            })
            .await
            .ok();
        Ok(())
    }

    fn metrics(&self) -> OpMetrics {
        self.metrics.clone()
    }
}

pub struct Aggregate {
    id: String,
    num_keys: usize,
    aggs: Vec<AggSpec>,
    final_schema: SchemaRef,
    groups: HashMap<Vec<u8>, GroupState>,
    metrics: OpMetrics,
}

impl Aggregate {
    pub fn new(id: String, num_keys: usize, aggs: Vec<AggSpec>, final_schema: SchemaRef) -> Self {
        Self {
            id,
            num_keys,
            aggs,
            final_schema,
            groups: HashMap::new(),
            metrics: OpMetrics::new(),
        }
    }
}

#[async_trait]
impl Operator for Aggregate {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, mut ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();

        while let Some(msg) = ctx.inbound.recv().await {
            match msg {
                Message::Data(batch) => {
                    self.metrics.record_in(batch.num_rows() as u64);
                    for row in 0..batch.num_rows() {
                        let key_values: Vec<ScalarValue> =
                            (0..self.num_keys).map(|c| get_value(&batch, c, row)).collect();
                        let key_bytes: Vec<u8> =
                            key_values.iter().flat_map(ScalarValue::hash_bytes).collect();

                        let mut col = self.num_keys;
                        let mut incoming = Vec::with_capacity(self.aggs.len());
                        for agg in &self.aggs {
                            let width = partial_width(agg.func);
                            let values: Vec<ScalarValue> =
                                (0..width).map(|i| get_value(&batch, col + i, row)).collect();
                            incoming.push(Accumulator::from_partial(agg.func, &values));
                            col += width;
                        }

                        let aggs = &self.aggs;
                        let state = self.groups.entry(key_bytes).or_insert_with(|| GroupState {
                            key_values: key_values.clone(),
                            accs: aggs.iter().map(|a| Accumulator::new(a.func)).collect(),
                        });
                        for (acc, inc) in state.accs.iter_mut().zip(incoming.iter()) {
                            acc.combine(inc);
                        }
                    }
                }
                Message::Stop => break,
                _ => {}
            }
        }

        for out in &ctx.outbound {
            out.send(Message::FieldNames(self.final_schema.clone())).await.ok();
        }

        let num_cols = self.final_schema.fields().len();
        let mut columns: Vec<Vec<ScalarValue>> = vec![Vec::new(); num_cols];
        for state in self.groups.values() {
            let mut col = 0;
            for v in &state.key_values {
                columns[col].push(v.clone());
                col += 1;
            }
            for acc in &state.accs {
                columns[col].push(acc.finalize());
                col += 1;
            }
        }
        let num_rows = columns.first().map(Vec::len).unwrap_or(0);
        if num_rows > 0 {
            let batch = match build_batch(self.final_schema.clone(), columns) {
                Ok(batch) => batch,
                Err(e) => {
                    self.metrics.timer_stop();
                    ctx.control
                        .send(qflow_core::ControlMessage::Complete {
                            operator: self.id.clone(),
                            error: Some(EngineError::Aggregate {
                                operator: self.id.clone(),
                                detail: e.to_string(),
                            }),
                            metrics: self.metrics.clone(),
                        })
                        .await
                        .ok();
                    return Ok(());
                }
            };
            self.metrics.record_out(batch.num_rows() as u64);
            for out in &ctx.outbound {
                out.send(Message::Data(batch.clone())).await.ok();
            }
        }

        self.metrics.timer_stop();
        ctx.control
            .send(qflow_core::ControlMessage::Complete {
                operator: self.id.clone(),
                error: None,
                metrics: self.metrics.clone(),
            })
            .await
            .ok();
        Ok(())
    }

    fn metrics(&self) -> OpMetrics {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_combine_law_matches_direct_average() {
        let mut a = Accumulator::Avg { sum: 10.0, count: 2 }; // avg 5
        let b = Accumulator::Avg { sum: 30.0, count: 3 }; // avg 10
        a.combine(&b);
        let ScalarValue::Float64(v) = a.finalize() else {
            panic!("expected Float64")
        };
        assert!((v - (40.0 / 5.0)).abs() < 1e-9);
    }

    #[test]
    fn sum_combine_law() {
        let mut a = Accumulator::Sum(4.0);
        a.combine(&Accumulator::Sum(6.0));
        assert_eq!(a.finalize(), ScalarValue::Float64(10.0));
    }

    #[test]
    fn count_ignores_nulls() {
        let mut a = Accumulator::Count(0);
        a.observe(&ScalarValue::Int64(1));
        a.observe(&ScalarValue::Null);
        a.observe(&ScalarValue::Int64(2));
        assert_eq!(a.finalize(), ScalarValue::Float64(2.0));
    }
}
