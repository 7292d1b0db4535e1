//! The `streamstats` operator: running aggregates emitted per record.
//!
//! Each record gets one result cell per configured measure, reflecting the
//! aggregate over the records seen so far in its group bucket. Windows bound
//! that history by record count, by a timestamp span, or both; without a
//! window the aggregate runs over the whole stream.
//!
//! Windowed `cardinality` is exact (a reference-counted set, since eviction
//! needs to know when a value leaves the window entirely) while the
//! unwindowed case is a HyperLogLog estimate. The two can disagree for the
//! same data; this is inherent, not a bug.
//!
//! When `global` is false, window positions are bucket-relative: eviction is
//! anchored on each bucket's own processed-record count instead of the row
//! index, so a bucket's window spans its own last N records.

use std::collections::{BTreeSet, HashMap, VecDeque};

use anyhow::{Context, Result, bail};
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, TIMESTAMP_KEY};
use crate::cell::Cell;
use crate::expr::{BoolExpr, ValueExpr};
use crate::processors::{AggFunc, Processor, record_fields};
use crate::stream::Fetched;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
}

/// A timestamp span, e.g. 5 minutes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TimeSpan {
    pub num: u64,
    pub unit: TimeUnit,
}

impl TimeSpan {
    pub fn as_millis(&self) -> u64 {
        let per_unit = match self.unit {
            TimeUnit::Millisecond => 1,
            TimeUnit::Second => 1_000,
            TimeUnit::Minute => 60_000,
            TimeUnit::Hour => 3_600_000,
            TimeUnit::Day => 86_400_000,
        };
        self.num * per_unit
    }
}

/// Where a measure's per-record value comes from, when not simply the
/// measure's field column.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureSource {
    /// Computed per record; an evaluation failure excludes the record.
    Expr(ValueExpr),
    /// A predicate gate: a record contributes 1.0 when it holds and is
    /// excluded otherwise. The measure still produces a result either way.
    Gate(BoolExpr),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamMeasure {
    pub func: AggFunc,
    /// Result label, and the source column when `source` is unset.
    pub field: String,
    #[serde(default)]
    pub source: Option<MeasureSource>,
}

impl StreamMeasure {
    pub fn result_name(&self) -> String {
        if self.field.is_empty() {
            self.func.to_string()
        } else {
            format!("{}({})", self.func, self.field)
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamStatsOptions {
    pub measures: Vec<StreamMeasure>,
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Count-bounded window size; 0 means unbounded.
    #[serde(default)]
    pub window: u64,
    #[serde(default)]
    pub time_window: Option<TimeSpan>,
    /// Anchor window positions on the stream-wide row counter. When false,
    /// positions are bucket-relative.
    #[serde(default = "default_true")]
    pub global: bool,
    /// Include the record being processed in its own result. When false, the
    /// result is computed before the record is incorporated.
    #[serde(default = "default_true")]
    pub current: bool,
    /// Clear all aggregation state whenever the bucket key changes.
    #[serde(default)]
    pub reset_on_change: bool,
    /// Clear all state before aggregating a record this holds on.
    #[serde(default)]
    pub reset_before: Option<BoolExpr>,
    /// Clear all state after aggregating a record this holds on.
    #[serde(default)]
    pub reset_after: Option<BoolExpr>,
    /// Direction the input's timestamps are sorted in; governs which side of
    /// the time window is evicted.
    #[serde(default = "default_true")]
    pub time_sort_asc: bool,
}

impl StreamStatsOptions {
    fn has_count_window(&self) -> bool {
        self.window > 0
    }

    fn has_window(&self) -> bool {
        self.has_count_window() || self.time_window.is_some()
    }
}

struct WindowEntry {
    position: i64,
    value: Cell,
    time_ms: u64,
}

/// Running state for one (measure, bucket) pair.
struct RunningStats {
    /// The scalar accumulator: count, sum, or distinct-count depending on
    /// the function.
    current: Cell,
    /// The window proper; for min/max the numeric monotonic deque, for range
    /// the max-side deque.
    primary: VecDeque<WindowEntry>,
    /// For min/max the string-typed fallback deque, for range the min-side
    /// deque.
    secondary: VecDeque<WindowEntry>,
    /// Reference counts for windowed cardinality/values.
    refcounts: HashMap<String, u64>,
    /// Observed values for unwindowed `values`.
    distinct: BTreeSet<String>,
    /// Sketch for unwindowed `cardinality`.
    sketch: Option<crate::sketch::HyperLogLog>,
    /// (min, max) extremes for unwindowed `range`.
    extremes: Option<(f64, f64)>,
    processed: u64,
}

impl RunningStats {
    fn new(func: AggFunc) -> Self {
        let current = match func {
            AggFunc::Count | AggFunc::Sum | AggFunc::Avg | AggFunc::Range | AggFunc::Cardinality => {
                Cell::Float(0.0)
            }
            AggFunc::Min | AggFunc::Max | AggFunc::Values => Cell::Null,
        };
        Self {
            current,
            primary: VecDeque::new(),
            secondary: VecDeque::new(),
            refcounts: HashMap::new(),
            distinct: BTreeSet::new(),
            sketch: None,
            extremes: None,
            processed: 0,
        }
    }

    fn current_f64(&self) -> Result<f64> {
        self.current.as_f64().with_context(|| {
            format!(
                "running accumulator is <{}>, expected a number",
                self.current.display_string()
            )
        })
    }
}

/// The placeholder emitted while a measure has no result yet.
fn placeholder(func: AggFunc) -> Cell {
    match func {
        AggFunc::Count | AggFunc::Avg | AggFunc::Cardinality => Cell::Float(0.0),
        AggFunc::Sum | AggFunc::Min | AggFunc::Max | AggFunc::Range | AggFunc::Values => {
            Cell::Str(String::new())
        }
    }
}

pub struct StreamStatsProcessor {
    options: StreamStatsOptions,
    required: BTreeSet<String>,
    /// Per-measure map of bucket key to running state.
    running: Vec<HashMap<String, RunningStats>>,
    /// Stream-wide row counter; the window position when `global`.
    position: i64,
    previous_key: Option<String>,
}

impl StreamStatsProcessor {
    pub fn new(options: StreamStatsOptions) -> Self {
        let mut required = BTreeSet::new();
        required.extend(options.group_by.iter().cloned());
        for measure in &options.measures {
            match &measure.source {
                None => {
                    required.insert(measure.field.clone());
                }
                Some(MeasureSource::Expr(expr)) => expr.fields(&mut required),
                Some(MeasureSource::Gate(gate)) => gate.fields(&mut required),
            }
        }
        for reset in [&options.reset_before, &options.reset_after]
            .into_iter()
            .flatten()
        {
            reset.fields(&mut required);
        }
        let measure_count = options.measures.len();
        Self {
            options,
            required,
            running: (0..measure_count).map(|_| HashMap::new()).collect(),
            position: 0,
            previous_key: None,
        }
    }

    fn reset_all(&mut self) {
        for per_bucket in &mut self.running {
            per_bucket.clear();
        }
        self.position = 0;
    }

    /// Check the input is sorted by timestamp in the configured direction.
    /// Time windows cannot evict correctly otherwise.
    fn validate_time_order(&self, batch: &Batch) -> Result<()> {
        let timestamps = batch
            .read_column(TIMESTAMP_KEY)
            .context("time-windowed streamstats needs a timestamp column")?;
        let mut previous: Option<u64> = None;
        for cell in timestamps {
            let ts = cell
                .as_u64()
                .context("time-windowed streamstats needs numeric timestamps")?;
            if let Some(prev) = previous {
                let ordered = if self.options.time_sort_asc {
                    prev <= ts
                } else {
                    prev >= ts
                };
                if !ordered {
                    bail!(
                        "streamstats: input timestamps are not sorted {}",
                        if self.options.time_sort_asc {
                            "ascending"
                        } else {
                            "descending"
                        }
                    );
                }
            }
            previous = Some(ts);
        }
        Ok(())
    }
}

/// The per-record value for one measure: the cell to aggregate plus whether
/// this record contributes at all.
fn resolve_value(
    measure: &StreamMeasure,
    fields: &HashMap<String, Cell>,
) -> (Cell, bool) {
    match &measure.source {
        None => {
            let Some(cell) = fields.get(&measure.field) else {
                return (Cell::Null, false);
            };
            (normalize(cell), !cell.is_null())
        }
        Some(MeasureSource::Expr(expr)) => match expr.evaluate(fields) {
            Ok(cell) if !cell.is_null() => (normalize(&cell), true),
            Ok(_) => (Cell::Null, false),
            Err(err) => {
                debug!("streamstats <{}>: {err:#}", measure.result_name());
                (Cell::Null, false)
            }
        },
        Some(MeasureSource::Gate(gate)) => match gate.evaluate(fields) {
            Ok(true) => (Cell::Float(1.0), true),
            Ok(false) => (Cell::Null, false),
            Err(err) => {
                debug!("streamstats <{}>: {err:#}", measure.result_name());
                (Cell::Null, false)
            }
        },
    }
}

/// Numeric when the value parses as a number, its string rendering otherwise.
fn normalize(cell: &Cell) -> Cell {
    match cell.coerce_f64() {
        Some(v) => Cell::Float(v),
        None => Cell::Str(cell.display_string()),
    }
}

// ---------------------------------------------------------------------------
// Unwindowed accumulation
// ---------------------------------------------------------------------------

fn no_window_update(
    rs: &mut RunningStats,
    func: AggFunc,
    value: Cell,
    include: bool,
    current: bool,
) -> Result<(Cell, bool)> {
    let exists = rs.processed > 0;
    let mut result = if exists { rs.current.clone() } else { Cell::Null };
    if func == AggFunc::Avg && exists {
        result = Cell::Float(rs.current_f64()? / rs.processed as f64);
    }
    if func == AggFunc::Values {
        result = values_list(&rs.distinct);
    }
    let exists = exists && !(func == AggFunc::Values && rs.distinct.is_empty());
    if !include {
        return Ok((result, exists));
    }

    match func {
        AggFunc::Count => rs.current = Cell::Float(rs.current_f64()? + 1.0),
        AggFunc::Sum | AggFunc::Avg => match value.as_f64() {
            Some(v) => rs.current = Cell::Float(rs.current_f64()? + v),
            None => return Ok((result, exists)),
        },
        AggFunc::Min | AggFunc::Max => {
            rs.current = reduce_extreme(&rs.current, &value, func == AggFunc::Min);
        }
        AggFunc::Range => match value.as_f64() {
            Some(v) => {
                let (min, max) = match rs.extremes {
                    Some((min, max)) => (min.min(v), max.max(v)),
                    None => (v, v),
                };
                rs.extremes = Some((min, max));
                rs.current = Cell::Float(max - min);
            }
            None => return Ok((result, exists)),
        },
        AggFunc::Cardinality => {
            let sketch = rs.sketch.get_or_insert_with(Default::default);
            sketch.add_str(&value.display_string());
            rs.current = Cell::Float(sketch.estimate() as f64);
        }
        AggFunc::Values => {
            rs.distinct.insert(value.display_string());
        }
    }
    rs.processed += 1;

    if !current {
        return Ok((result, exists));
    }
    let latest = match func {
        AggFunc::Avg => Cell::Float(rs.current_f64()? / rs.processed as f64),
        AggFunc::Values => values_list(&rs.distinct),
        _ => rs.current.clone(),
    };
    Ok((latest, true))
}

/// Compare-and-replace for unwindowed min/max. Numeric and string values
/// order numeric-first for min and string-first for max, so mixed-type
/// streams keep a stable answer.
fn reduce_extreme(current: &Cell, candidate: &Cell, want_min: bool) -> Cell {
    if current.is_null() {
        return candidate.clone();
    }
    let ord = current.compare(candidate);
    let replace = if want_min { ord.is_gt() } else { ord.is_lt() };
    if replace {
        candidate.clone()
    } else {
        current.clone()
    }
}

fn values_list(distinct: &BTreeSet<String>) -> Cell {
    Cell::StrList(distinct.iter().cloned().collect())
}

// ---------------------------------------------------------------------------
// Windowed accumulation
// ---------------------------------------------------------------------------

fn windowed_update(
    rs: &mut RunningStats,
    func: AggFunc,
    value: Cell,
    include: bool,
    position: i64,
    time_ms: u64,
    options: &StreamStatsOptions,
) -> Result<(Cell, bool)> {
    // current=false reports the window as it stood before this record: with
    // only a time window that is the state before its own eviction pass, with
    // a count window it is the window cleaned to the previous position.
    let mut result = Cell::Null;
    let mut exists = false;
    if !options.current && !options.has_count_window() {
        let (r, e) = window_results(rs, func)?;
        result = r;
        exists = e;
    }

    if let Some(span) = options.time_window {
        clean_time_window(rs, func, time_ms, span, options.time_sort_asc)?;
    }
    if !options.current && options.has_count_window() {
        clean_window(rs, func, position - 1, options.window as i64)?;
        let (r, e) = window_results(rs, func)?;
        result = r;
        exists = e;
    }
    if options.has_count_window() {
        clean_window(rs, func, position, options.window as i64)?;
    }

    if !include {
        rs.processed += 1;
        if !options.current {
            return Ok((result, exists));
        }
        return window_results(rs, func);
    }

    let latest = add_to_window(rs, func, value, position, time_ms)?;
    rs.processed += 1;

    if !options.current {
        return Ok((result, exists));
    }
    Ok((latest, true))
}

/// Evict entries whose position has fallen out of the count window.
fn clean_window(
    rs: &mut RunningStats,
    func: AggFunc,
    position: i64,
    window_size: i64,
) -> Result<()> {
    while let Some(front) = rs.primary.front() {
        if front.position + window_size <= position {
            remove_front(rs, func)?;
        } else {
            break;
        }
    }
    while let Some(front) = rs.secondary.front() {
        if front.position + window_size <= position {
            rs.secondary.pop_front();
        } else {
            break;
        }
    }
    Ok(())
}

/// Evict entries whose timestamp has left the time window.
fn clean_time_window(
    rs: &mut RunningStats,
    func: AggFunc,
    now_ms: u64,
    span: TimeSpan,
    ascending: bool,
) -> Result<()> {
    // The window is the closed interval of `span` ending at the current
    // record, so an entry sitting exactly `span` away stays.
    let span_ms = span.as_millis();
    let out_of_window = |entry_ms: u64| {
        if ascending {
            entry_ms + span_ms < now_ms
        } else {
            entry_ms > now_ms + span_ms
        }
    };
    while let Some(front) = rs.primary.front() {
        if out_of_window(front.time_ms) {
            remove_front(rs, func)?;
        } else {
            break;
        }
    }
    while let Some(front) = rs.secondary.front() {
        if out_of_window(front.time_ms) {
            rs.secondary.pop_front();
        } else {
            break;
        }
    }
    Ok(())
}

/// Drop the oldest primary entry and undo its contribution.
fn remove_front(rs: &mut RunningStats, func: AggFunc) -> Result<()> {
    let Some(front) = rs.primary.pop_front() else {
        return Ok(());
    };
    match func {
        AggFunc::Count => rs.current = Cell::Float(rs.current_f64()? - 1.0),
        AggFunc::Sum | AggFunc::Avg => {
            let Some(v) = front.value.as_f64() else {
                error!("streamstats: non-numeric window entry under {func}");
                bail!("window entry under {func} is not numeric");
            };
            rs.current = Cell::Float(rs.current_f64()? - v);
        }
        AggFunc::Cardinality | AggFunc::Values => {
            let key = front.value.display_string();
            if let Some(count) = rs.refcounts.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    rs.refcounts.remove(&key);
                }
            }
            rs.current = Cell::Float(rs.refcounts.len() as f64);
        }
        // Monotonic deques carry no accumulator to adjust.
        AggFunc::Min | AggFunc::Max | AggFunc::Range => {}
    }
    Ok(())
}

/// Incorporate one value and return the aggregate including it.
fn add_to_window(
    rs: &mut RunningStats,
    func: AggFunc,
    value: Cell,
    position: i64,
    time_ms: u64,
) -> Result<Cell> {
    let entry = |value: Cell| WindowEntry {
        position,
        value,
        time_ms,
    };
    match func {
        AggFunc::Count => {
            rs.current = Cell::Float(rs.current_f64()? + 1.0);
            rs.primary.push_back(entry(Cell::Float(1.0)));
            Ok(rs.current.clone())
        }
        AggFunc::Sum | AggFunc::Avg => {
            let Some(v) = value.as_f64() else {
                // Non-numeric input: excluded, prior result stands.
                return window_results(rs, func).map(|(r, _)| r);
            };
            rs.current = Cell::Float(rs.current_f64()? + v);
            rs.primary.push_back(entry(Cell::Float(v)));
            if func == AggFunc::Avg {
                Ok(Cell::Float(rs.current_f64()? / rs.primary.len() as f64))
            } else {
                Ok(rs.current.clone())
            }
        }
        AggFunc::Min | AggFunc::Max => {
            let want_min = func == AggFunc::Min;
            match value.as_f64() {
                Some(v) => {
                    while let Some(back) = rs.primary.back() {
                        let Some(b) = back.value.as_f64() else {
                            error!("streamstats: non-numeric entry in numeric {func} window");
                            bail!("non-numeric entry in numeric {func} window");
                        };
                        let dominated = if want_min { b >= v } else { b <= v };
                        if dominated {
                            rs.primary.pop_back();
                        } else {
                            break;
                        }
                    }
                    rs.primary.push_back(entry(Cell::Float(v)));
                }
                None => {
                    let s = value.display_string();
                    while let Some(back) = rs.secondary.back() {
                        let b = back.value.display_string();
                        let dominated = if want_min { b >= s } else { b <= s };
                        if dominated {
                            rs.secondary.pop_back();
                        } else {
                            break;
                        }
                    }
                    rs.secondary.push_back(entry(Cell::Str(s)));
                }
            }
            window_results(rs, func).map(|(r, _)| r)
        }
        AggFunc::Range => {
            let Some(v) = value.as_f64() else {
                return window_results(rs, func).map(|(r, _)| r);
            };
            // primary is the max-side deque, secondary the min-side.
            while let Some(back) = rs.primary.back() {
                match back.value.as_f64() {
                    Some(b) if b <= v => {
                        rs.primary.pop_back();
                    }
                    Some(_) => break,
                    None => bail!("non-numeric entry in range window"),
                }
            }
            rs.primary.push_back(entry(Cell::Float(v)));
            while let Some(back) = rs.secondary.back() {
                match back.value.as_f64() {
                    Some(b) if b >= v => {
                        rs.secondary.pop_back();
                    }
                    Some(_) => break,
                    None => bail!("non-numeric entry in range window"),
                }
            }
            rs.secondary.push_back(entry(Cell::Float(v)));
            window_results(rs, func).map(|(r, _)| r)
        }
        AggFunc::Cardinality | AggFunc::Values => {
            let key = value.display_string();
            *rs.refcounts.entry(key.clone()).or_insert(0) += 1;
            rs.current = Cell::Float(rs.refcounts.len() as f64);
            rs.primary.push_back(entry(Cell::Str(key)));
            window_results(rs, func).map(|(r, _)| r)
        }
    }
}

/// The aggregate over the current window contents.
fn window_results(rs: &RunningStats, func: AggFunc) -> Result<(Cell, bool)> {
    match func {
        AggFunc::Count | AggFunc::Sum => Ok((rs.current.clone(), !rs.primary.is_empty())),
        AggFunc::Avg => {
            if rs.primary.is_empty() {
                Ok((Cell::Null, false))
            } else {
                Ok((
                    Cell::Float(rs.current_f64()? / rs.primary.len() as f64),
                    true,
                ))
            }
        }
        AggFunc::Min | AggFunc::Max => {
            if let Some(front) = rs.primary.front() {
                Ok((front.value.clone(), true))
            } else if let Some(front) = rs.secondary.front() {
                Ok((front.value.clone(), true))
            } else {
                Ok((Cell::Null, false))
            }
        }
        AggFunc::Range => match (rs.primary.front(), rs.secondary.front()) {
            (Some(max), Some(min)) => {
                let (Some(hi), Some(lo)) = (max.value.as_f64(), min.value.as_f64()) else {
                    bail!("non-numeric entry in range window");
                };
                Ok((Cell::Float(hi - lo), true))
            }
            _ => Ok((Cell::Null, false)),
        },
        AggFunc::Cardinality => Ok((
            Cell::Float(rs.refcounts.len() as f64),
            !rs.refcounts.is_empty(),
        )),
        AggFunc::Values => {
            if rs.refcounts.is_empty() {
                Ok((Cell::Null, false))
            } else {
                let mut values: Vec<String> = rs.refcounts.keys().cloned().collect();
                values.sort();
                Ok((Cell::StrList(values), true))
            }
        }
    }
}

impl Processor for StreamStatsProcessor {
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched> {
        let Some(mut batch) = input else {
            return Ok(Fetched::done(None));
        };

        if self.options.time_window.is_some() {
            self.validate_time_order(&batch)?;
        }

        let options = self.options.clone();
        let mut results: Vec<Vec<Cell>> = (0..options.measures.len())
            .map(|_| Vec::with_capacity(batch.num_records()))
            .collect();

        for row in 0..batch.num_records() {
            let record = batch.record(row);
            let fields = record_fields(&record, &self.required);

            let mut key = String::new();
            for field in &options.group_by {
                let cell = record.read_column(field).unwrap_or(&Cell::Null);
                key.push_str(&cell.display_string());
                key.push('_');
            }

            if options.reset_on_change
                && self.previous_key.is_some()
                && self.previous_key.as_deref() != Some(key.as_str())
            {
                self.reset_all();
            }
            if let Some(reset) = &options.reset_before
                && reset.evaluate(&fields)?
            {
                self.reset_all();
            }

            let time_ms = if options.time_window.is_some() {
                record
                    .timestamp()
                    .context("time-windowed streamstats needs a timestamp per record")?
            } else {
                0
            };

            for (slot, measure) in options.measures.iter().enumerate() {
                let rs = self.running[slot]
                    .entry(key.clone())
                    .or_insert_with(|| RunningStats::new(measure.func));
                let (value, include) = resolve_value(measure, &fields);

                let (result, exists) = if options.has_window() {
                    let position = if options.global {
                        self.position
                    } else {
                        rs.processed as i64
                    };
                    windowed_update(
                        rs,
                        measure.func,
                        value,
                        include,
                        position,
                        time_ms,
                        &options,
                    )?
                } else {
                    no_window_update(rs, measure.func, value, include, options.current)?
                };

                results[slot].push(if exists { result } else { placeholder(measure.func) });
            }

            self.position += 1;
            if let Some(reset) = &options.reset_after
                && reset.evaluate(&fields)?
            {
                self.reset_all();
            }
            self.previous_key = Some(key);
        }

        let columns = options
            .measures
            .iter()
            .zip(results)
            .map(|(measure, cells)| (measure.result_name(), cells))
            .collect();
        batch.append_known_values(columns)?;
        Ok(Fetched::batch(batch))
    }

    fn rewind(&mut self) {
        for per_bucket in &mut self.running {
            per_bucket.clear();
        }
        self.position = 0;
        self.previous_key = None;
    }
}
