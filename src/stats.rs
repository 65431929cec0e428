//! Numeric stability statistics
//!
//! For one argument of one (callable, call site), the captured values from
//! every invocation are accumulated into a [`SampleAccumulator`] and frozen
//! into [`RunningStatistics`], which computes per element:
//!
//! - mean across samples (f64)
//! - population standard deviation across samples
//! - significant bits `log2(|mean| / std)`
//!
//! Where the ratio is undefined (`std == 0` or `mean == 0`) the element is
//! filled with the configured ceiling for the sample dtype instead of
//! producing NaN or infinity.
//!
//! Each statistic is computed on first request and memoized; the samples
//! never change after construction.

use crate::config::SigCeilings;
use crate::value::{CapturedValue, DType};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

/// Per-element statistic values, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatArray {
    /// Empty for scalar statistics
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl StatArray {
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            values: vec![value],
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            values: vec![0.0; shape.iter().product()],
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Arithmetic mean over all elements (NaN when empty)
    pub fn reduce(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }
}

/// Result of one statistic
#[derive(Debug, Clone, PartialEq)]
pub enum Statistic {
    /// Not enough samples (or no sample axis) to compute anything
    Unavailable,
    Computed(StatArray),
}

impl Statistic {
    /// Scalar reduction for summary tables; `Unavailable` becomes NaN
    pub fn reduce(&self) -> f64 {
        match self {
            Statistic::Unavailable => f64::NAN,
            Statistic::Computed(array) => array.reduce(),
        }
    }

    pub fn array(&self) -> Option<&StatArray> {
        match self {
            Statistic::Unavailable => None,
            Statistic::Computed(array) => Some(array),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    Dense,
    Sparse,
}

#[derive(Debug, Clone, PartialEq)]
struct Layout {
    kind: SampleKind,
    shape: Vec<usize>,
    dtype: DType,
}

impl Layout {
    fn of(value: &CapturedValue) -> Option<Self> {
        match value {
            CapturedValue::Scalar { dtype, .. } => Some(Self {
                kind: SampleKind::Dense,
                shape: Vec::new(),
                dtype: *dtype,
            }),
            CapturedValue::Dense(array) => Some(Self {
                kind: SampleKind::Dense,
                shape: array.shape.clone(),
                dtype: array.dtype,
            }),
            CapturedValue::Sparse(array) => Some(Self {
                kind: SampleKind::Sparse,
                shape: array.shape.clone(),
                dtype: array.dtype,
            }),
            CapturedValue::Unrepresentable { .. } => None,
        }
    }

    /// Shape of the resulting statistics; sparse inputs reduce to scalars
    fn stat_shape(&self) -> Vec<usize> {
        match self.kind {
            SampleKind::Dense => self.shape.clone(),
            SampleKind::Sparse => Vec::new(),
        }
    }
}

/// Mutable sample collection for one argument
#[derive(Debug, Default)]
pub struct SampleAccumulator {
    layout: Option<Layout>,
    /// Dense samples: one row per sample; sparse samples: one mass per sample
    rows: Vec<Vec<f64>>,
    mismatched: bool,
}

impl SampleAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one captured value; unrepresentable values are ignored
    pub fn push(&mut self, value: &CapturedValue) {
        let Some(layout) = Layout::of(value) else {
            return;
        };
        if let CapturedValue::Dense(array) = value {
            if !array.is_well_formed() {
                if !self.mismatched {
                    warn!(
                        shape = ?array.shape,
                        len = array.values.len(),
                        "Array values do not fill their shape; statistics will be zero-filled"
                    );
                }
                self.mismatched = true;
                self.layout.get_or_insert(layout);
                self.rows.push(Vec::new());
                return;
            }
        }

        match &self.layout {
            None => self.layout = Some(layout),
            Some(expected) if *expected != layout => {
                if !self.mismatched {
                    warn!(
                        expected = ?expected.shape,
                        found = ?layout.shape,
                        "Sample layout mismatch; statistics will be zero-filled"
                    );
                }
                self.mismatched = true;
            }
            Some(_) => {}
        }

        let row = match value {
            CapturedValue::Scalar { value, .. } => vec![*value],
            CapturedValue::Dense(array) => array.values.clone(),
            CapturedValue::Sparse(array) => vec![array.mass()],
            CapturedValue::Unrepresentable { .. } => return,
        };
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Freeze the samples
    pub fn finish(self, ceilings: &SigCeilings, min_samples: usize) -> RunningStatistics {
        let samples = self.rows.len();
        let Some(layout) = self.layout else {
            return RunningStatistics::unavailable();
        };

        let data = if samples == 0 || samples < min_samples {
            SampleData::Insufficient
        } else if self.mismatched {
            SampleData::Mismatch
        } else {
            SampleData::Rows(self.rows)
        };

        RunningStatistics {
            samples,
            shape: layout.stat_shape(),
            dtype: Some(layout.dtype),
            ceiling: ceilings.ceiling(layout.dtype),
            data,
            mean: OnceLock::new(),
            std: OnceLock::new(),
            sig: OnceLock::new(),
        }
    }
}

#[derive(Debug)]
enum SampleData {
    Insufficient,
    Mismatch,
    Rows(Vec<Vec<f64>>),
}

/// Frozen samples of one argument with memoized statistics
#[derive(Debug)]
pub struct RunningStatistics {
    samples: usize,
    shape: Vec<usize>,
    dtype: Option<DType>,
    ceiling: f64,
    data: SampleData,
    mean: OnceLock<Statistic>,
    std: OnceLock<Statistic>,
    sig: OnceLock<Statistic>,
}

impl RunningStatistics {
    /// Statistics with no samples at all
    pub fn unavailable() -> Self {
        Self {
            samples: 0,
            shape: Vec::new(),
            dtype: None,
            ceiling: 0.0,
            data: SampleData::Insufficient,
            mean: OnceLock::new(),
            std: OnceLock::new(),
            sig: OnceLock::new(),
        }
    }

    /// Build directly from a slice of captured values
    pub fn from_samples<'a, I>(values: I, ceilings: &SigCeilings, min_samples: usize) -> Self
    where
        I: IntoIterator<Item = &'a CapturedValue>,
    {
        let mut accumulator = SampleAccumulator::new();
        for value in values {
            accumulator.push(value);
        }
        accumulator.finish(ceilings, min_samples)
    }

    pub fn count(&self) -> usize {
        self.samples
    }

    /// Shape of the per-element statistics
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> Option<DType> {
        self.dtype
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.data, SampleData::Insufficient)
    }

    pub fn mean(&self) -> &Statistic {
        self.mean.get_or_init(|| match &self.data {
            SampleData::Insufficient => Statistic::Unavailable,
            SampleData::Mismatch => Statistic::Computed(StatArray::zeros(&self.shape)),
            SampleData::Rows(rows) => Statistic::Computed(StatArray {
                shape: self.shape.clone(),
                values: column_means(rows),
            }),
        })
    }

    pub fn std(&self) -> &Statistic {
        self.std.get_or_init(|| match (&self.data, self.mean()) {
            (SampleData::Rows(rows), Statistic::Computed(mean)) => {
                Statistic::Computed(StatArray {
                    shape: self.shape.clone(),
                    values: column_stds(rows, &mean.values),
                })
            }
            (SampleData::Mismatch, _) => Statistic::Computed(StatArray::zeros(&self.shape)),
            _ => Statistic::Unavailable,
        })
    }

    /// Significant bits per element
    pub fn sig(&self) -> &Statistic {
        self.sig.get_or_init(|| match (&self.data, self.mean(), self.std()) {
            (SampleData::Rows(_), Statistic::Computed(mean), Statistic::Computed(std)) => {
                let values = mean
                    .values
                    .iter()
                    .zip(&std.values)
                    .map(|(&m, &s)| significant_bits(m, s, self.ceiling))
                    .collect();
                Statistic::Computed(StatArray {
                    shape: self.shape.clone(),
                    values,
                })
            }
            (SampleData::Mismatch, _, _) => Statistic::Computed(StatArray::zeros(&self.shape)),
            _ => Statistic::Unavailable,
        })
    }

    /// Alias for [`RunningStatistics::sig`]
    pub fn significant_digits(&self) -> &Statistic {
        self.sig()
    }
}

/// `log2(|mean| / std)`, or `ceiling` where the ratio is undefined
pub fn significant_bits(mean: f64, std: f64, ceiling: f64) -> f64 {
    if mean == 0.0 || std == 0.0 {
        ceiling
    } else {
        (mean.abs() / std).log2()
    }
}

fn column_means(rows: &[Vec<f64>]) -> Vec<f64> {
    let n = rows.len() as f64;
    let width = rows.first().map(Vec::len).unwrap_or(0);
    (0..width)
        .map(|j| {
            let first = rows[0][j];
            // Identical samples: return the value itself, avoiding summation residue
            if rows.iter().all(|row| row[j].to_bits() == first.to_bits()) {
                first
            } else {
                rows.iter().map(|row| row[j]).sum::<f64>() / n
            }
        })
        .collect()
}

fn column_stds(rows: &[Vec<f64>], means: &[f64]) -> Vec<f64> {
    let n = rows.len() as f64;
    means
        .iter()
        .enumerate()
        .map(|(j, &mean)| {
            let first = rows[0][j];
            if rows.iter().all(|row| row[j].to_bits() == first.to_bits()) && first.is_finite() {
                return 0.0;
            }
            let sum_sq: f64 = rows.iter().map(|row| (row[j] - mean).powi(2)).sum();
            (sum_sq / n).sqrt()
        })
        .collect()
}
