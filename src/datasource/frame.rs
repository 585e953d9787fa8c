//! Timestamp-indexed tables.
//!
//! A [`Frame`] is what every query ends up as: one row per sample time (epoch
//! seconds, ascending, unique) and one named `f64` column per series.

use std::io::Write;

use ndarray::Array2;

use crate::datasource::DataSourceError;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    columns: Vec<String>,
    timestamps: Vec<i64>,
    rows: Vec<Vec<f64>>,
}

impl Frame {
    /// Single-column frame from `(timestamp, value)` samples.
    ///
    /// Samples are sorted; a repeated timestamp keeps its last value.
    pub fn from_series(name: &str, mut samples: Vec<(i64, f64)>) -> Self {
        samples.sort_by_key(|(ts, _)| *ts);
        let mut timestamps: Vec<i64> = Vec::with_capacity(samples.len());
        let mut rows: Vec<Vec<f64>> = Vec::with_capacity(samples.len());
        for (ts, value) in samples {
            if timestamps.last() == Some(&ts) {
                if let Some(last) = rows.last_mut() {
                    last[0] = value;
                }
                continue;
            }
            timestamps.push(ts);
            rows.push(vec![value]);
        }
        Self {
            columns: vec![name.to_string()],
            timestamps,
            rows,
        }
    }

    /// Frame from caller-supplied rows, stamped `0..n`.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self, DataSourceError> {
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(DataSourceError::Shape(format!(
                "row {bad} has {} values, expected {}",
                rows[bad].len(),
                columns.len()
            )));
        }
        Ok(Self {
            timestamps: (0..rows.len() as i64).collect(),
            columns,
            rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    fn index_of(&self, name: &str) -> Result<usize, DataSourceError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DataSourceError::MissingColumn(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<Vec<f64>, DataSourceError> {
        let idx = self.index_of(name)?;
        Ok(self.rows.iter().map(|row| row[idx]).collect())
    }

    /// Set `name` to `value` on every row, appending the column if absent.
    pub fn broadcast_column(&mut self, name: &str, value: f64) {
        match self.columns.iter().position(|c| c == name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(value);
                }
            }
        }
    }

    /// Copy without the rows holding a NaN or infinite value, and the number
    /// of rows dropped.
    pub fn drop_non_finite(&self) -> (Frame, usize) {
        let mut timestamps = Vec::with_capacity(self.len());
        let mut rows = Vec::with_capacity(self.len());
        for (ts, row) in self.timestamps.iter().zip(&self.rows) {
            if row.iter().all(|v| v.is_finite()) {
                timestamps.push(*ts);
                rows.push(row.clone());
            }
        }
        let dropped = self.len() - rows.len();
        let frame = Frame {
            columns: self.columns.clone(),
            timestamps,
            rows,
        };
        (frame, dropped)
    }

    /// Row-major matrix of the named columns, in the given order.
    pub fn to_matrix(&self, names: &[String]) -> Result<Array2<f64>, DataSourceError> {
        let indices = names
            .iter()
            .map(|n| self.index_of(n))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Array2::from_shape_fn((self.len(), indices.len()), |(r, c)| {
            self.rows[r][indices[c]]
        }))
    }

    /// Inner join on timestamp. Column names must be disjoint.
    pub fn inner_join(&self, other: &Frame) -> Result<Frame, DataSourceError> {
        if let Some(dup) = other.columns.iter().find(|c| self.has_column(c)) {
            return Err(DataSourceError::DuplicateColumn(dup.clone()));
        }

        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());

        let mut timestamps = Vec::new();
        let mut rows = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.len() && j < other.len() {
            let (left, right) = (self.timestamps[i], other.timestamps[j]);
            if left < right {
                i += 1;
            } else if left > right {
                j += 1;
            } else {
                let mut row = self.rows[i].clone();
                row.extend_from_slice(&other.rows[j]);
                timestamps.push(left);
                rows.push(row);
                i += 1;
                j += 1;
            }
        }

        Ok(Frame {
            columns,
            timestamps,
            rows,
        })
    }

    /// Write as CSV with a leading `timestamp` column.
    pub fn write_csv<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "timestamp,{}", self.columns.join(","))?;
        for (ts, row) in self.timestamps.iter().zip(&self.rows) {
            let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(out, "{ts},{}", values.join(","))?;
        }
        out.flush()
    }
}
