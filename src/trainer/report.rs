//! Plain-text tables for the CLI.

use crate::trainer::predictor::{Prediction, RangeScore};
use crate::trainer::runner::PipelineReport;

/// Render rows under a header line and a dashed rule, columns left aligned.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let columns = headers.len().max(rows.iter().map(Vec::len).max().unwrap_or(0));
    let mut widths = vec![0; columns];
    for (i, h) in headers.iter().enumerate() {
        widths[i] = widths[i].max(h.len());
    }
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = (0..columns)
            .map(|i| {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                format!("{cell:<width$}", width = widths[i])
            })
            .collect();
        padded.join("  ").trim_end().to_string()
    };

    let mut out = String::new();
    out.push_str(&line(headers));
    out.push('\n');
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&rule.join("  "));
    out.push('\n');
    for row in rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    out
}

fn num(v: f64) -> String {
    format!("{v:.4}")
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Per-model errors of one trained pipeline, titled with its name.
pub fn training_table(report: &PipelineReport) -> String {
    let rows: Vec<Vec<String>> = report
        .models
        .iter()
        .map(|(name, m)| vec![name.clone(), num(m.mape), num(m.mae), num(m.mse), num(m.r2)])
        .collect();
    format!(
        "{:>14}{}\n{}\n{}",
        "",
        report.pipeline,
        "-".repeat(34),
        render_table(&headers(&["Name", "MAPE", "MAE", "MSE", "R2"]), &rows)
    )
}

pub fn range_table(scores: &[RangeScore]) -> String {
    let mut rows = Vec::new();
    let mut previous: Option<&str> = None;
    for score in scores {
        if previous.is_some_and(|p| p != score.pipeline) {
            rows.push(Vec::new());
        }
        previous = Some(score.pipeline.as_str());
        rows.push(vec![
            score.pipeline.clone(),
            score.model.clone(),
            num(score.metrics.mape),
            num(score.metrics.mae),
            num(score.metrics.mse),
            num(score.metrics.r2),
        ]);
    }
    render_table(
        &headers(&["Pipeline", "Name", "MAPE", "MAE", "MSE", "R2"]),
        &rows,
    )
}

/// One table per pipeline with its feature values, target and predictions.
pub fn prediction_tables(predictions: &[Prediction]) -> String {
    let mut out = String::new();
    let mut start = 0;
    while start < predictions.len() {
        let pipeline = &predictions[start].pipeline;
        let end = predictions[start..]
            .iter()
            .position(|p| &p.pipeline != pipeline)
            .map_or(predictions.len(), |offset| start + offset);
        let group = &predictions[start..end];

        let mut header = headers(&["Pipeline", "Name"]);
        header.extend(group[0].features.iter().map(|(name, _)| name.clone()));
        header.extend(headers(&["Target", "Predicted", "Diff", "Err %"]));

        let rows: Vec<Vec<String>> = group
            .iter()
            .map(|p| {
                let mut row = vec![p.pipeline.clone(), p.model.clone()];
                row.extend(p.features.iter().map(|(_, v)| num(*v)));
                row.push(num(p.target));
                row.push(num(p.predicted));
                row.push(format!("{:.2}", p.diff));
                row.push(format!("{:.2}", p.error_pct));
                row
            })
            .collect();

        out.push_str(&render_table(&header, &rows));
        out.push('\n');
        start = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_table_aligns_columns() {
        let table = render_table(
            &headers(&["Name", "MAE"]),
            &[
                vec!["linear".to_string(), "1.5".to_string()],
                vec!["xgboost".to_string(), "10.25".to_string()],
            ],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Name     MAE");
        assert_eq!(lines[1], "-------  -----");
        assert_eq!(lines[2], "linear   1.5");
        assert_eq!(lines[3], "xgboost  10.25");
    }
}
