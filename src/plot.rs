//! PNG figures: preprocessing diagnostics and the training report.
//!
//! Every function draws into an explicit output path; nothing is kept between calls.
use std::collections::BTreeMap;
use std::path::Path;

use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::error::Result;
use crate::metrics::RocCurve;
use crate::raw::Raw;
use crate::train::History;

const PALETTE: [RGBColor; 8] = [
    RGBColor(220, 50, 50),
    RGBColor(50, 150, 50),
    RGBColor(50, 100, 220),
    RGBColor(220, 150, 50),
    RGBColor(150, 50, 220),
    RGBColor(50, 200, 200),
    RGBColor(220, 50, 150),
    RGBColor(100, 100, 100),
];

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;

// Finite (min, max) of the values, padded by 10 %; (-1, 1) when nothing is finite
fn padded_range<I: IntoIterator<Item = f32>>(values: I) -> (f32, f32) {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        return (-1.0, 1.0);
    }
    let margin = if hi > lo { (hi - lo) * 0.1 } else { 1.0 };
    (lo - margin, hi + margin)
}

fn finite_points(values: &[f32]) -> Vec<(f32, f32)> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, &v)| ((i + 1) as f32, v))
        .collect()
}

/// Stacked traces of the first `seconds` of every channel.
pub fn raw_traces<P: AsRef<Path>>(path: P, raw: &Raw, seconds: f64) -> Result<()> {
    let root = BitMapBackend::new(path.as_ref(), (1600, 1200)).into_drawing_area();
    root.fill(&WHITE)?;

    let shown = ((seconds * raw.sfreq()).round() as usize).clamp(1, raw.num_samples().max(1));
    let data = raw.data();

    // Each channel is drawn around its own offset, one spread apart
    let spread = data
        .iter()
        .fold(0f32, |acc, v| if v.is_finite() { acc.max(v.abs()) } else { acc })
        .max(f32::EPSILON)
        * 2.0;
    let num_channels = raw.channels().len();
    let duration = shown as f32 / raw.sfreq() as f32;

    let mut chart = ChartBuilder::on(&root)
        .caption("Raw recording", ("sans-serif", 20).into_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(80)
        .build_cartesian_2d(0f32..duration, -spread..(num_channels as f32 * spread))?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_labels(num_channels.max(1))
        .y_label_formatter(&|y| {
            let i = (*y / spread).round();
            if i >= 0.0 && (i as usize) < num_channels && (*y - i * spread).abs() < spread * 0.25 {
                raw.channels()[num_channels - 1 - i as usize].clone()
            } else {
                String::new()
            }
        })
        .draw()?;

    for (c, row) in data.outer_iter().enumerate() {
        let offset = (num_channels - 1 - c) as f32 * spread;
        let color = PALETTE[c % PALETTE.len()];
        chart.draw_series(LineSeries::new(
            row.iter()
                .take(shown)
                .enumerate()
                .map(|(t, &v)| (t as f32 / raw.sfreq() as f32, v + offset)),
            ShapeStyle::from(&color).stroke_width(1),
        ))?;
    }

    root.present()?;
    Ok(())
}

fn evoked_panel(
    area: &Area,
    title: &str,
    average: &Array2<f32>,
    channels: &[String],
    sfreq: f64,
    t_min: f64,
) -> Result<()> {
    let to_ms = |t: usize| ((t_min + t as f64 / sfreq) * 1000.0) as f32;
    let num_samples = average.ncols();
    let (y_min, y_max) = padded_range(average.iter().copied());

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 18).into_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(to_ms(0)..to_ms(num_samples.saturating_sub(1)).max(to_ms(0) + 1.0), y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Time (ms)")
        .y_desc("Amplitude")
        .draw()?;

    for (c, row) in average.outer_iter().enumerate() {
        let color = PALETTE[c % PALETTE.len()];
        let name = channels.get(c).cloned().unwrap_or_else(|| format!("Ch{}", c));
        chart
            .draw_series(LineSeries::new(
                row.iter().enumerate().map(|(t, &v)| (to_ms(t), v)),
                ShapeStyle::from(&color).stroke_width(1),
            ))?
            .label(name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;
    Ok(())
}

/// One panel per condition with the averaged epoch of every channel.
pub fn evoked<P: AsRef<Path>>(
    path: P,
    averages: &BTreeMap<String, Array2<f32>>,
    channels: &[String],
    sfreq: f64,
    t_min: f64,
) -> Result<()> {
    let root = BitMapBackend::new(path.as_ref(), (1600, 400 * averages.len().max(1) as u32))
        .into_drawing_area();
    root.fill(&WHITE)?;

    let areas = root.split_evenly((averages.len().max(1), 1));
    for (area, (condition, average)) in areas.iter().zip(averages) {
        evoked_panel(
            area,
            &format!("Evoked: {}", condition),
            average,
            channels,
            sfreq,
            t_min,
        )?;
    }

    root.present()?;
    Ok(())
}

fn curve_panel(area: &Area, title: &str, y_desc: &str, train: &[f32], validation: &[f32]) -> Result<()> {
    let epochs = train.len().max(validation.len()).max(1) as f32;
    let (y_min, y_max) = padded_range(train.iter().chain(validation).copied());

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 20).into_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(1f32..epochs.max(2.0), y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Epoch")
        .y_desc(y_desc)
        .draw()?;

    for (name, values, color) in [("train", train, PALETTE[2]), ("validation", validation, PALETTE[3])] {
        if values.is_empty() {
            continue;
        }
        chart
            .draw_series(LineSeries::new(
                finite_points(values),
                ShapeStyle::from(&color).stroke_width(2),
            ))?
            .label(name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;
    Ok(())
}

fn roc_panel(area: &Area, roc: &RocCurve) -> Result<()> {
    let auc = roc.auc();
    let mut chart = ChartBuilder::on(area)
        .caption("ROC", ("sans-serif", 20).into_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..1f64, 0f64..1.05f64)?;

    chart
        .configure_mesh()
        .x_desc("False positive rate")
        .y_desc("True positive rate")
        .draw()?;

    chart.draw_series(LineSeries::new(
        vec![(0.0, 0.0), (1.0, 1.0)],
        ShapeStyle::from(&BLACK.mix(0.5)).stroke_width(1),
    ))?;

    let color = PALETTE[4];
    chart
        .draw_series(LineSeries::new(
            roc.fpr
                .iter()
                .zip(&roc.tpr)
                .filter(|(x, y)| x.is_finite() && y.is_finite())
                .map(|(&x, &y)| (x, y)),
            ShapeStyle::from(&color).stroke_width(2),
        ))?
        .label(format!("AUC = {:.3}", auc))
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::LowerRight)
        .draw()?;
    Ok(())
}

/// 2x2 report: loss top left, ROC top right, accuracy bottom left.
pub fn training_report<P: AsRef<Path>>(path: P, history: &History, roc: &RocCurve) -> Result<()> {
    let root = BitMapBackend::new(path.as_ref(), (1600, 1200)).into_drawing_area();
    root.fill(&WHITE)?;

    let areas = root.split_evenly((2, 2));
    curve_panel(&areas[0], "Loss", "Loss", &history.loss, &history.val_loss)?;
    roc_panel(&areas[1], roc)?;
    curve_panel(&areas[2], "Accuracy", "Accuracy", &history.accuracy, &history.val_accuracy)?;

    root.present()?;
    Ok(())
}
