//! Drawing surface.
//!
//! A [`Surface`] is the single mutable canvas a chart generator draws on.
//! All drawing goes through a [`SurfaceGuard`], which clears the surface
//! when it is taken and again when it is dropped, on every exit path.
//! Rendering goes through plotters' SVG backend into an in-memory string.

use plotters::prelude::*;
use serde::Deserialize;
use std::ops::{Deref, DerefMut};

use crate::error::QaError;

/// Labels longer than this force rotated tick labels
pub const LONG_LABEL_CHARS: usize = 12;

const FONT: &str = "sans-serif";
const X_LABEL_AREA: u32 = 45;
const X_LABEL_AREA_ROTATED: u32 = 120;
const Y_LABEL_AREA: u32 = 70;
const SERIES_COLOR: RGBColor = RGBColor(0x4c, 0x72, 0xb0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
}

/// One plotted point
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Default)]
pub struct Surface {
    width: u32,
    height: u32,
    kind: Option<ChartKind>,
    points: Vec<Point>,
    title: String,
    x_label: String,
    y_label: String,
    rotate_labels: bool,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    /// Reset everything but the canvas size
    pub fn clear(&mut self) {
        self.kind = None;
        self.points.clear();
        self.title.clear();
        self.x_label.clear();
        self.y_label.clear();
        self.rotate_labels = false;
    }

    pub fn is_blank(&self) -> bool {
        self.kind.is_none() && self.points.is_empty() && self.title.is_empty()
    }

    /// True once at least one point is on an axis
    pub fn has_data(&self) -> bool {
        self.kind.is_some() && !self.points.is_empty()
    }

    /// Cleared surface for one chart; cleared again when the guard drops
    pub fn begin(&mut self) -> SurfaceGuard<'_> {
        self.clear();
        SurfaceGuard { surface: self }
    }

    pub fn plot(&mut self, kind: ChartKind, points: Vec<Point>) {
        self.kind = Some(kind);
        self.points = points;
    }

    pub fn set_labels(&mut self, title: &str, x_label: &str, y_label: &str) {
        self.title = title.to_string();
        self.x_label = x_label.to_string();
        self.y_label = y_label.to_string();
    }

    pub fn rotate_labels(&mut self, rotate: bool) {
        self.rotate_labels = rotate;
    }

    /// Requested explicitly or forced by a long category label
    pub fn labels_rotated(&self) -> bool {
        self.rotate_labels
            || self
                .points
                .iter()
                .any(|p| p.label.chars().count() > LONG_LABEL_CHARS)
    }

    /// Render the current state as a standalone SVG document
    pub fn render_svg(&self) -> Result<String, QaError> {
        let mut svg = String::new();
        self.draw(&mut svg)
            .map_err(|e| QaError::Render(e.to_string()))?;
        Ok(svg)
    }

    fn draw(&self, svg: &mut String) -> Result<(), Box<dyn std::error::Error>> {
        let root = SVGBackend::with_string(svg, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let rotated = self.labels_rotated();
        let (lo, hi) = value_range(&self.points);
        let slots = self.points.len() as i32;

        let mut builder = ChartBuilder::on(&root);
        builder
            .margin(15)
            .x_label_area_size(if rotated { X_LABEL_AREA_ROTATED } else { X_LABEL_AREA })
            .y_label_area_size(Y_LABEL_AREA);
        if !self.title.is_empty() {
            builder.caption(&self.title, (FONT, 22));
        }
        let mut chart = builder.build_cartesian_2d((0..slots).into_segmented(), lo..hi)?;

        let tick_font = if rotated {
            (FONT, 12).into_font().transform(FontTransform::Rotate90)
        } else {
            (FONT, 12).into_font()
        };
        let category = |x: &SegmentValue<i32>| match x {
            SegmentValue::CenterOf(i) => self
                .points
                .get(*i as usize)
                .map(|p| p.label.clone())
                .unwrap_or_default(),
            _ => String::new(),
        };
        let tick = |v: &f64| format_tick(*v);

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(self.points.len() + 1)
            .x_label_formatter(&category)
            .x_label_style(tick_font)
            .y_label_formatter(&tick)
            .x_desc(self.x_label.as_str())
            .y_desc(self.y_label.as_str())
            .draw()?;

        match self.kind {
            Some(ChartKind::Bar) => {
                chart.draw_series(self.points.iter().enumerate().map(|(i, p)| {
                    let i = i as i32;
                    let mut bar = Rectangle::new(
                        [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), p.value)],
                        SERIES_COLOR.filled(),
                    );
                    bar.set_margin(0, 0, 6, 6);
                    bar
                }))?;
            }
            Some(ChartKind::Line) => {
                let coords: Vec<(SegmentValue<i32>, f64)> = self
                    .points
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (SegmentValue::CenterOf(i as i32), p.value))
                    .collect();
                chart.draw_series(LineSeries::new(coords.clone(), SERIES_COLOR.stroke_width(2)))?;
                chart.draw_series(
                    coords
                        .into_iter()
                        .map(|c| Circle::new(c, 3, SERIES_COLOR.filled())),
                )?;
            }
            None => {}
        }

        root.present()?;
        Ok(())
    }
}

/// Exclusive, self-clearing access to a [`Surface`]
pub struct SurfaceGuard<'a> {
    surface: &'a mut Surface,
}

impl Deref for SurfaceGuard<'_> {
    type Target = Surface;

    fn deref(&self) -> &Surface {
        self.surface
    }
}

impl DerefMut for SurfaceGuard<'_> {
    fn deref_mut(&mut self) -> &mut Surface {
        self.surface
    }
}

impl Drop for SurfaceGuard<'_> {
    fn drop(&mut self) {
        self.surface.clear();
    }
}

/// Axis range always containing zero, never degenerate
fn value_range(points: &[Point]) -> (f64, f64) {
    let lo = points.iter().map(|p| p.value).fold(0.0_f64, f64::min);
    let hi = points.iter().map(|p| p.value).fold(0.0_f64, f64::max);
    if (hi - lo).abs() < f64::EPSILON {
        (lo, lo + 1.0)
    } else {
        (lo, hi)
    }
}

fn format_tick(v: f64) -> String {
    if v.fract().abs() < 1e-9 {
        format!("{:.0}", v)
    } else {
        format!("{:.2}", v)
    }
}
