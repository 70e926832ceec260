// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Placement — compute the transform that draws a loaded image at a
// reference point, optionally fitted into a box, rotated, and oriented.
//
// The result is a pure function of the image geometry and the options. It
// carries the combined matrix plus the content operations (`q`, `cm`,
// `re W n`, `Do`, `Q`) a caller writes into a page's content stream.

use bildwerk_core::config::{DpiPolicy, PlaceOptions};
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::FitMethod;
use lopdf::Object;
use lopdf::content::Operation;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::slot::ImageSlot;

const RATIO_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Affine transform `[a b c d e f]` in PDF's row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn translate(x: f64, y: f64) -> Self {
        Self {
            e: x,
            f: y,
            ..Self::IDENTITY
        }
    }

    pub fn scale(x: f64, y: f64) -> Self {
        Self {
            a: x,
            d: y,
            ..Self::IDENTITY
        }
    }

    /// Counter-clockwise rotation by `degrees`.
    pub fn rotate(degrees: f64) -> Self {
        // Exact values for quarter turns keep matrices free of 1e-17 noise.
        let turn = degrees.rem_euclid(360.0);
        let (sin, cos) = if turn == 0.0 {
            (0.0, 1.0)
        } else if turn == 90.0 {
            (1.0, 0.0)
        } else if turn == 180.0 {
            (0.0, -1.0)
        } else if turn == 270.0 {
            (-1.0, 0.0)
        } else {
            turn.to_radians().sin_cos()
        };
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    /// `self × other`: apply `self` first, then `other`.
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.a + y * self.c + self.e,
            x * self.b + y * self.d + self.f,
        )
    }

    pub fn to_array(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ---------------------------------------------------------------------------
// Placement result
// ---------------------------------------------------------------------------

/// One content-stream step of a placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum PlaceOp {
    Save,
    Concat(Matrix),
    /// Clip to the rectangle `(0, 0, width, height)`.
    ClipRect { width: f64, height: f64 },
    /// Paint strip `n` of the image.
    Draw(u32),
    Restore,
}

/// Outcome of placing an image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    /// Maps the unit square onto the whole image.
    pub matrix: Matrix,
    /// `[llx, lly, urx, ury]` of the fitted element, relative to the
    /// reference point.
    pub element_box: [f64; 4],
    /// Element size after orientation, before fitting.
    pub element_size: (f64, f64),
    /// Scale applied by the fit method.
    pub element_scale: (f64, f64),
    /// Natural image size in user units.
    pub image_scale: (f64, f64),
    pub clip: Option<(f64, f64)>,
    /// Empty in blind mode.
    pub ops: Vec<PlaceOp>,
    /// Page size that encloses the element, when requested.
    pub page_size: Option<(f64, f64)>,
}

impl Placement {
    /// Render the operations, naming strip `n` with `names[n]`.
    pub fn to_operations<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Operation>> {
        let mut out = Vec::with_capacity(self.ops.len() + 2);
        for op in &self.ops {
            match *op {
                PlaceOp::Save => out.push(Operation::new("q", vec![])),
                PlaceOp::Restore => out.push(Operation::new("Q", vec![])),
                PlaceOp::Concat(m) => out.push(Operation::new("cm", m.to_array().map(real).to_vec())),
                PlaceOp::ClipRect { width, height } => {
                    out.push(Operation::new(
                        "re",
                        vec![real(0.0), real(0.0), real(width), real(height)],
                    ));
                    out.push(Operation::new("W", vec![]));
                    out.push(Operation::new("n", vec![]));
                }
                PlaceOp::Draw(strip) => {
                    let name = names.get(strip as usize).ok_or_else(|| {
                        BildwerkError::PdfError(format!("no resource name for strip {strip}"))
                    })?;
                    out.push(Operation::new(
                        "Do",
                        vec![Object::Name(name.as_ref().as_bytes().to_vec())],
                    ));
                }
            }
        }
        Ok(out)
    }
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

/// Image attributes placement depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaceGeometry {
    pub width: u32,
    /// Negative for bottom-up images, which are drawn flipped.
    pub height: i32,
    pub dpi: (f64, f64),
    pub strips: u32,
    pub rows_per_strip: u32,
}

impl PlaceGeometry {
    pub fn of(slot: &ImageSlot) -> Self {
        Self {
            width: slot.width(),
            height: slot.height(),
            dpi: slot.dpi(),
            strips: slot.strips().max(1),
            rows_per_strip: slot.rows_per_strip(),
        }
    }
}

/// Unit size of one pixel under `policy`.
fn pixel_size(policy: DpiPolicy, dpi: (f64, f64)) -> (f64, f64) {
    match policy {
        DpiPolicy::None => (1.0, 1.0),
        DpiPolicy::Explicit(pair) => {
            let (x, y) = pair.axes();
            if x > 0.0 && y > 0.0 {
                (72.0 / x, 72.0 / y)
            } else {
                (1.0, 1.0)
            }
        }
        DpiPolicy::Internal => {
            let (x, y) = dpi;
            if x > 0.0 && y > 0.0 {
                (72.0 / x, 72.0 / y)
            } else if x < 0.0 && y < 0.0 {
                (1.0, y / x)
            } else {
                (1.0, 1.0)
            }
        }
    }
}

/// Place an image of `geometry` at `origin`.
///
/// `y_direction` is +1 for bottom-up user space and -1 for top-down.
#[instrument(skip_all, fields(width = geometry.width, height = geometry.height, fit = ?options.fit_method))]
pub fn place(
    geometry: &PlaceGeometry,
    origin: (f64, f64),
    options: &PlaceOptions,
    y_direction: f64,
) -> Placement {
    let (scale_x, scale_y) = options.scale.axes();
    let (unit_x, unit_y) = pixel_size(options.dpi, geometry.dpi);
    let (unit_x, unit_y) = (unit_x * scale_x, unit_y * scale_y);

    let strips = geometry.strips.max(1);
    let rows_per_strip = if strips > 1 {
        geometry.rows_per_strip.max(1)
    } else {
        geometry.height.unsigned_abs()
    };
    let band = unit_y * rows_per_strip as f64;
    let image_scale = (unit_x * geometry.width as f64, unit_y * geometry.height as f64);
    let last_ratio = if strips > 1 && band > 0.0 {
        image_scale.1.abs() / band - (strips - 1) as f64
    } else {
        1.0
    };
    let flipped = geometry.height < 0;

    let turns = options.orientate.quarter_turns();
    let mut element_size = (image_scale.0, image_scale.1.abs());
    if turns % 2 == 1 {
        element_size = (element_size.1, element_size.0);
    }

    let (element_box, mut element_scale) = fit_element(
        options.fit_method,
        options.distortion_limit / 100.0,
        options.box_size,
        options.position.axes(),
        element_size,
    );

    let (x, y) = origin;
    let mut chain = vec![Matrix::translate(x, y)];
    let clip = match options.fit_method {
        FitMethod::Clip | FitMethod::Slice if has_box(options.box_size) => Some(options.box_size),
        _ => None,
    };
    let rotation = (options.rotate.abs() > RATIO_EPSILON).then(|| Matrix::rotate(y_direction * options.rotate));
    chain.extend(rotation);

    let [llx, lly, urx, ury] = element_box;
    let (lly, ury) = (lly * y_direction, ury * y_direction);
    let corners = [(llx, lly), (urx, lly), (urx, ury), (llx, ury)];
    let corner = if flipped { (turns + 3) % 4 } else { turns };
    chain.push(Matrix::translate(corners[corner].0, corners[corner].1));

    if turns != 0 {
        chain.push(Matrix::rotate(y_direction * options.orientate.degrees()));
        if turns % 2 == 1 {
            element_scale = (element_scale.1, element_scale.0);
        }
    }

    let draw_x = image_scale.0 * element_scale.0;
    let strip_height = if strips == 1 {
        image_scale.1
    } else {
        band.copysign(image_scale.1)
    };
    let strip_scale = Matrix::scale(draw_x, y_direction * strip_height * element_scale.1);
    let full_scale = Matrix::scale(draw_x, y_direction * image_scale.1 * element_scale.1);

    let prefix = chain.iter().fold(Matrix::IDENTITY, |ctm, m| m.multiply(&ctm));
    let matrix = full_scale.multiply(&prefix);

    let ops = if options.blind {
        Vec::new()
    } else {
        let mut ops = vec![PlaceOp::Save, PlaceOp::Concat(chain[0])];
        if let Some((width, height)) = clip {
            ops.push(PlaceOp::ClipRect { width, height });
        }
        ops.extend(chain[1..].iter().copied().map(PlaceOp::Concat));
        ops.push(PlaceOp::Concat(strip_scale));
        strip_ops(&mut ops, strips, last_ratio);
        ops.push(PlaceOp::Restore);
        ops
    };

    let page_size = options
        .adjust_page
        .then(|| (2.0 * x + element_box[2], 2.0 * y + element_box[3]));

    debug!(
        matrix = ?matrix.to_array(),
        ?element_scale,
        strips,
        last_ratio,
        "Placed image"
    );
    Placement {
        matrix,
        element_box,
        element_size,
        element_scale,
        image_scale,
        clip,
        ops,
        page_size,
    }
}

/// Strips are drawn last first, each band one unit above the previous; the
/// short final strip is squeezed by `last_ratio` and the scale undone after.
fn strip_ops(ops: &mut Vec<PlaceOp>, strips: u32, last_ratio: f64) {
    let uneven = strips > 1 && (last_ratio - 1.0).abs() > RATIO_EPSILON;
    if uneven {
        ops.push(PlaceOp::Concat(Matrix::scale(1.0, last_ratio)));
    }
    let last = strips - 1;
    for strip in (0..strips).rev() {
        ops.push(PlaceOp::Draw(strip));
        if strip > 0 {
            ops.push(PlaceOp::Concat(Matrix::translate(0.0, 1.0)));
            if strip == last && uneven {
                ops.push(PlaceOp::Concat(Matrix::scale(1.0, 1.0 / last_ratio)));
            }
        }
    }
}

fn has_box(size: (f64, f64)) -> bool {
    size.0 > 0.0 && size.1 > 0.0
}

/// Fit an element of `size` into `box_size`, returning its box and scale.
fn fit_element(
    method: FitMethod,
    min_scale: f64,
    box_size: (f64, f64),
    position: (f64, f64),
    size: (f64, f64),
) -> ([f64; 4], (f64, f64)) {
    let (bw, bh) = box_size;
    let (ew, eh) = size;
    let meet = || {
        let s = (bw / ew).min(bh / eh);
        (s, s)
    };

    let scale = if !has_box(box_size) || ew <= 0.0 || eh <= 0.0 {
        (1.0, 1.0)
    } else {
        match method {
            FitMethod::Nofit | FitMethod::Clip => (1.0, 1.0),
            FitMethod::Meet => meet(),
            FitMethod::Slice => {
                let s = (bw / ew).max(bh / eh);
                (s, s)
            }
            FitMethod::Entire => (bw / ew, bh / eh),
            FitMethod::Auto => {
                if ew <= bw && eh <= bh {
                    (1.0, 1.0)
                } else if eh <= bh && bw / ew >= min_scale {
                    (bw / ew, 1.0)
                } else {
                    meet()
                }
            }
        }
    };

    let (w, h) = (ew * scale.0, eh * scale.1);
    let llx = position.0 / 100.0 * (bw - w);
    let lly = position.1 / 100.0 * (bh - h);
    ([llx, lly, llx + w, lly + h], scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bildwerk_core::config::AxisPair;
    use bildwerk_core::types::Orientation;

    fn geometry(width: u32, height: i32) -> PlaceGeometry {
        PlaceGeometry {
            width,
            height,
            dpi: (0.0, 0.0),
            strips: 1,
            rows_per_strip: height.unsigned_abs(),
        }
    }

    fn boxed(method: FitMethod, width: f64, height: f64) -> PlaceOptions {
        PlaceOptions {
            fit_method: method,
            box_size: (width, height),
            ..PlaceOptions::default()
        }
    }

    fn close(a: [f64; 6], b: [f64; 6]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    /// Unscaled, unrotated placement draws the image one unit per pixel.
    #[test]
    fn nofit_is_identity_sized() {
        let p = place(&geometry(100, 50), (0.0, 0.0), &PlaceOptions::default(), 1.0);
        assert_eq!(p.matrix.to_array(), [100.0, 0.0, 0.0, 50.0, 0.0, 0.0]);
        assert_eq!(p.element_box, [0.0, 0.0, 100.0, 50.0]);
        assert_eq!(
            p.ops,
            vec![
                PlaceOp::Save,
                PlaceOp::Concat(Matrix::translate(0.0, 0.0)),
                PlaceOp::Concat(Matrix::translate(0.0, 0.0)),
                PlaceOp::Concat(Matrix::scale(100.0, 50.0)),
                PlaceOp::Draw(0),
                PlaceOp::Restore,
            ]
        );
    }

    /// The reference point becomes the translation.
    #[test]
    fn origin_translates() {
        let p = place(&geometry(100, 50), (10.0, 20.0), &PlaceOptions::default(), 1.0);
        assert_eq!(p.matrix.to_array(), [100.0, 0.0, 0.0, 50.0, 10.0, 20.0]);
    }

    /// A quarter turn swaps the element's axes and keeps it in the positive
    /// quadrant.
    #[test]
    fn west_orientation_swaps_axes() {
        let options = PlaceOptions {
            orientate: Orientation::West,
            ..PlaceOptions::default()
        };
        let p = place(&geometry(100, 50), (0.0, 0.0), &options, 1.0);
        assert_eq!(p.element_size, (50.0, 100.0));
        assert!(close(p.matrix.to_array(), [0.0, 100.0, -50.0, 0.0, 50.0, 0.0]));
        assert_eq!(p.matrix.transform_point(0.0, 0.0), (50.0, 0.0));
        assert_eq!(p.matrix.transform_point(1.0, 1.0), (0.0, 100.0));
    }

    /// Absolute resolution converts pixels to points.
    #[test]
    fn absolute_dpi() {
        let mut g = geometry(300, 150);
        g.dpi = (144.0, 144.0);
        let p = place(&g, (0.0, 0.0), &PlaceOptions::default(), 1.0);
        assert_eq!(p.image_scale, (150.0, 75.0));
        let none = PlaceOptions {
            dpi: DpiPolicy::None,
            ..PlaceOptions::default()
        };
        assert_eq!(place(&g, (0.0, 0.0), &none, 1.0).image_scale, (300.0, 150.0));
    }

    /// Aspect-only resolution stretches the y axis alone.
    #[test]
    fn aspect_only_dpi() {
        let mut g = geometry(100, 50);
        g.dpi = (-1.0, -2.0);
        let p = place(&g, (0.0, 0.0), &PlaceOptions::default(), 1.0);
        assert_eq!(p.image_scale, (100.0, 100.0));
    }

    /// Meet scales uniformly to the tighter axis and honours the position.
    #[test]
    fn meet_centres_in_box() {
        let options = PlaceOptions {
            position: AxisPair::Uniform(50.0),
            ..boxed(FitMethod::Meet, 200.0, 200.0)
        };
        let p = place(&geometry(100, 50), (0.0, 0.0), &options, 1.0);
        assert_eq!(p.element_scale, (2.0, 2.0));
        assert_eq!(p.element_box, [0.0, 50.0, 200.0, 150.0]);
    }

    /// Entire fills the box on both axes.
    #[test]
    fn entire_distorts() {
        let p = place(&geometry(100, 50), (0.0, 0.0), &boxed(FitMethod::Entire, 50.0, 100.0), 1.0);
        assert_eq!(p.element_scale, (0.5, 2.0));
        assert_eq!(p.matrix.to_array(), [50.0, 0.0, 0.0, 100.0, 0.0, 0.0]);
    }

    /// Slice overfills and clips to the box.
    #[test]
    fn slice_clips() {
        let p = place(&geometry(100, 50), (0.0, 0.0), &boxed(FitMethod::Slice, 50.0, 50.0), 1.0);
        assert_eq!(p.element_scale, (1.0, 1.0));
        assert_eq!(p.clip, Some((50.0, 50.0)));
        assert!(p.ops.contains(&PlaceOp::ClipRect { width: 50.0, height: 50.0 }));
    }

    /// Auto narrows x within the distortion limit and never enlarges.
    #[test]
    fn auto_fit_policy() {
        let g = geometry(200, 100);
        let narrow = place(&g, (0.0, 0.0), &boxed(FitMethod::Auto, 180.0, 200.0), 1.0);
        assert_eq!(narrow.element_scale, (0.9, 1.0));

        let too_narrow = place(&g, (0.0, 0.0), &boxed(FitMethod::Auto, 100.0, 200.0), 1.0);
        assert_eq!(too_narrow.element_scale, (0.5, 0.5));

        let roomy = place(&g, (0.0, 0.0), &boxed(FitMethod::Auto, 400.0, 400.0), 1.0);
        assert_eq!(roomy.element_scale, (1.0, 1.0));
    }

    /// Bottom-up images start at the top corner and draw downwards.
    #[test]
    fn negative_height_flips() {
        let p = place(&geometry(100, -50), (0.0, 0.0), &PlaceOptions::default(), 1.0);
        assert_eq!(p.matrix.to_array(), [100.0, 0.0, 0.0, -50.0, 0.0, 50.0]);
    }

    /// Strips are stacked last first with the short strip squeezed.
    #[test]
    fn multi_strip_bands() {
        let g = PlaceGeometry {
            width: 8,
            height: 10,
            dpi: (0.0, 0.0),
            strips: 3,
            rows_per_strip: 4,
        };
        let p = place(&g, (0.0, 0.0), &PlaceOptions::default(), 1.0);
        assert_eq!(p.matrix.to_array(), [8.0, 0.0, 0.0, 10.0, 0.0, 0.0]);
        let tail: Vec<_> = p.ops[3..].to_vec();
        assert_eq!(
            tail,
            vec![
                PlaceOp::Concat(Matrix::scale(8.0, 4.0)),
                PlaceOp::Concat(Matrix::scale(1.0, 0.5)),
                PlaceOp::Draw(2),
                PlaceOp::Concat(Matrix::translate(0.0, 1.0)),
                PlaceOp::Concat(Matrix::scale(1.0, 2.0)),
                PlaceOp::Draw(1),
                PlaceOp::Concat(Matrix::translate(0.0, 1.0)),
                PlaceOp::Draw(0),
                PlaceOp::Restore,
            ]
        );
    }

    /// Blind placement computes geometry without drawing.
    #[test]
    fn blind_has_no_ops() {
        let options = PlaceOptions {
            blind: true,
            adjust_page: true,
            ..PlaceOptions::default()
        };
        let p = place(&geometry(100, 50), (10.0, 10.0), &options, 1.0);
        assert!(p.ops.is_empty());
        assert_eq!(p.page_size, Some((120.0, 70.0)));
    }

    /// Top-down user space mirrors the y axis.
    #[test]
    fn top_down_y_direction() {
        let p = place(&geometry(100, 50), (0.0, 0.0), &PlaceOptions::default(), -1.0);
        assert_eq!(p.matrix.to_array(), [100.0, 0.0, 0.0, -50.0, 0.0, 0.0]);
    }

    /// Operations render to content-stream operators.
    #[test]
    fn renders_operations() {
        let p = place(&geometry(4, 4), (0.0, 0.0), &boxed(FitMethod::Clip, 2.0, 2.0), 1.0);
        let ops = p.to_operations(&["Im1"]).unwrap();
        let operators: Vec<&str> = ops.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(operators, vec!["q", "cm", "re", "W", "n", "cm", "cm", "Do", "Q"]);
        assert_eq!(ops[7].operands, vec![Object::Name(b"Im1".to_vec())]);
        assert!(p.to_operations::<&str>(&[]).is_err());
    }

    /// Quarter-turn rotations are exact.
    #[test]
    fn exact_quarter_turns() {
        assert_eq!(Matrix::rotate(90.0).to_array(), [0.0, 1.0, -1.0, 0.0, 0.0, 0.0]);
        assert_eq!(Matrix::rotate(-90.0), Matrix::rotate(270.0));
    }
}
