//! Metadata Extractor - Layout Annotations
//!
//! The vectorizer leaves two comments in its SVG output:
//!
//! ```text
//! <!--start 0 3 -->
//! <!--bbox 0 -2 10 6 -->
//! ```
//!
//! From these we compute width, height and baseline depth in device units.
//! Anything that deviates from the grammar yields no metadata.

use serde::{Deserialize, Serialize};

pub const START_KEYWORD: &str = "start";
pub const BBOX_KEYWORD: &str = "bbox";

const PRECISION: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutMetadata {
    /// Distance from the baseline to the bottom of the box
    pub depth: f64,
    pub width: f64,
    pub height: f64,
}

impl LayoutMetadata {
    /// `depth|width|height|`, the prefix of the frame-sizing message.
    pub fn message_prefix(&self) -> String {
        format!("{}|{}|{}|", self.depth, self.width, self.height)
    }
}

/// Pure: the same input always yields the same result.
pub fn extract(svg: &str, has_baseline: bool, scale: f64) -> Option<LayoutMetadata> {
    let [_, start_y] = annotation::<2>(svg, START_KEYWORD)?;
    let [_, y, width, height] = annotation::<4>(svg, BBOX_KEYWORD)?;

    let depth = if has_baseline {
        (y - start_y).min(0.0) + height
    } else {
        height * 0.5
    };

    Some(LayoutMetadata {
        depth: round(scale * depth),
        width: round(scale * width),
        height: round(scale * height),
    })
}

fn round(value: f64) -> f64 {
    let factor = 10f64.powi(PRECISION);
    // adding zero folds -0.0 into 0.0
    (value * factor).round() / factor + 0.0
}

/// Values of the first `<!--keyword ...-->` comment, if well formed.
fn annotation<const N: usize>(svg: &str, keyword: &str) -> Option<[f64; N]> {
    let body = comments(svg).find_map(|comment| {
        let rest = comment.trim_start().strip_prefix(keyword)?;
        rest.starts_with(char::is_whitespace).then_some(rest)
    })?;

    let mut values = [0.0; N];
    let mut fields = body.split_whitespace();
    for slot in values.iter_mut() {
        *slot = parse_decimal(fields.next()?)?;
    }
    if fields.next().is_some() {
        return None;
    }
    Some(values)
}

fn comments(svg: &str) -> impl Iterator<Item = &str> {
    svg.split("<!--")
        .skip(1)
        .filter_map(|chunk| chunk.split_once("-->").map(|(body, _)| body))
}

/// `-?digits(.digits)?`, nothing else.
fn parse_decimal(field: &str) -> Option<f64> {
    let unsigned = field.strip_prefix('-').unwrap_or(field);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int) || !frac.map_or(true, all_digits) {
        return None;
    }
    field.parse().ok()
}
