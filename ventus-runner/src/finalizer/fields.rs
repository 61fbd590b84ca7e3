//! Field statistics of the final solution
//!
//! Reads the `internalField` entry of ASCII field files, either
//! `uniform <value>` or `nonuniform List<scalar|vector> N ( ... )`, and
//! summarises the cell values. Binary-format fields are not read.

use std::path::Path;
use tracing::{debug, warn};
use ventus_core::domain::summary::{FieldStatistics, FieldSummary};

/// One cell value: a scalar or a vector
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(f64),
    Vector([f64; 3]),
}

impl FieldValue {
    /// Scalar value, or the vector's magnitude
    pub fn magnitude(&self) -> f64 {
        match self {
            FieldValue::Scalar(v) => v.abs(),
            FieldValue::Vector([x, y, z]) => (x * x + y * y + z * z).sqrt(),
        }
    }
}

/// Statistics of `U` and `p` in `time_dir`
///
/// `None` when neither field could be read.
pub fn field_statistics(time: &str, time_dir: &Path) -> Option<FieldStatistics> {
    let time = time.parse::<f64>().ok()?;

    let velocity_magnitude = read_field(&time_dir.join("U"))
        .and_then(|values| FieldSummary::from_values(values.iter().map(FieldValue::magnitude)));
    let pressure = read_field(&time_dir.join("p")).and_then(|values| {
        FieldSummary::from_values(values.iter().filter_map(|value| match value {
            FieldValue::Scalar(p) => Some(*p),
            FieldValue::Vector(_) => None,
        }))
    });

    if velocity_magnitude.is_none() && pressure.is_none() {
        return None;
    }
    Some(FieldStatistics {
        time,
        velocity_magnitude,
        pressure,
    })
}

fn read_field(path: &Path) -> Option<Vec<FieldValue>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            debug!("Skipping statistics for {}: {}", path.display(), e);
            return None;
        }
    };

    let values = parse_internal_field(&text);
    if values.is_none() {
        warn!("Could not read internalField of {}", path.display());
    }
    values
}

/// Cell values of a field file's `internalField` entry
pub fn parse_internal_field(text: &str) -> Option<Vec<FieldValue>> {
    let start = text.find("internalField")? + "internalField".len();
    let section = &text[start..];
    let section = section
        .find("boundaryField")
        .map_or(section, |end| &section[..end]);

    let spaced = section
        .replace('(', " ( ")
        .replace(')', " ) ")
        .replace(';', " ; ");
    let mut tokens = spaced.split_whitespace();

    match tokens.next()? {
        "uniform" => Some(vec![read_value(&mut tokens)?]),
        "nonuniform" => {
            let mut next = tokens.next()?;
            if next.starts_with("List<") {
                next = tokens.next()?;
            }
            let count: usize = next.parse().ok()?;
            if tokens.next()? != "(" {
                return None;
            }

            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(read_value(&mut tokens)?);
            }
            (tokens.next()? == ")").then_some(values)
        }
        _ => None,
    }
}

fn read_value<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Option<FieldValue> {
    let number =
        |token: Option<&str>| -> Option<f64> { token?.parse::<f64>().ok().filter(|v| v.is_finite()) };

    match tokens.next()? {
        "(" => {
            let vector = [
                number(tokens.next())?,
                number(tokens.next())?,
                number(tokens.next())?,
            ];
            (tokens.next()? == ")").then_some(FieldValue::Vector(vector))
        }
        token => number(Some(token)).map(FieldValue::Scalar),
    }
}
