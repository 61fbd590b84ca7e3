//! Dictionary file helpers shared by the case templates

use std::fmt::Write;

const BANNER: &str = "/*--------------------------------*- C++ -*----------------------------------*\\";
const SEPARATOR: &str =
    "// * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * //";

/// `FoamFile` header for a dictionary or field file
pub fn header(class: &str, location: &str, object: &str) -> String {
    let mut out = String::with_capacity(512);
    let _ = writeln!(out, "{BANNER}");
    let _ = writeln!(out, "FoamFile");
    let _ = writeln!(out, "{{");
    let _ = writeln!(out, "    version     2.0;");
    let _ = writeln!(out, "    format      ascii;");
    let _ = writeln!(out, "    class       {class};");
    let _ = writeln!(out, "    location    \"{location}\";");
    let _ = writeln!(out, "    object      {object};");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out, "{SEPARATOR}");
    out.push('\n');
    out
}

/// Plain dictionary with header
pub fn dictionary(location: &str, object: &str, body: &str) -> String {
    let mut out = header("dictionary", location, object);
    out.push_str(body.trim_start_matches('\n'));
    out
}

/// Formats a float the way the tools accept it: no exponent, no trailing
/// zeros, and at most six decimals
pub fn num(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let rounded = (value * 1e6).round() / 1e6;
    let text = format!("{rounded:.6}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

/// `(x y z)` vector literal
pub fn vector(x: f64, y: f64, z: f64) -> String {
    format!("({} {} {})", num(x), num(y), num(z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_names_object() {
        let text = header("volVectorField", "0", "U");
        assert!(text.contains("class       volVectorField;"));
        assert!(text.contains("location    \"0\";"));
        assert!(text.contains("object      U;"));
    }

    #[test]
    fn test_num_formatting() {
        assert_eq!(num(1.0), "1");
        assert_eq!(num(12.5), "12.5");
        assert_eq!(num(-0.0000001), "0");
        assert_eq!(num(0.1 + 0.2), "0.3");
        assert_eq!(num(-42.25), "-42.25");
    }

    #[test]
    fn test_vector() {
        assert_eq!(vector(10.0, 0.0, -1.5), "(10 0 -1.5)");
    }
}
