//! Helpers shared by the GLSL and Metal text emitters.

/// Renders a float literal, always with a decimal point.
///
/// The value is formatted both fixed (`{:.1}`) and shortest-round-trip,
/// and the longer string wins. Shortest formatting alone would print
/// `2.0` as `2`, which a downstream shader compiler parses as an integer
/// and then applies integer division semantics to.
pub fn format_float(v: f64) -> String {
    let fixed = format!("{:.1}", v);
    let shortest = format!("{}", v);
    if shortest.len() > fixed.len() {
        shortest
    } else {
        fixed
    }
}

/// Math builtins spelled identically in GLSL and Metal; calls to these
/// pass through with their arguments unchanged.
const PASSTHROUGH_FNS: &[&str] = &[
    "abs", "clamp", "cos", "cross", "distance", "dot", "floor", "fract", "length", "max", "min",
    "mix", "normalize", "pow", "reflect", "sin", "smoothstep", "sqrt", "tan",
];

pub(crate) fn is_passthrough_fn(name: &str) -> bool {
    PASSTHROUGH_FNS.contains(&name)
}
