//! Pattern compilation and template expansion

use crate::Result;
use regex::{Captures, Regex};

/// Compile a glob pattern into an anchored regex.
///
/// Each `*` becomes one capture group matching `[^.]*`; every other character
/// is matched literally.
pub fn compile_glob(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');
    for (i, literal) in pattern.split('*').enumerate() {
        if i > 0 {
            expr.push_str("([^.]*)");
        }
        expr.push_str(&regex::escape(literal));
    }
    expr.push('$');
    Ok(Regex::new(&expr)?)
}

/// Regex rules match anywhere in the name.
pub fn compile_regex(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(pattern)?)
}

/// Expand `$1`, `${1}` and `${name}` references against the captures.
///
/// Unknown groups expand to the empty string.
pub fn expand(template: &str, captures: &Captures<'_>) -> String {
    if !template.contains('$') {
        return template.to_string();
    }
    let mut out = String::with_capacity(template.len());
    captures.expand(template, &mut out);
    out
}
