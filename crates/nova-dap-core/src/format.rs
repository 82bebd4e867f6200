//! Pure rendering helpers for client-facing frame names and lines.

use nova_jdwp::LINE_UNAVAILABLE;
use serde::{Deserialize, Serialize};

/// Extension of synthesized source file names.
pub const SOURCE_EXTENSION: &str = ".java";

/// Appended to the display name of native frames.
pub const NATIVE_METHOD_MARKER: &str = "[native method]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackFrameFormat {
    #[serde(alias = "showContextClass")]
    pub show_context_class: bool,
    #[serde(alias = "showParameters", alias = "showParameter")]
    pub show_parameters: bool,
    #[serde(alias = "showQualifiedNames")]
    pub show_qualified_names: bool,
}

impl Default for StackFrameFormat {
    fn default() -> Self {
        Self {
            show_context_class: true,
            show_parameters: true,
            show_qualified_names: false,
        }
    }
}

/// Render a JVM field descriptor (`Ljava/lang/String;`, `[I`) as a Java type name.
pub fn signature_to_type_name(signature: &str) -> String {
    let mut sig = signature;
    let mut dims = 0usize;
    while let Some(rest) = sig.strip_prefix('[') {
        dims += 1;
        sig = rest;
    }

    let mut out = if let Some(class) = sig.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        class.replace('/', ".")
    } else {
        primitive_name(sig.as_bytes().first().copied())
            .unwrap_or("<unknown>")
            .to_string()
    };
    for _ in 0..dims {
        out.push_str("[]");
    }
    out
}

fn primitive_name(tag: Option<u8>) -> Option<&'static str> {
    Some(match tag? {
        b'B' => "byte",
        b'C' => "char",
        b'D' => "double",
        b'F' => "float",
        b'I' => "int",
        b'J' => "long",
        b'S' => "short",
        b'Z' => "boolean",
        b'V' => "void",
        _ => return None,
    })
}

/// Argument type names of a method descriptor such as `(I[Ljava/lang/String;)V`.
///
/// Malformed descriptors yield the arguments parsed so far.
pub fn method_argument_type_names(descriptor: &str) -> Vec<String> {
    let Some(params) = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .map(|(params, _)| params)
    else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let bytes = params.as_bytes();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let start = pos;
        while pos < bytes.len() && bytes[pos] == b'[' {
            pos += 1;
        }
        match bytes.get(pos) {
            Some(b'L') => match params[pos..].find(';') {
                Some(end) => pos += end + 1,
                None => break,
            },
            Some(_) => pos += 1,
            None => break,
        }
        out.push(signature_to_type_name(&params[start..pos]));
    }
    out
}

/// Drop the package prefix unless qualified names were requested.
///
/// Nested type separators (`Outer$Inner`) are kept.
pub fn trim_type_name(type_name: &str, format: &StackFrameFormat) -> String {
    if format.show_qualified_names {
        return type_name.to_string();
    }
    type_name
        .rsplit('.')
        .next()
        .unwrap_or(type_name)
        .to_string()
}

/// The top-level type enclosing a binary type name (`a.B$C$1` -> `a.B`).
pub fn parse_enclosing_type(fully_qualified_name: &str) -> &str {
    fully_qualified_name
        .split('$')
        .next()
        .unwrap_or(fully_qualified_name)
}

/// `[Context.]method(Arg1,Arg2)`.
pub fn format_method_name(
    type_name: &str,
    method_name: &str,
    argument_types: &[String],
    format: &StackFrameFormat,
) -> String {
    let mut out = String::new();
    if format.show_context_class {
        out.push_str(&trim_type_name(type_name, format));
        out.push('.');
    }
    out.push_str(method_name);
    if format.show_parameters {
        out.push('(');
        for (idx, arg) in argument_types.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&trim_type_name(arg, format));
        }
        out.push(')');
    }
    out
}

/// Convert a line between 0- and 1-based conventions.
///
/// [`LINE_UNAVAILABLE`] passes through untouched.
pub fn convert_line_number(line: i32, from_start_at1: bool, to_start_at1: bool) -> i32 {
    if line == LINE_UNAVAILABLE || from_start_at1 == to_start_at1 {
        return line;
    }
    if from_start_at1 {
        line - 1
    } else {
        line + 1
    }
}
