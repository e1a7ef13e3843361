//! Scanning utilities shared by the two text parsers: source positions
//! and string-literal escaping.

use core::fmt;

/// A fatal lexical or syntactic error.
///
/// Rendered as `file:line:col: error: message`, which is the one
/// diagnostic line the drivers print before exiting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: error: {}",
            self.file, self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// The 1-based line and column of a byte offset in `source`.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let mut line = 1;
    let mut column = 1;
    for c in source[..offset].chars() {
        if c == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Render string contents with `\\`, `\"`, and `\n` escaped, ready to
/// be wrapped in double quotes.
pub fn escape(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => output.push_str("\\\\"),
            '"' => output.push_str("\\\""),
            '\n' => output.push_str("\\n"),
            c => output.push(c),
        }
    }
    output
}

/// Decode the escapes in the body of a quoted literal (the text
/// between the quotes). On failure, returns the byte offset of the
/// offending backslash within `body` and a message.
pub fn unescape(body: &str) -> Result<String, (usize, String)> {
    let mut output = String::with_capacity(body.len());
    let mut chars = body.char_indices();
    while let Some((at, c)) = chars.next() {
        if c != '\\' {
            output.push(c);
            continue;
        }
        match chars.next() {
            Some((_, '\\')) => output.push('\\'),
            Some((_, '"')) => output.push('"'),
            Some((_, 'n')) => output.push('\n'),
            _ => return Err((at, "Invalid escape sequence.".to_string())),
        }
    }
    Ok(output)
}
