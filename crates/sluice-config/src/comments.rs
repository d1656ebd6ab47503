/// Remove `//` line comments and `/* */` block comments from a JSON document.
///
/// Comment characters are replaced with spaces (newlines inside block comments
/// are kept) so that line and column numbers reported by the JSON parser still
/// point at the original text. Comment markers inside string literals are left
/// alone. An unterminated block comment swallows the rest of the document.
pub fn strip_comments(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut chars = text.chars().peekable();
  let mut in_string = false;
  let mut escaped = false;

  while let Some(c) = chars.next() {
    if in_string {
      out.push(c);
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == '"' {
        in_string = false;
      }
      continue;
    }

    match (c, chars.peek()) {
      ('"', _) => {
        in_string = true;
        out.push(c);
      }
      ('/', Some('/')) => {
        chars.next();
        out.push_str("  ");
        while let Some(&next) = chars.peek() {
          if next == '\n' {
            break;
          }
          chars.next();
          out.push(' ');
        }
      }
      ('/', Some('*')) => {
        chars.next();
        out.push_str("  ");
        let mut previous = '\0';
        for next in chars.by_ref() {
          out.push(if next == '\n' { '\n' } else { ' ' });
          if previous == '*' && next == '/' {
            break;
          }
          previous = next;
        }
      }
      _ => out.push(c),
    }
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_strips_line_comments() {
    let text = "{\n  // a note\n  \"a\": 1 // trailing\n}";
    let stripped = strip_comments(text);
    let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
    assert_eq!(value["a"], 1);
    assert_eq!(stripped.lines().count(), text.lines().count());
  }

  #[test]
  fn test_strips_block_comments_preserving_lines() {
    let text = "{ /* first\nsecond */ \"a\": true }";
    let stripped = strip_comments(text);
    assert_eq!(stripped.lines().count(), 2);
    let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
    assert_eq!(value["a"], true);
  }

  #[test]
  fn test_leaves_markers_inside_strings() {
    let text = r#"{"url": "http://example.com/*x*/", "q": "a \" // b"}"#;
    assert_eq!(strip_comments(text), text);
  }

  #[test]
  fn test_same_length_output() {
    let text = "{\"a\": 1} // done";
    assert_eq!(strip_comments(text).len(), text.len());
  }
}
