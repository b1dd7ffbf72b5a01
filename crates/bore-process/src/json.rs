//! Extraction of the last balanced JSON block from free-form agent output.

/// Scans `text` backward for the last complete JSON object (`{...}`) or
/// array (`[...]`), handling nested delimiters and string escaping.
///
/// Each balanced candidate is validated by parsing; an invalid candidate is
/// abandoned and the scan continues with the next closing delimiter further
/// left. Agent replies are free-form markdown that may embed a structured
/// payload; the last valid one is the intended reply.
pub fn extract_last_json(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();

    for end in (0..bytes.len()).rev() {
        let close = bytes[end];
        if close != b'}' && close != b']' {
            continue;
        }
        let open = if close == b'}' { b'{' } else { b'[' };

        // Walk backwards from the closer, tracking depth and string context.
        let mut depth: usize = 0;
        let mut in_string = false;
        let mut i = end;
        loop {
            let ch = bytes[i];

            if in_string {
                if ch == b'"' && !is_escaped(bytes, i) {
                    in_string = false;
                }
            } else if ch == b'"' && !is_escaped(bytes, i) {
                in_string = true;
            } else {
                if ch == close {
                    depth += 1;
                } else if ch == open {
                    depth -= 1;
                }

                if depth == 0 {
                    let candidate = &text[i..=end];
                    if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                        return Some(candidate);
                    }
                    // Invalid: abandon this closer and resume the outer scan.
                    break;
                }
            }

            if i == 0 {
                break;
            }
            i -= 1;
        }
    }

    None
}

/// Whether the byte at `pos` is preceded by an odd number of backslashes and
/// is therefore escaped within a JSON string.
fn is_escaped(bytes: &[u8], pos: usize) -> bool {
    let mut count = 0;
    let mut i = pos;
    while i > 0 && bytes[i - 1] == b'\\' {
        count += 1;
        i -= 1;
    }
    count % 2 != 0
}

#[cfg(test)]
mod tests {
    use super::extract_last_json;

    #[test]
    fn empty_and_braceless_inputs_yield_none() {
        assert_eq!(extract_last_json(""), None);
        assert_eq!(extract_last_json("no braces here"), None);
    }

    #[test]
    fn extracts_object_embedded_in_prose() {
        let text = "Here is my plan:\n\n{\"type\":\"boss_plan\",\"steps\":[]}\n\nDone.";
        assert_eq!(
            extract_last_json(text),
            Some("{\"type\":\"boss_plan\",\"steps\":[]}")
        );
    }

    #[test]
    fn extracts_last_of_multiple_blocks() {
        let text = "{\"first\":1} some text {\"second\":2}";
        assert_eq!(extract_last_json(text), Some("{\"second\":2}"));
    }

    #[test]
    fn extracts_array_payload() {
        let text = "result: [1, 2, [3, 4]] end";
        assert_eq!(extract_last_json(text), Some("[1, 2, [3, 4]]"));
    }

    #[test]
    fn handles_nested_objects() {
        let json = "{\"a\":{\"b\":{\"c\":[1,2]}}}";
        let text = format!("prefix {json}");
        assert_eq!(extract_last_json(&text), Some(json));
    }

    #[test]
    fn closer_inside_string_is_not_a_delimiter() {
        // The `}` inside the string value must not terminate the block.
        let text = "{\"k\":\"}\"}";
        assert_eq!(extract_last_json(text), Some(text));
    }

    #[test]
    fn escape_parity_is_respected() {
        // `\\"` ends the string; `\"` does not.
        let text = r#"{"k":"a\\"}"#;
        assert_eq!(extract_last_json(text), Some(text));

        let unterminated = r#"{"k":"a\"}"#;
        assert_eq!(extract_last_json(unterminated), None);
    }

    #[test]
    fn invalid_candidate_is_abandoned_for_earlier_block() {
        let text = "{\"valid\":true} trailing {not json}";
        assert_eq!(extract_last_json(text), Some("{\"valid\":true}"));
    }

    #[test]
    fn unbalanced_closers_do_not_panic() {
        assert_eq!(extract_last_json("}}}"), None);
        assert_eq!(extract_last_json("]]]"), None);
    }
}
