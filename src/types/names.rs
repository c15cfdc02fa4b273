//! Type name helpers.

/// Removes namespaces from every segment of a (possibly generic) display name.
///
/// Segments are delimited by `<` and `,`; within each segment everything up to and
/// including the last `.` is dropped. Delimiters are kept.
///
/// ```rust
/// use monobridge::types::strip_namespace;
///
/// assert_eq!(
///     strip_namespace("System.Collections.Generic.List<System.Int32>"),
///     "List<Int32>"
/// );
/// ```
#[must_use]
pub fn strip_namespace(full_name: &str) -> String {
    let mut result = String::with_capacity(full_name.len());
    for segment in full_name.split_inclusive(|c| c == '<' || c == ',') {
        let (body, delimiter) = match segment.char_indices().last() {
            Some((at, '<' | ',')) => segment.split_at(at),
            _ => (segment, ""),
        };
        match body.rfind('.') {
            Some(dot) => result.push_str(&body[dot + 1..]),
            None => result.push_str(body),
        }
        result.push_str(delimiter);
    }
    result
}

/// Splits a dotted or `+`-nested name into its tokens.
pub(crate) fn name_tokens(name: &str) -> Vec<&str> {
    name.split(|c| c == '.' || c == '+').collect()
}

/// Splits a closed generic display name into its definition and argument names.
///
/// `System.Collections.Generic.List<System.Int32>` yields the definition
/// `System.Collections.Generic.List` and the single argument `System.Int32`. Arguments
/// may themselves be generic; only top-level commas separate them.
pub(crate) fn split_generic_name(name: &str) -> Option<(&str, Vec<&str>)> {
    let open = name.find('<')?;
    let inner = name.strip_suffix('>')?.get(open + 1..)?;

    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (at, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                args.push(inner[start..at].trim());
                start = at + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    args.push(inner[start..].trim());
    if args.iter().any(|arg| arg.is_empty()) {
        return None;
    }
    Some((&name[..open], args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_generic_name() {
        assert_eq!(
            split_generic_name("System.Collections.Generic.List<System.Int32>"),
            Some(("System.Collections.Generic.List", vec!["System.Int32"]))
        );
        assert_eq!(
            split_generic_name("Game.Pair<Game.Box<System.Int32>, System.String>"),
            Some(("Game.Pair", vec!["Game.Box<System.Int32>", "System.String"]))
        );
        assert_eq!(split_generic_name("System.Int32"), None);
        assert_eq!(split_generic_name("Game.Pair<System.Int32"), None);
        assert_eq!(split_generic_name("Game.Pair<>"), None);
        assert_eq!(split_generic_name("Game.Pair<A>>"), None);
    }

    #[test]
    fn test_strip_plain_names() {
        assert_eq!(strip_namespace("System.Int32"), "Int32");
        assert_eq!(strip_namespace("Player"), "Player");
        assert_eq!(strip_namespace(""), "");
    }

    #[test]
    fn test_strip_generic_names() {
        assert_eq!(
            strip_namespace(
                "System.Collections.Generic.Dictionary<System.String,System.Collections.Generic.List<Game.Item>>"
            ),
            "Dictionary<String,List<Item>>"
        );
    }

    #[test]
    fn test_name_tokens() {
        assert_eq!(name_tokens("Game.World+Zone+Cell"), vec!["Game", "World", "Zone", "Cell"]);
        assert_eq!(name_tokens("Player"), vec!["Player"]);
    }
}
