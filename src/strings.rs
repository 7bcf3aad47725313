//! Name-case helpers used by the bidi selector's lenient field lookup and
//! by the facade's method title-casing.

/// Convert `snake_case` to `camelCase`: the first `_`-separated segment is
/// kept as-is, each later segment gets its first character upper-cased and
/// the rest preserved.
pub fn to_camel_case(name: &str) -> String {
    let mut segments = name.split('_');
    let mut out = String::with_capacity(name.len());

    if let Some(first) = segments.next() {
        out.push_str(first);
    }
    for segment in segments {
        let mut chars = segment.chars();
        if let Some(head) = chars.next() {
            out.extend(head.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Convert `camelCase` to `snake_case`: an underscore is emitted before
/// every upper-case character that is not at position 0, and every
/// character is lower-cased. Acronyms therefore split per letter
/// (`HTTPRequest` becomes `h_t_t_p_request`); the behaviour is pinned and
/// round-trips with [`to_camel_case`] for ordinary identifiers.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (position, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if position > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Upper-case the first letter of every whitespace-separated word, leaving
/// interior characters untouched.
pub(crate) fn title_case_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            at_word_start = true;
            out.push(ch);
        } else if at_word_start {
            at_word_start = false;
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}
