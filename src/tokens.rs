//! Token-count estimation
//!
//! Providers meter their own usage; this estimate is only used for prompt
//! budgeting (retrieval context assembly and page splitting), where an
//! approximation is acceptable.

/// Estimate the token count of a text
///
/// ASCII runs average ~4 characters per token; CJK characters tokenize
/// close to one token each, so they are counted individually.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let mut cjk = 0usize;
    let mut other_bytes = 0usize;

    for ch in text.chars() {
        if is_cjk(ch) {
            cjk += 1;
        } else {
            other_bytes += ch.len_utf8();
        }
    }

    (cjk + other_bytes.div_ceil(4)) as u32
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{4E00}'..='\u{9FFF}'   // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}' // Extension A
        | '\u{3000}'..='\u{303F}' // CJK punctuation
        | '\u{FF00}'..='\u{FFEF}' // fullwidth forms
    )
}
