#![no_main]

use libfuzzer_sys::fuzz_target;

/// Keep the harness itself bounded.
const MAX_QUERY_CHARS: usize = 16_384;
const MAX_INPUT_BYTES: usize = MAX_QUERY_CHARS * 4;

fn truncate_to_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_BYTES)];
    let input = String::from_utf8_lossy(data);
    let query = truncate_to_chars(&input, MAX_QUERY_CHARS);

    // Statements must render to text that parses again to the same rendering.
    if let Ok(stmt) = olap_mdx::parse(query) {
        let rendered = stmt.to_string();
        let reparsed = olap_mdx::parse(&rendered)
            .unwrap_or_else(|err| panic!("rendered statement failed to parse: {err}\n{rendered}"));
        assert_eq!(reparsed.to_string(), rendered);
    }

    let _ = olap_mdx::parse_expression(query);
});
