/// Maximum token length to store in the index.
/// Longer runs are usually base64, hashes or other non-searchable content.
const MAX_TOKEN_LENGTH: usize = 128;

/// Split text into lowercase words in order of appearance.
///
/// Any non-alphanumeric character separates words. Repeated words are kept;
/// callers that need distinct words deduplicate themselves.
pub fn full_text_words(text: &str) -> Vec<String> {
    let mut words = Vec::with_capacity(text.len() / 6);

    // ASCII fast path, most crawled text is ASCII
    if text.is_ascii() {
        for slice in text
            .as_bytes()
            .split(|b| !b.is_ascii_alphanumeric())
            .filter(|s| !s.is_empty())
        {
            if slice.len() <= MAX_TOKEN_LENGTH {
                // SAFETY: the input is ASCII
                let s = unsafe { std::str::from_utf8_unchecked(slice) };
                words.push(s.to_ascii_lowercase());
            }
        }
        return words;
    }

    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            push_word(&mut words, &mut current);
        }
    }
    if !current.is_empty() {
        push_word(&mut words, &mut current);
    }

    words
}

fn push_word(words: &mut Vec<String>, current: &mut String) {
    if current.len() <= MAX_TOKEN_LENGTH {
        words.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Distinct words of `text`, first occurrence order
pub fn distinct_words(text: &str) -> Vec<String> {
    let mut seen = ahash::AHashSet::new();
    full_text_words(text)
        .into_iter()
        .filter(|w| seen.insert(w.clone()))
        .collect()
}
