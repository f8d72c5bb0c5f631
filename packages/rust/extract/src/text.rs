//! Sentence splitting and extractive summaries.

/// Split text into sentences on `.`, `!`, `?`.
///
/// A period between two digits (`2.5`, `v1.2.3`) is not a boundary, and
/// neither is the period of a short capitalized abbreviation (`Mr.`, `Inc.`)
/// followed by more text.
pub fn split_sentences(text: &str) -> Vec<&str> {
    sentence_spans(text).into_iter().map(|(_, s)| s).collect()
}

/// [`split_sentences`] with each sentence's byte offset into `text`.
pub fn sentence_spans(text: &str) -> Vec<(usize, &str)> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    let mut prev: Option<char> = None;

    while let Some((idx, ch)) = chars.next() {
        let next = chars.peek().map(|&(_, c)| c);
        let boundary = match ch {
            '!' | '?' => true,
            '.' => {
                let decimal = prev.is_some_and(|p| p.is_ascii_digit())
                    && next.is_some_and(|n| n.is_ascii_digit());
                let abbreviation = is_abbreviation(&text[start..idx]);
                !decimal && !abbreviation && next.is_none_or(char::is_whitespace)
            }
            _ => false,
        };

        if boundary {
            let end = idx + ch.len_utf8();
            push_trimmed(&mut sentences, start, &text[start..end]);
            start = end;
        }
        prev = Some(ch);
    }
    push_trimmed(&mut sentences, start, &text[start..]);

    sentences
}

fn push_trimmed<'a>(out: &mut Vec<(usize, &'a str)>, start: usize, piece: &'a str) {
    let leading = piece.len() - piece.trim_start().len();
    let trimmed = piece.trim();
    if trimmed.chars().count() > 1 {
        out.push((start + leading, trimmed));
    }
}

const ABBREVIATIONS: &[&str] = &[
    "Mr", "Mrs", "Ms", "Dr", "Prof", "Sr", "Jr", "St", "Inc", "Corp", "Ltd", "Co", "vs", "U.S",
];

fn is_abbreviation(before: &str) -> bool {
    before
        .rsplit(char::is_whitespace)
        .next()
        .is_some_and(|word| ABBREVIATIONS.contains(&word))
}

/// Extractive summary: the first three sentences, capped at `max_len`
/// characters (with a trailing ellipsis when cut). Short texts come back
/// unchanged.
pub fn summarize(text: &str, max_len: usize) -> String {
    let sentences = split_sentences(text);
    if sentences.len() <= 3 {
        return text.trim().to_string();
    }

    let summary = sentences[..3].join(" ");
    match summary.char_indices().nth(max_len) {
        Some((idx, _)) => format!("{}...", &summary[..idx]),
        None => summary,
    }
}
