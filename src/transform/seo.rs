pub const TITLE_MAX_CHARS: usize = 60;
const DESCRIPTION_PROMPT_CHARS: usize = 500;
const REMAINDER_MAX_CHARS: usize = 200;

pub fn title_prompt(title: &str) -> String {
    format!(
        "Optimize this product title for SEO and conversions. \
         Make it clear, concise, and keyword-rich. \
         Maximum {TITLE_MAX_CHARS} characters.\n\
         Original: {title}\n\nOptimized title:"
    )
}

pub fn description_prompt(description: &str) -> String {
    let excerpt: String = description.chars().take(DESCRIPTION_PROMPT_CHARS).collect();
    format!(
        "Rewrite this product description for mobile users and SEO. \
         Use short paragraphs, bullet points for features, and clear language. \
         Make it compelling and conversion-focused.\n\n\
         Original description: {excerpt}\n\nOptimized description:"
    )
}

/// Tidies a generated title: strips wrapping quotes and caps the length.
pub fn finish_title(generated: &str) -> Option<String> {
    let trimmed = generated
        .lines()
        .find(|line| !line.trim().is_empty())?
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();
    let capped = truncate_chars(trimmed, TITLE_MAX_CHARS);
    (!capped.is_empty()).then_some(capped)
}

/// Local title cleanup: symbols become spaces, whitespace collapses, capped
/// at the title limit.
pub fn clean_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, TITLE_MAX_CHARS)
}

/// Sentence-based layout: lead sentence, up to five feature bullets, then a
/// short remainder.
pub fn format_description(description: &str) -> String {
    let description = description.trim();
    let sentences = split_sentences(description);
    let lead = match sentences.first() {
        Some(first) => first.clone(),
        None => description.chars().take(100).collect(),
    };
    let features = sentences
        .iter()
        .take(5)
        .map(|s| format!("• {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    let remainder: String = sentences
        .iter()
        .skip(5)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(REMAINDER_MAX_CHARS)
        .collect();

    let mut out = format!("{lead}\n\nKey Features:\n");
    if features.is_empty() {
        out.push_str(&format!("• {lead}"));
    } else {
        out.push_str(&features);
    }
    if !remainder.is_empty() {
        out.push_str("\n\n");
        out.push_str(&remainder);
    }
    out.trim().to_string()
}

/// Sentences ending in `.`, `!` or `?`. Trailing text without a terminator is
/// only kept when no complete sentence exists.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            while let Some(&next) = chars.peek() {
                if !matches!(next, '.' | '!' | '?') {
                    break;
                }
                current.push(next);
                chars.next();
            }
            let sentence = current.trim();
            if sentence.chars().any(|c| !matches!(c, '.' | '!' | '?')) {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }
    if sentences.is_empty() && !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect::<String>().trim().to_string()
}
