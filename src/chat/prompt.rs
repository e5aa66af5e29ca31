//! Context block and system prompt for grounded answers.

use crate::store::ScoredChunk;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for company holiday, \
leave and policy questions. Use the provided context information to answer the user's \
question in a natural, conversational way.

If the context doesn't contain relevant information, politely say so and provide a general \
response if possible.";

/// Numbered context entries, best match first, capped at `max_chars`.
/// The first entry is always kept (cut to fit when it alone is too long).
/// Returns the context and how many of `chunks` made it in.
pub fn build_context(
    chunks: &[ScoredChunk],
    max_chars: usize,
    include_citations: bool,
) -> (String, usize) {
    let mut included = 0usize;
    let mut context = String::new();
    let mut used = 0usize;

    for (i, hit) in chunks.iter().enumerate() {
        let entry = if include_citations {
            let page = hit
                .chunk
                .page
                .map(|p| format!(", page {}", p))
                .unwrap_or_default();
            format!(
                "[{}] (Source: {}{}, relevance: {:.2})\n{}\n\n",
                i + 1,
                hit.chunk.source,
                page,
                hit.score,
                hit.chunk.text
            )
        } else {
            format!("{}\n\n", hit.chunk.text)
        };

        let entry_len = entry.chars().count();
        if used + entry_len > max_chars {
            if i == 0 {
                context.extend(entry.chars().take(max_chars));
                included = 1;
            }
            break;
        }

        context.push_str(&entry);
        used += entry_len;
        included += 1;
    }

    (context.trim().to_string(), included)
}

/// Sources cited in a context built with citations, sorted and deduplicated.
pub fn extract_sources(context: &str) -> Vec<String> {
    let mut sources: Vec<String> = context
        .lines()
        .filter_map(|line| {
            let rest = &line[line.find("(Source: ")? + "(Source: ".len()..];
            let end = rest.find(", page ").or_else(|| rest.find(", relevance:"))?;
            Some(rest[..end].to_string())
        })
        .collect();
    sources.sort();
    sources.dedup();
    sources
}

/// System prompt with the retrieved context appended.
pub fn system_message(system_prompt: Option<&str>, context: &str) -> String {
    format!(
        "{}\n\nContext Information:\n{}",
        system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT),
        context
    )
}
