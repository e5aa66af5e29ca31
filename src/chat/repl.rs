//! Interactive question loop.
//!
//! Generic over the reader and writer so it can be driven from tests; the
//! binary passes locked stdin and stdout.

use std::io::{self, BufRead, Write};

use super::bot::{preview, ChatBot};
use crate::store::ScoredChunk;

const HELP: &str = "Commands:
  <question>        ask about the ingested documents
  history           show this session's questions and answers
  clear             clear the session history
  stats             show vector store statistics
  sources on|off    show or hide the sources under each answer
  help              show this message
  quit, exit, bye   leave the chat";

pub async fn run_repl<R: BufRead, W: Write>(
    bot: &ChatBot,
    input: R,
    out: &mut W,
    mut show_sources: bool,
) -> io::Result<()> {
    writeln!(out, "Holiday chatbot ({}). Type 'help' for commands.", bot.model_name())?;

    let mut lines = input.lines();
    loop {
        write!(out, "\nYou: ")?;
        out.flush()?;

        let Some(line) = lines.next() else {
            writeln!(out)?;
            break;
        };
        let line = line?;
        let trimmed = line.trim();
        let command = trimmed.to_lowercase();

        match command.as_str() {
            "quit" | "exit" | "bye" => {
                writeln!(out, "Goodbye!")?;
                break;
            }
            "help" => writeln!(out, "{}", HELP)?,
            "" => writeln!(out, "Please enter a question or command ('help' lists them).")?,
            "history" => print_history(bot, out).await?,
            "clear" => {
                bot.clear_history().await;
                writeln!(out, "History cleared.")?;
            }
            "stats" => match bot.store().stats().await {
                Ok(stats) => {
                    writeln!(out, "Backend: {}", stats.backend)?;
                    writeln!(out, "Total vectors: {}", stats.total_vectors)?;
                    match stats.dimension {
                        Some(dimension) => writeln!(out, "Dimension: {}", dimension)?,
                        None => writeln!(out, "Dimension: unknown")?,
                    }
                    for (namespace, count) in &stats.namespaces {
                        writeln!(out, "  {}: {} vectors", namespace, count)?;
                    }
                }
                Err(err) => writeln!(out, "Error: {}", err)?,
            },
            "sources on" => {
                show_sources = true;
                writeln!(out, "Sources will be shown.")?;
            }
            "sources off" => {
                show_sources = false;
                writeln!(out, "Sources will be hidden.")?;
            }
            _ => ask(bot, trimmed, out, show_sources).await?,
        }
    }

    Ok(())
}

async fn ask<W: Write>(bot: &ChatBot, question: &str, out: &mut W, show_sources: bool) -> io::Result<()> {
    writeln!(out, "Searching knowledge base...")?;

    match bot.ask_with_hits(question).await {
        Ok((turn, hits)) => {
            print_retrieval(&hits, out)?;
            writeln!(out, "\nAnswer:\n{}", turn.answer)?;
            if show_sources && !turn.sources.is_empty() {
                writeln!(out, "\nSources:")?;
                for source in &turn.sources {
                    match source.page {
                        Some(page) => writeln!(
                            out,
                            "  - {}, page {} (score {:.3})",
                            source.source, page, source.score
                        )?,
                        None => writeln!(out, "  - {} (score {:.3})", source.source, source.score)?,
                    }
                }
            }
        }
        Err(err) => {
            tracing::warn!("Question failed: {}", err);
            writeln!(out, "Error: {}", err)?;
        }
    }

    Ok(())
}

fn print_retrieval<W: Write>(hits: &[ScoredChunk], out: &mut W) -> io::Result<()> {
    if hits.is_empty() {
        return writeln!(out, "  No relevant results found in knowledge base.");
    }
    writeln!(out, "Found {} relevant results:", hits.len())?;
    for (i, hit) in hits.iter().enumerate() {
        writeln!(
            out,
            "  {}. (Score: {:.3}) {}",
            i + 1,
            hit.score,
            preview(&hit.chunk.text, 100)
        )?;
    }
    Ok(())
}

async fn print_history<W: Write>(bot: &ChatBot, out: &mut W) -> io::Result<()> {
    let history = bot.history().await;
    if history.is_empty() {
        return writeln!(out, "No conversation history yet.");
    }
    for (i, turn) in history.iter().enumerate() {
        writeln!(out, "{}. [{}] Q: {}", i + 1, turn.timestamp, turn.question)?;
        writeln!(out, "   A: {}", preview(&turn.answer, 100))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;
    use crate::chat::bot::test_support::{vowel_vector, ScriptedChat, VowelEmbedder};
    use crate::core::config::ChatSettings;
    use crate::ingest::{Chunk, DocumentKind};
    use crate::store::{MemoryVectorStore, VectorStore};

    async fn bot(chat: ScriptedChat) -> ChatBot {
        let store = Arc::new(MemoryVectorStore::new());
        let text = "Employees receive twenty days of paid annual leave.";
        store
            .upsert(vec![(
                Chunk {
                    id: "hr#0".to_string(),
                    text: text.to_string(),
                    source: "hr/holiday_policy.md".to_string(),
                    kind: DocumentKind::Markdown,
                    page: None,
                    chunk_index: 0,
                    start_offset: 0,
                },
                vowel_vector(text),
            )])
            .await
            .unwrap();
        ChatBot::new(store, Arc::new(VowelEmbedder), Arc::new(chat), ChatSettings::default())
    }

    async fn run(bot: &ChatBot, script: &str, show_sources: bool) -> String {
        let mut out = Vec::new();
        run_repl(bot, Cursor::new(script.to_string()), &mut out, show_sources)
            .await
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn answers_questions_with_sources() {
        let bot = bot(ScriptedChat::new("Twenty days.")).await;

        let output = run(&bot, "How much annual leave?\nquit\n", true).await;

        assert!(output.contains("Found 1 relevant results:"));
        assert!(output.contains("Answer:\nTwenty days."));
        assert!(output.contains("Sources:\n  - hr/holiday_policy.md"));
        assert!(output.ends_with("Goodbye!\n"));
    }

    #[tokio::test]
    async fn commands_are_case_insensitive_and_loop_continues() {
        let bot = bot(ScriptedChat::new("Twenty days.")).await;

        let script = "HELP\n\nSources OFF\nleave?\nhistory\nclear\nhistory\nstats\nBye\nnever asked\n";
        let output = run(&bot, script, true).await;

        assert!(output.contains("sources on|off"));
        assert!(output.contains("Please enter a question"));
        assert!(output.contains("Sources will be hidden."));
        assert!(!output.contains("Sources:\n"));
        assert!(output.contains("1. ["));
        assert!(output.contains("Q: leave?"));
        assert!(output.contains("History cleared."));
        assert!(output.contains("No conversation history yet."));
        assert!(output.contains("Backend: memory"));
        assert!(output.contains("Total vectors: 1"));
        assert!(!output.contains("never asked"));
    }

    #[tokio::test]
    async fn errors_are_printed_and_eof_ends_the_loop() {
        let bot = bot(ScriptedChat::failing()).await;

        let output = run(&bot, "leave?\nstill here?", false).await;

        assert_eq!(output.matches("Error: upstream error: model unavailable").count(), 2);
        assert!(bot.history().await.is_empty());
    }
}
