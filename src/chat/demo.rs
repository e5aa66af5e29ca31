use std::io::{self, Write};

use super::bot::{preview, ChatBot};

pub const DEMO_QUESTIONS: [&str; 9] = [
    "Tell me about the fruit known as Apple.",
    "What do you know about Apple the technology company?",
    "Are apples healthy to eat?",
    "Who founded Apple Computer Company?",
    "What are some Apple products?",
    "What are the health benefits of eating fruits?",
    "How many days of annual leave do employees get?",
    "Which public holidays is the office closed on?",
    "What happens when a public holiday falls on a weekend?",
];

/// Asks every demo question in order. A failed question is reported and the
/// run moves on. Returns how many questions were answered.
pub async fn run_demo<W: Write>(bot: &ChatBot, out: &mut W) -> io::Result<usize> {
    let total = DEMO_QUESTIONS.len();
    let mut answered = 0usize;

    for (i, question) in DEMO_QUESTIONS.iter().enumerate() {
        writeln!(out, "\nTest question {}/{}: {}", i + 1, total, question)?;
        writeln!(out, "{}", "=".repeat(50))?;

        match bot.ask(question).await {
            Ok(turn) => {
                answered += 1;
                writeln!(out, "{}", turn.answer)?;
                for source in &turn.sources {
                    writeln!(
                        out,
                        "  [{:.3}] {}: {}",
                        source.score,
                        source.source,
                        preview(&source.preview, 80)
                    )?;
                }
            }
            Err(err) => {
                tracing::warn!("Demo question {} failed: {}", i + 1, err);
                writeln!(out, "Error: {}", err)?;
            }
        }
    }

    writeln!(out, "\nAnswered {}/{} questions.", answered, total)?;
    Ok(answered)
}
