//! Interactive chat and one-shot questions on the terminal.
//!
//! `copilot chat` keeps the conversation in memory for the life of the
//! process. Each answer is streamed to stdout as it arrives; the exchange is
//! recorded in the history only once the full answer is known. A failed
//! completion prints a short apology and leaves the history untouched, so
//! an error string is never replayed to the model as an assistant turn.
//!
//! | Input | Effect |
//! |-------|--------|
//! | `/reset` | forget the conversation |
//! | `/context` | toggle printing the retrieved snippets |
//! | `/exit`, `/quit`, EOF | leave |

use anyhow::{bail, Result};
use futures_util::StreamExt;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::completion::Completion;
use crate::config::Config;
use crate::copilot::{Answer, Copilot, RetrievedContext};
use crate::models::Conversation;
use crate::progress::ProgressMode;

/// Shown instead of an answer when every completion attempt failed.
pub const FALLBACK_MESSAGE: &str =
    "Sorry, I could not get a response right now. Please try again.";

/// Runs the interactive loop until `/exit` or end of input.
pub async fn run_chat(config: &Config, show_context: bool) -> Result<()> {
    let progress = ProgressMode::default_for_tty().reporter();
    let copilot = Copilot::from_config(config, progress.as_ref()).await?;

    let mut show_context = show_context;
    let mut conversation = Conversation::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}\n", copilot.greeting());

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let question = line.trim();

        match question {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                conversation.clear();
                println!("Conversation cleared.\n");
                continue;
            }
            "/context" => {
                show_context = !show_context;
                let state = if show_context { "on" } else { "off" };
                println!("Retrieved context display {state}.\n");
                continue;
            }
            _ => {}
        }

        let answer = copilot.ask(question, conversation.messages()).await;
        if let Some(text) = render_answer(answer, show_context).await? {
            conversation.record_exchange(question, text);
        }
        println!();
    }

    Ok(())
}

/// Answers a single question and exits.
///
/// Returns an error (exit code 1) when no answer could be obtained.
pub async fn run_ask(
    config: &Config,
    question: &str,
    show_context: bool,
    no_stream: bool,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }

    let progress = ProgressMode::default_for_tty().reporter();
    let copilot = Copilot::from_config(config, progress.as_ref()).await?;
    let stream = copilot.streams() && !no_stream;

    let answer = copilot.ask_with(question, &[], stream).await;
    match render_answer(answer, show_context).await? {
        Some(_) => Ok(()),
        None => bail!("could not get a response, please try again"),
    }
}

/// Prints an answer, streaming if needed. Returns the full text on success.
async fn render_answer(answer: Answer, show_context: bool) -> Result<Option<String>> {
    if show_context {
        print_context(&answer.context);
    }

    let mut stdout = std::io::stdout();
    match answer.completion {
        Completion::Text(text) => {
            writeln!(stdout, "{text}")?;
            Ok(Some(text))
        }
        Completion::Stream(mut stream) => {
            let mut text = String::new();
            while let Some(fragment) = stream.next().await {
                match fragment {
                    Ok(fragment) => {
                        write!(stdout, "{fragment}")?;
                        stdout.flush()?;
                        text.push_str(&fragment);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "answer stream interrupted");
                        writeln!(stdout)?;
                        eprintln!("{FALLBACK_MESSAGE}");
                        return Ok(None);
                    }
                }
            }
            writeln!(stdout)?;
            Ok(Some(text))
        }
        Completion::Failed(failure) => {
            tracing::error!(attempts = failure.attempts, error = %failure.last_error, "no answer");
            eprintln!("{FALLBACK_MESSAGE}");
            Ok(None)
        }
    }
}

fn print_context(context: &RetrievedContext) {
    if let Some(err) = &context.error {
        eprintln!("(retrieval failed: {err})");
    }
    if context.is_empty() {
        println!("Retrieved context: none\n");
        return;
    }
    println!("Retrieved context:");
    println!("{}", context.formatted());
    println!("Sources: {}\n", context.sources().join(", "));
}
