use anyhow::{Context, Result};
use colored::*;
use fixmycar_core::{ChatSession, Turn};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::time::Duration;
use tracing::{debug, info};

use crate::output::{
    DisplayOptions, StreamPrinter, print_answer, print_interactive_help, render_sources,
    render_transcript,
};

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner} {msg}")
    {
        spinner.set_style(style);
    }
    spinner.set_message("Looking through the manual...");
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Submits one question and shows the answer as it arrives.
async fn ask(session: &mut ChatSession, question: &str, display: DisplayOptions) -> Result<Turn> {
    let spinner = spinner();
    let mut printer = display.stream.then(StreamPrinter::new);

    let result = session
        .submit(question, |progress| {
            if let Some(printer) = printer.as_mut() {
                if !spinner.is_finished() {
                    spinner.finish_and_clear();
                }
                printer.push(progress.delta);
            }
        })
        .await;

    spinner.finish_and_clear();
    // Streamed text is raw markdown; swap it for the rendered answer
    let render = match printer.take() {
        Some(printer) => printer.finish(result.is_ok()),
        None => true,
    };

    let turn = result?;
    if render {
        print_answer(&turn);
    }
    if display.show_sources {
        print!("{}", render_sources(&turn.sources));
    }

    Ok(turn)
}

/// Runs a single query mode, asking one question and displaying the answer
pub async fn run_single_query(
    session: &mut ChatSession,
    prompt: String,
    display: DisplayOptions,
) -> Result<()> {
    info!("Running single query");

    ask(session, &prompt, display)
        .await
        .map(|_| ())
        .context("Failed to answer question")
}

/// Runs an interactive chat session
pub async fn run_interactive_chat(session: &mut ChatSession, display: DisplayOptions) -> Result<()> {
    println!("{}", "🚗 Fix my car!".bold());
    println!("Questions about your vehicle? Ask me! Include the make, model, and year.");
    println!("Type 'help' for commands, 'exit' or 'quit' to end the session.");
    println!();

    loop {
        print!("{}: ", "You".green().bold());
        io::stdout().flush().context("Failed to flush stdout")?;

        let mut input = String::new();
        let read = io::stdin()
            .read_line(&mut input)
            .context("Failed to read input")?;
        if read == 0 {
            println!();
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "exit" | "quit" => {
                println!("Exiting chat session.");
                break;
            }
            "help" => {
                print_interactive_help();
                continue;
            }
            "history" => {
                print!("{}", render_transcript(session.history(), display.show_sources));
                continue;
            }
            "sources" => {
                print!("{}", render_sources(session.latest_sources()));
                continue;
            }
            _ => {}
        }

        debug!(turns = session.history().len(), "Asking question");
        if let Err(e) = ask(session, input, display).await {
            // The question stays in the transcript, unanswered
            debug!(error = %e, "Question left unanswered");
            eprintln!("{} {}", "Error:".red().bold(), e);
        }

        println!(); // Add spacing between interactions
    }

    Ok(())
}
