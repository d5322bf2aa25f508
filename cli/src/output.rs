use colored::*;
use console::{measure_text_width, Term};
use fixmycar_core::{Role, Snippet, Turn};
use pulldown_cmark::{Event as MdEvent, HeadingLevel, Options, Parser as MdParser, Tag};
use std::io::{self, Write};

const STREAM_CURSOR: &str = "▌";
const EXCERPT_CHARS: usize = 240;

/// What the terminal shows besides the answer text
#[derive(Debug, Clone, Copy)]
pub struct DisplayOptions {
    pub show_sources: bool,
    /// Print increments as they arrive instead of rendering the finished answer
    pub stream: bool,
}

/// Prints increments as they arrive, keeping a cursor block after the text.
pub struct StreamPrinter {
    term: Term,
    /// Everything written so far, prefix included
    printed: String,
    started: bool,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
            printed: String::new(),
            started: false,
        }
    }

    pub fn push(&mut self, delta: &str) {
        let mut stdout = io::stdout().lock();
        if self.started {
            // erase the previous cursor; it is always the last glyph on the line
            let _ = write!(stdout, "\x08 \x08");
        } else {
            let prefix = format!("{}: ", "Assistant".blue().bold());
            let _ = write!(stdout, "{}", prefix);
            self.printed.push_str(&prefix);
            self.started = true;
        }
        let _ = write!(stdout, "{}{}", delta, STREAM_CURSOR);
        let _ = stdout.flush();
        self.printed.push_str(delta);
    }

    /// Removes the cursor. With `clear` set and stdout a terminal, the raw
    /// streamed text is wiped too so the rendered answer can take its place.
    ///
    /// Returns true when the caller should print the rendered answer.
    pub fn finish(self, clear: bool) -> bool {
        if !self.started {
            return true;
        }

        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "\x08 \x08");
        let _ = stdout.flush();
        drop(stdout);

        if !clear || !self.term.is_term() {
            println!();
            return false;
        }

        let (_, columns) = self.term.size();
        let rows = rows_used(&self.printed, columns as usize);
        let cleared = self
            .term
            .move_cursor_up(rows.saturating_sub(1))
            .and_then(|_| self.term.clear_line())
            .and_then(|_| self.term.clear_to_end_of_screen());
        if cleared.is_err() {
            println!();
            return false;
        }
        true
    }
}

/// Terminal rows taken by `text` when soft-wrapped at `columns`.
pub fn rows_used(text: &str, columns: usize) -> usize {
    let columns = columns.max(1);
    text.split('\n')
        .map(|line| measure_text_width(line).div_ceil(columns).max(1))
        .sum()
}

/// Prints a finished answer, rendering its markdown
pub fn print_answer(turn: &Turn) {
    println!(
        "{}: {}",
        "Assistant".blue().bold(),
        render_markdown(&turn.content).trim()
    );
}

/// Collapsed-by-default panel for the sources of one answer
pub fn render_sources(sources: &[Snippet]) -> String {
    if sources.is_empty() {
        return format!("{}\n", "No sources available for this answer.".dimmed());
    }

    let mut output = format!("{}\n", "Sources".cyan().bold());
    for (i, snippet) in sources.iter().enumerate() {
        output.push_str(&format!(
            "  {}. {} {}\n",
            i + 1,
            snippet.source_uri.underline(),
            format!("(distance: {:.2})", snippet.distance).dimmed()
        ));
        output.push_str(&format!("     {}\n", excerpt(&snippet.text)));
    }
    output
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
        format!("{}…", cut.trim_end())
    }
}

/// Re-renders the whole transcript. Pure: the same turns give the same text.
pub fn render_transcript(turns: &[Turn], show_sources: bool) -> String {
    if turns.is_empty() {
        return format!("{}\n", "No questions asked yet.".dimmed());
    }

    let mut output = String::new();
    for turn in turns {
        match turn.role {
            Role::User => {
                output.push_str(&format!("{}: {}\n", "You".green().bold(), turn.content));
            }
            Role::Assistant => {
                output.push_str(&format!(
                    "{}: {}\n",
                    "Assistant".blue().bold(),
                    render_markdown(&turn.content).trim()
                ));
                if show_sources && !turn.sources.is_empty() {
                    output.push_str(&render_sources(&turn.sources));
                }
            }
        }
        output.push('\n');
    }
    output
}

/// Show usage instructions when no prompt or action is provided
pub fn print_usage_instructions() {
    println!("{}", "🚗 Fix my car!".bold());
    println!("Questions about your vehicle? Ask me! Include the make, model, and year.");
    println!();
    println!("{}", "Usage:".yellow().bold());
    println!("  {}", "fix-my-car \"your question\"".green().bold());
    println!("    Ask a single question");
    println!();
    println!("  {}", "fix-my-car -i".green().bold());
    println!("    Start an interactive chat");
    println!();
    println!("{}", "Options:".cyan());
    println!("  --sources        Show the manual passages behind each answer");
    println!("  --no-stream      Wait for the full answer instead of streaming it");
    println!("  --config <PATH>  Read settings from a TOML file");
    println!("  --help           Show all options");
    println!();
}

pub fn print_interactive_help() {
    println!("{}", "Commands:".cyan().bold());
    println!("  history     Show the conversation so far");
    println!("  sources     Show the sources behind the latest answer");
    println!("  help        Show this help message");
    println!("  exit, quit  Leave the chat");
    println!();
}

/// Render the markdown subset answers tend to use: headings, lists,
/// emphasis and inline code.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let mut output = String::new();
    let mut lists: Vec<Option<u64>> = Vec::new();
    let mut bold = false;
    let mut italic = false;
    let mut heading = false;
    let mut in_code_block = false;

    for event in MdParser::new_ext(markdown, options) {
        match event {
            MdEvent::Start(Tag::Heading(level, ..)) => {
                if !output.is_empty() {
                    output.push('\n');
                }
                if level == HeadingLevel::H1 {
                    output.push_str(&"# ".bright_cyan().bold().to_string());
                }
                heading = true;
            }
            MdEvent::End(Tag::Heading(..)) => {
                heading = false;
                output.push('\n');
            }
            MdEvent::Start(Tag::Paragraph) => {
                if lists.is_empty() && !output.is_empty() && !output.ends_with("\n\n") {
                    if !output.ends_with('\n') {
                        output.push('\n');
                    }
                    output.push('\n');
                }
            }
            MdEvent::End(Tag::Paragraph) => {
                if lists.is_empty() {
                    output.push('\n');
                }
            }
            MdEvent::Start(Tag::List(start)) => {
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                lists.push(start);
            }
            MdEvent::End(Tag::List(_)) => {
                lists.pop();
                if lists.is_empty() {
                    output.push('\n');
                }
            }
            MdEvent::Start(Tag::Item) => {
                let depth = lists.len().saturating_sub(1);
                output.push_str(&"  ".repeat(depth));
                match lists.last_mut() {
                    Some(Some(n)) => {
                        output.push_str(&format!("{}. ", n.to_string().yellow()));
                        *n += 1;
                    }
                    _ => output.push_str(&format!("{} ", "•".yellow())),
                }
            }
            MdEvent::End(Tag::Item) => {
                if !output.ends_with('\n') {
                    output.push('\n');
                }
            }
            MdEvent::Start(Tag::CodeBlock(_)) => {
                in_code_block = true;
                output.push('\n');
            }
            MdEvent::End(Tag::CodeBlock(_)) => {
                in_code_block = false;
                output.push('\n');
            }
            MdEvent::Start(Tag::Strong) => bold = true,
            MdEvent::End(Tag::Strong) => bold = false,
            MdEvent::Start(Tag::Emphasis) => italic = true,
            MdEvent::End(Tag::Emphasis) => italic = false,
            MdEvent::Start(Tag::TableCell) => output.push_str("| "),
            MdEvent::End(Tag::TableCell) => output.push(' '),
            MdEvent::End(Tag::TableRow) | MdEvent::End(Tag::TableHead) => output.push_str("|\n"),
            MdEvent::Code(code) => {
                let code: &str = &code;
                output.push_str(&code.on_bright_black().white().to_string());
            }
            MdEvent::Text(text) => {
                let text: &str = &text;
                let styled = if in_code_block {
                    text.dimmed()
                } else if heading {
                    text.bright_cyan().bold()
                } else if bold {
                    text.bold()
                } else if italic {
                    text.italic()
                } else {
                    text.normal()
                };
                output.push_str(&styled.to_string());
            }
            MdEvent::SoftBreak => output.push(' '),
            MdEvent::HardBreak | MdEvent::Rule => output.push('\n'),
            _ => {}
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() {
        colored::control::set_override(false);
    }

    fn snippet(text: &str) -> Snippet {
        Snippet {
            source_uri: "gs://manuals/civic-2018.pdf".to_string(),
            distance: 0.1834,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_markdown_lists() {
        plain();
        let rendered = render_markdown("Check these:\n\n1. **Battery**\n2. Fuses\n\n- Starter");
        assert!(rendered.contains("Check these:"));
        assert!(rendered.contains("1. Battery"));
        assert!(rendered.contains("2. Fuses"));
        assert!(rendered.contains("• Starter"));
    }

    #[test]
    fn test_transcript_render_is_repeatable() {
        plain();
        let turns = vec![
            Turn::user("My 2018 Honda Civic won't start"),
            Turn::assistant("Check the *battery*.", vec![snippet("Battery care")]),
            Turn::user("And if the battery is fine?"),
            Turn::assistant("Check the starter relay.", Vec::new()),
        ];

        let first = render_transcript(&turns, true);
        let second = render_transcript(&turns, true);
        assert_eq!(first, second);
        assert!(first.contains("You: My 2018 Honda Civic won't start"));
        assert!(first.contains("Assistant: Check the battery."));
        assert!(first.contains("gs://manuals/civic-2018.pdf"));
        assert!(first.find("battery is fine").unwrap() > first.find("Battery care").unwrap());

        let without = render_transcript(&turns, false);
        assert!(!without.contains("gs://manuals"));
    }

    #[test]
    fn test_sources_panel() {
        plain();
        let panel = render_sources(&[snippet("Turn the key\n  to ON.")]);
        assert!(panel.contains("1. gs://manuals/civic-2018.pdf (distance: 0.18)"));
        assert!(panel.contains("Turn the key to ON."));
        assert!(render_sources(&[]).contains("No sources"));
    }

    #[test]
    fn test_rows_used_counts_wrapped_lines() {
        assert_eq!(rows_used("Assistant: Check the battery.", 80), 1);
        assert_eq!(rows_used(&"x".repeat(81), 80), 2);
        assert_eq!(rows_used("1. **Battery**\n2. Fuses\n", 80), 3);
        // styling codes take no columns
        let styled = format!("{}: {}", "Assistant".blue().bold(), "y".repeat(69));
        assert_eq!(rows_used(&styled, 80), 1);
    }

    #[test]
    fn test_long_excerpts_are_cut() {
        let long = "word ".repeat(200);
        let cut = excerpt(&long);
        assert!(cut.ends_with('…'));
        assert!(cut.chars().count() <= EXCERPT_CHARS + 1);
    }
}
