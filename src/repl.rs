//! Interactive prompt: a raw-mode line editor with history recall and tab
//! completion, rendering the structured transcript with ANSI colors.

use crate::config::DisplayConfig;
use crate::output::{OutputLine, SegmentKind};
use crate::terminal::Terminal;
use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::terminal;
use std::io::{self, BufRead, Write};
use unicode_width::UnicodeWidthStr;

/// Run the prompt loop until Ctrl-D or `exit`.
pub fn run(term: &mut Terminal, display: &DisplayConfig) -> Result<()> {
    println!("{}", "Power User CLI. Type 'help' for commands.".cyan());

    // Transcript restored from a previous session.
    for line in term.output() {
        render_line(line, display.timestamps);
    }

    loop {
        let Some(input) = read_line(term, &display.prompt)? else {
            println!();
            break;
        };
        let trimmed = input.trim();
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }

        let before = term.output().len();
        term.execute(&input);
        render_delta(term, before, display.timestamps);
    }
    Ok(())
}

/// Render the lines `execute` appended after `before`. A transcript shorter
/// than `before` means the command cleared it, so redraw from scratch
/// instead of slicing past the end.
pub fn render_delta(term: &Terminal, before: usize, timestamps: bool) {
    if term.output().len() < before {
        print!("\x1b[2J\x1b[H");
        io::stdout().flush().ok();
        for line in term.output() {
            render_line(line, timestamps);
        }
    } else {
        for line in &term.output()[before..] {
            render_line(line, timestamps);
        }
    }
}

/// Print one transcript line, segment by segment.
pub fn render_line(line: &OutputLine, timestamps: bool) {
    if timestamps {
        let local = line.timestamp.with_timezone(&Local);
        print!("{} ", format!("[{}]", local.format("%H:%M:%S")).dimmed());
    }
    for seg in &line.content {
        let styled = match seg.kind {
            SegmentKind::Normal => seg.text.normal(),
            SegmentKind::Command => seg.text.bold(),
            SegmentKind::Info => seg.text.cyan(),
            SegmentKind::Success => seg.text.green(),
            SegmentKind::Error => seg.text.red(),
            SegmentKind::System => seg.text.yellow(),
            SegmentKind::Help => seg.text.blue(),
            SegmentKind::Link => seg.text.cyan().underline(),
        };
        print!("{styled}");
    }
    println!();
}

/// Read one line in raw mode. Returns `None` on Ctrl-D with an empty buffer.
/// Falls back to plain line input when raw mode is unavailable (pipes, dumb
/// terminals).
fn read_line(term: &Terminal, prompt: &str) -> Result<Option<String>> {
    if terminal::enable_raw_mode().is_err() {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut buf = String::new();
        if io::stdin().lock().read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        return Ok(Some(buf.trim_end_matches(['\r', '\n']).to_string()));
    }

    let mut stdout = io::stdout();
    let mut buffer = String::new();
    let mut cursor = 0usize; // char index into buffer
    let mut hist_offset = 0usize; // 0 = editing the current line
    let mut stash = String::new(); // current line saved while browsing history

    let result = loop {
        // Redraw the whole prompt line and reposition the cursor.
        print!("\r\x1b[K{}{}", prompt.bold(), buffer);
        let lead: String = buffer.chars().take(cursor).collect();
        let col = UnicodeWidthStr::width(prompt) + UnicodeWidthStr::width(lead.as_str());
        print!("\r");
        if col > 0 {
            print!("\x1b[{col}C");
        }
        stdout.flush()?;

        let Event::Key(key) = event::read()? else {
            continue;
        };

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => {
                    print!("^C\r\n");
                    buffer.clear();
                    cursor = 0;
                    hist_offset = 0;
                    continue;
                }
                KeyCode::Char('d') => {
                    if buffer.is_empty() {
                        break None;
                    }
                    continue;
                }
                KeyCode::Char('a') => {
                    cursor = 0;
                    continue;
                }
                KeyCode::Char('e') => {
                    cursor = buffer.chars().count();
                    continue;
                }
                KeyCode::Char('u') => {
                    buffer = buffer.chars().skip(cursor).collect();
                    cursor = 0;
                    continue;
                }
                _ => {}
            }
        }

        match key.code {
            KeyCode::Enter => {
                print!("\r\n");
                break Some(std::mem::take(&mut buffer));
            }
            KeyCode::Backspace => {
                if cursor > 0 {
                    cursor -= 1;
                    remove_char(&mut buffer, cursor);
                }
            }
            KeyCode::Delete => {
                if cursor < buffer.chars().count() {
                    remove_char(&mut buffer, cursor);
                }
            }
            KeyCode::Left => cursor = cursor.saturating_sub(1),
            KeyCode::Right => {
                if cursor < buffer.chars().count() {
                    cursor += 1;
                }
            }
            KeyCode::Home => cursor = 0,
            KeyCode::End => cursor = buffer.chars().count(),
            KeyCode::Up => {
                if let Some(entry) = term.history_at(hist_offset + 1) {
                    if hist_offset == 0 {
                        stash = buffer.clone();
                    }
                    hist_offset += 1;
                    buffer = entry.to_string();
                    cursor = buffer.chars().count();
                }
            }
            KeyCode::Down => {
                if hist_offset > 0 {
                    hist_offset -= 1;
                    buffer = if hist_offset == 0 {
                        std::mem::take(&mut stash)
                    } else {
                        term.history_at(hist_offset).unwrap_or_default().to_string()
                    };
                    cursor = buffer.chars().count();
                }
            }
            KeyCode::Tab => {
                let candidates = term.completions(&buffer);
                match candidates.len() {
                    0 => {}
                    1 => {
                        buffer = apply_completion(&buffer, &candidates[0]);
                        cursor = buffer.chars().count();
                    }
                    _ => {
                        print!("\r\n");
                        for candidate in &candidates {
                            print!("  {candidate}\r\n");
                        }
                    }
                }
            }
            KeyCode::Char(c) => {
                insert_char(&mut buffer, cursor, c);
                cursor += 1;
            }
            _ => {}
        }
    };

    terminal::disable_raw_mode().ok();
    stdout.flush().ok();
    Ok(result)
}

fn insert_char(buffer: &mut String, at: usize, c: char) {
    let byte = buffer
        .char_indices()
        .nth(at)
        .map(|(i, _)| i)
        .unwrap_or(buffer.len());
    buffer.insert(byte, c);
}

fn remove_char(buffer: &mut String, at: usize) {
    if let Some((byte, _)) = buffer.char_indices().nth(at) {
        buffer.remove(byte);
    }
}

/// Replace the token under completion with the candidate. Completing after
/// a trailing space appends a fresh token; completing a full first token
/// adds the separating space.
fn apply_completion(input: &str, candidate: &str) -> String {
    if input.ends_with(' ') || input.is_empty() {
        return format!("{input}{candidate} ");
    }
    let head = match input.rfind(char::is_whitespace) {
        Some(pos) => &input[..=pos],
        None => "",
    };
    format!("{head}{candidate} ")
}
