//! Command-line parsing: pipeline stages, quoting and the background marker.

use anyhow::{bail, Result};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// Argument vectors, one per pipeline stage.
    pub stages: Vec<Vec<String>>,
    pub background: bool,
    /// The line as typed, trimmed.
    pub text: String,
}

impl ParsedLine {
    pub fn is_pipeline(&self) -> bool {
        self.stages.len() > 1
    }
}

/// Parse a line. Blank lines give `Ok(None)`.
///
/// Words are separated by whitespace, `|` separates stages, `'...'` keeps
/// its contents as one word, and an unquoted `&` at the end of the line
/// (alone or stuck to the last word) runs the job in the background.
pub fn parse_line(line: &str) -> Result<Option<ParsedLine>> {
    let text = line.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let mut stages: Vec<Vec<String>> = Vec::new();
    let mut stage: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut background = false;

    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if background && !c.is_whitespace() {
            bail!("'&' must end the command line");
        }
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(q) => word.push(q),
                        None => bail!("unterminated quote"),
                    }
                }
            }
            '|' => {
                finish_word(&mut stage, &mut word, &mut in_word);
                if stage.is_empty() {
                    bail!("empty command in pipeline");
                }
                stages.push(std::mem::take(&mut stage));
            }
            '&' => {
                finish_word(&mut stage, &mut word, &mut in_word);
                background = true;
            }
            c if c.is_whitespace() => finish_word(&mut stage, &mut word, &mut in_word),
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    finish_word(&mut stage, &mut word, &mut in_word);

    if stage.is_empty() {
        if stages.is_empty() && !background {
            return Ok(None);
        }
        bail!("empty command in pipeline");
    }
    stages.push(stage);

    Ok(Some(ParsedLine {
        stages,
        background,
        text: text.to_string(),
    }))
}

fn finish_word(stage: &mut Vec<String>, word: &mut String, in_word: &mut bool) {
    if *in_word {
        stage.push(std::mem::take(word));
        *in_word = false;
    }
}
