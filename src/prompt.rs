//! Interactive prompts
//!
//! Thin adapter from a terminal session to a [`PublishRequest`]. Only the
//! values missing from the command line are asked for.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::pipeline::PublishRequest;
use crate::version::{VersionBump, VersionError};

/// Prompt errors
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("input closed while waiting for: {0}")]
    Eof(String),

    #[error("empty answer for: {0}")]
    Empty(String),

    #[error(transparent)]
    Version(#[from] VersionError),
}

/// Values already known before prompting
#[derive(Debug, Clone, Default)]
pub struct RequestDraft {
    pub source_dir: Option<PathBuf>,
    pub bump: Option<VersionBump>,
    pub changelog: Vec<String>,
    pub stable: Option<bool>,
    pub resume: bool,
}

/// Line-oriented prompter over any reader/writer pair
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Fill in the missing parts of `draft`
    pub fn complete(&mut self, draft: RequestDraft) -> Result<PublishRequest, PromptError> {
        let source_dir = match draft.source_dir {
            Some(dir) => dir,
            None => self.source_dir()?,
        };

        // A resumed run keeps its recorded target version, changelog and stable flag
        let bump = match (draft.bump, draft.resume) {
            (Some(bump), _) => bump,
            (None, true) => VersionBump::Patch,
            (None, false) => {
                let answer = self.ask("Enter version increment (patch/minor/major): ")?;
                answer.parse()?
            }
        };

        let given = draft.changelog.iter().any(|item| !item.trim().is_empty());
        let changelog = if draft.resume || given {
            draft.changelog
        } else {
            self.changelog()?
        };

        let stable = match (draft.stable, draft.resume) {
            (Some(stable), _) => stable,
            (None, true) => false,
            (None, false) => self.confirm("Mark this version as stable? (y/n): ")?,
        };

        Ok(PublishRequest {
            source_dir,
            bump,
            changelog,
            stable,
            resume: draft.resume,
        })
    }

    /// Plugin directory
    pub fn source_dir(&mut self) -> Result<PathBuf, PromptError> {
        let question = "Enter the plugin directory path: ";
        let answer = self.ask(question)?;
        if answer.is_empty() {
            return Err(PromptError::Empty(question.trim_end_matches(": ").to_string()));
        }
        Ok(PathBuf::from(answer))
    }

    /// Changelog items, one per line, until a blank line or end of input
    pub fn changelog(&mut self) -> Result<Vec<String>, PromptError> {
        writeln!(
            self.output,
            "Enter changelog (one item per line, enter blank line to finish):"
        )?;
        self.output.flush()?;

        let mut items = Vec::new();
        loop {
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            items.push(line.to_string());
        }
        Ok(items)
    }

    /// Yes/no question; only `y` or `yes` (any case) count as yes
    pub fn confirm(&mut self, question: &str) -> Result<bool, PromptError> {
        let answer = self.ask(question)?.to_ascii_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    fn ask(&mut self, question: &str) -> Result<String, PromptError> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(PromptError::Eof(question.trim_end_matches(": ").to_string()));
        }
        Ok(line.trim().to_string())
    }
}
