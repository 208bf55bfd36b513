use regex::Regex;
use tracing::{debug, error};

use crate::errors::CommunicationError;
use crate::record::{CommandRecord, Mode};
use crate::vocabulary::Vocabulary;

/// ATC digit words, spoken one digit at a time.
const DIGIT_WORDS: [(&str, &str); 11] = [
    ("zero", "0"),
    ("one", "1"),
    ("two", "2"),
    ("three", "3"),
    ("four", "4"),
    ("five", "5"),
    ("six", "6"),
    ("seven", "7"),
    ("eight", "8"),
    ("nine", "9"),
    ("niner", "9"),
];

/// Converts inbound command lines from the speech recognizer into parsed
/// command records.
#[derive(Debug)]
pub struct Parser {
    call_sign: String,
    vocab: Vocabulary,
    digit_gap: Regex,
}

impl Parser {
    pub fn new(call_sign: &str, vocab: Vocabulary) -> Parser {
        Parser {
            call_sign: call_sign.to_string(),
            vocab,
            digit_gap: Regex::new(r"(\d)\s(\d)").expect("static pattern"),
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Parse one input line into command records. Parse failures are
    /// captured as `None` sentinels; this never fails to the caller.
    pub fn handle_command(&self, line: &str) -> Vec<Option<CommandRecord>> {
        let mut records = Vec::new();
        let line = self.normalize_numbers(line);
        if let Err(e) = self.check_call_sign(&line) {
            error!("{e}");
            records.push(None);
            return records;
        }
        if let Err(e) = self.handle_phrase_queue(&line, &mut records) {
            error!("{e}");
            records.push(None);
        }
        records
    }

    /// Replace spoken digits by their figures, then join adjacent figures:
    /// "flight level five zero" becomes "flight level 50".
    pub fn normalize_numbers(&self, line: &str) -> String {
        let mut text = line
            .split_whitespace()
            .map(|token| {
                DIGIT_WORDS
                    .iter()
                    .find(|(word, _)| *word == token)
                    .map(|(_, digit)| *digit)
                    .unwrap_or(token)
            })
            .collect::<Vec<&str>>()
            .join(" ");
        loop {
            let joined =
                self.digit_gap.replace_all(&text, "${1}${2}").into_owned();
            if joined == text {
                return text;
            }
            text = joined;
        }
    }

    fn check_call_sign(&self, line: &str) -> Result<(), CommunicationError> {
        let mut tokens = line.split_whitespace();
        let first = tokens.next().unwrap_or_default();
        let candidate = match tokens.next() {
            Some(second)
                if !second.is_empty()
                    && second.chars().all(|c| c.is_ascii_digit()) =>
            {
                format!("{first}{second}")
            }
            _ => first.to_string(),
        };
        if candidate != self.call_sign {
            return Err(CommunicationError(format!(
                "Call sign '{candidate}' not recognized"
            )));
        }
        Ok(())
    }

    /// Split the line at verb boundaries and decode each phrase. The next
    /// verb bounds the current phrase; the recursion resumes at its start.
    fn handle_phrase_queue(
        &self,
        phrase: &str,
        records: &mut Vec<Option<CommandRecord>>,
    ) -> Result<(), CommunicationError> {
        if phrase.is_empty() {
            return Ok(());
        }
        let Some(first) = self.vocab.find_verb(phrase) else {
            return Err(CommunicationError(format!(
                "Phrase '{}' does not contain known command",
                phrase.trim()
            )));
        };
        let (i1, i2, mode) = (first.start, first.end, first.mode);
        let j1 = match self.vocab.find_verb(&phrase[i2..]) {
            Some(next) => next.start,
            None => phrase.len(),
        };
        let end = (i2 + j1).min(phrase.len());
        self.handle_phrase(&phrase[i1..end], mode, records);
        let rest = j1.min(phrase.len());
        if rest == 0 {
            // adjacent verbs would recurse without progress
            return Ok(());
        }
        self.handle_phrase_queue(&phrase[rest..], records)
    }

    fn handle_phrase(
        &self,
        phrase: &str,
        mode: Mode,
        records: &mut Vec<Option<CommandRecord>>,
    ) {
        debug!("Handle phrase '{phrase}'");
        let nouns = self.vocab.nouns(mode);
        if nouns.is_empty() {
            debug!("Mode {mode} is without expected parameters");
            records.push(Some(CommandRecord::bare(mode, phrase)));
            return;
        }
        let mut found_match = false;
        for pattern in nouns {
            if let Some(record) = self.vocab.decode(pattern, phrase, mode) {
                records.push(Some(record));
                found_match = true;
            }
        }
        if !found_match {
            debug!("Phrase '{phrase}' does not contain expected parameters");
        }
    }
}
