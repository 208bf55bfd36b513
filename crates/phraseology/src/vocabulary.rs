use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::errors::GrammarError;
use crate::record::{
    Argument, Clearance, ClearanceKind, CommandRecord, Condition, Fix, Mode,
};

const DEFAULT_GRAMMAR: &str = include_str!("phraseology.yaml");

/// Raw shape of the YAML grammar configuration.
#[derive(Debug, Deserialize)]
struct RawGrammar {
    #[serde(rename = "MODES")]
    modes: Option<BTreeMap<String, u8>>,
    #[serde(rename = "VERBS")]
    verbs: Option<BTreeMap<String, Vec<String>>>,
    #[serde(rename = "NOUNS")]
    nouns: Option<BTreeMap<String, Vec<String>>>,
    #[serde(rename = "POSITIONS")]
    positions: Option<BTreeMap<String, [f64; 4]>>,
}

/// A verb hit inside a phrase: the anchor for segmentation.
#[derive(Debug, Clone, Copy)]
pub struct VerbMatch<'a> {
    pub start: usize,
    pub end: usize,
    pub pattern: &'a Regex,
    pub mode: Mode,
}

/// The grammar tables, loaded once and immutable thereafter.
#[derive(Debug)]
pub struct Vocabulary {
    /// Verb patterns grouped by mode, in declared rank order.
    verbs: Vec<(Mode, Vec<Regex>)>,
    nouns: BTreeMap<Mode, Vec<Regex>>,
    positions: BTreeMap<String, Fix>,
}

impl Vocabulary {
    /// Load the grammar shipped with the crate.
    pub fn load_default() -> Result<Vocabulary, GrammarError> {
        Vocabulary::from_yaml(DEFAULT_GRAMMAR)
    }

    pub fn from_path(path: &Path) -> Result<Vocabulary, GrammarError> {
        Vocabulary::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn from_yaml(source: &str) -> Result<Vocabulary, GrammarError> {
        let raw: RawGrammar = serde_yaml::from_str(source)?;
        let modes = raw.modes.ok_or(GrammarError::MissingTable("MODES"))?;
        let raw_verbs = raw.verbs.ok_or(GrammarError::MissingTable("VERBS"))?;
        let raw_nouns = raw.nouns.ok_or(GrammarError::MissingTable("NOUNS"))?;

        let mut ranks: BTreeMap<Mode, u8> = BTreeMap::new();
        for (name, rank) in &modes {
            let mode = Mode::from_table_name(name)
                .ok_or_else(|| GrammarError::UnknownMode(name.clone()))?;
            ranks.insert(mode, *rank);
        }

        let declared = |name: &str| -> Result<Mode, GrammarError> {
            Mode::from_table_name(name)
                .filter(|mode| ranks.contains_key(mode))
                .ok_or_else(|| GrammarError::UnknownMode(name.to_string()))
        };

        let mut verbs: Vec<(Mode, Vec<Regex>)> = Vec::new();
        for (name, patterns) in &raw_verbs {
            verbs.push((declared(name)?, compile(patterns)?));
        }
        // the scan order of `find_verb` follows the declared ranks
        verbs.sort_by_key(|(mode, _)| ranks[mode]);

        let mut nouns: BTreeMap<Mode, Vec<Regex>> = BTreeMap::new();
        for (name, patterns) in &raw_nouns {
            let mode = declared(name)?;
            let compiled = compile(patterns)?;
            if mode != Mode::Position
                && !compiled.iter().any(|re| has_group(re, "val"))
            {
                return Err(GrammarError::MissingValCapture(name.clone()));
            }
            nouns.insert(mode, compiled);
        }

        let positions = raw
            .positions
            .unwrap_or_default()
            .into_iter()
            .map(|(name, [lat, lon, alt, yaw])| {
                (name, Fix::new(lat, lon, alt, yaw))
            })
            .collect();

        Ok(Vocabulary {
            verbs,
            nouns,
            positions,
        })
    }

    pub fn position(&self, name: &str) -> Option<Fix> {
        self.positions.get(name).copied()
    }

    pub fn positions(&self) -> &BTreeMap<String, Fix> {
        &self.positions
    }

    /// Noun patterns for a mode; empty when the mode takes no parameters.
    pub fn nouns(&self, mode: Mode) -> &[Regex] {
        self.nouns.get(&mode).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Scan all verb patterns across all modes and return the match with
    /// the lowest start index. Ties break by declared mode rank, then by
    /// pattern declaration order.
    pub fn find_verb(&self, phrase: &str) -> Option<VerbMatch<'_>> {
        let mut best: Option<VerbMatch> = None;
        for (mode, patterns) in &self.verbs {
            for pattern in patterns {
                if let Some(m) = pattern.find(phrase) {
                    if best.map_or(true, |b| m.start() < b.start) {
                        best = Some(VerbMatch {
                            start: m.start(),
                            end: m.end(),
                            pattern,
                            mode: *mode,
                        });
                    }
                }
            }
        }
        best
    }

    /// Search `pattern` in `phrase` and build a command record, applying
    /// the mode-specific conversion of the captured parameters.
    pub fn decode(
        &self,
        pattern: &Regex,
        phrase: &str,
        mode: Mode,
    ) -> Option<CommandRecord> {
        let caps = pattern.captures(phrase)?;
        let matched = caps.get(0)?.as_str().to_string();
        let arg = match mode {
            Mode::Altitude => decode_altitude(&caps).map(Argument::Altitude),
            Mode::Heading => caps
                .name("val")
                .and_then(|v| v.as_str().parse().ok())
                .map(Argument::Heading),
            Mode::Position => {
                let fix = self.position(&matched)?;
                Some(Argument::Position(fix))
            }
            Mode::Clearance => {
                Some(Argument::Clearance(self.decode_clearance(&caps)?))
            }
            Mode::Contact => caps
                .name("val")
                .map(|v| Argument::Contact(v.as_str().to_string())),
            Mode::Condition => {
                self.decode_condition(&caps).map(Argument::Condition)
            }
            Mode::Report => caps
                .name("val")
                .map(|v| Argument::Report(v.as_str().to_string())),
            _ => None,
        };
        Some(CommandRecord {
            mode,
            phrase: phrase.to_string(),
            matched,
            arg,
        })
    }

    fn decode_clearance(&self, caps: &regex::Captures) -> Option<Clearance> {
        let kind = ClearanceKind::from_capture(caps.name("type")?.as_str())?;
        let mut clearance = Clearance {
            kind,
            position: None,
            description: None,
        };
        if matches!(kind, ClearanceKind::Ils | ClearanceKind::Land) {
            if let (Some(val), Some(unit)) =
                (caps.name("val"), caps.name("unit"))
            {
                let description =
                    format!("{} {}", val.as_str(), unit.as_str());
                clearance.position = self.position(&description);
                clearance.description = Some(description);
            }
        }
        Some(clearance)
    }

    fn decode_condition(&self, caps: &regex::Captures) -> Option<Condition> {
        let val = caps.name("val")?.as_str();
        if let Some(fix) = self.position(val) {
            return Some(Condition::Position(fix));
        }
        if let Some(altitude) = decode_altitude(caps) {
            return Some(Condition::Altitude(altitude));
        }
        val.parse().ok().map(Condition::Altitude)
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, GrammarError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| {
                GrammarError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                }
            })
        })
        .collect()
}

fn has_group(re: &Regex, name: &str) -> bool {
    re.capture_names().any(|n| n == Some(name))
}

fn decode_altitude(caps: &regex::Captures) -> Option<f64> {
    let val: f64 = caps.name("val")?.as_str().parse().ok()?;
    let unit = caps.name("unit")?.as_str();
    let meters = match unit {
        "flight level" | "flightlevel" | "FL" | "fl" => val * 30.48 * 0.01,
        "ft" | "feet" => val * 0.3048 * 0.01,
        other => {
            debug!("unknown altitude unit '{other}'");
            return None;
        }
    };
    Some(meters)
}
