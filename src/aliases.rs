//! Team name normalization and alias resolution.
//!
//! Bookmaker copy and exchange runner labels rarely agree on a team's
//! name ("Man Utd", "Manchester United", "Man United"). The resolver
//! holds a normalized alias index built from an inventory file of
//! exchange runner labels, merged with a small built-in synonym table
//! for the names bookmakers abbreviate most often.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Fold the Latin-1/Latin Extended-A letters that turn up in European
/// club names to their ASCII base character.
fn fold_char(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'č' => 'c',
        'ď' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ğ' => 'g',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => 'i',
        'ľ' | 'ł' => 'l',
        'ñ' | 'ń' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => 'o',
        'ř' => 'r',
        'ş' | 'ś' | 'š' => 's',
        'ť' | 'ţ' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => 'u',
        'ý' | 'ÿ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        other => other,
    }
}

/// Canonical comparison key for a team name: diacritics folded,
/// lowercased, "saint" collapsed to "st", club suffix tokens (fc, afc,
/// cf) dropped, punctuation flattened to single spaces.
pub fn normalize(name: &str) -> String {
    let folded: String = name.chars().flat_map(char::to_lowercase).map(fold_char).collect();
    let spaced: String = folded
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    spaced
        .split_whitespace()
        .map(|tok| if tok == "saint" { "st" } else { tok })
        .filter(|tok| !matches!(*tok, "fc" | "afc" | "cf"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Inventory file format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    teams: Vec<InventoryTeam>,
}

#[derive(Debug, Deserialize)]
struct InventoryTeam {
    canonical: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Synonym groups that bookmakers use but exchange inventories rarely
/// carry. Each group maps to one normalized key.
const BUILTIN_SYNONYMS: &[&[&str]] = &[
    &["PSG", "Paris SG", "Paris St Germain", "Paris St-G", "Paris St G", "Paris Saint-Germain"],
    &["Tottenham Hotspur", "Tottenham", "Spurs"],
    &["Leicester City", "Leicester"],
    &["Birmingham City", "Birmingham"],
    &["Exeter City", "Exeter"],
    &["Cheltenham Town", "Cheltenham"],
    &["Sheffield United", "Sheffield Utd", "Sheff Utd"],
    &["Huddersfield Town", "Huddersfield"],
];

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Alias index keyed by normalized name. Every alias in a group maps to
/// the full set of display labels for that group, so a query through any
/// alias yields all spellings worth searching the exchange with.
pub struct TeamAliasResolver {
    index: HashMap<String, BTreeSet<String>>,
    source: Option<PathBuf>,
}

impl TeamAliasResolver {
    /// Build the index from an inventory file. A missing or unreadable
    /// file is not fatal: the resolver falls back to built-ins only and
    /// every query still includes the original name.
    pub fn load(path: Option<&Path>) -> Self {
        let mut index: HashMap<String, BTreeSet<String>> = HashMap::new();

        if let Some(path) = path {
            match Self::read_inventory(path) {
                Ok(teams) => {
                    let mut labels = 0usize;
                    for team in &teams {
                        let mut group: Vec<&str> = vec![team.canonical.as_str()];
                        group.extend(team.aliases.iter().map(String::as_str));
                        labels += group.len();
                        Self::index_group(&mut index, &group);
                    }
                    debug!(teams = teams.len(), labels, path = %path.display(), "loaded team inventory");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "team inventory unavailable, using built-in synonyms only");
                }
            }
        }

        for group in BUILTIN_SYNONYMS {
            Self::index_group(&mut index, group);
        }

        Self { index, source: path.map(Path::to_path_buf) }
    }

    /// Rebuild the index from the same inventory path.
    pub fn reload(&mut self) {
        *self = Self::load(self.source.as_deref());
    }

    fn read_inventory(path: &Path) -> Result<Vec<InventoryTeam>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read team inventory {}", path.display()))?;
        let file: InventoryFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse team inventory {}", path.display()))?;
        Ok(file.teams)
    }

    /// Union every member's label set under every member's key, so the
    /// group stays symmetric regardless of which spelling is queried.
    fn index_group(index: &mut HashMap<String, BTreeSet<String>>, labels: &[&str]) {
        let mut merged: BTreeSet<String> = labels.iter().map(|l| l.to_string()).collect();
        for label in labels {
            if let Some(existing) = index.get(&normalize(label)) {
                merged.extend(existing.iter().cloned());
            }
        }
        for label in &merged.clone() {
            index.entry(normalize(label)).or_default().extend(merged.iter().cloned());
        }
    }

    /// Exchange search queries for a team. The original name always
    /// comes first; known aliases follow in stable order.
    pub fn queries(&self, team: &str) -> Vec<String> {
        let mut out = vec![team.to_string()];
        if let Some(group) = self.index.get(&normalize(team)) {
            for label in group {
                if !out.iter().any(|q| q.eq_ignore_ascii_case(label)) {
                    out.push(label.clone());
                }
            }
        }
        out
    }

    /// Whether an exchange runner label refers to the given team: exact
    /// normalized equality against any query, or the normalized runner
    /// containing the normalized query as a substring ("Man City" inside
    /// "Manchester City Women" would match, which is why callers scope
    /// searches to a market type first).
    pub fn matches_runner(&self, runner_name: &str, team: &str) -> bool {
        let runner_norm = normalize(runner_name);
        if runner_norm.is_empty() {
            return false;
        }
        for query in self.queries(team) {
            let q = normalize(&query);
            if q.is_empty() {
                continue;
            }
            if runner_norm == q || runner_norm.contains(&q) {
                return true;
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
