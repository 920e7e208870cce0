//! Boost-offer extraction from bookmaker page snapshots.
//!
//! The parser is a single synchronous pass over an in-memory HTML
//! document. It scans for boosted-odds buttons anywhere in the document
//! (offers sometimes render outside the expected section container),
//! walks up to the enclosing selection row for the bet text, and
//! classifies the cleaned text into one of three multiple shapes.
//!
//! Parse-level failures are soft: a row with missing odds, a player
//! prop, or an unclassifiable description is skipped with a debug
//! trace. Most scraped text is noise; skipping is the normal path.

use anyhow::{anyhow, Result};
use chrono::Utc;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::debug;

use crate::types::{BoostOffer, Leg, OfferKind};

const BOOKIE: &str = "William Hill";
const SPORT: &str = "Football";

/// Decimal bounds for prices derived from fractional-odds text. Values
/// outside these are parse artifacts, not real boosts.
const FRACTION_DEC_MIN: f64 = 1.2;
const FRACTION_DEC_MAX: f64 = 200.0;

/// Offers never combine more than this many teams.
const MAX_TEAMS: usize = 8;

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Compiled selectors and patterns for one bookmaker's boost page.
pub struct BoostParser {
    sel_boost_button: Selector,
    sel_row_name: Selector,
    sel_button_odds: Selector,
    re_fraction: Regex,
    re_was_fragment: Regex,
    re_trailing_paren: Regex,
    re_player_prop: Regex,
    re_all_to_win: Regex,
    re_over_each: Regex,
    re_both_win_score: Regex,
    re_split_teams: Regex,
    re_strip_words: Regex,
    re_strip_punct: Regex,
    re_man_utd: Regex,
    re_man_city: Regex,
    re_spurs: Regex,
    re_psg: Regex,
    re_residual_to_win: Regex,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {css:?}: {e}"))
}

impl BoostParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sel_boost_button: selector(
                "button.betbutton--enhanced-odds, button.enhanced-offers__button",
            )?,
            sel_row_name: selector(".btmarket__name span")?,
            sel_button_odds: selector(".betbutton__odds")?,
            re_fraction: Regex::new(r"^(\d{1,3})\s*/\s*(\d{1,2})$")?,
            re_was_fragment: Regex::new(r"(?i)\s+Was\s+\d+\s*/\s*\d+.*$")?,
            re_trailing_paren: Regex::new(r"\s*\([^)]*\)\s*$")?,
            re_player_prop: Regex::new(r"(?i)Both\s+To\s+Score\s+Anytime")?,
            re_all_to_win: Regex::new(r"(?i)^(.*)\s+All\s+To\s+Win\b")?,
            re_over_each: Regex::new(
                r"(?i)Over\s+(\d+(?:\.5)?)\s+Goals?\s+In\s+Each\s+Of\s+(?:[A-Za-z]+['’]s\s+)?(\d+)\s+(.+?)\s+Matches",
            )?,
            re_both_win_score: Regex::new(
                r"(?i)^(.*)\s+Both\s+To\s+Win\s*&\s*All\s+(\d+)\s+Teams\s+To\s+Score\b",
            )?,
            // No boundary around `×`: it is not a word character, so
            // `\b×\b` can never match when spaces surround it.
            re_split_teams: Regex::new(r"(?i)\s*(?:&|\+|,|\bx\b|×|\band\b)\s*")?,
            re_strip_words: Regex::new(
                r"(?i)\b(to\s+win|both\s+to\s+win|win|match|result|either|team|teams)\b",
            )?,
            re_strip_punct: Regex::new(r"[()\-–•·]")?,
            re_man_utd: Regex::new(r"(?i)\bMan\.?\s*Utd\b")?,
            re_man_city: Regex::new(r"(?i)\bMan\.?\s*City\b")?,
            re_spurs: Regex::new(r"(?i)\bSpurs\b")?,
            re_psg: Regex::new(r"(?i)\bPSG\b")?,
            re_residual_to_win: Regex::new(r"(?i)to\s*win")?,
        })
    }

    /// Extract every classifiable boost offer, in document order.
    /// Same input yields the same offers, fields and signatures.
    pub fn parse(&self, html: &str, source_url: &str) -> Vec<BoostOffer> {
        let doc = Html::parse_document(html);
        let today = Utc::now().date_naive();
        let mut offers = Vec::new();

        for button in doc.select(&self.sel_boost_button) {
            let Some(row) = enclosing_selection_row(button) else {
                continue;
            };
            let Some(raw_name) = row.select(&self.sel_row_name).next() else {
                continue;
            };
            let bet_text = self.clean_bet_text(&squash_whitespace(&collect_text(raw_name)));
            if bet_text.is_empty() {
                continue;
            }
            if self.re_player_prop.is_match(&bet_text) {
                debug!(text = %bet_text, "skipping player prop");
                continue;
            }
            let Some(boosted_odds) = self.button_odds(button) else {
                debug!(text = %bet_text, "no boosted odds on row");
                continue;
            };
            let Some((kind, legs)) = self.classify(&bet_text) else {
                debug!(text = %bet_text, "unclassified boost text");
                continue;
            };

            let signature = BoostOffer::signature_for_day(SPORT, kind, &legs, today);
            offers.push(BoostOffer {
                bookie: BOOKIE.to_string(),
                sport: SPORT.to_string(),
                kind,
                bet_text,
                boosted_odds,
                legs,
                source_url: source_url.to_string(),
                signature,
            });
        }
        offers
    }

    // -- text cleanup --

    /// Drop the trailing "Was X/Y ..." previous-odds fragment and a
    /// trailing parenthetical qualifier like "(90 mins)".
    fn clean_bet_text(&self, raw: &str) -> String {
        let s = self.re_was_fragment.replace(raw, "");
        let s = self.re_trailing_paren.replace(&s, "");
        s.trim().to_string()
    }

    /// Fractional odds text to decimal, bounded to plausible prices.
    fn fraction_to_decimal(&self, frac: &str) -> Option<f64> {
        let caps = self.re_fraction.captures(frac.trim())?;
        let num: f64 = caps[1].parse().ok()?;
        let denom: f64 = caps[2].parse().ok()?;
        if denom == 0.0 {
            return None;
        }
        let dec = 1.0 + num / denom;
        (FRACTION_DEC_MIN..=FRACTION_DEC_MAX).contains(&dec).then_some(dec)
    }

    /// Boosted odds from the button: structured num/denom attributes
    /// first, then the data-odds attribute or embedded fraction text.
    fn button_odds(&self, button: ElementRef<'_>) -> Option<f64> {
        let num = button.value().attr("data-num").and_then(|v| v.parse::<f64>().ok());
        let denom = button.value().attr("data-denom").and_then(|v| v.parse::<f64>().ok());
        if let (Some(num), Some(denom)) = (num, denom) {
            if denom > 0.0 {
                return Some(1.0 + num / denom);
            }
        }
        if let Some(frac) = button.value().attr("data-odds") {
            return self.fraction_to_decimal(frac);
        }
        let text = button
            .select(&self.sel_button_odds)
            .next()
            .map(|el| squash_whitespace(&collect_text(el)))?;
        self.fraction_to_decimal(&text)
    }

    // -- classification --

    /// Try the three known multiple shapes in order; first match wins.
    fn classify(&self, text: &str) -> Option<(OfferKind, Vec<Leg>)> {
        self.classify_all_to_win(text)
            .or_else(|| self.classify_over_each_match(text))
            .or_else(|| self.classify_both_to_win_all_score(text))
    }

    fn classify_all_to_win(&self, text: &str) -> Option<(OfferKind, Vec<Leg>)> {
        let caps = self.re_all_to_win.captures(text)?;
        let teams = self.extract_teams(&caps[1]);
        if teams.len() < 2 {
            return None;
        }
        let legs = teams.into_iter().map(|team| Leg::MatchOdds { team }).collect();
        Some((OfferKind::AllToWin, legs))
    }

    fn classify_over_each_match(&self, text: &str) -> Option<(OfferKind, Vec<Leg>)> {
        let caps = self.re_over_each.captures(text)?;
        let line: f64 = caps[1].parse().ok()?;
        let match_count: usize = caps[2].parse().ok()?;
        let competition = caps[3].trim().to_string();
        if match_count == 0 {
            return None;
        }
        let legs = (0..match_count)
            .map(|_| Leg::OverGoals { line, competition: competition.clone() })
            .collect();
        Some((OfferKind::OverEachMatch, legs))
    }

    fn classify_both_to_win_all_score(&self, text: &str) -> Option<(OfferKind, Vec<Leg>)> {
        let caps = self.re_both_win_score.captures(text)?;
        let teams = self.extract_teams(&caps[1]);
        if teams.len() < 2 {
            return None;
        }
        let legs = teams.into_iter().map(|team| Leg::MatchOddsBtts { team }).collect();
        Some((OfferKind::BothToWinAllScore, legs))
    }

    // -- team extraction --

    /// Split a team-list segment on connector tokens, normalize each
    /// fragment, drop short/empty ones, de-duplicate case-insensitively.
    fn extract_teams(&self, segment: &str) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        let mut teams = Vec::new();
        for part in self.re_split_teams.split(segment) {
            let team = self.normalize_team(part);
            if team.len() < 3 || !team.chars().any(|c| c.is_alphabetic()) {
                continue;
            }
            if self.re_residual_to_win.is_match(&team) {
                continue;
            }
            let key = team.to_lowercase();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            teams.push(team);
            if teams.len() == MAX_TEAMS {
                break;
            }
        }
        teams
    }

    /// Strip bet-phrase words, expand common bookmaker abbreviations,
    /// title-case the result.
    fn normalize_team(&self, raw: &str) -> String {
        let s = self.re_strip_words.replace_all(raw, " ");
        let s = self.re_strip_punct.replace_all(&s, " ");
        let s = squash_whitespace(&s);
        let s = self.re_man_utd.replace(&s, "Manchester United");
        let s = self.re_man_city.replace(&s, "Manchester City");
        let s = self.re_spurs.replace(&s, "Tottenham");
        let s = self.re_psg.replace(&s, "Paris Saint-Germain");
        title_case(&s)
    }
}

/// Keep only the best-priced offer per signature, preserving first-seen
/// order. Duplicate sightings within one day collide on the signature.
pub fn pick_best_by_signature(offers: Vec<BoostOffer>) -> Vec<BoostOffer> {
    let mut kept: Vec<BoostOffer> = Vec::new();
    let mut by_sig: HashMap<String, usize> = HashMap::new();
    for offer in offers {
        match by_sig.get(&offer.signature) {
            Some(&i) if kept[i].boosted_odds >= offer.boosted_odds => {}
            Some(&i) => kept[i] = offer,
            None => {
                by_sig.insert(offer.signature.clone(), kept.len());
                kept.push(offer);
            }
        }
    }
    kept
}

// ---------------------------------------------------------------------------
// DOM / text helpers
// ---------------------------------------------------------------------------

/// Nearest ancestor carrying the selection-row class. Buttons sometimes
/// get re-nested by layout changes, so this walks upward rather than
/// assuming a fixed depth.
fn enclosing_selection_row<'a>(el: ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().classes().any(|c| c == "btmarket__selection"))
}

fn collect_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase then uppercase every letter that starts an alphabetic run,
/// so hyphenated names keep both capitals ("Saint-Germain").
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
