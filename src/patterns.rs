/// Ordered regex matcher chains, one chain per log concept.
///
/// The game writes French, and depending on client locale and font the same
/// message may appear with or without accents, or in a slightly different
/// shape ("Concentration (+20 Niv.)", "Concentration: 20", "20 Concentration").
/// Each concept is therefore a list of variants tried in priority order; the
/// first variant that matches (and, for captures, yields an in-range integer)
/// wins. All variants are compiled case-insensitive.
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::ops::RangeInclusive;

/// Accepted range for any captured gauge / counter value.
pub const VALUE_RANGE: RangeInclusive<u32> = 0..=1000;

#[derive(Debug, Clone)]
pub struct MatcherChain {
    variants: Vec<Regex>,
}

impl MatcherChain {
    /// Invalid variants are logged and skipped rather than failing the chain.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let variants = patterns
            .iter()
            .filter_map(|p| {
                Regex::new(&format!("(?i){}", p.as_ref()))
                    .map_err(|e| tracing::warn!("Skipping bad pattern {:?}: {}", p.as_ref(), e))
                    .ok()
            })
            .collect();
        Self { variants }
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.variants.iter().any(|re| re.is_match(line))
    }

    /// Captures of the first variant that matches.
    pub fn captures<'l>(&self, line: &'l str) -> Option<Captures<'l>> {
        self.variants.iter().find_map(|re| re.captures(line))
    }

    /// First capture group of the first variant whose capture parses to an
    /// integer inside `range`. A variant that matches with an unusable value
    /// does not stop the search.
    pub fn capture_value(&self, line: &str, range: &RangeInclusive<u32>) -> Option<u32> {
        self.variants.iter().find_map(|re| {
            let value: u32 = re.captures(line)?.get(1)?.as_str().parse().ok()?;
            range.contains(&value).then_some(value)
        })
    }
}

// ---------------------------------------------------------------------------
// Gauge chains
// ---------------------------------------------------------------------------

/// Build the four gauge shapes for every spelling of a gauge name, ordered
/// shape-major so the accented spelling of a shape is tried before the
/// unaccented one.
pub fn gauge_chain(spellings: &[&str]) -> MatcherChain {
    let shapes: [fn(&str) -> String; 4] = [
        |n| format!(r"{}\s*\(?\+\s*(\d+)\s*niv\.?\)?", n),   // "Concentration (+20 Niv.)"
        |n| format!(r"{}\s*[:\-]?\s*\(?\+\s*(\d+)", n),       // "Concentration: +20"
        |n| format!(r"{}\s*[:\-]?\s*(\d+)", n),               // "Concentration: 20"
        |n| format!(r"(\d+)\s*{}", n),                        // "20 Concentration"
    ];
    let patterns: Vec<String> = shapes
        .iter()
        .flat_map(|shape| spellings.iter().map(move |name| shape(name)))
        .collect();
    MatcherChain::new(&patterns)
}

// ---------------------------------------------------------------------------
// Marker chains
// ---------------------------------------------------------------------------

pub static CLASS_IOP: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[r"\biop\b", r"classe.*\biop\b"])
});

pub static CLASS_CRA: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[r"\bcra\b", r"\bcrâ\b", r"classe.*\bcra\b", r"classe.*\bcrâ\b"])
});

pub static COMBAT_END: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[
        r"\[Information \(combat\)\].*combat terminé.*cliquez ici pour rouvrir",
        r"\[Information \(combat\)\].*combat terminé.*fin de combat",
        r"combat terminé.*cliquez ici pour rouvrir l'écran de fin de combat",
        r"\[Information \(combat\)\].*combat termine.*cliquez ici pour rouvrir",
        r"combat termine.*cliquez ici pour rouvrir l'ecran de fin de combat",
    ])
});

/// "X seconde(s) reportée(s) pour le tour suivant"
pub static TURN_ADVANCE: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[
        r"\d+\s+seconde(?:\(s\)|s)?\s+reportée(?:\(s\)|s)?\s+pour\s+le\s+tour\s+suivant",
        r"\d+\s+seconde(?:\(s\)|s)?\s+reportee(?:\(s\)|s)?\s+pour\s+le\s+tour\s+suivant",
    ])
});

/// "-2 PA max (Parti pris)"
pub static DEBUFF_THRESHOLD: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[
        r"-2\s*PA\s*max\s*\(parti\s*pris\)",
        r"-2\s*PA\s*max.*parti\s*pris",
        r"parti\s*pris.*-2\s*PA",
    ])
});

/// "La Pointe affûtée est prête !"
pub static BUFF_READY: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[
        r"la\s+pointe\s+affûtée\s+est\s+prête",
        r"la\s+pointe\s+affutee\s+est\s+prete",
        r"pointe\s+affûtée\s+est\s+prête",
        r"pointe\s+affutee\s+est\s+prete",
        r"pointe\s+affûtée.*prête",
        r"pointe\s+affutee.*prete",
        r"pointe.*affûtée.*prête",
        r"pointe.*affutee.*prete",
    ])
});

/// "Consomme Pointe affûtée"
pub static BUFF_CONSUMED: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[
        r"consomme\s+pointe\s+affûtée",
        r"consomme\s+pointe\s+affutee",
        r"consomme.*pointe\s+affûtée",
        r"consomme.*pointe\s+affutee",
    ])
});

/// "Balise affûtée (+X Niv.)": absolute counter value.
pub static COUNTER_SET: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[
        r"balise\s+affûtée\s+\(\+(\d+)\s*niv\.?\)",
        r"balise\s+affutee\s+\(\+(\d+)\s*niv\.?\)",
        r"balise.*affûtée.*\(\+(\d+)\s*niv\.?\)",
        r"balise.*affutee.*\(\+(\d+)\s*niv\.?\)",
    ])
});

/// "lance le sort Balise": one counter unit consumed.
pub static COUNTER_DECREMENT: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[r"lance\s+le\s+sort\s+balise", r"lançe\s+le\s+sort\s+balise"])
});

/// "XXX lance le sort ZZZ": group 1 is the caster token, group 2 the
/// raw action text up to end of line or a trailing "[" annotation.
pub static CAST: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[
        r"(\S+)\s+lance\s+le\s+sort\s+(.+?)\s*(?:\[|$)",
        r"(\S+)\s+lançe\s+le\s+sort\s+(.+?)\s*(?:\[|$)",
        r"()lance\s+le\s+sort\s+(.+?)\s*(?:\[|$)",
    ])
});

/// "X se rapproche de N case(s)"
pub static CLOSES_DISTANCE: Lazy<MatcherChain> = Lazy::new(|| {
    MatcherChain::new(&[r"se\s+rapproche\s+de\s+(\d+)\s+case(?:\(s\)|s)?"])
});

pub static PARENTHESIZED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*\([^)]*\)\s*").unwrap()
});
