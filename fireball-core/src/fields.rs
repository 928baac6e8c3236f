//! Field parsing for semi-structured game-state text.
//!
//! Pure functions, no I/O. Text that does not match an expected shape
//! yields `None` rather than an error.

use once_cell::sync::Lazy;
use regex::Regex;

/// Canonical base classes, in match precedence order.
///
/// Multi-word names come first so that "Blood Hunter" is never read as an
/// archetype of a single-word class.
pub const STANDARD_CLASSES: &[&str] = &[
    "Blood Hunter",
    "Fighter",
    "Wizard",
    "Rogue",
    "Paladin",
    "Ranger",
    "Cleric",
    "Barbarian",
    "Monk",
    "Druid",
    "Warlock",
    "Sorcerer",
    "Bard",
    "Artificer",
];

/// Names that are legitimately both a creature's name and its race.
pub const MONSTER_TYPE_LABELS: &[&str] = &["Skeleton", "Zombie", "Ghost", "Spirit", "Elemental"];

static HEALTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<(\d+)/(\d+) HP; (.+?)>").expect("valid health regex"));

static CLASS_FALLBACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z\s]+?)\s+(\d+)$").expect("valid class regex"));

static SPELL_COMMAND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^!c(?:ast)?\s+([a-z\s]+)").expect("valid spell regex"));

static DAMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\w+)\s+took\s+(\d+)\s+damage").expect("valid damage regex"));

static OPAQUE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]{10,}$").expect("valid id regex"));

/// Per-class patterns: `Base (Archetype) Level`, `Archetype Base Level`, `Base Level`.
struct ClassPatterns {
    canonical: &'static str,
    parenthesized: Regex,
    prefixed: Regex,
    bare: Regex,
}

static CLASS_PATTERNS: Lazy<Vec<ClassPatterns>> = Lazy::new(|| {
    STANDARD_CLASSES
        .iter()
        .map(|&canonical| {
            let base = canonical
                .split(' ')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s*");
            ClassPatterns {
                canonical,
                parenthesized: Regex::new(&format!(r"(?i)^{base}\s+\(([^)]+)\)\s+(\d+)$"))
                    .expect("valid class regex"),
                prefixed: Regex::new(&format!(r"(?i)^(.+?)\s+{base}\s+(\d+)$"))
                    .expect("valid class regex"),
                bare: Regex::new(&format!(r"(?i)^{base}\s+(\d+)$")).expect("valid class regex"),
            }
        })
        .collect()
});

// ============================================
// Health
// ============================================

/// Parsed `<current/max HP; status>` reading.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReading {
    pub current: i64,
    pub max: i64,
    pub percentage: f64,
    pub status: String,
}

/// Parse a health string such as `<45/60 HP; Injured>`.
///
/// Readings whose current value exceeds the maximum are rejected so that
/// stored snapshots always satisfy `hp_current <= hp_max`.
pub fn parse_health(text: &str) -> Option<HealthReading> {
    let caps = HEALTH_RE.captures(text.trim())?;
    let current: i64 = caps[1].parse().ok()?;
    let max: i64 = caps[2].parse().ok()?;
    if current > max {
        return None;
    }
    let percentage = if max > 0 {
        current as f64 / max as f64 * 100.0
    } else {
        0.0
    };
    Some(HealthReading {
        current,
        max,
        percentage,
        status: caps[3].trim().to_string(),
    })
}

// ============================================
// Class
// ============================================

/// Parsed class string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub primary: String,
    pub level: i64,
    pub archetype: Option<String>,
}

/// Parse a class string such as `Champion Fighter 12` or `Ranger 12/Cleric 3`.
///
/// Only the first multiclass segment is used. Unknown class names with a
/// trailing level are accepted as-is; use [`is_standard_class`] to enforce
/// the canonical list.
pub fn parse_class(text: &str) -> Option<ClassInfo> {
    let first = text.split('/').next()?.trim();
    if first.is_empty() {
        return None;
    }

    for patterns in CLASS_PATTERNS.iter() {
        if let Some(caps) = patterns.parenthesized.captures(first) {
            return class_info(patterns.canonical, &caps[2], Some(&caps[1]));
        }
        if let Some(caps) = patterns.prefixed.captures(first) {
            return class_info(patterns.canonical, &caps[2], Some(&caps[1]));
        }
        if let Some(caps) = patterns.bare.captures(first) {
            return class_info(patterns.canonical, &caps[1], None);
        }
    }

    let caps = CLASS_FALLBACK_RE.captures(first)?;
    let name = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() {
        return None;
    }
    class_info(&name, &caps[2], None)
}

fn class_info(primary: &str, level: &str, archetype: Option<&str>) -> Option<ClassInfo> {
    Some(ClassInfo {
        primary: primary.to_string(),
        level: level.parse().ok()?,
        archetype: archetype
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(ToString::to_string),
    })
}

/// True when `primary` is one of the canonical base classes (any casing).
pub fn is_standard_class(primary: &str) -> bool {
    STANDARD_CLASSES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(primary.trim()))
}

// ============================================
// Race
// ============================================

/// Clean a race value read from a character state.
///
/// Rejects races that repeat the character's own name (unless the name is
/// a generic monster label), opaque identifiers, and values carrying quote
/// or bracket characters.
pub fn clean_race(race: Option<&str>, character_name: Option<&str>) -> Option<String> {
    let race = race?.trim();
    if race.is_empty() {
        return None;
    }

    if let Some(name) = character_name.map(str::trim) {
        if race.eq_ignore_ascii_case(name) && !is_monster_label(name) {
            return None;
        }
    }

    if !race.contains(' ') && OPAQUE_ID_RE.is_match(race) {
        return None;
    }

    if race.contains(['"', '\'', '[', ']']) {
        return None;
    }

    Some(race.to_string())
}

/// True for names like "Skeleton" that double as a creature type.
pub fn is_monster_label(name: &str) -> bool {
    MONSTER_TYPE_LABELS
        .iter()
        .any(|label| label.eq_ignore_ascii_case(name.trim()))
}

// ============================================
// Lists and automation text
// ============================================

/// Split a comma-joined list, trimming tokens and skipping empties.
pub fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|t| !t.is_empty())
}

/// Spell name from a `!cast <spell>` / `!c <spell>` command.
pub fn parse_spell_command(command: &str) -> Option<String> {
    let caps = SPELL_COMMAND_RE.captures(command.trim_start())?;
    let spell = caps[1].trim();
    if spell.is_empty() {
        None
    } else {
        Some(spell.to_string())
    }
}

/// Every `<word> took <n> damage` occurrence as `(target, amount)`.
pub fn parse_damage(text: &str) -> Vec<(String, i64)> {
    DAMAGE_RE
        .captures_iter(text)
        .filter_map(|caps| Some((caps[1].to_string(), caps[2].parse().ok()?)))
        .collect()
}
