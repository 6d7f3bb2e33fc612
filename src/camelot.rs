//! Camelot wheel: musical key names <-> wheel positions.
//!
//! - Numbers 1-12 are positions on the circle of fifths
//! - `A` = minor, `B` = major
//! - Same number, other letter = relative major/minor

use std::fmt;

/// Placeholder stored when no key could be determined.
pub const UNKNOWN_KEY: &str = "Unknown";

/// Wheel mode letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Minor
    A,
    /// Major
    B,
}

impl Mode {
    pub fn letter(self) -> char {
        match self {
            Mode::A => 'A',
            Mode::B => 'B',
        }
    }

    pub fn other(self) -> Self {
        match self {
            Mode::A => Mode::B,
            Mode::B => Mode::A,
        }
    }
}

/// A position on the Camelot wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CamelotKey {
    number: u8,
    mode: Mode,
}

// Indexed by pitch class (0=C, 1=C#, ..., 11=B)
const MAJOR_POSITIONS: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];
const MINOR_POSITIONS: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];

// Canonical spelling per wheel number (index = number - 1)
const MINOR_NAMES: [&str; 12] = [
    "Abm", "Ebm", "Bbm", "Fm", "Cm", "Gm", "Dm", "Am", "Em", "Bm", "F#m", "Dbm",
];
const MAJOR_NAMES: [&str; 12] = [
    "B", "F#", "Db", "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E",
];

impl CamelotKey {
    pub fn new(number: u8, mode: Mode) -> Option<Self> {
        (1..=12).contains(&number).then_some(Self { number, mode })
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Wheel position for a root pitch class (0=C) and scale.
    pub fn from_pitch_class(pitch_class: u8, minor: bool) -> Self {
        let pc = (pitch_class % 12) as usize;
        if minor {
            Self { number: MINOR_POSITIONS[pc], mode: Mode::A }
        } else {
            Self { number: MAJOR_POSITIONS[pc], mode: Mode::B }
        }
    }

    /// Parse a key as written in tags or returned by an analysis backend.
    ///
    /// Accepts note names with optional accidental and scale suffix
    /// (`"Am"`, `"G#m"`, `"Abm"`, `"F# minor"`, `"Bb"`, `"C major"`, `"e♭m"`)
    /// as well as Camelot codes (`"8A"`, `"12b"`).
    pub fn from_key_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(UNKNOWN_KEY) {
            return None;
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Self::parse_code(name);
        }

        let mut chars = name.chars().peekable();
        let base = match chars.next()?.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        let root = match chars.peek() {
            Some('#') | Some('♯') => {
                chars.next();
                (base + 1) % 12
            }
            Some('b') | Some('♭') => {
                chars.next();
                (base + 11) % 12
            }
            _ => base,
        };

        let suffix: String = chars
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        let minor = match suffix.as_str() {
            "" | "maj" | "major" => false,
            "m" | "min" | "minor" => true,
            _ => return None,
        };

        Some(Self::from_pitch_class(root, minor))
    }

    /// Parse a Camelot code such as `"8A"` or `"11b"`.
    pub fn parse_code(code: &str) -> Option<Self> {
        let code = code.trim();
        let letter = code.chars().last()?;
        let digits = &code[..code.len() - letter.len_utf8()];
        let number: u8 = digits.parse().ok()?;
        let mode = match letter.to_ascii_uppercase() {
            'A' => Mode::A,
            'B' => Mode::B,
            _ => return None,
        };
        Self::new(number, mode)
    }

    /// The one canonical key name for this position.
    pub fn key_name(&self) -> &'static str {
        let idx = (self.number - 1) as usize;
        match self.mode {
            Mode::A => MINOR_NAMES[idx],
            Mode::B => MAJOR_NAMES[idx],
        }
    }

    /// Circular distance between wheel numbers (0-6), ignoring mode.
    pub fn distance(&self, other: &CamelotKey) -> u8 {
        let diff = self.number.abs_diff(other.number);
        diff.min(12 - diff)
    }

    /// Relative major/minor.
    pub fn relative(&self) -> Self {
        Self { number: self.number, mode: self.mode.other() }
    }

    /// Step around the wheel, wrapping 12 -> 1 and 1 -> 12.
    pub fn step(&self, steps: i8) -> Self {
        let n = (self.number as i16 - 1 + steps as i16).rem_euclid(12) as u8 + 1;
        Self { number: n, mode: self.mode }
    }

    /// Keys that mix cleanly with this one: itself, ±1 in the same mode,
    /// and the relative major/minor.
    pub fn compatible_keys(&self) -> [CamelotKey; 4] {
        [*self, self.step(1), self.step(-1), self.relative()]
    }

    /// Classic harmonic-mixing rule (see [`compatible_keys`](Self::compatible_keys)).
    pub fn is_compatible(&self, other: &CamelotKey) -> bool {
        self.compatible_keys().contains(other)
    }
}

impl fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.mode.letter())
    }
}

/// Canonical key name for any accepted spelling, or [`UNKNOWN_KEY`].
pub fn canonical_key_name(name: &str) -> &'static str {
    CamelotKey::from_key_name(name)
        .map(|k| k.key_name())
        .unwrap_or(UNKNOWN_KEY)
}

/// Derive the Camelot code (`"8A"`) for a key name. `None` for unknown keys.
pub fn camelot_code(name: &str) -> Option<String> {
    CamelotKey::from_key_name(name).map(|k| k.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_positions() -> Vec<CamelotKey> {
        (1..=12)
            .flat_map(|n| [CamelotKey::new(n, Mode::A).unwrap(), CamelotKey::new(n, Mode::B).unwrap()])
            .collect()
    }

    #[test]
    fn test_every_position_round_trips_through_its_name() {
        for key in all_positions() {
            assert_eq!(CamelotKey::from_key_name(key.key_name()), Some(key));
            assert_eq!(key.distance(&key), 0);
            assert!(key.is_compatible(&key));
        }
    }

    #[test]
    fn test_known_mappings() {
        assert_eq!(camelot_code("Am").as_deref(), Some("8A"));
        assert_eq!(camelot_code("C").as_deref(), Some("8B"));
        assert_eq!(camelot_code("F#m").as_deref(), Some("11A"));
        assert_eq!(camelot_code("E").as_deref(), Some("12B"));
        assert_eq!(camelot_code("Dbm").as_deref(), Some("12A"));
    }

    #[test]
    fn test_enharmonic_aliases_map_identically() {
        assert_eq!(CamelotKey::from_key_name("G#m"), CamelotKey::from_key_name("Abm"));
        assert_eq!(CamelotKey::from_key_name("A#"), CamelotKey::from_key_name("Bb"));
        assert_eq!(CamelotKey::from_key_name("C#m"), CamelotKey::from_key_name("Dbm"));
        assert_eq!(canonical_key_name("G#m"), "Abm");
    }

    #[test]
    fn test_spelling_variants() {
        assert_eq!(canonical_key_name("A minor"), "Am");
        assert_eq!(canonical_key_name("a min"), "Am");
        assert_eq!(canonical_key_name("C major"), "C");
        assert_eq!(canonical_key_name("E♭m"), "Ebm");
        assert_eq!(canonical_key_name("bm"), "Bm");
        assert_eq!(canonical_key_name("8A"), "Am");
        assert_eq!(canonical_key_name("11b"), "A");
    }

    #[test]
    fn test_unparseable_is_unknown() {
        assert_eq!(canonical_key_name(""), UNKNOWN_KEY);
        assert_eq!(canonical_key_name("Unknown"), UNKNOWN_KEY);
        assert_eq!(canonical_key_name("H"), UNKNOWN_KEY);
        assert_eq!(canonical_key_name("Cdorian"), UNKNOWN_KEY);
        assert_eq!(CamelotKey::parse_code("13A"), None);
        assert_eq!(CamelotKey::parse_code("0B"), None);
        assert_eq!(CamelotKey::parse_code("8C"), None);
    }

    #[test]
    fn test_circular_distance() {
        let k = |s| CamelotKey::parse_code(s).unwrap();
        assert_eq!(k("1A").distance(&k("12A")), 1);
        assert_eq!(k("8A").distance(&k("3A")), 5);
        assert_eq!(k("1B").distance(&k("7A")), 6);
        assert_eq!(k("8A").distance(&k("8B")), 0);
    }

    #[test]
    fn test_compatibility() {
        let k = |s| CamelotKey::parse_code(s).unwrap();
        assert!(k("8A").is_compatible(&k("9A")));
        assert!(k("8A").is_compatible(&k("7A")));
        assert!(k("8A").is_compatible(&k("8B")));
        assert!(!k("8A").is_compatible(&k("3A")));
        assert!(!k("8A").is_compatible(&k("9B")));
        // Wraps around the wheel
        assert!(k("12B").is_compatible(&k("1B")));
    }
}
