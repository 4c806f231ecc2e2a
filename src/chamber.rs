//! Chamber key derivation and instrument classification
//!
//! Sitrad instruments and gas sensors name chambers differently
//! ("Camara 5 - Zac", "Temperatura Pulpa Cam 5", "CO2_Camara_05"). These
//! helpers reduce every naming scheme to a trailing chamber token so the
//! two feeds can be joined.

/// Prefix of instruments that report chamber temperature, humidity and setpoints
const BASE_PREFIX: &str = "camara";
/// Prefix of instruments that report pulp and evaporator temperature
const PULP_PREFIX: &str = "temperatura pulpa";

/// Role an instrument plays within its chamber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentRole {
    Base,
    Pulp,
    Unclassified,
}

/// Derive the chamber key from a device name
///
/// Takes the segment before the first `-`, splits it on whitespace and
/// returns the last token. Falls back to the full name when there is no
/// token at all.
pub fn derive_key(name: &str) -> String {
    let before_dash = name.split('-').next().unwrap_or(name);
    before_dash
        .split_whitespace()
        .last()
        .unwrap_or(name)
        .to_string()
}

/// Classify an instrument by its name prefix
///
/// The base prefix ignores case and accents ("Cámara" == "CAMARA"); the pulp
/// prefix ignores case.
pub fn classify(name: &str) -> InstrumentRole {
    let folded: String = name.chars().map(fold_accent).collect::<String>().to_lowercase();
    if folded.starts_with(BASE_PREFIX) {
        InstrumentRole::Base
    } else if name.to_lowercase().starts_with(PULP_PREFIX) {
        InstrumentRole::Pulp
    } else {
        InstrumentRole::Unclassified
    }
}

/// Left-pad a chamber number with zeros to two characters
pub fn pad_chamber_number(number: &str) -> String {
    format!("{:0>2}", number)
}

/// Whether two chamber numbers refer to the same chamber
///
/// Matches raw equality or equality after zero-padding either side, so
/// `"5"` and `"05"` match in both directions.
pub fn chamber_numbers_match(a: &str, b: &str) -> bool {
    a == b || pad_chamber_number(a) == pad_chamber_number(b)
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'Á' | 'À' | 'Ä' | 'Â' => 'A',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'É' | 'È' | 'Ë' | 'Ê' => 'E',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_known_patterns() {
        assert_eq!(derive_key("Camara 5 - Zac"), "5");
        assert_eq!(derive_key("Temperatura Pulpa Cam 5"), "5");
        assert_eq!(derive_key("Cámara 12"), "12");
        assert_eq!(derive_key("Camara 05 - Gas"), "05");
        assert_eq!(derive_key("  Camara   7   -   Norte - B"), "7");
        assert_eq!(derive_key("Tunel"), "Tunel");
    }

    #[test]
    fn test_derive_key_is_total() {
        // No token before the dash falls back to the untrimmed name
        assert_eq!(derive_key(""), "");
        assert_eq!(derive_key("   "), "   ");
        assert_eq!(derive_key("- Zac"), "- Zac");
        assert_eq!(derive_key("-"), "-");
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("Camara 5 - Zac"), InstrumentRole::Base);
        assert_eq!(classify("CÁMARA 3"), InstrumentRole::Base);
        assert_eq!(classify("cámara 3"), InstrumentRole::Base);
        assert_eq!(classify("Temperatura Pulpa Cam 5"), InstrumentRole::Pulp);
        assert_eq!(classify("TEMPERATURA PULPA 2"), InstrumentRole::Pulp);
        assert_eq!(classify("Compresor 1"), InstrumentRole::Unclassified);
        assert_eq!(classify("Pulpa Camara 1"), InstrumentRole::Unclassified);
    }

    #[test]
    fn test_chamber_numbers_match() {
        assert!(chamber_numbers_match("5", "5"));
        assert!(chamber_numbers_match("5", "05"));
        assert!(chamber_numbers_match("05", "5"));
        assert!(chamber_numbers_match("12", "12"));
        assert!(!chamber_numbers_match("5", "15"));
        assert!(!chamber_numbers_match("5", "005"));
    }

    #[test]
    fn test_pad_chamber_number() {
        assert_eq!(pad_chamber_number("5"), "05");
        assert_eq!(pad_chamber_number("05"), "05");
        assert_eq!(pad_chamber_number("123"), "123");
        assert_eq!(pad_chamber_number(""), "00");
    }
}
