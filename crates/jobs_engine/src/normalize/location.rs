use jobs_core::Location;

use super::classify::Classifier;

pub fn default_countries() -> Vec<String> {
    [
        "Egypt", "Saudi Arabia", "KSA", "United Arab Emirates", "UAE", "Qatar", "Kuwait",
        "Bahrain", "Oman", "Jordan", "Lebanon", "Morocco", "Tunisia", "Algeria", "Iraq",
        "United States", "USA", "United Kingdom", "UK", "Germany", "France", "Netherlands",
        "Canada", "مصر", "السعودية", "الإمارات", "قطر", "الكويت", "الأردن",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Splits cleaned location text into city and country.
///
/// Returns the location (if any part is left) and whether a remote marker was present.
pub(crate) fn parse_location(text: &str, countries: &[String], classifier: &Classifier) -> (Option<Location>, bool) {
    let mut remote = false;
    let parts: Vec<&str> = text
        .split([',', '|'])
        .flat_map(|part| part.split(" - "))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter(|part| {
            let is_remote = classifier.is_remote_text(part);
            remote |= is_remote;
            !is_remote
        })
        .collect();

    let location = match parts.as_slice() {
        [] => None,
        [only] => {
            let is_country = countries.iter().any(|c| c.eq_ignore_ascii_case(only) || c == only);
            Some(if is_country {
                Location {
                    city: None,
                    country: Some(only.to_string()),
                }
            } else {
                Location {
                    city: Some(only.to_string()),
                    country: None,
                }
            })
        }
        [city, .., country] => Some(Location {
            city: Some(city.to_string()),
            country: Some(country.to_string()),
        }),
    };
    (location, remote)
}
