use std::collections::BTreeMap;

use jobs_core::{SalaryInfo, SalaryPeriod};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::keywords::{find_keyword, lowered};
use crate::config::ConfigError;

const NUMBER_PATTERN: &str = r"(\d[\d,]*(?:\.\d+)?)(\s?[kK]\b)?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRule {
    pub period: SalaryPeriod,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SalaryRules {
    /// ISO code -> aliases seen in listings (symbols, local names).
    pub currencies: BTreeMap<String, Vec<String>>,
    pub range_separators: Vec<String>,
    pub periods: Vec<PeriodRule>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SalaryRules {
    fn default() -> Self {
        let currencies = [
            ("EGP", &["egp", "e£", "le", "l.e", "l.e.", "جنيه", "ج.م"][..]),
            ("USD", &["usd", "$", "us$", "dollar", "dollars", "دولار"][..]),
            ("EUR", &["eur", "€", "euro", "euros"][..]),
            ("GBP", &["gbp", "£"][..]),
            ("SAR", &["sar", "riyal", "ريال"][..]),
            ("AED", &["aed", "dirham", "درهم"][..]),
        ]
        .into_iter()
        .map(|(code, aliases)| (code.to_string(), strings(aliases)))
        .collect();

        Self {
            currencies,
            range_separators: strings(&["-", "–", "—", "~", "to", "إلى", "الى"]),
            periods: vec![
                PeriodRule {
                    period: SalaryPeriod::Hourly,
                    keywords: strings(&["hour", "hourly", "hr", "/h", "ساعة"]),
                },
                PeriodRule {
                    period: SalaryPeriod::Monthly,
                    keywords: strings(&["month", "monthly", "mo", "/m", "شهر", "شهريا", "شهري"]),
                },
                PeriodRule {
                    period: SalaryPeriod::Yearly,
                    keywords: strings(&["year", "yearly", "annual", "annually", "yr", "p.a.", "سنة", "سنويا", "سنوي"]),
                },
            ],
        }
    }
}

struct Amount {
    value: f64,
    thousands: bool,
    start: usize,
    end: usize,
}

/// Compiled form of [`SalaryRules`].
#[derive(Debug)]
pub(crate) struct SalaryParser {
    number: Regex,
    /// (alias, code), longest alias first.
    currencies: Vec<(String, String)>,
    separators: Vec<String>,
    periods: Vec<(SalaryPeriod, Vec<String>)>,
}

impl SalaryParser {
    pub(crate) fn new(rules: &SalaryRules) -> Result<Self, ConfigError> {
        let number = Regex::new(NUMBER_PATTERN).map_err(|err| ConfigError::Pattern(err.to_string()))?;
        let mut currencies: Vec<(String, String)> = rules
            .currencies
            .iter()
            .flat_map(|(code, aliases)| {
                lowered(aliases)
                    .into_iter()
                    .chain(std::iter::once(code.to_lowercase()))
                    .map(move |alias| (alias, code.to_uppercase()))
            })
            .collect();
        currencies.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));
        Ok(Self {
            number,
            currencies,
            separators: lowered(&rules.range_separators),
            periods: rules
                .periods
                .iter()
                .map(|rule| (rule.period, lowered(&rule.keywords)))
                .collect(),
        })
    }

    /// Parses cleaned salary text. Text without any amount yields an empty `SalaryInfo`.
    pub(crate) fn parse(&self, text: &str) -> SalaryInfo {
        let lower = text.to_lowercase();
        let amounts: Vec<Amount> = self
            .number
            .captures_iter(&lower)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let value: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
                Some(Amount {
                    value,
                    thousands: caps.get(2).is_some(),
                    start: whole.start(),
                    end: whole.end(),
                })
            })
            .collect();

        let Some(first) = amounts.first() else {
            return SalaryInfo::default();
        };

        let (min, max) = match amounts.get(1) {
            Some(second) if self.is_range_gap(&lower[first.end..second.start]) => {
                let mut low = scaled(first);
                let high = scaled(second);
                if second.thousands && !first.thousands && first.value < 1000.0 {
                    low = first.value * 1000.0;
                }
                (low, high)
            }
            _ => {
                let only = scaled(first);
                (only, only)
            }
        };

        SalaryInfo {
            min: Some(min),
            max: Some(max),
            currency: self.currency(&lower),
            period: self.period(&lower),
        }
    }

    fn is_range_gap(&self, gap: &str) -> bool {
        let trimmed = gap.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.separators.iter().any(|sep| trimmed == sep)
            || gap
                .split_whitespace()
                .any(|token| self.separators.iter().any(|sep| sep == token))
    }

    fn currency(&self, lower: &str) -> Option<String> {
        self.currencies
            .iter()
            .find(|(alias, _)| find_keyword(lower, alias).is_some())
            .map(|(_, code)| code.clone())
    }

    /// The period keyword appearing earliest in the text.
    fn period(&self, lower: &str) -> Option<SalaryPeriod> {
        self.periods
            .iter()
            .filter_map(|(period, keywords)| {
                keywords
                    .iter()
                    .filter_map(|kw| find_keyword(lower, kw))
                    .min()
                    .map(|pos| (pos, *period))
            })
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, period)| period)
    }
}

fn scaled(amount: &Amount) -> f64 {
    if amount.thousands {
        amount.value * 1000.0
    } else {
        amount.value
    }
}
