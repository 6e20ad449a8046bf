use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-text fields exactly as a scraper found them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawFields {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
}

/// One listing as produced by a site scraper, before any cleanup.
///
/// Only `site` and `source_url` are guaranteed; everything else may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub site: String,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub fields: RawFields,
}

impl RawRecord {
    pub fn new(site: impl Into<String>, source_url: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            site: site.into(),
            source_url: source_url.into(),
            fetched_at,
            fields: RawFields::default(),
        }
    }

    pub fn with_title(mut self, value: impl Into<String>) -> Self {
        self.fields.title = Some(value.into());
        self
    }

    pub fn with_company(mut self, value: impl Into<String>) -> Self {
        self.fields.company = Some(value.into());
        self
    }

    pub fn with_location(mut self, value: impl Into<String>) -> Self {
        self.fields.location = Some(value.into());
        self
    }

    pub fn with_salary(mut self, value: impl Into<String>) -> Self {
        self.fields.salary = Some(value.into());
        self
    }

    pub fn with_description(mut self, value: impl Into<String>) -> Self {
        self.fields.description = Some(value.into());
        self
    }

    pub fn with_tags(mut self, value: impl Into<String>) -> Self {
        self.fields.tags = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seniority {
    Intern,
    Junior,
    Mid,
    Senior,
    Lead,
    #[default]
    Unspecified,
}

impl fmt::Display for Seniority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Seniority::Intern => "intern",
            Seniority::Junior => "junior",
            Seniority::Mid => "mid",
            Seniority::Senior => "senior",
            Seniority::Lead => "lead",
            Seniority::Unspecified => "unspecified",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Internship,
    Freelance,
    Temporary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalaryPeriod {
    Hourly,
    Monthly,
    Yearly,
}

impl SalaryPeriod {
    /// Unit word used when rendering a salary back to text.
    pub fn unit(self) -> &'static str {
        match self {
            SalaryPeriod::Hourly => "hour",
            SalaryPeriod::Monthly => "month",
            SalaryPeriod::Yearly => "year",
        }
    }
}

/// Structured salary. Any field may be null when the source text did not say.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SalaryInfo {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub currency: Option<String>,
    pub period: Option<SalaryPeriod>,
}

impl SalaryInfo {
    /// True when nothing could be extracted from the salary text.
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.currency.is_none() && self.period.is_none()
    }

    /// Restores `min <= max`, returning the original pair when a swap happened.
    pub fn enforce_order(&mut self) -> Option<(f64, f64)> {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min > max => {
                self.min = Some(max);
                self.max = Some(min);
                Some((min, max))
            }
            _ => None,
        }
    }
}

impl fmt::Display for SalaryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min == max => write!(f, "{min}")?,
            (Some(min), Some(max)) => write!(f, "{min}-{max}")?,
            (Some(value), None) | (None, Some(value)) => write!(f, "{value}")?,
            (None, None) => {}
        }
        if let Some(currency) = &self.currency {
            write!(f, " {currency}")?;
        }
        if let Some(period) = self.period {
            write!(f, "/{}", period.unit())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub country: Option<String>,
}

impl Location {
    /// `"city, country"`, or whichever half is present.
    pub fn render(&self) -> String {
        match (&self.city, &self.country) {
            (Some(city), Some(country)) => format!("{city}, {country}"),
            (Some(only), None) | (None, Some(only)) => only.clone(),
            (None, None) => String::new(),
        }
    }
}

/// A validated, normalized job listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub title: String,
    pub company: String,
    pub location: Option<Location>,
    pub salary: Option<SalaryInfo>,
    pub seniority: Seniority,
    pub employment_type: Option<EmploymentType>,
    pub remote: bool,
    pub tags: BTreeSet<String>,
    pub description: String,
    pub source_url: String,
    pub site: String,
    pub first_seen: DateTime<Utc>,
    pub fingerprint: String,
}

impl CanonicalRecord {
    /// Rendered location, empty when unknown.
    pub fn location_text(&self) -> String {
        self.location.as_ref().map(Location::render).unwrap_or_default()
    }
}
