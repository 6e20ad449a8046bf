//! Per-record normalization: raw scraped fields to a [`CanonicalRecord`].
//!
//! Stages run in a fixed order: markup stripping, script reconciliation,
//! salary, seniority, tags. Location, employment type and the remote flag are
//! derived alongside. The pipeline holds no per-record state and is shared
//! between workers behind an `Arc`.

mod classify;
mod keywords;
mod location;
mod salary;
mod tags;
mod text;

use std::collections::BTreeMap;

use jobs_core::{CanonicalRecord, RawRecord};
use pipeline_logging::pipeline_warn;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::dedup::Fingerprinter;

pub use classify::{
    default_employment_rules, default_remote_keywords, default_seniority_rules, EmploymentRule,
    SeniorityRule,
};
pub use location::default_countries;
pub use salary::{PeriodRule, SalaryRules};
pub use tags::default_tag_dictionary;

use classify::Classifier;
use salary::SalaryParser;
use tags::TagMatcher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationRules {
    pub salary: SalaryRules,
    /// Priority order; the first level with a keyword hit wins.
    pub seniority: Vec<SeniorityRule>,
    /// Tag -> keywords that imply it.
    pub tags: BTreeMap<String, Vec<String>>,
    pub employment: Vec<EmploymentRule>,
    pub remote_keywords: Vec<String>,
    /// A single location token listed here is read as a country, otherwise a city.
    pub countries: Vec<String>,
}

impl Default for NormalizationRules {
    fn default() -> Self {
        Self {
            salary: SalaryRules::default(),
            seniority: default_seniority_rules(),
            tags: default_tag_dictionary(),
            employment: default_employment_rules(),
            remote_keywords: default_remote_keywords(),
            countries: default_countries(),
        }
    }
}

/// Required field empty after cleanup. The record is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{site}: {field} is empty after cleanup ({source_url})")]
pub struct ValidationError {
    pub site: String,
    pub source_url: String,
    pub field: &'static str,
}

/// A value the pipeline had to fix rather than reject.
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    SalaryBoundsSwapped { min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: CanonicalRecord,
    pub corrections: Vec<Correction>,
}

#[derive(Debug)]
pub struct NormalizationPipeline {
    salary: SalaryParser,
    classifier: Classifier,
    tags: TagMatcher,
    countries: Vec<String>,
    fingerprinter: Fingerprinter,
}

impl NormalizationPipeline {
    pub fn new(rules: &NormalizationRules, fingerprinter: Fingerprinter) -> Result<Self, ConfigError> {
        Ok(Self {
            salary: SalaryParser::new(&rules.salary)?,
            classifier: Classifier::new(&rules.seniority, &rules.employment, &rules.remote_keywords),
            tags: TagMatcher::new(&rules.tags),
            countries: rules.countries.clone(),
            fingerprinter,
        })
    }

    pub fn normalize(&self, raw: &RawRecord) -> Result<Normalized, ValidationError> {
        let fields = &raw.fields;
        let inline = |value: &Option<String>| value.as_deref().map(text::clean_inline).unwrap_or_default();

        let title = inline(&fields.title);
        let company = inline(&fields.company);
        for (field, value) in [("title", &title), ("company", &company)] {
            if value.is_empty() {
                return Err(ValidationError {
                    site: raw.site.clone(),
                    source_url: raw.source_url.clone(),
                    field,
                });
            }
        }
        let description = fields
            .description
            .as_deref()
            .map(text::clean_block)
            .unwrap_or_default();

        let mut corrections = Vec::new();
        let salary = fields
            .salary
            .as_deref()
            .map(|raw_salary| {
                let mut info = self.salary.parse(&text::clean_inline(raw_salary));
                if let Some((min, max)) = info.enforce_order() {
                    pipeline_warn!(
                        "site={} {}: salary bounds swapped ({} > {})",
                        raw.site,
                        raw.source_url,
                        min,
                        max
                    );
                    corrections.push(Correction::SalaryBoundsSwapped { min, max });
                }
                info
            });

        let seniority = self.classifier.seniority(&title, &description);

        let raw_tags = fields.tags.as_deref().map(text::clean_inline);
        let tags = self.tags.tags(&[title.as_str(), description.as_str()], raw_tags.as_deref());

        let location_text = inline(&fields.location);
        let (location, remote_location) =
            location::parse_location(&location_text, &self.countries, &self.classifier);
        let remote = remote_location
            || self.classifier.is_remote_text(&title)
            || self.classifier.is_remote_text(&description);
        let employment_type = self.classifier.employment_type(&title, &description);

        let mut record = CanonicalRecord {
            title,
            company,
            location,
            salary,
            seniority,
            employment_type,
            remote,
            tags,
            description,
            source_url: raw.source_url.trim().to_string(),
            site: raw.site.clone(),
            first_seen: raw.fetched_at,
            fingerprint: String::new(),
        };
        record.fingerprint = self.fingerprinter.of(&record);
        Ok(Normalized {
            record,
            corrections,
        })
    }
}
