//! Keyword-rule classifiers: seniority, employment type and remote work.

use jobs_core::{EmploymentType, Seniority};
use serde::{Deserialize, Serialize};

use super::keywords::{contains_keyword, lowered};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeniorityRule {
    pub level: Seniority,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmploymentRule {
    pub kind: EmploymentType,
    pub keywords: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Rules in priority order: the first level with a hit wins.
pub fn default_seniority_rules() -> Vec<SeniorityRule> {
    let rule = |level, keywords: &[&str]| SeniorityRule {
        level,
        keywords: strings(keywords),
    };
    vec![
        rule(Seniority::Intern, &["intern", "internship", "trainee", "متدرب", "تدريب"]),
        rule(Seniority::Lead, &["lead", "principal", "head of", "staff engineer", "architect", "قائد", "رئيس"]),
        rule(Seniority::Senior, &["senior", "sr", "sr.", "snr", "أول", "خبير"]),
        rule(Seniority::Junior, &["junior", "jr", "jr.", "entry level", "entry-level", "graduate", "مبتدئ"]),
        rule(Seniority::Mid, &["mid", "mid-level", "intermediate", "متوسط"]),
    ]
}

pub fn default_employment_rules() -> Vec<EmploymentRule> {
    let rule = |kind, keywords: &[&str]| EmploymentRule {
        kind,
        keywords: strings(keywords),
    };
    vec![
        rule(EmploymentType::Internship, &["internship", "intern"]),
        rule(EmploymentType::PartTime, &["part-time", "part time", "دوام جزئي"]),
        rule(EmploymentType::Contract, &["contract", "contractor", "عقد"]),
        rule(EmploymentType::Freelance, &["freelance", "freelancer", "عمل حر"]),
        rule(EmploymentType::Temporary, &["temporary", "temp"]),
        rule(EmploymentType::FullTime, &["full-time", "full time", "permanent", "دوام كامل"]),
    ]
}

pub fn default_remote_keywords() -> Vec<String> {
    strings(&["remote", "work from home", "wfh", "anywhere", "عن بعد"])
}

#[derive(Debug)]
pub(crate) struct Classifier {
    seniority: Vec<(Seniority, Vec<String>)>,
    employment: Vec<(EmploymentType, Vec<String>)>,
    remote: Vec<String>,
}

impl Classifier {
    pub(crate) fn new(
        seniority: &[SeniorityRule],
        employment: &[EmploymentRule],
        remote: &[String],
    ) -> Self {
        Self {
            seniority: seniority
                .iter()
                .map(|rule| (rule.level, lowered(&rule.keywords)))
                .collect(),
            employment: employment
                .iter()
                .map(|rule| (rule.kind, lowered(&rule.keywords)))
                .collect(),
            remote: lowered(remote),
        }
    }

    /// Title is consulted before the description; `Unspecified` when neither matches.
    pub(crate) fn seniority(&self, title: &str, description: &str) -> Seniority {
        [title, description]
            .into_iter()
            .map(str::to_lowercase)
            .find_map(|text| {
                self.seniority
                    .iter()
                    .find(|(_, keywords)| keywords.iter().any(|kw| contains_keyword(&text, kw)))
                    .map(|(level, _)| *level)
            })
            .unwrap_or_default()
    }

    pub(crate) fn employment_type(&self, title: &str, description: &str) -> Option<EmploymentType> {
        [title, description]
            .into_iter()
            .map(str::to_lowercase)
            .find_map(|text| {
                self.employment
                    .iter()
                    .find(|(_, keywords)| keywords.iter().any(|kw| contains_keyword(&text, kw)))
                    .map(|(kind, _)| *kind)
            })
    }

    pub(crate) fn is_remote_text(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.remote.iter().any(|kw| contains_keyword(&lower, kw))
    }
}
