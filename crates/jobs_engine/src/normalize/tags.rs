use std::collections::{BTreeMap, BTreeSet};

use super::keywords::{contains_keyword, lowered};
use super::text::collapse_inline;

const TAG_SEPARATORS: [char; 4] = [',', ';', '|', '/'];

pub fn default_tag_dictionary() -> BTreeMap<String, Vec<String>> {
    [
        ("python", &["python"][..]),
        ("django", &["django"][..]),
        ("javascript", &["javascript", "js"][..]),
        ("typescript", &["typescript"][..]),
        ("react", &["react", "react.js", "reactjs"][..]),
        ("node", &["node", "node.js", "nodejs"][..]),
        ("java", &["java"][..]),
        ("rust", &["rust"][..]),
        ("go", &["golang"][..]),
        ("php", &["php", "laravel"][..]),
        ("dotnet", &[".net", "c#", "asp.net"][..]),
        ("sql", &["sql", "mysql", "postgresql", "postgres"][..]),
        ("aws", &["aws", "amazon web services"][..]),
        ("docker", &["docker", "kubernetes", "k8s"][..]),
        ("flutter", &["flutter"][..]),
        ("android", &["android", "kotlin"][..]),
        ("ios", &["ios", "swift"][..]),
        ("machine-learning", &["machine learning", "ml", "تعلم الآلة"][..]),
        ("data", &["data analysis", "data science", "power bi", "tableau"][..]),
    ]
    .into_iter()
    .map(|(tag, keywords)| {
        (
            tag.to_string(),
            keywords.iter().map(|k| k.to_string()).collect(),
        )
    })
    .collect()
}

#[derive(Debug)]
pub(crate) struct TagMatcher {
    dictionary: Vec<(String, Vec<String>)>,
}

impl TagMatcher {
    pub(crate) fn new(dictionary: &BTreeMap<String, Vec<String>>) -> Self {
        Self {
            dictionary: dictionary
                .iter()
                .map(|(tag, keywords)| (tag.trim().to_lowercase(), lowered(keywords)))
                .collect(),
        }
    }

    /// Dictionary hits in `texts` merged with the explicit `raw_tags` list.
    pub(crate) fn tags(&self, texts: &[&str], raw_tags: Option<&str>) -> BTreeSet<String> {
        let mut tags = BTreeSet::new();
        for text in texts {
            let lower = text.to_lowercase();
            for (tag, keywords) in &self.dictionary {
                if keywords.iter().any(|kw| contains_keyword(&lower, kw)) {
                    tags.insert(tag.clone());
                }
            }
        }

        let explicit = raw_tags
            .into_iter()
            .flat_map(|raw| raw.split(TAG_SEPARATORS))
            .map(|part| collapse_inline(&part.to_lowercase()))
            .filter(|part| !part.is_empty());
        for tag in explicit {
            tags.insert(self.canonical(&tag).unwrap_or(tag));
        }
        tags
    }

    /// Dictionary tag named `tag` or listing it as a keyword.
    fn canonical(&self, tag: &str) -> Option<String> {
        self.dictionary
            .iter()
            .find(|(name, keywords)| name == tag || keywords.iter().any(|kw| kw == tag))
            .map(|(name, _)| name.clone())
    }
}
