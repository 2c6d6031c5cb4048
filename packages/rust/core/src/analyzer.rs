//! Pattern mining over stored learning bits.
//!
//! Bits in a scope are grouped by `(category, tag)` and by
//! `(category, tag pair)`. Any group with at least `min_support` distinct
//! bits becomes a [`Pattern`] whose strength grows with every supporting bit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use learnbits_shared::{
    AnalysisScope, AppConfig, Category, LearnBitsError, LearningBit, Pattern, Result,
};
use learnbits_storage::PatternStore;

/// Runtime settings for [`PatternAnalyzer`].
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Minimum distinct bits per pattern; never below 2.
    pub min_support: usize,
    /// Strength contributed by each supporting bit on top of its importance.
    pub support_weight: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_support: 2,
            support_weight: 0.5,
        }
    }
}

impl From<&AppConfig> for AnalyzerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            min_support: config.analysis.min_support,
            support_weight: config.analysis.support_weight,
        }
    }
}

impl AnalyzerConfig {
    fn validate(&self) -> Result<()> {
        if self.min_support < 2 {
            return Err(LearnBitsError::invalid_config(
                "min_support must be at least 2",
            ));
        }
        if !self.support_weight.is_finite() || self.support_weight <= 0.0 {
            return Err(LearnBitsError::invalid_config(
                "support_weight must be positive",
            ));
        }
        Ok(())
    }
}

/// Group key: category plus one or two tags.
type GroupKey = (Category, BTreeSet<String>);

/// Mine patterns from a bit snapshot without touching storage.
///
/// `strength = n * support_weight + sum(importance)`, i.e.
/// `n * (support_weight + avg_importance)`. Results are sorted by strength
/// descending, then pattern id.
pub fn mine_patterns(
    bits: &[LearningBit],
    scope_key: &str,
    config: &AnalyzerConfig,
) -> Vec<Pattern> {
    let mut groups: BTreeMap<GroupKey, BTreeMap<&str, f64>> = BTreeMap::new();

    for bit in bits {
        let tags: Vec<&String> = bit.tags.iter().collect();
        for (i, tag) in tags.iter().enumerate() {
            groups
                .entry((bit.category, BTreeSet::from([(*tag).clone()])))
                .or_default()
                .insert(bit.id.as_str(), bit.importance_score);

            for other in &tags[i + 1..] {
                let key: BTreeSet<String> = [(*tag).clone(), (*other).clone()].into();
                groups
                    .entry((bit.category, key))
                    .or_default()
                    .insert(bit.id.as_str(), bit.importance_score);
            }
        }
    }

    let now = Utc::now();
    let mut patterns: Vec<Pattern> = groups
        .into_iter()
        .filter(|(_, members)| members.len() >= config.min_support)
        .map(|((category, tags), members)| {
            let n = members.len();
            let importance_sum: f64 = members.values().map(|v| v.clamp(0.0, 1.0)).sum();
            let strength = n as f64 * config.support_weight + importance_sum;
            Pattern {
                pattern_id: Pattern::id_for(category, &tags),
                description: describe(category, &tags, n),
                category,
                strength,
                supporting_bit_ids: members.keys().map(|id| id.to_string()).collect(),
                tags,
                scope_key: scope_key.to_string(),
                created_at: now,
            }
        })
        .collect();

    patterns.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then_with(|| a.pattern_id.cmp(&b.pattern_id))
    });
    patterns
}

fn describe(category: Category, tags: &BTreeSet<String>, n: usize) -> String {
    let quoted: Vec<String> = tags.iter().map(|t| format!("`{t}`")).collect();
    format!("{n} {category} bits tagged {}", quoted.join(" and "))
}

/// Mines stored bits into the pattern table.
pub struct PatternAnalyzer {
    store: Arc<PatternStore>,
    config: AnalyzerConfig,
}

impl PatternAnalyzer {
    pub fn new(store: Arc<PatternStore>, config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Recompute and persist the patterns of `scope`, replacing the previous
    /// result for the same scope. Bits are only read, from one consistent
    /// snapshot.
    #[instrument(skip_all, fields(scope = %scope.scope_key()))]
    pub async fn analyze(&self, scope: &AnalysisScope) -> Result<Vec<Pattern>> {
        let scope_key = scope.scope_key();
        let bits = self.store.snapshot(&scope.to_filter()).await?;

        let patterns = mine_patterns(&bits, &scope_key, &self.config);
        self.store.replace_patterns(&scope_key, &patterns).await?;

        info!(
            bits = bits.len(),
            patterns = patterns.len(),
            "analysis complete"
        );
        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnbits_shared::{BitFilter, ContentType, PatternFilter, Subcategory, content_hash};

    fn bit(id: &str, category: Category, tags: &[&str], importance: f64) -> LearningBit {
        let content = format!("content of {id}");
        LearningBit {
            id: id.into(),
            source_url: "https://docs.example.com/".into(),
            title: String::new(),
            chunk_index: 0,
            crawl_sequence: 1,
            content_hash: content_hash(&content, category),
            content,
            content_type: ContentType::Prose,
            category,
            subcategory: match category {
                Category::Code => Subcategory::FencedBlock,
                _ => Subcategory::Explanation,
            },
            importance_score: importance,
            confidence_score: 0.9,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn groups_need_two_bits() {
        let bits = vec![
            bit("a", Category::Code, &["rust", "tokio"], 0.8),
            bit("b", Category::Code, &["rust"], 0.6),
            bit("c", Category::Concept, &["rust"], 0.9),
        ];
        let patterns = mine_patterns(&bits, "scope", &AnalyzerConfig::default());

        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.category, Category::Code);
        assert_eq!(p.tags, BTreeSet::from(["rust".to_string()]));
        assert_eq!(p.supporting_bit_ids.len(), 2);
        assert!((p.strength - (2.0 * 0.5 + 0.8 + 0.6)).abs() < 1e-9);
        assert_eq!(p.pattern_id, Pattern::id_for(Category::Code, &p.tags));
        assert_eq!(p.scope_key, "scope");
    }

    #[test]
    fn tag_pairs_form_patterns() {
        let bits = vec![
            bit("a", Category::Code, &["rust", "tokio"], 0.5),
            bit("b", Category::Code, &["rust", "tokio"], 0.5),
        ];
        let patterns = mine_patterns(&bits, "scope", &AnalyzerConfig::default());
        let keys: Vec<Vec<&str>> = patterns
            .iter()
            .map(|p| p.tags.iter().map(String::as_str).collect())
            .collect();
        assert_eq!(patterns.len(), 3);
        assert!(keys.contains(&vec!["rust", "tokio"]));
        assert!(patterns.iter().all(|p| p.description.starts_with("2 code bits tagged")));
    }

    #[test]
    fn sorted_by_strength_then_id() {
        let bits = vec![
            bit("a", Category::Code, &["rust"], 0.1),
            bit("b", Category::Code, &["rust"], 0.1),
            bit("c", Category::Concept, &["sql"], 0.9),
            bit("d", Category::Concept, &["sql"], 0.9),
            bit("e", Category::Concept, &["sql"], 0.9),
        ];
        let patterns = mine_patterns(&bits, "scope", &AnalyzerConfig::default());
        assert_eq!(patterns[0].category, Category::Concept);
        for pair in patterns.windows(2) {
            assert!(pair[0].strength >= pair[1].strength);
        }
    }

    #[test]
    fn strength_never_drops_with_more_evidence() {
        let config = AnalyzerConfig::default();
        let mut bits = vec![
            bit("a", Category::Procedure, &["docker", "linux"], 0.9),
            bit("b", Category::Procedure, &["docker", "linux"], 0.7),
        ];
        let before: BTreeMap<String, f64> = mine_patterns(&bits, "s", &config)
            .into_iter()
            .map(|p| (p.pattern_id, p.strength))
            .collect();

        // A weak extra bit lowers the average importance but not the strength.
        bits.push(bit("c", Category::Procedure, &["docker"], 0.0));
        let after: BTreeMap<String, f64> = mine_patterns(&bits, "s", &config)
            .into_iter()
            .map(|p| (p.pattern_id, p.strength))
            .collect();

        assert!(!before.is_empty());
        for (id, strength) in &before {
            assert!(after[id] >= *strength, "pattern {id} weakened");
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = AnalyzerConfig {
            min_support: 1,
            support_weight: 0.5,
        };
        assert!(bad.validate().is_err());
        let bad = AnalyzerConfig {
            min_support: 2,
            support_weight: 0.0,
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn analyze_writes_patterns_not_bits() {
        let store = Arc::new(PatternStore::open_in_memory().await.unwrap());
        for (content, tags) in [
            ("fn a() {}", ["rust", "async"]),
            ("fn b() {}", ["rust", "cli"]),
        ] {
            let mut b = bit(content, Category::Code, &tags, 0.6);
            b.content = content.into();
            b.content_hash = content_hash(content, Category::Code);
            store.insert(&b).await.unwrap();
        }

        let analyzer =
            PatternAnalyzer::new(Arc::clone(&store), AnalyzerConfig::default()).unwrap();
        let scope = AnalysisScope::default();
        let patterns = analyzer.analyze(&scope).await.unwrap();

        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].tags, BTreeSet::from(["rust".to_string()]));
        assert_eq!(store.count_bits().await.unwrap(), 2);

        let stored = store
            .query_patterns(&PatternFilter {
                scope_key: Some(scope.scope_key()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].pattern_id, patterns[0].pattern_id);
        assert_eq!(stored[0].supporting_bit_ids, patterns[0].supporting_bit_ids);

        let bits = store
            .query(&BitFilter::default())
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert!(bits.iter().all(|b| b.tags.len() == 2));
    }
}
