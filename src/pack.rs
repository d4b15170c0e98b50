//! Compliance packs: rule evaluation, citation attachment, and scoring.
//!
//! A [`Pack`] turns an [`AnalysisInput`] into checklist items. The built-in
//! [`RulePack`] is declared in config under `[packs.<id>]` and evaluates
//! each rule with a keyword heuristic. [`run_pack`] then attaches
//! citations from the knowledge base and computes the weighted score.
//!
//! ```text
//! AnalysisInput ─▶ Pack::evaluate ─▶ attach_all ─▶ score ─▶ PackResult
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use compliance_kb_core::citation::{CitationAttacher, CitationScope};
use compliance_kb_core::models::{
    CheckStatus, ChecklistItem, Criticality, PackResult, PackStatus,
};
use compliance_kb_core::score::ScoringPolicy;
use compliance_kb_core::search::Retriever;

use crate::citations::attach_all;
use crate::config::{Config, PackConfig};
use crate::embedding::create_provider;
use crate::search::open_store;

/// The document under analysis.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisInput {
    pub text: String,
}

/// A set of compliance checks bound to one regulation version.
#[async_trait]
pub trait Pack: Send + Sync {
    fn id(&self) -> &str;
    /// Knowledge-base version citations are drawn from.
    fn version(&self) -> &str;
    fn title(&self) -> &str;
    async fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<ChecklistItem>>;
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub key: String,
    pub title: String,
    pub description: String,
    pub criticality: Criticality,
    pub keywords: Vec<String>,
    pub recommendation: Option<String>,
}

impl Rule {
    /// All keywords present → Pass, some → Warn, none → Fail.
    pub fn evaluate(&self, text: &str) -> CheckStatus {
        if text.trim().is_empty() {
            return CheckStatus::Unknown;
        }
        let haystack = text.to_lowercase();
        let found = self
            .keywords
            .iter()
            .filter(|k| haystack.contains(&k.to_lowercase()))
            .count();
        if found == self.keywords.len() {
            CheckStatus::Pass
        } else if found > 0 {
            CheckStatus::Warn
        } else {
            CheckStatus::Fail
        }
    }
}

/// A pack whose checks are keyword rules from configuration.
#[derive(Debug, Clone)]
pub struct RulePack {
    id: String,
    version: String,
    title: String,
    rules: Vec<Rule>,
}

impl RulePack {
    pub fn from_config(id: &str, config: &PackConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let criticality = Criticality::try_from(rule.criticality)
                .map_err(|e| anyhow::anyhow!("pack '{id}' rule '{}': {e}", rule.key))?;
            let keywords: Vec<String> = rule
                .keywords
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                bail!("pack '{id}' rule '{}': keywords must not be empty", rule.key);
            }
            rules.push(Rule {
                key: rule.key.clone(),
                title: rule.title.clone(),
                description: rule.description.clone(),
                criticality,
                keywords,
                recommendation: rule.recommendation.clone(),
            });
        }
        Ok(Self {
            id: id.to_string(),
            version: config.version.clone(),
            title: config.title.clone().unwrap_or_else(|| id.to_string()),
            rules,
        })
    }
}

#[async_trait]
impl Pack for RulePack {
    fn id(&self) -> &str {
        &self.id
    }
    fn version(&self) -> &str {
        &self.version
    }
    fn title(&self) -> &str {
        &self.title
    }

    async fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<ChecklistItem>> {
        Ok(self
            .rules
            .iter()
            .map(|rule| {
                let status = rule.evaluate(&input.text);
                let mut item = ChecklistItem::new(
                    rule.key.clone(),
                    rule.title.clone(),
                    rule.description.clone(),
                    status,
                    rule.criticality,
                );
                if status != CheckStatus::Pass {
                    item.recommendation = rule.recommendation.clone();
                }
                item
            })
            .collect())
    }
}

/// Registered packs, looked up by id.
pub struct PackRegistry {
    packs: Vec<Arc<dyn Pack>>,
}

impl PackRegistry {
    pub fn new() -> Self {
        Self { packs: Vec::new() }
    }

    /// A registry holding one [`RulePack`] per `[packs.<id>]` section.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for (id, pack) in &config.packs {
            registry.register(Arc::new(RulePack::from_config(id, pack)?));
        }
        Ok(registry)
    }

    /// Register a pack. A pack with the same id is replaced.
    pub fn register(&mut self, pack: Arc<dyn Pack>) {
        self.packs.retain(|p| p.id() != pack.id());
        self.packs.push(pack);
    }

    pub fn find(&self, id: &str) -> Option<Arc<dyn Pack>> {
        self.packs.iter().find(|p| p.id() == id).cloned()
    }

    pub fn packs(&self) -> &[Arc<dyn Pack>] {
        &self.packs
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packs.len()
    }
}

impl Default for PackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Citation fan-out settings for a pack run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub concurrency: usize,
    pub citation_timeout: Duration,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.citations.concurrency,
            citation_timeout: Duration::from_secs(config.retrieval.timeout_secs),
        }
    }
}

/// `"<n> passed, <n> warnings, <n> failed, <n> unknown"`.
pub fn summarize(items: &[ChecklistItem]) -> String {
    let count = |s: CheckStatus| items.iter().filter(|i| i.status == s).count();
    format!(
        "{} passed, {} warnings, {} failed, {} unknown",
        count(CheckStatus::Pass),
        count(CheckStatus::Warn),
        count(CheckStatus::Fail),
        count(CheckStatus::Unknown)
    )
}

/// Evaluate `pack`, attach citations, and score.
///
/// Only an evaluation error fails the run. Citation lookups are best-effort
/// and never change the status.
pub async fn run_pack(
    pack: &dyn Pack,
    input: &AnalysisInput,
    attacher: &CitationAttacher,
    policy: &ScoringPolicy,
    opts: &RunOptions,
) -> PackResult {
    let items = match pack.evaluate(input).await {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(pack = pack.id(), error = %format!("{e:#}"), "pack evaluation failed");
            return PackResult {
                pack_id: pack.id().to_string(),
                version: pack.version().to_string(),
                status: PackStatus::Failed,
                score: 0,
                items: Vec::new(),
                summary: None,
                errors: vec![format!("{e:#}")],
            };
        }
    };

    let scope = CitationScope::new(pack.id(), pack.version());
    let items = attach_all(attacher, &scope, items, opts.concurrency, opts.citation_timeout).await;

    let status = if items.iter().any(|i| i.status == CheckStatus::Unknown) {
        PackStatus::Partial
    } else {
        PackStatus::Completed
    };

    PackResult {
        pack_id: pack.id().to_string(),
        version: pack.version().to_string(),
        status,
        score: policy.score(&items),
        summary: Some(summarize(&items)),
        items,
        errors: Vec::new(),
    }
}

/// An attacher over the configured KB, or a disabled one.
///
/// An unconfigured KB, or a database that cannot be opened, yields a
/// disabled attacher. Embedding settings that do not build a provider are
/// an error.
pub async fn build_attacher(config: &Config) -> Result<CitationAttacher> {
    let opts = config.citations.options();
    if !config.kb_configured() {
        return Ok(CitationAttacher::disabled(opts));
    }
    let provider = create_provider(&config.embedding)?;
    match open_store(config).await {
        Ok(store) => Ok(CitationAttacher::new(Retriever::new(store, provider), opts)),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "knowledge base unavailable; citations disabled");
            Ok(CitationAttacher::disabled(opts))
        }
    }
}

/// `ckb analyze` entry point.
pub async fn run_analyze(config: &Config, pack_id: &str, file: &Path, json: bool) -> Result<()> {
    let registry = PackRegistry::from_config(config)?;
    let Some(pack) = registry.find(pack_id) else {
        let known: Vec<&str> = registry.packs().iter().map(|p| p.id()).collect();
        bail!(
            "Unknown pack: '{}'. Configured packs: {}",
            pack_id,
            if known.is_empty() { "(none)".to_string() } else { known.join(", ") }
        );
    };

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read document: {}", file.display()))?;
    let attacher = build_attacher(config).await?;
    let result = run_pack(
        pack.as_ref(),
        &AnalysisInput { text },
        &attacher,
        &config.scoring,
        &RunOptions::from_config(config),
    )
    .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{} ({}@{})", pack.title(), result.pack_id, result.version);
    println!("  status: {:?}", result.status);
    println!("  score: {}/100", result.score);
    if let Some(ref summary) = result.summary {
        println!("  {}", summary);
    }
    println!();
    for item in &result.items {
        let status = format!("{:?}", item.status).to_uppercase();
        println!("  [{:<7}] {} (criticality {})", status, item.title, item.criticality.get());
        if let Some(ref rec) = item.recommendation {
            println!("            → {}", rec);
        }
        for c in &item.citations {
            let article = c.article.as_deref().map(|a| format!(" art. {a}")).unwrap_or_default();
            println!("            cites {}{} [{:.2}] {}", c.reg_code, article, c.confidence, c.url);
        }
    }
    for err in &result.errors {
        eprintln!("  error: {}", err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_kb_core::citation::CitationOptions;
    use compliance_kb_core::KbError;

    fn rule(key: &str, criticality: u8, keywords: &[&str]) -> Rule {
        Rule {
            key: key.into(),
            title: format!("{key} title"),
            description: format!("{key} description"),
            criticality: Criticality::try_from(criticality).unwrap(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            recommendation: Some(format!("fix {key}")),
        }
    }

    fn pack(rules: Vec<Rule>) -> RulePack {
        RulePack {
            id: "zatca".into(),
            version: "2024.1".into(),
            title: "ZATCA".into(),
            rules,
        }
    }

    struct BrokenPack;

    #[async_trait]
    impl Pack for BrokenPack {
        fn id(&self) -> &str {
            "broken"
        }
        fn version(&self) -> &str {
            "v1"
        }
        fn title(&self) -> &str {
            "Broken"
        }
        async fn evaluate(&self, _input: &AnalysisInput) -> Result<Vec<ChecklistItem>> {
            bail!("rule table corrupt")
        }
    }

    fn opts() -> RunOptions {
        RunOptions {
            concurrency: 4,
            citation_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_rule_evaluation() {
        let r = rule("vat", 5, &["vat", "registration number"]);
        assert_eq!(r.evaluate("VAT Registration Number: 300000000000003"), CheckStatus::Pass);
        assert_eq!(r.evaluate("VAT: 15%"), CheckStatus::Warn);
        assert_eq!(r.evaluate("Total due"), CheckStatus::Fail);
        assert_eq!(r.evaluate("   "), CheckStatus::Unknown);
    }

    #[test]
    fn test_summarize() {
        let items = vec![
            ChecklistItem::new("a", "", "", CheckStatus::Pass, Criticality::try_from(1).unwrap()),
            ChecklistItem::new("b", "", "", CheckStatus::Fail, Criticality::try_from(1).unwrap()),
            ChecklistItem::new("c", "", "", CheckStatus::Fail, Criticality::try_from(1).unwrap()),
        ];
        assert_eq!(summarize(&items), "1 passed, 0 warnings, 2 failed, 0 unknown");
    }

    #[tokio::test]
    async fn test_run_pack_completed_with_disabled_kb() {
        let p = pack(vec![rule("vat", 3, &["vat"]), rule("qr", 3, &["qr code", "stamp"])]);
        let attacher = CitationAttacher::disabled(CitationOptions::default());
        let input = AnalysisInput {
            text: "VAT number and QR code printed".into(),
        };
        let result = run_pack(&p, &input, &attacher, &ScoringPolicy::default(), &opts()).await;
        assert_eq!(result.status, PackStatus::Completed);
        assert_eq!(result.score, 75);
        assert_eq!(result.summary.as_deref(), Some("1 passed, 1 warnings, 0 failed, 0 unknown"));
        assert!(result.items.iter().all(|i| i.citations.is_empty()));
        assert_eq!(result.items[0].recommendation, None);
        assert_eq!(result.items[1].recommendation.as_deref(), Some("fix qr"));
    }

    #[tokio::test]
    async fn test_blank_document_is_partial() {
        let p = pack(vec![rule("vat", 3, &["vat"])]);
        let attacher = CitationAttacher::disabled(CitationOptions::default());
        let input = AnalysisInput { text: "".into() };
        let result = run_pack(&p, &input, &attacher, &ScoringPolicy::default(), &opts()).await;
        assert_eq!(result.status, PackStatus::Partial);
        assert_eq!(result.score, 0);
    }

    #[tokio::test]
    async fn test_evaluation_error_fails_pack() {
        let attacher = CitationAttacher::disabled(CitationOptions::default());
        let input = AnalysisInput { text: "x".into() };
        let result = run_pack(&BrokenPack, &input, &attacher, &ScoringPolicy::default(), &opts()).await;
        assert_eq!(result.status, PackStatus::Failed);
        assert_eq!(result.score, 0);
        assert_eq!(result.errors, vec!["rule table corrupt".to_string()]);
    }

    #[test]
    fn test_registry_from_config() {
        let config: Config = toml::from_str(
            r#"
            [packs.zatca]
            version = "2024.1"
            [[packs.zatca.rules]]
            key = "vat"
            title = "VAT"
            criticality = 5
            keywords = ["vat"]
            "#,
        )
        .unwrap();
        let registry = PackRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 1);
        let p = registry.find("zatca").unwrap();
        assert_eq!(p.title(), "zatca");
        assert_eq!(p.version(), "2024.1");
        assert!(registry.find("other").is_none());
    }

    fn kb_config(db_path: &Path, embedding: &str) -> Config {
        toml::from_str(&format!(
            "[db]\npath = {:?}\n\n[embedding]\n{embedding}\n",
            db_path.display().to_string()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_attacher_missing_api_key_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::env::remove_var("OPENAI_API_KEY");
        let config = kb_config(
            &dir.path().join("kb.db"),
            "provider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536",
        );
        let err = build_attacher(&config).await.err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        assert!(matches!(err.downcast_ref::<KbError>(), Some(KbError::Config(_))));
    }

    #[tokio::test]
    async fn test_attacher_disabled_without_kb() {
        let config: Config = toml::from_str("").unwrap();
        assert!(!build_attacher(&config).await.unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_attacher_unreachable_db_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let config = kb_config(&blocker.join("kb.db"), "provider = \"hash\"\ndims = 64");
        let attacher = build_attacher(&config).await.unwrap();
        assert!(!attacher.is_enabled());
    }

    #[tokio::test]
    async fn test_attacher_enabled_with_kb() {
        let dir = tempfile::tempdir().unwrap();
        let config = kb_config(&dir.path().join("kb.db"), "provider = \"hash\"\ndims = 64");
        assert!(build_attacher(&config).await.unwrap().is_enabled());
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = PackRegistry::new();
        registry.register(Arc::new(pack(vec![])));
        registry.register(Arc::new(pack(vec![rule("vat", 1, &["vat"])])));
        assert_eq!(registry.len(), 1);
    }
}
