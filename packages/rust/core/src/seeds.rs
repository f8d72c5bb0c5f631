//! Query → seed URL resolution.

use async_trait::async_trait;
use url::Url;

use intelgraph_shared::{IntelError, Result, SeedsConfig};

/// Turns a topic query into the URLs a crawl starts from.
#[async_trait]
pub trait SeedResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Vec<Url>>;
}

/// Expands URL templates, replacing `{query}` with the underscore-joined,
/// percent-encoded query (`Elon Musk` → `Elon_Musk`).
#[derive(Debug, Clone)]
pub struct TemplateSeedResolver {
    templates: Vec<String>,
}

impl TemplateSeedResolver {
    pub fn new(templates: Vec<String>) -> Self {
        Self { templates }
    }
}

impl Default for TemplateSeedResolver {
    fn default() -> Self {
        Self::from(&SeedsConfig::default())
    }
}

impl From<&SeedsConfig> for TemplateSeedResolver {
    fn from(config: &SeedsConfig) -> Self {
        Self::new(config.templates.clone())
    }
}

fn encode_query(query: &str) -> String {
    let joined = query.split_whitespace().collect::<Vec<_>>().join("_");
    url::form_urlencoded::byte_serialize(joined.as_bytes()).collect()
}

#[async_trait]
impl SeedResolver for TemplateSeedResolver {
    async fn resolve(&self, query: &str) -> Result<Vec<Url>> {
        let encoded = encode_query(query);
        if encoded.is_empty() {
            return Err(IntelError::Seeds("query is empty".into()));
        }

        let mut seeds = Vec::new();
        for template in &self.templates {
            let raw = template.replace("{query}", &encoded);
            match Url::parse(&raw) {
                Ok(url) => seeds.push(url),
                Err(e) => tracing::warn!(template, error = %e, "seed template produced an invalid URL"),
            }
        }
        Ok(seeds)
    }
}

/// Fixed seed list, regardless of the query.
#[derive(Debug, Clone, Default)]
pub struct StaticSeedResolver {
    seeds: Vec<Url>,
}

impl StaticSeedResolver {
    pub fn new(seeds: Vec<Url>) -> Self {
        Self { seeds }
    }

    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self> {
        let seeds = raw
            .iter()
            .map(|s| {
                Url::parse(s.as_ref())
                    .map_err(|e| IntelError::Seeds(format!("invalid seed '{}': {e}", s.as_ref())))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(seeds))
    }
}

#[async_trait]
impl SeedResolver for StaticSeedResolver {
    async fn resolve(&self, _query: &str) -> Result<Vec<Url>> {
        Ok(self.seeds.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wikipedia_template_by_default() {
        let seeds = TemplateSeedResolver::default()
            .resolve("  Elon   Musk ")
            .await
            .unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].as_str(), "https://en.wikipedia.org/wiki/Elon_Musk");
    }

    #[tokio::test]
    async fn query_is_percent_encoded() {
        let resolver = TemplateSeedResolver::new(vec![
            "https://search.example/?q={query}".into(),
            "not a url {query}".into(),
        ]);
        let seeds = resolver.resolve("AT&T Inc").await.unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].as_str(), "https://search.example/?q=AT%26T_Inc");
    }

    #[tokio::test]
    async fn empty_query_rejected() {
        assert!(TemplateSeedResolver::default().resolve("   ").await.is_err());
    }

    #[tokio::test]
    async fn static_seeds() {
        assert!(StaticSeedResolver::parse(&["nope"]).is_err());
        let resolver = StaticSeedResolver::parse(&["https://a.example/"]).unwrap();
        assert_eq!(resolver.resolve("anything").await.unwrap().len(), 1);
    }
}
