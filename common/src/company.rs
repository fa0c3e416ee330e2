//! Companies that can be analyzed, and the explicit registry holding them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A public company plus the capability flags processors use to decide
/// whether they apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// Unique identifier, usually the ticker symbol
    pub id: String,
    pub ticker: String,
    pub name: String,
    #[serde(default)]
    pub cik: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default = "default_country")]
    pub country: String,

    #[serde(default = "default_true")]
    pub has_sec_filings: bool,
    #[serde(default)]
    pub has_app: bool,
    #[serde(default)]
    pub has_physical_locations: bool,
    #[serde(default)]
    pub is_tech_company: bool,
    #[serde(default = "default_true")]
    pub is_public_company: bool,

    /// Company-specific extras (competitors, article names, geographies...)
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_country() -> String {
    "US".to_string()
}

fn default_true() -> bool {
    true
}

impl Company {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            ticker: id.clone(),
            id,
            name: name.into(),
            cik: None,
            sector: None,
            industry: None,
            country: default_country(),
            has_sec_filings: true,
            has_app: false,
            has_physical_locations: false,
            is_tech_company: false,
            is_public_company: true,
            metadata: serde_json::Map::new(),
        }
    }

    /// String value from the free-form metadata map.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Registry of companies available for analysis.
///
/// Built explicitly at startup (usually from the config file) and passed by
/// reference to whatever needs it.
#[derive(Debug, Clone, Default)]
pub struct CompanyRegistry {
    companies: BTreeMap<String, Company>,
}

impl CompanyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_companies(companies: impl IntoIterator<Item = Company>) -> Self {
        let mut registry = Self::new();
        for company in companies {
            registry.register(company);
        }
        registry
    }

    pub fn register(&mut self, company: Company) {
        if self.companies.contains_key(&company.id) {
            warn!(company = %company.id, "Replacing already registered company");
        }
        self.companies.insert(company.id.clone(), company);
    }

    pub fn get(&self, company_id: &str) -> Option<&Company> {
        self.companies.get(company_id)
    }

    pub fn list_all(&self) -> Vec<&Company> {
        self.companies.values().collect()
    }

    pub fn len(&self) -> usize {
        self.companies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_defaults_from_toml() {
        let company: Company = toml::from_str(
            r#"
            id = "UBER"
            ticker = "UBER"
            name = "Uber Technologies Inc"
            has_app = true
            "#,
        )
        .unwrap();

        assert!(company.has_sec_filings);
        assert!(company.is_public_company);
        assert!(company.has_app);
        assert!(!company.has_physical_locations);
        assert_eq!(company.country, "US");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = CompanyRegistry::from_companies(vec![
            Company::new("UBER", "Uber Technologies Inc"),
            Company::new("LYFT", "Lyft Inc"),
        ]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("LYFT").map(|c| c.name.as_str()), Some("Lyft Inc"));
        assert!(registry.get("ABNB").is_none());

        let ids: Vec<&str> = registry.list_all().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["LYFT", "UBER"]);
    }
}
