//! Website profiles: target hosts and the pages virtual users visit

use crate::error::{ConfigError, ConfigResult};
use crate::validation::{
    validate_relative_path, validate_required_string, validate_url, Validatable,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Environment variable selecting the active website profile
pub const PROFILE_ENV_VAR: &str = "WEBSITE_PROFILE";

/// All website profiles plus the name of the default one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebsiteProfiles {
    pub default_profile: String,
    pub profiles: BTreeMap<String, WebsiteProfile>,
}

/// A single target website
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebsiteProfile {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub base_url: String,

    /// Named endpoints such as `search` or `course_detail`
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,

    #[serde(default)]
    pub categories: Vec<Category>,

    #[serde(default = "default_search_terms")]
    pub search_terms: Vec<String>,

    #[serde(default = "default_static_pages")]
    pub static_pages: Vec<StaticPage>,

    /// Catalogue listings reachable under `subcategory_prefix`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalog: Vec<CatalogEntry>,

    /// Names used by instructor searches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructors: Vec<String>,

    /// Prefix for subcategory and catalogue pages
    #[serde(default = "default_subcategory_prefix")]
    pub subcategory_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub subcategories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticPage {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
}

impl WebsiteProfiles {
    /// Resolve a profile: explicit name, then `WEBSITE_PROFILE`, then the default.
    pub fn select(&self, explicit: Option<&str>) -> ConfigResult<(&str, &WebsiteProfile)> {
        self.select_for(explicit, None)
    }

    /// Like [`select`](Self::select), with a test's own profile tried after
    /// `WEBSITE_PROFILE` and before the default.
    pub fn select_for(
        &self,
        explicit: Option<&str>,
        test_profile: Option<&str>,
    ) -> ConfigResult<(&str, &WebsiteProfile)> {
        let env_choice = std::env::var(PROFILE_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty());
        let name = explicit
            .map(str::to_string)
            .or(env_choice)
            .or_else(|| test_profile.map(str::to_string))
            .unwrap_or_else(|| self.default_profile.clone());
        self.get_entry(&name)
    }

    /// Look up a profile by name
    pub fn get(&self, name: &str) -> ConfigResult<&WebsiteProfile> {
        self.get_entry(name).map(|(_, profile)| profile)
    }

    fn get_entry(&self, name: &str) -> ConfigResult<(&str, &WebsiteProfile)> {
        self.profiles
            .get_key_value(name)
            .map(|(key, profile)| (key.as_str(), profile))
            .ok_or_else(|| ConfigError::not_found("Profile", name, self.profiles.keys()))
    }

    /// The profile named by `default_profile`
    pub fn default_site(&self) -> ConfigResult<&WebsiteProfile> {
        self.get(&self.default_profile)
    }

    /// Make `name` the default profile. Other profiles are untouched.
    pub fn set_default_profile(&mut self, name: &str) -> ConfigResult<()> {
        if !self.profiles.contains_key(name) {
            return Err(ConfigError::not_found("Profile", name, self.profiles.keys()));
        }
        self.default_profile = name.to_string();
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    /// Check every profile, collecting all problems instead of stopping at the first.
    pub fn violations(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();
        if !self.profiles.contains_key(&self.default_profile) {
            problems.push(ConfigError::not_found(
                "Profile",
                &self.default_profile,
                self.profiles.keys(),
            ));
        }
        for (key, profile) in &self.profiles {
            problems.extend(profile.violations(key));
        }
        problems
    }
}

impl Validatable for WebsiteProfiles {
    fn validate(&self) -> ConfigResult<()> {
        match self.violations().into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(()),
        }
    }

    fn domain_name(&self) -> String {
        "website_profiles".to_string()
    }
}

impl WebsiteProfile {
    pub fn endpoint(&self, key: &str) -> Option<&str> {
        self.endpoints.get(key).map(String::as_str)
    }

    pub fn subcategory_path(&self, slug: &str) -> String {
        format!("{}/{}", self.subcategory_prefix.trim_end_matches('/'), slug)
    }

    fn violations(&self, key: &str) -> Vec<ConfigError> {
        let domain = format!("website_profiles.{}", key);
        let mut problems = Vec::new();
        let mut check = |result: ConfigResult<()>| {
            if let Err(e) = result {
                problems.push(e);
            }
        };

        check(validate_required_string(&self.name, "name", &domain));
        check(validate_url(&self.base_url, "base_url", &domain));
        for (endpoint, path) in &self.endpoints {
            check(validate_relative_path(
                path,
                &format!("endpoints.{}", endpoint),
                &domain,
            ));
        }
        for category in &self.categories {
            check(validate_required_string(&category.name, "categories.name", &domain));
            check(validate_relative_path(
                &category.url,
                &format!("categories[{}].url", category.name),
                &domain,
            ));
            for slug in &category.subcategories {
                check(validate_relative_path(
                    &self.subcategory_path(slug),
                    &format!("categories[{}].subcategories", category.name),
                    &domain,
                ));
            }
        }
        for page in &self.static_pages {
            check(validate_relative_path(
                &page.path,
                &format!("static_pages[{}].path", page.name),
                &domain,
            ));
        }
        check(validate_relative_path(
            &self.subcategory_prefix,
            "subcategory_prefix",
            &domain,
        ));
        if self.search_terms.iter().any(|term| term.trim().is_empty()) {
            check(Err(ConfigError::DomainError {
                domain: domain.clone(),
                message: "search_terms cannot contain empty terms".to_string(),
            }));
        }
        problems
    }
}

impl Validatable for WebsiteProfile {
    fn validate(&self) -> ConfigResult<()> {
        match self.violations(&self.name).into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(()),
        }
    }

    fn domain_name(&self) -> String {
        format!("website_profiles.{}", self.name)
    }
}

// Default value functions
pub fn default_search_terms() -> Vec<String> {
    [
        "schule",
        "unterricht",
        "lehrer",
        "student",
        "abitur",
        "klausur",
        "ferien",
        "termine",
        "anmeldung",
        "kontakt",
        "impressum",
        "news",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn default_static_pages() -> Vec<StaticPage> {
    [
        ("Contact", "/kontakt"),
        ("Impressum", "/impressum"),
        ("About Us", "/ueber-uns"),
        ("Privacy Policy", "/datenschutzerklaerung"),
        ("Terms of Service", "/agb"),
        ("Registration & Consultation", "/anmeldung-beratung"),
    ]
    .into_iter()
    .map(|(name, path)| StaticPage {
        name: name.to_string(),
        path: path.to_string(),
    })
    .collect()
}

fn default_subcategory_prefix() -> String {
    "/kurse".to_string()
}
