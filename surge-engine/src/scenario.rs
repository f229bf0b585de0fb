//! Scenario definitions: what each class of visitor does and how often

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use surge_config::{UserClassWeights, WebsiteProfile};

/// A single kind of page visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Homepage,
    BrowseCategory,
    BrowseSubcategory,
    ViewDetail,
    StaticPage,
    Search,
    /// Search using only short terms
    ShortSearch,
    CategorySearch,
    InstructorSearch,
    AdvancedSearch,
}

impl Action {
    pub fn is_search(&self) -> bool {
        matches!(
            self,
            Action::Search
                | Action::ShortSearch
                | Action::CategorySearch
                | Action::InstructorSearch
                | Action::AdvancedSearch
        )
    }
}

/// When a step fires
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Chance {
    Always,
    Fixed(f64),
    /// The behaviour's `search_probability`
    SearchProbability,
}

impl Chance {
    fn roll<R: Rng + ?Sized>(&self, rng: &mut R, search_probability: f64) -> bool {
        let p = match *self {
            Chance::Always => return true,
            Chance::Fixed(p) => p,
            Chance::SearchProbability => search_probability,
        };
        rng.random_bool(p.clamp(0.0, 1.0))
    }
}

/// One step of a task
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// One of these is picked uniformly each repetition
    pub actions: &'static [Action],
    pub chance: Chance,
    /// Only runs when the previous step ran
    pub chained: bool,
    /// Pause for reading time afterwards
    pub read_after: bool,
    pub repeat: (u32, u32),
}

impl Step {
    pub const fn new(actions: &'static [Action]) -> Self {
        Self {
            actions,
            chance: Chance::Always,
            chained: false,
            read_after: false,
            repeat: (1, 1),
        }
    }

    pub const fn chance(mut self, chance: Chance) -> Self {
        self.chance = chance;
        self
    }

    pub const fn chained(mut self) -> Self {
        self.chained = true;
        self
    }

    pub const fn read(mut self) -> Self {
        self.read_after = true;
        self
    }

    pub const fn repeat(mut self, min: u32, max: u32) -> Self {
        self.repeat = (min, max);
        self
    }

    /// Decide whether the step fires given whether the previous one did
    pub fn fires<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        previous_ran: bool,
        search_probability: f64,
    ) -> bool {
        if self.chained && !previous_ran {
            return false;
        }
        self.chance.roll(rng, search_probability)
    }

    pub fn repetitions<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let (min, max) = self.repeat;
        if max <= min {
            min
        } else {
            rng.random_range(min..=max)
        }
    }

    pub fn pick_action<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Action> {
        self.actions.choose(rng).copied()
    }
}

/// A weighted unit of behaviour made of ordered steps
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub name: &'static str,
    pub weight: u32,
    pub steps: Vec<Step>,
}

impl Task {
    fn new(name: &'static str, weight: u32, steps: Vec<Step>) -> Self {
        Self {
            name,
            weight,
            steps,
        }
    }
}

const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_7_1 like Mac OS X) \
AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.2 Mobile/15E148 Safari/604.1";

/// Visitor archetypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserClass {
    Normal,
    Active,
    Power,
    Browser,
    Mobile,
}

impl UserClass {
    pub const ALL: [UserClass; 5] = [
        UserClass::Normal,
        UserClass::Active,
        UserClass::Power,
        UserClass::Browser,
        UserClass::Mobile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserClass::Normal => "normal",
            UserClass::Active => "active",
            UserClass::Power => "power",
            UserClass::Browser => "browser",
            UserClass::Mobile => "mobile",
        }
    }

    pub fn weight_in(&self, weights: &UserClassWeights) -> u32 {
        match self {
            UserClass::Normal => weights.normal,
            UserClass::Active => weights.active,
            UserClass::Power => weights.power,
            UserClass::Browser => weights.browser,
            UserClass::Mobile => weights.mobile,
        }
    }

    /// Think-time range in seconds between tasks. `None` falls back to the
    /// behaviour's range.
    pub fn wait_time(&self) -> Option<(f64, f64)> {
        match self {
            UserClass::Normal => Some((10.0, 15.0)),
            UserClass::Active => Some((5.0, 15.0)),
            UserClass::Power => Some((0.5, 2.0)),
            UserClass::Browser => Some((3.0, 8.0)),
            UserClass::Mobile => Some((1.5, 4.0)),
        }
    }

    /// User agent replacing the session default, if any
    pub fn user_agent(&self) -> Option<&'static str> {
        match self {
            UserClass::Mobile => Some(MOBILE_USER_AGENT),
            _ => None,
        }
    }

    /// The weighted task table of this class
    pub fn tasks(&self) -> Vec<Task> {
        use Action::*;

        match self {
            UserClass::Normal => vec![
                Task::new("homepage", 2, vec![Step::new(&[Homepage]).read()]),
                Task::new("browse_categories", 2, vec![Step::new(&[BrowseCategory]).read()]),
                Task::new(
                    "simple_search",
                    2,
                    vec![Step::new(&[Search]).chance(Chance::SearchProbability).read()],
                ),
                Task::new("view_details", 0, vec![Step::new(&[ViewDetail]).read()]),
                Task::new("static_pages", 1, vec![Step::new(&[StaticPage]).read()]),
            ],
            UserClass::Active => vec![
                Task::new(
                    "search",
                    11,
                    vec![
                        Step::new(&[Search]).read(),
                        Step::new(&[ViewDetail]).chance(Chance::Fixed(0.6)).chained(),
                    ],
                ),
                Task::new(
                    "browse_categories",
                    4,
                    vec![
                        Step::new(&[BrowseCategory]).read(),
                        Step::new(&[BrowseSubcategory])
                            .chance(Chance::Fixed(0.5))
                            .chained(),
                    ],
                ),
                Task::new("category_search", 3, vec![Step::new(&[CategorySearch]).read()]),
                Task::new("homepage", 1, vec![Step::new(&[Homepage])]),
                Task::new("static_pages", 1, vec![Step::new(&[StaticPage]).read()]),
                Task::new("instructor_search", 0, vec![Step::new(&[InstructorSearch]).read()]),
            ],
            UserClass::Power => vec![
                Task::new(
                    "intensive_search",
                    5,
                    vec![Step::new(&[Search, CategorySearch]).repeat(1, 3)],
                ),
                Task::new(
                    "deep_browsing",
                    3,
                    vec![
                        Step::new(&[BrowseCategory]),
                        Step::new(&[BrowseSubcategory])
                            .chance(Chance::Fixed(0.8))
                            .chained(),
                        Step::new(&[ViewDetail]).chance(Chance::Fixed(0.6)).chained(),
                    ],
                ),
                Task::new(
                    "advanced_search",
                    2,
                    vec![
                        Step::new(&[AdvancedSearch]),
                        Step::new(&[ViewDetail])
                            .chance(Chance::Fixed(0.7))
                            .chained()
                            .repeat(1, 3),
                    ],
                ),
                Task::new(
                    "rapid_navigation",
                    1,
                    vec![Step::new(&[Homepage, BrowseCategory, StaticPage, ViewDetail]).repeat(2, 3)],
                ),
            ],
            UserClass::Browser => vec![
                Task::new(
                    "casual_browsing",
                    4,
                    vec![
                        Step::new(&[Homepage]).read(),
                        Step::new(&[BrowseCategory]).chance(Chance::Fixed(0.6)).read(),
                    ],
                ),
                Task::new(
                    "occasional_search",
                    2,
                    vec![
                        Step::new(&[Search]).chance(Chance::Fixed(0.4)).read(),
                        Step::new(&[ViewDetail])
                            .chance(Chance::Fixed(0.3))
                            .chained()
                            .read(),
                    ],
                ),
                Task::new("info_pages", 2, vec![Step::new(&[StaticPage]).read()]),
                Task::new(
                    "view_courses",
                    1,
                    vec![Step::new(&[ViewDetail]).chance(Chance::Fixed(0.5)).read()],
                ),
            ],
            UserClass::Mobile => vec![
                Task::new("homepage", 3, vec![Step::new(&[Homepage]).read()]),
                Task::new(
                    "search",
                    3,
                    vec![Step::new(&[ShortSearch])
                        .chance(Chance::SearchProbability)
                        .read()],
                ),
                Task::new(
                    "browse_categories",
                    2,
                    vec![
                        Step::new(&[BrowseCategory]).read(),
                        Step::new(&[BrowseSubcategory])
                            .chance(Chance::Fixed(0.3))
                            .chained(),
                    ],
                ),
                Task::new("course_details", 1, vec![Step::new(&[ViewDetail]).read()]),
            ],
        }
    }
}

impl fmt::Display for UserClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weighted choice that never yields a zero-weight entry
#[derive(Debug, Clone)]
pub struct WeightedChoice<T> {
    items: Vec<T>,
    index: WeightedIndex<u32>,
}

impl<T> WeightedChoice<T> {
    /// `None` when every weight is zero
    pub fn new(entries: impl IntoIterator<Item = (T, u32)>) -> Option<Self> {
        let (items, weights): (Vec<T>, Vec<u32>) =
            entries.into_iter().filter(|(_, weight)| *weight > 0).unzip();
        let index = WeightedIndex::new(&weights).ok()?;
        Some(Self { items, index })
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &T {
        &self.items[self.index.sample(rng)]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Choose among the user classes by weight
pub fn class_mix(weights: &UserClassWeights) -> Option<WeightedChoice<UserClass>> {
    WeightedChoice::new(
        UserClass::ALL
            .iter()
            .map(|class| (*class, class.weight_in(weights))),
    )
}

/// Choose among a class's tasks by weight
pub fn task_mix(class: UserClass) -> Option<WeightedChoice<Task>> {
    WeightedChoice::new(class.tasks().into_iter().map(|task| {
        let weight = task.weight;
        (task, weight)
    }))
}

/// A concrete request: path to fetch and the name it is aggregated under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRequest {
    pub name: String,
    pub path: String,
    /// What was searched for; set for search actions only
    pub search_term: Option<String>,
}

impl PlannedRequest {
    fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            search_term: None,
        }
    }

    fn searching(mut self, term: impl Into<String>) -> Self {
        self.search_term = Some(term.into());
        self
    }
}

const DATE_FILTERS: [&str; 4] = ["today", "week", "month", "future"];
const PRICE_FILTERS: [&str; 4] = ["free", "low", "medium", "high"];
const SHORT_TERM_LEN: usize = 8;

/// Turns actions into requests against one website profile
#[derive(Debug, Clone)]
pub struct RequestPlanner {
    site: WebsiteProfile,
    short_terms: Vec<String>,
}

impl RequestPlanner {
    pub fn new(site: WebsiteProfile) -> Self {
        let short_terms = site
            .search_terms
            .iter()
            .filter(|term| term.chars().count() <= SHORT_TERM_LEN)
            .cloned()
            .collect();
        Self { site, short_terms }
    }

    /// `None` when the profile has nothing for this action
    pub fn plan<R: Rng + ?Sized>(&self, action: Action, rng: &mut R) -> Option<PlannedRequest> {
        match action {
            Action::Homepage => {
                let path = self.site.endpoint("homepage").unwrap_or("/");
                Some(PlannedRequest::new("Homepage", path))
            }
            Action::BrowseCategory => {
                let category = self.site.categories.choose(rng)?;
                Some(PlannedRequest::new(
                    format!("Category: {}", category.name),
                    category.url.clone(),
                ))
            }
            Action::BrowseSubcategory => {
                let with_subs: Vec<_> = self
                    .site
                    .categories
                    .iter()
                    .filter(|category| !category.subcategories.is_empty())
                    .collect();
                let category = with_subs.choose(rng)?;
                let slug = category.subcategories.choose(rng)?;
                Some(PlannedRequest::new(
                    format!("Subcategory: {}", slug),
                    self.site.subcategory_path(slug),
                ))
            }
            Action::ViewDetail => {
                let path = self.site.endpoint("course_detail")?;
                Some(PlannedRequest::new("Course Details", path))
            }
            Action::StaticPage => {
                let page = self.site.static_pages.choose(rng)?;
                Some(PlannedRequest::new(
                    format!("Static: {}", page.name),
                    page.path.clone(),
                ))
            }
            Action::Search => {
                let term = self.site.search_terms.choose(rng)?;
                Some(self.search(term, "Search", rng))
            }
            Action::ShortSearch => {
                let term = self.short_terms.choose(rng)?;
                Some(self.search(term, "Search", rng))
            }
            Action::CategorySearch => {
                let entry = self.site.catalog.choose(rng)?;
                Some(
                    PlannedRequest::new(
                        format!("Category: {}", entry.name),
                        self.site.subcategory_path(&entry.id),
                    )
                    .searching(&entry.name),
                )
            }
            Action::InstructorSearch => {
                let instructor = self.site.instructors.choose(rng)?;
                let endpoint = self.site.endpoint("instructor_search").unwrap_or("/dozent/");
                let query = with_cache_buster(&[("name", instructor.as_str())], rng);
                Some(
                    PlannedRequest::new("Instructor Search", format!("{}?{}", endpoint, query))
                        .searching(instructor),
                )
            }
            Action::AdvancedSearch => Some(self.advanced_search(rng)),
        }
    }

    fn search<R: Rng + ?Sized>(&self, term: &str, name: &str, rng: &mut R) -> PlannedRequest {
        let endpoint = self.site.endpoint("search").unwrap_or("/suche");
        let query = with_cache_buster(&[("q", term)], rng);
        PlannedRequest::new(name, format!("{}?{}", endpoint, query)).searching(term)
    }

    fn advanced_search<R: Rng + ?Sized>(&self, rng: &mut R) -> PlannedRequest {
        let mut params: Vec<(&str, &str)> = Vec::new();
        let mut term = "";
        if rng.random_bool(0.7) {
            if let Some(chosen) = self.site.search_terms.choose(rng) {
                term = chosen;
                params.push(("q", chosen));
            }
        }
        if rng.random_bool(0.5) {
            if let Some(category) = self.site.categories.choose(rng) {
                params.push(("category", &category.name));
            }
        }
        if rng.random_bool(0.3) {
            if let Some(date) = DATE_FILTERS.choose(rng) {
                params.push(("date", date));
            }
        }
        if rng.random_bool(0.3) {
            if let Some(price) = PRICE_FILTERS.choose(rng) {
                params.push(("price", price));
            }
        }

        let endpoint = self.site.endpoint("search").unwrap_or("/suche");
        let query = with_cache_buster(&params, rng);
        PlannedRequest::new("Advanced Search", format!("{}?{}", endpoint, query)).searching(term)
    }
}

/// URL-encode `params`, appending `_cb<n>` to the last value (or a `_cb`
/// parameter when there are none) so caches cannot answer the request.
fn with_cache_buster<R: Rng + ?Sized>(params: &[(&str, &str)], rng: &mut R) -> String {
    let buster = format!("_cb{}", rng.random_range(100..=999_999));
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    match params.split_last() {
        Some(((last_key, last_value), rest)) => {
            for (key, value) in rest {
                serializer.append_pair(key, value);
            }
            serializer.append_pair(last_key, &format!("{}{}", last_value, buster));
        }
        None => {
            serializer.append_pair("_cb", buster.trim_start_matches("_cb"));
        }
    }
    serializer.finish()
}
