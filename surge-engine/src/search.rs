//! Result counts scraped from search and listing pages
//!
//! Markup is matched with regular expressions on class attributes rather
//! than parsed into a tree. The count is a best effort: pages that show
//! neither a count element nor recognisable result items yield zero.

use once_cell::sync::Lazy;
use regex::Regex;

/// Opening tags carrying a class attribute; group 1 is the class list
static CLASSED_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<[a-z][a-z0-9]*\b[^>]*?\bclass\s*=\s*["']([^"']*)["'][^>]*>"#)
        .expect("valid class pattern")
});

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid number pattern"));

/// Elements whose text states the total, most specific first
const COUNT_CLASSES: [&str; 3] = ["results-count", "search-results-count", "anzahl-ergebnisse"];

/// Elements that are one result each, most specific first
const ITEM_CLASSES: [&str; 4] = ["search-result", "result-item", "course-item", "kurs-item"];

/// How much text after a count element's opening tag is searched for digits
const COUNT_TEXT_WINDOW: usize = 200;

/// How a class attribute is tested
#[derive(Clone, Copy)]
enum ClassMatch<'a> {
    /// One of the space-separated classes equals this
    Exact(&'a str),
    /// The attribute value contains this anywhere
    Contains(&'a str),
}

impl ClassMatch<'_> {
    fn matches(&self, classes: &str) -> bool {
        match *self {
            ClassMatch::Exact(name) => classes.split_whitespace().any(|class| class == name),
            ClassMatch::Contains(part) => classes.contains(part),
        }
    }
}

/// Number of results a page reports, or the number of result items it shows
pub fn results_count(html: &str) -> u64 {
    let count = COUNT_CLASSES
        .iter()
        .map(|name| ClassMatch::Exact(name))
        .chain(std::iter::once(ClassMatch::Contains("count")))
        .find_map(|selector| stated_count(html, selector))
        .unwrap_or(0);
    if count > 0 {
        return count;
    }

    ITEM_CLASSES
        .iter()
        .map(|name| ClassMatch::Exact(name))
        .chain([ClassMatch::Contains("result"), ClassMatch::Contains("course")])
        .map(|selector| item_count(html, selector))
        .find(|count| *count > 0)
        .unwrap_or(0)
}

/// First number in the text of the first element matching `selector`
fn stated_count(html: &str, selector: ClassMatch<'_>) -> Option<u64> {
    let tag = CLASSED_TAG
        .captures_iter(html)
        .find(|caps| selector.matches(&caps[1]))?;
    let start = tag.get(0)?.end();
    let mut end = (start + COUNT_TEXT_WINDOW).min(html.len());
    while !html.is_char_boundary(end) {
        end -= 1;
    }
    let text = TAG.replace_all(&html[start..end], " ");
    NUMBER.find(&text)?.as_str().parse().ok()
}

fn item_count(html: &str, selector: ClassMatch<'_>) -> u64 {
    CLASSED_TAG
        .captures_iter(html)
        .filter(|caps| selector.matches(&caps[1]))
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_element_wins() {
        let html = r#"
            <div class="header"><span class="results-count">42 Kurse gefunden</span></div>
            <ul><li class="search-result">a</li><li class="search-result">b</li></ul>
        "#;
        assert_eq!(results_count(html), 42);
    }

    #[test]
    fn test_count_inside_nested_markup() {
        let html = r#"<p class="anzahl-ergebnisse"><strong>17</strong> Ergebnisse</p>"#;
        assert_eq!(results_count(html), 17);
    }

    #[test]
    fn test_partial_count_class() {
        let html = r#"<div class='hit-counter big'>Treffer: 8</div>"#;
        assert_eq!(results_count(html), 8);
    }

    #[test]
    fn test_specific_selector_before_generic() {
        let html = r#"
            <span class="cart-count">3</span>
            <span class="search-results-count">120</span>
        "#;
        assert_eq!(results_count(html), 120);
    }

    #[test]
    fn test_falls_back_to_item_count() {
        let html = r#"
            <div class="results-count">keine Angabe</div>
            <div class="course-item">Yoga</div>
            <div class="course-item featured">Pilates</div>
            <div class="course-item">Tanz</div>
        "#;
        assert_eq!(results_count(html), 3);
    }

    #[test]
    fn test_generic_item_classes() {
        let html = r#"
            <article class="kursliste-result">1</article>
            <article class="kursliste-result">2</article>
        "#;
        assert_eq!(results_count(html), 2);

        let courses = r#"<li class="course-card"></li><li class="course-card"></li><li class="course-card"></li>"#;
        assert_eq!(results_count(courses), 3);
    }

    #[test]
    fn test_page_without_results() {
        assert_eq!(results_count("<html><body><p>Nichts gefunden</p></body></html>"), 0);
        assert_eq!(results_count(""), 0);
    }

    #[test]
    fn test_count_window_respects_char_boundaries() {
        let html = format!(r#"<span class="anzahl-ergebnisse">x{} 9</span>"#, "ä".repeat(150));
        assert_eq!(results_count(&html), 0);
    }
}
