use crate::models::CandidateListing;
use reqwest::Url;
use std::cmp::Ordering;

/// Leading numeric value of a price string with `$` and thousands separators
/// removed. `NaN` when nothing numeric leads the string, so every comparison
/// against it is false.
pub fn parse_price(raw: &str) -> f64 {
    let cleaned: String = raw.chars().filter(|c| *c != '$' && *c != ',').collect();
    let cleaned = cleaned.trim_start();

    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (idx, ch) in cleaned.char_indices() {
        match ch {
            '-' | '+' if idx == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = idx + ch.len_utf8();
    }
    if !seen_digit {
        return f64::NAN;
    }
    cleaned[..end]
        .trim_end_matches('.')
        .parse()
        .unwrap_or(f64::NAN)
}

/// Indel ratio in `0..=100`: `2 * lcs / (len_a + len_b)`, computed on
/// lowercased strings with punctuation folded to spaces. Empty input scores 0.
pub fn similarity(a: &str, b: &str) -> u32 {
    let a = normalize(a);
    let b = normalize(b);
    let total = a.len() + b.len();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let matched = 2 * longest_common_subsequence(&a, &b);
    ((matched * 100) as f64 / total as f64).round() as u32
}

fn normalize(raw: &str) -> Vec<char> {
    let folded: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    folded.trim().chars().collect()
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut row = vec![0usize; b.len() + 1];
    for ca in a {
        let mut diagonal = 0;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal + 1
            } else {
                above.max(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// True when the URL's host is one of `preferred` or a subdomain of one.
pub fn is_preferred(url: &str, preferred: &[String]) -> bool {
    let Some(host) = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
    else {
        return false;
    };
    preferred.iter().any(|p| {
        host == *p
            || host
                .strip_suffix(p.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Picks the listing URL that best matches the extracted item among listings
/// priced above it.
///
/// The scan is order sensitive: a preferred-host listing replaces the pick
/// whenever it beats the best score so far, while a non-preferred listing only
/// replaces a non-preferred pick. With no listing priced above the item the
/// first listing wins, and an empty list yields an empty string.
pub fn find_similar_url(
    name: &str,
    price: &str,
    candidates: &[CandidateListing],
    preferred_hosts: &[String],
) -> String {
    let item_price = parse_price(price);
    let mut best: Option<(&str, bool)> = None;
    let mut highest: i64 = -1;

    for candidate in candidates {
        // NaN on either side never compares as cheaper.
        if item_price.partial_cmp(&parse_price(&candidate.price)) != Some(Ordering::Less) {
            continue;
        }
        let score = i64::from(similarity(name, &candidate.title));
        let preferred = is_preferred(&candidate.url, preferred_hosts);

        let replace = if preferred && score > highest {
            true
        } else {
            match best {
                None => true,
                Some((_, best_preferred)) => !best_preferred && score > highest,
            }
        };
        if replace {
            highest = score;
            best = Some((candidate.url.as_str(), preferred));
        }
    }

    match best {
        Some((url, _)) => url.to_string(),
        None => candidates
            .first()
            .map(|c| c.url.clone())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(title: &str, url: &str, price: &str) -> CandidateListing {
        CandidateListing {
            title: title.into(),
            url: url.into(),
            price: price.into(),
        }
    }

    fn hosts() -> Vec<String> {
        vec!["wayfair.com".into(), "ikea.com".into()]
    }

    #[test]
    fn parses_leading_numbers() {
        assert_eq!(parse_price("$1,200.50"), 1200.5);
        assert_eq!(parse_price("120"), 120.0);
        assert_eq!(parse_price("$45 used"), 45.0);
        assert_eq!(parse_price("$7."), 7.0);
        assert!(parse_price("call for price").is_nan());
        assert!(parse_price("").is_nan());
    }

    #[test]
    fn falls_back_to_first_when_nothing_is_pricier() {
        let candidates = vec![listing("Oak Table", "https://a.test/oak", "$150")];
        assert_eq!(
            find_similar_url("Oak Table", "200", &candidates, &hosts()),
            "https://a.test/oak"
        );
    }

    #[test]
    fn empty_list_yields_empty_string() {
        assert_eq!(find_similar_url("Oak Table", "200", &[], &hosts()), "");
    }

    #[test]
    fn unparsable_item_price_uses_fallback() {
        let candidates = vec![
            listing("Pine Table", "https://a.test/pine", "$300"),
            listing("Oak Table", "https://b.test/oak", "$300"),
        ];
        assert_eq!(
            find_similar_url("Oak Table", "", &candidates, &hosts()),
            "https://a.test/pine"
        );
    }

    #[test]
    fn preferred_pick_survives_better_scoring_other_host() {
        let candidates = vec![
            listing("Dining Table Oak Finish", "https://www.wayfair.com/t", "$380"),
            listing("Oak Dining Table", "https://shop.test/oak", "$400"),
        ];
        let url = find_similar_url("Oak Dining Table", "$200", &candidates, &hosts());
        assert_eq!(url, "https://www.wayfair.com/t");
    }

    #[test]
    fn preferred_host_replaces_lower_scoring_pick() {
        let candidates = vec![
            listing("Velvet Sofa", "https://shop.test/sofa", "$400"),
            listing("Oak Dining Table", "https://www.ikea.com/oak", "$380"),
        ];
        let url = find_similar_url("Oak Dining Table", "$200", &candidates, &hosts());
        assert_eq!(url, "https://www.ikea.com/oak");
    }

    #[test]
    fn non_preferred_pick_is_replaced_by_higher_score() {
        let candidates = vec![
            listing("Velvet Sofa", "https://a.test/sofa", "$400"),
            listing("Oak Dining Table", "https://b.test/oak", "$400"),
            listing("Cheap Oak Dining Table", "https://c.test/cheap", "$50"),
        ];
        let url = find_similar_url("Oak Dining Table", "$200", &candidates, &hosts());
        assert_eq!(url, "https://b.test/oak");
    }

    #[test]
    fn first_highest_wins_on_ties() {
        let candidates = vec![
            listing("Oak Table", "https://a.test/1", "$400"),
            listing("Oak Table", "https://b.test/2", "$400"),
        ];
        let first = find_similar_url("Oak Table", "$100", &candidates, &hosts());
        assert_eq!(first, "https://a.test/1");
        assert_eq!(first, find_similar_url("Oak Table", "$100", &candidates, &hosts()));
    }

    #[test]
    fn preferred_match_is_by_host_not_substring() {
        let h = hosts();
        assert!(is_preferred("https://www.ikea.com/us/chair", &h));
        assert!(is_preferred("https://IKEA.com/x", &h));
        assert!(!is_preferred("https://notikea.com/x", &h));
        assert!(!is_preferred("https://shop.test/?ref=wayfair.com", &h));
        assert!(!is_preferred("not a url", &h));
    }

    #[test]
    fn similarity_is_case_insensitive() {
        assert_eq!(similarity("OAK TABLE", "oak table"), 100);
        assert!(similarity("oak table", "velvet sofa") < 50);
        assert_eq!(similarity("", "oak"), 0);
    }

    #[test]
    fn similarity_is_an_indel_ratio() {
        assert_eq!(similarity("abcd", "abyz"), 50);
        assert_eq!(similarity("abcd", "abcdabcd"), 67);
        assert_eq!(similarity("Oak-Table!", "oak table"), 100);
    }

    #[test]
    fn longer_title_sharing_the_name_wins() {
        let candidates = vec![
            listing("abyz", "https://b.test/B", "$400"),
            listing("abcdabcd", "https://a.test/A", "$400"),
        ];
        let url = find_similar_url("abcd", "$100", &candidates, &hosts());
        assert_eq!(url, "https://a.test/A");
    }
}
