//! Report titles and the permalinks derived from them.

use time::{macros::format_description, Date};

/// Human name of a probe domain as it appears in titles.
#[must_use]
pub fn domain_name(domain: &str) -> String {
    if domain.eq_ignore_ascii_case("engine") {
        return "Hive-Engine".to_owned();
    }
    domain
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// `"{Domain} Benchmark Report - YYYY/MM/DD"`.
pub fn title(domain: &str, date: Date) -> Result<String, time::error::Format> {
    Ok(format!(
        "{} Benchmark Report - {}",
        domain_name(domain),
        date.format(format_description!("[year]/[month]/[day]"))?
    ))
}

/// URL-safe slug: lowercase ASCII letters, digits and single dashes, with no
/// leading or trailing dash. Applying it to its own output changes nothing.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        let c = match c {
            ' ' => '-',
            c => c.to_ascii_lowercase(),
        };
        let keep = c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
        if !keep || (c == '-' && (slug.is_empty() || slug.ends_with('-'))) {
            continue;
        }
        slug.push(c);
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// `YYYYMMDD-<slug(title)>` for the given generation date.
pub fn permalink(title: &str, date: Date) -> Result<String, time::error::Format> {
    let day = date.format(format_description!("[year][month][day]"))?;
    Ok(format!("{day}-{}", slugify(title)))
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn is_clean(link: &str) -> bool {
        !link.contains("--")
            && link
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    }

    #[test]
    fn hive_title_and_permalink() {
        let day = date!(2024 - 05 - 01);
        let title = title("hive", day).unwrap();
        assert_eq!(title, "Hive Benchmark Report - 2024/05/01");

        let link = permalink(&title, day).unwrap();
        assert_eq!(link, "20240501-hive-benchmark-report-20240501");
        assert!(is_clean(&link));
        assert_eq!(permalink(&title, day).unwrap(), link);
    }

    #[test]
    fn engine_title_keeps_its_dash() {
        let day = date!(2025 - 12 - 24);
        let title = title("engine", day).unwrap();
        assert_eq!(title, "Hive-Engine Benchmark Report - 2025/12/24");
        assert_eq!(
            permalink(&title, day).unwrap(),
            "20251224-hive-engine-benchmark-report-20251224"
        );
    }

    #[test]
    fn slugify_is_idempotent() {
        for raw in [
            "  Weird // Title -- with ünïcode & symbols!! ",
            "---already-a-slug---",
            "MiXeD Case 123",
            "",
        ] {
            let once = slugify(raw);
            assert_eq!(slugify(&once), once);
            assert!(is_clean(&once));
            assert!(!once.starts_with('-') && !once.ends_with('-'));
        }
        assert_eq!(slugify("MiXeD Case 123"), "mixed-case-123");
    }
}
