use regex::Regex;

/// The `N` capture groups of `re` matched against `text`, in order.
///
/// `None` when `re` does not match or when one of the groups took no part in the match.
pub fn regex_match_groups<'t, const N: usize>(re: &Regex, text: &'t str) -> Option<[&'t str; N]> {
    let captures = re.captures(text)?;
    let mut groups = [""; N];
    for (i, group) in groups.iter_mut().enumerate() {
        *group = captures.get(i + 1)?.as_str();
    }
    Some(groups)
}
