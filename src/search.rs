//! Search-list expansion
//!
//! Unqualified names are completed with the configured search suffixes
//! before they hit the wire. Which spelling goes first is the `ndots`
//! rule: a name with fewer dots than the threshold is assumed to be
//! relative (suffixes first, bare name last), a name with enough dots is
//! assumed to be absolute-ish (bare name first, suffixes after). A
//! trailing dot switches expansion off entirely.
//!
//! The lookup walks this candidate list, advancing only when a
//! nameserver answers NXDOMAIN.

/// The names to try for one user-supplied name, in order
///
/// # Example
///
/// ```
/// use lazyresolv::search::candidates;
///
/// let paths = vec!["corp.local".to_string(), "example.com".to_string()];
/// assert_eq!(
///     candidates("host", 1, &paths),
///     vec!["host.corp.local", "host.example.com", "host"],
/// );
/// assert_eq!(candidates("host.", 1, &paths), vec!["host"]);
/// ```
pub fn candidates(name: &str, ndots: u32, searchpaths: &[String]) -> Vec<String> {
    // a trailing dot pins the name as absolute
    if let Some(absolute) = name.strip_suffix('.') {
        return vec![absolute.to_string()];
    }
    if searchpaths.is_empty() {
        return vec![name.to_string()];
    }

    let dots = name.matches('.').count() as u32;
    let expanded = searchpaths
        .iter()
        .map(|suffix| join(name, suffix))
        .collect::<Vec<_>>();

    let mut list = Vec::with_capacity(expanded.len() + 1);
    if dots >= ndots {
        list.push(name.to_string());
        list.extend(expanded);
    } else {
        list.extend(expanded);
        list.push(name.to_string());
    }
    list
}

fn join(name: &str, suffix: &str) -> String {
    let suffix = suffix.trim_matches('.');
    if suffix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", name, suffix)
    }
}
