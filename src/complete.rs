use std::collections::HashSet;

/// Builtin command names, in help order.
pub const COMMANDS: &[&str] = &[
    "help", "clear", "cls", "views", "routes", "go", "list", "count", "find", "search", "refresh",
    "reload", "history", "time", "date", "whoami", "echo", "debug",
];

/// Symbolic view names and their route paths, synonyms included.
pub const ROUTES: &[(&str, &str)] = &[
    ("dashboard", "/"),
    ("home", "/"),
    ("calendar", "/calendar"),
    ("jobs", "/jobs"),
    ("properties", "/properties"),
    ("people", "/people"),
    ("staff", "/people"),
    ("users", "/people"),
    ("service-templates", "/service-templates"),
    ("job-templates", "/job-templates"),
    ("bom-templates", "/bom-templates"),
    ("bom", "/bom-templates"),
    ("service-opportunities", "/service-opportunities"),
    ("opps", "/service-opportunities"),
    ("analytics", "/analytics"),
    ("activity", "/activity"),
    ("admin", "/admin"),
    ("worker", "/worker"),
    ("power-user", "/power-user"),
    ("cli", "/power-user"),
];

/// Entity arguments accepted by `list`/`count`.
pub const ENTITIES: &[&str] = &["jobs", "properties", "people", "opps", "all", "staff", "users"];

/// Type arguments accepted by `find`/`search`.
pub const SEARCH_TYPES: &[&str] = &["job", "property", "person", "opp"];

pub fn route_path(view: &str) -> Option<&'static str> {
    ROUTES
        .iter()
        .find(|(name, _)| *name == view)
        .map(|(_, path)| *path)
}

fn prefix_filter<'a, I>(options: I, partial: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    options
        .into_iter()
        .filter(|opt| opt.starts_with(partial))
        .filter(|opt| seen.insert(*opt))
        .map(|opt| opt.to_string())
        .collect()
}

/// Prefix completion over the static tables. While the first token is still
/// being typed the candidates are commands plus view names; once a verb is
/// complete the second token completes against that verb's argument table.
/// Stateless; never touches the entity cache.
pub fn completions(input: &str) -> Vec<String> {
    let trimmed = input.trim().to_lowercase();
    let parts: Vec<&str> = trimmed.split_whitespace().collect();

    let first_token_open = parts.len() <= 1 && !input.ends_with(' ');
    if parts.is_empty() || first_token_open {
        let partial = parts.first().copied().unwrap_or("");
        let all = COMMANDS
            .iter()
            .copied()
            .chain(ROUTES.iter().map(|(name, _)| *name));
        return prefix_filter(all, partial);
    }

    let cmd = parts[0];
    let partial = parts.get(1).copied().unwrap_or("");

    match cmd {
        "go" | "g" | "nav" | "cd" => prefix_filter(ROUTES.iter().map(|(name, _)| *name), partial),
        "list" | "ls" | "show" | "count" => prefix_filter(ENTITIES.iter().copied(), partial),
        "find" | "search" => prefix_filter(SEARCH_TYPES.iter().copied(), partial),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_token_prefix() {
        let matches = completions("li");
        assert!(matches.contains(&"list".to_string()));
        assert!(!matches.contains(&"help".to_string()));
    }

    #[test]
    fn test_first_token_includes_views() {
        let matches = completions("da");
        assert!(matches.contains(&"dashboard".to_string()));
        assert!(matches.contains(&"date".to_string()));
    }

    #[test]
    fn test_list_second_arg() {
        assert_eq!(completions("list pr"), vec!["properties".to_string()]);
    }

    #[test]
    fn test_go_second_arg() {
        let matches = completions("go pe");
        assert_eq!(matches, vec!["people".to_string()]);
    }

    #[test]
    fn test_verb_with_trailing_space_offers_all_args() {
        let matches = completions("list ");
        assert_eq!(matches.len(), ENTITIES.len());
    }

    #[test]
    fn test_search_types() {
        let matches = completions("find p");
        assert_eq!(
            matches,
            vec!["property".to_string(), "person".to_string()]
        );
    }

    #[test]
    fn test_unknown_verb_has_no_candidates() {
        assert!(completions("frobnicate ").is_empty());
    }

    #[test]
    fn test_empty_input_lists_everything_once() {
        let matches = completions("");
        let unique: std::collections::HashSet<_> = matches.iter().collect();
        assert_eq!(unique.len(), matches.len());
        assert!(matches.contains(&"help".to_string()));
        assert!(matches.contains(&"dashboard".to_string()));
    }
}
