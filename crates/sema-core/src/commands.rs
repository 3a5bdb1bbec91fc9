// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

/// A resolved custom command: markdown body with the frontmatter already
/// stripped by the collaborator that loaded it.
#[derive(Debug, Clone)]
pub struct CustomCommand {
    pub name: String,
    pub body: String,
}

/// The custom-command registry boundary.  Command names derive from file
/// paths with `/` replaced by `:` on the collaborator side; user scope
/// overrides project scope on collision.
pub trait CommandSource: Send + Sync {
    fn resolve(&self, name: &str) -> Option<CustomCommand>;
}

/// In-memory source over the two scopes.
#[derive(Default)]
pub struct StaticCommandSource {
    user: HashMap<String, CustomCommand>,
    project: HashMap<String, CustomCommand>,
}

impl StaticCommandSource {
    pub fn new(user: Vec<CustomCommand>, project: Vec<CustomCommand>) -> Self {
        Self {
            user: user.into_iter().map(|c| (c.name.clone(), c)).collect(),
            project: project.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }
}

impl CommandSource for StaticCommandSource {
    fn resolve(&self, name: &str) -> Option<CustomCommand> {
        self.user
            .get(name)
            .or_else(|| self.project.get(name))
            .cloned()
    }
}

/// Split `/name[:ns] [args]` into the command name and its argument string.
/// Returns `None` for input that is not a slash command.
pub fn parse_slash_command(input: &str) -> Option<(String, String)> {
    let trimmed = input.trim();
    let rest = trimmed.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    match rest.split_once(char::is_whitespace) {
        Some((name, args)) => Some((name.to_string(), args.trim().to_string())),
        None => Some((rest.to_string(), String::new())),
    }
}

/// Expand `$ARGUMENTS` in a command body; when the placeholder is absent the
/// arguments are appended at the end.
pub fn expand_arguments(body: &str, args: &str) -> String {
    if body.contains("$ARGUMENTS") {
        body.replace("$ARGUMENTS", args)
    } else if args.is_empty() {
        body.to_string()
    } else {
        format!("{body}\n\n{args}")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(name: &str, body: &str) -> CustomCommand {
        CustomCommand {
            name: name.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn parses_bare_command() {
        assert_eq!(
            parse_slash_command("/review"),
            Some(("review".to_string(), String::new()))
        );
    }

    #[test]
    fn parses_namespaced_command_with_args() {
        assert_eq!(
            parse_slash_command("/deploy:staging --force now"),
            Some(("deploy:staging".to_string(), "--force now".to_string()))
        );
    }

    #[test]
    fn non_slash_input_is_not_a_command() {
        assert_eq!(parse_slash_command("hello world"), None);
        assert_eq!(parse_slash_command("/"), None);
    }

    #[test]
    fn placeholder_expansion_replaces_all_occurrences() {
        assert_eq!(
            expand_arguments("review $ARGUMENTS carefully: $ARGUMENTS", "pr-42"),
            "review pr-42 carefully: pr-42"
        );
    }

    #[test]
    fn missing_placeholder_appends_args() {
        assert_eq!(expand_arguments("run the checks", "quick"), "run the checks\n\nquick");
        assert_eq!(expand_arguments("run the checks", ""), "run the checks");
    }

    #[test]
    fn user_scope_overrides_project() {
        let source = StaticCommandSource::new(
            vec![cmd("review", "user body")],
            vec![cmd("review", "project body"), cmd("deploy", "ship it")],
        );
        assert_eq!(source.resolve("review").unwrap().body, "user body");
        assert_eq!(source.resolve("deploy").unwrap().body, "ship it");
        assert!(source.resolve("missing").is_none());
    }
}
