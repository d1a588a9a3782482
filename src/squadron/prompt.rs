//! System prompt rendering.
//!
//! Turns an [`AgentDefinition`] plus runtime options into the single system
//! prompt string that makes a generic chat model adopt the persona.  The
//! required sections appear in a fixed order: identity line, persona block,
//! command menu, rules, closing directive.  The builder never truncates; it
//! logs a warning when the estimate exceeds the target size so operators can
//! trim oversized definitions.

use log::warn;

use crate::squadron::agent::AgentDefinition;

/// Rough estimation ratio used across the crate (~4 characters per token).
pub const APPROX_CHARS_PER_TOKEN: usize = 4;

/// Soft ceiling for a rendered prompt, in estimated tokens.
pub const TARGET_MAX_TOKENS: usize = 4_000;

/// Estimates the number of tokens in a string.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / APPROX_CHARS_PER_TOKEN).max(1)
}

/// Runtime options applied on top of the agent definition.
#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    /// Overrides the definition's communication language when set.
    pub language_override: Option<String>,
}

/// Render the full system prompt for an agent.
pub fn render_system_prompt(definition: &AgentDefinition, options: &PromptOptions) -> String {
    let language = options
        .language_override
        .clone()
        .unwrap_or_else(|| definition.communication_language.clone());

    let mut prompt = String::new();

    // 1. Identity line.
    if definition.icon.is_empty() {
        prompt.push_str(&format!(
            "You are {}, a {}.\n",
            definition.name, definition.title
        ));
    } else {
        prompt.push_str(&format!(
            "You are {} {}, a {}.\n",
            definition.icon, definition.name, definition.title
        ));
    }

    // 2. Persona block, verbatim from the definition.
    prompt.push_str("\n## Persona\n");
    prompt.push_str(&format!("Role: {}\n", definition.persona.role));
    prompt.push_str(&format!("Identity: {}\n", definition.persona.identity));
    prompt.push_str(&format!(
        "Communication style: {}\n",
        definition.persona.communication_style
    ));
    if !definition.persona.principles.is_empty() {
        prompt.push_str("Principles:\n");
        for principle in &definition.persona.principles {
            prompt.push_str(&format!("- {}\n", principle));
        }
    }

    // 3. Numbered command menu.
    prompt.push_str("\n## Commands\n");
    if definition.menu.is_empty() {
        prompt.push_str("(no commands registered)\n");
    } else {
        for (index, item) in definition.menu.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. *{} - {}\n",
                index + 1,
                item.command,
                item.description
            ));
        }
    }

    if !definition.activation_steps.is_empty() {
        prompt.push_str("\n## Activation\n");
        for (index, step) in definition.activation_steps.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", index + 1, step));
        }
    }

    // 4. Rules.
    prompt.push_str("\n## Rules\n");
    prompt.push_str(&format!("- Communicate in {}.\n", language));
    prompt.push_str(&format!(
        "- Stay in character as {} at all times.\n",
        definition.name
    ));
    prompt.push_str(
        "- Commands are triggered with an asterisk prefix, e.g. *help; match them exactly.\n",
    );
    prompt.push_str(
        "- Use the provided tools for file access, directory listings, and web searches; never fabricate their output.\n",
    );
    prompt.push_str("- The session ends only when the user issues *exit.\n");

    // 5. Closing directive.
    prompt.push_str(&format!(
        "\nAdopt this persona completely and remain {} until the user explicitly issues *exit.\n",
        definition.name
    ));

    let estimated = estimate_tokens(&prompt);
    if estimated > TARGET_MAX_TOKENS {
        warn!(
            "system prompt for '{}' is ~{} tokens (target {})",
            definition.id, estimated, TARGET_MAX_TOKENS
        );
    }

    prompt
}

/// Recover the command set from a rendered prompt's menu section.
///
/// Menu lines have the shape `"{n}. *{command} - {description}"`.
pub fn parse_menu_commands(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|line| {
            let rest = line
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .strip_prefix(". *")?;
            let (command, _) = rest.split_once(" - ")?;
            Some(command.to_string())
        })
        .collect()
}
