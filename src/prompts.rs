//! Prompt templates for the generation-backed pipeline stages.
//!
//! Templates use `{{name}}` placeholders filled by [`render`].

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::models::{BestDialog, DecisionOption};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern compiles"));

pub const EXTRACT_OPTIONS: &str = "\
You are given a dilemma. List the distinct options the person is choosing between.
Rules:
- Give at least two options.
- Every option has a short title and a one-sentence justification for choosing it.
- Do not add commentary, advice, or anything outside the requested fields.

Dilemma: {{dilemma}}";

pub const REWRITE_IN_PERSONA: &str = "\
You are {{character}} from the movie {{movie}} ({{year}}).
Someone asked you: \"{{dilemma}}\"
You have decided on: {{title}}. Your reason: {{justification}}
In one or two sentences, in your own voice and the idiom of your era, tell them what to do and why.";

pub const MERGE_INTO_LINE: &str = "\
Here is a famous line of dialog: \"{{line}}\"
Here is what the speaker wants to say now: \"{{justification}}\"
Rewrite the famous line so that it conveys that meaning, changing as little of the original wording as possible.
The result must still read as one utterance by the same speaker.";

/// Substitute `{{key}}` placeholders in a single pass; substituted text is
/// never scanned again. Unknown keys are left as written.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            vars.iter()
                .find(|(key, _)| *key == &caps[1])
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub fn extract_options(dilemma: &str) -> String {
    render(EXTRACT_OPTIONS, &[("dilemma", dilemma)])
}

pub fn rewrite_in_persona(best: &BestDialog, dilemma: &str) -> String {
    let DecisionOption {
        title,
        justification,
    } = &best.chosen_option;
    let year = best.quote.year.to_string();
    render(
        REWRITE_IN_PERSONA,
        &[
            ("character", best.quote.character.as_str()),
            ("movie", best.quote.movie.as_str()),
            ("year", year.as_str()),
            ("dilemma", dilemma),
            ("title", title.as_str()),
            ("justification", justification.as_str()),
        ],
    )
}

pub fn merge_into_line(rewritten: &str, original_line: &str) -> String {
    render(
        MERGE_INTO_LINE,
        &[("line", original_line), ("justification", rewritten)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuoteRecord;

    #[test]
    fn render_fills_every_occurrence() {
        assert_eq!(render("{{a}} and {{a}} {{b}}", &[("a", "x"), ("b", "y")]), "x and x y");
    }

    #[test]
    fn render_leaves_unknown_keys() {
        assert_eq!(render("{{a}} {{zz}}", &[("a", "x")]), "x {{zz}}");
    }

    #[test]
    fn placeholders_inside_user_text_are_kept_verbatim() {
        let best = BestDialog {
            quote: QuoteRecord {
                id: "q".into(),
                line: "May the Force be with you.".into(),
                character: "Han {{justification}} Solo".into(),
                movie: "Star Wars".into(),
                year: 1977,
            },
            chosen_option: DecisionOption::new("Use Mustache", "It is {{dilemma}} friendly"),
            similarity: 0.9,
        };
        let dilemma = "Should I keep {{title}} markers in my templates?";
        let prompt = rewrite_in_persona(&best, dilemma);
        assert!(prompt.contains(r#"Someone asked you: "Should I keep {{title}} markers in my templates?""#));
        assert!(prompt.contains("You are Han {{justification}} Solo from"));
        assert!(prompt.contains("Your reason: It is {{dilemma}} friendly"));

        let merge = merge_into_line("Say {{line}} again", "Original {{justification}}");
        assert!(merge.contains(r#""Original {{justification}}""#));
        assert!(merge.contains(r#""Say {{line}} again""#));
    }

    #[test]
    fn persona_prompt_names_speaker_and_choice() {
        let best = BestDialog {
            quote: QuoteRecord {
                id: "q".into(),
                line: "Here's looking at you, kid.".into(),
                character: "Rick Blaine".into(),
                movie: "Casablanca".into(),
                year: 1942,
            },
            chosen_option: DecisionOption::new("Stay", "Loyalty counts"),
            similarity: 0.7,
        };
        let prompt = rewrite_in_persona(&best, "Should I move?");
        assert!(prompt.contains("Rick Blaine from the movie Casablanca (1942)"));
        assert!(prompt.contains("decided on: Stay. Your reason: Loyalty counts"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn extraction_prompt_demands_two_options() {
        let prompt = extract_options("Tea or coffee?");
        assert!(prompt.contains("at least two options"));
        assert!(prompt.ends_with("Dilemma: Tea or coffee?"));
    }
}
