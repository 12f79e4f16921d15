//! Map an answer onto the concrete field action that applies it.

use super::questions::{field_label, group_label, is_unanswered, real_options};
use autoapply_common::model::AnsweredQuestion;
use autoapply_common::protocol::{FieldInfo, FieldValue};
use regex::Regex;
use std::sync::LazyLock;

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9 ]").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-?\d+(\.\d+)?").unwrap());

const AFFIRMATIVE: &[&str] = &["yes", "y", "true", "1", "agree", "i agree"];
const NEGATIVE: &[&str] = &["no", "n", "false", "0"];

#[derive(Debug, Clone, PartialEq)]
pub struct FillAction {
    pub handle: u32,
    pub value: FieldValue,
}

pub fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = NON_ALNUM.replace_all(&lower, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

/// Containment either way, or the same first four words.
pub fn labels_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.contains(&b) || b.contains(&a) {
        return true;
    }
    let head = |s: &str| s.split(' ').take(4).collect::<Vec<_>>().join(" ");
    head(&a) == head(&b)
}

fn polarity(answer: &str) -> Option<bool> {
    let normalized = normalize(answer);
    let first = normalized.split(' ').next().unwrap_or_default();
    if AFFIRMATIVE.contains(&normalized.as_str()) || AFFIRMATIVE.contains(&first) {
        Some(true)
    } else if NEGATIVE.contains(&normalized.as_str()) || NEGATIVE.contains(&first) {
        Some(false)
    } else {
        None
    }
}

/// Best candidate among labelled choices: exact match, else substring match
/// either way ranked by similarity.
fn best_choice<'a, T>(answer: &str, choices: &'a [(String, T)]) -> Option<&'a T> {
    let wanted = normalize(answer);
    if wanted.is_empty() {
        return None;
    }
    if let Some((_, item)) = choices.iter().find(|(label, _)| normalize(label) == wanted) {
        return Some(item);
    }
    choices
        .iter()
        .filter_map(|(label, item)| {
            let label = normalize(label);
            (!label.is_empty() && (label.contains(&wanted) || wanted.contains(&label)))
                .then(|| (strsim::normalized_levenshtein(&label, &wanted), item))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, item)| item)
}

fn plan_select(answer: &str, field: &FieldInfo) -> Option<FillAction> {
    let choices: Vec<(String, &str)> = real_options(field)
        .flat_map(|o| [(o.text.clone(), o.value.as_str()), (o.value.clone(), o.value.as_str())])
        .collect();
    let value = best_choice(answer, &choices)?;
    Some(FillAction {
        handle: field.handle,
        value: FieldValue::Select(value.to_string()),
    })
}

fn plan_radio(answer: &str, group: &[&FieldInfo]) -> Option<FillAction> {
    let choices: Vec<(String, u32)> = group
        .iter()
        .filter_map(|f| field_label(f).map(|label| (label, f.handle)))
        .collect();
    let handle = best_choice(answer, &choices).copied().or_else(|| {
        let wanted = polarity(answer)?;
        choices
            .iter()
            .find(|(label, _)| polarity(label) == Some(wanted))
            .map(|(_, handle)| *handle)
    })?;
    Some(FillAction {
        handle,
        value: FieldValue::Check(true),
    })
}

fn plan_checkbox(answer: &str, field: &FieldInfo) -> Option<FillAction> {
    let label_hit = field_label(field).is_some_and(|label| normalize(&label) == normalize(answer));
    (label_hit || polarity(answer) == Some(true)).then_some(FillAction {
        handle: field.handle,
        value: FieldValue::Check(true),
    })
}

fn plan_text(answer: &str, field: &FieldInfo) -> Option<FillAction> {
    let value = if field.kind() == "number" {
        NUMBER.find(answer)?.as_str().to_string()
    } else {
        answer.trim().to_string()
    };
    Some(FillAction {
        handle: field.handle,
        value: FieldValue::Text(value),
    })
}

/// Plan for the field(s) at hand: a radio group is planned as one unit.
fn plan_for(answer: &str, target: &FieldInfo, fields: &[FieldInfo]) -> Option<FillAction> {
    match target.kind() {
        "select" => plan_select(answer, target),
        "radio" => {
            let key = target.field_key();
            let group: Vec<&FieldInfo> = fields
                .iter()
                .filter(|f| f.kind() == "radio" && f.visible && key.is_some() && f.field_key() == key)
                .collect();
            if group.is_empty() {
                plan_radio(answer, &[target])
            } else {
                plan_radio(answer, &group)
            }
        }
        "checkbox" => plan_checkbox(answer, target),
        _ => plan_text(answer, target),
    }
}

/// Field identifier first, then label similarity over visible unanswered
/// fields. `None` means the answer is ignored.
pub fn plan_fill(answer: &AnsweredQuestion, fields: &[FieldInfo]) -> Option<FillAction> {
    if !answer.is_applicable() {
        return None;
    }

    if let Some(name) = answer.field_name.as_deref().filter(|n| !n.is_empty())
        && let Some(target) = fields
            .iter()
            .find(|f| f.visible && f.field_key() == Some(name))
    {
        return plan_for(&answer.answer, target, fields);
    }

    let target = fields.iter().filter(|f| f.visible && is_unanswered(f)).find(|f| {
        let label = if f.kind() == "radio" {
            group_label(&[*f]).or_else(|| field_label(f))
        } else {
            field_label(f)
        };
        label.is_some_and(|label| labels_match(&label, &answer.question))
    })?;
    plan_for(&answer.answer, target, fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoapply_common::protocol::{FieldOption, GroupHints, LabelHints};

    fn field(handle: u32, tag: &str, kind: Option<&str>, name: &str, label: &str) -> FieldInfo {
        FieldInfo {
            handle,
            tag: tag.into(),
            input_type: kind.map(str::to_string),
            name: Some(name.into()),
            visible: true,
            hints: LabelHints {
                for_label: Some(label.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn answer(question: &str, text: &str, confidence: f64, field_name: Option<&str>) -> AnsweredQuestion {
        AnsweredQuestion {
            question: question.into(),
            answer: text.into(),
            confidence,
            field_name: field_name.map(str::to_string),
        }
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize("  What's your  notice-period? "), "whats your noticeperiod");
        assert!(labels_match("Years of experience with Rust", "years of experience"));
        assert!(labels_match(
            "Do you have a valid driver's licence (code 8)?",
            "Do you have a drivers licence?"
        ));
        assert!(!labels_match("", "anything"));
    }

    #[test]
    fn low_confidence_is_never_planned() {
        let fields = vec![field(1, "input", Some("text"), "city", "City")];
        assert!(plan_fill(&answer("City", "Durban", 0.15, Some("city")), &fields).is_none());
        assert!(plan_fill(&answer("City", "Durban", 0.9, Some("city")), &fields).is_some());
    }

    #[test]
    fn field_identifier_beats_label() {
        let fields = vec![
            field(1, "input", Some("text"), "first", "Phone number"),
            field(2, "input", Some("tel"), "phone", "Mobile"),
        ];
        let action = plan_fill(&answer("Phone number", "0821234567", 0.8, Some("phone")), &fields)
            .unwrap();
        assert_eq!(action.handle, 2);
        assert_eq!(action.value, FieldValue::Text("0821234567".into()));
    }

    #[test]
    fn label_fallback_when_identifier_missing() {
        let fields = vec![field(4, "textarea", None, "q_88", "Why do you want this role?")];
        let action = plan_fill(
            &answer("Why do you want this role", "I enjoy systems work.", 0.7, None),
            &fields,
        )
        .unwrap();
        assert_eq!(action.handle, 4);
    }

    #[test]
    fn select_prefers_closest_substring_option() {
        let mut select = field(7, "select", None, "edu", "Education");
        select.options = vec![
            FieldOption {
                text: "Select".into(),
                value: String::new(),
                selected: true,
            },
            FieldOption {
                text: "Bachelor's degree".into(),
                value: "ba".into(),
                selected: false,
            },
            FieldOption {
                text: "Bachelor's degree (Honours)".into(),
                value: "bahons".into(),
                selected: false,
            },
        ];
        let action = plan_fill(&answer("Education", "Bachelor's", 0.9, Some("edu")), &[select.clone()])
            .unwrap();
        assert_eq!(action.value, FieldValue::Select("ba".into()));

        assert!(plan_fill(&answer("Education", "PhD", 0.9, Some("edu")), &[select]).is_none());
    }

    #[test]
    fn radio_matches_option_then_polarity() {
        let group = GroupHints {
            legend: Some("Can you start immediately?".into()),
            heading: None,
        };
        let mut yes = field(1, "input", Some("radio"), "start", "Yes, I can");
        yes.group = group.clone();
        let mut no = field(2, "input", Some("radio"), "start", "No");
        no.group = group;
        let fields = vec![yes, no];

        let action = plan_fill(&answer("Start?", "No", 0.9, Some("start")), &fields).unwrap();
        assert_eq!(action.handle, 2);
        assert_eq!(action.value, FieldValue::Check(true));

        let action = plan_fill(&answer("Start?", "true", 0.9, Some("start")), &fields).unwrap();
        assert_eq!(action.handle, 1);

        let action = plan_fill(&answer("Can you start immediately", "Yes", 0.9, None), &fields).unwrap();
        assert_eq!(action.handle, 1);
    }

    #[test]
    fn checkbox_only_checks_on_affirmative() {
        let checkbox = field(3, "input", Some("checkbox"), "permit", "I have a work permit");
        assert!(plan_fill(&answer("Permit", "Yes", 0.9, Some("permit")), &[checkbox.clone()]).is_some());
        assert!(plan_fill(&answer("Permit", "No", 0.9, Some("permit")), &[checkbox]).is_none());
    }

    #[test]
    fn number_fields_get_the_number_only() {
        let years = field(5, "input", Some("number"), "years", "Years");
        let action = plan_fill(&answer("Years", "About 4 years", 0.6, Some("years")), &[years.clone()])
            .unwrap();
        assert_eq!(action.value, FieldValue::Text("4".into()));
        assert!(plan_fill(&answer("Years", "several", 0.6, Some("years")), &[years]).is_none());
    }
}
