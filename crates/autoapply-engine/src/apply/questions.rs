//! Turn raw field reports into questions for the model.

use autoapply_common::model::{ApplicationQuestion, QuestionType};
use autoapply_common::protocol::{FieldInfo, FieldOption};
use std::collections::HashMap;

const TEXT_INPUT_TYPES: &[&str] = &["text", "email", "tel", "number", "url"];
const PLACEHOLDER_OPTIONS: &[&str] = &["select...", "select", "--", "select an option"];

/// Best human-readable label for a single field, by priority.
pub fn field_label(field: &FieldInfo) -> Option<String> {
    let hints = &field.hints;
    [
        &hints.for_label,
        &hints.ancestor_label,
        &hints.aria_label,
        &hints.labelled_by,
        &hints.placeholder,
        &hints.previous_sibling,
        &hints.container_heading,
    ]
    .into_iter()
    .flatten()
    .map(|s| s.trim())
    .find(|s| !s.is_empty())
    .map(str::to_string)
}

/// Question text of a radio group: legend, then group heading, then the
/// container heading of its first member.
pub fn group_label(members: &[&FieldInfo]) -> Option<String> {
    let first = members.first()?;
    first
        .group
        .legend
        .as_deref()
        .or(first.group.heading.as_deref())
        .or(first.hints.container_heading.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn is_placeholder_option(option: &FieldOption) -> bool {
    let text = option.text.trim().to_lowercase();
    text.is_empty() || PLACEHOLDER_OPTIONS.contains(&text.as_str())
}

pub fn real_options(field: &FieldInfo) -> impl Iterator<Item = &FieldOption> {
    field.options.iter().filter(|o| !is_placeholder_option(o))
}

/// Whether a field still needs a value.
pub fn is_unanswered(field: &FieldInfo) -> bool {
    match field.kind() {
        "select" => field
            .options
            .iter()
            .find(|o| o.selected)
            .is_none_or(|o| o.value.is_empty() || is_placeholder_option(o)),
        "radio" | "checkbox" => !field.checked,
        _ => field.value.trim().is_empty(),
    }
}

fn question_type(field: &FieldInfo) -> Option<QuestionType> {
    match field.kind() {
        "textarea" => Some(QuestionType::Textarea),
        "select" => Some(QuestionType::Select),
        "radio" => Some(QuestionType::Radio),
        "checkbox" => Some(QuestionType::Checkbox),
        "number" => Some(QuestionType::Number),
        kind if TEXT_INPUT_TYPES.contains(&kind) => Some(QuestionType::Text),
        _ => None,
    }
}

/// Visible, unanswered fields as questions. Radios are bucketed by name into
/// one question; unchecked checkboxes become yes/no questions.
pub fn extract_questions(fields: &[FieldInfo]) -> Vec<ApplicationQuestion> {
    let mut questions = Vec::new();
    let mut radio_groups: HashMap<String, Vec<&FieldInfo>> = HashMap::new();
    let mut radio_order: Vec<String> = Vec::new();

    for field in fields.iter().filter(|f| f.visible) {
        let Some(kind) = question_type(field) else {
            continue;
        };
        if kind == QuestionType::Radio {
            let Some(key) = field.field_key() else {
                continue;
            };
            let group = radio_groups.entry(key.to_string()).or_default();
            if group.is_empty() {
                radio_order.push(key.to_string());
            }
            group.push(field);
            continue;
        }
        if !is_unanswered(field) {
            continue;
        }
        let Some(label) = field_label(field).or_else(|| field.field_key().map(str::to_string))
        else {
            continue;
        };
        let options = match kind {
            QuestionType::Select => real_options(field).map(|o| o.text.trim().to_string()).collect(),
            QuestionType::Checkbox => vec!["Yes".to_string(), "No".to_string()],
            _ => vec![],
        };
        questions.push(ApplicationQuestion {
            question: label,
            question_type: kind,
            options,
            required: field.required,
            field_name: field.field_key().map(str::to_string),
        });
    }

    for name in radio_order {
        let members = &radio_groups[&name];
        if members.iter().any(|m| m.checked) {
            continue;
        }
        let options: Vec<String> = members.iter().filter_map(|m| field_label(m)).collect();
        let question = group_label(members).unwrap_or_else(|| name.clone());
        questions.push(ApplicationQuestion {
            question,
            question_type: QuestionType::Radio,
            options,
            required: members.iter().any(|m| m.required),
            field_name: Some(name),
        });
    }

    questions
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoapply_common::protocol::{GroupHints, LabelHints};

    fn input(handle: u32, kind: &str, name: &str, label: &str) -> FieldInfo {
        FieldInfo {
            handle,
            tag: "input".into(),
            input_type: Some(kind.into()),
            name: Some(name.into()),
            visible: true,
            hints: LabelHints {
                for_label: Some(label.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn label_priority_order() {
        let mut field = input(1, "text", "city", "");
        field.hints.for_label = None;
        field.hints.placeholder = Some("e.g. Cape Town".into());
        field.hints.aria_label = Some("City".into());
        assert_eq!(field_label(&field).as_deref(), Some("City"));
        field.hints.aria_label = Some("  ".into());
        assert_eq!(field_label(&field).as_deref(), Some("e.g. Cape Town"));
    }

    #[test]
    fn skips_hidden_and_answered_fields() {
        let mut answered = input(1, "text", "name", "Full name");
        answered.value = "Sam".into();
        let mut hidden = input(2, "email", "email", "Email");
        hidden.visible = false;
        let open = input(3, "number", "years", "Years of experience");
        let questions = extract_questions(&[answered, hidden, open]);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question, "Years of experience");
        assert_eq!(questions[0].question_type, QuestionType::Number);
        assert_eq!(questions[0].field_name.as_deref(), Some("years"));
    }

    #[test]
    fn radios_are_bucketed_by_name() {
        let mut yes = input(1, "radio", "relocate", "Yes");
        yes.group = GroupHints {
            legend: Some("Are you willing to relocate?".into()),
            heading: None,
        };
        yes.required = true;
        let mut no = input(2, "radio", "relocate", "No");
        no.group = yes.group.clone();
        let questions = extract_questions(&[yes, no]);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question, "Are you willing to relocate?");
        assert_eq!(questions[0].options, vec!["Yes", "No"]);
        assert!(questions[0].required);
    }

    #[test]
    fn answered_radio_groups_are_skipped() {
        let yes = input(1, "radio", "licence", "Yes");
        let mut no = input(2, "radio", "licence", "No");
        no.checked = true;
        assert!(extract_questions(&[yes, no]).is_empty());
    }

    #[test]
    fn select_placeholders_are_filtered() {
        let select = FieldInfo {
            handle: 5,
            tag: "select".into(),
            name: Some("education".into()),
            visible: true,
            options: vec![
                FieldOption {
                    text: "Select...".into(),
                    value: String::new(),
                    selected: true,
                },
                FieldOption {
                    text: "Bachelor's".into(),
                    value: "ba".into(),
                    selected: false,
                },
                FieldOption {
                    text: "Master's".into(),
                    value: "ma".into(),
                    selected: false,
                },
            ],
            hints: LabelHints {
                labelled_by: Some("Highest education".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let questions = extract_questions(&[select]);
        assert_eq!(questions[0].question_type, QuestionType::Select);
        assert_eq!(questions[0].options, vec!["Bachelor's", "Master's"]);
    }

    #[test]
    fn unchecked_checkbox_is_a_yes_no_question() {
        let checkbox = input(9, "checkbox", "terms", "I have a valid work permit");
        let questions = extract_questions(&[checkbox]);
        assert_eq!(questions[0].question_type, QuestionType::Checkbox);
        assert_eq!(questions[0].options, vec!["Yes", "No"]);
    }
}
