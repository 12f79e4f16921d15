use autoapply_common::model::{ApplicantProfile, ApplicationQuestion, JobListing};
use std::fmt::Write;

pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with a single valid JSON object. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

const NOT_SPECIFIED: &str = "Not specified";

/// Char-boundary safe prefix.
pub fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn or_unspecified(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or(NOT_SPECIFIED)
}

fn list_or_unspecified(values: &[String]) -> String {
    if values.is_empty() {
        NOT_SPECIFIED.to_string()
    } else {
        values.join(", ")
    }
}

pub fn match_prompt(profile: &ApplicantProfile, job: &JobListing, description: &str) -> String {
    let mut prompt = String::from(
        "You are a career advisor. Evaluate how well this job matches the candidate's profile.\n\n\
         CANDIDATE PROFILE:\n",
    );
    let _ = writeln!(prompt, "- Name: {}", profile.name);
    let _ = writeln!(prompt, "- Title: {}", or_unspecified(profile.title.as_deref()));
    let _ = writeln!(prompt, "- Skills: {}", list_or_unspecified(&profile.skills));
    let _ = writeln!(prompt, "- Experience: {}", or_unspecified(profile.experience.as_deref()));
    let _ = writeln!(prompt, "- Industry: {}", or_unspecified(profile.industry.as_deref()));
    let _ = writeln!(prompt, "- Desired roles: {}", list_or_unspecified(&profile.desired_roles));
    let _ = writeln!(prompt, "- Location: {}", or_unspecified(profile.location.as_deref()));
    if let Some(cv) = profile.cv_text.as_deref().filter(|c| !c.trim().is_empty()) {
        let _ = writeln!(prompt, "- CV summary: {}", truncate(cv, 1000));
    }
    let _ = write!(
        prompt,
        "\nJOB:\n- Title: {}\n- Company: {}\n- Location: {}\n- Description: {}\n\n",
        job.title,
        job.company,
        job.location,
        truncate(description, 2000)
    );
    prompt.push_str(
        "Respond with JSON only:\n\
         {\"score\": <number 0-100>, \"shouldApply\": <boolean>, \"reason\": \"<brief explanation>\"}",
    );
    prompt
}

pub fn answers_prompt(
    profile: &ApplicantProfile,
    job: &JobListing,
    description: &str,
    questions: &[ApplicationQuestion],
) -> String {
    let mut prompt = String::from(
        "You are helping a job applicant fill out an online application form.\n\n\
         APPLICANT PROFILE:\n",
    );
    let _ = writeln!(prompt, "- Name: {}", profile.name);
    let _ = writeln!(prompt, "- Email: {}", profile.email);
    let _ = writeln!(prompt, "- Phone: {}", or_unspecified(profile.phone.as_deref()));
    let _ = writeln!(prompt, "- Location: {}", or_unspecified(profile.location.as_deref()));
    let _ = writeln!(prompt, "- Title: {}", or_unspecified(profile.title.as_deref()));
    let _ = writeln!(prompt, "- Skills: {}", list_or_unspecified(&profile.skills));
    let _ = writeln!(prompt, "- Experience: {}", or_unspecified(profile.experience.as_deref()));
    let _ = writeln!(prompt, "- Industry: {}", or_unspecified(profile.industry.as_deref()));
    let _ = writeln!(prompt, "- LinkedIn: {}", or_unspecified(profile.linkedin_url.as_deref()));
    if let Some(bio) = profile.bio.as_deref().filter(|b| !b.trim().is_empty()) {
        let _ = writeln!(prompt, "- Bio: {}", bio);
    }
    if let Some(cv) = profile.cv_text.as_deref().filter(|c| !c.trim().is_empty()) {
        let _ = writeln!(prompt, "- CV summary: {}", truncate(cv, 1500));
    }
    let _ = writeln!(prompt, "\nJOB: {} at {}", job.title, job.company);
    if !description.trim().is_empty() {
        let _ = writeln!(prompt, "Description: {}", truncate(description, 1000));
    }

    prompt.push_str("\nAPPLICATION QUESTIONS:\n");
    for (index, question) in questions.iter().enumerate() {
        let _ = write!(
            prompt,
            "{}. \"{}\" (type: {}{})",
            index,
            question.question,
            question.question_type.as_str(),
            if question.required { ", required" } else { "" }
        );
        if !question.options.is_empty() {
            let _ = write!(prompt, "\n   Options: {}", question.options.join(", "));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "\nINSTRUCTIONS:\n\
         - Answer truthfully from the applicant's profile.\n\
         - For select and radio questions choose the best matching option, verbatim.\n\
         - For yes/no questions answer \"Yes\" if the applicant likely qualifies, otherwise \"No\".\n\
         - For number questions give a plain number.\n\
         - Keep text answers concise.\n\
         - Set confidence between 0.0 and 1.0. Use a low confidence when guessing.\n\n\
         Respond with JSON only:\n\
         {\"answers\": [{\"questionIndex\": 0, \"answer\": \"...\", \"confidence\": 0.9}]}",
    );
    prompt
}
