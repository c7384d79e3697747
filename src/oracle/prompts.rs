use crate::issue::Issue;

pub const EXPLAIN_SYSTEM: &str = "You are an expert code debugger. Be concise.";

pub const REPAIR_SYSTEM: &str = "You are an expert code debugger. You repair a single code snippet \
and answer with exactly one fenced code block containing the complete corrected snippet. \
Keep every import and definition the snippet needs. Do not add explanations.";

/// User prompt for the repair oracle.
pub fn repair_prompt(issue: &Issue) -> String {
    format!(
        "Language: {}\n\
         Problem Description: {}\n\
         Constraints: {}\n\
         Buggy Code:\n```\n{}\n```\n\
         Error Type: {}\n\
         Error Message: {}\n\n\
         Please fix the code. Return ONLY the fixed code block enclosed in markdown ticks (```).\n\
         Do not add explanations.",
        issue.language,
        issue.description,
        issue.constraints,
        issue.buggy_code,
        issue.bug_type,
        issue.bug_message,
    )
}

/// User prompt for the explanation oracle.
pub fn explain_prompt(slug: &str, description: &str, constraints: &str, buggy_code: &str) -> String {
    format!(
        "Analyze the bug in this problem solution.\n\
         Problem: {}\n\
         Description: {}\n\
         Constraints: {}\n\
         Buggy Code:\n```\n{}\n```\n\
         Please provide a short, one-sentence explanation of why this code is buggy.",
        slug, description, constraints, buggy_code
    )
}
