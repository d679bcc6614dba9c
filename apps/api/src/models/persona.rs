//! Structured resume and persona data produced by the extraction step.
//!
//! The chat core only reads these; they are stored as JSON alongside the resume row.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experience {
    pub role: String,
    pub company: String,
    pub duration: String,
    pub description: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Education {
    pub degree: String,
    pub institution: String,
    pub year: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeData {
    pub name: String,
    pub title: String,
    pub summary: String,
    pub skills: Vec<String>,
    pub experience: Vec<Experience>,
    pub education: Vec<Education>,
    pub certifications: Vec<String>,
}

/// Tone and narrative bundle that parameterizes every generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonaContext {
    pub name: String,
    pub tone: String,
    pub description: String,
    pub expertise: Vec<String>,
    pub strengths: Vec<String>,
    /// Public URL slug, e.g. `jane-doe-dev`.
    pub identifier: String,
    /// Suggested opening questions shown under the chat input.
    pub example_responses: Vec<String>,
}

/// Everything the conversational core needs to know about the person it speaks for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonaProfile {
    pub persona: PersonaContext,
    pub resume: ResumeData,
}
