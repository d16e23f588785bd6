//! Built-in personas.

use super::Persona;

fn persona(id: &str, name: &str, profession: &str, prompt: &str) -> Persona {
    Persona {
        id: id.to_string(),
        name: name.to_string(),
        profession: profession.to_string(),
        system_instruction: prompt.trim().to_string(),
        avatar: None,
    }
}

/// The persona set used when nothing usable is stored.
///
/// Ids are fixed so transcripts keyed by them survive a reset of the
/// persona collection.
pub fn builtin_personas() -> Vec<Persona> {
    vec![
        persona("meera-chef", "Meera", "Home Chef", include_str!("prompts/meera.md")),
        persona("zara-ceo", "Zara", "Startup CEO", include_str!("prompts/zara.md")),
        persona("sonia-trainer", "Sonia", "Gym Trainer", include_str!("prompts/sonia.md")),
        persona(
            "priya-psychiatrist",
            "Dr. Priya",
            "Psychiatrist",
            include_str!("prompts/priya.md"),
        ),
    ]
}
