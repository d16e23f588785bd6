//! Interactive persona editor.

use std::path::Path;

use dialoguer::{theme::ColorfulTheme, Confirm, Editor, Input};

use crate::personas::avatar::{avatar_from_path, is_image_file};
use crate::personas::{Persona, PersonaDraft};

/// Typed at the avatar prompt to drop the current image.
const REMOVE_AVATAR: &str = "none";

/// Prompt for every persona field.
///
/// Starts from `existing` when editing. Returns `None` if the user cancels.
pub fn edit_persona(existing: Option<&Persona>) -> anyhow::Result<Option<PersonaDraft>> {
    let current = existing.map(Persona::to_draft).unwrap_or_default();
    let theme = ColorfulTheme::default();

    let title = match existing {
        Some(p) => format!("Edit {}", p.name),
        None => "New persona".to_string(),
    };
    println!("\n\x1b[1m{title}\x1b[0m\n");

    let Some(name) = ask(&theme, "Name", &current.name)? else {
        return Ok(None);
    };
    let Some(profession) = ask(&theme, "Profession", &current.profession)? else {
        return Ok(None);
    };

    let Some(system_instruction) = ask_system_instruction(&theme, &current.system_instruction)?
    else {
        return Ok(None);
    };

    let hint = if current.avatar.is_some() {
        format!("Avatar image path (empty keeps current, '{REMOVE_AVATAR}' removes)")
    } else {
        "Avatar image path (optional)".to_string()
    };
    let avatar_input: String = Input::<String>::with_theme(&theme)
        .with_prompt(hint)
        .default(String::new())
        .allow_empty(true)
        .show_default(false)
        .interact_text()?;
    let avatar = resolve_avatar(&avatar_input, current.avatar.as_deref())?;

    Ok(Some(PersonaDraft {
        name,
        profession,
        system_instruction,
        avatar,
    }))
}

/// Ask before a destructive action.
pub fn confirm(prompt: &str) -> bool {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

fn ask(theme: &ColorfulTheme, prompt: &str, default: &str) -> anyhow::Result<Option<String>> {
    let mut input = Input::<String>::with_theme(theme).with_prompt(prompt);
    if !default.is_empty() {
        input = input.default(default.to_string());
    }
    let value = input.interact_text()?;

    if value.trim().is_empty() {
        println!("Cancelled.");
        return Ok(None);
    }
    Ok(Some(value.trim().to_string()))
}

/// Open `$EDITOR` on the system prompt, falling back to a single line.
fn ask_system_instruction(theme: &ColorfulTheme, current: &str) -> anyhow::Result<Option<String>> {
    let use_editor = Confirm::with_theme(theme)
        .with_prompt("Write the system prompt in your editor?")
        .default(true)
        .interact()?;

    if !use_editor {
        return ask(theme, "System prompt", current);
    }

    match Editor::new().extension(".md").edit(current)? {
        Some(text) if !text.trim().is_empty() => Ok(Some(text.trim_end().to_string())),
        Some(_) => {
            println!("Cancelled.");
            Ok(None)
        }
        // Editor closed without saving.
        None if !current.is_empty() => Ok(Some(current.to_string())),
        None => {
            println!("Cancelled.");
            Ok(None)
        }
    }
}

/// Turn the avatar prompt answer into the stored avatar.
///
/// Empty input keeps `current`; [`REMOVE_AVATAR`] clears it; anything else
/// is a path (with `~` expanded) to an image that gets thumbnailed.
pub fn resolve_avatar(input: &str, current: Option<&str>) -> anyhow::Result<Option<String>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(current.map(str::to_string));
    }
    if input.eq_ignore_ascii_case(REMOVE_AVATAR) {
        return Ok(None);
    }

    let expanded = shellexpand::tilde(input);
    let path = Path::new(expanded.as_ref());
    if !is_image_file(path) {
        anyhow::bail!("Not an image file: {}", path.display());
    }
    Ok(Some(avatar_from_path(path)?))
}
