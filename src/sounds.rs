//! Sound file lookup for the selected collection
//!
//! Files are assigned to buttons in name order. A `.url` file holds a
//! stream location on its first line instead of audio.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::board::Button;

/// Extension marking a file whose content is the location to play
pub const INDIRECTION_EXTENSION: &str = "url";

/// Sorted file names in `dir`, padded with empty names to one per button
pub fn get_sound_file_list(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    if names.len() < Button::ALL.len() {
        names.resize(Button::ALL.len(), String::new());
    }
    tracing::debug!("Sound list for {}: {:?}", dir.display(), names);
    Ok(names)
}

/// Location to hand the player for `name`, None for an empty slot
pub fn resolve_location(dir: &Path, name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    let path = dir.join(name);
    let is_indirection = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case(INDIRECTION_EXTENSION))
        .unwrap_or(false);
    if !is_indirection {
        return Some(path.to_string_lossy().into_owned());
    }

    match fs::read_to_string(&path) {
        Ok(text) => {
            let location = text.lines().next().unwrap_or("").trim().to_string();
            if location.is_empty() {
                tracing::warn!("{} holds no location", path.display());
                None
            } else {
                Some(location)
            }
        }
        Err(e) => {
            tracing::warn!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

/// The selected collection, one entry per button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundList {
    dir: PathBuf,
    names: Vec<String>,
}

impl SoundList {
    pub fn load(dir: &Path) -> io::Result<Self> {
        Ok(Self {
            dir: dir.to_path_buf(),
            names: get_sound_file_list(dir)?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Where the button's sound plays from, None if the button has no sound
    pub fn location(&self, button: Button) -> Option<String> {
        let name = self.names.get(button.index())?;
        resolve_location(&self.dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_short_list_is_padded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.mp3"), b"x").unwrap();
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();

        let list = get_sound_file_list(dir.path()).unwrap();
        assert_eq!(list, vec!["a.mp3", "b.mp3", "", "", ""]);
    }

    #[test]
    fn test_long_list_is_kept_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["f", "e", "d", "c", "b", "a"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let list = get_sound_file_list(dir.path()).unwrap();
        assert_eq!(list, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_url_file_is_indirection() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("radio.url"),
            "http://stream.example/live\nignored\n",
        )
        .unwrap();

        assert_eq!(
            resolve_location(dir.path(), "radio.url").as_deref(),
            Some("http://stream.example/live")
        );
        assert_eq!(
            resolve_location(dir.path(), "a.mp3"),
            Some(dir.path().join("a.mp3").to_string_lossy().into_owned())
        );
        assert_eq!(resolve_location(dir.path(), ""), None);
    }

    #[test]
    fn test_sound_list_locations() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.wav"), b"x").unwrap();

        let list = SoundList::load(dir.path()).unwrap();
        assert_eq!(list.names().len(), 5);
        assert!(list.location(Button::White).unwrap().ends_with("one.wav"));
        assert_eq!(list.location(Button::Blue), None);
        assert_eq!(list.location(Button::Red), None);
    }

    #[test]
    fn test_missing_dir_is_error() {
        assert!(get_sound_file_list(Path::new("/definitely/not/here")).is_err());
    }
}
