//! Tag-edit recipes.
//!
//! A recipe is the argument model of the external tag editor: stream copy,
//! container options, and `key=value` metadata pairs. Building one is a pure
//! function of the item and the requested change; nodes run the editor.

use mediafleet_catalog::MediaItem;
use mediafleet_events::MediaChange;

const MP3: &str = "mp3";

/// Editor arguments for one media item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecipe {
    /// Item the recipe applies to.
    pub media_id: String,
    /// Container options as `(key, value)`; always starts with stream copy.
    pub options: Vec<(&'static str, &'static str)>,
    /// Global metadata pairs such as `title=...`.
    pub metadata: Vec<String>,
    /// Metadata for the attached picture stream.
    pub picture_metadata: Vec<String>,
    /// Replacement cover image.
    pub art: Option<String>,
    /// Requested fields the item's format cannot take.
    pub ignored: Vec<&'static str>,
}

impl UpdateRecipe {
    /// Whether the recipe would leave the item unchanged.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.metadata.is_empty() && self.picture_metadata.is_empty() && self.art.is_none()
    }

    /// Flattened editor arguments, excluding inputs and output.
    ///
    /// This is the command line a node hands its tag editor, between the
    /// input file and the output path.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (key, value) in &self.options {
            args.push(format!("-{key}"));
            args.push((*value).to_string());
        }
        for pair in &self.metadata {
            args.push("-metadata".to_string());
            args.push(pair.clone());
        }
        for pair in &self.picture_metadata {
            args.push("-metadata:s:v".to_string());
            args.push(pair.clone());
        }
        args
    }
}

/// Build the recipe that applies `change` to `item`.
///
/// Absent fields are left untouched. mp3 files get ID3v2.3 tags and cannot
/// take a track number or cover art through this path; such fields are
/// listed in [`UpdateRecipe::ignored`].
#[must_use]
pub fn apply_change(item: &MediaItem, change: &MediaChange) -> UpdateRecipe {
    let is_mp3 = item.extension.eq_ignore_ascii_case(MP3);
    let mut options = vec![("c", "copy")];
    if is_mp3 {
        options.push(("id3v2_version", "3"));
    }

    let mut metadata = Vec::new();
    let text_fields = [
        ("title", &change.title),
        ("artist", &change.artist),
        ("album", &change.album),
        ("comment", &change.comment),
        ("genre", &change.genre),
    ];
    for (key, value) in text_fields {
        if let Some(value) = value {
            metadata.push(format!("{key}={value}"));
        }
    }

    let mut ignored = Vec::new();
    if let Some(track) = change.track_number {
        if is_mp3 {
            ignored.push("trackNumber");
        } else {
            metadata.push(match change.track_of {
                Some(total) => format!("track={track}/{total}"),
                None => format!("track={track}"),
            });
        }
    }

    let mut picture_metadata = Vec::new();
    let mut art = None;
    if let Some(image) = &change.art {
        if is_mp3 {
            ignored.push("art");
        } else {
            art = Some(image.clone());
            picture_metadata.push("title=Album cover".to_string());
            picture_metadata.push("comment=Cover (front)".to_string());
        }
    }

    UpdateRecipe {
        media_id: item.id.clone(),
        options,
        metadata,
        picture_metadata,
        art,
        ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediafleet_test_support::media_item;

    #[test]
    fn mp3_gets_id3_options_and_ignores_track_and_art() {
        let item = media_item("n1", "m1", "song", "mp3");
        let change = MediaChange {
            title: Some("Song".into()),
            track_number: Some(3),
            art: Some("/tmp/cover.jpg".into()),
            ..MediaChange::default()
        };
        let recipe = apply_change(&item, &change);
        assert_eq!(recipe.options, vec![("c", "copy"), ("id3v2_version", "3")]);
        assert_eq!(recipe.metadata, vec!["title=Song".to_string()]);
        assert_eq!(recipe.ignored, vec!["trackNumber", "art"]);
        assert!(recipe.art.is_none());
        assert_eq!(
            recipe.to_args(),
            vec!["-c", "copy", "-id3v2_version", "3", "-metadata", "title=Song"]
        );
    }

    #[test]
    fn other_formats_take_track_and_cover() {
        let item = media_item("n1", "m2", "tune", "flac");
        let change = MediaChange {
            album: Some("Blue".into()),
            track_number: Some(4),
            track_of: Some(12),
            art: Some("/tmp/cover.jpg".into()),
            ..MediaChange::default()
        };
        let recipe = apply_change(&item, &change);
        assert_eq!(recipe.options, vec![("c", "copy")]);
        assert_eq!(
            recipe.metadata,
            vec!["album=Blue".to_string(), "track=4/12".to_string()]
        );
        assert_eq!(recipe.art.as_deref(), Some("/tmp/cover.jpg"));
        assert!(recipe.to_args().contains(&"-metadata:s:v".to_string()));
        assert!(recipe.ignored.is_empty());
    }

    #[test]
    fn empty_change_is_a_noop() {
        let item = media_item("n1", "m3", "song", "mp3");
        assert!(apply_change(&item, &MediaChange::default()).is_noop());

        let only_track = MediaChange {
            track_number: Some(1),
            ..MediaChange::default()
        };
        assert!(apply_change(&item, &only_track).is_noop());
    }
}
