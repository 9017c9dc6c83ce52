//! Media descriptors carried by ports.
//!
//! A descriptor classifies what flows through a port: a format family plus
//! optional concrete attributes. Ports that accept any layout within their
//! family (converters, sinks) carry no attributes.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatFamily {
    Video,
    Audio,
    Other,
}

impl std::fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FormatFamily::Video => "video",
            FormatFamily::Audio => "audio",
            FormatFamily::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Concrete media attributes. When present on both ends of a prospective
/// link they must match exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttrs {
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub family: FormatFamily,
    pub attrs: Option<MediaAttrs>,
}

impl MediaDescriptor {
    pub fn video() -> Self {
        Self {
            family: FormatFamily::Video,
            attrs: None,
        }
    }

    pub fn audio() -> Self {
        Self {
            family: FormatFamily::Audio,
            attrs: None,
        }
    }

    pub fn video_concrete(pixel_format: &str, width: u32, height: u32) -> Self {
        Self {
            family: FormatFamily::Video,
            attrs: Some(MediaAttrs {
                pixel_format: pixel_format.to_string(),
                width,
                height,
            }),
        }
    }

    /// Classify a media-type name from the wire (e.g. "video/x-raw",
    /// "audio/mpeg") into a family-only descriptor.
    pub fn from_media_type(name: &str) -> Self {
        let family = if name.starts_with("video") {
            FormatFamily::Video
        } else if name.starts_with("audio") {
            FormatFamily::Audio
        } else {
            FormatFamily::Other
        };
        Self {
            family,
            attrs: None,
        }
    }

    /// Two descriptors can be linked iff they share a family and, when both
    /// sides carry concrete attributes, those attributes match exactly.
    pub fn compatible_with(&self, other: &MediaDescriptor) -> bool {
        if self.family != other.family {
            return false;
        }
        match (&self.attrs, &other.attrs) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_only_descriptors_are_compatible_within_family() {
        assert!(MediaDescriptor::video().compatible_with(&MediaDescriptor::video()));
        assert!(!MediaDescriptor::video().compatible_with(&MediaDescriptor::audio()));
    }

    #[test]
    fn concrete_attrs_must_match_exactly() {
        let a = MediaDescriptor::video_concrete("NV12", 1920, 1080);
        let b = MediaDescriptor::video_concrete("NV12", 1920, 1080);
        let c = MediaDescriptor::video_concrete("I420", 1920, 1080);
        assert!(a.compatible_with(&b));
        assert!(!a.compatible_with(&c));
    }

    #[test]
    fn one_sided_attrs_do_not_constrain() {
        let concrete = MediaDescriptor::video_concrete("NV12", 1280, 720);
        assert!(concrete.compatible_with(&MediaDescriptor::video()));
        assert!(MediaDescriptor::video().compatible_with(&concrete));
    }

    #[test]
    fn media_type_names_classify_by_prefix() {
        assert_eq!(
            MediaDescriptor::from_media_type("video/x-h264").family,
            FormatFamily::Video
        );
        assert_eq!(
            MediaDescriptor::from_media_type("audio/mpeg").family,
            FormatFamily::Audio
        );
        assert_eq!(
            MediaDescriptor::from_media_type("text/x-raw").family,
            FormatFamily::Other
        );
    }
}
